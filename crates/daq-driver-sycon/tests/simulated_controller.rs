//! End-to-end session tests against the in-memory controller.

use std::time::Duration;

use daq_core::DaqError;
use daq_driver_sycon::{
    AttributeValue, InstrumentHealth, PowerOnStatus, SimulatedStm100, Stm100Driver, ZeroTarget,
    ATTRIBUTES,
};

fn session() -> (Stm100Driver, SimulatedStm100) {
    let sim = SimulatedStm100::new();
    (Stm100Driver::with_transport(sim.clone()), sim)
}

#[test]
fn identify_and_health() {
    let (mut qcm, _sim) = session();
    assert_eq!(qcm.identify().unwrap(), "STM-100");
    assert_eq!(qcm.health(), InstrumentHealth::Nominal);
}

#[test]
fn material_parameters_round_trip_through_controller() {
    let (mut qcm, sim) = session();

    qcm.set_setpoint(5000.7).unwrap();
    qcm.set_density(19.32).unwrap();
    qcm.set_zfactor(0.381).unwrap();
    qcm.set_tooling(120.0).unwrap();

    assert_eq!(sim.setpoint(), 5000);
    assert_eq!(qcm.setpoint().unwrap(), 5000.0);
    assert_eq!(qcm.density().unwrap(), 19.32);
    assert_eq!(qcm.zfactor().unwrap(), 0.381);
    assert_eq!(qcm.tooling().unwrap(), 120.0);
}

#[test]
fn test_mode_deposition_reaches_setpoint() {
    let (mut qcm, _sim) = session();

    qcm.set_setpoint(50.0).unwrap();
    qcm.zero(ZeroTarget::Both).unwrap();
    qcm.set_testmode(true).unwrap();
    qcm.set_shutter(true).unwrap();
    assert!(qcm.testmode().unwrap());
    assert!(qcm.shutter().unwrap());
    assert!(qcm.rate().unwrap() > 0.0);

    let mut reached = false;
    for _ in 0..20 {
        if qcm.setpoint_reached().unwrap() {
            reached = true;
            break;
        }
    }
    assert!(reached);
    assert!(qcm.thickness().unwrap() >= 50.0);

    qcm.set_shutter(false).unwrap();
    assert_eq!(qcm.rate().unwrap(), 0.0);
}

#[test]
fn timer_overflow_reads_as_unknown() {
    let (mut qcm, sim) = session();
    sim.set_timer(Duration::from_secs(90));
    // Each request advances the simulated clock by one second.
    assert_eq!(qcm.timer().unwrap(), Some(Duration::from_secs(91)));

    sim.set_timer(Duration::from_secs(6000));
    assert_eq!(qcm.timer().unwrap(), None);
}

#[test]
fn films_match_controller_table() {
    let (mut qcm, sim) = session();
    let films = qcm.films().unwrap();

    assert_eq!(films.len(), 9);
    for film in &films {
        let (density, zfactor, tooling) = sim.film(film.slot).unwrap();
        assert_eq!(film.density, density);
        assert_eq!(film.zfactor, zfactor);
        assert_eq!(film.tooling, tooling);
    }
    assert_eq!(sim.commands().len(), 27);
}

#[test]
fn power_on_bits_clear_after_acknowledge() {
    let (mut qcm, sim) = session();
    sim.set_power_on_status(PowerOnStatus {
        reset: true,
        brownout: true,
        nvm_fault: false,
    });

    let status = qcm.power_on_status().unwrap();
    assert!(status.reset && status.brownout && !status.nvm_fault);

    qcm.acknowledge_power_on_status().unwrap();
    assert!(!qcm.power_on_status().unwrap().any());
}

#[test]
fn unknown_command_reports_fault_status() {
    let (mut qcm, _sim) = session();
    qcm.identify().unwrap();
    assert_eq!(qcm.health(), InstrumentHealth::Nominal);

    assert_eq!(qcm.query("Z").unwrap(), "");
    assert_eq!(qcm.last_status(), Some('E'));
    assert_eq!(qcm.health(), InstrumentHealth::Fault);
}

#[test]
fn every_table_attribute_is_readable() {
    let (mut qcm, _sim) = session();
    for spec in ATTRIBUTES.iter() {
        let value = qcm.read_attribute(spec.name).unwrap();
        match value {
            AttributeValue::Float(v) => assert!(!v.is_nan(), "{} read NaN", spec.name),
            AttributeValue::Text(text) => assert!(!text.is_empty()),
            AttributeValue::Bool(_) | AttributeValue::Duration(_) => {}
        }
    }
}

#[test]
fn stray_bytes_cause_framing_error_then_recover() {
    let (mut qcm, sim) = session();
    sim.inject_noise(&[0xFF, 0x00]);

    match qcm.thickness() {
        Err(DaqError::Framing { found, .. }) => assert_eq!(found, 0xFF),
        other => panic!("expected Framing, got {:?}", other),
    }
    assert_eq!(sim.flush_count(), 1);
    assert_eq!(qcm.thickness().unwrap(), 0.0);
}

#[test]
fn close_is_forwarded_once() {
    let (mut qcm, sim) = session();
    qcm.close().unwrap();
    assert!(matches!(qcm.identify(), Err(DaqError::SessionClosed)));
    drop(qcm);
    assert_eq!(sim.close_count(), 1);
}
