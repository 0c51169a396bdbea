//! STM-100 Hardware Smoke Test
//!
//! Reads every attribute of a real controller and toggles test mode. The
//! shutter relay is left untouched.
//!
//! # Hardware Setup
//!
//! - Sycon STM-100 on an RS-232 port (9600 baud, 8N1)
//!
//! # Environment Variables
//!
//! Required:
//! - `STM100_PORT` - serial device or VISA resource (e.g. `/dev/ttyUSB0`)
//!
//! Optional:
//! - `STM100_BAUD_RATE` - baud rate (default: 9600)
//! - `STM100_TIMEOUT_MS` - per-call timeout (default: 200)
//!
//! # Running
//!
//! ```bash
//! export STM100_PORT=/dev/ttyUSB0
//! cargo test --features hardware -p daq-driver-sycon --test hardware_stm100 -- --ignored --nocapture --test-threads=1
//! ```

#![cfg(feature = "hardware")]

use std::env;

use daq_driver_sycon::{Stm100Config, Stm100Driver, ATTRIBUTES};

// =============================================================================
// Environment Helpers
// =============================================================================

fn hardware_port() -> Option<String> {
    env::var("STM100_PORT").ok().filter(|p| !p.trim().is_empty())
}

macro_rules! skip_if_no_hardware {
    () => {
        if hardware_port().is_none() {
            println!("Skipping: STM100_PORT not set");
            return;
        }
    };
}

fn open() -> Stm100Driver {
    let config = Stm100Config::from_env().expect("STM100_* configuration");
    println!("Opening STM-100 on {} at {} baud", config.port, config.baud_rate);
    Stm100Driver::from_config(&config).expect("open STM-100")
}

// =============================================================================
// Tests
// =============================================================================

#[test]
#[ignore]
fn hardware_reads_all_attributes() {
    skip_if_no_hardware!();
    let mut qcm = open();

    println!("Model: {}", qcm.identify().unwrap());
    for spec in ATTRIBUTES.iter() {
        let value = qcm.read_attribute(spec.name).unwrap();
        println!(
            "  {:<18} {} {}",
            spec.name,
            value,
            spec.unit.unwrap_or("")
        );
    }
    println!("Health: {}", qcm.health());

    let status = qcm.power_on_status().unwrap();
    println!("Power-on status: {}", status);

    qcm.close().unwrap();
}

#[test]
#[ignore]
fn hardware_film_table() {
    skip_if_no_hardware!();
    let mut qcm = open();

    let films = qcm.films().unwrap();
    assert_eq!(films.len(), 9);
    for film in &films {
        println!(
            "  slot {}: density {:.3} g/cm³, Z {:.3}, tooling {:.1}%",
            film.slot, film.density, film.zfactor, film.tooling
        );
    }
}

#[test]
#[ignore]
fn hardware_testmode_toggle_restores_state() {
    skip_if_no_hardware!();
    let mut qcm = open();

    let original = qcm.testmode().unwrap();
    qcm.set_testmode(!original).unwrap();
    assert_eq!(qcm.testmode().unwrap(), !original);
    qcm.set_testmode(original).unwrap();
    assert_eq!(qcm.testmode().unwrap(), original);
}
