//! In-memory transports for tests and hardware-free operation.
//!
//! - [`MockTransport`] replays scripted reply bytes, one queued reply per
//!   request frame, and records everything written to it.
//! - [`SimulatedStm100`] decodes request frames and answers them like a
//!   controller would, keeping setpoint, film parameters, shutter, test mode,
//!   timer and power-on bits in memory.
//!
//! Both are cheap to clone; clones share state, so a test can keep a handle
//! for inspection after moving the transport into a session.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use daq_core::limits::{DEFAULT_IO_TIMEOUT, FRAME_START};
use daq_core::Transport;
use parking_lot::Mutex;
use tracing::debug;

use crate::frame::checksum;
use crate::values::{switch_char, PowerOnStatus, FALSE_CHAR, FILM_SLOTS, TRUE_CHAR};

/// Build a reply frame with a correct checksum.
///
/// Unlike [`encode`](crate::frame::encode) this does not enforce the payload
/// limit, so tests can produce oversized replies.
pub fn reply_frame(status: char, body: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(body.len() + 1);
    let mut buf = [0u8; 4];
    payload.extend_from_slice(status.encode_utf8(&mut buf).as_bytes());
    payload.extend_from_slice(body.as_bytes());
    raw_frame(&payload, checksum(&payload))
}

/// Build a frame around `payload` with an arbitrary checksum byte.
pub fn raw_frame(payload: &[u8], checksum: u8) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 3);
    frame.push(FRAME_START);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    frame.push(checksum);
    frame
}

/// Pop one complete request frame off the front of `outgoing`, returning its
/// payload. Bytes before a start byte are discarded.
fn take_request(outgoing: &mut Vec<u8>) -> Option<Vec<u8>> {
    let start = outgoing.iter().position(|b| *b == FRAME_START)?;
    outgoing.drain(..start);

    let len = usize::from(*outgoing.get(1)?);
    let total = len + 3;
    if outgoing.len() < total {
        return None;
    }
    let frame: Vec<u8> = outgoing.drain(..total).collect();
    Some(frame[2..2 + len].to_vec())
}

fn read_input(input: &mut VecDeque<u8>, buf: &mut [u8]) -> io::Result<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    if input.is_empty() {
        return Err(io::Error::new(io::ErrorKind::TimedOut, "no reply pending"));
    }
    let n = buf.len().min(input.len());
    for (slot, byte) in buf.iter_mut().zip(input.drain(..n)) {
        *slot = byte;
    }
    Ok(n)
}

// =============================================================================
// MockTransport
// =============================================================================

#[derive(Debug, Default)]
struct MockState {
    replies: VecDeque<Vec<u8>>,
    input: VecDeque<u8>,
    outgoing: Vec<u8>,
    requests: Vec<Vec<u8>>,
    flushes: usize,
    closes: usize,
}

/// Scripted transport.
///
/// Each complete request frame written releases the next queued reply into
/// the input buffer. With no reply queued, reads fail with
/// [`io::ErrorKind::TimedOut`].
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    timeout: Duration,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Empty script with the default timeout.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// Queue raw bytes as the reply to the next unanswered request.
    pub fn push_reply(&self, bytes: impl Into<Vec<u8>>) -> &Self {
        self.state.lock().replies.push_back(bytes.into());
        self
    }

    /// Queue a well-formed reply.
    pub fn push_response(&self, status: char, body: &str) -> &Self {
        self.push_reply(reply_frame(status, body))
    }

    /// Payloads of every request frame written so far.
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.state.lock().requests.clone()
    }

    /// Request payloads as text.
    pub fn commands(&self) -> Vec<String> {
        self.state
            .lock()
            .requests
            .iter()
            .map(|payload| String::from_utf8_lossy(payload).into_owned())
            .collect()
    }

    /// Number of `flush_input` calls.
    pub fn flush_count(&self) -> usize {
        self.state.lock().flushes
    }

    /// Number of `close` calls.
    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }

    /// Bytes received but not yet read.
    pub fn pending_input(&self) -> usize {
        self.state.lock().input.len()
    }

    /// Replies still queued.
    pub fn queued_replies(&self) -> usize {
        self.state.lock().replies.len()
    }
}

impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_input(&mut self.state.lock().input, buf)
    }
}

impl Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        state.outgoing.extend_from_slice(buf);
        while let Some(payload) = take_request(&mut state.outgoing) {
            state.requests.push(payload);
            if let Some(reply) = state.replies.pop_front() {
                state.input.extend(reply);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MockTransport {
    fn flush_input(&mut self) -> io::Result<()> {
        let mut state = self.state.lock();
        state.input.clear();
        state.flushes += 1;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }

    fn close(&mut self) -> io::Result<()> {
        self.state.lock().closes += 1;
        Ok(())
    }
}

// =============================================================================
// SimulatedStm100
// =============================================================================

/// Rate reported while test mode deposits with the shutter open, in Å/s.
pub const SIMULATED_RATE: f64 = 10.0;

/// Timer value beyond which the controller reports overflow.
const TIMER_MAX_SECS: u64 = 99 * 60 + 59;

const DEFAULT_FILMS: [(f64, f64, f64); 9] = [
    (2.700, 1.080, 100.0),
    (19.320, 0.381, 100.0),
    (10.500, 0.529, 100.0),
    (7.200, 0.305, 100.0),
    (4.500, 0.628, 100.0),
    (2.200, 1.070, 100.0),
    (8.930, 0.437, 100.0),
    (8.910, 0.331, 100.0),
    (21.400, 0.245, 100.0),
];

#[derive(Debug)]
struct SimState {
    status: char,
    model: String,
    thickness: f64,
    setpoint: u64,
    density: f64,
    zfactor: f64,
    tooling: f64,
    frequency: f64,
    lifetime: f64,
    crystal_fail: bool,
    shutter: bool,
    testmode: bool,
    timer_secs: u64,
    power_on: PowerOnStatus,
    films: [(f64, f64, f64); 9],
    outgoing: Vec<u8>,
    input: VecDeque<u8>,
    log: Vec<String>,
    flushes: usize,
    closes: usize,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            status: 'A',
            model: "STM-100".to_string(),
            thickness: 0.0,
            setpoint: 0,
            density: DEFAULT_FILMS[0].0,
            zfactor: DEFAULT_FILMS[0].1,
            tooling: DEFAULT_FILMS[0].2,
            frequency: 5_980_000.0,
            lifetime: 100.0,
            crystal_fail: false,
            shutter: false,
            testmode: false,
            timer_secs: 0,
            power_on: PowerOnStatus {
                reset: true,
                ..PowerOnStatus::default()
            },
            films: DEFAULT_FILMS,
            outgoing: Vec::new(),
            input: VecDeque::new(),
            log: Vec::new(),
            flushes: 0,
            closes: 0,
        }
    }
}

impl SimState {
    fn depositing(&self) -> bool {
        self.testmode && self.shutter
    }

    /// One simulated second passes per request.
    fn tick(&mut self) {
        self.timer_secs += 1;
        if self.depositing() {
            self.thickness += SIMULATED_RATE;
            self.frequency -= 0.5;
            self.lifetime = (self.lifetime - 0.01).max(0.0);
        }
    }

    fn timer_text(&self) -> String {
        if self.timer_secs > TIMER_MAX_SECS {
            format!(">{:02}:{:02}", 99, 59)
        } else {
            format!("{:02}:{:02}", self.timer_secs / 60, self.timer_secs % 60)
        }
    }

    fn film_query(&self, command: &str) -> Option<String> {
        let mut chars = command.chars();
        let kind = chars.next()?;
        let slot = chars.next()?.to_digit(10)? as u8;
        if chars.as_str() != "?" || !FILM_SLOTS.contains(&slot) {
            return None;
        }
        let (density, zfactor, tooling) = self.films[usize::from(slot - 1)];
        match kind {
            'j' => Some(format!("{:.3}", density)),
            'k' => Some(format!("{:.3}", zfactor)),
            'o' => Some(format!("{:.1}", tooling)),
            _ => None,
        }
    }

    fn set_numeric(&mut self, command: &str) -> Option<()> {
        let (name, value) = command.split_once('=')?;
        let value: f64 = value.parse().ok()?;
        match name {
            "G" => self.setpoint = value as u64,
            "E" => self.density = value,
            "F" => self.zfactor = value,
            "J" => self.tooling = value,
            _ => return None,
        }
        Some(())
    }

    fn flag(on: bool) -> Vec<u8> {
        vec![switch_char(on) as u8]
    }

    /// Answer one command. `None` marks an unknown or malformed command.
    fn respond(&mut self, command: &str) -> Option<Vec<u8>> {
        let body = match command {
            "@" => self.model.clone().into_bytes(),
            "S" => format!("{:.1}", self.thickness).into_bytes(),
            "G?" => self.setpoint.to_string().into_bytes(),
            "P" => Self::flag(self.setpoint > 0 && self.thickness >= self.setpoint as f64),
            "T" => {
                let rate = if self.depositing() { SIMULATED_RATE } else { 0.0 };
                format!("{:.2}", rate).into_bytes()
            }
            "E?" => format!("{:.3}", self.density).into_bytes(),
            "F?" => format!("{:.3}", self.zfactor).into_bytes(),
            "J?" => format!("{:.1}", self.tooling).into_bytes(),
            "U" => format!("{:.1}", self.frequency).into_bytes(),
            "V" => format!("{:.1}", self.lifetime).into_bytes(),
            "M" => Self::flag(self.crystal_fail),
            "W" => self.timer_text().into_bytes(),
            "A?" => Self::flag(self.shutter),
            "K?" => Self::flag(self.testmode),
            "a" => vec![self.power_on.to_byte()],
            "L" => {
                self.power_on = PowerOnStatus::default();
                Vec::new()
            }
            "B" => {
                self.thickness = 0.0;
                self.timer_secs = 0;
                Vec::new()
            }
            "C" => {
                self.thickness = 0.0;
                Vec::new()
            }
            "D" => {
                self.timer_secs = 0;
                Vec::new()
            }
            _ => {
                let mut chars = command.chars();
                match (chars.next(), chars.next(), chars.next()) {
                    (Some('A'), Some(c @ (TRUE_CHAR | FALSE_CHAR)), None) => {
                        self.shutter = c == TRUE_CHAR;
                        Vec::new()
                    }
                    (Some('K'), Some(c @ (TRUE_CHAR | FALSE_CHAR)), None) => {
                        self.testmode = c == TRUE_CHAR;
                        Vec::new()
                    }
                    _ if command.contains('=') => {
                        self.set_numeric(command)?;
                        Vec::new()
                    }
                    _ => self.film_query(command)?.into_bytes(),
                }
            }
        };
        Some(body)
    }

    fn handle(&mut self, payload: &[u8]) {
        let command = String::from_utf8_lossy(payload).into_owned();
        self.log.push(command.clone());
        self.tick();

        let (status, body) = match self.respond(&command) {
            Some(body) => (self.status, body),
            None => ('E', Vec::new()),
        };
        debug!(command = %command, status = %status, "Simulated controller reply");

        let mut reply = Vec::with_capacity(body.len() + 1);
        reply.push(status as u8);
        reply.extend_from_slice(&body);
        self.input.extend(raw_frame(&reply, checksum(&reply)));
    }
}

/// In-memory STM-100.
///
/// Every request advances the simulated clock by one second. With test mode
/// and the shutter both on, thickness grows by [`SIMULATED_RATE`] per second.
/// Unknown commands and unparseable setter values are answered with status
/// `E` and an empty body.
#[derive(Debug, Clone)]
pub struct SimulatedStm100 {
    state: Arc<Mutex<SimState>>,
    timeout: Duration,
}

impl Default for SimulatedStm100 {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedStm100 {
    /// Controller in its power-on state: reset bit set, status `A`.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::default())),
            timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// Every command received, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    /// Status character used for successful replies.
    pub fn set_status(&self, status: char) {
        self.state.lock().status = status;
    }

    /// Force the crystal failure flag.
    pub fn set_crystal_fail(&self, failed: bool) {
        self.state.lock().crystal_fail = failed;
    }

    /// Force the power-on status bits.
    pub fn set_power_on_status(&self, status: PowerOnStatus) {
        self.state.lock().power_on = status;
    }

    /// Set the elapsed timer.
    pub fn set_timer(&self, elapsed: Duration) {
        self.state.lock().timer_secs = elapsed.as_secs();
    }

    /// Current simulated thickness in Å.
    pub fn thickness(&self) -> f64 {
        self.state.lock().thickness
    }

    /// Current setpoint in Å.
    pub fn setpoint(&self) -> u64 {
        self.state.lock().setpoint
    }

    /// Parameters stored in `slot` (1 through 9).
    pub fn film(&self, slot: u8) -> Option<(f64, f64, f64)> {
        if !FILM_SLOTS.contains(&slot) {
            return None;
        }
        Some(self.state.lock().films[usize::from(slot - 1)])
    }

    /// Put stray bytes on the line ahead of the next reply.
    pub fn inject_noise(&self, bytes: &[u8]) {
        self.state.lock().input.extend(bytes.iter().copied());
    }

    /// Number of `flush_input` calls.
    pub fn flush_count(&self) -> usize {
        self.state.lock().flushes
    }

    /// Number of `close` calls.
    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }
}

impl Read for SimulatedStm100 {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_input(&mut self.state.lock().input, buf)
    }
}

impl Write for SimulatedStm100 {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        state.outgoing.extend_from_slice(buf);
        while let Some(payload) = take_request(&mut state.outgoing) {
            state.handle(&payload);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for SimulatedStm100 {
    fn flush_input(&mut self) -> io::Result<()> {
        let mut state = self.state.lock();
        state.input.clear();
        state.flushes += 1;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn describe(&self) -> String {
        "simulated STM-100".to_string()
    }

    fn close(&mut self) -> io::Result<()> {
        self.state.lock().closes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{decode, encode};

    fn exchange<T: Transport>(transport: &mut T, command: &str) -> crate::frame::Response {
        transport.write_all(&encode(command).unwrap()).unwrap();
        decode(transport).unwrap()
    }

    #[test]
    fn test_mock_releases_one_reply_per_request() {
        let mut mock = MockTransport::new();
        mock.push_response('A', "1.5").push_response('B', "!");

        let first = exchange(&mut mock, "T");
        assert_eq!(first.status(), Some('A'));
        assert_eq!(first.body(), "1.5");
        assert_eq!(mock.pending_input(), 0);

        let second = exchange(&mut mock, "A?");
        assert_eq!(second.body(), "!");
        assert_eq!(mock.commands(), vec!["T", "A?"]);
    }

    #[test]
    fn test_mock_times_out_without_reply() {
        let mut mock = MockTransport::new();
        mock.write_all(&encode("S").unwrap()).unwrap();
        let mut byte = [0u8; 1];
        let err = mock.read(&mut byte).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_mock_flush_discards_input() {
        let mut mock = MockTransport::new();
        mock.push_reply(vec![0x41, 0x42, 0x43]);
        mock.write_all(&encode("S").unwrap()).unwrap();
        assert_eq!(mock.pending_input(), 3);

        mock.flush_input().unwrap();
        assert_eq!(mock.pending_input(), 0);
        assert_eq!(mock.flush_count(), 1);
    }

    #[test]
    fn test_simulator_setters_and_queries() {
        let mut sim = SimulatedStm100::new();

        assert_eq!(exchange(&mut sim, "G=5000").status(), Some('A'));
        assert_eq!(exchange(&mut sim, "G?").body(), "5000");
        exchange(&mut sim, "E=12.500");
        assert_eq!(exchange(&mut sim, "E?").body(), "12.500");
        assert_eq!(exchange(&mut sim, "j2?").body(), "19.320");
        assert_eq!(exchange(&mut sim, "o9?").body(), "100.0");

        let unknown = exchange(&mut sim, "Z");
        assert_eq!(unknown.status(), Some('E'));
        assert_eq!(unknown.body(), "");
        assert_eq!(exchange(&mut sim, "j0?").status(), Some('E'));
    }

    #[test]
    fn test_simulator_deposits_in_test_mode() {
        let mut sim = SimulatedStm100::new();
        exchange(&mut sim, "K!");
        exchange(&mut sim, "A!");
        let before = sim.thickness();
        exchange(&mut sim, "T");
        assert_eq!(sim.thickness(), before + SIMULATED_RATE);

        exchange(&mut sim, "C");
        assert_eq!(sim.thickness(), 0.0);
    }

    #[test]
    fn test_simulator_timer_overflow() {
        let mut sim = SimulatedStm100::new();
        sim.set_timer(Duration::from_secs(TIMER_MAX_SECS + 10));
        assert!(exchange(&mut sim, "W").body().starts_with('>'));

        exchange(&mut sim, "D");
        // The zero command itself takes one simulated second.
        assert_eq!(exchange(&mut sim, "W").body(), "00:01");
    }

    #[test]
    fn test_simulator_power_on_bits() {
        let mut sim = SimulatedStm100::new();
        assert_eq!(exchange(&mut sim, "a").body_bytes(), &[0b001]);
        exchange(&mut sim, "L");
        assert_eq!(exchange(&mut sim, "a").body_bytes(), &[0]);
    }
}
