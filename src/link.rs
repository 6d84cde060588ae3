// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Handshake primitives
//!
//! Every exchange is a rendezvous on the control lines: the server places or
//! takes a byte and pulses server-ready, the client answers on client-ready.
//! Nothing blocks indefinitely; each wait polls against a deadline and gives
//! up after `Timing::timeout`.

use std::time::{Duration, Instant};
use crate::bus::{LineState, Role, SignalBus};
use crate::config::Timing;
use crate::error::LinkError;
use crate::gpio::Direction;
use crate::protocol::ResponseCode;

// ============================================================================
// Clock
// ============================================================================

pub trait Clock: Send {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Simulated time: every sample advances the clock by one tick
#[cfg(test)]
pub struct FakeClock {
    start: Instant,
    elapsed: std::cell::Cell<Duration>,
    tick: Duration,
}

#[cfg(test)]
impl FakeClock {
    pub fn new() -> Self {
        FakeClock {
            start: Instant::now(),
            elapsed: std::cell::Cell::new(Duration::ZERO),
            tick: Duration::from_micros(10),
        }
    }
}

#[cfg(test)]
impl Clock for FakeClock {
    fn now(&self) -> Instant {
        let elapsed = self.elapsed.get();
        self.elapsed.set(elapsed + self.tick);
        self.start + elapsed
    }

    fn sleep(&self, duration: Duration) {
        self.elapsed.set(self.elapsed.get() + duration);
    }
}

// ============================================================================
// Link
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Matched,
    TimedOut,
    /// The line holding the exchange open dropped first
    Withdrawn,
}

/// The server end of the parallel link
pub struct Link {
    bus: Box<dyn SignalBus>,
    clock: Box<dyn Clock>,
    timing: Timing,
}

impl Link {
    pub fn new(bus: Box<dyn SignalBus>, clock: Box<dyn Clock>, timing: Timing) -> Self {
        Link { bus, clock, timing }
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn pause(&self, duration: Duration) {
        self.clock.sleep(duration);
    }

    pub fn is_asserted(&mut self, role: Role) -> Result<bool, LinkError> {
        Ok(self.bus.read_line(role)?.is_asserted())
    }

    pub fn set_line(&mut self, role: Role, state: LineState) -> Result<(), LinkError> {
        self.bus.write_line(role, state)?;
        Ok(())
    }

    pub fn set_direction(&mut self, direction: Direction) -> Result<(), LinkError> {
        self.bus.set_direction(direction)?;
        Ok(())
    }

    /// Poll `role` until it reaches `state` or the timeout expires
    pub fn wait_for(&mut self, role: Role, state: LineState) -> Result<Wait, LinkError> {
        self.poll(role, state, None)
    }

    /// Like `wait_for`, but give up early if `hold` is deasserted
    pub fn wait_while(&mut self, role: Role, state: LineState, hold: Role) -> Result<Wait, LinkError> {
        self.poll(role, state, Some(hold))
    }

    fn poll(&mut self, role: Role, state: LineState, hold: Option<Role>) -> Result<Wait, LinkError> {
        let start = self.clock.now();
        loop {
            if self.bus.read_line(role)? == state {
                return Ok(Wait::Matched);
            }
            if let Some(hold) = hold {
                if !self.bus.read_line(hold)?.is_asserted() {
                    return Ok(Wait::Withdrawn);
                }
            }
            if self.clock.now().duration_since(start) >= self.timing.timeout {
                return Ok(Wait::TimedOut);
            }
        }
    }

    /// `wait_for`, treating a timeout as an error
    pub fn expect(&mut self, role: Role, state: LineState) -> Result<(), LinkError> {
        match self.wait_for(role, state)? {
            Wait::Matched => Ok(()),
            _ => {
                tracing::debug!("Timed out waiting for {} to become {}", role, state);
                Err(LinkError::Timeout { role, state })
            }
        }
    }

    /// Pulse server-ready: "byte placed or taken, proceed"
    pub fn strobe(&mut self) -> Result<(), LinkError> {
        self.bus.write_line(Role::ServerReady, LineState::Asserted)?;
        self.clock.sleep(self.timing.strobe);
        self.bus.write_line(Role::ServerReady, LineState::Deasserted)?;
        Ok(())
    }

    /// Place a byte, strobe, then wait for the client's ready pulse
    pub fn send_byte(&mut self, value: u8) -> Result<(), LinkError> {
        self.bus.write_byte(value)?;
        self.strobe()?;
        self.expect(Role::ClientReady, LineState::Asserted)?;
        self.expect(Role::ClientReady, LineState::Deasserted)?;
        tracing::trace!("Sent: 0x{:02X}", value);
        Ok(())
    }

    /// Take a byte the client has announced, acknowledge it, and wait for
    /// client-ready to drop before the next one
    pub fn recv_byte(&mut self) -> Result<u8, LinkError> {
        self.expect(Role::ClientReady, LineState::Asserted)?;
        let value = self.bus.read_byte()?;
        self.strobe()?;
        self.expect(Role::ClientReady, LineState::Deasserted)?;
        tracing::trace!("Received: 0x{:02X}", value);
        Ok(value)
    }

    /// Take a byte the client pulses onto the bus, acknowledging only after
    /// the pulse ends
    ///
    /// The byte lands in `buffer` as soon as it is sampled, so it is kept
    /// even if the client never finishes the pulse.
    pub fn recv_data_byte(&mut self, buffer: &mut Vec<u8>) -> Result<(), LinkError> {
        self.expect(Role::ClientReady, LineState::Asserted)?;
        buffer.push(self.bus.read_byte()?);
        self.expect(Role::ClientReady, LineState::Deasserted)?;
        self.strobe()
    }

    /// Deliver the single response-code byte that opens a LOAD or SAVE
    pub fn send_response(&mut self, code: ResponseCode, settle: Duration) -> Result<(), LinkError> {
        tracing::debug!("Sending response code: {}", code.byte());
        self.expect(Role::ClientActive, LineState::Deasserted)?;

        self.bus.set_direction(Direction::Output)?;
        self.bus.write_line(Role::ServerActive, LineState::Asserted)?;

        let exchange = self.expect(Role::ClientReady, LineState::Asserted).and_then(|()| {
            self.bus.write_byte(code.byte())?;
            self.strobe()
        });

        self.bus.write_line(Role::ServerActive, LineState::Deasserted)?;
        self.clock.sleep(settle);
        exchange
    }

    /// Release both server lines and hand the data bus back to the client
    pub fn reset(&mut self) -> Result<(), LinkError> {
        self.bus.write_line(Role::ServerReady, LineState::Deasserted)?;
        self.bus.write_line(Role::ServerActive, LineState::Deasserted)?;
        self.bus.set_direction(Direction::Input)?;
        Ok(())
    }
}

#[cfg(test)]
pub fn test_link(script: Vec<crate::bus::ClientStep>, expected: Vec<u8>) -> Link {
    Link::new(
        Box::new(crate::bus::MockBus::new(script, expected)),
        Box::new(FakeClock::new()),
        Timing::default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{ClientStep, MockBus};

    #[test]
    fn test_wait_for_matches() {
        let mut link = test_link(vec![ClientStep::Active(true)], vec![]);
        assert_eq!(link.wait_for(Role::ClientActive, LineState::Asserted).unwrap(), Wait::Matched);
        assert_eq!(link.wait_for(Role::ClientOnline, LineState::Asserted).unwrap(), Wait::Matched);
    }

    #[test]
    fn test_wait_for_times_out() {
        let mut link = test_link(vec![], vec![]);
        let timeout = link.timing().timeout;

        let start = link.now();
        let result = link.wait_for(Role::ClientReady, LineState::Asserted).unwrap();
        let elapsed = link.now().duration_since(start);

        assert_eq!(result, Wait::TimedOut);
        assert!(elapsed >= timeout, "gave up early after {:?}", elapsed);
        assert!(elapsed < timeout + Duration::from_millis(1), "overran by {:?}", elapsed - timeout);
    }

    #[test]
    fn test_wait_for_times_out_in_real_time() {
        let timing = Timing {
            timeout: Duration::from_millis(20),
            ..Timing::default()
        };
        let mut link = Link::new(Box::new(MockBus::new(vec![], vec![])), Box::new(SystemClock), timing);

        let start = Instant::now();
        let result = link.wait_for(Role::ClientActive, LineState::Asserted).unwrap();

        assert_eq!(result, Wait::TimedOut);
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[test]
    fn test_wait_while_withdrawn() {
        let mut link = test_link(vec![], vec![]);
        let result = link
            .wait_while(Role::ClientReady, LineState::Asserted, Role::ClientActive)
            .unwrap();
        assert_eq!(result, Wait::Withdrawn);
    }

    #[test]
    fn test_expect_reports_line() {
        let mut link = test_link(vec![], vec![]);
        match link.expect(Role::ClientReady, LineState::Asserted) {
            Err(LinkError::Timeout { role, state }) => {
                assert_eq!(role, Role::ClientReady);
                assert_eq!(state, LineState::Asserted);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_send_byte() {
        let mut link = test_link(vec![ClientStep::Read, ClientStep::Read], vec![0x42, 0x00]);
        link.set_direction(Direction::Output).unwrap();
        link.send_byte(0x42).unwrap();
        link.send_byte(0x00).unwrap();
    }

    #[test]
    fn test_send_byte_unanswered() {
        let mut link = test_link(vec![], vec![]);
        link.set_direction(Direction::Output).unwrap();
        let err = link.send_byte(0x42).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_recv_byte() {
        let mut link = test_link(vec![ClientStep::Write(0x99), ClientStep::Write(0x01)], vec![]);
        assert_eq!(link.recv_byte().unwrap(), 0x99);
        assert_eq!(link.recv_byte().unwrap(), 0x01);
    }

    #[test]
    fn test_recv_data_byte() {
        let mut link = test_link(vec![ClientStep::Pulse(0x10), ClientStep::Pulse(0x20)], vec![]);
        let mut buffer = Vec::new();
        link.recv_data_byte(&mut buffer).unwrap();
        link.recv_data_byte(&mut buffer).unwrap();
        assert_eq!(buffer, [0x10, 0x20]);
    }

    #[test]
    fn test_send_response() {
        let mut link = test_link(vec![ClientStep::Request], vec![ResponseCode::FileOpenError.byte()]);
        link.send_response(ResponseCode::FileOpenError, Duration::from_millis(1)).unwrap();
        assert!(!link.is_asserted(Role::ServerActive).unwrap());
    }

    #[test]
    fn test_send_response_client_still_active() {
        let mut link = test_link(vec![ClientStep::Active(true)], vec![]);
        let err = link.send_response(ResponseCode::Ok, Duration::ZERO).unwrap_err();
        assert!(matches!(
            err,
            LinkError::Timeout { role: Role::ClientActive, state: LineState::Deasserted }
        ));
    }

    #[test]
    fn test_send_response_unanswered_releases_server_active() {
        let mut link = test_link(vec![], vec![]);
        assert!(link.send_response(ResponseCode::Ok, Duration::ZERO).is_err());
        assert!(!link.is_asserted(Role::ServerActive).unwrap());
    }
}
