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

use std::fmt;
use std::io;
use crate::config::{LinePin, PinMap};
use crate::gpio::{Direction, Gpio, Level};

// ============================================================================
// Lines
// ============================================================================

/// The five control lines of the link, named from the server's side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    ClientActive,
    ClientReady,
    ClientOnline,
    ServerReady,
    ServerActive,
}

impl Role {
    /// Client lines are inputs to the server, server lines are outputs
    pub fn is_input(self) -> bool {
        matches!(self, Role::ClientActive | Role::ClientReady | Role::ClientOnline)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::ClientActive => "CA",
            Role::ClientReady => "CR",
            Role::ClientOnline => "CO",
            Role::ServerReady => "SR",
            Role::ServerActive => "SA",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    Asserted,
    Deasserted,
}

impl LineState {
    pub fn is_asserted(self) -> bool {
        self == LineState::Asserted
    }
}

impl From<bool> for LineState {
    fn from(asserted: bool) -> Self {
        if asserted { LineState::Asserted } else { LineState::Deasserted }
    }
}

impl fmt::Display for LineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineState::Asserted => f.write_str("active"),
            LineState::Deasserted => f.write_str("inactive"),
        }
    }
}

// ============================================================================
// SignalBus Trait
// ============================================================================

/// Control lines plus the 8-bit data bus, as seen by the server
///
/// Every call reflects the instantaneous state of the wires; there is no
/// buffering and no timing at this level.
pub trait SignalBus: Send {
    fn read_line(&mut self, role: Role) -> io::Result<LineState>;

    fn write_line(&mut self, role: Role, state: LineState) -> io::Result<()>;

    /// Switch all eight data lines at once
    fn set_direction(&mut self, direction: Direction) -> io::Result<()>;

    fn read_byte(&mut self) -> io::Result<u8>;

    fn write_byte(&mut self, value: u8) -> io::Result<()>;
}

// ============================================================================
// GPIO Implementation
// ============================================================================

/// SignalBus over raw GPIO pins, translating assert/deassert through each
/// line's polarity
pub struct GpioBus<G: Gpio> {
    gpio: G,
    pins: PinMap,
    direction: Direction,
}

impl<G: Gpio> GpioBus<G> {
    /// Claim the pins and put every line in its idle state
    pub fn open(mut gpio: G, pins: PinMap) -> io::Result<Self> {
        gpio.set_output(pins.irq, Level::High)?;
        gpio.set_output(pins.intsel, Level::Low)?;
        gpio.set_output(pins.led, Level::Low)?;

        for line in [pins.client_active, pins.client_ready, pins.client_online] {
            gpio.set_direction(line.pin, Direction::Input)?;
        }

        let mut bus = GpioBus {
            gpio,
            pins,
            direction: Direction::Output,
        };
        bus.set_direction(Direction::Input)?;

        // Server lines come up already deasserted, so the client never sees a
        // stray strobe
        for role in [Role::ServerReady, Role::ServerActive] {
            let line = bus.line(role);
            bus.gpio.set_output(line.pin, line.polarity.level(false))?;
        }

        Ok(bus)
    }

    fn line(&self, role: Role) -> LinePin {
        match role {
            Role::ClientActive => self.pins.client_active,
            Role::ClientReady => self.pins.client_ready,
            Role::ClientOnline => self.pins.client_online,
            Role::ServerReady => self.pins.server_ready,
            Role::ServerActive => self.pins.server_active,
        }
    }

    #[cfg(test)]
    pub fn gpio(&self) -> &G {
        &self.gpio
    }

    #[cfg(test)]
    pub fn gpio_mut(&mut self) -> &mut G {
        &mut self.gpio
    }
}

impl<G: Gpio> SignalBus for GpioBus<G> {
    fn read_line(&mut self, role: Role) -> io::Result<LineState> {
        let line = self.line(role);
        let level = self.gpio.read(line.pin)?;
        Ok(LineState::from(line.polarity.is_asserted(level)))
    }

    fn write_line(&mut self, role: Role, state: LineState) -> io::Result<()> {
        if role.is_input() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is driven by the client", role),
            ));
        }
        let line = self.line(role);
        self.gpio.write(line.pin, line.polarity.level(state.is_asserted()))
    }

    fn set_direction(&mut self, direction: Direction) -> io::Result<()> {
        if direction == self.direction {
            return Ok(());
        }
        for pin in self.pins.data {
            self.gpio.set_direction(pin, direction)?;
        }
        self.direction = direction;
        Ok(())
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        let mut value = 0u8;
        for (bit, pin) in self.pins.data.iter().enumerate() {
            if self.gpio.read(*pin)? == Level::High {
                value |= 1 << bit;
            }
        }
        Ok(value)
    }

    fn write_byte(&mut self, value: u8) -> io::Result<()> {
        for (bit, pin) in self.pins.data.iter().enumerate() {
            let level = if value & (1 << bit) != 0 { Level::High } else { Level::Low };
            self.gpio.write(*pin, level)?;
        }
        Ok(())
    }
}

// ============================================================================
// Mock Bus for Testing
// ============================================================================

/// One action of the simulated client
///
/// Steps play in order, each once the previous one has finished. A step only
/// changes a line after the server has sampled its previous level, so no
/// pulse is ever too short to be seen.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStep {
    /// Drive client-active
    Active(bool),
    /// Drive client-online
    Online(bool),
    /// Place a byte and raise client-ready, lower it when the server strobes
    Write(u8),
    /// Place a byte and raise client-ready, lower it as soon as the server
    /// samples the bus, then wait for the strobe
    Pulse(u8),
    /// Once server-active is up, raise client-ready and latch the strobed byte
    Request,
    /// Latch one strobed byte and answer with a client-ready pulse
    Read,
    /// Keep reading strobed bytes for the rest of the session
    Drain,
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InFlight {
    ReleaseOnStrobe,
    ReleaseOnBusRead,
    AwaitStrobe,
    LatchOnStrobe,
    AwaitData,
    ReleaseWhenSeen,
}

/// Scripted client side of the link
#[cfg(test)]
pub struct MockBus {
    script: std::collections::VecDeque<ClientStep>,
    in_flight: Option<InFlight>,
    draining: bool,
    client_active: bool,
    client_ready: bool,
    client_online: bool,
    // Server has sampled the line since it last changed
    ready_seen: bool,
    active_seen: bool,
    online_seen: bool,
    server_ready: bool,
    server_active: bool,
    direction: Direction,
    bus_in: u8,
    bus_out: u8,
    // Track what the client latched
    received: Vec<u8>,
    expected: Vec<u8>,
    // Lines must be back at rest when the mock is dropped
    check_released: bool,
}

#[cfg(test)]
impl MockBus {
    pub fn new(script: Vec<ClientStep>, expected: Vec<u8>) -> Self {
        MockBus {
            script: script.into(),
            in_flight: None,
            draining: false,
            client_active: false,
            client_ready: false,
            client_online: true,
            ready_seen: true,
            active_seen: true,
            online_seen: true,
            server_ready: false,
            server_active: false,
            direction: Direction::Input,
            bus_in: 0,
            bus_out: 0,
            received: Vec::new(),
            expected,
            check_released: false,
        }
    }

    /// Also require, on drop, that both server lines are deasserted and the
    /// data bus is back to input
    pub fn expect_released(mut self) -> Self {
        self.check_released = true;
        self
    }

    /// A filename, framed by client-active
    pub fn filename(name: &str) -> Vec<ClientStep> {
        let mut steps = vec![ClientStep::Active(true)];
        steps.extend(name.bytes().map(ClientStep::Write));
        steps.push(ClientStep::Active(false));
        steps
    }

    /// Opcode followed by a filename, the way the client opens every request
    pub fn request(opcode: u8, name: &str) -> Vec<ClientStep> {
        let mut steps = MockBus::filename(name);
        steps.insert(1, ClientStep::Write(opcode));
        steps
    }

    fn set_ready(&mut self, asserted: bool) {
        self.client_ready = asserted;
        self.ready_seen = false;
    }

    fn can_start(&self, step: ClientStep) -> bool {
        let settled = !self.client_ready && self.ready_seen;
        match step {
            ClientStep::Write(_) | ClientStep::Pulse(_) => settled,
            ClientStep::Request => settled && self.server_active,
            ClientStep::Active(_) => !self.client_ready && self.active_seen,
            ClientStep::Online(_) => !self.client_ready && self.online_seen,
            ClientStep::Read | ClientStep::Drain => !self.client_ready,
        }
    }

    fn start(&mut self, step: ClientStep) {
        match step {
            ClientStep::Active(on) => {
                self.client_active = on;
                self.active_seen = false;
            }
            ClientStep::Online(on) => {
                self.client_online = on;
                self.online_seen = false;
            }
            ClientStep::Write(value) => {
                self.bus_in = value;
                self.set_ready(true);
                self.in_flight = Some(InFlight::ReleaseOnStrobe);
            }
            ClientStep::Pulse(value) => {
                self.bus_in = value;
                self.set_ready(true);
                self.in_flight = Some(InFlight::ReleaseOnBusRead);
            }
            ClientStep::Request => {
                self.set_ready(true);
                self.in_flight = Some(InFlight::LatchOnStrobe);
            }
            ClientStep::Read => self.in_flight = Some(InFlight::AwaitData),
            ClientStep::Drain => {
                self.draining = true;
                self.in_flight = Some(InFlight::AwaitData);
            }
        }
    }

    fn advance(&mut self) {
        if self.in_flight == Some(InFlight::ReleaseWhenSeen) && self.ready_seen {
            self.set_ready(false);
            self.in_flight = None;
        }

        while self.in_flight.is_none() {
            if self.draining {
                if !self.client_ready {
                    self.in_flight = Some(InFlight::AwaitData);
                }
                return;
            }
            let Some(&step) = self.script.front() else { return };
            if !self.can_start(step) {
                return;
            }
            self.script.pop_front();
            self.start(step);
        }
    }

    fn latch(&mut self) {
        assert_eq!(self.direction, Direction::Output, "client latched the bus while the server was not driving it");
        self.received.push(self.bus_out);
    }

    fn on_strobe(&mut self) {
        self.advance();
        match self.in_flight {
            Some(InFlight::ReleaseOnStrobe) => {
                self.set_ready(false);
                self.in_flight = None;
            }
            Some(InFlight::AwaitStrobe) => self.in_flight = None,
            Some(InFlight::LatchOnStrobe) => {
                self.latch();
                self.set_ready(false);
                self.in_flight = None;
            }
            Some(InFlight::AwaitData) => {
                self.latch();
                self.set_ready(true);
                self.in_flight = Some(InFlight::ReleaseWhenSeen);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
impl SignalBus for MockBus {
    fn read_line(&mut self, role: Role) -> io::Result<LineState> {
        self.advance();
        let asserted = match role {
            Role::ClientActive => {
                self.active_seen = true;
                self.client_active
            }
            Role::ClientReady => {
                self.ready_seen = true;
                self.client_ready
            }
            Role::ClientOnline => {
                self.online_seen = true;
                self.client_online
            }
            Role::ServerReady => self.server_ready,
            Role::ServerActive => self.server_active,
        };
        Ok(LineState::from(asserted))
    }

    fn write_line(&mut self, role: Role, state: LineState) -> io::Result<()> {
        match role {
            Role::ServerReady => {
                let was = self.server_ready;
                self.server_ready = state.is_asserted();
                if was && !self.server_ready {
                    self.on_strobe();
                }
                Ok(())
            }
            Role::ServerActive => {
                self.server_active = state.is_asserted();
                Ok(())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is driven by the client", role),
            )),
        }
    }

    fn set_direction(&mut self, direction: Direction) -> io::Result<()> {
        self.direction = direction;
        Ok(())
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        assert_eq!(self.direction, Direction::Input, "data bus read while driven as output");
        if self.in_flight == Some(InFlight::ReleaseOnBusRead) {
            self.set_ready(false);
            self.in_flight = Some(InFlight::AwaitStrobe);
        }
        Ok(self.bus_in)
    }

    fn write_byte(&mut self, value: u8) -> io::Result<()> {
        assert_eq!(self.direction, Direction::Output, "data bus written while configured as input");
        self.bus_out = value;
        Ok(())
    }
}

#[cfg(test)]
impl Drop for MockBus {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert!(
            self.script.is_empty(),
            "MockBus dropped with {} unplayed client steps: {:?}",
            self.script.len(),
            self.script
        );

        assert_eq!(
            &self.received,
            &self.expected,
            "MockBus client received mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected.len(),
            self.expected,
            self.received.len(),
            self.received
        );

        if self.check_released {
            assert!(!self.server_ready, "server-ready left asserted");
            assert!(!self.server_active, "server-active left asserted");
            assert_eq!(self.direction, Direction::Input, "data bus left driven");
        }
    }
}
