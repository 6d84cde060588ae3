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

use std::marker::PhantomData;
use crate::bus::{LineState, Role};
use crate::error::{LinkError, ServerError};
use crate::link::{Link, Wait};
use crate::listing;
use crate::protocol::Operation;
use crate::session::Session;
use crate::store::FileStore;
use crate::transfer;

/// Consecutive failures to release the lines before the server gives up
pub const MAX_RESET_FAILURES: u32 = 20;

// ============================================================================
// States
// ============================================================================

pub struct Offline;
pub struct Idle;
pub struct RequestPending;
pub struct Dispatched;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct ServerFsm<State> {
    state: PhantomData<State>,
    link: Link,
    store: Box<dyn FileStore>,
    session: Option<Session>,
    // Failed releases since the lines were last left at rest
    reset_failures: u32,
}

// ============================================================================
// Trait
// ============================================================================

pub trait ServerState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn ServerState>, ServerError>;

    fn name(&self) -> &'static str;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> ServerFsm<S> {
    fn transition<T>(self) -> Box<ServerFsm<T>> {
        Box::new(ServerFsm {
            state: PhantomData,
            link: self.link,
            store: self.store,
            session: self.session,
            reset_failures: self.reset_failures,
        })
    }

    fn state_name() -> &'static str {
        let type_name = std::any::type_name::<S>();
        type_name.split("::").last().unwrap_or(type_name)
    }

    /// A failed sample while polling: log it and back off one poll interval
    fn poll_failed(&self, role: Role, e: LinkError) {
        tracing::warn!("Cannot read {} while {}: {}", role, Self::state_name(), e);
        self.link.pause(self.link.timing().idle_poll);
    }

    /// Park in Offline and retry the release from there
    fn reset_failed(mut self, source: LinkError) -> Result<Box<dyn ServerState>, ServerError> {
        self.reset_failures += 1;
        if self.reset_failures >= MAX_RESET_FAILURES {
            return Err(ServerError {
                state: Self::state_name(),
                attempts: self.reset_failures,
                source,
            });
        }

        tracing::warn!(
            "Cannot release the link ({} of {}): {}",
            self.reset_failures,
            MAX_RESET_FAILURES,
            source
        );
        self.link.pause(self.link.timing().idle_poll);
        Ok(self.transition::<Offline>() as Box<dyn ServerState>)
    }

    /// Leave the lines idle and wait for the next request
    fn finish(mut self) -> Result<Box<dyn ServerState>, ServerError> {
        self.session = None;
        if let Err(e) = self.link.reset() {
            return self.reset_failed(e);
        }
        self.reset_failures = 0;
        self.link.pause(self.link.timing().session_settle);
        tracing::debug!("Waiting for next request...");
        Ok(self.transition::<Idle>() as Box<dyn ServerState>)
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl ServerState for ServerFsm<Offline> {
    fn step(self: Box<Self>) -> Result<Box<dyn ServerState>, ServerError> {
        let mut fsm = *self;

        if fsm.reset_failures > 0 {
            if let Err(e) = fsm.link.reset() {
                return fsm.reset_failed(e);
            }
            tracing::info!("Link released after {} failed attempts", fsm.reset_failures);
            fsm.reset_failures = 0;
        }

        match fsm.link.is_asserted(Role::ClientOnline) {
            Ok(true) => {
                tracing::info!("--- ONLINE ---");
                let next = fsm.transition::<Idle>();
                return Ok(next as Box<dyn ServerState>);
            }
            Ok(false) => fsm.link.pause(fsm.link.timing().idle_poll),
            Err(e) => fsm.poll_failed(Role::ClientOnline, e),
        }
        Ok(Box::new(fsm) as Box<dyn ServerState>)
    }

    fn name(&self) -> &'static str {
        Self::state_name()
    }
}

impl ServerState for ServerFsm<Idle> {
    fn step(self: Box<Self>) -> Result<Box<dyn ServerState>, ServerError> {
        let mut fsm = *self;

        match fsm.link.is_asserted(Role::ClientOnline) {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!("--- OFFLINE ---");
                let next = fsm.transition::<Offline>();
                return Ok(next as Box<dyn ServerState>);
            }
            Err(e) => {
                fsm.poll_failed(Role::ClientOnline, e);
                return Ok(Box::new(fsm) as Box<dyn ServerState>);
            }
        }

        match fsm.link.is_asserted(Role::ClientActive) {
            Ok(true) => {
                tracing::debug!("Request received");
                fsm.session = Some(Session::new());
                let next = fsm.transition::<RequestPending>();
                return Ok(next as Box<dyn ServerState>);
            }
            Ok(false) => fsm.link.pause(fsm.link.timing().idle_poll),
            Err(e) => fsm.poll_failed(Role::ClientActive, e),
        }
        Ok(Box::new(fsm) as Box<dyn ServerState>)
    }

    fn name(&self) -> &'static str {
        Self::state_name()
    }
}

impl ServerState for ServerFsm<RequestPending> {
    fn step(self: Box<Self>) -> Result<Box<dyn ServerState>, ServerError> {
        let mut fsm = *self;

        let wait = match fsm
            .link
            .wait_while(Role::ClientReady, LineState::Asserted, Role::ClientActive)
        {
            Ok(wait) => wait,
            Err(e) => {
                tracing::warn!("*** Request abandoned: {} ***", e);
                return fsm.finish();
            }
        };

        match wait {
            Wait::Matched => match fsm.link.recv_byte() {
                Ok(opcode) => {
                    tracing::debug!("Code read: {}", opcode);
                    if let Some(session) = fsm.session.as_mut() {
                        session.set_opcode(opcode);
                    }
                    let next = fsm.transition::<Dispatched>();
                    Ok(next as Box<dyn ServerState>)
                }
                Err(e) if e.is_timeout() => {
                    tracing::warn!("*** Timed out reading opcode: {} ***", e);
                    fsm.finish()
                }
                Err(e) => {
                    tracing::warn!("*** Cannot read opcode: {} ***", e);
                    fsm.finish()
                }
            },
            Wait::Withdrawn => {
                tracing::debug!("Job done");
                fsm.finish()
            }
            Wait::TimedOut => {
                tracing::warn!("*** Timed out ***");
                fsm.finish()
            }
        }
    }

    fn name(&self) -> &'static str {
        Self::state_name()
    }
}

impl ServerState for ServerFsm<Dispatched> {
    fn step(self: Box<Self>) -> Result<Box<dyn ServerState>, ServerError> {
        let mut fsm = *self;
        let mut session = fsm.session.take().unwrap_or_default();
        let store = fsm.store.as_ref();

        let result = match session.operation {
            Some(Operation::Load) => Some(transfer::load(&mut fsm.link, store, &mut session)),
            Some(Operation::Save(mode)) => Some(transfer::save(&mut fsm.link, store, &mut session, mode)),
            Some(Operation::List) => Some(listing::list(&mut fsm.link, store, &mut session)),
            None => None,
        };

        match result {
            Some(Ok(())) => tracing::info!("Done: {}", session),
            Some(Err(e)) => tracing::warn!("*** ERROR: {} *** ({})", e, session),
            None => tracing::warn!("*** Unknown opcode {} ***", session.opcode),
        }

        fsm.finish()
    }

    fn name(&self) -> &'static str {
        Self::state_name()
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl ServerFsm<Offline> {
    pub fn new(link: Link, store: Box<dyn FileStore>) -> Box<dyn ServerState> {
        Box::new(ServerFsm {
            state: PhantomData::<Offline>,
            link,
            store,
            session: None,
            reset_failures: 0,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io;
    use crate::bus::{ClientStep, MockBus, SignalBus};
    use crate::config::Timing;
    use crate::gpio::Direction;
    use crate::link::FakeClock;
    use crate::protocol::*;
    use crate::store::DirStore;

    /// Scripted client that fails chosen GPIO calls
    struct FlakyBus {
        inner: MockBus,
        reads: usize,
        // 1-based `read_line` calls that fail
        failing_reads: Vec<usize>,
        direction_failures: usize,
    }

    impl FlakyBus {
        fn new(script: Vec<ClientStep>) -> Self {
            FlakyBus {
                inner: MockBus::new(script, vec![]).expect_released(),
                reads: 0,
                failing_reads: Vec::new(),
                direction_failures: 0,
            }
        }
    }

    fn gpio_error() -> io::Error {
        io::Error::other("sysfs EIO")
    }

    impl SignalBus for FlakyBus {
        fn read_line(&mut self, role: Role) -> io::Result<LineState> {
            self.reads += 1;
            if self.failing_reads.contains(&self.reads) {
                return Err(gpio_error());
            }
            self.inner.read_line(role)
        }

        fn write_line(&mut self, role: Role, state: LineState) -> io::Result<()> {
            self.inner.write_line(role, state)
        }

        fn set_direction(&mut self, direction: Direction) -> io::Result<()> {
            if self.direction_failures > 0 {
                self.direction_failures -= 1;
                return Err(gpio_error());
            }
            self.inner.set_direction(direction)
        }

        fn read_byte(&mut self) -> io::Result<u8> {
            self.inner.read_byte()
        }

        fn write_byte(&mut self, value: u8) -> io::Result<()> {
            self.inner.write_byte(value)
        }
    }

    fn server_on(bus: impl SignalBus + 'static, dir: &std::path::Path) -> Box<dyn ServerState> {
        let link = Link::new(Box::new(bus), Box::new(FakeClock::new()), Timing::default());
        ServerFsm::<Offline>::new(link, Box::new(DirStore::new(dir)))
    }

    /// Every session must leave both server lines deasserted and the data
    /// bus as input; the mock checks this when the server is dropped
    fn server(script: Vec<ClientStep>, expected: Vec<u8>, dir: &std::path::Path) -> Box<dyn ServerState> {
        server_on(MockBus::new(script, expected).expect_released(), dir)
    }

    /// Step until the server is back in Idle, returning the states visited
    fn run_request(mut fsm: Box<dyn ServerState>) -> (Box<dyn ServerState>, Vec<&'static str>) {
        let mut visited = vec![fsm.name()];
        loop {
            fsm = fsm.step().expect("step should succeed");
            visited.push(fsm.name());
            if fsm.name() == "Idle" && visited.iter().filter(|s| **s == "Idle").count() > 1 {
                return (fsm, visited);
            }
            assert!(visited.len() < 16, "server never returned to Idle: {:?}", visited);
        }
    }

    #[test]
    fn test_online_offline() {
        let dir = tempfile::tempdir().unwrap();
        let script = vec![ClientStep::Online(false), ClientStep::Online(true), ClientStep::Online(false)];
        let mut fsm = server(script, vec![], dir.path());

        let mut visited = Vec::new();
        for _ in 0..4 {
            fsm = fsm.step().unwrap();
            visited.push(fsm.name());
        }
        assert_eq!(visited, ["Offline", "Idle", "Offline", "Offline"]);
    }

    #[test]
    fn test_idle_without_request() {
        let dir = tempfile::tempdir().unwrap();
        let mut fsm = server(vec![], vec![], dir.path());
        for _ in 0..3 {
            fsm = fsm.step().unwrap();
        }
        assert_eq!(fsm.name(), "Idle");
    }

    #[test]
    fn test_load_request() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("GAME.BIN"), [0x01, 0x02, 0x03]).unwrap();

        let mut script = MockBus::request(OP_LOAD, "GAME");
        script.push(ClientStep::Request);
        script.push(ClientStep::Drain);
        let fsm = server(script, vec![ResponseCode::Ok.byte(), 0x01, 0x02, 0x03], dir.path());

        let (fsm, visited) = run_request(fsm);
        assert_eq!(visited, ["Offline", "Idle", "RequestPending", "Dispatched", "Idle"]);

        // Nothing leaks into the next poll
        let fsm = fsm.step().unwrap();
        assert_eq!(fsm.name(), "Idle");
    }

    #[test]
    fn test_every_opcode_returns_to_idle_once() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("FILE.BIN"), b"Z").unwrap();

        let cases: Vec<(u8, Vec<ClientStep>, Vec<u8>)> = vec![
            (OP_LOAD, vec![ClientStep::Request, ClientStep::Drain], vec![0, b'Z']),
            (OP_SAVE_CREATE, vec![ClientStep::Request], vec![ResponseCode::FileExistsError.byte()]),
            (
                OP_SAVE_OVERWRITE,
                vec![ClientStep::Request, ClientStep::Active(true), ClientStep::Pulse(b'Y'), ClientStep::Active(false)],
                vec![0],
            ),
            (
                OP_SAVE_APPEND,
                vec![ClientStep::Request, ClientStep::Active(true), ClientStep::Pulse(b'X'), ClientStep::Active(false)],
                vec![0],
            ),
        ];

        for (opcode, tail, expected) in cases {
            let mut script = MockBus::request(opcode, "FILE");
            script.extend(tail);
            let (_, visited) = run_request(server(script, expected, dir.path()));
            assert_eq!(
                visited.iter().filter(|s| **s == "Idle").count(),
                2,
                "opcode {}: {:?}",
                opcode,
                visited
            );
            assert_eq!(visited.last(), Some(&"Idle"));
        }

        assert_eq!(fs::read(dir.path().join("FILE.BIN")).unwrap(), b"YX");
    }

    #[test]
    fn test_list_request() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ONE.BIN"), b"1").unwrap();

        let mut script = MockBus::request(OP_LIST, "");
        script.push(ClientStep::Drain);
        let mut expected = b"ONE".to_vec();
        expected.push(NAME_END);
        expected.push(LIST_END);

        let (_, visited) = run_request(server(script, expected, dir.path()));
        assert_eq!(visited, ["Offline", "Idle", "RequestPending", "Dispatched", "Idle"]);
    }

    #[test]
    fn test_unknown_opcode_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let script = MockBus::request(0x63, "");

        let (_, visited) = run_request(server(script, vec![], dir.path()));
        assert_eq!(visited, ["Offline", "Idle", "RequestPending", "Dispatched", "Idle"]);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_request_without_opcode_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let (_, visited) = run_request(server(vec![ClientStep::Active(true)], vec![], dir.path()));
        assert_eq!(visited, ["Offline", "Idle", "RequestPending", "Idle"]);
    }

    #[test]
    fn test_request_withdrawn() {
        let dir = tempfile::tempdir().unwrap();
        let script = vec![ClientStep::Active(true), ClientStep::Active(false)];
        let (_, visited) = run_request(server(script, vec![], dir.path()));
        assert_eq!(visited, ["Offline", "Idle", "RequestPending", "Idle"]);
    }

    #[test]
    fn test_failed_session_returns_to_idle() {
        let dir = tempfile::tempdir().unwrap();

        // Name never finishes: session abandoned without a response
        let script = vec![ClientStep::Active(true), ClientStep::Write(OP_LOAD)];
        let (_, visited) = run_request(server(script, vec![], dir.path()));
        assert_eq!(visited, ["Offline", "Idle", "RequestPending", "Dispatched", "Idle"]);
    }

    #[test]
    fn test_aborted_load_releases_lines() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("GAME.BIN"), [0x01, 0x02, 0x03]).unwrap();

        // Client takes one byte and stops answering while the bus is driven
        let mut script = MockBus::request(OP_LOAD, "GAME");
        script.push(ClientStep::Request);
        script.push(ClientStep::Read);
        let fsm = server(script, vec![ResponseCode::Ok.byte(), 0x01], dir.path());

        let (_, visited) = run_request(fsm);
        assert_eq!(visited, ["Offline", "Idle", "RequestPending", "Dispatched", "Idle"]);
    }

    #[test]
    fn test_poll_errors_keep_serving() {
        let dir = tempfile::tempdir().unwrap();
        let mut bus = FlakyBus::new(vec![]);
        bus.failing_reads = vec![1, 3];
        let mut fsm = server_on(bus, dir.path());

        let mut visited = Vec::new();
        for _ in 0..4 {
            fsm = fsm.step().expect("GPIO errors while polling are not fatal");
            visited.push(fsm.name());
        }
        assert_eq!(visited, ["Offline", "Idle", "Idle", "Idle"]);
    }

    #[test]
    fn test_gpio_error_waiting_for_opcode_abandons_request() {
        let dir = tempfile::tempdir().unwrap();
        let mut bus = FlakyBus::new(vec![ClientStep::Active(true)]);
        // CO in Offline, CO and CA in Idle, then the first client-ready sample
        bus.failing_reads = vec![4];

        let (_, visited) = run_request(server_on(bus, dir.path()));
        assert_eq!(visited, ["Offline", "Idle", "RequestPending", "Idle"]);
    }

    #[test]
    fn test_failed_release_is_retried_from_offline() {
        let dir = tempfile::tempdir().unwrap();
        let mut bus = FlakyBus::new(MockBus::request(0x63, ""));
        bus.direction_failures = 1;

        let (_, visited) = run_request(server_on(bus, dir.path()));
        assert_eq!(
            visited,
            ["Offline", "Idle", "RequestPending", "Dispatched", "Offline", "Idle"]
        );
    }

    #[test]
    fn test_release_that_keeps_failing_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut bus = FlakyBus::new(MockBus::request(0x63, ""));
        bus.direction_failures = usize::MAX;
        let mut fsm = server_on(bus, dir.path());

        let mut steps = 0;
        let err = loop {
            steps += 1;
            assert!(steps < 64, "release failures never became fatal");
            match fsm.step() {
                Ok(next) => fsm = next,
                Err(e) => break e,
            }
        };

        assert_eq!(err.attempts, MAX_RESET_FAILURES);
        assert_eq!(err.state, "Offline");
        assert!(matches!(err.source, LinkError::Io(_)));
    }
}
