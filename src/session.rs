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
use std::time::{Duration, Instant};
use crate::protocol::{Operation, ResponseCode};

/// Everything known about the request currently being served
///
/// Created when the client raises client-active, dropped when the server
/// returns to idle.
#[derive(Debug)]
pub struct Session {
    pub opcode: u8,
    pub operation: Option<Operation>,
    pub filename: Option<String>,
    pub response: Option<ResponseCode>,
    pub bytes: usize,
    transfer_start: Option<Instant>,
    pub elapsed: Duration,
}

impl Session {
    pub fn new() -> Self {
        Session {
            opcode: 0,
            operation: None,
            filename: None,
            response: None,
            bytes: 0,
            transfer_start: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn set_opcode(&mut self, opcode: u8) {
        self.opcode = opcode;
        self.operation = Operation::from_opcode(opcode);
    }

    pub fn start_transfer(&mut self, now: Instant) {
        self.transfer_start = Some(now);
    }

    pub fn finish_transfer(&mut self, now: Instant) {
        if let Some(start) = self.transfer_start.take() {
            self.elapsed = now.duration_since(start);
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

/// One-line summary logged when the session ends
impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operation {
            Some(op) => write!(f, "{}", op)?,
            None => write!(f, "opcode {}", self.opcode)?,
        }
        if let Some(name) = &self.filename {
            write!(f, " {}", name)?;
        }
        write!(f, " - {} bytes", self.bytes)?;
        if self.bytes > 0 {
            write!(f, " - {:.3}s", self.elapsed.as_secs_f64())?;
        }
        Ok(())
    }
}
