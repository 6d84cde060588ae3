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

use std::io;
use thiserror::Error;
use crate::bus::{LineState, Role};
use crate::protocol::ResponseCode;

// ============================================================================
// Link Errors
// ============================================================================

/// Failures of a single handshake exchange
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("timed out waiting for {role} to become {state}")]
    Timeout { role: Role, state: LineState },

    #[error("GPIO error: {0}")]
    Io(#[from] io::Error),
}

impl LinkError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, LinkError::Timeout { .. })
    }
}

// ============================================================================
// Session Errors
// ============================================================================

/// Why a request ended early; handled by the dispatcher, never fatal
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("filename transfer failed: {0}")]
    Name(#[source] LinkError),

    #[error("could not deliver response {code}: {source}")]
    Response {
        code: ResponseCode,
        #[source]
        source: LinkError,
    },

    /// The client was told about the failure with a response code
    #[error("{code}: {filename}: {source}")]
    Rejected {
        code: ResponseCode,
        filename: String,
        #[source]
        source: io::Error,
    },

    #[error("transfer aborted after {count} bytes: {source}")]
    Transfer {
        count: usize,
        #[source]
        source: LinkError,
    },

    #[error("cannot read {filename}: {source}")]
    Read {
        filename: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot write {filename}: {source}")]
    Write {
        filename: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot list storage: {0}")]
    List(#[source] io::Error),

    #[error("listing aborted while sending {name}: {source}")]
    ListEntry {
        name: String,
        #[source]
        source: LinkError,
    },
}

// ============================================================================
// Server Errors
// ============================================================================

/// The server lines could not be released, so no further request can be
/// served safely
#[derive(Debug, Error)]
#[error("cannot release the link after {attempts} attempts: {source} (in state: {state})")]
pub struct ServerError {
    pub state: &'static str,
    pub attempts: u32,
    #[source]
    pub source: LinkError,
}

// ============================================================================
// Startup Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("could not open GPIO: {0}")]
    Gpio(#[source] io::Error),

    #[error("storage directory {0} not found")]
    StorageMissing(String),
}
