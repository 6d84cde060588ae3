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

//! LOAD and SAVE

use std::io::{self, Read, Write};
use crate::bus::{LineState, Role};
use crate::error::{LinkError, SessionError};
use crate::gpio::Direction;
use crate::link::{Link, Wait};
use crate::name::{read_name, storage_name};
use crate::protocol::{ResponseCode, SaveMode};
use crate::session::Session;
use crate::store::FileStore;

// ============================================================================
// LOAD
// ============================================================================

/// Stream a stored file to the client
pub fn load(link: &mut Link, store: &dyn FileStore, session: &mut Session) -> Result<(), SessionError> {
    let name = read_name(link).map_err(SessionError::Name)?;
    let filename = storage_name(&name);
    tracing::debug!("Loading file: {}", filename);
    session.filename = Some(filename.clone());

    // The client expects a response byte whether or not the file opened
    let opened = store.open_read(&filename);
    let code = match &opened {
        Ok(_) => ResponseCode::Ok,
        Err(_) => ResponseCode::FileOpenError,
    };
    session.response = Some(code);

    let settle = link.timing().load_response_settle;
    link.send_response(code, settle)
        .map_err(|source| SessionError::Response { code, source })?;

    let mut reader = opened.map_err(|source| SessionError::Rejected {
        code,
        filename: filename.clone(),
        source,
    })?;

    link.set_line(Role::ServerActive, LineState::Asserted)
        .map_err(|source| SessionError::Transfer { count: 0, source })?;
    session.start_transfer(link.now());

    let streamed = stream(link, &mut reader, &filename, session);

    session.finish_transfer(link.now());
    link.set_line(Role::ServerActive, LineState::Deasserted)
        .map_err(|source| SessionError::Transfer { count: session.bytes, source })?;
    streamed
}

fn stream(
    link: &mut Link,
    reader: &mut dyn Read,
    filename: &str,
    session: &mut Session,
) -> Result<(), SessionError> {
    for byte in reader.bytes() {
        let byte = byte.map_err(|source| SessionError::Read {
            filename: filename.to_string(),
            source,
        })?;
        link.send_byte(byte)
            .map_err(|source| SessionError::Transfer { count: session.bytes, source })?;
        session.bytes += 1;
    }
    Ok(())
}

// ============================================================================
// SAVE
// ============================================================================

/// Collect a file from the client and store it in one write
pub fn save(
    link: &mut Link,
    store: &dyn FileStore,
    session: &mut Session,
    mode: SaveMode,
) -> Result<(), SessionError> {
    let name = read_name(link).map_err(SessionError::Name)?;
    let filename = storage_name(&name);
    tracing::debug!("Saving to file: {} ({:?})", filename, mode);
    session.filename = Some(filename.clone());

    let opened = open_target(store, &filename, mode);
    let code = match &opened {
        Ok(_) => ResponseCode::Ok,
        Err((code, _)) => *code,
    };
    session.response = Some(code);

    let settle = link.timing().save_response_settle;
    link.send_response(code, settle)
        .map_err(|source| SessionError::Response { code, source })?;

    let mut file = opened.map_err(|(code, source)| SessionError::Rejected {
        code,
        filename: filename.clone(),
        source,
    })?;

    link.set_direction(Direction::Input)
        .and_then(|()| link.expect(Role::ClientActive, LineState::Asserted))
        .map_err(|source| SessionError::Transfer { count: 0, source })?;
    session.start_transfer(link.now());

    let mut buffer = Vec::new();
    let received = receive(link, &mut buffer);
    session.bytes = buffer.len();
    session.finish_transfer(link.now());

    // Whatever arrived is kept, even when the client stopped short
    file.write_all(&buffer)
        .and_then(|()| file.flush())
        .map_err(|source| SessionError::Write {
            filename: filename.clone(),
            source,
        })?;

    received.map_err(|source| SessionError::Transfer { count: buffer.len(), source })
}

fn open_target(
    store: &dyn FileStore,
    filename: &str,
    mode: SaveMode,
) -> Result<Box<dyn Write>, (ResponseCode, io::Error)> {
    if mode == SaveMode::Create && store.exists(filename) {
        tracing::debug!("File exists: {}", filename);
        return Err((
            ResponseCode::FileExistsError,
            io::Error::new(io::ErrorKind::AlreadyExists, "file exists"),
        ));
    }

    store.open_write(filename, mode).map_err(|e| {
        let code = if e.kind() == io::ErrorKind::AlreadyExists {
            ResponseCode::FileExistsError
        } else {
            ResponseCode::SaveOpenError
        };
        (code, e)
    })
}

/// Read pulsed bytes until the client drops client-active
fn receive(link: &mut Link, buffer: &mut Vec<u8>) -> Result<(), LinkError> {
    loop {
        match link.wait_while(Role::ClientReady, LineState::Asserted, Role::ClientActive)? {
            Wait::Matched => link.recv_data_byte(buffer)?,
            Wait::Withdrawn => return Ok(()),
            Wait::TimedOut => {
                return Err(LinkError::Timeout {
                    role: Role::ClientReady,
                    state: LineState::Asserted,
                });
            }
        }

        if !link.is_asserted(Role::ClientActive)? {
            return Ok(());
        }
    }
}
