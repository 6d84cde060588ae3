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

use std::iter;
use crate::bus::{LineState, Role};
use crate::error::SessionError;
use crate::gpio::Direction;
use crate::link::Link;
use crate::name::base_name;
use crate::protocol::{LIST_END, MAX_FILENAME_LEN, NAME_END, ResponseCode};
use crate::session::Session;
use crate::store::FileStore;

/// Send the base name of every stored file, each zero-terminated, then the
/// end-of-listing marker
///
/// The marker goes out even when the store cannot be read or a name fails
/// part way, so the client always sees the listing end.
pub fn list(link: &mut Link, store: &dyn FileStore, session: &mut Session) -> Result<(), SessionError> {
    tracing::debug!("List storage");
    let fail = |source| SessionError::Transfer { count: 0, source };
    link.set_line(Role::ServerReady, LineState::Deasserted).map_err(fail)?;
    link.set_line(Role::ServerActive, LineState::Asserted).map_err(fail)?;

    let entries = store.list();
    link.set_direction(Direction::Output).map_err(fail)?;
    session.start_transfer(link.now());

    let sent = match entries {
        Ok(names) => send_names(link, &names, session),
        Err(e) => {
            session.response = Some(ResponseCode::ListingFailed);
            Err(SessionError::List(e))
        }
    };

    let ended = link.send_byte(LIST_END);
    session.finish_transfer(link.now());
    link.set_line(Role::ServerActive, LineState::Deasserted)
        .map_err(|source| SessionError::Transfer { count: session.bytes, source })?;

    sent?;
    ended.map_err(|source| SessionError::Transfer { count: session.bytes, source })
}

fn send_names(link: &mut Link, names: &[String], session: &mut Session) -> Result<(), SessionError> {
    for file_name in names {
        let name = base_name(file_name);
        if name.is_empty() || !name.is_ascii() || name.len() >= MAX_FILENAME_LEN {
            tracing::trace!("Not listing {}", file_name);
            continue;
        }

        for byte in name.bytes().chain(iter::once(NAME_END)) {
            if let Err(source) = link.send_byte(byte) {
                session.response = Some(ResponseCode::NameTransferError);
                return Err(SessionError::ListEntry {
                    name: name.to_string(),
                    source,
                });
            }
            session.bytes += 1;
        }
    }
    Ok(())
}
