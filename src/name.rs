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

use crate::bus::{LineState, Role};
use crate::error::LinkError;
use crate::link::Link;
use crate::protocol::{MAX_FILENAME_LEN, STORAGE_EXTENSION};

/// Only uppercase letters survive the trip from the client
pub fn is_name_char(code: u8) -> bool {
    code.is_ascii_uppercase()
}

/// Read a filename the client clocks over one character at a time
///
/// The name starts once client-active is asserted and ends when the client
/// drops it after a character. Every character is acknowledged, even the ones
/// that are filtered out or fall beyond the maximum length.
pub fn read_name(link: &mut Link) -> Result<String, LinkError> {
    link.expect(Role::ClientActive, LineState::Asserted)?;

    let settle = link.timing().name_char_settle;
    let mut name = String::new();
    let mut dropped = 0usize;

    loop {
        let code = link.recv_byte()?;
        if is_name_char(code) {
            if name.len() < MAX_FILENAME_LEN - 1 {
                name.push(code as char);
            } else {
                dropped += 1;
            }
        }

        link.pause(settle);
        if !link.is_asserted(Role::ClientActive)? {
            break;
        }
    }

    let name = name.trim();
    if dropped > 0 {
        tracing::warn!("Filename {} truncated, {} characters dropped", name, dropped);
    }
    Ok(name.to_string())
}

/// Name of the stored file backing a client name
pub fn storage_name(name: &str) -> String {
    format!("{}{}", name, STORAGE_EXTENSION)
}

/// Client-visible part of a stored file name: everything before the first dot
pub fn base_name(file_name: &str) -> &str {
    file_name.split('.').next().unwrap_or(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ClientStep;
    use crate::link::test_link;

    fn name_steps(codes: &[u8]) -> Vec<ClientStep> {
        let mut steps = vec![ClientStep::Active(true)];
        steps.extend(codes.iter().copied().map(ClientStep::Write));
        steps.push(ClientStep::Active(false));
        steps
    }

    #[test]
    fn test_read_name() {
        let mut link = test_link(name_steps(b"GAME"), vec![]);
        assert_eq!(read_name(&mut link).unwrap(), "GAME");
    }

    #[test]
    fn test_read_name_drops_non_letters() {
        let mut link = test_link(name_steps(b" G4a M\x00E!\xFF"), vec![]);
        assert_eq!(read_name(&mut link).unwrap(), "GME");
    }

    #[test]
    fn test_read_name_single_character() {
        let mut link = test_link(name_steps(b"Z"), vec![]);
        assert_eq!(read_name(&mut link).unwrap(), "Z");
    }

    #[test]
    fn test_read_name_truncates() {
        let mut link = test_link(name_steps(b"ABCDEFGHIJKLMNOPQRST"), vec![]);
        let name = read_name(&mut link).unwrap();
        assert_eq!(name, "ABCDEFGHIJKLMN");
        assert!(name.len() < MAX_FILENAME_LEN);
    }

    #[test]
    fn test_read_name_setup_timeout() {
        let mut link = test_link(vec![], vec![]);
        match read_name(&mut link) {
            Err(LinkError::Timeout { role, .. }) => assert_eq!(role, Role::ClientActive),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_read_name_character_timeout() {
        // Client raises client-active but never clocks a character
        let mut link = test_link(vec![ClientStep::Active(true)], vec![]);
        match read_name(&mut link) {
            Err(LinkError::Timeout { role, state }) => {
                assert_eq!(role, Role::ClientReady);
                assert_eq!(state, LineState::Asserted);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_storage_and_base_names() {
        assert_eq!(storage_name("GAME"), "GAME.BIN");
        assert_eq!(base_name("GAME.BIN"), "GAME");
        assert_eq!(base_name("ARCHIVE.TAR.GZ"), "ARCHIVE");
        assert_eq!(base_name("README"), "README");
        assert_eq!(base_name(".hidden"), "");
    }
}
