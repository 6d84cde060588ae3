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

//! ZolaDOS wire constants
//!
//! Every value in this module is fixed by the client ROM. There is exactly one
//! supported revision; earlier opcode numberings are not understood.

use std::fmt;

/// Opcode: stream a file to the client
pub const OP_LOAD: u8 = 2;

/// Opcode: list stored files
pub const OP_LIST: u8 = 8;

/// Opcode: save, failing if the file already exists
pub const OP_SAVE_CREATE: u8 = 16;

/// Opcode: save, truncating any existing file
pub const OP_SAVE_OVERWRITE: u8 = 17;

/// Opcode: save, appending to any existing file
pub const OP_SAVE_APPEND: u8 = 18;

/// Marks the end of a directory listing
pub const LIST_END: u8 = 0xFF;

/// Terminates each name in a directory listing
pub const NAME_END: u8 = 0x00;

/// Names of this length or longer never cross the link
pub const MAX_FILENAME_LEN: usize = 15;

/// Appended to every client-supplied name before it reaches the store
pub const STORAGE_EXTENSION: &str = ".BIN";

// ============================================================================
// Operations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    Create,
    Overwrite,
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Load,
    Save(SaveMode),
    List,
}

/// Opcode to operation lookup table
const OPCODES: [(u8, Operation); 5] = [
    (OP_LOAD, Operation::Load),
    (OP_LIST, Operation::List),
    (OP_SAVE_CREATE, Operation::Save(SaveMode::Create)),
    (OP_SAVE_OVERWRITE, Operation::Save(SaveMode::Overwrite)),
    (OP_SAVE_APPEND, Operation::Save(SaveMode::Append)),
];

impl Operation {
    pub fn from_opcode(opcode: u8) -> Option<Operation> {
        OPCODES.iter().find(|(code, _)| *code == opcode).map(|(_, op)| *op)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Load => write!(f, "LOAD"),
            Operation::List => write!(f, "LS"),
            Operation::Save(SaveMode::Create) => write!(f, "SAVE (create)"),
            Operation::Save(SaveMode::Overwrite) => write!(f, "SAVE (overwrite)"),
            Operation::Save(SaveMode::Append) => write!(f, "SAVE (append)"),
        }
    }
}

// ============================================================================
// Response Codes
// ============================================================================

/// Outcome byte placed on the data bus after a LOAD or SAVE request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseCode {
    Ok = 0,
    /// LOAD target could not be opened
    FileOpenError = 11,
    ListingFailed = 12,
    NameTransferError = 13,
    /// SAVE (create) target already exists
    FileExistsError = 20,
    /// SAVE target could not be opened for writing
    SaveOpenError = 21,
}

impl ResponseCode {
    pub fn byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ResponseCode::Ok => "OK",
            ResponseCode::FileOpenError => "error opening file",
            ResponseCode::ListingFailed => "listing failed",
            ResponseCode::NameTransferError => "error sending filename",
            ResponseCode::FileExistsError => "file exists",
            ResponseCode::SaveOpenError => "error creating file",
        };
        write!(f, "{} ({})", text, self.byte())
    }
}
