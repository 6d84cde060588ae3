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

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use crate::protocol::SaveMode;

// ============================================================================
// FileStore Trait
// ============================================================================

/// Backing storage for the files the client loads and saves
pub trait FileStore: Send {
    fn exists(&self, name: &str) -> bool;

    fn open_read(&self, name: &str) -> io::Result<Box<dyn Read>>;

    fn open_write(&self, name: &str, mode: SaveMode) -> io::Result<Box<dyn Write>>;

    /// Names of all stored files, sorted
    fn list(&self) -> io::Result<Vec<String>>;
}

// ============================================================================
// Directory Implementation
// ============================================================================

/// Files kept flat in a single host directory
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirStore { root: root.into() }
    }

    fn resolve(&self, name: &str) -> io::Result<PathBuf> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(['/', '\\']);
        if valid {
            Ok(self.root.join(name))
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid file name {:?}", name),
            ))
        }
    }
}

impl FileStore for DirStore {
    fn exists(&self, name: &str) -> bool {
        self.resolve(name).map(|path| path.exists()).unwrap_or(false)
    }

    fn open_read(&self, name: &str) -> io::Result<Box<dyn Read>> {
        let file = File::open(self.resolve(name)?)?;
        Ok(Box::new(io::BufReader::new(file)))
    }

    fn open_write(&self, name: &str, mode: SaveMode) -> io::Result<Box<dyn Write>> {
        let path = self.resolve(name)?;
        let mut options = OpenOptions::new();
        options.write(true);
        match mode {
            SaveMode::Create => options.create_new(true),
            SaveMode::Overwrite => options.create(true).truncate(true),
            SaveMode::Append => options.create(true).append(true),
        };
        Ok(Box::new(options.open(path)?))
    }

    fn list(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}
