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

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

/// Electrical level of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Which electrical level means "asserted" for a control line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    ActiveLow,
    ActiveHigh,
}

impl Polarity {
    pub fn level(self, asserted: bool) -> Level {
        match (self, asserted) {
            (Polarity::ActiveHigh, true) | (Polarity::ActiveLow, false) => Level::High,
            (Polarity::ActiveHigh, false) | (Polarity::ActiveLow, true) => Level::Low,
        }
    }

    pub fn is_asserted(self, level: Level) -> bool {
        self.level(true) == level
    }
}

// ============================================================================
// Gpio Trait
// ============================================================================

/// Raw access to numbered digital pins
pub trait Gpio: Send {
    fn set_direction(&mut self, pin: u32, direction: Direction) -> io::Result<()>;

    /// Make `pin` an output already driving `level`, with no glitch through
    /// the driver's default level
    fn set_output(&mut self, pin: u32, level: Level) -> io::Result<()>;

    fn read(&mut self, pin: u32) -> io::Result<Level>;

    fn write(&mut self, pin: u32, level: Level) -> io::Result<()>;
}

// ============================================================================
// Linux sysfs Implementation
// ============================================================================

const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Pins driven through `/sys/class/gpio`
///
/// `base` is added to every pin number, for kernels that number the header
/// pins from a non-zero gpiochip base.
pub struct SysfsGpio {
    root: PathBuf,
    base: u32,
    values: HashMap<u32, File>,
}

impl SysfsGpio {
    pub fn new(base: u32) -> Self {
        SysfsGpio::with_root(SYSFS_GPIO_ROOT, base)
    }

    pub fn with_root(root: impl Into<PathBuf>, base: u32) -> Self {
        SysfsGpio {
            root: root.into(),
            base,
            values: HashMap::new(),
        }
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{}", pin + self.base))
    }

    fn value_file(&mut self, pin: u32) -> io::Result<&File> {
        if !self.values.contains_key(&pin) {
            let file = self.export(pin)?;
            self.values.insert(pin, file);
        }
        self.values
            .get(&pin)
            .ok_or_else(|| io::Error::other(format!("gpio{} not exported", pin + self.base)))
    }

    fn export(&self, pin: u32) -> io::Result<File> {
        let dir = self.pin_dir(pin);
        if !dir.exists() {
            tracing::trace!("Exporting gpio{}", pin + self.base);
            fs::write(self.root.join("export"), (pin + self.base).to_string())?;
        }

        // udev may take a moment to hand the new files over to the gpio group
        let mut attempts = 0;
        loop {
            match OpenOptions::new().read(true).write(true).open(dir.join("value")) {
                Ok(file) => return Ok(file),
                Err(e)
                    if attempts < 20
                        && matches!(
                            e.kind(),
                            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
                        ) =>
                {
                    attempts += 1;
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Gpio for SysfsGpio {
    fn set_direction(&mut self, pin: u32, direction: Direction) -> io::Result<()> {
        self.value_file(pin)?;
        let text = match direction {
            Direction::Input => "in",
            Direction::Output => "out",
        };
        fs::write(self.pin_dir(pin).join("direction"), text)
    }

    fn set_output(&mut self, pin: u32, level: Level) -> io::Result<()> {
        self.value_file(pin)?;
        // "high"/"low" switch direction and level in one step; "out" starts low
        let text = match level {
            Level::Low => "low",
            Level::High => "high",
        };
        fs::write(self.pin_dir(pin).join("direction"), text)
    }

    fn read(&mut self, pin: u32) -> io::Result<Level> {
        let mut buf = [0u8; 1];
        self.value_file(pin)?.read_at(&mut buf, 0)?;
        match buf[0] {
            b'0' => Ok(Level::Low),
            b'1' => Ok(Level::High),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected gpio value 0x{:02X}", other),
            )),
        }
    }

    fn write(&mut self, pin: u32, level: Level) -> io::Result<()> {
        let text: &[u8] = match level {
            Level::Low => b"0",
            Level::High => b"1",
        };
        self.value_file(pin)?.write_at(text, 0)?;
        Ok(())
    }
}

// ============================================================================
// In-memory pins for testing
// ============================================================================

/// Pins held in memory, driving low when switched to a plain output the way
/// the sysfs driver does
#[cfg(test)]
#[derive(Default)]
pub struct FakeGpio {
    pub levels: HashMap<u32, Level>,
    pub directions: HashMap<u32, Direction>,
    /// Every level each pin has driven, in order
    pub driven: Vec<(u32, Level)>,
}

#[cfg(test)]
impl FakeGpio {
    fn drive(&mut self, pin: u32, level: Level) {
        self.levels.insert(pin, level);
        self.driven.push((pin, level));
    }
}

#[cfg(test)]
impl Gpio for FakeGpio {
    fn set_direction(&mut self, pin: u32, direction: Direction) -> io::Result<()> {
        let was = self.directions.insert(pin, direction);
        if direction == Direction::Output && was != Some(Direction::Output) {
            self.drive(pin, Level::Low);
        }
        Ok(())
    }

    fn set_output(&mut self, pin: u32, level: Level) -> io::Result<()> {
        self.directions.insert(pin, Direction::Output);
        self.drive(pin, level);
        Ok(())
    }

    fn read(&mut self, pin: u32) -> io::Result<Level> {
        Ok(self.levels.get(&pin).copied().unwrap_or(Level::Low))
    }

    fn write(&mut self, pin: u32, level: Level) -> io::Result<()> {
        if self.directions.get(&pin) != Some(&Direction::Output) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("pin {} written while not an output", pin),
            ));
        }
        self.drive(pin, level);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_sysfs(pins: &[u32]) -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        for pin in pins {
            let dir = root.path().join(format!("gpio{}", pin));
            fs::create_dir(&dir).unwrap();
            fs::write(dir.join("value"), b"0\n").unwrap();
            fs::write(dir.join("direction"), b"in\n").unwrap();
        }
        root
    }

    #[test]
    fn test_polarity() {
        assert_eq!(Polarity::ActiveLow.level(true), Level::Low);
        assert_eq!(Polarity::ActiveLow.level(false), Level::High);
        assert_eq!(Polarity::ActiveHigh.level(true), Level::High);
        assert_eq!(Polarity::ActiveHigh.level(false), Level::Low);

        assert!(Polarity::ActiveLow.is_asserted(Level::Low));
        assert!(!Polarity::ActiveLow.is_asserted(Level::High));
        assert!(Polarity::ActiveHigh.is_asserted(Level::High));
    }

    #[test]
    fn test_sysfs_read_write() {
        let root = fake_sysfs(&[5]);
        let mut gpio = SysfsGpio::with_root(root.path(), 0);

        assert_eq!(gpio.read(5).unwrap(), Level::Low);
        gpio.set_direction(5, Direction::Output).unwrap();
        gpio.write(5, Level::High).unwrap();
        assert_eq!(gpio.read(5).unwrap(), Level::High);

        let direction = fs::read_to_string(root.path().join("gpio5/direction")).unwrap();
        assert_eq!(direction, "out");
    }

    #[test]
    fn test_sysfs_set_output_sets_level_with_direction() {
        let root = fake_sysfs(&[19, 12]);
        let mut gpio = SysfsGpio::with_root(root.path(), 0);

        gpio.set_output(19, Level::High).unwrap();
        gpio.set_output(12, Level::Low).unwrap();

        assert_eq!(fs::read_to_string(root.path().join("gpio19/direction")).unwrap(), "high");
        assert_eq!(fs::read_to_string(root.path().join("gpio12/direction")).unwrap(), "low");
    }

    #[test]
    fn test_sysfs_chip_base() {
        let root = fake_sysfs(&[517]);
        let mut gpio = SysfsGpio::with_root(root.path(), 512);

        gpio.set_direction(5, Direction::Output).unwrap();
        gpio.write(5, Level::High).unwrap();

        let value = fs::read(root.path().join("gpio517/value")).unwrap();
        assert_eq!(value[0], b'1');
    }

    #[test]
    fn test_sysfs_garbage_value() {
        let root = fake_sysfs(&[6]);
        fs::write(root.path().join("gpio6/value"), b"x").unwrap();
        let mut gpio = SysfsGpio::with_root(root.path(), 0);

        let err = gpio.read(6).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
