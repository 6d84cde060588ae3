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

//! Server configuration with the defaults the client ROM was tuned against.

use std::path::PathBuf;
use std::time::Duration;
use crate::gpio::Polarity;

pub const DEFAULT_STORAGE_DIR: &str = "/home/pi/zd_files";

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the stored `.BIN` files
    pub storage_dir: PathBuf,

    pub timing: Timing,

    pub pins: PinMap,

    /// Added to every pin number before it reaches the GPIO driver
    pub gpio_base: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            timing: Timing::default(),
            pins: PinMap::default(),
            gpio_base: 0,
        }
    }
}

// ============================================================================
// Timing
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Longest the server waits for any client line transition
    pub timeout: Duration,

    /// Width of the server-ready pulse
    pub strobe: Duration,

    /// Pause after delivering a LOAD response code
    pub load_response_settle: Duration,

    /// Pause after delivering a SAVE response code
    pub save_response_settle: Duration,

    /// Pause after each filename character before sampling client-active
    pub name_char_settle: Duration,

    /// Pause before accepting the next request
    pub session_settle: Duration,

    /// Sleep between samples while idle or offline
    pub idle_poll: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            timeout: Duration::from_millis(100),
            strobe: Duration::from_micros(200),
            load_response_settle: Duration::from_millis(1),
            save_response_settle: Duration::from_micros(100),
            name_char_settle: Duration::from_micros(500),
            session_settle: Duration::from_millis(100),
            idle_poll: Duration::from_micros(50),
        }
    }
}

// ============================================================================
// Pin Map
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinePin {
    pub pin: u32,
    pub polarity: Polarity,
}

impl LinePin {
    const fn active_low(pin: u32) -> Self {
        LinePin { pin, polarity: Polarity::ActiveLow }
    }

    const fn active_high(pin: u32) -> Self {
        LinePin { pin, polarity: Polarity::ActiveHigh }
    }
}

/// Wiring between the companion computer's header and the client's VIA ports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinMap {
    pub client_active: LinePin,
    pub client_ready: LinePin,
    pub client_online: LinePin,
    pub server_ready: LinePin,
    pub server_active: LinePin,

    /// D0..D7, least significant bit first
    pub data: [u32; 8],

    /// Interrupt request to the client, held released
    pub irq: u32,

    /// Interrupt select, held low
    pub intsel: u32,

    pub led: u32,
}

impl Default for PinMap {
    fn default() -> Self {
        // BCM numbering
        PinMap {
            client_active: LinePin::active_low(5),
            client_ready: LinePin::active_low(6),
            client_online: LinePin::active_high(12),
            server_ready: LinePin::active_low(19),
            server_active: LinePin::active_low(16),
            data: [4, 17, 18, 27, 22, 23, 24, 25],
            irq: 7,
            intsel: 20,
            led: 8,
        }
    }
}
