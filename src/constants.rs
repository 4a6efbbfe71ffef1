//! Persistent tuning constants.
//!
//! Operational values that might need adjusting in the field - current
//! limits, grace periods, repeat counts, display intervals - live in a
//! packed block in persistent storage, guarded by a 16-bit rotating-XOR
//! checksum. On load the checksum is recomputed; a mismatch resets the
//! block to compiled defaults and re-persists it, so a corrupt or blank
//! store always yields a working station.
//!
//! The console's `C` command adjusts constants through the indexed
//! [`Constants::get`]/[`Constants::set_named`] interface; each field knows
//! whether it is byte- or word-sized so out-of-range writes are rejected.

use crate::errors::ErrorCode;
use crate::traits::NvStorage;

/// Number of named constants.
pub const CONSTANT_COUNT: usize = 12;

/// Serialized size: eight words, four bytes, one checksum word.
pub const CONSTANTS_BLOCK_LEN: usize = 22;

/// The runtime-tunable constants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Constants {
    /// Sample value at which power is cut immediately (spike), 0-1023.
    pub instant_current_limit: u16,
    /// Load average at which power is cut after the grace window.
    pub average_current_limit: u16,
    /// Milliseconds after power-up during which overloads are ignored.
    pub power_grace_period: u16,
    /// Statistics interval in milliseconds.
    pub periodic_interval: u16,
    /// Full display refresh interval in milliseconds.
    pub lcd_update_interval: u16,
    /// Pause between successive display line updates, milliseconds.
    pub line_refresh_interval: u16,
    /// How long a tripped district stays disabled before a retry.
    pub driver_reset_period: u16,
    /// How long a flipped phase is observed before it is trusted.
    pub driver_phase_period: u16,
    /// Smallest load delta accepted as a decoder acknowledgement.
    pub minimum_delta_amps: u8,
    /// Repeats for transient operations packets.
    pub transient_command_repeats: u8,
    /// Repeats for each service-mode reset filler.
    pub service_mode_reset_repeats: u8,
    /// Repeats for each service-mode command.
    pub service_mode_command_repeats: u8,
}

impl Default for Constants {
    fn default() -> Self {
        Self {
            instant_current_limit: 850,
            average_current_limit: 750,
            power_grace_period: 1000,
            periodic_interval: 1000,
            lcd_update_interval: 1000,
            line_refresh_interval: 200,
            driver_reset_period: 10_000,
            driver_phase_period: 100,
            minimum_delta_amps: 18,
            transient_command_repeats: 8,
            service_mode_reset_repeats: 20,
            service_mode_command_repeats: 10,
        }
    }
}

/// A constant's current value, sized as stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstantValue {
    /// Word-sized constant.
    Word(u16),
    /// Byte-sized constant.
    Byte(u8),
}

const NAMES: [&str; CONSTANT_COUNT] = [
    "instant_current_limit",
    "average_current_limit",
    "power_grace_period",
    "minimum_delta_amps",
    "periodic_interval",
    "lcd_update_interval",
    "line_refresh_interval",
    "driver_reset_period",
    "driver_phase_period",
    "transient_command_repeats",
    "service_mode_reset_repeats",
    "service_mode_command_repeats",
];

impl Constants {
    /// Pack the block little-endian, without the checksum.
    fn to_bytes(&self) -> [u8; CONSTANTS_BLOCK_LEN - 2] {
        let mut bytes = [0u8; CONSTANTS_BLOCK_LEN - 2];
        let words = [
            self.instant_current_limit,
            self.average_current_limit,
            self.power_grace_period,
            self.periodic_interval,
            self.lcd_update_interval,
            self.line_refresh_interval,
            self.driver_reset_period,
            self.driver_phase_period,
        ];
        for (i, w) in words.iter().enumerate() {
            bytes[i * 2..i * 2 + 2].copy_from_slice(&w.to_le_bytes());
        }
        bytes[16] = self.minimum_delta_amps;
        bytes[17] = self.transient_command_repeats;
        bytes[18] = self.service_mode_reset_repeats;
        bytes[19] = self.service_mode_command_repeats;
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let word = |i: usize| u16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]);
        Self {
            instant_current_limit: word(0),
            average_current_limit: word(1),
            power_grace_period: word(2),
            periodic_interval: word(3),
            lcd_update_interval: word(4),
            line_refresh_interval: word(5),
            driver_reset_period: word(6),
            driver_phase_period: word(7),
            minimum_delta_amps: bytes[16],
            transient_command_repeats: bytes[17],
            service_mode_reset_repeats: bytes[18],
            service_mode_command_repeats: bytes[19],
        }
    }

    /// The name and value of the constant at `index`, for iteration.
    pub fn get(&self, index: usize) -> Option<(&'static str, ConstantValue)> {
        let value = match index {
            0 => ConstantValue::Word(self.instant_current_limit),
            1 => ConstantValue::Word(self.average_current_limit),
            2 => ConstantValue::Word(self.power_grace_period),
            3 => ConstantValue::Byte(self.minimum_delta_amps),
            4 => ConstantValue::Word(self.periodic_interval),
            5 => ConstantValue::Word(self.lcd_update_interval),
            6 => ConstantValue::Word(self.line_refresh_interval),
            7 => ConstantValue::Word(self.driver_reset_period),
            8 => ConstantValue::Word(self.driver_phase_period),
            9 => ConstantValue::Byte(self.transient_command_repeats),
            10 => ConstantValue::Byte(self.service_mode_reset_repeats),
            11 => ConstantValue::Byte(self.service_mode_command_repeats),
            _ => return None,
        };
        Some((NAMES[index], value))
    }

    /// Set a constant by name.
    ///
    /// Byte-sized constants reject values above 255 with
    /// [`InvalidByteValue`](ErrorCode::InvalidByteValue); unknown names fail
    /// with [`InvalidArgumentCount`](ErrorCode::InvalidArgumentCount).
    pub fn set_named(&mut self, name: &str, value: u16) -> Result<(), ErrorCode> {
        let index = NAMES
            .iter()
            .position(|n| *n == name)
            .ok_or(ErrorCode::InvalidArgumentCount)?;
        let byte_sized = matches!(index, 3 | 9 | 10 | 11);
        if byte_sized && value > 255 {
            return Err(ErrorCode::InvalidByteValue);
        }
        match index {
            0 => self.instant_current_limit = value,
            1 => self.average_current_limit = value,
            2 => self.power_grace_period = value,
            3 => self.minimum_delta_amps = value as u8,
            4 => self.periodic_interval = value,
            5 => self.lcd_update_interval = value,
            6 => self.line_refresh_interval = value,
            7 => self.driver_reset_period = value,
            8 => self.driver_phase_period = value,
            9 => self.transient_command_repeats = value as u8,
            10 => self.service_mode_reset_repeats = value as u8,
            11 => self.service_mode_command_repeats = value as u8,
            _ => return Err(ErrorCode::InvalidArgumentCount),
        }
        Ok(())
    }
}

/// 16-bit rotating XOR over the packed block: rotate left three, fold in
/// the next byte.
fn checksum(bytes: &[u8]) -> u16 {
    let mut sum = 0xFFFFu16;
    for &b in bytes {
        sum = sum.rotate_left(3) ^ b as u16;
    }
    sum
}

/// Persist the constants with a fresh checksum at offset zero.
pub fn save<S: NvStorage>(constants: &Constants, storage: &mut S) {
    let payload = constants.to_bytes();
    let sum = checksum(&payload);
    let mut block = [0u8; CONSTANTS_BLOCK_LEN];
    block[..payload.len()].copy_from_slice(&payload);
    block[payload.len()..].copy_from_slice(&sum.to_le_bytes());
    storage.write(0, &block);
}

/// Load the constants, resetting to defaults on checksum mismatch.
///
/// Returns the constants and whether a reset (and re-persist) happened.
pub fn load<S: NvStorage>(storage: &mut S) -> (Constants, bool) {
    let mut block = [0u8; CONSTANTS_BLOCK_LEN];
    storage.read(0, &mut block);
    let payload = &block[..CONSTANTS_BLOCK_LEN - 2];
    let stored = u16::from_le_bytes([block[CONSTANTS_BLOCK_LEN - 2], block[CONSTANTS_BLOCK_LEN - 1]]);

    if checksum(payload) == stored {
        (Constants::from_bytes(payload), false)
    } else {
        log::warn!("constants checksum mismatch, resetting to defaults");
        let defaults = Constants::default();
        save(&defaults, storage);
        (defaults, true)
    }
}

// ============================================================================
// Tests
// ============================================================================
