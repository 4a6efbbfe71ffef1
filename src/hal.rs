//! Mock hardware for desktop testing.
//!
//! Each mock records what the core did to it so tests can assert on pin
//! history, persisted bytes, and rendered display content without any
//! hardware attached. The real board supplies its own implementations of
//! the same traits.

use crate::traits::{AdcConverter, BridgeDriver, NvStorage, PanelDisplay};
use heapless::Vec;

/// Maximum districts the mock bridge tracks.
pub const MOCK_DISTRICTS: usize = 8;

/// Recorded H-bridge line state per district.
#[derive(Clone, Copy, Debug, Default)]
pub struct MockLines {
    /// Last state driven onto the enable line.
    pub enable: bool,
    /// Last state driven onto the brake line.
    pub brake: bool,
    /// Last state driven onto the direction line.
    pub direction: bool,
}

/// Mock H-bridge power stage.
///
/// Tracks the latest line states and counts direction toggles so waveform
/// tests can verify that the phase actually reaches the track.
#[derive(Default)]
pub struct MockBridge {
    lines: [MockLines; MOCK_DISTRICTS],
    direction_writes: u32,
}

impl MockBridge {
    /// Create a mock with all lines released.
    pub fn new() -> Self {
        Self::default()
    }

    /// Line state for a district.
    pub fn lines(&self, district: u8) -> MockLines {
        self.lines[district as usize]
    }

    /// How many times any direction line was driven.
    pub fn direction_writes(&self) -> u32 {
        self.direction_writes
    }
}

impl BridgeDriver for MockBridge {
    fn set_enable(&mut self, district: u8, on: bool) {
        self.lines[district as usize].enable = on;
    }

    fn set_brake(&mut self, district: u8, on: bool) {
        self.lines[district as usize].brake = on;
    }

    fn set_direction(&mut self, district: u8, high: bool) {
        self.lines[district as usize].direction = high;
        self.direction_writes = self.direction_writes.wrapping_add(1);
    }
}

/// Mock analogue converter recording requested channels.
///
/// Tests drive completions themselves by calling the station's ADC
/// interrupt entry point with a scripted reading.
#[derive(Default)]
pub struct MockAdc {
    started: Vec<u8, 64>,
}

impl MockAdc {
    /// Create an idle mock converter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel of the most recently started conversion.
    pub fn last_channel(&self) -> Option<u8> {
        self.started.last().copied()
    }

    /// Every channel started, in order (bounded history).
    pub fn started(&self) -> &[u8] {
        &self.started
    }
}

impl AdcConverter for MockAdc {
    fn start(&mut self, channel: u8) {
        if self.started.is_full() {
            self.started.remove(0);
        }
        let _ = self.started.push(channel);
    }
}

/// Byte capacity of the mock persistent store.
pub const MOCK_STORAGE_SIZE: usize = 64;

/// Mock EEPROM.
pub struct MockStorage {
    bytes: [u8; MOCK_STORAGE_SIZE],
}

impl MockStorage {
    /// Create a store filled with the erased pattern (0xFF).
    pub fn new() -> Self {
        Self {
            bytes: [0xFF; MOCK_STORAGE_SIZE],
        }
    }

    /// Corrupt one byte, for checksum tests.
    pub fn corrupt(&mut self, offset: usize) {
        self.bytes[offset] ^= 0xA5;
    }

    /// Raw contents.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Default for MockStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl NvStorage for MockStorage {
    fn read(&self, offset: usize, buf: &mut [u8]) {
        buf.copy_from_slice(&self.bytes[offset..offset + buf.len()]);
    }

    fn write(&mut self, offset: usize, data: &[u8]) {
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }
}

/// Rows on the mock panel.
pub const MOCK_PANEL_ROWS: usize = 4;
/// Columns on the mock panel.
pub const MOCK_PANEL_COLS: usize = 20;

/// Mock 20x4 character panel.
pub struct MockPanel {
    grid: [[u8; MOCK_PANEL_COLS]; MOCK_PANEL_ROWS],
}

impl MockPanel {
    /// Create a blank panel.
    pub fn new() -> Self {
        Self {
            grid: [[b' '; MOCK_PANEL_COLS]; MOCK_PANEL_ROWS],
        }
    }

    /// One row as a string slice, for assertions.
    pub fn row(&self, row: usize) -> &str {
        core::str::from_utf8(&self.grid[row]).unwrap_or("")
    }
}

impl Default for MockPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl PanelDisplay for MockPanel {
    fn write_at(&mut self, row: u8, col: u8, text: &[u8]) {
        let row = row as usize;
        let col = col as usize;
        if row >= MOCK_PANEL_ROWS {
            return;
        }
        for (i, &b) in text.iter().enumerate() {
            if col + i < MOCK_PANEL_COLS {
                self.grid[row][col + i] = b;
            }
        }
    }

    fn clear(&mut self) {
        self.grid = [[b' '; MOCK_PANEL_COLS]; MOCK_PANEL_ROWS];
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_records_lines() {
        let mut bridge = MockBridge::new();
        bridge.set_enable(1, true);
        bridge.set_brake(1, false);
        bridge.set_direction(1, true);

        let lines = bridge.lines(1);
        assert!(lines.enable);
        assert!(!lines.brake);
        assert!(lines.direction);
        assert_eq!(bridge.direction_writes(), 1);
    }

    #[test]
    fn adc_records_start_order() {
        let mut adc = MockAdc::new();
        adc.start(0);
        adc.start(1);
        adc.start(0);
        assert_eq!(adc.started(), &[0, 1, 0]);
        assert_eq!(adc.last_channel(), Some(0));
    }

    #[test]
    fn storage_round_trips() {
        let mut store = MockStorage::new();
        store.write(4, &[1, 2, 3]);
        let mut buf = [0u8; 3];
        store.read(4, &mut buf);
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn panel_clips_to_grid() {
        let mut panel = MockPanel::new();
        panel.write_at(0, 17, b"ABCDE");
        assert_eq!(&panel.row(0)[17..], "ABC");
    }
}
