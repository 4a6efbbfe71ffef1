//! The 20x4 status display model.
//!
//! The panel is split into three fixed columns separated by `|` dividers:
//!
//! ```text
//!   0....0....1....1....2
//!   0    5    0    5    0
//!  +--------------------+
//!  |F 8P0|A   12|3000>14|   status / districts / buffer scan
//!  |T 310|B_____|A 42+  |
//!  |M 256|      |       |
//!  |12:34|      |       |
//!  +--------------------+
//! ```
//!
//! - **Status** (5 wide): free buffers and zone, packets per second, free
//!   pool bytes, uptime with a spinner in the separator.
//! - **Districts** (6 wide): one district per row - its letter, then the
//!   load average when running or a state symbol (`_` off, `!` shorted,
//!   `?` inverted, `*` paused).
//! - **Buffers** (7 wide): a rolling scan of the active transmission ring,
//!   one entry per refresh tick.
//!
//! The refresh handler draws exactly one line per dispatch and yields, so
//! a slow I2C panel never starves the scheduler.

use crate::buffers::ScanEntry;
use crate::districts::{Districts, PowerState};
use crate::packets::{Action, Direction};
use crate::traits::{BridgeDriver, PanelDisplay};

/// Display rows.
pub const DISPLAY_ROWS: u8 = 4;
/// Display columns.
pub const DISPLAY_COLS: u8 = 20;

const STATUS_COL: u8 = 0;
const STATUS_WIDTH: usize = 5;
const DISTRICT_COL: u8 = 6;
const DISTRICT_WIDTH: usize = 6;
const BUFFER_COL: u8 = 13;
const BUFFER_WIDTH: usize = 7;

const HASH: u8 = b'#';

/// Counters and gauges the status column renders.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatusStats {
    /// Free transmission buffers.
    pub free_buffers: u8,
    /// Zone indicator digit.
    pub zone: u8,
    /// Packets transmitted per second.
    pub packets_per_second: u16,
    /// Reclaimable pool bytes across cache-bearing components.
    pub pool_bytes: usize,
    /// Uptime in whole seconds.
    pub uptime_seconds: u32,
}

/// Right-justify `value` into `buf`, space padded. Returns `false` when the
/// number does not fit.
fn backfill(buf: &mut [u8], value: u32, zero_pad: bool) -> bool {
    let pad = if zero_pad { b'0' } else { b' ' };
    for b in buf.iter_mut() {
        *b = pad;
    }
    let mut value = value;
    let mut index = buf.len();
    loop {
        if index == 0 {
            return false;
        }
        index -= 1;
        buf[index] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            return true;
        }
    }
}

/// The display refresh engine.
pub struct Hci<P: PanelDisplay> {
    panel: P,
    line: u8,
    spinner: bool,
}

impl<P: PanelDisplay> Hci<P> {
    /// Create the display model around a panel.
    pub fn new(panel: P) -> Self {
        Self {
            panel,
            line: 0,
            spinner: false,
        }
    }

    /// Clear the panel and draw the static column dividers.
    pub fn init(&mut self) {
        self.panel.clear();
        for row in 0..DISPLAY_ROWS {
            self.panel.write_at(row, DISTRICT_COL - 1, b"|");
            self.panel.write_at(row, BUFFER_COL - 1, b"|");
        }
    }

    /// The row the next refresh will draw.
    pub fn current_line(&self) -> u8 {
        self.line
    }

    /// Borrow the panel, e.g. for test assertions.
    pub fn panel(&self) -> &P {
        &self.panel
    }

    /// Draw one line and advance to the next.
    ///
    /// `scan` is the ring entry for this row (the station restarts the ring
    /// scan when the refresh wraps to row zero).
    pub fn refresh_line<B: BridgeDriver>(
        &mut self,
        districts: &Districts<B>,
        scan: Option<ScanEntry>,
        stats: &StatusStats,
    ) {
        let line = self.line;
        self.render_status(line, stats);
        self.render_district(line, districts);
        self.render_buffer(line, scan);
        self.line = (self.line + 1) % DISPLAY_ROWS;
    }

    fn render_status(&mut self, line: u8, stats: &StatusStats) {
        let mut cell = [b' '; STATUS_WIDTH];
        match line {
            0 => {
                // F##P# - free buffers and the powered-zone digit.
                self.spinner = !self.spinner;
                cell[0] = b'F';
                if !backfill(&mut cell[1..3], stats.free_buffers as u32, false) {
                    cell[1] = HASH;
                    cell[2] = HASH;
                }
                cell[3] = b'P';
                cell[4] = b'0' + stats.zone;
            }
            1 => {
                // T#### - packets per second.
                cell[0] = b'T';
                if !backfill(&mut cell[1..5], stats.packets_per_second as u32, false) {
                    for b in &mut cell[1..5] {
                        *b = HASH;
                    }
                }
            }
            2 => {
                // M#### - free pool bytes, in K above four digits.
                cell[0] = b'M';
                if stats.pool_bytes < 10_000 {
                    let _ = backfill(&mut cell[1..5], stats.pool_bytes as u32, false);
                } else {
                    let _ = backfill(&mut cell[1..4], (stats.pool_bytes >> 10) as u32, false);
                    cell[4] = b'K';
                }
            }
            _ => {
                // Uptime, minutes and seconds until the first hour.
                let seconds = stats.uptime_seconds;
                let minutes = seconds / 60;
                let hours = minutes / 60;
                if hours > 0 {
                    let _ = backfill(&mut cell[0..2], hours, false);
                    cell[2] = if self.spinner { b'h' } else { b':' };
                    let _ = backfill(&mut cell[3..5], minutes % 60, true);
                } else {
                    let _ = backfill(&mut cell[0..2], minutes, false);
                    cell[2] = if self.spinner { b'm' } else { b':' };
                    let _ = backfill(&mut cell[3..5], seconds % 60, true);
                }
            }
        }
        self.panel.write_at(line, STATUS_COL, &cell);
    }

    fn render_district<B: BridgeDriver>(&mut self, line: u8, districts: &Districts<B>) {
        let mut cell = [b' '; DISTRICT_WIDTH];
        if line < districts.count() {
            cell[0] = b'A' + line;
            let state = districts.state(line);
            if state == PowerState::On {
                if !backfill(&mut cell[1..], districts.load_average(line) as u32, false) {
                    for b in &mut cell[1..] {
                        *b = HASH;
                    }
                }
            } else {
                let symbol = match state {
                    PowerState::Off => b'_',
                    PowerState::Shorted => b'!',
                    PowerState::Inverted => b'?',
                    PowerState::Paused => b'*',
                    PowerState::On => b' ',
                };
                for b in &mut cell[1..] {
                    *b = symbol;
                }
            }
        }
        self.panel.write_at(line, DISTRICT_COL, &cell);
    }

    fn render_buffer(&mut self, line: u8, scan: Option<ScanEntry>) {
        let mut cell = [b' '; BUFFER_WIDTH];
        if let Some(entry) = scan {
            match entry.action {
                Action::Speed { speed, direction } => {
                    if !backfill(&mut cell[0..4], entry.address as u32, false) {
                        for b in &mut cell[0..4] {
                            *b = HASH;
                        }
                    }
                    cell[4] = match direction {
                        Direction::Forward => b'>',
                        Direction::Reverse => b'<',
                    };
                    let _ = backfill(&mut cell[5..7], speed as u32, false);
                }
                Action::Function { function, on } => {
                    if !backfill(&mut cell[0..4], entry.address as u32, false) {
                        for b in &mut cell[0..4] {
                            *b = HASH;
                        }
                    }
                    cell[4] = if on { b'+' } else { b'-' };
                    let _ = backfill(&mut cell[5..7], function as u32, false);
                }
                Action::Accessory { on } => {
                    cell[0] = b'A';
                    let _ = backfill(&mut cell[1..4], entry.address as u32, false);
                    cell[4] = if on { b'+' } else { b'-' };
                }
                Action::Service => {
                    cell[0..4].copy_from_slice(b"PROG");
                }
                Action::ServiceReset => {}
            }
        }
        self.panel.write_at(line, BUFFER_COL, &cell);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::districts::Zone;
    use crate::hal::{MockBridge, MockPanel};
    use crate::signal::Signals;

    fn districts() -> Districts<MockBridge> {
        let mut signals = Signals::new();
        let confirm = signals.allocate().unwrap();
        let s0 = signals.allocate().unwrap();
        let s1 = signals.allocate().unwrap();
        let mut d = Districts::new(MockBridge::new(), confirm);
        d.add(Zone::Main, 0, s0).unwrap();
        d.add(Zone::Programming, 1, s1).unwrap();
        d
    }

    #[test]
    fn backfill_right_justifies() {
        let mut buf = [0u8; 4];
        assert!(backfill(&mut buf, 42, false));
        assert_eq!(&buf, b"  42");

        assert!(backfill(&mut buf, 7, true));
        assert_eq!(&buf, b"0007");

        assert!(!backfill(&mut buf, 123_456, false));
    }

    #[test]
    fn dividers_are_drawn_at_init() {
        let mut hci = Hci::new(MockPanel::new());
        hci.init();
        for row in 0..DISPLAY_ROWS as usize {
            let line = hci.panel().row(row);
            assert_eq!(&line[5..6], "|");
            assert_eq!(&line[12..13], "|");
        }
    }

    #[test]
    fn status_line_zero_shows_buffers_and_zone() {
        let mut hci = Hci::new(MockPanel::new());
        hci.init();
        let d = districts();
        let stats = StatusStats {
            free_buffers: 8,
            zone: 1,
            ..Default::default()
        };
        hci.refresh_line(&d, None, &stats);
        assert_eq!(&hci.panel().row(0)[..5], "F 8P1");
    }

    #[test]
    fn district_cells_show_symbol_or_load() {
        let mut hci = Hci::new(MockPanel::new());
        hci.init();
        let d = districts();
        let stats = StatusStats::default();

        hci.refresh_line(&d, None, &stats); // row 0: district A, off
        hci.refresh_line(&d, None, &stats); // row 1: district B, off
        assert_eq!(&hci.panel().row(0)[6..12], "A_____");
        assert_eq!(&hci.panel().row(1)[6..12], "B_____");

        // Rows past the district count stay blank.
        hci.refresh_line(&d, None, &stats);
        assert_eq!(&hci.panel().row(2)[6..12], "      ");
    }

    #[test]
    fn running_district_shows_load_average() {
        let mut hci = Hci::new(MockPanel::new());
        hci.init();
        let mut d = districts();
        d.power_on(0, 0).unwrap();

        let stats = StatusStats::default();
        hci.refresh_line(&d, None, &stats);
        assert_eq!(&hci.panel().row(0)[6..12], "A    0");
    }

    #[test]
    fn buffer_scan_renders_speed_hold() {
        let mut hci = Hci::new(MockPanel::new());
        hci.init();
        let d = districts();
        let entry = ScanEntry {
            address: 3000,
            action: Action::Speed {
                speed: 14,
                direction: Direction::Forward,
            },
            priority: crate::buffers::Priority::Mobile,
            repeats: 8,
        };
        hci.refresh_line(&d, Some(entry), &StatusStats::default());
        assert_eq!(&hci.panel().row(0)[13..20], "3000>14");
    }

    #[test]
    fn buffer_scan_renders_accessory() {
        let mut hci = Hci::new(MockPanel::new());
        hci.init();
        let d = districts();
        let entry = ScanEntry {
            address: 42,
            action: Action::Accessory { on: true },
            priority: crate::buffers::Priority::Accessory,
            repeats: 2,
        };
        hci.refresh_line(&d, Some(entry), &StatusStats::default());
        assert_eq!(&hci.panel().row(0)[13..20], "A 42+  ");
    }

    #[test]
    fn uptime_rolls_from_minutes_to_hours() {
        let mut hci = Hci::new(MockPanel::new());
        hci.init();
        let d = districts();

        let stats = StatusStats {
            uptime_seconds: 2 * 60 + 5,
            ..Default::default()
        };
        for _ in 0..4 {
            hci.refresh_line(&d, None, &stats);
        }
        let row = hci.panel().row(3);
        assert_eq!(&row[..2], " 2");
        assert_eq!(&row[3..5], "05");

        let stats = StatusStats {
            uptime_seconds: 3 * 3600 + 15 * 60,
            ..Default::default()
        };
        for _ in 0..4 {
            hci.refresh_line(&d, None, &stats);
        }
        let row = hci.panel().row(3);
        assert_eq!(&row[..2], " 3");
        assert_eq!(&row[3..5], "15");
    }

    #[test]
    fn refresh_wraps_after_last_row() {
        let mut hci = Hci::new(MockPanel::new());
        let d = districts();
        let stats = StatusStats::default();
        assert_eq!(hci.current_line(), 0);
        for _ in 0..4 {
            hci.refresh_line(&d, None, &stats);
        }
        assert_eq!(hci.current_line(), 0);
    }
}
