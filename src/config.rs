//! Structural station configuration.
//!
//! Everything here is fixed at build time for a given board: how many
//! districts exist, which zone each feeds, and which current-sense channel
//! it reads. Runtime-tunable values (current limits, repeat counts, display
//! intervals) live in the persistent [`Constants`](crate::constants)
//! block instead.
//!
//! # Example
//!
//! ```rust
//! use dcc_station::config::{DistrictSlot, StationConfig};
//! use dcc_station::districts::Zone;
//!
//! // The default two-district motor-shield layout.
//! let config = StationConfig::default();
//! assert_eq!(config.districts.len(), 2);
//!
//! // A larger backplane with one programming output.
//! let config = StationConfig::new()
//!     .with_district(DistrictSlot::new(Zone::Main, 0))
//!     .with_district(DistrictSlot::new(Zone::Main, 1))
//!     .with_district(DistrictSlot::new(Zone::Main, 2))
//!     .with_district(DistrictSlot::new(Zone::Programming, 3));
//! assert_eq!(config.districts.len(), 4);
//! ```

use crate::districts::{Zone, MAX_DISTRICTS};
use heapless::Vec;

/// One district's wiring.
#[derive(Clone, Copy, Debug)]
pub struct DistrictSlot {
    /// Which zone this district feeds.
    pub zone: Zone,
    /// Current-sense ADC channel for its H-bridge load output.
    pub adc_channel: u8,
}

impl DistrictSlot {
    /// Describe a district.
    pub fn new(zone: Zone, adc_channel: u8) -> Self {
        Self { zone, adc_channel }
    }
}

/// Whole-station configuration.
#[derive(Clone, Debug)]
pub struct StationConfig {
    /// District wiring, in index order.
    pub districts: Vec<DistrictSlot, MAX_DISTRICTS>,
}

impl StationConfig {
    /// An empty configuration; add districts with
    /// [`with_district`](Self::with_district).
    pub fn new() -> Self {
        Self {
            districts: Vec::new(),
        }
    }

    /// Append a district. Additions beyond
    /// [`MAX_DISTRICTS`](crate::districts::MAX_DISTRICTS) are dropped; the
    /// station reports the real count after construction.
    pub fn with_district(mut self, slot: DistrictSlot) -> Self {
        let _ = self.districts.push(slot);
        self
    }
}

impl Default for StationConfig {
    /// The Arduino motor-shield layout: district A on the main track,
    /// district B as the programming track, load senses on channels 0/1.
    fn default() -> Self {
        Self::new()
            .with_district(DistrictSlot::new(Zone::Main, 0))
            .with_district(DistrictSlot::new(Zone::Programming, 1))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_is_motor_shield() {
        let config = StationConfig::default();
        assert_eq!(config.districts.len(), 2);
        assert_eq!(config.districts[0].zone, Zone::Main);
        assert_eq!(config.districts[0].adc_channel, 0);
        assert_eq!(config.districts[1].zone, Zone::Programming);
        assert_eq!(config.districts[1].adc_channel, 1);
    }

    #[test]
    fn builder_caps_at_max_districts() {
        let mut config = StationConfig::new();
        for channel in 0..(MAX_DISTRICTS as u8 + 2) {
            config = config.with_district(DistrictSlot::new(Zone::Main, channel));
        }
        assert_eq!(config.districts.len(), MAX_DISTRICTS);
    }
}
