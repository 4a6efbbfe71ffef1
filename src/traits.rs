//! Hardware abstraction traits.
//!
//! Every point where the core touches hardware goes through one of these
//! traits, so the whole firmware can run on the desktop against the mocks
//! in [`hal`](crate::hal):
//!
//! - [`BridgeDriver`] - the H-bridge power stage lines (enable, brake,
//!   direction) for each district.
//! - [`AdcConverter`] - starts one analogue conversion; completion arrives
//!   through the station's ADC interrupt entry point.
//! - [`NvStorage`] - the persistent byte store behind the constants block.
//! - [`PanelDisplay`] - the character LCD surface the HCI renders into.
//! - [`CacheBearing`] - implemented by components holding reclaimable pools
//!   so the display and a memory-pressure hook can interrogate them.

/// Drives the per-district H-bridge control lines.
///
/// `district` is the zero-based district index. The direction line carries
/// the DCC waveform phase, so `set_direction` is called from interrupt
/// context on every half-cycle - implementations must be branch-light.
pub trait BridgeDriver {
    /// Assert or release the district's enable line.
    fn set_enable(&mut self, district: u8, on: bool);

    /// Assert or release the district's brake line.
    fn set_brake(&mut self, district: u8, on: bool);

    /// Drive the district's direction line high or low.
    fn set_direction(&mut self, district: u8, high: bool);
}

/// Starts one-shot analogue conversions.
///
/// The result is delivered asynchronously: hardware raises the conversion
/// interrupt, the embedding forwards the raw reading to
/// `Station::isr_adc_complete`, and the ADC manager pairs it with the
/// request at the head of its queue.
pub trait AdcConverter {
    /// Begin converting the given analogue channel.
    fn start(&mut self, channel: u8);
}

/// Persistent byte storage (EEPROM or equivalent).
///
/// Layout is little-endian and version-implicit; the constants block
/// guards itself with a checksum rather than a format marker.
pub trait NvStorage {
    /// Read `buf.len()` bytes starting at `offset`.
    fn read(&self, offset: usize, buf: &mut [u8]);

    /// Write `data` starting at `offset`.
    fn write(&mut self, offset: usize, data: &[u8]);
}

/// A fixed-geometry character display.
pub trait PanelDisplay {
    /// Write `text` at the given row and column.
    fn write_at(&mut self, row: u8, col: u8, text: &[u8]);

    /// Clear the whole display.
    fn clear(&mut self);
}

/// A component holding a reclaimable pool.
///
/// The free transmission buffers and the idle ADC request slots are
/// "cached" memory in this sense: the display sums them for its free-pool
/// cell, and a memory-pressure hook may ask a component to give some up.
pub trait CacheBearing {
    /// Bytes currently held in reclaimable pools.
    fn cached_bytes(&self) -> usize;

    /// Release at least `bytes` from the pool, if the component can.
    ///
    /// Returns `false` when the request cannot be satisfied; fixed-capacity
    /// pools report their size but typically cannot shrink.
    fn release(&mut self, bytes: usize) -> bool;
}
