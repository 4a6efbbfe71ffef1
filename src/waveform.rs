//! The hard-real-time waveform generator.
//!
//! One timer compare-match interrupt drives the track: each call to
//! [`WaveformDriver::tick`] toggles the output phase and returns the number
//! of timer ticks until the next toggle. Two ticks make one DCC bit; the
//! per-bit durations come from the current transmission buffer's encoded
//! bit-stream. When a buffer's stream is exhausted the driver lets the ring
//! do its boundary accounting and moves to the next buffer; when the ring
//! is empty it plays its own pre-encoded idle packet, so the track signal
//! never stops.
//!
//! The tick path never allocates and never calls into task code. It raises
//! exactly one signal of its own - *needs refill*, on the transition to an
//! empty ring - while buffer-completed signals are raised by the ring's
//! boundary processing.

use crate::bitstream::{self, BitStream};
use crate::buffers::{BufferRing, PassOutcome};
use crate::packets;
use crate::signal::{SignalId, Signals};

/// What one interrupt produced: the new output phase and the delay, in
/// timer ticks, until the next interrupt.
#[derive(Clone, Copy, Debug)]
pub struct TickOutcome {
    /// Output phase to drive onto the districts' direction lines.
    pub phase: bool,
    /// Ticks until the next compare match.
    pub ticks: u8,
}

#[derive(Clone, Copy)]
enum Source {
    Buffer(u8),
    Idle,
}

/// The waveform generator state machine.
pub struct WaveformDriver {
    idle_bits: BitStream,
    source: Source,
    position: usize,
    half_pending: Option<u8>,
    phase: bool,
    refill: SignalId,
    refill_armed: bool,
    packets_sent: u32,
}

impl WaveformDriver {
    /// Create a driver; `refill` is raised when the active ring drains.
    pub fn new(refill: SignalId) -> Self {
        // The idle stream is synthesised once; encoding a three byte packet
        // into the stream buffer cannot fail.
        let idle_bits = bitstream::encode(&packets::idle(), bitstream::SHORT_PREAMBLE)
            .unwrap_or_default();
        Self {
            idle_bits,
            source: Source::Idle,
            position: 0,
            half_pending: None,
            phase: false,
            refill,
            refill_armed: true,
            packets_sent: 0,
        }
    }

    /// Total packets played since power-up, idle packets included.
    pub fn packets_sent(&self) -> u32 {
        self.packets_sent
    }

    /// The compare-match interrupt body.
    ///
    /// Toggles the phase and returns the duration of the half-cycle now
    /// starting. Buffer lifecycle work happens only at packet boundaries.
    pub fn tick(&mut self, ring: &mut BufferRing, signals: &Signals) -> TickOutcome {
        self.phase = !self.phase;

        if let Some(ticks) = self.half_pending.take() {
            return TickOutcome {
                phase: self.phase,
                ticks,
            };
        }

        let ticks = self.next_bit(ring, signals);
        self.half_pending = Some(ticks);
        TickOutcome {
            phase: self.phase,
            ticks,
        }
    }

    fn next_bit(&mut self, ring: &mut BufferRing, signals: &Signals) -> u8 {
        // Between idle packets, newly queued work takes over immediately.
        if matches!(self.source, Source::Idle) && self.position == 0 {
            if let Some(index) = ring.begin_next(signals) {
                self.source = Source::Buffer(index);
                self.refill_armed = true;
            }
        }

        let (ticks, at_end) = match self.source {
            Source::Buffer(index) => {
                let bits = ring.bits(index);
                let ticks = bits[self.position];
                self.position += 1;
                (ticks, self.position >= bits.len())
            }
            Source::Idle => {
                let ticks = self.idle_bits[self.position];
                self.position += 1;
                (ticks, self.position >= self.idle_bits.len())
            }
        };

        if at_end {
            // Boundary work happens while the final bit is on air.
            self.packets_sent = self.packets_sent.wrapping_add(1);
            self.position = 0;
            match self.source {
                Source::Buffer(index) => match ring.finish_current(index, signals) {
                    PassOutcome::Retransmit => {}
                    PassOutcome::Advance => self.advance(ring, signals),
                },
                Source::Idle => self.advance(ring, signals),
            }
        }
        ticks
    }

    fn advance(&mut self, ring: &mut BufferRing, signals: &Signals) {
        self.position = 0;
        match ring.begin_next(signals) {
            Some(index) => {
                self.source = Source::Buffer(index);
                self.refill_armed = true;
            }
            None => {
                self.source = Source::Idle;
                if self.refill_armed {
                    self.refill_armed = false;
                    signals.raise(self.refill);
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::{BIT_ONE_TICKS, BIT_ZERO_TICKS, SHORT_PREAMBLE};
    use crate::buffers::{Priority, Submission};
    use crate::packets::{Action, Direction};
    use crate::signal::Signals;

    fn setup() -> (WaveformDriver, BufferRing, Signals, SignalId) {
        let mut signals = Signals::new();
        let refill = signals.allocate().unwrap();
        (WaveformDriver::new(refill), BufferRing::new(), signals, refill)
    }

    /// Play whole bits (two half-cycles each) and collect their durations.
    fn play_bits(
        driver: &mut WaveformDriver,
        ring: &mut BufferRing,
        signals: &Signals,
        count: usize,
    ) -> heapless::Vec<u8, 256> {
        let mut bits = heapless::Vec::new();
        for _ in 0..count {
            let first = driver.tick(ring, signals);
            let second = driver.tick(ring, signals);
            assert_eq!(first.ticks, second.ticks);
            assert_ne!(first.phase, second.phase);
            bits.push(first.ticks).unwrap();
        }
        bits
    }

    #[test]
    fn empty_ring_plays_idle_packets() {
        let (mut driver, mut ring, signals, _) = setup();
        let idle_len = SHORT_PREAMBLE as usize + 3 * 9 + 1;
        let bits = play_bits(&mut driver, &mut ring, &signals, idle_len);

        for i in 0..SHORT_PREAMBLE as usize {
            assert_eq!(bits[i], BIT_ONE_TICKS);
        }
        // Start bit of 0xFF, then eight ones.
        assert_eq!(bits[SHORT_PREAMBLE as usize], BIT_ZERO_TICKS);
        assert_eq!(driver.packets_sent(), 1);
    }

    #[test]
    fn phase_toggles_every_half_cycle() {
        let (mut driver, mut ring, signals, _) = setup();
        let mut last = driver.tick(&mut ring, &signals).phase;
        for _ in 0..64 {
            let outcome = driver.tick(&mut ring, &signals);
            assert_ne!(outcome.phase, last);
            last = outcome.phase;
        }
    }

    #[test]
    fn submitted_packet_is_played_then_ring_drains() {
        let (mut driver, mut ring, signals, refill) = setup();

        // Let the driver complete one idle packet first.
        let idle_len = SHORT_PREAMBLE as usize + 3 * 9 + 1;
        play_bits(&mut driver, &mut ring, &signals, idle_len);
        assert!(signals.consume(refill));

        let bytes = crate::packets::accessory_state(5, true).unwrap();
        ring.submit(Submission {
            priority: Priority::Accessory,
            address: 5,
            action: Action::Accessory { on: true },
            bytes,
            preamble: SHORT_PREAMBLE,
            repeats: 1,
            persistent: false,
            done: None,
        })
        .unwrap();

        // The queued packet takes over at the idle boundary.
        let pkt_len = SHORT_PREAMBLE as usize + 3 * 9 + 1;
        let bits = play_bits(&mut driver, &mut ring, &signals, pkt_len);
        let (decoded, _) = crate::bitstream::decode(&bits).unwrap();
        assert_eq!(decoded[0] & 0xC0, 0x80);

        // Ring drained again: refill raised exactly once more.
        assert!(ring.is_idle());
        play_bits(&mut driver, &mut ring, &signals, idle_len);
        assert!(signals.consume(refill));
        assert!(!signals.consume(refill));
    }

    #[test]
    fn speed_hold_repeats_then_parks() {
        let (mut driver, mut ring, signals, _) = setup();
        let bytes = crate::packets::speed_and_direction(3, 14, Direction::Forward).unwrap();
        ring.submit(Submission {
            priority: Priority::Mobile,
            address: 3,
            action: Action::Speed {
                speed: 14,
                direction: Direction::Forward,
            },
            bytes,
            preamble: SHORT_PREAMBLE,
            repeats: 2,
            persistent: true,
            done: None,
        })
        .unwrap();

        let pkt_len = SHORT_PREAMBLE as usize + 3 * 9 + 1;
        let idle_len = pkt_len;

        // First bit comes from the submitted packet, not idle: the driver
        // starts on the ring when work is already queued.
        let first_packet = play_bits(&mut driver, &mut ring, &signals, pkt_len);
        let (decoded, _) = crate::bitstream::decode(&first_packet).unwrap();
        assert_eq!(&decoded[..], &[0x03, 0x3E, 0x3D]);

        // Second repeat, then the hold parks and idle resumes.
        play_bits(&mut driver, &mut ring, &signals, pkt_len);
        assert!(ring.is_idle());
        let idle_bits = play_bits(&mut driver, &mut ring, &signals, idle_len);
        let (idle_decoded, _) = crate::bitstream::decode(&idle_bits).unwrap();
        assert_eq!(&idle_decoded[..], &[0xFF, 0x00, 0xFF]);
    }

    #[test]
    fn packet_counter_accumulates() {
        let (mut driver, mut ring, signals, _) = setup();
        let idle_len = SHORT_PREAMBLE as usize + 3 * 9 + 1;
        play_bits(&mut driver, &mut ring, &signals, idle_len * 3);
        assert_eq!(driver.packets_sent(), 3);
    }
}
