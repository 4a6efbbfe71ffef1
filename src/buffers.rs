//! The transmission buffer pool and active ring.
//!
//! A fixed pool of buffers backs everything the station puts on the track.
//! Each buffer carries a composed packet, its encoded bit-stream, a repeat
//! count, a priority class, and the semantic [`Action`] tag used for
//! display and refresh keying. Buffers move through
//! `free → pending → transmitting → (pending | free)`:
//!
//! - **Transient** packets (accessory changes, function updates, service
//!   sequences) are appended at the tail and freed once their repeats are
//!   spent.
//! - **Persistent** buffers (speed/direction holds) park in `pending` when
//!   their repeats run out, keeping their payload; a new write to the same
//!   address and action kind refreshes the existing buffer in place rather
//!   than allocating another.
//! - **Service-mode** sequences are submitted as one contiguous group
//!   (reset, command, reset) and each member transmits its full repeat
//!   burst before the ring advances, preserving the mandated ordering on
//!   the programming track.
//!
//! The waveform generator drives the ring from interrupt context through
//! [`begin_next`](BufferRing::begin_next) and
//! [`finish_current`](BufferRing::finish_current); neither allocates, and a
//! refresh against the buffer currently on air is staged and swapped in at
//! the next buffer boundary so the in-flight packet is never corrupted.

use crate::bitstream::{self, BitStream};
use crate::errors::ErrorCode;
use crate::packets::{Action, PacketBytes};
use crate::signal::{SignalId, Signals};
use crate::traits::CacheBearing;

/// Number of transmission buffers in the pool.
pub const TRANSMISSION_BUFFERS: usize = 8;

/// Priority class of a transmission buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Priority {
    /// The synthesised idle packet (never pooled).
    Idle,
    /// Persistent mobile decoder hold.
    Mobile,
    /// Accessory decoder command.
    Accessory,
    /// Service-mode reset filler.
    ServiceReset,
    /// Service-mode command.
    ServiceCommand,
    /// Other short-lived operations packet.
    Transient,
}

impl Priority {
    fn is_service(self) -> bool {
        matches!(self, Priority::ServiceReset | Priority::ServiceCommand)
    }
}

/// Lifecycle state of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferState {
    /// On the free list.
    Free,
    /// Holds a packet; linked on the ring or parked (persistent).
    Pending,
    /// Currently being played by the waveform generator.
    Transmitting,
}

/// Payload image staged for the next buffer boundary.
struct Staged {
    bytes: PacketBytes,
    bits: BitStream,
    repeats: u8,
    action: Action,
}

struct TxBuffer {
    state: BufferState,
    priority: Priority,
    address: u16,
    action: Action,
    bytes: PacketBytes,
    bits: BitStream,
    repeats: u8,
    persistent: bool,
    done: Option<SignalId>,
    staged: Option<Staged>,
    next: Option<u8>,
    linked: bool,
}

impl TxBuffer {
    fn empty() -> Self {
        Self {
            state: BufferState::Free,
            priority: Priority::Transient,
            address: 0,
            action: Action::ServiceReset,
            bytes: PacketBytes::new(),
            bits: BitStream::new(),
            repeats: 0,
            persistent: false,
            done: None,
            staged: None,
            next: None,
            linked: false,
        }
    }
}

/// A submission request for one packet.
pub struct Submission {
    /// Priority class for ring policy and display.
    pub priority: Priority,
    /// Target decoder or accessory address.
    pub address: u16,
    /// Semantic tag for display and refresh keying.
    pub action: Action,
    /// Full packet bytes including checksum.
    pub bytes: PacketBytes,
    /// Preamble length in bits.
    pub preamble: u8,
    /// Number of transmissions.
    pub repeats: u8,
    /// Persistent buffers park instead of freeing at zero repeats.
    pub persistent: bool,
    /// Raised when the buffer retires.
    pub done: Option<SignalId>,
}

/// What the waveform generator should do after a completed pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassOutcome {
    /// Replay the same buffer (service bursts transmit contiguously).
    Retransmit,
    /// Move on; call [`BufferRing::begin_next`].
    Advance,
}

/// One entry reported by the display scan.
#[derive(Clone, Copy, Debug)]
pub struct ScanEntry {
    /// Target address.
    pub address: u16,
    /// Semantic action tag.
    pub action: Action,
    /// Priority class.
    pub priority: Priority,
    /// Remaining repeats.
    pub repeats: u8,
}

/// The pool of transmission buffers plus the active ring and free list.
pub struct BufferRing {
    pool: [TxBuffer; TRANSMISSION_BUFFERS],
    active_head: Option<u8>,
    active_tail: Option<u8>,
    free_head: Option<u8>,
    free_count: u8,
    scan_cursor: Option<u8>,
}

impl BufferRing {
    /// Create a ring with every buffer free.
    pub fn new() -> Self {
        let mut ring = Self {
            pool: core::array::from_fn(|_| TxBuffer::empty()),
            active_head: None,
            active_tail: None,
            free_head: None,
            free_count: 0,
            scan_cursor: None,
        };
        for index in (0..TRANSMISSION_BUFFERS).rev() {
            ring.pool[index].next = ring.free_head;
            ring.free_head = Some(index as u8);
            ring.free_count += 1;
        }
        ring
    }

    /// Number of free buffers.
    pub fn free_buffers(&self) -> u8 {
        self.free_count
    }

    fn allocate(&mut self) -> Option<u8> {
        let index = self.free_head?;
        self.free_head = self.pool[index as usize].next;
        self.free_count -= 1;
        self.pool[index as usize].next = None;
        Some(index)
    }

    fn release(&mut self, index: u8) {
        let buffer = &mut self.pool[index as usize];
        buffer.state = BufferState::Free;
        buffer.persistent = false;
        buffer.staged = None;
        buffer.linked = false;
        buffer.next = self.free_head;
        self.free_head = Some(index);
        self.free_count += 1;
    }

    fn link_tail(&mut self, index: u8) {
        self.pool[index as usize].next = None;
        self.pool[index as usize].linked = true;
        match self.active_tail {
            Some(tail) => self.pool[tail as usize].next = Some(index),
            None => self.active_head = Some(index),
        }
        self.active_tail = Some(index);
    }

    fn unlink_head(&mut self) -> Option<u8> {
        let head = self.active_head?;
        self.active_head = self.pool[head as usize].next;
        if self.active_head.is_none() {
            self.active_tail = None;
        }
        self.pool[head as usize].next = None;
        self.pool[head as usize].linked = false;
        Some(head)
    }

    fn find_hold(&self, address: u16, action: Action) -> Option<u8> {
        (0..TRANSMISSION_BUFFERS as u8).find(|&i| {
            let b = &self.pool[i as usize];
            b.state != BufferState::Free && b.address == address && b.action.same_kind(action)
        })
    }

    /// Submit a packet for transmission.
    ///
    /// Persistent submissions refresh an existing hold for the same address
    /// and action kind in place; everything else takes a buffer from the
    /// free list and joins the tail of the ring. Fails with
    /// [`TransmissionBusy`](ErrorCode::TransmissionBusy) when the pool is
    /// exhausted, leaving the ring unchanged.
    pub fn submit(&mut self, request: Submission) -> Result<u8, ErrorCode> {
        let bits = bitstream::encode(&request.bytes, request.preamble)?;

        if request.persistent {
            if let Some(index) = self.find_hold(request.address, request.action) {
                let buffer = &mut self.pool[index as usize];
                if buffer.state == BufferState::Transmitting {
                    // On air: stage the image for the next boundary.
                    buffer.staged = Some(Staged {
                        bytes: request.bytes,
                        bits,
                        repeats: request.repeats,
                        action: request.action,
                    });
                } else {
                    buffer.bytes = request.bytes;
                    buffer.bits = bits;
                    buffer.repeats = request.repeats;
                    buffer.action = request.action;
                    buffer.done = request.done;
                    if !buffer.linked {
                        // Parked hold: reactivate it.
                        self.link_tail(index);
                    }
                }
                return Ok(index);
            }
        }

        let index = self.allocate().ok_or(ErrorCode::TransmissionBusy)?;
        let buffer = &mut self.pool[index as usize];
        buffer.state = BufferState::Pending;
        buffer.priority = request.priority;
        buffer.address = request.address;
        buffer.action = request.action;
        buffer.bytes = request.bytes;
        buffer.bits = bits;
        buffer.repeats = request.repeats;
        buffer.persistent = request.persistent;
        buffer.done = request.done;
        buffer.staged = None;
        self.link_tail(index);
        Ok(index)
    }

    /// Submit a service-mode transaction as one contiguous group:
    /// reset preamble, command, reset postamble.
    ///
    /// `done` is raised once, when the trailing reset retires. Fails with
    /// [`TransmissionBusy`](ErrorCode::TransmissionBusy) unless all three
    /// buffers are available.
    pub fn submit_service(
        &mut self,
        command: PacketBytes,
        reset_repeats: u8,
        command_repeats: u8,
        done: Option<SignalId>,
    ) -> Result<(), ErrorCode> {
        if self.free_count < 3 {
            return Err(ErrorCode::TransmissionBusy);
        }
        let reset = crate::packets::service_reset();
        self.submit(Submission {
            priority: Priority::ServiceReset,
            address: 0,
            action: Action::ServiceReset,
            bytes: reset.clone(),
            preamble: bitstream::LONG_PREAMBLE,
            repeats: reset_repeats,
            persistent: false,
            done: None,
        })?;
        self.submit(Submission {
            priority: Priority::ServiceCommand,
            address: 0,
            action: Action::Service,
            bytes: command,
            preamble: bitstream::LONG_PREAMBLE,
            repeats: command_repeats,
            persistent: false,
            done: None,
        })?;
        self.submit(Submission {
            priority: Priority::ServiceReset,
            address: 0,
            action: Action::ServiceReset,
            bytes: reset,
            preamble: bitstream::LONG_PREAMBLE,
            repeats: reset_repeats,
            persistent: false,
            done,
        })?;
        Ok(())
    }

    /// Withdraw a hold: the generator observes the zeroed repeat count at
    /// the next buffer boundary and retires the buffer.
    pub fn cancel(&mut self, address: u16, action: Action) -> bool {
        if let Some(index) = self.find_hold(address, action) {
            let buffer = &mut self.pool[index as usize];
            buffer.repeats = 0;
            buffer.persistent = false;
            buffer.staged = None;
            if buffer.state == BufferState::Pending && !buffer.linked {
                // Parked: nothing will visit it, free it now.
                self.release(index);
            }
            true
        } else {
            false
        }
    }

    // ------------------------------------------------------------------
    // Interrupt-context interface, driven by the waveform generator.
    // ------------------------------------------------------------------

    /// Take the next buffer to transmit, or `None` when the ring is empty.
    ///
    /// Buffers found with no repeats left (withdrawn before airing) are
    /// retired on the way past.
    pub fn begin_next(&mut self, signals: &Signals) -> Option<u8> {
        loop {
            let head = self.active_head?;
            if self.pool[head as usize].repeats == 0 {
                let index = match self.unlink_head() {
                    Some(i) => i,
                    None => return None,
                };
                self.retire(index, signals);
                continue;
            }
            self.pool[head as usize].state = BufferState::Transmitting;
            return Some(head);
        }
    }

    /// The encoded bit-stream of a buffer.
    pub fn bits(&self, index: u8) -> &[u8] {
        &self.pool[index as usize].bits
    }

    /// The composed packet bytes of a buffer.
    pub fn packet_bytes(&self, index: u8) -> &[u8] {
        &self.pool[index as usize].bytes
    }

    /// Boundary processing after one complete pass of `index`.
    ///
    /// Applies any staged refresh, consumes one repeat, and decides whether
    /// the generator replays the buffer or advances. Raises the buffer's
    /// completion signal when it retires.
    pub fn finish_current(&mut self, index: u8, signals: &Signals) -> PassOutcome {
        let buffer = &mut self.pool[index as usize];
        buffer.repeats = buffer.repeats.saturating_sub(1);

        if let Some(staged) = buffer.staged.take() {
            buffer.bytes = staged.bytes;
            buffer.bits = staged.bits;
            buffer.repeats = staged.repeats;
            buffer.action = staged.action;
        }

        if buffer.repeats > 0 {
            if buffer.priority.is_service() {
                // Service bursts stay contiguous.
                return PassOutcome::Retransmit;
            }
            // Re-queue at the tail for round-robin refresh.
            buffer.state = BufferState::Pending;
            if let Some(head) = self.unlink_head() {
                if self.active_head.is_some() {
                    self.link_tail(head);
                    return PassOutcome::Advance;
                }
                // Sole occupant: put it straight back on air.
                self.link_tail(head);
                self.pool[head as usize].state = BufferState::Transmitting;
                return PassOutcome::Retransmit;
            }
            return PassOutcome::Advance;
        }

        if let Some(head) = self.unlink_head() {
            self.retire(head, signals);
        }
        PassOutcome::Advance
    }

    fn retire(&mut self, index: u8, signals: &Signals) {
        let done = self.pool[index as usize].done;
        if self.pool[index as usize].persistent {
            // Park the hold for later refresh.
            self.pool[index as usize].state = BufferState::Pending;
        } else {
            self.release(index);
        }
        if let Some(flag) = done {
            signals.raise(flag);
        }
    }

    /// True when nothing is linked on the ring.
    pub fn is_idle(&self) -> bool {
        self.active_head.is_none()
    }

    // ------------------------------------------------------------------
    // Display scan.
    // ------------------------------------------------------------------

    /// Restart the display scan at the head of the ring.
    pub fn reset_scan(&mut self) {
        self.scan_cursor = self.active_head;
    }

    /// Next active buffer for the display, one per refresh tick.
    pub fn scan_next(&mut self) -> Option<ScanEntry> {
        let index = self.scan_cursor?;
        let buffer = &self.pool[index as usize];
        self.scan_cursor = buffer.next;
        Some(ScanEntry {
            address: buffer.address,
            action: buffer.action,
            priority: buffer.priority,
            repeats: buffer.repeats,
        })
    }
}

impl Default for BufferRing {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBearing for BufferRing {
    fn cached_bytes(&self) -> usize {
        self.free_count as usize * core::mem::size_of::<TxBuffer>()
    }

    fn release(&mut self, _bytes: usize) -> bool {
        false
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::{self, Direction};

    fn speed_submission(address: u16, speed: u8, repeats: u8) -> Submission {
        Submission {
            priority: Priority::Mobile,
            address,
            action: Action::Speed {
                speed,
                direction: Direction::Forward,
            },
            bytes: packets::speed_and_direction(address, speed, Direction::Forward).unwrap(),
            preamble: bitstream::SHORT_PREAMBLE,
            repeats,
            persistent: true,
            done: None,
        }
    }

    fn signals() -> Signals {
        Signals::new()
    }

    #[test]
    fn fresh_ring_is_idle_with_full_pool() {
        let ring = BufferRing::new();
        assert!(ring.is_idle());
        assert_eq!(ring.free_buffers(), TRANSMISSION_BUFFERS as u8);
    }

    #[test]
    fn submission_links_and_consumes_a_buffer() {
        let mut ring = BufferRing::new();
        ring.submit(speed_submission(3, 7, 8)).unwrap();
        assert!(!ring.is_idle());
        assert_eq!(ring.free_buffers(), TRANSMISSION_BUFFERS as u8 - 1);
    }

    #[test]
    fn pool_exhaustion_fails_busy_and_leaves_ring_unchanged() {
        let mut ring = BufferRing::new();
        for address in 1..=TRANSMISSION_BUFFERS as u16 {
            ring.submit(speed_submission(address, 5, 4)).unwrap();
        }
        assert_eq!(ring.free_buffers(), 0);

        ring.reset_scan();
        let mut before = heapless::Vec::<u16, 16>::new();
        while let Some(entry) = ring.scan_next() {
            before.push(entry.address).unwrap();
        }

        let err = ring.submit(speed_submission(99, 5, 4)).unwrap_err();
        assert_eq!(err, ErrorCode::TransmissionBusy);

        ring.reset_scan();
        let mut after = heapless::Vec::<u16, 16>::new();
        while let Some(entry) = ring.scan_next() {
            after.push(entry.address).unwrap();
        }
        assert_eq!(before, after);
    }

    #[test]
    fn persistent_refresh_updates_in_place() {
        let mut ring = BufferRing::new();
        ring.submit(speed_submission(3, 7, 8)).unwrap();
        ring.submit(speed_submission(3, 11, 8)).unwrap();
        // Same hold, no extra buffer taken.
        assert_eq!(ring.free_buffers(), TRANSMISSION_BUFFERS as u8 - 1);

        ring.reset_scan();
        let entry = ring.scan_next().unwrap();
        assert!(matches!(entry.action, Action::Speed { speed: 11, .. }));
        assert!(ring.scan_next().is_none());
    }

    #[test]
    fn mid_transmission_refresh_is_staged_until_boundary() {
        let mut ring = BufferRing::new();
        let signals = signals();
        ring.submit(speed_submission(3, 7, 2)).unwrap();

        let current = ring.begin_next(&signals).unwrap();
        let old_bits: heapless::Vec<u8, 96> = ring.bits(current).iter().copied().collect();

        // Refresh while on air: the live bit-stream must not change.
        ring.submit(speed_submission(3, 11, 8)).unwrap();
        assert_eq!(ring.bits(current), &old_bits[..]);

        // At the boundary the staged image takes over.
        let outcome = ring.finish_current(current, &signals);
        assert_ne!(ring.bits(current), &old_bits[..]);
        ring.reset_scan();
        let entry = ring.scan_next().unwrap();
        assert!(matches!(entry.action, Action::Speed { speed: 11, .. }));
        assert_eq!(entry.repeats, 8);
        let _ = outcome;
    }

    #[test]
    fn transient_frees_after_repeats_and_signals_completion() {
        let mut ring = BufferRing::new();
        let mut pool = Signals::new();
        let done = pool.allocate().unwrap();

        ring.submit(Submission {
            priority: Priority::Accessory,
            address: 42,
            action: Action::Accessory { on: true },
            bytes: packets::accessory_state(42, true).unwrap(),
            preamble: bitstream::SHORT_PREAMBLE,
            repeats: 2,
            persistent: false,
            done: Some(done),
        })
        .unwrap();

        let idx = ring.begin_next(&pool).unwrap();
        assert_eq!(ring.finish_current(idx, &pool), PassOutcome::Retransmit);
        assert_eq!(ring.finish_current(idx, &pool), PassOutcome::Advance);

        assert!(ring.is_idle());
        assert_eq!(ring.free_buffers(), TRANSMISSION_BUFFERS as u8);
        assert!(pool.consume(done));
    }

    #[test]
    fn persistent_hold_parks_then_reactivates() {
        let mut ring = BufferRing::new();
        let signals = signals();
        ring.submit(speed_submission(3, 7, 1)).unwrap();

        let idx = ring.begin_next(&signals).unwrap();
        assert_eq!(ring.finish_current(idx, &signals), PassOutcome::Advance);

        // Parked: off the ring but the buffer is still owned.
        assert!(ring.is_idle());
        assert_eq!(ring.free_buffers(), TRANSMISSION_BUFFERS as u8 - 1);

        // A refresh re-activates the same buffer.
        ring.submit(speed_submission(3, 9, 8)).unwrap();
        assert!(!ring.is_idle());
        assert_eq!(ring.free_buffers(), TRANSMISSION_BUFFERS as u8 - 1);
    }

    #[test]
    fn two_holds_round_robin() {
        let mut ring = BufferRing::new();
        let signals = signals();
        ring.submit(speed_submission(3, 7, 8)).unwrap();
        ring.submit(speed_submission(4, 5, 8)).unwrap();

        let first = ring.begin_next(&signals).unwrap();
        assert_eq!(ring.finish_current(first, &signals), PassOutcome::Advance);
        let second = ring.begin_next(&signals).unwrap();
        assert_ne!(first, second);
        assert_eq!(ring.finish_current(second, &signals), PassOutcome::Advance);
        let third = ring.begin_next(&signals).unwrap();
        assert_eq!(third, first);
    }

    #[test]
    fn service_group_is_contiguous_and_ordered() {
        let mut ring = BufferRing::new();
        let command = packets::service_write_byte(29, 0x26).unwrap();
        ring.submit_service(command, 20, 10, None).unwrap();

        ring.reset_scan();
        let entries: heapless::Vec<ScanEntry, 4> =
            core::iter::from_fn(|| ring.scan_next()).collect();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].priority, Priority::ServiceReset);
        assert_eq!(entries[0].repeats, 20);
        assert_eq!(entries[1].priority, Priority::ServiceCommand);
        assert_eq!(entries[1].repeats, 10);
        assert_eq!(entries[2].priority, Priority::ServiceReset);
        assert_eq!(entries[2].repeats, 20);
    }

    #[test]
    fn service_burst_transmits_contiguously() {
        let mut ring = BufferRing::new();
        let signals = signals();
        let command = packets::service_write_byte(1, 3).unwrap();
        ring.submit_service(command, 3, 2, None).unwrap();

        // Leading reset: three passes of the same buffer.
        let reset = ring.begin_next(&signals).unwrap();
        assert_eq!(ring.finish_current(reset, &signals), PassOutcome::Retransmit);
        assert_eq!(ring.finish_current(reset, &signals), PassOutcome::Retransmit);
        assert_eq!(ring.finish_current(reset, &signals), PassOutcome::Advance);

        // Then the command burst.
        let cmd = ring.begin_next(&signals).unwrap();
        assert_ne!(cmd, reset);
        assert_eq!(ring.finish_current(cmd, &signals), PassOutcome::Retransmit);
        assert_eq!(ring.finish_current(cmd, &signals), PassOutcome::Advance);
    }

    #[test]
    fn service_group_needs_three_buffers() {
        let mut ring = BufferRing::new();
        for address in 1..=6 {
            ring.submit(speed_submission(address, 5, 4)).unwrap();
        }
        assert_eq!(ring.free_buffers(), 2);
        let command = packets::service_write_byte(1, 3).unwrap();
        assert_eq!(
            ring.submit_service(command, 20, 10, None),
            Err(ErrorCode::TransmissionBusy)
        );
        assert_eq!(ring.free_buffers(), 2);
    }

    #[test]
    fn cancel_is_observed_at_the_next_boundary() {
        let mut ring = BufferRing::new();
        let signals = signals();
        ring.submit(speed_submission(3, 7, 8)).unwrap();
        let idx = ring.begin_next(&signals).unwrap();

        let action = Action::Speed {
            speed: 0,
            direction: Direction::Forward,
        };
        assert!(ring.cancel(3, action));
        assert_eq!(ring.finish_current(idx, &signals), PassOutcome::Advance);
        assert!(ring.is_idle());
        assert_eq!(ring.free_buffers(), TRANSMISSION_BUFFERS as u8);
    }

    #[test]
    fn cached_bytes_tracks_free_pool() {
        let mut ring = BufferRing::new();
        let full = ring.cached_bytes();
        ring.submit(speed_submission(3, 7, 8)).unwrap();
        assert!(ring.cached_bytes() < full);
        assert!(!CacheBearing::release(&mut ring, 64));
    }
}
