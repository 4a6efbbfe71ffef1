//! One-shot multiplexed analogue conversions with completion signals.
//!
//! Components queue read requests against a channel and a completion
//! [`SignalId`]; the manager keeps the converter fully occupied by starting
//! the next conversion the moment the previous reading has been collected.
//! The conversion interrupt hands its raw reading over through a single
//! slot plus a signal - the drain task then pairs the reading with the
//! request at the head of the queue, stores it, and notifies the requester.
//!
//! The district controller is the main client: it chains one request per
//! district so the converter cycles the current-sense channels
//! back-to-back.

use crate::errors::ErrorCode;
use crate::signal::{SignalId, Signals};
use crate::traits::{AdcConverter, CacheBearing};
use heapless::Deque;

/// Analogue channels the manager tracks readings for.
pub const ADC_CHANNELS: usize = 8;

/// Depth of the pending-request queue.
pub const ADC_QUEUE: usize = 8;

#[derive(Clone, Copy, Debug)]
struct PendingRead {
    channel: u8,
    notify: SignalId,
}

/// The analogue conversion manager.
pub struct AdcManager<A: AdcConverter> {
    converter: A,
    pending: Deque<PendingRead, ADC_QUEUE>,
    readings: [u16; ADC_CHANNELS],
    irq_signal: SignalId,
    irq_reading: u16,
    converting: bool,
}

impl<A: AdcConverter> AdcManager<A> {
    /// Create a manager around a converter.
    ///
    /// `irq_signal` is raised by [`isr_complete`](Self::isr_complete) and
    /// must be bound to the drain task.
    pub fn new(converter: A, irq_signal: SignalId) -> Self {
        Self {
            converter,
            pending: Deque::new(),
            readings: [0; ADC_CHANNELS],
            irq_signal,
            irq_reading: 0,
            converting: false,
        }
    }

    /// Queue a conversion of `channel`, notifying `notify` when stored.
    ///
    /// Fails with [`QueueOverflow`](ErrorCode::QueueOverflow) when the
    /// pending queue is full.
    pub fn read(&mut self, channel: u8, notify: SignalId) -> Result<(), ErrorCode> {
        if channel as usize >= ADC_CHANNELS {
            return Err(ErrorCode::InvalidArgumentCount);
        }
        self.pending
            .push_back(PendingRead { channel, notify })
            .map_err(|_| ErrorCode::QueueOverflow)?;
        if !self.converting {
            self.start_next();
        }
        Ok(())
    }

    fn start_next(&mut self) {
        if let Some(front) = self.pending.front() {
            self.converting = true;
            self.converter.start(front.channel);
        } else {
            self.converting = false;
        }
    }

    /// Conversion-complete interrupt: stash the raw reading and signal the
    /// drain task. Never touches the queue.
    pub fn isr_complete(&mut self, raw: u16, signals: &Signals) {
        self.irq_reading = raw;
        signals.raise(self.irq_signal);
    }

    /// Drain task body: pair the stashed reading with the head request,
    /// store it, notify the requester, and start the next conversion.
    pub fn process(&mut self, signals: &Signals) {
        if let Some(request) = self.pending.pop_front() {
            self.readings[request.channel as usize] = self.irq_reading;
            signals.raise(request.notify);
        }
        self.converting = false;
        self.start_next();
    }

    /// The most recent stored reading for a channel.
    pub fn last(&self, channel: u8) -> u16 {
        self.readings[channel as usize]
    }

    /// The signal the conversion interrupt raises.
    pub fn irq_signal(&self) -> SignalId {
        self.irq_signal
    }

    /// Number of queued requests.
    pub fn pending_reads(&self) -> usize {
        self.pending.len()
    }
}

impl<A: AdcConverter> CacheBearing for AdcManager<A> {
    fn cached_bytes(&self) -> usize {
        (ADC_QUEUE - self.pending.len()) * core::mem::size_of::<PendingRead>()
    }

    fn release(&mut self, _bytes: usize) -> bool {
        // Request slots are fixed capacity; nothing to give back.
        false
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockAdc;

    fn setup() -> (AdcManager<MockAdc>, Signals, SignalId, SignalId) {
        let mut signals = Signals::new();
        let irq = signals.allocate().unwrap();
        let done_a = signals.allocate().unwrap();
        let done_b = signals.allocate().unwrap();
        (AdcManager::new(MockAdc::new(), irq), signals, done_a, done_b)
    }

    #[test]
    fn first_request_starts_immediately() {
        let (mut adc, signals, done, _) = setup();
        adc.read(2, done).unwrap();
        assert_eq!(adc.converter.last_channel(), Some(2));
        assert_eq!(signals.pending(done), 0);
    }

    #[test]
    fn completion_flows_through_drain_task() {
        let (mut adc, signals, done, _) = setup();
        adc.read(2, done).unwrap();

        adc.isr_complete(987, &signals);
        assert!(signals.consume(adc.irq_signal()));

        adc.process(&signals);
        assert_eq!(adc.last(2), 987);
        assert!(signals.consume(done));
        assert_eq!(adc.pending_reads(), 0);
    }

    #[test]
    fn queued_requests_run_back_to_back() {
        let (mut adc, signals, done_a, done_b) = setup();
        adc.read(0, done_a).unwrap();
        adc.read(1, done_b).unwrap();
        // Only the first conversion started.
        assert_eq!(adc.converter.started(), &[0]);

        adc.isr_complete(100, &signals);
        adc.process(&signals);
        assert_eq!(adc.converter.started(), &[0, 1]);
        assert_eq!(adc.last(0), 100);
        assert!(signals.consume(done_a));

        adc.isr_complete(200, &signals);
        adc.process(&signals);
        assert_eq!(adc.last(1), 200);
        assert!(signals.consume(done_b));
    }

    #[test]
    fn queue_overflow_is_reported() {
        let (mut adc, _signals, done, _) = setup();
        for _ in 0..ADC_QUEUE {
            adc.read(0, done).unwrap();
        }
        assert_eq!(adc.read(0, done), Err(ErrorCode::QueueOverflow));
    }

    #[test]
    fn cache_reporting_shrinks_with_queue_depth() {
        let (mut adc, _signals, done, _) = setup();
        let empty = adc.cached_bytes();
        adc.read(0, done).unwrap();
        assert!(adc.cached_bytes() < empty);
        assert!(!adc.release(16));
    }
}
