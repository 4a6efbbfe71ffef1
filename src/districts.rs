//! Per-district power supervision.
//!
//! Each district is one electrically isolated track section fed by its own
//! H-bridge. The controller consumes the district's periodic current-sense
//! samples and runs the power state machine:
//!
//! ```text
//! off ──(enable)──────────────────────────► on
//! on ──(sample ≥ instant limit)───────────► shorted
//! on ──(average ≥ limit, past grace)──────► shorted
//! shorted ──(reset period, attempts < 3)──► inverted   [phase flipped]
//! inverted ──(spike in phase window)──────► shorted    [attempt counted]
//! inverted ──(stable past window)─────────► on         [attempts reset]
//! shorted ──(attempts ≥ 3)────────────────► paused     [operator re-enable]
//! any ──(disable)─────────────────────────► off
//! ```
//!
//! The first `power_grace_period` milliseconds after power-up are exempt
//! from the moving-average overload test so inrush current can settle; an
//! instantaneous spike always trips. A positive sample-versus-average delta
//! of at least `minimum_delta_amps` raises the confirmation signal - that
//! is how service-mode decoders acknowledge on the programming track.
//!
//! Districts belong to zones. Main-track districts power freely; at most
//! one programming-zone district may be on at a time, and service-mode
//! operations require one to be on.

use crate::average::Ewma;
use crate::constants::Constants;
use crate::errors::{ErrorCode, ErrorLog};
use crate::signal::{SignalId, Signals};
use crate::traits::BridgeDriver;
use heapless::Vec;

/// Most districts a station can drive.
pub const MAX_DISTRICTS: usize = 6;

/// Consecutive failed phase tests before a district parks in `Paused`.
pub const PHASE_RETRY_LIMIT: u8 = 3;

/// EWMA smoothing shift for the load filter.
const LOAD_FILTER_SHIFT: u8 = 3;

/// Samples the load filter is given to settle after power-up before
/// confirmation deltas are believed.
const LOAD_SETTLE_SAMPLES: u8 = 16;

/// Which zone a district feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Zone {
    /// Normal running track.
    Main,
    /// The service-mode programming track.
    Programming,
}

/// Power state of a district.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PowerState {
    /// Unpowered.
    Off,
    /// Energised and healthy.
    On,
    /// Tripped; waiting out the driver reset period.
    Shorted,
    /// Re-energised with flipped phase, under test.
    Inverted,
    /// Gave up after repeated phase failures; operator must re-enable.
    Paused,
}

/// Snapshot of one district for display and state queries.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DistrictStatus {
    /// Power state.
    pub state: PowerState,
    /// Zone membership.
    pub zone: Zone,
    /// Filtered load average.
    pub load_average: u16,
    /// Last raw sample.
    pub last_sample: u16,
    /// Phase orientation relative to the waveform.
    pub inverted: bool,
}

struct District {
    zone: Zone,
    adc_channel: u8,
    sample_signal: SignalId,
    state: PowerState,
    inverted: bool,
    enabled_at_ms: u64,
    retry_at_ms: u64,
    phase_ok_at_ms: u64,
    attempts: u8,
    settle: u8,
    last_sample: u16,
    load: Ewma,
}

/// The district power controller.
pub struct Districts<B: BridgeDriver> {
    bridge: B,
    districts: Vec<District, MAX_DISTRICTS>,
    confirm_signal: SignalId,
    last_confirm_delta: u16,
}

impl<B: BridgeDriver> Districts<B> {
    /// Create a controller with no districts configured.
    ///
    /// `confirm_signal` is raised whenever a district reports a
    /// confirmation-sized load delta.
    pub fn new(bridge: B, confirm_signal: SignalId) -> Self {
        Self {
            bridge,
            districts: Vec::new(),
            confirm_signal,
            last_confirm_delta: 0,
        }
    }

    /// Add a district. Returns its index, or `QueueOverflow` when the
    /// table is full.
    pub fn add(
        &mut self,
        zone: Zone,
        adc_channel: u8,
        sample_signal: SignalId,
    ) -> Result<u8, ErrorCode> {
        let index = self.districts.len() as u8;
        self.districts
            .push(District {
                zone,
                adc_channel,
                sample_signal,
                state: PowerState::Off,
                inverted: false,
                enabled_at_ms: 0,
                retry_at_ms: 0,
                phase_ok_at_ms: 0,
                attempts: 0,
                settle: 0,
                last_sample: 0,
                load: Ewma::new(LOAD_FILTER_SHIFT),
            })
            .map_err(|_| ErrorCode::QueueOverflow)?;
        self.bridge.set_enable(index, false);
        self.bridge.set_brake(index, true);
        Ok(index)
    }

    /// Number of configured districts.
    pub fn count(&self) -> u8 {
        self.districts.len() as u8
    }

    /// Borrow the bridge hardware, e.g. for test assertions.
    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    /// The district's ADC current-sense channel.
    pub fn adc_channel(&self, district: u8) -> u8 {
        self.districts[district as usize].adc_channel
    }

    /// The signal its sample-ready notification arrives on.
    pub fn sample_signal(&self, district: u8) -> SignalId {
        self.districts[district as usize].sample_signal
    }

    /// Power state of a district.
    pub fn state(&self, district: u8) -> PowerState {
        self.districts[district as usize].state
    }

    /// Filtered load average of a district.
    pub fn load_average(&self, district: u8) -> u16 {
        self.districts[district as usize].load.value()
    }

    /// Full status snapshot of a district.
    pub fn status(&self, district: u8) -> DistrictStatus {
        let d = &self.districts[district as usize];
        DistrictStatus {
            state: d.state,
            zone: d.zone,
            load_average: d.load.value(),
            last_sample: d.last_sample,
            inverted: d.inverted,
        }
    }

    /// Zone indicator for the display: `2` when the programming track is
    /// live, `1` when any main district is on, `0` otherwise.
    pub fn zone(&self) -> u8 {
        if self.programming_active() {
            2
        } else if self
            .districts
            .iter()
            .any(|d| d.zone == Zone::Main && d.state != PowerState::Off)
        {
            1
        } else {
            0
        }
    }

    /// True when a programming-zone district is powered.
    pub fn programming_active(&self) -> bool {
        self.districts
            .iter()
            .any(|d| d.zone == Zone::Programming && d.state != PowerState::Off)
    }

    /// Enable a district.
    ///
    /// Only one programming-zone district may be powered at a time;
    /// enabling a second fails with [`PowerNotOff`](ErrorCode::PowerNotOff).
    /// Districts mid-fault (`Shorted`/`Inverted`) cannot be re-enabled until
    /// they settle or are disabled first.
    pub fn power_on(&mut self, district: u8, now_ms: u64) -> Result<(), ErrorCode> {
        if district >= self.count() {
            return Err(ErrorCode::InvalidArgumentCount);
        }
        let zone = self.districts[district as usize].zone;
        if zone == Zone::Programming {
            let other_live = self.districts.iter().enumerate().any(|(i, d)| {
                i != district as usize && d.zone == Zone::Programming && d.state != PowerState::Off
            });
            if other_live {
                return Err(ErrorCode::PowerNotOff);
            }
        }
        let d = &mut self.districts[district as usize];
        match d.state {
            PowerState::On => Ok(()),
            PowerState::Shorted | PowerState::Inverted => Err(ErrorCode::InvalidState),
            PowerState::Off | PowerState::Paused => {
                d.state = PowerState::On;
                d.enabled_at_ms = now_ms;
                d.attempts = 0;
                d.settle = 0;
                d.load.reset();
                self.bridge.set_brake(district, false);
                self.bridge.set_enable(district, true);
                log::debug!("district {} on", district);
                Ok(())
            }
        }
    }

    /// Disable a district from any state.
    pub fn power_off(&mut self, district: u8) -> Result<(), ErrorCode> {
        if district >= self.count() {
            return Err(ErrorCode::InvalidArgumentCount);
        }
        self.districts[district as usize].state = PowerState::Off;
        self.bridge.set_enable(district, false);
        self.bridge.set_brake(district, true);
        log::debug!("district {} off", district);
        Ok(())
    }

    fn trip(&mut self, district: u8, now_ms: u64, reset_period: u64) {
        let d = &mut self.districts[district as usize];
        d.state = PowerState::Shorted;
        d.retry_at_ms = now_ms + reset_period;
        self.bridge.set_enable(district, false);
        self.bridge.set_brake(district, true);
    }

    /// Feed one current-sense sample into a district's state machine.
    ///
    /// Called from the sample task whenever the district's ADC reading has
    /// been stored; `now_ms` is the clock's current time.
    pub fn apply_sample(
        &mut self,
        district: u8,
        sample: u16,
        now_ms: u64,
        constants: &Constants,
        signals: &Signals,
        errors: &mut ErrorLog,
    ) {
        let index = district as usize;
        if index >= self.districts.len() {
            return;
        }
        let state = {
            let d = &mut self.districts[index];
            d.last_sample = sample;
            d.state
        };

        match state {
            PowerState::On => {
                let (average, enabled_at, settled) = {
                    let d = &mut self.districts[index];
                    let average = d.load.update(sample);
                    let settled = d.settle >= LOAD_SETTLE_SAMPLES;
                    if !settled {
                        d.settle += 1;
                    }
                    (average, d.enabled_at_ms, settled)
                };

                // Decoder acknowledgement: a sharp positive load delta,
                // once the filter has settled after power-up.
                let delta = sample.saturating_sub(average);
                if settled && delta >= constants.minimum_delta_amps as u16 {
                    self.last_confirm_delta = delta;
                    signals.raise(self.confirm_signal);
                }

                if sample >= constants.instant_current_limit {
                    log::warn!("district {} spike {}", district, sample);
                    errors.log(ErrorCode::PowerSpike, sample);
                    self.trip(district, now_ms, constants.driver_reset_period as u64);
                } else if now_ms.saturating_sub(enabled_at)
                    >= constants.power_grace_period as u64
                    && average >= constants.average_current_limit
                {
                    log::warn!("district {} overload avg {}", district, average);
                    errors.log(ErrorCode::PowerOverload, average);
                    self.trip(district, now_ms, constants.driver_reset_period as u64);
                }
            }

            PowerState::Shorted => {
                let (due, attempts) = {
                    let d = &self.districts[index];
                    (now_ms >= d.retry_at_ms, d.attempts)
                };
                if due {
                    if attempts >= PHASE_RETRY_LIMIT {
                        self.districts[index].state = PowerState::Paused;
                        log::warn!("district {} paused", district);
                    } else {
                        // Retry with the opposite phase. The enable line
                        // drops while the orientation changes over.
                        self.bridge.set_enable(district, false);
                        let d = &mut self.districts[index];
                        d.inverted = !d.inverted;
                        d.state = PowerState::Inverted;
                        d.phase_ok_at_ms = now_ms + constants.driver_phase_period as u64;
                        d.load.reset();
                        self.bridge.set_brake(district, false);
                        self.bridge.set_enable(district, true);
                    }
                }
            }

            PowerState::Inverted => {
                let d = &mut self.districts[index];
                d.load.update(sample);
                if sample >= constants.instant_current_limit {
                    d.attempts += 1;
                    errors.log(ErrorCode::PowerSpike, sample);
                    self.trip(district, now_ms, constants.driver_reset_period as u64);
                } else if now_ms >= d.phase_ok_at_ms {
                    // New phase held: back to normal running.
                    d.state = PowerState::On;
                    d.enabled_at_ms = now_ms;
                    d.attempts = 0;
                    d.settle = 0;
                    log::debug!("district {} phase settled", district);
                }
            }

            PowerState::Off | PowerState::Paused => {
                self.districts[index].load.update(sample);
            }
        }
    }

    /// Apply the waveform phase to every powered district's direction line,
    /// honouring per-district phase orientation. Interrupt context.
    pub fn apply_phase(&mut self, phase: bool) {
        for (index, d) in self.districts.iter().enumerate() {
            if matches!(d.state, PowerState::On | PowerState::Inverted) {
                self.bridge.set_direction(index as u8, phase ^ d.inverted);
            }
        }
    }

    /// The load delta that raised the most recent confirmation.
    pub fn last_confirm_delta(&self) -> u16 {
        self.last_confirm_delta
    }

    /// The confirmation signal identity.
    pub fn confirm_signal(&self) -> SignalId {
        self.confirm_signal
    }
}

// ============================================================================
// Tests
// ============================================================================
