//! The command station: singleton ownership, task wiring, and the DCC API.
//!
//! [`Station`] owns every firmware singleton - the signal pool, scheduler,
//! clock, ADC manager, district controller, transmission ring, waveform
//! generator, constants, error log, and display model - and passes them
//! into each other by reference, so tests stay hermetic and nothing hides
//! in globals.
//!
//! # Execution model
//!
//! Interrupt context enters through three methods the embedding calls from
//! its ISRs (or a test calls directly):
//!
//! - [`isr_timer_tick`](Station::isr_timer_tick) - the waveform
//!   compare-match; returns the next compare delay in ticks.
//! - [`isr_millisecond`](Station::isr_millisecond) - the 1 ms system tick.
//! - [`isr_adc_complete`](Station::isr_adc_complete) - a finished analogue
//!   conversion.
//!
//! Task context is [`poll`](Station::poll): one scan of the cooperative
//! scheduler, dispatching every task whose signal is raised. The only
//! state shared between the two contexts is the atomic signal pool.
//!
//! After a terminal fault the station enters its diagnostic mode: `poll`
//! stops dispatching and the console refuses commands, but the ISR entry
//! points keep the waveform (and therefore every locomotive's last order)
//! alive.
//!
//! # Example
//!
//! ```rust
//! use dcc_station::config::StationConfig;
//! use dcc_station::hal::{MockAdc, MockBridge, MockPanel, MockStorage};
//! use dcc_station::station::Station;
//!
//! let mut station = Station::new(
//!     StationConfig::default(),
//!     MockBridge::new(),
//!     MockAdc::new(),
//!     MockStorage::new(),
//!     MockPanel::new(),
//! )
//! .unwrap();
//!
//! let reply = station.console_line("S 3 14 1");
//! assert_eq!(reply.as_str(), "OK S 3 14 1");
//! ```

use crate::adc::AdcManager;
use crate::bitstream;
use crate::buffers::{BufferRing, Priority, Submission};
use crate::clock::Clock;
use crate::config::StationConfig;
use crate::console::{self, Command, Reply};
use crate::constants::{self, Constants, ConstantValue};
use crate::districts::{DistrictStatus, Districts, MAX_DISTRICTS};
use crate::errors::{Breadcrumbs, ErrorCode, ErrorLog};
use crate::hci::{Hci, StatusStats};
use crate::packets::{self, Action, Direction};
use crate::scheduler::Scheduler;
use crate::signal::{SignalId, Signals};
use crate::traits::{AdcConverter, BridgeDriver, CacheBearing, NvStorage, PanelDisplay};
use crate::waveform::WaveformDriver;
use core::fmt::Write as _;
use heapless::Vec;

/// Scheduler registration slots.
const SCHEDULER_SLOTS: usize = 16;

/// Clock event slots.
const CLOCK_EVENTS: usize = 8;

/// Per-address function images the station remembers.
const FUNCTION_SLOTS: usize = 16;

/// The station's task tags; the handle byte carries the district index for
/// sample tasks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Task {
    AdcDrain,
    DistrictSample,
    DisplayLine,
    Stats,
    ServiceDone,
    Confirmation,
}

impl Task {
    fn name(self) -> &'static str {
        match self {
            Task::AdcDrain => "adc-drain",
            Task::DistrictSample => "district-sample",
            Task::DisplayLine => "display-line",
            Task::Stats => "stats",
            Task::ServiceDone => "service-done",
            Task::Confirmation => "confirmation",
        }
    }
}

/// Remembered function images, one word of F0-F12 bits per address.
struct FunctionCache {
    entries: Vec<(u16, u16), FUNCTION_SLOTS>,
}

impl FunctionCache {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn image(&self, address: u16) -> u16 {
        self.entries
            .iter()
            .find(|(a, _)| *a == address)
            .map(|(_, bits)| *bits)
            .unwrap_or(0)
    }

    fn apply(&mut self, address: u16, function: u8, on: bool) -> u16 {
        let mut bits = self.image(address);
        if on {
            bits |= 1 << function;
        } else {
            bits &= !(1 << function);
        }
        if let Some(entry) = self.entries.iter_mut().find(|(a, _)| *a == address) {
            entry.1 = bits;
        } else if self.entries.push((address, bits)).is_err() {
            // Cache full: recycle the oldest slot.
            self.entries[0] = (address, bits);
        }
        bits
    }
}

/// An in-flight service-mode session.
enum CvSession {
    Write,
    ReadBit {
        cv: u16,
        bit: u8,
        assembled: u8,
        confirmed: bool,
    },
    ReadVerify {
        cv: u16,
        value: u8,
        confirmed: bool,
    },
}

/// Outcome of a completed CV read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CvReadResult {
    /// The CV that was read.
    pub cv: u16,
    /// The value assembled from the bit probes.
    pub value: u8,
    /// Whether the final verify-byte pass was acknowledged.
    pub verified: bool,
}

/// Full station state snapshot for UIs and diagnostics.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StationState {
    /// Zone indicator digit.
    pub zone: u8,
    /// Free transmission buffers.
    pub free_buffers: u8,
    /// Packets per second over the last statistics interval.
    pub packets_per_second: u16,
    /// Uptime in whole seconds.
    pub uptime_seconds: u32,
    /// Per-district status.
    pub districts: Vec<DistrictStatus, MAX_DISTRICTS>,
    /// Whether a terminal fault has latched.
    pub faulted: bool,
}

/// The DCC command station core.
pub struct Station<B, A, S, P>
where
    B: BridgeDriver,
    A: AdcConverter,
    S: NvStorage,
    P: PanelDisplay,
{
    signals: Signals,
    scheduler: Scheduler<Task, SCHEDULER_SLOTS>,
    clock: Clock<CLOCK_EVENTS>,
    adc: AdcManager<A>,
    districts: Districts<B>,
    ring: BufferRing,
    waveform: WaveformDriver,
    constants: Constants,
    constants_reset: bool,
    storage: S,
    errors: ErrorLog,
    crumbs: Breadcrumbs<16>,
    hci: Hci<P>,
    functions: FunctionCache,
    session: Option<CvSession>,
    read_result: Option<CvReadResult>,
    service_done: SignalId,
    display_signal: SignalId,
    stats_signal: SignalId,
    packets_mark: u32,
    packets_per_second: u16,
}

impl<B, A, S, P> Station<B, A, S, P>
where
    B: BridgeDriver,
    A: AdcConverter,
    S: NvStorage,
    P: PanelDisplay,
{
    /// Build and wire a station.
    ///
    /// Loads (or resets) the persistent constants, configures the
    /// districts, registers every task, schedules the display and
    /// statistics events, and starts the district sampling chain.
    pub fn new(
        config: StationConfig,
        bridge: B,
        converter: A,
        mut storage: S,
        panel: P,
    ) -> Result<Self, ErrorCode> {
        let mut signals = Signals::new();
        let mut allocate = |signals: &mut Signals| -> Result<SignalId, ErrorCode> {
            signals.allocate().ok_or(ErrorCode::QueueOverflow)
        };

        let adc_irq = allocate(&mut signals)?;
        let confirm = allocate(&mut signals)?;
        let display_signal = allocate(&mut signals)?;
        let stats_signal = allocate(&mut signals)?;
        let service_done = allocate(&mut signals)?;
        let refill = allocate(&mut signals)?;

        let (constants, constants_reset) = constants::load(&mut storage);

        let mut districts = Districts::new(bridge, confirm);
        for slot in &config.districts {
            let sample = allocate(&mut signals)?;
            districts.add(slot.zone, slot.adc_channel, sample)?;
        }

        let mut scheduler: Scheduler<Task, SCHEDULER_SLOTS> = Scheduler::new();
        let mut register = |task, signal, handle| -> Result<(), ErrorCode> {
            if scheduler.add_task(task, signal, handle) {
                Ok(())
            } else {
                Err(ErrorCode::QueueOverflow)
            }
        };
        register(Task::AdcDrain, adc_irq, 0)?;
        for district in 0..districts.count() {
            register(
                Task::DistrictSample,
                districts.sample_signal(district),
                district,
            )?;
        }
        register(Task::DisplayLine, display_signal, 0)?;
        register(Task::Stats, stats_signal, 0)?;
        register(Task::ServiceDone, service_done, 0)?;
        register(Task::Confirmation, confirm, 0)?;

        let mut clock: Clock<CLOCK_EVENTS> = Clock::new();
        if !clock.delay_event(constants.line_refresh_interval as u32, display_signal, true) {
            return Err(ErrorCode::QueueOverflow);
        }
        if !clock.delay_event(constants.periodic_interval as u32, stats_signal, true) {
            return Err(ErrorCode::QueueOverflow);
        }

        let mut adc = AdcManager::new(converter, adc_irq);
        // Kick off the sampling chain; each stored sample schedules the
        // next district, keeping the converter busy from here on.
        if districts.count() > 0 {
            adc.read(districts.adc_channel(0), districts.sample_signal(0))?;
        }

        let mut hci = Hci::new(panel);
        hci.init();

        let station = Self {
            signals,
            scheduler,
            clock,
            adc,
            districts,
            ring: BufferRing::new(),
            waveform: WaveformDriver::new(refill),
            constants,
            constants_reset,
            storage,
            errors: ErrorLog::new(),
            crumbs: Breadcrumbs::new(),
            hci,
            functions: FunctionCache::new(),
            session: None,
            read_result: None,
            service_done,
            display_signal,
            stats_signal,
            packets_mark: 0,
            packets_per_second: 0,
        };
        Ok(station)
    }

    // ------------------------------------------------------------------
    // Interrupt-context entry points.
    // ------------------------------------------------------------------

    /// Waveform compare-match interrupt. Returns the ticks until the next
    /// compare so the embedding can reload its timer.
    pub fn isr_timer_tick(&mut self) -> u8 {
        let outcome = self.waveform.tick(&mut self.ring, &self.signals);
        self.districts.apply_phase(outcome.phase);
        outcome.ticks
    }

    /// One-millisecond system tick.
    pub fn isr_millisecond(&mut self) {
        self.clock.tick(&self.signals);
    }

    /// A finished analogue conversion, with its raw reading.
    pub fn isr_adc_complete(&mut self, raw: u16) {
        self.adc.isr_complete(raw, &self.signals);
    }

    // ------------------------------------------------------------------
    // Task context.
    // ------------------------------------------------------------------

    /// One scheduler scan; returns how many tasks were dispatched.
    ///
    /// After a terminal fault this is a no-op: the station sits in its
    /// diagnostic loop with the waveform still running.
    pub fn poll(&mut self) -> usize {
        if self.errors.faulted() {
            return 0;
        }
        let mut dispatched = 0;
        self.scheduler.begin_scan();
        while let Some((task, handle)) = self.scheduler.poll_next(&self.signals) {
            self.crumbs.note(task.name());
            self.dispatch(task, handle);
            dispatched += 1;
        }
        dispatched
    }

    fn dispatch(&mut self, task: Task, handle: u8) {
        match task {
            Task::AdcDrain => self.adc.process(&self.signals),

            Task::DistrictSample => {
                let district = handle;
                let sample = self.adc.last(self.districts.adc_channel(district));
                let now = self.clock.now();
                self.districts.apply_sample(
                    district,
                    sample,
                    now,
                    &self.constants,
                    &self.signals,
                    &mut self.errors,
                );
                // Chain the next district's conversion.
                let next = (district + 1) % self.districts.count();
                if self
                    .adc
                    .read(
                        self.districts.adc_channel(next),
                        self.districts.sample_signal(next),
                    )
                    .is_err()
                {
                    self.errors.log(ErrorCode::QueueOverflow, next as u16);
                }
            }

            Task::DisplayLine => {
                if self.hci.current_line() == 0 {
                    self.ring.reset_scan();
                }
                let scan = self.ring.scan_next();
                let stats = StatusStats {
                    free_buffers: self.ring.free_buffers(),
                    zone: self.districts.zone(),
                    packets_per_second: self.packets_per_second,
                    pool_bytes: self.ring.cached_bytes() + self.adc.cached_bytes(),
                    uptime_seconds: self.clock.uptime_seconds(),
                };
                self.hci.refresh_line(&self.districts, scan, &stats);
            }

            Task::Stats => {
                let sent = self.waveform.packets_sent();
                let delta = sent.wrapping_sub(self.packets_mark);
                let interval = self.constants.periodic_interval.max(1) as u32;
                self.packets_per_second = ((delta * 1000) / interval).min(u16::MAX as u32) as u16;
                self.packets_mark = sent;
            }

            Task::ServiceDone => self.on_service_done(),

            Task::Confirmation => match self.session.as_mut() {
                Some(CvSession::ReadBit { confirmed, .. })
                | Some(CvSession::ReadVerify { confirmed, .. }) => *confirmed = true,
                _ => {}
            },
        }
    }

    fn submit_service_group(&mut self, command: packets::PacketBytes) -> Result<(), ErrorCode> {
        self.ring.submit_service(
            command,
            self.constants.service_mode_reset_repeats,
            self.constants.service_mode_command_repeats,
            Some(self.service_done),
        )
    }

    fn on_service_done(&mut self) {
        match self.session.take() {
            None => {}
            Some(CvSession::Write) => {}
            Some(CvSession::ReadBit {
                cv,
                bit,
                mut assembled,
                confirmed,
            }) => {
                if confirmed {
                    assembled |= 1 << bit;
                }
                if bit < 7 {
                    match packets::service_verify_bit(cv, bit + 1, 1)
                        .and_then(|probe| self.submit_service_group(probe))
                    {
                        Ok(()) => {
                            self.session = Some(CvSession::ReadBit {
                                cv,
                                bit: bit + 1,
                                assembled,
                                confirmed: false,
                            });
                        }
                        Err(code) => self.errors.log(code, cv),
                    }
                } else {
                    match packets::service_verify_byte(cv, assembled)
                        .and_then(|verify| self.submit_service_group(verify))
                    {
                        Ok(()) => {
                            self.session = Some(CvSession::ReadVerify {
                                cv,
                                value: assembled,
                                confirmed: false,
                            });
                        }
                        Err(code) => self.errors.log(code, cv),
                    }
                }
            }
            Some(CvSession::ReadVerify {
                cv,
                value,
                confirmed,
            }) => {
                self.read_result = Some(CvReadResult {
                    cv,
                    value,
                    verified: confirmed,
                });
            }
        }
    }

    // ------------------------------------------------------------------
    // The DCC API.
    // ------------------------------------------------------------------

    /// Set a mobile decoder's speed and direction.
    ///
    /// The packet becomes (or refreshes) a persistent hold for the
    /// address, transmitted `transient_command_repeats` times and then
    /// parked until the next update.
    pub fn set_speed(
        &mut self,
        address: u16,
        speed: u8,
        direction: Direction,
    ) -> Result<(), ErrorCode> {
        let bytes = packets::speed_and_direction(address, speed, direction)?;
        self.ring.submit(Submission {
            priority: Priority::Mobile,
            address,
            action: Action::Speed { speed, direction },
            bytes,
            preamble: bitstream::SHORT_PREAMBLE,
            repeats: self.constants.transient_command_repeats,
            persistent: true,
            done: None,
        })?;
        Ok(())
    }

    /// Set a mobile decoder function on or off.
    pub fn set_function(&mut self, address: u16, function: u8, on: bool) -> Result<(), ErrorCode> {
        if function > packets::MAX_FUNCTION {
            return Err(ErrorCode::InvalidFunctionNumber);
        }
        let mut image = self.functions.image(address);
        if on {
            image |= 1 << function;
        } else {
            image &= !(1 << function);
        }
        let bytes = packets::function_state(address, function, image)?;
        self.ring.submit(Submission {
            priority: Priority::Transient,
            address,
            action: Action::Function { function, on },
            bytes,
            preamble: bitstream::SHORT_PREAMBLE,
            repeats: self.constants.transient_command_repeats,
            persistent: false,
            done: None,
        })?;
        self.functions.apply(address, function, on);
        Ok(())
    }

    /// Switch an accessory output.
    pub fn set_accessory(&mut self, address: u16, on: bool) -> Result<(), ErrorCode> {
        let bytes = packets::accessory_state(address, on)?;
        self.ring.submit(Submission {
            priority: Priority::Accessory,
            address,
            action: Action::Accessory { on },
            bytes,
            preamble: bitstream::SHORT_PREAMBLE,
            repeats: self.constants.transient_command_repeats,
            persistent: false,
            done: None,
        })?;
        Ok(())
    }

    /// Enable or disable a district.
    pub fn power(&mut self, district: u8, on: bool) -> Result<(), ErrorCode> {
        if on {
            let now = self.clock.now();
            self.districts.power_on(district, now)
        } else {
            self.districts.power_off(district)
        }
    }

    fn check_service_ready(&self) -> Result<(), ErrorCode> {
        if self.session.is_some() {
            return Err(ErrorCode::TransmissionBusy);
        }
        if !self.districts.programming_active() {
            return Err(ErrorCode::NoProgrammingTrack);
        }
        Ok(())
    }

    /// Write a CV in service mode (programming track required).
    pub fn write_cv(&mut self, cv: u16, value: u8) -> Result<(), ErrorCode> {
        self.check_service_ready()?;
        let command = packets::service_write_byte(cv, value)?;
        self.submit_service_group(command)?;
        self.session = Some(CvSession::Write);
        Ok(())
    }

    /// Start a service-mode CV read.
    ///
    /// The read proceeds asynchronously: eight verify-bit transactions
    /// watched through the load-delta confirmation signal, then one
    /// verify-byte pass over the assembled value. The outcome is collected
    /// with [`take_cv_read_result`](Self::take_cv_read_result).
    pub fn read_cv(&mut self, cv: u16) -> Result<(), ErrorCode> {
        self.check_service_ready()?;
        let probe = packets::service_verify_bit(cv, 0, 1)?;
        self.submit_service_group(probe)?;
        self.read_result = None;
        self.session = Some(CvSession::ReadBit {
            cv,
            bit: 0,
            assembled: 0,
            confirmed: false,
        });
        Ok(())
    }

    /// Collect the result of a finished CV read, if one is ready.
    pub fn take_cv_read_result(&mut self) -> Option<CvReadResult> {
        self.read_result.take()
    }

    /// True while a service-mode session is in flight.
    pub fn service_busy(&self) -> bool {
        self.session.is_some()
    }

    /// Set a tunable constant and re-persist the block.
    pub fn set_constant(&mut self, name: &str, value: u16) -> Result<(), ErrorCode> {
        self.constants.set_named(name, value)?;
        constants::save(&self.constants, &mut self.storage);
        // Interval constants feed the clock events; re-arm them.
        self.clock.cancel(self.display_signal);
        self.clock.cancel(self.stats_signal);
        let armed = self.clock.delay_event(
            self.constants.line_refresh_interval as u32,
            self.display_signal,
            true,
        ) && self.clock.delay_event(
            self.constants.periodic_interval as u32,
            self.stats_signal,
            true,
        );
        if !armed {
            self.errors.log(ErrorCode::QueueOverflow, 0);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Console surface.
    // ------------------------------------------------------------------

    /// Execute one console line and produce the reply.
    pub fn console_line(&mut self, line: &str) -> Reply {
        if self.errors.faulted() {
            return console::err_reply(ErrorCode::Abort);
        }
        let command = match console::parse(line) {
            Ok(command) => command,
            Err(code) => {
                self.errors.log(code, 0);
                return console::err_reply(code);
            }
        };
        let result = match command {
            Command::SetSpeed {
                address,
                speed,
                direction,
            } => self.set_speed(address, speed, direction),
            Command::SetFunction {
                address,
                function,
                on,
            } => self.set_function(address, function, on),
            Command::SetAccessory { address, on } => self.set_accessory(address, on),
            Command::WriteCv { cv, value } => self.write_cv(cv, value),
            Command::ReadCv { cv } => self.read_cv(cv),
            Command::Power { district, on } => self.power(district, on),
            Command::SetConstant { name, value } => self.set_constant(name, value),
            Command::ListConstants => {
                let mut reply = Reply::new();
                let _ = reply.push_str("OK");
                let mut index = 0;
                while let Some((name, value)) = self.constants.get(index) {
                    match value {
                        ConstantValue::Word(w) => {
                            let _ = write!(reply, " {}={}", name, w);
                        }
                        ConstantValue::Byte(b) => {
                            let _ = write!(reply, " {}={}", name, b);
                        }
                    }
                    index += 1;
                }
                return reply;
            }
        };
        match result {
            Ok(()) => console::ok_reply(line),
            Err(code) => {
                self.errors.log(code, 0);
                console::err_reply(code)
            }
        }
    }

    // ------------------------------------------------------------------
    // State and diagnostics.
    // ------------------------------------------------------------------

    /// Snapshot of everything the display and remote UIs need.
    pub fn state(&self) -> StationState {
        let mut district_status = Vec::new();
        for district in 0..self.districts.count() {
            let _ = district_status.push(self.districts.status(district));
        }
        StationState {
            zone: self.districts.zone(),
            free_buffers: self.ring.free_buffers(),
            packets_per_second: self.packets_per_second,
            uptime_seconds: self.clock.uptime_seconds(),
            districts: district_status,
            faulted: self.errors.faulted(),
        }
    }

    /// The error log.
    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    /// Consume the oldest pending error.
    pub fn take_error(&mut self) -> Option<(ErrorCode, u16, u8)> {
        let error = self.errors.peek();
        if error.is_some() {
            self.errors.drop_error();
        }
        error
    }

    /// Raise a terminal fault, entering the diagnostic loop.
    pub fn fault(&mut self, code: ErrorCode, file: &'static str, line: u32) {
        self.errors.terminate(code, file, line);
    }

    /// The recently dispatched task trail.
    pub fn breadcrumbs(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.crumbs.recent()
    }

    /// Whether the constants block had to be reset at boot.
    pub fn constants_were_reset(&self) -> bool {
        self.constants_reset
    }

    /// The live constants.
    pub fn constants(&self) -> &Constants {
        &self.constants
    }

    /// District controller access for state queries.
    pub fn districts(&self) -> &Districts<B> {
        &self.districts
    }

    /// Display model access for panel assertions.
    pub fn hci(&self) -> &Hci<P> {
        &self.hci
    }

    /// Transmission ring access for scan queries.
    pub fn ring(&mut self) -> &mut BufferRing {
        &mut self.ring
    }

    /// Advance time coarsely (tests): `ms` milliseconds of clock plus the
    /// matching scheduler polls.
    #[cfg(any(test, feature = "std"))]
    pub fn run_for_ms(&mut self, ms: u32) {
        for _ in 0..ms {
            self.isr_millisecond();
            self.poll();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
