//! The configuration-variable database and the update planner.
//!
//! Decoder CVs are raw bytes; what operators actually adjust are logical
//! values - "the long address", "the acceleration rate" - that map onto
//! bit fields inside one or more CVs. The static table here captures that
//! mapping for the standard NMRA variables plus the ZIMO sound-decoder
//! block, and the [`ChangeSet`] planner turns a batch of logical edits into
//! the minimal list of per-CV changes:
//!
//! 1. Resolve each edit by name; reject unknown, read-only, or
//!    out-of-range values.
//! 2. Split the value LSB-first across the variable's element chain
//!    (`combined`) or address one indexed element (arrays).
//! 3. Coalesce every touched bit into one [`CvChange`] per CV - a CV is
//!    never listed twice.
//! 4. Inject the variable's enabling updates (e.g. switching to a long
//!    address also rewrites CV17's top bits, CV1, and CV29 bit 5) so
//!    dependent bits land in the same session.
//!
//! # Example
//!
//! ```rust
//! use dcc_station::cvdb::{self, ChangeSet};
//!
//! let mut set: ChangeSet<8> = ChangeSet::new();
//! set.apply_named("long_address", 2000).unwrap();
//!
//! // CV18, CV17, CV1 and CV29 are each touched exactly once.
//! assert_eq!(set.changes().len(), 4);
//! let cv17 = set.changes().iter().find(|c| c.cv == 17).unwrap();
//! assert_eq!(cv17.value, 0xC7);
//! ```

use crate::errors::ErrorCode;
use heapless::Vec;

/// A contiguous bit field inside one CV.
#[derive(Clone, Copy, Debug)]
pub struct CvElement {
    /// CV number, 1-based.
    pub cv: u16,
    /// Field width in bits.
    pub bits: u8,
    /// Least significant bit position.
    pub lsb: u8,
}

/// One prescribed companion write for an enabling sequence.
#[derive(Clone, Copy, Debug)]
pub struct CvUpdate {
    /// Where the companion value goes.
    pub target: &'static [CvElement],
    /// The value to write there.
    pub value: u16,
}

/// A named logical decoder value.
#[derive(Debug)]
pub struct CvValue {
    /// Operator-facing name.
    pub name: &'static str,
    /// Writable variables can be changed; the rest are read-only.
    pub writable: bool,
    /// `true`: one value spread LSB-first over the element chain.
    /// `false`: an array of independent values, index-aligned.
    pub combined: bool,
    /// Lowest accepted value, inclusive.
    pub min: u16,
    /// Highest accepted value, inclusive.
    pub max: u16,
    /// Where the value lives.
    pub elements: &'static [CvElement],
    /// Companion writes required for this value to take effect.
    pub updates: &'static [CvUpdate],
}

/// A pending change against a single CV: which bits, and their new values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CvChange {
    /// CV number.
    pub cv: u16,
    /// Bits being changed.
    pub mask: u8,
    /// New values for the bits in `mask`.
    pub value: u8,
}

// ----------------------------------------------------------------------
// Element definitions. Combined values list the LSB element first.
// ----------------------------------------------------------------------

const CV1_06: &[CvElement] = &[CvElement { cv: 1, bits: 7, lsb: 0 }];
const CV1_7: &[CvElement] = &[CvElement { cv: 1, bits: 1, lsb: 7 }];
const CV2_07: &[CvElement] = &[CvElement { cv: 2, bits: 8, lsb: 0 }];
const CV3_07: &[CvElement] = &[CvElement { cv: 3, bits: 8, lsb: 0 }];
const CV4_07: &[CvElement] = &[CvElement { cv: 4, bits: 8, lsb: 0 }];
const CV5_07: &[CvElement] = &[CvElement { cv: 5, bits: 8, lsb: 0 }];
const CV6_07: &[CvElement] = &[CvElement { cv: 6, bits: 8, lsb: 0 }];
const CV7_07: &[CvElement] = &[CvElement { cv: 7, bits: 8, lsb: 0 }];
const CV8_07: &[CvElement] = &[CvElement { cv: 8, bits: 8, lsb: 0 }];
const CV9_07: &[CvElement] = &[CvElement { cv: 9, bits: 8, lsb: 0 }];
const CV10_07: &[CvElement] = &[CvElement { cv: 10, bits: 8, lsb: 0 }];
const CV11_07: &[CvElement] = &[CvElement { cv: 11, bits: 8, lsb: 0 }];
const CV12_07: &[CvElement] = &[CvElement { cv: 12, bits: 8, lsb: 0 }];
const CV17_67: &[CvElement] = &[CvElement { cv: 17, bits: 2, lsb: 6 }];
const CV18_07_CV17_05: &[CvElement] = &[
    CvElement { cv: 18, bits: 8, lsb: 0 },
    CvElement { cv: 17, bits: 6, lsb: 0 },
];
const CV19_06: &[CvElement] = &[CvElement { cv: 19, bits: 7, lsb: 0 }];
const CV19_7: &[CvElement] = &[CvElement { cv: 19, bits: 1, lsb: 7 }];
const CV23_06: &[CvElement] = &[CvElement { cv: 23, bits: 7, lsb: 0 }];
const CV23_7: &[CvElement] = &[CvElement { cv: 23, bits: 1, lsb: 7 }];
const CV24_06: &[CvElement] = &[CvElement { cv: 24, bits: 7, lsb: 0 }];
const CV24_7: &[CvElement] = &[CvElement { cv: 24, bits: 1, lsb: 7 }];
const CV25_07: &[CvElement] = &[CvElement { cv: 25, bits: 8, lsb: 0 }];
const CV29_0: &[CvElement] = &[CvElement { cv: 29, bits: 1, lsb: 0 }];
const CV29_1: &[CvElement] = &[CvElement { cv: 29, bits: 1, lsb: 1 }];
const CV29_2: &[CvElement] = &[CvElement { cv: 29, bits: 1, lsb: 2 }];
const CV29_3: &[CvElement] = &[CvElement { cv: 29, bits: 1, lsb: 3 }];
const CV29_4: &[CvElement] = &[CvElement { cv: 29, bits: 1, lsb: 4 }];
const CV29_5: &[CvElement] = &[CvElement { cv: 29, bits: 1, lsb: 5 }];
const CV29_7: &[CvElement] = &[CvElement { cv: 29, bits: 1, lsb: 7 }];
const CV65_07: &[CvElement] = &[CvElement { cv: 65, bits: 8, lsb: 0 }];
const CV66_07: &[CvElement] = &[CvElement { cv: 66, bits: 8, lsb: 0 }];
const CV67_CV94: &[CvElement] = &[
    CvElement { cv: 67, bits: 8, lsb: 0 },
    CvElement { cv: 68, bits: 8, lsb: 0 },
    CvElement { cv: 69, bits: 8, lsb: 0 },
    CvElement { cv: 70, bits: 8, lsb: 0 },
    CvElement { cv: 71, bits: 8, lsb: 0 },
    CvElement { cv: 72, bits: 8, lsb: 0 },
    CvElement { cv: 73, bits: 8, lsb: 0 },
    CvElement { cv: 74, bits: 8, lsb: 0 },
    CvElement { cv: 75, bits: 8, lsb: 0 },
    CvElement { cv: 76, bits: 8, lsb: 0 },
    CvElement { cv: 77, bits: 8, lsb: 0 },
    CvElement { cv: 78, bits: 8, lsb: 0 },
    CvElement { cv: 79, bits: 8, lsb: 0 },
    CvElement { cv: 80, bits: 8, lsb: 0 },
    CvElement { cv: 81, bits: 8, lsb: 0 },
    CvElement { cv: 82, bits: 8, lsb: 0 },
    CvElement { cv: 83, bits: 8, lsb: 0 },
    CvElement { cv: 84, bits: 8, lsb: 0 },
    CvElement { cv: 85, bits: 8, lsb: 0 },
    CvElement { cv: 86, bits: 8, lsb: 0 },
    CvElement { cv: 87, bits: 8, lsb: 0 },
    CvElement { cv: 88, bits: 8, lsb: 0 },
    CvElement { cv: 89, bits: 8, lsb: 0 },
    CvElement { cv: 90, bits: 8, lsb: 0 },
    CvElement { cv: 91, bits: 8, lsb: 0 },
    CvElement { cv: 92, bits: 8, lsb: 0 },
    CvElement { cv: 93, bits: 8, lsb: 0 },
    CvElement { cv: 94, bits: 8, lsb: 0 },
];
const CV95_07: &[CvElement] = &[CvElement { cv: 95, bits: 8, lsb: 0 }];

// Enabling sequences for the two address forms. Switching forms touches
// CV17/18, the CV1 short address, and the extended-address flag together.
const SET_SHORT_ADDRESS: &[CvUpdate] = &[
    CvUpdate { target: CV17_67, value: 0 },
    CvUpdate { target: CV1_7, value: 0 },
    CvUpdate { target: CV29_5, value: 0 },
    CvUpdate { target: CV18_07_CV17_05, value: 3 },
];
const SET_LONG_ADDRESS: &[CvUpdate] = &[
    CvUpdate { target: CV17_67, value: 3 },
    CvUpdate { target: CV1_7, value: 0 },
    CvUpdate { target: CV1_06, value: 3 },
    CvUpdate { target: CV29_5, value: 1 },
];

macro_rules! zimo_cv {
    ($cv:expr) => {
        &[CvElement { cv: $cv, bits: 8, lsb: 0 }]
    };
}

macro_rules! value {
    ($name:literal, $writable:expr, $combined:expr, $min:expr, $max:expr, $elements:expr) => {
        CvValue {
            name: $name,
            writable: $writable,
            combined: $combined,
            min: $min,
            max: $max,
            elements: $elements,
            updates: &[],
        }
    };
    ($name:literal, $writable:expr, $combined:expr, $min:expr, $max:expr, $elements:expr, $updates:expr) => {
        CvValue {
            name: $name,
            writable: $writable,
            combined: $combined,
            min: $min,
            max: $max,
            elements: $elements,
            updates: $updates,
        }
    };
}

/// The logical configuration values, by name.
pub static CV_VARIABLES: &[CvValue] = &[
    // Standard definitions and actions.
    value!("short_address", true, true, 1, 127, CV1_06, SET_SHORT_ADDRESS),
    value!("power_select", true, true, 0, 1, CV1_7),
    value!("v_start", true, true, 0, 255, CV2_07),
    value!("acceleration", true, true, 0, 255, CV3_07),
    value!("deceleration", true, true, 0, 255, CV4_07),
    value!("v_high", true, true, 0, 255, CV5_07),
    value!("v_mid", true, true, 0, 255, CV6_07),
    value!("manufacturer_model", false, true, 0, 255, CV7_07),
    value!("manufacturer_id", false, true, 0, 255, CV8_07),
    // Writing 8 to CV8 factory-resets the decoder.
    value!("reset8", true, true, 8, 8, CV8_07),
    value!("pwm_period", true, true, 0, 255, CV9_07),
    value!("bemf_cutoff", true, true, 0, 255, CV10_07),
    value!("timeout", true, true, 0, 255, CV11_07),
    value!("alt_power_source", true, true, 0, 255, CV12_07),
    value!("long_address", true, true, 1, 10239, CV18_07_CV17_05, SET_LONG_ADDRESS),
    value!("consist_address", true, true, 0, 127, CV19_06),
    value!("consist_direction", true, true, 0, 1, CV19_7),
    value!("accel_adjust", true, true, 0, 127, CV23_06),
    value!("accel_sign", true, true, 0, 1, CV23_7),
    value!("decel_adjust", true, true, 0, 127, CV24_06),
    value!("decel_sign", true, true, 0, 1, CV24_7),
    value!("alt_speed_table", true, true, 0, 255, CV25_07),
    value!("direction", true, true, 0, 1, CV29_0),
    value!("light_control", true, true, 0, 1, CV29_1),
    value!("power_source", true, true, 0, 1, CV29_2),
    value!("bidirectional_comms", true, true, 0, 1, CV29_3),
    value!("user_speed_table", true, true, 0, 1, CV29_4),
    value!("extended_address", true, true, 0, 1, CV29_5),
    value!("decoder_type", false, true, 0, 1, CV29_7),
    value!("kick_start", true, true, 0, 255, CV65_07),
    value!("forward_trim", true, true, 0, 255, CV66_07),
    value!("speed_table", true, false, 0, 255, CV67_CV94),
    value!("reverse_trim", true, true, 0, 255, CV95_07),
    // ZIMO sound decoder block.
    value!("z_loco_type", true, true, 0, 255, zimo_cv!(265)),
    value!("z_total_vol", true, true, 0, 255, zimo_cv!(266)),
    value!("z_chuff_freq", true, true, 0, 255, zimo_cv!(267)),
    value!("z_cam_sensor", true, true, 0, 255, zimo_cv!(268)),
    value!("z_lead_chuff", true, true, 0, 255, zimo_cv!(269)),
    value!("z_slow_chuff", true, true, 0, 255, zimo_cv!(270)),
    value!("z_fast_chuff", true, true, 0, 255, zimo_cv!(271)),
    value!("z_blowoff_duration", true, true, 0, 255, zimo_cv!(272)),
    value!("z_blowoff_delay", true, true, 0, 255, zimo_cv!(273)),
    value!("z_blowoff_schedule", true, true, 0, 255, zimo_cv!(274)),
    value!("z_slow_chuff_vol", true, true, 0, 255, zimo_cv!(275)),
    value!("z_fast_chuff_vol", true, true, 0, 255, zimo_cv!(276)),
    value!("z_chuff_vol_adjust", true, true, 0, 255, zimo_cv!(277)),
    value!("z_load_threshold", true, true, 0, 255, zimo_cv!(278)),
    value!("z_load_reaction", true, true, 0, 255, zimo_cv!(279)),
    value!("z_load_influence_diesel", true, true, 0, 255, zimo_cv!(280)),
    value!("z_load_accl_threshold", true, true, 0, 255, zimo_cv!(281)),
    value!("z_load_accl_duration", true, true, 0, 255, zimo_cv!(282)),
    value!("z_full_accl_vol", true, true, 0, 255, zimo_cv!(283)),
    value!("z_decl_threshold", true, true, 0, 255, zimo_cv!(284)),
    value!("z_decl_vol_duration", true, true, 0, 255, zimo_cv!(285)),
    value!("z_decl_vol", true, true, 0, 255, zimo_cv!(286)),
    value!("z_brake_squeal_threshold", true, true, 0, 255, zimo_cv!(287)),
    value!("z_brake_squeal_enabled_after", true, true, 0, 255, zimo_cv!(288)),
    value!("z_thyristor_step_pitch", true, true, 0, 255, zimo_cv!(289)),
    value!("z_thyristor_medium_pitch", true, true, 0, 255, zimo_cv!(290)),
    value!("z_thyristor_maximum_pitch", true, true, 0, 255, zimo_cv!(291)),
    value!("z_thyristor_pitch_inc_speed", true, true, 0, 255, zimo_cv!(292)),
    value!("z_thyristor_steady_vol", true, true, 0, 255, zimo_cv!(293)),
    value!("z_thyristor_accl_vol", true, true, 0, 255, zimo_cv!(294)),
    value!("z_thyristor_decl_vol", true, true, 0, 255, zimo_cv!(295)),
    value!("z_motor_full_vol", true, true, 0, 255, zimo_cv!(296)),
    value!("z_motor_min_vol_speed", true, true, 0, 255, zimo_cv!(297)),
    value!("z_motor_full_vol_speed", true, true, 0, 255, zimo_cv!(298)),
    value!("z_motor_speed_pitch", true, true, 0, 255, zimo_cv!(299)),
];

/// Look up a logical value by name.
pub fn find(name: &str) -> Option<&'static CvValue> {
    CV_VARIABLES.iter().find(|v| v.name == name)
}

/// A coalescing set of pending CV changes.
///
/// `N` bounds how many distinct CVs one batch may touch; exceeding it fails
/// with [`QueueOverflow`](ErrorCode::QueueOverflow) so the caller can split
/// the batch.
pub struct ChangeSet<const N: usize = 16> {
    changes: Vec<CvChange, N>,
}

impl<const N: usize> ChangeSet<N> {
    /// Create an empty change set.
    pub fn new() -> Self {
        Self {
            changes: Vec::new(),
        }
    }

    /// The coalesced changes, in first-touch order.
    pub fn changes(&self) -> &[CvChange] {
        &self.changes
    }

    /// Discard all pending changes.
    pub fn clear(&mut self) {
        self.changes.clear();
    }

    /// Record one bit of one CV, coalescing with any existing change.
    pub fn set_bit(&mut self, cv: u16, bit: u8, value: bool) -> Result<(), ErrorCode> {
        if let Some(change) = self.changes.iter_mut().find(|c| c.cv == cv) {
            change.mask |= 1 << bit;
            if value {
                change.value |= 1 << bit;
            } else {
                change.value &= !(1 << bit);
            }
            return Ok(());
        }
        self.changes
            .push(CvChange {
                cv,
                mask: 1 << bit,
                value: if value { 1 << bit } else { 0 },
            })
            .map_err(|_| ErrorCode::QueueOverflow)
    }

    /// Spread `value` LSB-first across an element chain.
    fn apply_elements(
        &mut self,
        elements: &[CvElement],
        mut value: u16,
    ) -> Result<(), ErrorCode> {
        for element in elements {
            for offset in 0..element.bits {
                self.set_bit(element.cv, element.lsb + offset, value & 1 != 0)?;
                value >>= 1;
            }
        }
        Ok(())
    }

    fn apply_value(&mut self, variable: &CvValue, value: u16) -> Result<(), ErrorCode> {
        if !variable.writable {
            return Err(ErrorCode::InvalidState);
        }
        if value < variable.min || value > variable.max {
            return Err(ErrorCode::InvalidWordValue);
        }
        self.apply_elements(variable.elements, value)?;
        for update in variable.updates {
            self.apply_elements(update.target, update.value)?;
        }
        Ok(())
    }

    /// Plan an edit of a combined logical value.
    pub fn apply(&mut self, variable: &CvValue, value: u16) -> Result<(), ErrorCode> {
        if !variable.combined {
            return Err(ErrorCode::InvalidState);
        }
        self.apply_value(variable, value)
    }

    /// Plan an edit of one slot of an array value (e.g. the speed table).
    pub fn apply_indexed(
        &mut self,
        variable: &CvValue,
        index: usize,
        value: u16,
    ) -> Result<(), ErrorCode> {
        if variable.combined || index >= variable.elements.len() {
            return Err(ErrorCode::InvalidState);
        }
        if !variable.writable {
            return Err(ErrorCode::InvalidState);
        }
        if value < variable.min || value > variable.max {
            return Err(ErrorCode::InvalidWordValue);
        }
        self.apply_elements(&variable.elements[index..index + 1], value)
    }

    /// Plan an edit by variable name.
    pub fn apply_named(&mut self, name: &str, value: u16) -> Result<(), ErrorCode> {
        let variable = find(name).ok_or(ErrorCode::InvalidCvNumber)?;
        self.apply(variable, value)
    }
}

impl<const N: usize> Default for ChangeSet<N> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
