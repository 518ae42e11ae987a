//! Hash-clock PLL configuration.
//!
//! The chips derive their hash clock from a 25 MHz crystal through a PLL with
//! four divider fields: a reference divider, a feedback multiplier, and two
//! cascaded post-dividers. The achieved frequency is
//!
//! ```text
//! f = 25 MHz * fb_divider / (ref_divider * postdiv1 * postdiv2)
//! ```
//!
//! Not every target is reachable, so [`PllParams::solve`] searches the
//! divider space for an exact hit and reports failure otherwise. Frequency
//! changes are applied as a ramp of small steps rather than one jump; see
//! [`ramp_steps`].

use crate::tracing::prelude::*;

/// Crystal frequency feeding the PLL, in MHz.
pub const REF_CLOCK_MHZ: f64 = 25.0;

/// Granularity of frequency ramps, in MHz.
pub const RAMP_STEP_MHZ: f64 = 6.25;

/// A solved divider must land within this distance of the target, in MHz.
const MAX_FREQ_ERROR_MHZ: f64 = 0.001;

/// Feedback divider hardware range.
const FB_DIVIDER_MIN: u32 = 0xA0;
const FB_DIVIDER_MAX: u32 = 0xEF;

/// VCO frequency (MHz) at which the high-range flag must be set.
const VCO_HIGH_RANGE_MHZ: f64 = 2400.0;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PllError {
    #[error("no divider combination reaches {0} MHz")]
    Unachievable(f64),
}

/// One solved PLL configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PllParams {
    pub fb_divider: u32,
    pub ref_divider: u32,
    pub postdiv1: u32,
    pub postdiv2: u32,
}

impl PllParams {
    /// Search the divider space for an exact solution for `target_mhz`.
    ///
    /// Reference divider 2 is tried before 1 (halving the comparison
    /// frequency doubles the usable feedback range), and post-dividers are
    /// scanned downward with `postdiv1 >= postdiv2`. Among exact hits the
    /// combination with the smallest post-divider product wins, which keeps
    /// the VCO as low as the target allows.
    pub fn solve(target_mhz: f64) -> Result<Self, PllError> {
        let mut best: Option<PllParams> = None;

        for ref_divider in [2u32, 1] {
            for postdiv1 in (1..=7u32).rev() {
                for postdiv2 in (1..=postdiv1).rev() {
                    let divisor = f64::from(ref_divider * postdiv1 * postdiv2);
                    let fb_divider = (target_mhz * divisor / REF_CLOCK_MHZ).round() as u32;
                    if !(FB_DIVIDER_MIN..=FB_DIVIDER_MAX).contains(&fb_divider) {
                        continue;
                    }

                    let achieved = f64::from(fb_divider) * REF_CLOCK_MHZ / divisor;
                    if (achieved - target_mhz).abs() >= MAX_FREQ_ERROR_MHZ {
                        continue;
                    }

                    let better = match &best {
                        None => true,
                        Some(b) => postdiv1 * postdiv2 < b.postdiv1 * b.postdiv2,
                    };
                    if better {
                        best = Some(PllParams {
                            fb_divider,
                            ref_divider,
                            postdiv1,
                            postdiv2,
                        });
                    }
                }
            }
        }

        best.ok_or(PllError::Unachievable(target_mhz))
    }

    /// The frequency this configuration actually produces, in MHz.
    pub fn achieved_mhz(&self) -> f64 {
        f64::from(self.fb_divider) * REF_CLOCK_MHZ
            / f64::from(self.ref_divider * self.postdiv1 * self.postdiv2)
    }

    /// VCO frequency before the post-dividers, in MHz.
    pub fn vco_mhz(&self) -> f64 {
        f64::from(self.fb_divider) * REF_CLOCK_MHZ / f64::from(self.ref_divider)
    }

    /// The 32-bit PLL register image, ready for a register write.
    ///
    /// Byte 0 carries the enable bits plus the VCO range flag, then the
    /// feedback divider, the reference divider, and the packed post-dividers.
    pub fn register_value(&self) -> [u8; 4] {
        let range = if self.vco_mhz() >= VCO_HIGH_RANGE_MHZ {
            0x50
        } else {
            0x40
        };
        [
            range,
            self.fb_divider as u8,
            self.ref_divider as u8,
            ((self.postdiv1 as u8) << 4) | self.postdiv2 as u8,
        ]
    }
}

/// Intermediate frequencies for a ramp from `current_mhz` to `target_mhz`.
///
/// Steps move by [`RAMP_STEP_MHZ`] toward the target and always end exactly
/// on it. The caller writes the PLL register at each step and lets the clock
/// settle in between. An already-reached target yields no steps.
pub fn ramp_steps(current_mhz: f64, target_mhz: f64) -> Vec<f64> {
    let mut steps = Vec::new();
    let delta = target_mhz - current_mhz;
    if delta.abs() < MAX_FREQ_ERROR_MHZ {
        return steps;
    }

    // Land on the 6.25 MHz grid first, then walk it until the target is one
    // short step (or less) away.
    let step = RAMP_STEP_MHZ.copysign(delta);
    let mut at = if delta > 0.0 {
        (current_mhz / RAMP_STEP_MHZ).floor() * RAMP_STEP_MHZ + RAMP_STEP_MHZ
    } else {
        (current_mhz / RAMP_STEP_MHZ).ceil() * RAMP_STEP_MHZ - RAMP_STEP_MHZ
    };
    while (target_mhz - at) * step.signum() > MAX_FREQ_ERROR_MHZ {
        steps.push(at);
        at += step;
    }
    steps.push(target_mhz);

    if !steps.is_empty() {
        debug!(
            from = current_mhz,
            to = target_mhz,
            steps = steps.len(),
            "Planned frequency ramp"
        );
    }
    steps
}
