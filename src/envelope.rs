// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! ADSR gain envelopes anchored at a trigger time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SequencerError;
use crate::voice::GainControl;

/// How long the sustain level is held before the release starts, in seconds.
pub const SUSTAIN_DWELL: f64 = 0.05;

/// Attack, decay, sustain and release of a track's envelope. Times are in seconds and sustain is
/// a level relative to the peak.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct Adsr {
    pub attack: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
}

impl Default for Adsr {
    fn default() -> Self {
        Adsr {
            attack: 0.001,
            decay: 0.1,
            sustain: 0.8,
            release: 0.2,
        }
    }
}

impl Adsr {
    /// Checks every stage. Times must be finite and non-negative, sustain must lie in 0..=1.
    pub fn validate(&self) -> Result<(), SequencerError> {
        for param in [AdsrParam::Attack, AdsrParam::Decay, AdsrParam::Release] {
            let value = self.get(param);
            if !value.is_finite() || value < 0.0 {
                return Err(SequencerError::InvalidEnvelope {
                    param: param.name(),
                    value,
                });
            }
        }
        if !(0.0..=1.0).contains(&self.sustain) {
            return Err(SequencerError::InvalidSustain(self.sustain));
        }
        Ok(())
    }

    /// Gets a single stage.
    pub fn get(&self, param: AdsrParam) -> f64 {
        match param {
            AdsrParam::Attack => self.attack,
            AdsrParam::Decay => self.decay,
            AdsrParam::Sustain => self.sustain,
            AdsrParam::Release => self.release,
        }
    }

    /// Returns a copy with one stage replaced, or an error if the result would be invalid.
    pub fn with(&self, param: AdsrParam, value: f64) -> Result<Adsr, SequencerError> {
        let mut adsr = *self;
        match param {
            AdsrParam::Attack => adsr.attack = value,
            AdsrParam::Decay => adsr.decay = value,
            AdsrParam::Sustain => adsr.sustain = value,
            AdsrParam::Release => adsr.release = value,
        }
        adsr.validate()?;
        Ok(adsr)
    }
}

/// One stage of an [`Adsr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdsrParam {
    Attack,
    Decay,
    Sustain,
    Release,
}

impl AdsrParam {
    pub fn name(&self) -> &'static str {
        match self {
            AdsrParam::Attack => "attack",
            AdsrParam::Decay => "decay",
            AdsrParam::Sustain => "sustain",
            AdsrParam::Release => "release",
        }
    }
}

impl fmt::Display for AdsrParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AdsrParam {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "a" | "attack" => Ok(AdsrParam::Attack),
            "d" | "decay" => Ok(AdsrParam::Decay),
            "s" | "sustain" => Ok(AdsrParam::Sustain),
            "r" | "release" => Ok(AdsrParam::Release),
            other => Err(format!("unknown envelope parameter: {}", other)),
        }
    }
}

/// Converts a raw 0-127 velocity into a 0-1 gain.
pub fn normalized_velocity(velocity: u8) -> f32 {
    f32::from(velocity.min(127)) / 127.0
}

/// Installs envelopes on voice gain controls.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeShaper {
    dwell: f64,
}

impl Default for EnvelopeShaper {
    fn default() -> Self {
        EnvelopeShaper {
            dwell: SUSTAIN_DWELL,
        }
    }
}

impl EnvelopeShaper {
    /// Creates a shaper that holds the sustain level for `dwell` seconds.
    pub fn new(dwell: f64) -> EnvelopeShaper {
        EnvelopeShaper {
            dwell: dwell.max(0.0),
        }
    }

    /// Schedules a full envelope starting at `at` and returns the time the voice falls silent.
    ///
    /// Every point is computed from `at`, so applying the same trigger twice leaves the gain
    /// control in the same state as applying it once.
    pub fn apply(
        &self,
        gain: &mut GainControl,
        at: f64,
        velocity: f32,
        track_gain: f32,
        adsr: &Adsr,
    ) -> f64 {
        let peak = velocity * track_gain;
        let sustain = peak * adsr.sustain as f32;

        let attack_end = at + adsr.attack;
        let decay_end = attack_end + adsr.decay;
        let hold_end = decay_end + self.dwell;
        let release_end = hold_end + adsr.release;

        gain.cancel_from(at);
        gain.set_value_at(0.0, at);
        gain.linear_ramp_to(peak, attack_end);
        gain.linear_ramp_to(sustain, decay_end);
        gain.linear_ramp_to(sustain, hold_end);
        gain.linear_ramp_to(0.0, release_end);

        release_end
    }
}
