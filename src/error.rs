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

/// Configuration errors. Every edit that returns one of these leaves the session in its last
/// valid configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SequencerError {
    #[error("Step count {0} is outside 1..=32")]
    StepsOutOfRange(usize),

    #[error("Step index {index} is outside a {steps} step track")]
    StepIndexOutOfRange { index: usize, steps: usize },

    #[error("Velocity {0} is outside 0..=127")]
    VelocityOutOfRange(u8),

    #[error("MIDI note {0} is outside 0..=127")]
    MidiNoteOutOfRange(u8),

    #[error("Tempo {0} BPM must be a positive number")]
    InvalidBpm(f64),

    #[error("Envelope {param} must be a non-negative number, got {value}")]
    InvalidEnvelope { param: &'static str, value: f64 },

    #[error("Sustain level {0} is outside 0.0..=1.0")]
    InvalidSustain(f64),

    #[error("Gain {0} must be a non-negative number")]
    InvalidGain(f64),

    #[error("No track with id {0}")]
    UnknownTrack(usize),

    #[error("Super-grid of {lcm} ticks per bar exceeds the limit of {max}")]
    SuperGridTooLarge { lcm: u64, max: u64 },
}

/// A failure while handing one fired step to the trigger path. The clock logs these and skips
/// the offending track for that tick.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TriggerError {
    #[error("Scheduled time {0} is not a finite number")]
    NonFiniteTime(f64),

    #[error("Step {step} has no velocity on a {steps} step track")]
    MissingVelocity { step: usize, steps: usize },
}
