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

use std::fmt;

use crate::envelope::Adsr;
use crate::error::SequencerError;
use crate::pattern::{self, Pattern};
use crate::samples::SampleRef;

/// Shortest allowed track.
pub const MIN_STEPS: usize = 1;
/// Longest allowed track.
pub const MAX_STEPS: usize = 32;
/// Velocity given to new steps.
pub const DEFAULT_VELOCITY: u8 = 100;
/// MIDI note used on export when a track does not name one (GM bass drum).
pub const DEFAULT_MIDI_NOTE: u8 = 36;

/// Position of a track within its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackId(pub usize);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Track {}", self.0 + 1)
    }
}

/// One rhythmic voice.
///
/// The pattern is always derived from steps, pulses and offset, except for manual toggles,
/// which hold until the next regeneration. Pattern and velocity always have `steps` entries.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    name: String,
    steps: usize,
    pulses: usize,
    offset: usize,
    pattern: Pattern,
    velocity: Vec<u8>,
    adsr: Adsr,
    gain: f32,
    sample: SampleRef,
    midi_note: u8,
}

impl Track {
    /// Creates a track. Pulses and offset are clamped into range; steps outside 1..=32 are
    /// rejected.
    pub fn new(
        name: &str,
        steps: usize,
        pulses: usize,
        offset: usize,
        sample: SampleRef,
    ) -> Result<Track, SequencerError> {
        check_steps(steps)?;
        let mut track = Track {
            name: name.to_string(),
            steps,
            pulses: pulses.min(steps),
            offset: offset.min(steps - 1),
            pattern: Vec::new(),
            velocity: vec![DEFAULT_VELOCITY; steps],
            adsr: Adsr::default(),
            gain: 1.0,
            sample,
            midi_note: DEFAULT_MIDI_NOTE,
        };
        track.regenerate();
        Ok(track)
    }

    fn regenerate(&mut self) {
        self.pattern = pattern::rotate(
            &pattern::generate(self.steps, self.pulses),
            self.offset as i64,
        );
    }

    /// Changes the cycle length. Pulses and offset are clamped to the new length, the pattern is
    /// regenerated (dropping manual toggles) and velocities are padded or truncated positionally.
    pub fn set_steps(&mut self, steps: usize) -> Result<(), SequencerError> {
        check_steps(steps)?;
        self.steps = steps;
        self.pulses = self.pulses.min(steps);
        self.offset = self.offset.min(steps - 1);
        self.velocity.resize(steps, DEFAULT_VELOCITY);
        self.regenerate();
        Ok(())
    }

    /// Changes the number of onsets, clamped to the step count.
    pub fn set_pulses(&mut self, pulses: usize) {
        self.pulses = pulses.min(self.steps);
        self.regenerate();
    }

    /// Changes the rotation, clamped to the step count.
    pub fn set_offset(&mut self, offset: usize) {
        self.offset = offset.min(self.steps - 1);
        self.regenerate();
    }

    /// Flips one step by hand. Pulses are left as they are.
    pub fn toggle_step(&mut self, index: usize) -> Result<(), SequencerError> {
        self.check_index(index)?;
        self.pattern[index] = !self.pattern[index];
        Ok(())
    }

    /// Returns true if step `index` is an onset. Out of range steps are never active.
    pub fn is_active(&self, index: usize) -> bool {
        self.pattern.get(index).copied().unwrap_or(false)
    }

    pub fn set_velocity(&mut self, index: usize, velocity: u8) -> Result<(), SequencerError> {
        self.check_index(index)?;
        if velocity > 127 {
            return Err(SequencerError::VelocityOutOfRange(velocity));
        }
        self.velocity[index] = velocity;
        Ok(())
    }

    pub fn velocity(&self, index: usize) -> Option<u8> {
        self.velocity.get(index).copied()
    }

    pub fn velocities(&self) -> &[u8] {
        &self.velocity
    }

    pub fn set_adsr(&mut self, adsr: Adsr) -> Result<(), SequencerError> {
        adsr.validate()?;
        self.adsr = adsr;
        Ok(())
    }

    pub fn set_gain(&mut self, gain: f32) -> Result<(), SequencerError> {
        if !gain.is_finite() || gain < 0.0 {
            return Err(SequencerError::InvalidGain(f64::from(gain)));
        }
        self.gain = gain;
        Ok(())
    }

    pub fn set_sample(&mut self, sample: SampleRef) {
        self.sample = sample;
    }

    pub fn set_midi_note(&mut self, note: u8) -> Result<(), SequencerError> {
        if note > 127 {
            return Err(SequencerError::MidiNoteOutOfRange(note));
        }
        self.midi_note = note;
        Ok(())
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    fn check_index(&self, index: usize) -> Result<(), SequencerError> {
        if index >= self.steps {
            return Err(SequencerError::StepIndexOutOfRange {
                index,
                steps: self.steps,
            });
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn pulses(&self) -> usize {
        self.pulses
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn pattern(&self) -> &[bool] {
        &self.pattern
    }

    pub fn adsr(&self) -> &Adsr {
        &self.adsr
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn sample(&self) -> &SampleRef {
        &self.sample
    }

    pub fn midi_note(&self) -> u8 {
        self.midi_note
    }
}

fn check_steps(steps: usize) -> Result<(), SequencerError> {
    if !(MIN_STEPS..=MAX_STEPS).contains(&steps) {
        return Err(SequencerError::StepsOutOfRange(steps));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(steps: usize, pulses: usize, offset: usize) -> Track {
        Track::new("test", steps, pulses, offset, SampleRef::library("kick")).unwrap()
    }

    fn assert_consistent(track: &Track) {
        assert_eq!(track.pattern().len(), track.steps());
        assert_eq!(track.velocities().len(), track.steps());
        assert!(track.pulses() <= track.steps());
        assert!(track.offset() < track.steps());
    }

    #[test]
    fn test_new_generates_rotated_pattern() {
        let t = track(8, 3, 1);
        assert_eq!(pattern::format(t.pattern()), "..x..x.x");
        assert_consistent(&t);

        assert_eq!(
            Track::new("bad", 0, 0, 0, SampleRef::library("kick")),
            Err(SequencerError::StepsOutOfRange(0))
        );
        assert!(Track::new("bad", 33, 0, 0, SampleRef::library("kick")).is_err());
    }

    #[test]
    fn test_set_steps_clamps() {
        let mut t = track(16, 10, 12);
        t.set_steps(8).unwrap();
        assert_eq!(t.pulses(), 8);
        assert_eq!(t.offset(), 7);
        assert_consistent(&t);

        assert_eq!(t.set_steps(40), Err(SequencerError::StepsOutOfRange(40)));
        assert_eq!(t.steps(), 8);
        assert_consistent(&t);
    }

    #[test]
    fn test_toggle_then_set_pulses_regenerates() {
        let mut t = track(8, 3, 0);
        t.toggle_step(1).unwrap();
        assert!(t.is_active(1));
        assert_eq!(t.pulses(), 3);

        t.set_pulses(3);
        assert_eq!(t.pattern(), pattern::generate(8, 3).as_slice());

        t.toggle_step(0).unwrap();
        t.set_pulses(5);
        assert_eq!(t.pattern(), pattern::generate(8, 5).as_slice());
    }

    #[test]
    fn test_velocity_survives_resize() {
        let mut t = track(8, 3, 0);
        for i in 0..8 {
            t.set_velocity(i, (i * 10) as u8).unwrap();
        }
        let before = t.velocities().to_vec();

        t.set_steps(16).unwrap();
        assert_eq!(&t.velocities()[..8], before.as_slice());
        assert!(t.velocities()[8..].iter().all(|&v| v == DEFAULT_VELOCITY));

        t.set_steps(8).unwrap();
        assert_eq!(t.velocities(), before.as_slice());
    }

    #[test]
    fn test_pulses_and_offset_clamp() {
        let mut t = track(5, 2, 0);
        t.set_pulses(9);
        assert_eq!(t.pulses(), 5);
        t.set_offset(9);
        assert_eq!(t.offset(), 4);
        assert_consistent(&t);
    }

    #[test]
    fn test_bounds_checks() {
        let mut t = track(4, 1, 0);
        assert_eq!(
            t.toggle_step(4),
            Err(SequencerError::StepIndexOutOfRange { index: 4, steps: 4 })
        );
        assert_eq!(
            t.set_velocity(0, 128),
            Err(SequencerError::VelocityOutOfRange(128))
        );
        assert!(t.set_gain(-0.5).is_err());
        assert!(t.set_gain(f32::NAN).is_err());
        assert!(t.set_midi_note(200).is_err());
        assert!(!t.is_active(10));
        assert_eq!(t.velocity(10), None);
    }
}
