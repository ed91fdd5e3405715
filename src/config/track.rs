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

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::LoadError;
use crate::envelope::Adsr;
use crate::pattern;
use crate::samples::SampleRef;
use crate::track::{DEFAULT_MIDI_NOTE, DEFAULT_VELOCITY};

/// A YAML representation of a track.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Track {
    /// The display name. Defaults to the sample label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    steps: usize,
    #[serde(default)]
    pulses: usize,
    #[serde(default)]
    offset: usize,
    sample: SampleRef,
    /// Per-step velocities. Missing steps play at the default velocity and extra entries are
    /// ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    velocity: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    adsr: Option<Adsr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gain: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    midi_note: Option<u8>,
    /// Steps flipped by hand after the pattern is generated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    toggles: Vec<usize>,
}

impl Track {
    /// Converts this track configuration into a track. Relative sample files are resolved
    /// against `base`, the directory holding the session file.
    pub(super) fn to_track(
        &self,
        index: usize,
        base: &Path,
    ) -> Result<crate::track::Track, LoadError> {
        let invalid = move |source| LoadError::Track { index, source };

        let sample = match &self.sample {
            SampleRef::Custom { file } if file.is_relative() => SampleRef::Custom {
                file: base.join(file),
            },
            sample => sample.clone(),
        };
        let name = self.name.clone().unwrap_or_else(|| sample.label());

        let mut track = crate::track::Track::new(&name, self.steps, self.pulses, self.offset, sample)
            .map_err(invalid)?;
        if let Some(velocity) = &self.velocity {
            for (i, &value) in velocity.iter().take(track.steps()).enumerate() {
                track.set_velocity(i, value).map_err(invalid)?;
            }
        }
        if let Some(adsr) = self.adsr {
            track.set_adsr(adsr).map_err(invalid)?;
        }
        if let Some(gain) = self.gain {
            track.set_gain(gain).map_err(invalid)?;
        }
        if let Some(note) = self.midi_note {
            track.set_midi_note(note).map_err(invalid)?;
        }
        for &step in &self.toggles {
            track.toggle_step(step).map_err(invalid)?;
        }
        Ok(track)
    }
}

impl From<&crate::track::Track> for Track {
    fn from(track: &crate::track::Track) -> Self {
        let generated = pattern::rotate(
            &pattern::generate(track.steps(), track.pulses()),
            track.offset() as i64,
        );
        let toggles = generated
            .iter()
            .zip(track.pattern())
            .enumerate()
            .filter(|(_, (generated, actual))| generated != actual)
            .map(|(i, _)| i)
            .collect();
        let velocity = track
            .velocities()
            .iter()
            .any(|&v| v != DEFAULT_VELOCITY)
            .then(|| track.velocities().to_vec());

        Track {
            name: Some(track.name().to_string()),
            steps: track.steps(),
            pulses: track.pulses(),
            offset: track.offset(),
            sample: track.sample().clone(),
            velocity,
            adsr: (*track.adsr() != Adsr::default()).then_some(*track.adsr()),
            gain: (track.gain() != 1.0).then_some(track.gain()),
            midi_note: (track.midi_note() != DEFAULT_MIDI_NOTE).then_some(track.midi_note()),
            toggles,
        }
    }
}
