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

//! The sequencer session: an ordered set of tracks plus one transport.
//!
//! Every edit is validated against a copy of the track before anything changes, so a rejected
//! edit leaves the session exactly as it was. Edits that change step counts or tempo while the
//! clock runs reinstall its schedule in the same call.

use tracing::{info, warn};

use crate::clock::{self, PolyClock, StepEvent, TriggerSink};
use crate::envelope::{Adsr, AdsrParam};
use crate::error::SequencerError;
use crate::midi_export::{self, ExportError, ExportOptions, MidiExport};
use crate::samples::SampleRef;
use crate::track::{Track, TrackId};

/// Project name used when none is configured.
pub const DEFAULT_NAME: &str = "euclidean_poly_rhythm";
/// Tempo used when none is configured.
pub const DEFAULT_BPM: f64 = 120.0;

/// The four tracks a fresh session starts with: name, steps, pulses, sample, GM note.
const DEFAULT_TRACKS: [(&str, usize, usize, &str, u8); 4] = [
    ("Kick", 16, 4, "kick", 36),
    ("Snare", 12, 5, "snare", 38),
    ("Hi-hat", 8, 3, "hihat", 42),
    ("Tom", 5, 2, "tom", 47),
];

/// Builds the default tracks.
pub fn default_tracks() -> Vec<Track> {
    DEFAULT_TRACKS
        .iter()
        .filter_map(|&(name, steps, pulses, sample, note)| {
            let mut track = Track::new(name, steps, pulses, 0, SampleRef::library(sample)).ok()?;
            track.set_midi_note(note).ok()?;
            Some(track)
        })
        .collect()
}

#[derive(Debug)]
pub struct SequencerSession {
    name: String,
    tracks: Vec<Track>,
    bpm: f64,
    clock: PolyClock,
}

impl Default for SequencerSession {
    fn default() -> Self {
        SequencerSession {
            name: DEFAULT_NAME.to_string(),
            tracks: default_tracks(),
            bpm: DEFAULT_BPM,
            clock: PolyClock::default(),
        }
    }
}

impl SequencerSession {
    /// Creates a session, checking the tempo and that the tracks fit under the super-grid
    /// ceiling.
    pub fn new(
        name: &str,
        tracks: Vec<Track>,
        bpm: f64,
        max_super_ticks: u64,
    ) -> Result<SequencerSession, SequencerError> {
        clock::validate_bpm(bpm)?;
        let clock = PolyClock::new(max_super_ticks);
        let grid = clock.check_grid(&tracks)?;
        info!(name, tracks = tracks.len(), bpm, lcm = grid, "Session created");
        Ok(SequencerSession {
            name: name.to_string(),
            tracks,
            bpm,
            clock,
        })
    }

    /// Creates a session with the default tracks and tempo.
    pub fn with_defaults(name: &str) -> SequencerSession {
        SequencerSession {
            name: name.to_string(),
            ..SequencerSession::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Result<&Track, SequencerError> {
        self.tracks
            .get(id.0)
            .ok_or(SequencerError::UnknownTrack(id.0))
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Super-ticks per bar for the current tracks.
    pub fn grid(&self) -> u64 {
        clock::super_grid(self.tracks.iter().map(Track::steps))
    }

    pub fn max_super_ticks(&self) -> u64 {
        self.clock.max_super_ticks()
    }

    /// Applies `edit` to a copy of the track, checks the result and only then commits it.
    fn edit<F>(&mut self, id: TrackId, edit: F) -> Result<(), SequencerError>
    where
        F: FnOnce(&mut Track) -> Result<(), SequencerError>,
    {
        let current = self.track(id)?;
        let mut candidate = current.clone();
        edit(&mut candidate)?;

        let regrid = candidate.steps() != current.steps();
        if regrid {
            let mut tracks = self.tracks.clone();
            tracks[id.0] = candidate;
            self.clock.reschedule(&tracks, self.bpm)?;
            self.tracks = tracks;
        } else {
            self.tracks[id.0] = candidate;
        }
        Ok(())
    }

    pub fn set_steps(&mut self, id: TrackId, steps: usize) -> Result<(), SequencerError> {
        self.edit(id, |track| track.set_steps(steps))
    }

    pub fn set_pulses(&mut self, id: TrackId, pulses: usize) -> Result<(), SequencerError> {
        self.edit(id, |track| {
            track.set_pulses(pulses);
            Ok(())
        })
    }

    pub fn set_offset(&mut self, id: TrackId, offset: usize) -> Result<(), SequencerError> {
        self.edit(id, |track| {
            track.set_offset(offset);
            Ok(())
        })
    }

    pub fn toggle_step(&mut self, id: TrackId, index: usize) -> Result<(), SequencerError> {
        self.edit(id, |track| track.toggle_step(index))
    }

    pub fn set_velocity(
        &mut self,
        id: TrackId,
        index: usize,
        velocity: u8,
    ) -> Result<(), SequencerError> {
        self.edit(id, |track| track.set_velocity(index, velocity))
    }

    /// Changes one envelope stage.
    pub fn set_adsr(
        &mut self,
        id: TrackId,
        param: AdsrParam,
        value: f64,
    ) -> Result<(), SequencerError> {
        self.edit(id, |track| {
            let adsr = track.adsr().with(param, value)?;
            track.set_adsr(adsr)
        })
    }

    /// Replaces the whole envelope.
    pub fn set_envelope(&mut self, id: TrackId, adsr: Adsr) -> Result<(), SequencerError> {
        self.edit(id, |track| track.set_adsr(adsr))
    }

    pub fn set_gain(&mut self, id: TrackId, gain: f32) -> Result<(), SequencerError> {
        self.edit(id, |track| track.set_gain(gain))
    }

    pub fn set_sample(&mut self, id: TrackId, sample: SampleRef) -> Result<(), SequencerError> {
        self.edit(id, |track| {
            track.set_sample(sample);
            Ok(())
        })
    }

    pub fn set_midi_note(&mut self, id: TrackId, note: u8) -> Result<(), SequencerError> {
        self.edit(id, |track| track.set_midi_note(note))
    }

    /// Changes the tempo, reinstalling the clock's schedule if it runs.
    pub fn set_bpm(&mut self, bpm: f64) -> Result<(), SequencerError> {
        clock::validate_bpm(bpm)?;
        self.clock.reschedule(&self.tracks, bpm)?;
        self.bpm = bpm;
        Ok(())
    }

    /// Starts the transport with super-tick 0 at time `at`.
    pub fn start(&mut self, at: f64) -> Result<(), SequencerError> {
        if self.clock.is_running() {
            warn!("Session already running, restarting");
        }
        self.clock.start(&self.tracks, self.bpm, at)
    }

    pub fn stop(&mut self) {
        self.clock.stop();
    }

    pub fn is_running(&self) -> bool {
        self.clock.is_running()
    }

    /// Current super-tick counter, if running.
    pub fn counter(&self) -> Option<u64> {
        self.clock.counter()
    }

    /// Last local step fired for a track during this run.
    pub fn last_fired(&self, id: TrackId) -> Option<usize> {
        self.clock.last_fired(id)
    }

    /// Time of the next super-tick, if running.
    pub fn next_tick_time(&self) -> Option<f64> {
        self.clock.next_tick_time()
    }

    /// Fires every super-tick scheduled before `horizon`.
    pub fn pump(&mut self, horizon: f64, sink: &mut dyn TriggerSink) -> Vec<StepEvent> {
        self.clock.pump(&self.tracks, horizon, sink)
    }

    /// Encodes the selected tracks as a standard MIDI file. Works whether or not the transport
    /// runs.
    pub fn export_midi(
        &self,
        ids: &[TrackId],
        options: &ExportOptions,
    ) -> Result<MidiExport, ExportError> {
        let selected = ids
            .iter()
            .map(|&id| {
                self.tracks
                    .get(id.0)
                    .map(|track| (id, track))
                    .ok_or(ExportError::UnknownTrack(id.0))
            })
            .collect::<Result<Vec<_>, _>>()?;
        midi_export::export(&self.name, self.bpm, &selected, options)
    }

    /// Ids of every track, in order.
    pub fn track_ids(&self) -> Vec<TrackId> {
        (0..self.tracks.len()).map(TrackId).collect()
    }
}
