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

//! Offline MIDI export.
//!
//! Each selected track replays its pattern for `bars * steps` virtual steps. Step boundaries are
//! rounded independently from the bar position (`round(i * 512 / steps)`), never accumulated, so
//! a track always spans exactly `bars * 512` ticks whatever its step count. Rests accumulate into
//! the wait before the next note, and a trailing rest goes into the end-of-track delta.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::track::{Track, TrackId};

/// Ticks per quarter note.
pub const PPQ: u16 = 128;
/// Ticks per 4/4 bar.
pub const TICKS_PER_BAR: u32 = PPQ as u32 * 4;
/// Bars exported when none are requested.
pub const DEFAULT_BARS: u32 = 4;
/// Longest export whose rests still fit a 28 bit delta time.
pub const MAX_BARS: u32 = ((1 << 28) - 1) / TICKS_PER_BAR;
/// Velocity of every note when per-step velocities are not exported.
pub const FIXED_VELOCITY: u8 = 100;
/// MIDI channel 10, the General MIDI percussion channel (zero-based).
pub const DRUM_CHANNEL: u8 = 9;

/// Errors raised while exporting.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("No tracks selected for export")]
    EmptySelection,

    #[error("No track with id {0}")]
    UnknownTrack(usize),

    #[error("Bar count must be at least 1")]
    NoBars,

    #[error("Cannot export {bars} bars, the limit is {max}")]
    TooManyBars { bars: u32, max: u32 },

    #[error("Failed to encode MIDI file: {0}")]
    Encode(#[source] io::Error),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Export settings.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ExportOptions {
    /// Number of bars to write.
    pub bars: u32,
    /// Use per-step velocities instead of a fixed one.
    pub velocity: bool,
    /// Write one merged track instead of one track per sequencer track.
    pub merge: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        ExportOptions {
            bars: DEFAULT_BARS,
            velocity: false,
            merge: false,
        }
    }
}

/// One note, preceded by `wait` ticks of rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteEvent {
    pub wait: u32,
    pub duration: u32,
    pub velocity: u8,
}

/// A track reduced to notes and rests on the tick grid.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedTrack {
    pub name: String,
    pub note: u8,
    pub notes: Vec<NoteEvent>,
    /// Rest after the last note.
    pub trailing_rest: u32,
}

impl QuantizedTrack {
    /// Total length of the track in ticks.
    pub fn total_ticks(&self) -> u32 {
        self.notes
            .iter()
            .map(|n| n.wait + n.duration)
            .sum::<u32>()
            + self.trailing_rest
    }
}

/// Tick at which virtual step `i` of a `steps` step track starts, rounded half up.
pub fn step_tick(i: u64, steps: u64) -> u64 {
    let ticks = u64::from(TICKS_PER_BAR);
    (2 * i * ticks + steps) / (2 * steps)
}

/// Replays `track` for `bars` bars onto the tick grid.
pub fn quantize(id: TrackId, track: &Track, bars: u32, use_velocity: bool) -> QuantizedTrack {
    let steps = track.steps() as u64;
    let total = steps * u64::from(bars);

    let mut notes = Vec::new();
    let mut wait = 0u32;
    for i in 0..total {
        let duration = (step_tick(i + 1, steps) - step_tick(i, steps)) as u32;
        let step = (i % steps) as usize;
        if !track.is_active(step) {
            wait += duration;
            continue;
        }

        let velocity = if use_velocity {
            track.velocity(step).unwrap_or(FIXED_VELOCITY)
        } else {
            FIXED_VELOCITY
        };
        notes.push(NoteEvent {
            wait,
            duration,
            // A note-on with velocity 0 would read as a note-off.
            velocity: velocity.clamp(1, 127),
        });
        wait = 0;
    }

    QuantizedTrack {
        name: format!("{} - {}", id, track.sample().label()),
        note: track.midi_note().min(127),
        notes,
        trailing_rest: wait,
    }
}

/// File name for an export of `project`.
pub fn file_name(project: &str, velocity: bool) -> String {
    if velocity {
        format!("{}_vel.mid", project)
    } else {
        format!("{}.mid", project)
    }
}

fn event(delta: u32, kind: TrackEventKind<'_>) -> TrackEvent<'_> {
    TrackEvent {
        delta: u28::from(delta),
        kind,
    }
}

fn note_on(key: u8, velocity: u8) -> TrackEventKind<'static> {
    TrackEventKind::Midi {
        channel: u4::from(DRUM_CHANNEL),
        message: MidiMessage::NoteOn {
            key: u7::from(key),
            vel: u7::from(velocity),
        },
    }
}

fn note_off(key: u8) -> TrackEventKind<'static> {
    TrackEventKind::Midi {
        channel: u4::from(DRUM_CHANNEL),
        message: MidiMessage::NoteOff {
            key: u7::from(key),
            vel: u7::from(0),
        },
    }
}

/// Tempo and time signature events for the first track.
fn header_events(bpm: f64) -> [TrackEvent<'static>; 2] {
    let micros_per_quarter = (60_000_000.0 / bpm).round().clamp(1.0, 16_777_215.0) as u32;
    [
        event(
            0,
            TrackEventKind::Meta(MetaMessage::Tempo(u24::from(micros_per_quarter))),
        ),
        event(0, TrackEventKind::Meta(MetaMessage::TimeSignature(4, 2, 24, 8))),
    ]
}

/// A note edge at an absolute tick. Offs sort before ons on the same tick.
#[derive(Debug, Clone, Copy)]
struct AbsoluteEvent {
    tick: u64,
    order: u8,
    key: u8,
    velocity: u8,
}

/// Encodes quantized tracks as a standard MIDI file.
pub fn encode(tracks: &[QuantizedTrack], bpm: f64, merge: bool) -> Result<Vec<u8>, ExportError> {
    let mut smf_tracks = Vec::new();

    if merge {
        let mut absolute = Vec::new();
        let mut end = 0u64;
        for track in tracks {
            let mut tick = 0u64;
            for note in &track.notes {
                tick += u64::from(note.wait);
                absolute.push(AbsoluteEvent {
                    tick,
                    order: 1,
                    key: track.note,
                    velocity: note.velocity,
                });
                tick += u64::from(note.duration);
                absolute.push(AbsoluteEvent {
                    tick,
                    order: 0,
                    key: track.note,
                    velocity: 0,
                });
            }
            end = end.max(u64::from(track.total_ticks()));
        }
        absolute.sort_by_key(|e| (e.tick, e.order));

        let mut events = Vec::with_capacity(absolute.len() + 3);
        events.extend(header_events(bpm));
        let mut previous = 0u64;
        for e in absolute {
            let kind = if e.order == 0 {
                note_off(e.key)
            } else {
                note_on(e.key, e.velocity)
            };
            events.push(event((e.tick - previous) as u32, kind));
            previous = e.tick;
        }
        events.push(event(
            end.saturating_sub(previous) as u32,
            TrackEventKind::Meta(MetaMessage::EndOfTrack),
        ));
        smf_tracks.push(events);
    } else {
        for (index, track) in tracks.iter().enumerate() {
            let mut events = Vec::with_capacity(track.notes.len() * 2 + 4);
            events.push(event(
                0,
                TrackEventKind::Meta(MetaMessage::TrackName(track.name.as_bytes())),
            ));
            if index == 0 {
                events.extend(header_events(bpm));
            }
            for note in &track.notes {
                events.push(event(note.wait, note_on(track.note, note.velocity)));
                events.push(event(note.duration, note_off(track.note)));
            }
            events.push(event(
                track.trailing_rest,
                TrackEventKind::Meta(MetaMessage::EndOfTrack),
            ));
            smf_tracks.push(events);
        }
    }

    let format = if smf_tracks.len() == 1 {
        Format::SingleTrack
    } else {
        Format::Parallel
    };
    let smf = Smf {
        header: Header::new(format, Timing::Metrical(u15::from(PPQ))),
        tracks: smf_tracks,
    };

    let mut bytes = Vec::new();
    smf.write_std(&mut bytes).map_err(ExportError::Encode)?;
    Ok(bytes)
}

/// An encoded MIDI file ready to be written.
#[derive(Debug, Clone)]
pub struct MidiExport {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl MidiExport {
    /// Writes the file into `dir`. The bytes go to a temporary file first and are renamed into
    /// place, so a failed write never leaves a partial file under the final name.
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf, ExportError> {
        let path = dir.join(&self.file_name);
        let partial = dir.join(format!(".{}.part", self.file_name));

        let result = fs::write(&partial, &self.bytes).and_then(|_| fs::rename(&partial, &path));
        if let Err(source) = result {
            let _ = fs::remove_file(&partial);
            return Err(ExportError::Io { path, source });
        }

        info!(path = ?path, bytes = self.bytes.len(), "MIDI file written");
        Ok(path)
    }
}

/// Exports the selected tracks of a project.
pub fn export(
    project: &str,
    bpm: f64,
    selected: &[(TrackId, &Track)],
    options: &ExportOptions,
) -> Result<MidiExport, ExportError> {
    if selected.is_empty() {
        return Err(ExportError::EmptySelection);
    }
    if options.bars == 0 {
        return Err(ExportError::NoBars);
    }
    if options.bars > MAX_BARS {
        return Err(ExportError::TooManyBars {
            bars: options.bars,
            max: MAX_BARS,
        });
    }

    let quantized: Vec<QuantizedTrack> = selected
        .iter()
        .map(|(id, track)| quantize(*id, track, options.bars, options.velocity))
        .collect();
    let bytes = encode(&quantized, bpm, options.merge)?;
    let file_name = file_name(project, options.velocity);

    info!(
        file = file_name.as_str(),
        tracks = quantized.len(),
        bars = options.bars,
        merge = options.merge,
        "MIDI export encoded"
    );
    Ok(MidiExport { file_name, bytes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern;
    use crate::samples::SampleRef;

    fn track(steps: usize, pulses: usize) -> Track {
        Track::new("t", steps, pulses, 0, SampleRef::library("kick")).unwrap()
    }

    /// A track whose pattern has bit `i` of `mask` at step `i`.
    fn masked(steps: usize, mask: u32) -> Track {
        let mut t = track(steps, 0);
        for i in 0..steps {
            if mask & (1 << i) != 0 {
                t.toggle_step(i).unwrap();
            }
        }
        t
    }

    fn parse(bytes: &[u8]) -> Smf<'_> {
        Smf::parse(bytes).unwrap()
    }

    fn total_delta(events: &[TrackEvent<'_>]) -> u32 {
        events.iter().map(|e| e.delta.as_int()).sum()
    }

    #[test]
    fn test_step_ticks() {
        let ticks: Vec<u64> = (0..=5).map(|i| step_tick(i, 5)).collect();
        assert_eq!(ticks, vec![0, 102, 205, 307, 410, 512]);
        assert_eq!(step_tick(3, 16), 96);
        assert_eq!(step_tick(7, 7), 512);
    }

    #[test]
    fn test_five_steps_four_bars_have_no_drift() {
        for mask in 0..32 {
            let q = quantize(TrackId(0), &masked(5, mask), 4, false);
            assert_eq!(q.total_ticks(), 2048, "mask={:05b}", mask);
            assert_eq!(q.notes.len() as u32, mask.count_ones() * 4);
        }
    }

    #[test]
    fn test_every_step_count_spans_whole_bars() {
        for steps in 1..=32 {
            for pulses in [0, 1, steps / 2, steps] {
                let q = quantize(TrackId(0), &track(steps, pulses), 3, false);
                assert_eq!(q.total_ticks(), 3 * TICKS_PER_BAR, "steps={}", steps);
            }
        }
    }

    #[test]
    fn test_rests_accumulate() {
        let q = quantize(TrackId(2), &track(8, 3), 1, false);
        assert_eq!(pattern::format(&pattern::generate(8, 3)), "x..x..x.");
        let shape: Vec<(u32, u32)> = q.notes.iter().map(|n| (n.wait, n.duration)).collect();
        assert_eq!(shape, vec![(0, 64), (128, 64), (128, 64)]);
        assert_eq!(q.trailing_rest, 64);
        assert_eq!(q.name, "Track 3 - KICK");
    }

    #[test]
    fn test_velocity_option() {
        let mut t = track(4, 4);
        t.set_velocity(1, 64).unwrap();
        t.set_velocity(2, 0).unwrap();

        let fixed = quantize(TrackId(0), &t, 1, false);
        assert!(fixed.notes.iter().all(|n| n.velocity == FIXED_VELOCITY));

        let per_step = quantize(TrackId(0), &t, 1, true);
        let velocities: Vec<u8> = per_step.notes.iter().map(|n| n.velocity).collect();
        assert_eq!(velocities, vec![100, 64, 1, 100]);
    }

    #[test]
    fn test_encode_per_track() {
        let kick = track(16, 4);
        let mut tom = track(5, 2);
        tom.set_midi_note(47).unwrap();
        let export = export(
            "groove",
            120.0,
            &[(TrackId(0), &kick), (TrackId(3), &tom)],
            &ExportOptions::default(),
        )
        .unwrap();
        assert_eq!(export.file_name, "groove.mid");

        let smf = parse(&export.bytes);
        assert_eq!(smf.header.format, Format::Parallel);
        assert_eq!(smf.header.timing, Timing::Metrical(u15::from(PPQ)));
        assert_eq!(smf.tracks.len(), 2);
        for events in &smf.tracks {
            assert_eq!(total_delta(events), 4 * TICKS_PER_BAR);
        }

        assert!(smf.tracks[0]
            .iter()
            .any(|e| matches!(e.kind, TrackEventKind::Meta(MetaMessage::Tempo(t)) if t.as_int() == 500_000)));
        assert!(smf.tracks[1]
            .iter()
            .any(|e| e.kind == TrackEventKind::Meta(MetaMessage::TrackName(b"Track 4 - KICK"))));

        let ons: Vec<(u8, u8)> = smf.tracks[1]
            .iter()
            .filter_map(|e| match e.kind {
                TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::NoteOn { key, .. },
                } => Some((channel.as_int(), key.as_int())),
                _ => None,
            })
            .collect();
        assert_eq!(ons, vec![(DRUM_CHANNEL, 47); 8]);
    }

    #[test]
    fn test_encode_merged() {
        let hats = track(8, 8);
        let tom = track(5, 5);
        let export = export(
            "groove",
            90.0,
            &[(TrackId(0), &hats), (TrackId(1), &tom)],
            &ExportOptions {
                bars: 2,
                velocity: true,
                merge: true,
            },
        )
        .unwrap();
        assert_eq!(export.file_name, "groove_vel.mid");

        let smf = parse(&export.bytes);
        assert_eq!(smf.header.format, Format::SingleTrack);
        assert_eq!(smf.tracks.len(), 1);
        let events = &smf.tracks[0];
        assert_eq!(total_delta(events), 2 * TICKS_PER_BAR);

        let mut tick = 0u32;
        let mut last: Option<(u32, bool)> = None;
        let mut ons = 0;
        for e in events {
            tick += e.delta.as_int();
            let is_on = match e.kind {
                TrackEventKind::Midi {
                    message: MidiMessage::NoteOn { .. },
                    ..
                } => true,
                TrackEventKind::Midi {
                    message: MidiMessage::NoteOff { .. },
                    ..
                } => false,
                _ => continue,
            };
            if let Some((last_tick, last_on)) = last {
                assert!(last_tick <= tick);
                // Offs come before ons on the same tick.
                assert!(!(last_tick == tick && last_on && !is_on));
            }
            ons += is_on as usize;
            last = Some((tick, is_on));
        }
        assert_eq!(ons, 2 * (8 + 5));
    }

    #[test]
    fn test_export_errors() {
        assert!(matches!(
            export("p", 120.0, &[], &ExportOptions::default()),
            Err(ExportError::EmptySelection)
        ));

        let t = track(4, 1);
        let options = ExportOptions {
            bars: 0,
            ..ExportOptions::default()
        };
        assert!(matches!(
            export("p", 120.0, &[(TrackId(0), &t)], &options),
            Err(ExportError::NoBars)
        ));
    }

    #[test]
    fn test_bar_limit() {
        // A single rest spanning every bar is the largest delta written.
        let rest = track(4, 0);
        let options = ExportOptions {
            bars: MAX_BARS + 1,
            ..ExportOptions::default()
        };
        assert!(matches!(
            export("p", 120.0, &[(TrackId(0), &rest)], &options),
            Err(ExportError::TooManyBars { bars, max: MAX_BARS }) if bars == MAX_BARS + 1
        ));

        let options = ExportOptions {
            bars: u32::MAX,
            merge: true,
            ..ExportOptions::default()
        };
        assert!(matches!(
            export("p", 120.0, &[(TrackId(0), &rest)], &options),
            Err(ExportError::TooManyBars { .. })
        ));

        let q = quantize(TrackId(0), &rest, MAX_BARS, false);
        assert!(q.notes.is_empty());
        assert_eq!(q.trailing_rest, MAX_BARS * TICKS_PER_BAR);
        assert!(q.trailing_rest < 1 << 28);
    }

    #[test]
    fn test_write_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let t = track(4, 2);
        let export = export("p", 120.0, &[(TrackId(0), &t)], &ExportOptions::default()).unwrap();

        let path = export.write_to_dir(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("p.mid"));
        assert_eq!(fs::read(&path).unwrap(), export.bytes);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        let missing = dir.path().join("missing");
        assert!(matches!(
            export.write_to_dir(&missing),
            Err(ExportError::Io { .. })
        ));
    }
}
