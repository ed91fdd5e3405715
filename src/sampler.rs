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

//! Turns fired steps into sound.
//!
//! Triggering only installs an envelope and a start time on a voice, both expressed in absolute
//! timeline seconds, so it can run well ahead of the audio callback. Rendering evaluates the
//! voices for whatever window the audio device asks for.

use tracing::{debug, trace};

use crate::clock::{Hit, TriggerSink};
use crate::envelope::{normalized_velocity, EnvelopeShaper};
use crate::error::TriggerError;
use crate::samples::{SampleBuffer, SampleError, SampleLibrary, SampleRef};
use crate::track::{Track, TrackId, DEFAULT_VELOCITY};
use crate::voice::{VoiceAllocator, VoiceId};

/// Sample playback with pooled voices.
#[derive(Debug)]
pub struct Sampler {
    library: SampleLibrary,
    allocator: VoiceAllocator,
    shaper: EnvelopeShaper,
}

impl Sampler {
    pub fn new(library: SampleLibrary, voices_per_sample: usize) -> Sampler {
        Sampler {
            library,
            allocator: VoiceAllocator::new(voices_per_sample),
            shaper: EnvelopeShaper::default(),
        }
    }

    pub fn library(&self) -> &SampleLibrary {
        &self.library
    }

    /// Prepares the buffer for a sample so later triggers can play it.
    pub fn load(&mut self, sample: &SampleRef) -> Result<(), SampleError> {
        self.library.load(sample)
    }

    /// Makes an already decoded buffer available under `sample`.
    pub fn register(&mut self, sample: SampleRef, buffer: SampleBuffer) {
        self.library.register(sample, buffer);
    }

    pub fn is_ready(&self, sample: &SampleRef) -> bool {
        self.library.is_ready(sample)
    }

    pub fn sample_rate(&self) -> u32 {
        self.library.sample_rate()
    }

    /// Plays `sample` on one of `track`'s voices at `time`. Returns the voice used, or None if
    /// the sample is not ready.
    fn play(
        &mut self,
        sample: &SampleRef,
        track_id: TrackId,
        track: &Track,
        velocity: u8,
        time: f64,
    ) -> Option<VoiceId> {
        if !self.library.is_ready(sample) {
            debug!(track = %track_id, sample = %sample, "Sample not ready, skipping trigger");
            return None;
        }

        let (id, voice) = self.allocator.acquire(sample, track_id);
        voice.restart_at(time);
        let end = self.shaper.apply(
            voice.gain_mut(),
            time,
            normalized_velocity(velocity),
            track.gain(),
            track.adsr(),
        );
        trace!(track = %track_id, voice = ?id, time, end, "Voice triggered");
        Some(id)
    }

    /// Auditions a track's sample at full default velocity, as when choosing a new sample.
    pub fn preview(&mut self, track_id: TrackId, track: &Track, time: f64) -> Option<VoiceId> {
        self.play(track.sample(), track_id, track, DEFAULT_VELOCITY, time)
    }

    /// Mixes every voice into `out` as interleaved frames starting at `start_time`. All channels
    /// carry the same signal. Automation that can no longer matter is dropped afterwards.
    pub fn render(&mut self, start_time: f64, out: &mut [f32], channels: usize) {
        out.fill(0.0);
        let channels = channels.max(1);
        let frames = out.len() / channels;
        let rate = f64::from(self.library.sample_rate());
        let end_time = start_time + frames as f64 / rate;

        let library = &self.library;
        self.allocator.for_each_voice_mut(|sample, voice| {
            let Some(buffer) = library.get(sample) else {
                return;
            };
            if voice.gain().is_silent_from(start_time) {
                return;
            }
            for (i, frame) in out.chunks_exact_mut(channels).enumerate() {
                let time = start_time + i as f64 / rate;
                let Some(playhead) = voice.playhead(time) else {
                    continue;
                };
                let value = buffer.sample_at(playhead) * voice.gain().value_at(time);
                for sample in frame.iter_mut() {
                    *sample += value;
                }
            }
            voice.prune_before(end_time);
        });
    }

    /// Renders `num_frames` frames into a new buffer.
    pub fn process_frames(
        &mut self,
        start_time: f64,
        num_frames: usize,
        channels: usize,
    ) -> Vec<f32> {
        let mut frames = vec![0.0; num_frames * channels.max(1)];
        self.render(start_time, &mut frames, channels);
        frames
    }
}

impl TriggerSink for Sampler {
    fn trigger(&mut self, hit: &Hit<'_>) -> Result<(), TriggerError> {
        if !hit.time.is_finite() {
            return Err(TriggerError::NonFiniteTime(hit.time));
        }
        let velocity = hit
            .track
            .velocity(hit.step)
            .ok_or(TriggerError::MissingVelocity {
                step: hit.step,
                steps: hit.track.steps(),
            })?;
        self.play(hit.track.sample(), hit.track_id, hit.track, velocity, hit.time);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::envelope::Adsr;

    const RATE: u32 = 1000;

    /// A library with a one second "kick" of constant 0.5.
    fn sampler(voices: usize) -> Sampler {
        let mut library = SampleLibrary::new(RATE);
        library.register(
            SampleRef::library("kick"),
            SampleBuffer::new(vec![0.5; RATE as usize], RATE),
        );
        Sampler::new(library, voices)
    }

    fn kick_track() -> Track {
        let mut track = Track::new("kick", 4, 4, 0, SampleRef::library("kick")).unwrap();
        track
            .set_adsr(Adsr {
                attack: 0.0,
                decay: 0.0,
                sustain: 1.0,
                release: 0.0,
            })
            .unwrap();
        track.set_velocity(0, 127).unwrap();
        track
    }

    #[test]
    fn test_trigger_and_render() {
        let mut sampler = sampler(4);
        let track = kick_track();
        let hit = Hit {
            track_id: TrackId(0),
            track: &track,
            step: 0,
            time: 0.1,
        };
        sampler.trigger(&hit).unwrap();

        let frames = sampler.process_frames(0.0, 200, 2);
        assert_eq!(frames.len(), 400);
        // Silent before the trigger.
        assert!(frames[..200].iter().all(|&s| s == 0.0));
        // Full level inside the 50ms sustain dwell, on both channels.
        assert!((frames[2 * 120] - 0.5).abs() < 1e-4);
        assert_eq!(frames[2 * 120], frames[2 * 120 + 1]);
        // Released after the dwell.
        assert_eq!(frames[2 * 190], 0.0);
    }

    #[test]
    fn test_unready_sample_is_a_no_op() {
        let mut sampler = sampler(4);
        let mut track = kick_track();
        track.set_sample(SampleRef::Custom {
            file: PathBuf::from("missing.wav"),
        });
        let hit = Hit {
            track_id: TrackId(0),
            track: &track,
            step: 0,
            time: 0.0,
        };
        assert!(sampler.trigger(&hit).is_ok());
        assert!(sampler.process_frames(0.0, 100, 1).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_non_finite_time_is_an_error() {
        let mut sampler = sampler(4);
        let track = kick_track();
        let hit = Hit {
            track_id: TrackId(0),
            track: &track,
            step: 0,
            time: f64::NAN,
        };
        assert!(matches!(
            sampler.trigger(&hit),
            Err(TriggerError::NonFiniteTime(_))
        ));

        let hit = Hit { step: 9, time: 0.0, ..hit };
        assert_eq!(
            sampler.trigger(&hit),
            Err(TriggerError::MissingVelocity { step: 9, steps: 4 })
        );
    }

    #[test]
    fn test_overlapping_hits_use_separate_voices() {
        let mut sampler = sampler(2);
        let mut track = kick_track();
        track
            .set_adsr(Adsr {
                attack: 0.0,
                decay: 0.0,
                sustain: 1.0,
                release: 0.5,
            })
            .unwrap();

        let first = sampler.preview(TrackId(0), &track, 0.0);
        let second = sampler.preview(TrackId(0), &track, 0.01);
        assert_ne!(first, second);

        // Both voices sound together once the second has started.
        let frames = sampler.process_frames(0.0, 30, 1);
        assert!(frames[20] > frames[5]);
    }

    #[test]
    fn test_hits_queued_ahead_on_one_voice_all_sound() {
        let mut sampler = sampler(1);
        let track = kick_track();
        for time in [0.0, 0.1, 0.2] {
            sampler.preview(TrackId(0), &track, time);
        }

        let frames = sampler.process_frames(0.0, 300, 1);
        let level = 0.5 * normalized_velocity(DEFAULT_VELOCITY);
        for frame in [20, 120, 220] {
            assert!((frames[frame] - level).abs() < 1e-4, "frame {}", frame);
        }
        // Released between hits.
        assert_eq!(frames[80], 0.0);
    }
}
