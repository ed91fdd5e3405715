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

//! Voice allocation for retriggered sample playback.
//!
//! Every library sample owns a fixed pool of voices handed out round-robin, so a fast pattern
//! does not cut off its own tail. Custom samples get a single dedicated voice per track.

use std::collections::HashMap;

use tracing::debug;

use crate::samples::SampleRef;
use crate::track::TrackId;

/// Default number of voices in each sample's pool.
pub const DEFAULT_VOICES_PER_SAMPLE: usize = 4;

/// A scheduled change on a gain control.
#[derive(Debug, Clone, Copy, PartialEq)]
enum GainEvent {
    /// Jump to `value` at `time`.
    Set { time: f64, value: f32 },
    /// Move linearly from the preceding event's value, arriving at `value` at `time`.
    Ramp { time: f64, value: f32 },
}

impl GainEvent {
    fn time(&self) -> f64 {
        match self {
            GainEvent::Set { time, .. } | GainEvent::Ramp { time, .. } => *time,
        }
    }

    fn value(&self) -> f32 {
        match self {
            GainEvent::Set { value, .. } | GainEvent::Ramp { value, .. } => *value,
        }
    }
}

/// A gain control automated on an absolute timeline. Values before the first event are 0.
#[derive(Debug, Clone, Default)]
pub struct GainControl {
    /// Events sorted by time. Events sharing a time keep their insertion order.
    events: Vec<GainEvent>,
}

impl GainControl {
    /// Removes every scheduled change at or after `time`.
    pub fn cancel_from(&mut self, time: f64) {
        self.events.retain(|event| event.time() < time);
    }

    /// Jumps to `value` at `time`.
    pub fn set_value_at(&mut self, value: f32, time: f64) {
        self.insert(GainEvent::Set { time, value });
    }

    /// Ramps linearly from the preceding scheduled value to `value`, arriving at `time`.
    pub fn linear_ramp_to(&mut self, value: f32, time: f64) {
        self.insert(GainEvent::Ramp { time, value });
    }

    fn insert(&mut self, event: GainEvent) {
        let index = self.events.partition_point(|e| e.time() <= event.time());
        self.events.insert(index, event);
    }

    /// Evaluates the gain at `time`.
    pub fn value_at(&self, time: f64) -> f32 {
        let next = self.events.partition_point(|e| e.time() <= time);
        let (prev_time, prev_value) = match next.checked_sub(1).map(|i| self.events[i]) {
            Some(event) => (event.time(), event.value()),
            None => return 0.0,
        };

        match self.events.get(next) {
            Some(GainEvent::Ramp {
                time: end,
                value: target,
            }) if *end > prev_time => {
                let t = ((time - prev_time) / (end - prev_time)) as f32;
                prev_value + (target - prev_value) * t
            }
            _ => prev_value,
        }
    }

    /// Drops events that can no longer affect any value at or after `time`.
    pub fn prune_before(&mut self, time: f64) {
        let keep_from = self
            .events
            .partition_point(|e| e.time() <= time)
            .saturating_sub(1);
        if keep_from > 0 {
            self.events.drain(..keep_from);
        }
    }

    /// Returns true if the gain stays at zero from `time` on.
    pub fn is_silent_from(&self, time: f64) -> bool {
        self.value_at(time) == 0.0
            && self
                .events
                .iter()
                .all(|e| e.time() <= time || e.value() == 0.0)
    }

    /// Number of scheduled events (used to check that automation stays bounded).
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// One independently playable instance of a sample.
#[derive(Debug, Clone, Default)]
pub struct Voice {
    /// Gain control the envelope shaper drives.
    gain: GainControl,
    /// Playback starts in ascending order. Triggers land ahead of rendering, so several can be
    /// pending at once; each one sounds until the next is reached.
    starts: Vec<f64>,
}

impl Voice {
    /// Restarts playback from the top of the sample at `time`. Starts at or after `time` are
    /// replaced, matching the automation the envelope cancels.
    pub fn restart_at(&mut self, time: f64) {
        self.starts.retain(|start| *start < time);
        self.starts.push(time);
    }

    /// Seconds into the sample at `time`, or None if nothing is playing yet.
    pub fn playhead(&self, time: f64) -> Option<f64> {
        let index = self.starts.partition_point(|start| *start <= time);
        index
            .checked_sub(1)
            .map(|latest| time - self.starts[latest])
    }

    /// Drops starts and automation superseded by `time`.
    pub fn prune_before(&mut self, time: f64) {
        let keep_from = self
            .starts
            .partition_point(|start| *start <= time)
            .saturating_sub(1);
        self.starts.drain(..keep_from);
        self.gain.prune_before(time);
    }

    /// Number of starts still remembered.
    pub fn pending_starts(&self) -> usize {
        self.starts.len()
    }

    /// Gets the gain control.
    pub fn gain(&self) -> &GainControl {
        &self.gain
    }

    /// Gets the gain control for scheduling.
    pub fn gain_mut(&mut self) -> &mut GainControl {
        &mut self.gain
    }
}

/// Fixed-capacity arena of voices with a round-robin cursor.
#[derive(Debug)]
struct VoicePool {
    voices: Box<[Voice]>,
    cursor: usize,
}

impl VoicePool {
    fn new(capacity: usize) -> VoicePool {
        VoicePool {
            voices: vec![Voice::default(); capacity.max(1)].into_boxed_slice(),
            cursor: 0,
        }
    }

    /// Hands out the voice under the cursor and advances it, whether or not that voice is still
    /// sounding.
    fn next(&mut self) -> (usize, &mut Voice) {
        let index = self.cursor;
        self.cursor = (self.cursor + 1) % self.voices.len();
        (index, &mut self.voices[index])
    }
}

/// Identifies the voice a trigger landed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceId {
    /// A voice in a library sample's pool.
    Pooled { sample: String, index: usize },
    /// The dedicated voice of a track playing a custom sample.
    Dedicated(TrackId),
}

/// Hands out voices per sample identity.
#[derive(Debug)]
pub struct VoiceAllocator {
    /// Pool size for library samples.
    voices_per_sample: usize,
    /// Library sample name -> pool.
    pools: HashMap<String, VoicePool>,
    /// Track -> its custom sample and dedicated voice.
    dedicated: HashMap<TrackId, (SampleRef, Voice)>,
}

impl VoiceAllocator {
    /// Creates an allocator whose library pools hold `voices_per_sample` voices.
    pub fn new(voices_per_sample: usize) -> VoiceAllocator {
        VoiceAllocator {
            voices_per_sample: voices_per_sample.max(1),
            pools: HashMap::new(),
            dedicated: HashMap::new(),
        }
    }

    /// Acquires the next voice for `sample` triggered from `track`.
    pub fn acquire(&mut self, sample: &SampleRef, track: TrackId) -> (VoiceId, &mut Voice) {
        match sample {
            SampleRef::Library(name) => {
                let capacity = self.voices_per_sample;
                let pool = self
                    .pools
                    .entry(name.clone())
                    .or_insert_with(|| VoicePool::new(capacity));
                let (index, voice) = pool.next();
                (
                    VoiceId::Pooled {
                        sample: name.clone(),
                        index,
                    },
                    voice,
                )
            }
            SampleRef::Custom { .. } => {
                let entry = self
                    .dedicated
                    .entry(track)
                    .or_insert_with(|| (sample.clone(), Voice::default()));
                if entry.0 != *sample {
                    debug!(track = %track, "Custom sample changed, resetting dedicated voice");
                    *entry = (sample.clone(), Voice::default());
                }
                (VoiceId::Dedicated(track), &mut entry.1)
            }
        }
    }

    /// Gets a voice by id.
    pub fn voice(&self, id: &VoiceId) -> Option<&Voice> {
        match id {
            VoiceId::Pooled { sample, index } => {
                self.pools.get(sample).and_then(|pool| pool.voices.get(*index))
            }
            VoiceId::Dedicated(track) => self.dedicated.get(track).map(|(_, voice)| voice),
        }
    }

    /// Visits every voice with the sample it plays.
    pub fn for_each_voice_mut(&mut self, mut f: impl FnMut(&SampleRef, &mut Voice)) {
        for (name, pool) in self.pools.iter_mut() {
            let sample = SampleRef::Library(name.clone());
            for voice in pool.voices.iter_mut() {
                f(&sample, voice);
            }
        }
        for (sample, voice) in self.dedicated.values_mut() {
            f(sample, voice);
        }
    }

    /// Returns the pool size used for library samples.
    pub fn voices_per_sample(&self) -> usize {
        self.voices_per_sample
    }
}
