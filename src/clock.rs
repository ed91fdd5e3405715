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

//! The polyrhythmic clock.
//!
//! All tracks share one counter running at the least common multiple of their step counts (the
//! super-grid). A track with `steps` divisions fires on every `grid / steps`-th super-tick, so
//! every track fires exactly `steps` times per bar and all of them stay phase-locked to the bar.
//!
//! The clock does no timing of its own. The host calls [`PolyClock::pump`] with a horizon and
//! the clock fires every super-tick scheduled before it, each stamped with its absolute time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{SequencerError, TriggerError};
use crate::track::{Track, TrackId};

pub mod schedule;

use schedule::{Recurrence, Schedule, ScheduleHandle};

/// Default ceiling on super-ticks per bar.
pub const DEFAULT_MAX_SUPER_TICKS: u64 = 65_536;

/// Greatest common divisor.
pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Least common multiple. Saturates instead of overflowing.
pub fn lcm(a: u64, b: u64) -> u64 {
    if a == 0 || b == 0 {
        return 0;
    }
    (a / gcd(a, b)).saturating_mul(b)
}

/// Number of super-ticks per bar for the given step counts, folded left to right from 1.
pub fn super_grid(steps: impl IntoIterator<Item = usize>) -> u64 {
    steps.into_iter().fold(1, |acc, s| lcm(acc, s as u64))
}

/// Length of a 4/4 bar in seconds.
pub fn bar_duration(bpm: f64) -> f64 {
    60.0 / bpm * 4.0
}

/// Checks that a tempo is usable.
pub fn validate_bpm(bpm: f64) -> Result<(), SequencerError> {
    if !bpm.is_finite() || bpm <= 0.0 {
        return Err(SequencerError::InvalidBpm(bpm));
    }
    Ok(())
}

/// The local step a track of `steps` divisions plays on super-tick `counter`, or None if the
/// track does not fire on that tick.
pub fn local_step(counter: u64, grid: u64, steps: usize) -> Option<usize> {
    let steps = steps as u64;
    if steps == 0 || grid % steps != 0 {
        return None;
    }
    let division = grid / steps;
    (counter % division == 0).then(|| ((counter / division) % steps) as usize)
}

/// Source of the current time, in seconds, on the timeline the clock schedules against.
pub trait Timeline {
    fn now(&self) -> f64;
}

/// A timeline that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualTimeline {
    bits: Arc<AtomicU64>,
}

impl ManualTimeline {
    pub fn new(start: f64) -> ManualTimeline {
        let timeline = ManualTimeline::default();
        timeline.set(start);
        timeline
    }

    pub fn set(&self, now: f64) {
        self.bits.store(now.to_bits(), Ordering::Release);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

impl Timeline for ManualTimeline {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

/// Emitted for every track that fires on a super-tick, active or not.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepEvent {
    pub track: TrackId,
    pub step: usize,
    pub active: bool,
    pub time: f64,
}

/// An active step handed to the trigger path.
#[derive(Debug, Clone, Copy)]
pub struct Hit<'a> {
    pub track_id: TrackId,
    pub track: &'a Track,
    pub step: usize,
    pub time: f64,
}

/// Receives active steps. Implementations must not block.
pub trait TriggerSink {
    fn trigger(&mut self, hit: &Hit<'_>) -> Result<(), TriggerError>;
}

impl<F> TriggerSink for F
where
    F: FnMut(&Hit<'_>) -> Result<(), TriggerError>,
{
    fn trigger(&mut self, hit: &Hit<'_>) -> Result<(), TriggerError> {
        self(hit)
    }
}

/// State that only exists while the clock runs.
#[derive(Debug)]
struct PlaybackState {
    counter: u64,
    grid: u64,
    bar_seconds: f64,
    /// Last local step fired per track.
    last_fired: Vec<Option<usize>>,
    handle: ScheduleHandle,
}

/// Drives the shared super-tick counter.
#[derive(Debug)]
pub struct PolyClock {
    max_super_ticks: u64,
    schedule: Schedule,
    playback: Option<PlaybackState>,
}

impl Default for PolyClock {
    fn default() -> Self {
        PolyClock::new(DEFAULT_MAX_SUPER_TICKS)
    }
}

impl PolyClock {
    pub fn new(max_super_ticks: u64) -> PolyClock {
        PolyClock {
            max_super_ticks: max_super_ticks.max(1),
            schedule: Schedule::new(),
            playback: None,
        }
    }

    /// Computes the super-grid for `tracks`, rejecting grids above the ceiling.
    pub fn check_grid(&self, tracks: &[Track]) -> Result<u64, SequencerError> {
        let grid = super_grid(tracks.iter().map(Track::steps));
        if grid > self.max_super_ticks {
            return Err(SequencerError::SuperGridTooLarge {
                lcm: grid,
                max: self.max_super_ticks,
            });
        }
        Ok(grid)
    }

    /// Starts from super-tick 0 at time `at`, replacing any running schedule.
    pub fn start(&mut self, tracks: &[Track], bpm: f64, at: f64) -> Result<(), SequencerError> {
        validate_bpm(bpm)?;
        let grid = self.check_grid(tracks)?;
        let bar_seconds = bar_duration(bpm);

        self.schedule.cancel();
        let handle = self.schedule.install(Recurrence {
            start: at,
            period: bar_seconds / grid as f64,
        });
        self.playback = Some(PlaybackState {
            counter: 0,
            grid,
            bar_seconds,
            last_fired: vec![None; tracks.len()],
            handle,
        });
        info!(bpm, lcm = grid, at, "Clock started");
        Ok(())
    }

    /// Stops the clock. Nothing fires again until the next start.
    pub fn stop(&mut self) {
        self.schedule.cancel();
        if self.playback.take().is_some() {
            info!("Clock stopped");
        }
    }

    /// Installs a fresh recurrence for new step counts or tempo while keeping the position within
    /// the bar. Does nothing but validate when the clock is stopped.
    ///
    /// The pending position `p = counter / old_grid` moves to the first new super-tick at or
    /// after it, and the new recurrence starts that far past the old schedule's next due time.
    pub fn reschedule(&mut self, tracks: &[Track], bpm: f64) -> Result<(), SequencerError> {
        validate_bpm(bpm)?;
        let grid = self.check_grid(tracks)?;
        let Some(state) = self.playback.as_mut() else {
            return Ok(());
        };
        let Some(next_due) = self.schedule.next_due() else {
            return Ok(());
        };

        let old_grid = u128::from(state.grid);
        let new_grid = u128::from(grid);
        let counter = u128::from(state.counter);
        let scaled = counter * new_grid;
        let new_counter = scaled.div_ceil(old_grid);
        let gap = (new_counter * old_grid - scaled) as f64 / (old_grid * new_grid) as f64;

        let bar_seconds = bar_duration(bpm);
        state.handle = self.schedule.install(Recurrence {
            start: next_due + gap * bar_seconds,
            period: bar_seconds / grid as f64,
        });
        state.counter = (new_counter % new_grid) as u64;
        state.grid = grid;
        state.bar_seconds = bar_seconds;
        state.last_fired.resize(tracks.len(), None);

        info!(
            bpm,
            lcm = grid,
            counter = state.counter,
            "Clock rescheduled"
        );
        Ok(())
    }

    /// Fires every super-tick scheduled before `horizon`, in order. Active steps go to `sink`;
    /// a failing track is logged and skipped for that tick only.
    pub fn pump(
        &mut self,
        tracks: &[Track],
        horizon: f64,
        sink: &mut dyn TriggerSink,
    ) -> Vec<StepEvent> {
        let mut events = Vec::new();
        let Some(state) = self.playback.as_mut() else {
            return events;
        };
        if state.last_fired.len() != tracks.len() {
            state.last_fired.resize(tracks.len(), None);
        }

        while let Some(time) = self.schedule.take_due(&state.handle, horizon) {
            for (index, track) in tracks.iter().enumerate() {
                let Some(step) = local_step(state.counter, state.grid, track.steps()) else {
                    continue;
                };
                let track_id = TrackId(index);
                let active = track.is_active(step);
                state.last_fired[index] = Some(step);
                events.push(StepEvent {
                    track: track_id,
                    step,
                    active,
                    time,
                });

                if active {
                    let hit = Hit {
                        track_id,
                        track,
                        step,
                        time,
                    };
                    if let Err(e) = sink.trigger(&hit) {
                        warn!(track = %track_id, step, err = %e, "Trigger failed, skipping track");
                    }
                }
            }
            state.counter = (state.counter + 1) % state.grid;
        }

        if !events.is_empty() {
            debug!(events = events.len(), horizon, "Clock pumped");
        }
        events
    }

    pub fn is_running(&self) -> bool {
        self.playback.is_some()
    }

    /// Current super-tick counter, if running.
    pub fn counter(&self) -> Option<u64> {
        self.playback.as_ref().map(|state| state.counter)
    }

    /// Super-ticks per bar of the running schedule.
    pub fn grid(&self) -> Option<u64> {
        self.playback.as_ref().map(|state| state.grid)
    }

    /// Length of a bar in the running schedule.
    pub fn bar_seconds(&self) -> Option<f64> {
        self.playback.as_ref().map(|state| state.bar_seconds)
    }

    /// Last local step fired for a track during this run.
    pub fn last_fired(&self, track: TrackId) -> Option<usize> {
        self.playback
            .as_ref()
            .and_then(|state| state.last_fired.get(track.0).copied().flatten())
    }

    /// Time of the next super-tick, if running.
    pub fn next_tick_time(&self) -> Option<f64> {
        self.playback.as_ref().and(self.schedule.next_due())
    }

    pub fn max_super_ticks(&self) -> u64 {
        self.max_super_ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::SampleRef;

    fn tracks(steps: &[usize]) -> Vec<Track> {
        steps
            .iter()
            .map(|&s| Track::new("t", s, s, 0, SampleRef::library("kick")).unwrap())
            .collect()
    }

    fn no_sink() -> impl FnMut(&Hit<'_>) -> Result<(), TriggerError> {
        |_: &Hit<'_>| -> Result<(), TriggerError> { Ok(()) }
    }

    #[test]
    fn test_gcd_lcm() {
        assert_eq!(gcd(12, 8), 4);
        assert_eq!(gcd(5, 0), 5);
        assert_eq!(lcm(12, 8), 24);
        assert_eq!(lcm(0, 8), 0);
        assert_eq!(super_grid([16, 12, 8, 5]), 240);
        assert_eq!(super_grid(std::iter::empty()), 1);
    }

    #[test]
    fn test_five_step_track_on_240_grid() {
        let fires: Vec<u64> = (0..240)
            .filter(|&c| local_step(c, 240, 5).is_some())
            .collect();
        assert_eq!(fires, vec![0, 48, 96, 144, 192]);
        assert_eq!(local_step(96, 240, 5), Some(2));
    }

    #[test]
    fn test_each_track_fires_steps_times_per_bar() {
        for set in [vec![16, 12, 8, 5], vec![7, 3], vec![1], vec![32, 31], vec![9, 6, 4]] {
            let grid = super_grid(set.iter().copied());
            for &steps in &set {
                let fired: Vec<usize> = (0..grid)
                    .filter_map(|c| local_step(c, grid, steps))
                    .collect();
                assert_eq!(fired, (0..steps).collect::<Vec<_>>(), "set={:?}", set);
            }
        }
    }

    #[test]
    fn test_pump_one_bar() {
        let tracks = tracks(&[16, 12, 8, 5]);
        let mut clock = PolyClock::default();
        clock.start(&tracks, 120.0, 10.0).unwrap();
        assert_eq!(clock.grid(), Some(240));

        let mut hits = Vec::new();
        let mut sink = |hit: &Hit<'_>| {
            hits.push((hit.track_id, hit.step, hit.time));
            Ok(())
        };
        let events = clock.pump(&tracks, 11.995, &mut sink);

        for (index, track) in tracks.iter().enumerate() {
            let count = events.iter().filter(|e| e.track == TrackId(index)).count();
            assert_eq!(count, track.steps());
        }
        assert!(events.windows(2).all(|w| w[0].time <= w[1].time));
        assert_eq!(hits.len(), 16 + 12 + 8 + 5);
        assert_eq!(clock.counter(), Some(0));

        // The 5 step track lands on every fifth of the two second bar.
        let times: Vec<f64> = events
            .iter()
            .filter(|e| e.track == TrackId(3))
            .map(|e| e.time)
            .collect();
        for (i, time) in times.iter().enumerate() {
            assert!((time - (10.0 + i as f64 * 0.4)).abs() < 1e-9);
        }
        assert_eq!(clock.last_fired(TrackId(3)), Some(4));
    }

    #[test]
    fn test_tracks_evaluated_in_order() {
        let tracks = tracks(&[4, 4, 4]);
        let mut clock = PolyClock::default();
        clock.start(&tracks, 120.0, 0.0).unwrap();
        let events = clock.pump(&tracks, 0.1, &mut no_sink());
        let order: Vec<usize> = events.iter().map(|e| e.track.0).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_stop_suppresses_firing() {
        let tracks = tracks(&[4]);
        let mut clock = PolyClock::default();
        clock.start(&tracks, 120.0, 0.0).unwrap();
        assert_eq!(clock.pump(&tracks, 0.6, &mut no_sink()).len(), 2);

        clock.stop();
        assert!(!clock.is_running());
        assert!(clock.pump(&tracks, 100.0, &mut no_sink()).is_empty());
        assert_eq!(clock.last_fired(TrackId(0)), None);

        clock.start(&tracks, 120.0, 5.0).unwrap();
        assert_eq!(clock.counter(), Some(0));
        let events = clock.pump(&tracks, 5.1, &mut no_sink());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].step, 0);
        assert_eq!(events[0].time, 5.0);
    }

    #[test]
    fn test_failing_track_is_skipped() {
        let tracks = tracks(&[4, 4]);
        let mut clock = PolyClock::default();
        clock.start(&tracks, 120.0, 0.0).unwrap();

        let mut fired = Vec::new();
        let mut sink = |hit: &Hit<'_>| {
            if hit.track_id == TrackId(0) {
                return Err(TriggerError::NonFiniteTime(f64::NAN));
            }
            fired.push(hit.track_id);
            Ok(())
        };
        let events = clock.pump(&tracks, 2.0, &mut sink);
        assert_eq!(events.len(), 8);
        assert_eq!(fired, vec![TrackId(1); 4]);
    }

    #[test]
    fn test_reschedule_keeps_bar_phase() {
        let mut tracks = tracks(&[4]);
        let mut clock = PolyClock::default();
        clock.start(&tracks, 120.0, 0.0).unwrap();
        let events = clock.pump(&tracks, 1.0, &mut no_sink());
        assert_eq!(events.len(), 2);
        assert_eq!(clock.next_tick_time(), Some(1.0));

        // Half way through the bar on a 4 grid lands half way through an 8 grid.
        tracks[0].set_steps(8).unwrap();
        clock.reschedule(&tracks, 120.0).unwrap();
        assert_eq!(clock.counter(), Some(4));
        assert_eq!(clock.next_tick_time(), Some(1.0));
        let events = clock.pump(&tracks, 1.3, &mut no_sink());
        assert_eq!(events[0].step, 4);
        assert_eq!(events[0].time, 1.0);
        assert_eq!(events[1].time, 1.25);

        // 6/8 of the bar rounds up to the next downbeat, a quarter bar after the due tick.
        tracks[0].set_steps(3).unwrap();
        clock.reschedule(&tracks, 120.0).unwrap();
        assert_eq!(clock.counter(), Some(0));
        let next = clock.next_tick_time().unwrap();
        assert!((next - 2.0).abs() < 1e-9, "next={}", next);
    }

    #[test]
    fn test_reschedule_tempo_never_goes_back() {
        let tracks = tracks(&[16, 12]);
        let mut clock = PolyClock::default();
        clock.start(&tracks, 120.0, 0.0).unwrap();
        let mut last = f64::MIN;
        for (bpm, horizon) in [(90.0, 0.7), (200.0, 1.3), (60.0, 2.0), (120.0, 4.0)] {
            for event in clock.pump(&tracks, horizon, &mut no_sink()) {
                assert!(event.time >= last);
                last = event.time;
            }
            clock.reschedule(&tracks, bpm).unwrap();
        }
    }

    #[test]
    fn test_grid_ceiling() {
        let tracks = tracks(&[31, 29, 27, 25, 23]);
        let clock = PolyClock::default();
        assert!(matches!(
            clock.check_grid(&tracks),
            Err(SequencerError::SuperGridTooLarge { max: 65_536, .. })
        ));

        let mut clock = PolyClock::new(100);
        assert!(clock.start(&tracks, 120.0, 0.0).is_err());
        assert!(!clock.is_running());
    }

    #[test]
    fn test_invalid_bpm() {
        let tracks = tracks(&[4]);
        let mut clock = PolyClock::default();
        assert_eq!(
            clock.start(&tracks, 0.0, 0.0),
            Err(SequencerError::InvalidBpm(0.0))
        );
        assert!(clock.start(&tracks, f64::INFINITY, 0.0).is_err());
    }

    #[test]
    fn test_manual_timeline() {
        let timeline = ManualTimeline::new(1.5);
        let shared = timeline.clone();
        shared.advance(0.25);
        assert_eq!(timeline.now(), 1.75);
    }
}
