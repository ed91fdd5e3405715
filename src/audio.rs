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

//! Audio output.
//!
//! A device pulls frames from a shared [Sampler] and counts the frames it has rendered. That
//! count, through [FrameClock], is the timeline the sequencer schedules against, so triggers line
//! up with what the device actually plays.

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::Timeline;
use crate::sampler::Sampler;

pub mod cpal;
pub mod mock;

/// The time reached by an output, measured in rendered frames. Clones share the same count.
#[derive(Debug, Clone)]
pub struct FrameClock {
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl FrameClock {
    pub fn new(sample_rate: u32) -> FrameClock {
        FrameClock {
            frames: Arc::new(AtomicU64::new(0)),
            sample_rate: sample_rate.max(1),
        }
    }

    /// Frames rendered so far.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::AcqRel);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Timeline for FrameClock {
    fn now(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate)
    }
}

/// Renders one buffer of interleaved frames at the clock's current time and moves the clock past
/// it.
pub(crate) fn render_into(
    sampler: &Mutex<Sampler>,
    clock: &FrameClock,
    out: &mut [f32],
    channels: u16,
) {
    let channels = usize::from(channels.max(1));
    sampler.lock().render(clock.now(), out, channels);
    clock.advance((out.len() / channels) as u64);
}

pub trait Device: fmt::Display + Send + Sync {
    /// Starts rendering the sampler. Returns the clock advanced by the output.
    fn start(&self, sampler: Arc<Mutex<Sampler>>) -> Result<FrameClock, Box<dyn Error>>;

    /// Stops the output. Does nothing if the device is not playing.
    fn stop(&self);

    /// The rate the sampler must render at.
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;
}

/// Lists devices known to cpal.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, Box<dyn Error>> {
    cpal::Device::list()
}

/// Gets a device with the given name, or the system default output when no name is given.
pub fn get_device(name: Option<&str>) -> Result<Arc<dyn Device>, Box<dyn Error>> {
    if let Some(name) = name {
        if name.starts_with("mock") {
            return Ok(Arc::new(mock::Device::get(name)));
        }
    }

    Ok(Arc::new(cpal::Device::get(name)?))
}
