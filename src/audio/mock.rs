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

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, span, Level};

use super::{render_into, FrameClock};
use crate::sampler::Sampler;

pub const DEFAULT_SAMPLE_RATE: u32 = 44100;
const BLOCK_FRAMES: usize = 512;

/// What the mock is rendering while started.
struct Output {
    sampler: Arc<Mutex<Sampler>>,
    clock: FrameClock,
    thread: Option<JoinHandle<()>>,
}

/// A mock device. Renders the sampler and throws the audio away.
///
/// A realtime mock renders on its own thread at the pace of a real output. An offline mock only
/// renders when [Device::render] is called, which is what tests use to step through time.
pub struct Device {
    name: String,
    sample_rate: u32,
    channels: u16,
    realtime: bool,
    running: Arc<AtomicBool>,
    output: Mutex<Option<Output>>,
}

impl Device {
    /// Gets the given mock device. It renders in real time at the default rate.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 2,
            realtime: true,
            running: Arc::new(AtomicBool::new(false)),
            output: Mutex::new(None),
        }
    }

    /// Gets a mock that only renders on demand.
    pub fn offline(name: &str, sample_rate: u32, channels: u16) -> Device {
        Device {
            sample_rate,
            channels,
            realtime: false,
            ..Device::get(name)
        }
    }

    /// Returns true if the device is currently playing.
    pub fn is_playing(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Renders the next `frames` frames and returns them interleaved. Returns silence if the
    /// device has not been started.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * usize::from(self.channels)];
        if let Some(output) = self.output.lock().as_ref() {
            render_into(&output.sampler, &output.clock, &mut out, self.channels);
        }
        out
    }
}

impl super::Device for Device {
    fn start(&self, sampler: Arc<Mutex<Sampler>>) -> Result<FrameClock, Box<dyn Error>> {
        let span = span!(Level::INFO, "start output (mock)");
        let _enter = span.enter();

        if self.running.swap(true, Ordering::AcqRel) {
            return Err(format!("{} is already playing", self.name).into());
        }

        let clock = FrameClock::new(self.sample_rate);
        let thread = self.realtime.then(|| {
            let sampler = sampler.clone();
            let clock = clock.clone();
            let running = self.running.clone();
            let channels = self.channels;
            let block = Duration::from_secs_f64(BLOCK_FRAMES as f64 / f64::from(self.sample_rate));
            thread::spawn(move || {
                let mut scratch = vec![0.0; BLOCK_FRAMES * usize::from(channels)];
                while running.load(Ordering::Relaxed) {
                    render_into(&sampler, &clock, &mut scratch, channels);
                    spin_sleep::sleep(block);
                }
            })
        });

        info!(
            device = self.name,
            sample_rate = self.sample_rate,
            realtime = self.realtime,
            "Output started."
        );
        *self.output.lock() = Some(Output {
            sampler,
            clock: clock.clone(),
            thread,
        });
        Ok(clock)
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(output) = self.output.lock().take() {
            if let Some(thread) = output.thread {
                let _ = thread.join();
            }
            info!(device = self.name, frames = output.clock.frames(), "Output stopped.");
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}
