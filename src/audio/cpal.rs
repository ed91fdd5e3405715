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

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Sample;
use parking_lot::Mutex;
use tracing::{error, info, span, Level};

use super::{render_into, Device as AudioDevice, FrameClock};
use crate::sampler::Sampler;

/// A cpal output device.
pub struct Device {
    name: String,
    host_id: cpal::HostId,
    device: cpal::Device,
    sample_rate: u32,
    channels: u16,
    sample_format: cpal::SampleFormat,
    running: Arc<AtomicBool>,
    output_thread: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}, Rate={}) ({})",
            self.name,
            self.channels,
            self.sample_rate,
            self.host_id.name()
        )
    }
}

impl Device {
    fn new(host_id: cpal::HostId, device: cpal::Device) -> Result<Device, Box<dyn Error>> {
        let config = device.default_output_config()?;
        Ok(Device {
            name: device.name()?,
            host_id,
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
            sample_format: config.sample_format(),
            device,
            running: Arc::new(AtomicBool::new(false)),
            output_thread: Mutex::new(None),
        })
    }

    /// Lists cpal output devices.
    pub fn list() -> Result<Vec<Box<dyn AudioDevice>>, Box<dyn Error>> {
        Ok(Device::list_cpal_devices()?
            .into_iter()
            .map(|device| {
                let device: Box<dyn AudioDevice> = Box::new(device);
                device
            })
            .collect())
    }

    fn list_cpal_devices() -> Result<Vec<Device>, Box<dyn Error>> {
        let mut devices: Vec<Device> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.output_devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            // Devices without a usable output configuration are skipped.
            devices.extend(host_devices.filter_map(|device| Device::new(host_id, device).ok()));
        }

        devices.sort_by_key(|device| device.name.to_string());
        Ok(devices)
    }

    /// Gets the cpal device with the given name, or the default output of the default host.
    pub fn get(name: Option<&str>) -> Result<Device, Box<dyn Error>> {
        match name {
            Some(name) => Device::list_cpal_devices()?
                .into_iter()
                .find(|device| device.name.trim() == name)
                .ok_or_else(|| format!("no device found with name {}", name).into()),
            None => {
                let host = cpal::default_host();
                let device = host
                    .default_output_device()
                    .ok_or("no default output device")?;
                Device::new(host.id(), device)
            }
        }
    }
}

impl AudioDevice for Device {
    fn start(&self, sampler: Arc<Mutex<Sampler>>) -> Result<FrameClock, Box<dyn Error>> {
        let span = span!(Level::INFO, "start output (cpal)");
        let _enter = span.enter();

        if self.running.swap(true, Ordering::AcqRel) {
            return Err(format!("{} is already playing", self.name).into());
        }

        let clock = FrameClock::new(self.sample_rate);
        let config = cpal::StreamConfig {
            channels: self.channels,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let device = self.device.clone();
        let sample_format = self.sample_format;
        let running = self.running.clone();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);

        // cpal streams can't move between threads, so the stream lives and dies on this one.
        let output_thread = {
            let clock = clock.clone();
            thread::spawn(move || {
                let stream = match sample_format {
                    cpal::SampleFormat::F32 => {
                        build_stream::<f32>(&device, &config, sampler, clock)
                    }
                    cpal::SampleFormat::I16 => {
                        build_stream::<i16>(&device, &config, sampler, clock)
                    }
                    cpal::SampleFormat::I32 => {
                        build_stream::<i32>(&device, &config, sampler, clock)
                    }
                    other => Err(format!("unsupported sample format {:?}", other).into()),
                };
                let stream = match stream.and_then(|stream| {
                    stream.play()?;
                    Ok(stream)
                }) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Keep the stream alive until stopped.
                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(100));
                }
                drop(stream);
            })
        };

        let ready = ready_rx
            .recv()
            .map_err(|e| e.to_string())
            .and_then(|ready| ready);
        if let Err(e) = ready {
            self.running.store(false, Ordering::Release);
            let _ = output_thread.join();
            error!(err = %e, device = self.name, "Failed to start CPAL stream");
            return Err(e.into());
        }

        info!(
            device = self.name,
            sample_rate = self.sample_rate,
            channels = self.channels,
            "CPAL output stream started"
        );
        *self.output_thread.lock() = Some(output_thread);
        Ok(clock)
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(output_thread) = self.output_thread.lock().take() {
            if output_thread.join().is_err() {
                error!(device = self.name, "CPAL output thread panicked");
            }
            info!(device = self.name, "CPAL output stream stopped");
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

/// Builds an output stream that renders the sampler into samples of type `T`.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sampler: Arc<Mutex<Sampler>>,
    clock: FrameClock,
) -> Result<cpal::Stream, Box<dyn Error>>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels;
    let mut scratch: Vec<f32> = Vec::new();
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            scratch.resize(data.len(), 0.0);
            render_into(&sampler, &clock, &mut scratch, channels);
            for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                *out = T::from_sample(sample.clamp(-1.0, 1.0));
            }
        },
        |err| error!("CPAL output stream error: {}", err),
        None,
    )?;
    Ok(stream)
}
