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

//! Real-time playback.
//!
//! The player owns the session and runs a control loop next to the audio device: it applies
//! queued commands, then pumps the clock with a lookahead window so triggers are installed on the
//! sampler before the device renders them.

use std::error::Error;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use tracing::{info, span, warn, Level};

use crate::audio::Device;
use crate::clock::{StepEvent, Timeline};
use crate::envelope::AdsrParam;
use crate::midi_export::ExportOptions;
use crate::sampler::Sampler;
use crate::samples::{SampleLibrary, SampleRef};
use crate::session::SequencerSession;
use crate::track::TrackId;
use crate::util;

pub const DEFAULT_LOOKAHEAD: Duration = Duration::from_millis(100);

/// An edit or transport change requested while playing.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Steps(TrackId, usize),
    Pulses(TrackId, usize),
    Offset(TrackId, usize),
    Toggle(TrackId, usize),
    Velocity(TrackId, usize, u8),
    Adsr(TrackId, AdsrParam, f64),
    Gain(TrackId, f32),
    Sample(TrackId, SampleRef),
    Bpm(f64),
    Start,
    Stop,
    /// Writes a MIDI file of every track.
    Export,
    Quit,
}

fn parse_arg<T: FromStr>(args: &[&str], index: usize, what: &str) -> Result<T, String> {
    let value = args
        .get(index)
        .ok_or_else(|| format!("missing {}", what))?;
    value
        .parse()
        .map_err(|_| format!("invalid {} '{}'", what, value))
}

fn parse_track(args: &[&str]) -> Result<TrackId, String> {
    util::parse_track_number(args.first().ok_or("missing track number")?)
}

impl FromStr for Command {
    type Err = String;

    /// Parses commands such as `steps 1 12`, `toggle 2 5`, `adsr 3 release 0.4`, `sample 4 clap.wav`
    /// or `bpm 96`. Track numbers are one-based.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let Some(name) = words.next() else {
            return Err("empty command".to_string());
        };
        let args: Vec<&str> = words.collect();

        Ok(match name.to_lowercase().as_str() {
            "steps" => Command::Steps(parse_track(&args)?, parse_arg(&args, 1, "steps")?),
            "pulses" => Command::Pulses(parse_track(&args)?, parse_arg(&args, 1, "pulses")?),
            "offset" => Command::Offset(parse_track(&args)?, parse_arg(&args, 1, "offset")?),
            "toggle" => Command::Toggle(parse_track(&args)?, parse_arg(&args, 1, "step")?),
            "velocity" => Command::Velocity(
                parse_track(&args)?,
                parse_arg(&args, 1, "step")?,
                parse_arg(&args, 2, "velocity")?,
            ),
            "adsr" => Command::Adsr(
                parse_track(&args)?,
                parse_arg(&args, 1, "envelope parameter")?,
                parse_arg(&args, 2, "envelope value")?,
            ),
            "gain" => Command::Gain(parse_track(&args)?, parse_arg(&args, 1, "gain")?),
            "sample" => {
                let track = parse_track(&args)?;
                let sample: String = parse_arg(&args, 1, "sample")?;
                let sample = if sample.to_lowercase().ends_with(".wav") {
                    SampleRef::Custom {
                        file: PathBuf::from(sample),
                    }
                } else {
                    SampleRef::Library(sample)
                };
                Command::Sample(track, sample)
            }
            "bpm" => Command::Bpm(parse_arg(&args, 0, "bpm")?),
            "start" => Command::Start,
            "stop" => Command::Stop,
            "export" => Command::Export,
            "quit" | "exit" => Command::Quit,
            other => return Err(format!("unknown command '{}'", other)),
        })
    }
}

/// What the tracks look like on one super-tick, for display.
#[derive(Debug, Clone, PartialEq)]
pub struct TickView {
    pub time: f64,
    /// One ring per track. Tracks that fired on this tick show their step in brackets.
    pub rings: Vec<String>,
}

/// Groups step events by tick and draws every track's ring for each tick.
pub fn tick_views(session: &SequencerSession, events: &[StepEvent]) -> Vec<TickView> {
    events
        .chunk_by(|a, b| a.time == b.time)
        .map(|tick| TickView {
            time: tick[0].time,
            rings: session
                .tracks()
                .iter()
                .enumerate()
                .map(|(i, track)| {
                    let position = tick
                        .iter()
                        .find(|event| event.track == TrackId(i))
                        .map(|event| event.step);
                    util::ring_display(track.pattern(), position)
                })
                .collect(),
        })
        .collect()
}

/// Plays a session through an audio device.
pub struct Player {
    session: SequencerSession,
    sampler: Arc<Mutex<Sampler>>,
    device: Arc<dyn Device>,
    lookahead: Duration,
    export: ExportOptions,
    export_dir: PathBuf,
    ticks: Option<Sender<TickView>>,
}

impl Player {
    pub fn new(
        session: SequencerSession,
        sampler: Arc<Mutex<Sampler>>,
        device: Arc<dyn Device>,
        lookahead: Duration,
    ) -> Player {
        Player {
            session,
            sampler,
            device,
            lookahead,
            export: ExportOptions::default(),
            export_dir: PathBuf::from("."),
            ticks: None,
        }
    }

    /// Sets where and how the export command writes MIDI files.
    pub fn with_export(mut self, export: ExportOptions, dir: PathBuf) -> Player {
        self.export = export;
        self.export_dir = dir;
        self
    }

    /// Sends a view of every tick to `ticks`.
    pub fn with_ticks(mut self, ticks: Sender<TickView>) -> Player {
        self.ticks = Some(ticks);
        self
    }

    pub fn session(&self) -> &SequencerSession {
        &self.session
    }

    /// Applies one command, with anything audible placed at `at`. Returns false once the player
    /// should quit.
    pub fn apply(&mut self, command: Command, at: f64) -> Result<bool, Box<dyn Error>> {
        match command {
            Command::Steps(id, steps) => self.session.set_steps(id, steps)?,
            Command::Pulses(id, pulses) => self.session.set_pulses(id, pulses)?,
            Command::Offset(id, offset) => self.session.set_offset(id, offset)?,
            Command::Toggle(id, step) => self.session.toggle_step(id, step)?,
            Command::Velocity(id, step, velocity) => {
                self.session.set_velocity(id, step, velocity)?
            }
            Command::Adsr(id, param, value) => self.session.set_adsr(id, param, value)?,
            Command::Gain(id, gain) => self.session.set_gain(id, gain)?,
            Command::Sample(id, sample) => self.change_sample(id, sample, at)?,
            Command::Bpm(bpm) => self.session.set_bpm(bpm)?,
            Command::Start => self.session.start(at)?,
            Command::Stop => self.session.stop(),
            Command::Export => {
                let export = self
                    .session
                    .export_midi(&self.session.track_ids(), &self.export)?;
                let path = export.write_to_dir(&self.export_dir)?;
                info!(file = util::filename_display(&path), "Exported MIDI");
            }
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }

    /// Loads the new sample off the audio lock, then swaps it in. A stopped session auditions it.
    fn change_sample(
        &mut self,
        id: TrackId,
        sample: SampleRef,
        at: f64,
    ) -> Result<(), Box<dyn Error>> {
        self.session.track(id)?;
        if !self.sampler.lock().is_ready(&sample) {
            let mut staging = SampleLibrary::new(self.sampler.lock().sample_rate());
            staging.load(&sample)?;
            if let Some(buffer) = staging.get(&sample) {
                self.sampler.lock().register(sample.clone(), buffer.clone());
            }
        }
        self.session.set_sample(id, sample)?;
        if !self.session.is_running() {
            let track = self.session.track(id)?;
            self.sampler.lock().preview(id, track, at);
        }
        Ok(())
    }

    /// Fires every tick before `horizon` into the sampler.
    pub fn pump(&mut self, horizon: f64) -> Vec<StepEvent> {
        let events = {
            let mut sampler = self.sampler.lock();
            self.session.pump(horizon, &mut *sampler)
        };
        if let Some(ticks) = &self.ticks {
            for view in tick_views(&self.session, &events) {
                if ticks.send(view).is_err() {
                    break;
                }
            }
        }
        events
    }

    /// Plays until `duration` has passed, a quit command arrives or, without a duration, forever.
    pub fn run(
        &mut self,
        commands: Receiver<Command>,
        duration: Option<Duration>,
    ) -> Result<(), Box<dyn Error>> {
        let span = span!(Level::INFO, "play session");
        let _enter = span.enter();

        let clock = self.device.start(self.sampler.clone())?;
        let result = self.control_loop(&clock, commands, duration);
        self.session.stop();
        self.device.stop();
        result
    }

    fn control_loop(
        &mut self,
        timeline: &dyn Timeline,
        commands: Receiver<Command>,
        duration: Option<Duration>,
    ) -> Result<(), Box<dyn Error>> {
        let lookahead = self.lookahead.as_secs_f64();
        let interval = (self.lookahead / 4).max(Duration::from_millis(1));
        let started = Instant::now();

        self.session.start(timeline.now() + lookahead)?;
        info!(
            device = %self.device,
            bpm = self.session.bpm(),
            lcm = self.session.grid(),
            "Playing."
        );

        let mut commands = Some(commands);
        loop {
            while let Some(receiver) = &commands {
                let command = match receiver.try_recv() {
                    Ok(command) => command,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        commands = None;
                        break;
                    }
                };
                match self.apply(command, timeline.now() + lookahead) {
                    Ok(true) => {}
                    Ok(false) => {
                        info!(
                            played = util::duration_minutes_seconds(started.elapsed()),
                            "Quit."
                        );
                        return Ok(());
                    }
                    Err(e) => warn!(err = %e, "Command rejected"),
                }
            }

            self.pump(timeline.now() + lookahead);

            if duration.is_some_and(|duration| started.elapsed() >= duration) {
                break;
            }
            spin_sleep::sleep(interval);
        }

        info!(
            played = util::duration_minutes_seconds(started.elapsed()),
            "Finished playing."
        );
        Ok(())
    }
}
