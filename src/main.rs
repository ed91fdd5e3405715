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
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use duration_string::DurationString;
use parking_lot::Mutex;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use polyclid::player::{self, Player, TickView};
use polyclid::sampler::Sampler;
use polyclid::samples::SampleLibrary;
use polyclid::{audio, config, pattern, util};

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A Euclidean polyrhythm step sequencer."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prints each track's pattern and the session's super-grid.
    Patterns {
        /// The session file. The default session is used if omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Writes the session's tracks to a MIDI file.
    Export {
        /// The session file. The default session is used if omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// The tracks to export, by number. For example, 1,3. All tracks if omitted.
        #[arg(short, long)]
        tracks: Option<String>,
        /// The number of bars to write.
        #[arg(short, long)]
        bars: Option<u32>,
        /// Use per-step velocities instead of a fixed velocity.
        #[arg(long)]
        velocity: bool,
        /// Write a single merged track.
        #[arg(long)]
        merge: bool,
        /// The directory to write the file to.
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
    /// Plays the session through an audio device. Edits such as "steps 1 12" or "bpm 96" can be
    /// typed while playing.
    Play {
        /// The session file. The default session is used if omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// How long to play for, e.g. 30s. Plays until "quit" if omitted.
        #[arg(short, long)]
        duration: Option<String>,
        /// How far ahead of the audio device to schedule, e.g. 100ms.
        #[arg(short, long)]
        lookahead: Option<String>,
        /// The device name to play through. The system default output if omitted.
        #[arg(long)]
        device: Option<String>,
    },
    /// Lists the available audio output devices.
    Devices {},
    /// Writes the default session to a new file.
    Init {
        /// The path of the session file to create.
        path: PathBuf,
    },
}

/// Loads the session file, returning it along with the directory relative sample paths are
/// resolved against.
fn load_config(path: Option<&Path>) -> Result<(config::Session, PathBuf), Box<dyn Error>> {
    match path {
        Some(path) => {
            let base = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            Ok((config::Session::deserialize(path)?, base))
        }
        None => Ok((config::Session::default(), PathBuf::from("."))),
    }
}

fn parse_duration(value: Option<String>) -> Result<Option<Duration>, Box<dyn Error>> {
    Ok(match value {
        Some(value) => Some(DurationString::from_string(value)?.into()),
        None => None,
    })
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Patterns { config } => {
            let (config, base) = load_config(config.as_deref())?;
            let session = config.to_session(&base)?;

            println!(
                "{} ({} BPM, {} super-ticks per bar):",
                session.name(),
                session.bpm(),
                session.grid()
            );
            for (i, track) in session.tracks().iter().enumerate() {
                println!(
                    "{:>2}. {:<10} {:>2}/{:<2} +{:<2} {}",
                    i + 1,
                    track.name(),
                    track.pulses(),
                    track.steps(),
                    track.offset(),
                    pattern::format(track.pattern())
                );
            }
        }
        Commands::Export {
            config,
            tracks,
            bars,
            velocity,
            merge,
            out,
        } => {
            let (config, base) = load_config(config.as_deref())?;
            let session = config.to_session(&base)?;

            let mut options = config.export().clone();
            if let Some(bars) = bars {
                options.bars = bars;
            }
            options.velocity |= velocity;
            options.merge |= merge;

            let ids = match tracks {
                Some(tracks) => util::parse_track_list(&tracks)?,
                None => session.track_ids(),
            };
            let path = session.export_midi(&ids, &options)?.write_to_dir(&out)?;
            println!("Wrote {}", path.display());
        }
        Commands::Play {
            config,
            duration,
            lookahead,
            device,
        } => {
            let (config, base) = load_config(config.as_deref())?;
            let session = config.to_session(&base)?;
            let duration = parse_duration(duration)?;
            let lookahead = parse_duration(lookahead)?.unwrap_or(player::DEFAULT_LOOKAHEAD);

            let device = audio::get_device(device.as_deref())?;
            let mut library = SampleLibrary::with_builtins(device.sample_rate());
            for track in session.tracks() {
                // A sample that fails to load stays silent rather than stopping playback.
                if let Err(e) = library.load(track.sample()) {
                    warn!(err = %e, track = track.name(), "Unable to load sample");
                }
            }
            let sampler = Arc::new(Mutex::new(Sampler::new(
                library,
                config.voices_per_sample(),
            )));

            let (command_tx, command_rx) = crossbeam_channel::unbounded();
            thread::spawn(move || {
                for line in io::stdin().lock().lines() {
                    let Ok(line) = line else {
                        break;
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match line.parse::<player::Command>() {
                        Ok(command) => {
                            if command_tx.send(command).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(err = %e, "Unrecognized command"),
                    }
                }
            });

            let (tick_tx, tick_rx) = crossbeam_channel::unbounded::<TickView>();
            let display = thread::spawn(move || {
                for view in tick_rx {
                    println!("{:>9.3}  {}", view.time, view.rings.join("  "));
                }
            });

            let mut player = Player::new(session, sampler, device, lookahead)
                .with_export(config.export().clone(), PathBuf::from("."))
                .with_ticks(tick_tx);
            let result = player.run(command_rx, duration);
            drop(player);
            let _ = display.join();
            result?;
        }
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Init { path } => {
            if path.exists() {
                return Err(format!("{} already exists", path.display()).into());
            }
            config::Session::default().save(&path)?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}
