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

//! Sample identities and the in-memory buffers behind them.
//!
//! This module provides:
//! - Sample references (a built-in library name or a user-loaded WAV file)
//! - Synthesized built-in drum sounds
//! - WAV loading and sample rate conversion
//! - The ready flag per sample identity the trigger path checks

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

mod builtin;
mod loader;

pub use builtin::LIBRARY;
pub use loader::load_wav;

/// Identity of a sound source.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum SampleRef {
    /// A sample from the built-in library, by name.
    Library(String),
    /// A user-loaded WAV file.
    Custom { file: PathBuf },
}

impl SampleRef {
    /// Creates a reference to a built-in sample.
    pub fn library(name: &str) -> SampleRef {
        SampleRef::Library(name.to_string())
    }

    /// Upper-case label used in track names, e.g. `KICK` or `CLAP` for `clap.wav`.
    pub fn label(&self) -> String {
        match self {
            SampleRef::Library(name) => name.to_uppercase(),
            SampleRef::Custom { file } => file
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_uppercase())
                .unwrap_or_else(|| "CUSTOM".to_string()),
        }
    }

    /// Returns true for user-loaded samples.
    pub fn is_custom(&self) -> bool {
        matches!(self, SampleRef::Custom { .. })
    }
}

impl fmt::Display for SampleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleRef::Library(name) => write!(f, "{}", name),
            SampleRef::Custom { file } => write!(f, "{}", file.display()),
        }
    }
}

/// Errors raised while preparing sample buffers.
#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("No built-in sample named {0}")]
    UnknownLibrarySample(String),

    #[error("Failed to read {path}: {source}")]
    Wav {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("{path} has an unsupported sample format ({bits} bit {format:?})")]
    UnsupportedFormat {
        path: PathBuf,
        bits: u16,
        format: hound::SampleFormat,
    },

    #[error("{0} contains no audio")]
    Empty(PathBuf),

    #[error("Unable to resample {path} from {source_rate}Hz to {target_rate}Hz")]
    Resample {
        path: PathBuf,
        source_rate: u32,
        target_rate: u32,
    },
}

/// A mono one-shot held entirely in memory. Cloning shares the data.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    data: Arc<Vec<f32>>,
    sample_rate: u32,
}

impl SampleBuffer {
    /// Wraps mono sample data recorded at `sample_rate`.
    pub fn new(data: Vec<f32>, sample_rate: u32) -> SampleBuffer {
        SampleBuffer {
            data: Arc::new(data),
            sample_rate,
        }
    }

    /// Reads the sample `seconds` into the buffer. Silence outside the buffer.
    pub fn sample_at(&self, seconds: f64) -> f32 {
        if seconds < 0.0 {
            return 0.0;
        }
        let index = (seconds * f64::from(self.sample_rate)) as usize;
        self.data.get(index).copied().unwrap_or(0.0)
    }

    /// Length of the sample in seconds.
    pub fn duration(&self) -> f64 {
        self.data.len() as f64 / f64::from(self.sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Buffers keyed by sample identity. A sample is ready once its buffer is registered.
#[derive(Debug, Clone)]
pub struct SampleLibrary {
    sample_rate: u32,
    buffers: HashMap<SampleRef, SampleBuffer>,
}

impl SampleLibrary {
    /// Creates an empty library whose buffers play at `sample_rate`.
    pub fn new(sample_rate: u32) -> SampleLibrary {
        SampleLibrary {
            sample_rate,
            buffers: HashMap::new(),
        }
    }

    /// Creates a library with every built-in sample ready.
    pub fn with_builtins(sample_rate: u32) -> SampleLibrary {
        let mut library = SampleLibrary::new(sample_rate);
        for name in LIBRARY {
            if let Some(data) = builtin::synthesize(name, sample_rate) {
                library.register(SampleRef::library(name), SampleBuffer::new(data, sample_rate));
            }
        }
        info!(samples = library.buffers.len(), sample_rate, "Built-in samples ready");
        library
    }

    /// Makes `sample` ready with the given buffer, replacing any earlier one.
    pub fn register(&mut self, sample: SampleRef, buffer: SampleBuffer) {
        debug!(sample = %sample, seconds = buffer.duration(), "Sample registered");
        self.buffers.insert(sample, buffer);
    }

    /// Loads the buffer for `sample` if it is not ready yet.
    pub fn load(&mut self, sample: &SampleRef) -> Result<(), SampleError> {
        if self.is_ready(sample) {
            return Ok(());
        }
        let buffer = match sample {
            SampleRef::Library(name) => builtin::synthesize(name, self.sample_rate)
                .map(|data| SampleBuffer::new(data, self.sample_rate))
                .ok_or_else(|| SampleError::UnknownLibrarySample(name.clone()))?,
            SampleRef::Custom { file } => load_wav(file, self.sample_rate)?,
        };
        self.register(sample.clone(), buffer);
        Ok(())
    }

    /// Returns true once `sample` can be played.
    pub fn is_ready(&self, sample: &SampleRef) -> bool {
        self.buffers.contains_key(sample)
    }

    pub fn get(&self, sample: &SampleRef) -> Option<&SampleBuffer> {
        self.buffers.get(sample)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
