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

//! A Euclidean polyrhythm step sequencer.
//!
//! Tracks of different lengths share one bar: the clock ticks on the least common multiple of
//! every track's step count and each track advances only on the ticks that land on its own
//! steps. Active steps trigger pooled sample voices shaped by per-track envelopes, and the same
//! tracks can be written out as a quantized MIDI file.

pub mod audio;
pub mod clock;
pub mod config;
pub mod envelope;
pub mod error;
pub mod midi_export;
pub mod pattern;
pub mod player;
pub mod sampler;
pub mod samples;
pub mod session;
pub mod track;
pub mod util;
pub mod voice;
