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

//! Synthesized drum one-shots. Noise comes from a seeded generator so every run produces the
//! same buffers.

use std::f32::consts::TAU;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Names of the built-in samples.
pub const LIBRARY: [&str; 4] = ["kick", "snare", "hihat", "tom"];

/// Shape of one synthesized drum.
struct Voicing {
    /// Length in seconds.
    length: f32,
    /// Tone frequency at the start and end of the hit.
    pitch: (f32, f32),
    /// Exponential decay rate of the tone.
    tone_decay: f32,
    /// Noise level and decay rate.
    noise: (f32, f32),
    /// Seed for the noise generator.
    seed: u64,
}

fn voicing(name: &str) -> Option<Voicing> {
    let voicing = match name {
        "kick" => Voicing {
            length: 0.5,
            pitch: (150.0, 45.0),
            tone_decay: 8.0,
            noise: (0.05, 60.0),
            seed: 1,
        },
        "snare" => Voicing {
            length: 0.3,
            pitch: (220.0, 180.0),
            tone_decay: 20.0,
            noise: (0.7, 14.0),
            seed: 2,
        },
        "hihat" => Voicing {
            length: 0.12,
            pitch: (0.0, 0.0),
            tone_decay: 0.0,
            noise: (0.6, 40.0),
            seed: 3,
        },
        "tom" => Voicing {
            length: 0.45,
            pitch: (200.0, 110.0),
            tone_decay: 9.0,
            noise: (0.08, 40.0),
            seed: 4,
        },
        _ => return None,
    };
    Some(voicing)
}

/// Renders the named built-in sample at `sample_rate`, or None for an unknown name.
pub(super) fn synthesize(name: &str, sample_rate: u32) -> Option<Vec<f32>> {
    let voicing = voicing(name)?;
    let rate = sample_rate as f32;
    let len = (voicing.length * rate) as usize;
    let mut rng = StdRng::seed_from_u64(voicing.seed);

    let mut phase = 0.0f32;
    let mut last_noise = 0.0f32;
    let (noise_level, noise_decay) = voicing.noise;
    let (start, end) = voicing.pitch;

    let data = (0..len)
        .map(|i| {
            let t = i as f32 / rate;
            let progress = i as f32 / len as f32;

            let freq = start + (end - start) * progress;
            phase = (phase + freq / rate).fract();
            let tone = (phase * TAU).sin() * (-voicing.tone_decay * t).exp();

            // First difference of white noise tilts it towards the top end.
            let white: f32 = rng.gen_range(-1.0..1.0);
            let noise = (white - last_noise) * 0.5;
            last_noise = white;

            let sample = if voicing.tone_decay > 0.0 { tone } else { 0.0 }
                + noise * noise_level * (-noise_decay * t).exp();
            (sample * 0.9).clamp(-1.0, 1.0)
        })
        .collect();
    Some(data)
}
