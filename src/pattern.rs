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

//! Euclidean rhythm generation.
//!
//! Both operations are pure: no state is carried between calls and the same inputs always
//! produce the same pattern.

/// A binary step pattern. `true` marks an onset.
pub type Pattern = Vec<bool>;

/// Generates the maximally even distribution of `pulses` onsets across `steps` slots
/// (Bjorklund's algorithm).
///
/// `pulses >= steps` yields all onsets and `pulses == 0` yields silence. `steps == 0` yields an
/// empty pattern. Whenever the pattern holds at least one onset, step 0 is an onset, so
/// `generate(8, 3)` is `x..x..x.`.
pub fn generate(steps: usize, pulses: usize) -> Pattern {
    if pulses >= steps {
        return vec![true; steps];
    }
    if pulses == 0 {
        return vec![false; steps];
    }

    // Remainder chain of the Euclidean division between onsets and rests. Each level records
    // how many copies of the previous group it holds and whether a smaller group trails it.
    let mut counts = Vec::new();
    let mut remainders = vec![pulses];
    let mut divisor = steps - pulses;
    let mut level = 0;
    while remainders[level] > 1 {
        counts.push(divisor / remainders[level]);
        remainders.push(divisor % remainders[level]);
        divisor = remainders[level];
        level += 1;
    }
    counts.push(divisor);

    let mut pattern = Vec::with_capacity(steps);
    flatten(level as isize, &counts, &remainders, &mut pattern);
    pattern.truncate(steps);

    match pattern.iter().position(|&onset| onset) {
        Some(first) => rotate(&pattern, first as i64),
        None => pattern,
    }
}

/// Flattens the recursive group structure at `level` into `out`.
fn flatten(level: isize, counts: &[usize], remainders: &[usize], out: &mut Pattern) {
    match level {
        -1 => out.push(false),
        -2 => out.push(true),
        _ => {
            let l = level as usize;
            for _ in 0..counts[l] {
                flatten(level - 1, counts, remainders, out);
            }
            if remainders[l] != 0 {
                flatten(level - 2, counts, remainders, out);
            }
        }
    }
}

/// Rotates `pattern` circularly to the left by `offset` positions, so that index 0 of the result
/// is the element originally at `offset`. Negative offsets rotate to the right.
pub fn rotate<T: Clone>(pattern: &[T], offset: i64) -> Vec<T> {
    let mut rotated = pattern.to_vec();
    if rotated.is_empty() {
        return rotated;
    }

    let shift = offset.rem_euclid(rotated.len() as i64) as usize;
    rotated.rotate_left(shift);
    rotated
}

/// Counts the onsets in a pattern.
pub fn onsets(pattern: &[bool]) -> usize {
    pattern.iter().filter(|&&onset| onset).count()
}

/// Renders a pattern as a row of `x` (onset) and `.` (rest).
pub fn format(pattern: &[bool]) -> String {
    pattern
        .iter()
        .map(|&onset| if onset { 'x' } else { '.' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits(pattern: &[bool]) -> Vec<u8> {
        pattern.iter().map(|&b| b as u8).collect()
    }

    #[test]
    fn test_pulse_count_and_length() {
        for steps in 1..=32 {
            for pulses in 0..=steps {
                let pattern = generate(steps, pulses);
                assert_eq!(pattern.len(), steps, "steps={} pulses={}", steps, pulses);
                assert_eq!(onsets(&pattern), pulses, "steps={} pulses={}", steps, pulses);
            }
        }
    }

    #[test]
    fn test_known_rhythms() {
        assert_eq!(bits(&generate(8, 3)), vec![1, 0, 0, 1, 0, 0, 1, 0]);
        assert_eq!(
            bits(&generate(16, 4)),
            vec![1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0]
        );
        assert_eq!(bits(&generate(5, 2)), vec![1, 0, 1, 0, 0]);
        assert_eq!(format(&generate(12, 5)), "x.x..x.x..x.");
    }

    #[test]
    fn test_maximally_even_gaps() {
        // Gaps between consecutive onsets (wrapping) differ by at most one step.
        for steps in 2..=32 {
            for pulses in 1..steps {
                let pattern = generate(steps, pulses);
                let positions: Vec<usize> = (0..steps).filter(|&i| pattern[i]).collect();
                let gaps: Vec<usize> = positions
                    .iter()
                    .enumerate()
                    .map(|(i, &p)| {
                        let next = positions[(i + 1) % positions.len()];
                        (next + steps - p) % steps
                    })
                    .map(|gap| if gap == 0 { steps } else { gap })
                    .collect();
                let min = *gaps.iter().min().unwrap();
                let max = *gaps.iter().max().unwrap();
                assert!(max - min <= 1, "steps={} pulses={} gaps={:?}", steps, pulses, gaps);
            }
        }
    }

    #[test]
    fn test_edge_cases() {
        assert_eq!(generate(4, 4), vec![true; 4]);
        assert_eq!(generate(4, 9), vec![true; 4]);
        assert_eq!(generate(4, 0), vec![false; 4]);
        assert!(generate(0, 0).is_empty());
        assert!(generate(0, 3).is_empty());
        assert_eq!(generate(1, 1), vec![true]);
    }

    #[test]
    fn test_generate_is_deterministic() {
        assert_eq!(generate(13, 5), generate(13, 5));
    }

    #[test]
    fn test_rotate_left() {
        let pattern = generate(8, 3);
        assert_eq!(format(&rotate(&pattern, 1)), "..x..x.x");
        assert_eq!(format(&rotate(&pattern, -1)), ".x..x..x");
        assert_eq!(format(&rotate(&pattern, 9)), "..x..x.x");
    }

    #[test]
    fn test_rotate_identity() {
        let pattern = generate(12, 5);
        assert_eq!(rotate(&pattern, 0), pattern);
        assert_eq!(rotate(&pattern, pattern.len() as i64), pattern);
        assert_eq!(rotate(&pattern, -(pattern.len() as i64)), pattern);

        let empty: Vec<bool> = Vec::new();
        assert!(rotate(&empty, 3).is_empty());
    }

    #[test]
    fn test_rotate_is_invertible() {
        let pattern = generate(11, 4);
        for k in -30..30 {
            assert_eq!(rotate(&rotate(&pattern, k), -k), pattern, "k={}", k);
        }
    }
}
