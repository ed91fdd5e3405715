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

use std::path::Path;
use std::time::Duration;

use crate::track::TrackId;

/// Extracts a displayable file name from a path, returning a fallback if the name is unreadable.
pub fn filename_display(path: &Path) -> &str {
    path.file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("unreadable file name")
}

/// Outputs the given duration in a minutes:seconds format.
pub fn duration_minutes_seconds(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Draws a pattern as a row of `x` and `.`, with the playing step in brackets.
pub fn ring_display(pattern: &[bool], position: Option<usize>) -> String {
    pattern
        .iter()
        .enumerate()
        .map(|(i, &onset)| {
            let mark = if onset { 'x' } else { '.' };
            if Some(i) == position {
                format!("[{}]", mark)
            } else {
                mark.to_string()
            }
        })
        .collect()
}

/// Parses a one-based track number, as typed by a user.
pub fn parse_track_number(value: &str) -> Result<TrackId, String> {
    match value.trim().parse::<usize>() {
        Ok(number) if number >= 1 => Ok(TrackId(number - 1)),
        _ => Err(format!("invalid track number '{}'", value.trim())),
    }
}

/// Parses a comma separated list of one-based track numbers, e.g. `1,3`.
pub fn parse_track_list(value: &str) -> Result<Vec<TrackId>, String> {
    value
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(parse_track_number)
        .collect()
}
