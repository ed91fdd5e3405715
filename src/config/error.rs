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

use std::io;

use crate::error::SequencerError;

/// Errors raised while reading, writing or applying a session file.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Config load/parse error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Config serialize error: {0}")]
    Serialize(#[from] serde_yml::Error),

    #[error("Config I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid session: {0}")]
    Invalid(#[from] SequencerError),

    #[error("Invalid track {}: {source}", .index + 1)]
    Track {
        index: usize,
        #[source]
        source: SequencerError,
    },
}
