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

//! A single recurring timer with generation-checked handles.
//!
//! Installing a recurrence supersedes the previous one in the same step, so there is never a
//! moment where two recurrences are live. Handles to superseded recurrences stop yielding
//! occurrences immediately, including ones that were already due.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// An evenly spaced series of occurrences starting at `start`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Recurrence {
    pub start: f64,
    pub period: f64,
}

impl Recurrence {
    fn occurrence(&self, n: u64) -> f64 {
        self.start + n as f64 * self.period
    }
}

/// Refers to one installed recurrence. A handle is live until the recurrence it was issued for is
/// cancelled or replaced.
#[derive(Debug, Clone)]
pub struct ScheduleHandle {
    generation: u64,
    live: Arc<AtomicU64>,
}

impl ScheduleHandle {
    /// Returns true while the recurrence behind this handle is still installed.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire) == self.generation
    }
}

#[derive(Debug)]
struct Installed {
    generation: u64,
    recurrence: Recurrence,
    /// Occurrences handed out so far.
    issued: u64,
}

/// Holds at most one installed recurrence.
#[derive(Debug, Default)]
pub struct Schedule {
    /// Generation of the installed recurrence. Bumped on every install and cancel.
    live: Arc<AtomicU64>,
    installed: Option<Installed>,
    /// Time of the last occurrence handed out under any generation.
    last_issued: Option<f64>,
}

impl Schedule {
    pub fn new() -> Schedule {
        Schedule::default()
    }

    /// Cancels whatever is installed and installs `recurrence` in its place. The first occurrence
    /// is never earlier than the last one already handed out.
    pub fn install(&mut self, mut recurrence: Recurrence) -> ScheduleHandle {
        if let Some(last) = self.last_issued {
            recurrence.start = recurrence.start.max(last);
        }
        let generation = self.live.fetch_add(1, Ordering::AcqRel) + 1;
        self.installed = Some(Installed {
            generation,
            recurrence,
            issued: 0,
        });
        ScheduleHandle {
            generation,
            live: self.live.clone(),
        }
    }

    /// Cancels the installed recurrence, if any, and forgets the issue history.
    pub fn cancel(&mut self) {
        self.live.fetch_add(1, Ordering::AcqRel);
        self.installed = None;
        self.last_issued = None;
    }

    /// Time of the next occurrence, if a recurrence is installed.
    pub fn next_due(&self) -> Option<f64> {
        self.installed
            .as_ref()
            .map(|installed| installed.recurrence.occurrence(installed.issued))
    }

    /// Hands out the next occurrence if it falls before `horizon` and `handle` is still live.
    pub fn take_due(&mut self, handle: &ScheduleHandle, horizon: f64) -> Option<f64> {
        if !handle.is_live() {
            return None;
        }
        let installed = self.installed.as_mut()?;
        if installed.generation != handle.generation {
            return None;
        }

        let due = installed.recurrence.occurrence(installed.issued);
        if due >= horizon {
            return None;
        }
        installed.issued += 1;
        self.last_issued = Some(due);
        Some(due)
    }
}
