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
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Represents the lifecycle of a single sounding source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayState {
    /// The source is still producing audio.
    Playing,
    /// The source reached its end on its own.
    Finished,
    /// The source was stopped before its end.
    Cancelled,
}

/// A cancel handle is shared between the playback manager and the mixer. The manager cancels it
/// to stop a source; the mixer marks it finished when the source runs out of samples. Whichever
/// happens first wins; later transitions are ignored.
#[derive(Clone)]
pub struct CancelHandle {
    state: Arc<Mutex<PlayState>>,
    /// The condvar will handle notification of state changes.
    condvar: Arc<Condvar>,
}

impl CancelHandle {
    /// Creates a new cancel handle in the playing state.
    pub fn new() -> CancelHandle {
        CancelHandle {
            state: Arc::new(Mutex::new(PlayState::Playing)),
            condvar: Arc::new(Condvar::new()),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> PlayState {
        *self.state.lock()
    }

    /// Returns true if the source was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.state() == PlayState::Cancelled
    }

    /// Returns true while the source is neither finished nor cancelled.
    pub fn is_active(&self) -> bool {
        self.state() == PlayState::Playing
    }

    /// Cancels the source. Returns true if this call moved the handle out of the playing state.
    pub fn cancel(&self) -> bool {
        self.transition(PlayState::Cancelled)
    }

    /// Marks the source as having played to its end. Returns true if this call moved the handle
    /// out of the playing state.
    pub fn finish(&self) -> bool {
        self.transition(PlayState::Finished)
    }

    fn transition(&self, to: PlayState) -> bool {
        let mut state = self.state.lock();
        if *state != PlayState::Playing {
            return false;
        }
        *state = to;
        self.condvar.notify_all();
        true
    }

    /// Blocks until the source is finished or cancelled and returns the final state.
    pub fn wait(&self) -> PlayState {
        let mut state = self.state.lock();
        while *state == PlayState::Playing {
            self.condvar.wait(&mut state);
        }
        *state
    }

    /// Like [CancelHandle::wait], but gives up after the timeout and returns the state at that
    /// point.
    pub fn wait_timeout(&self, timeout: Duration) -> PlayState {
        let mut state = self.state.lock();
        if *state == PlayState::Playing {
            let _ = self
                .condvar
                .wait_while_for(&mut state, |s| *s == PlayState::Playing, timeout);
        }
        *state
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("state", &self.state())
            .finish()
    }
}
