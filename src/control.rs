// Copyright (c) 2018 Nuclear Furnace
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.
//! Control-plane primitives: the accept-pause gate and the
//! shutdown precondition check. Kept separate from [`crate::engine`] so the
//! gate itself is trivially testable without a full daemon wired up.

use crate::errors::{Error, ErrorCode, Result};
use crate::task::manager::TaskManager;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether the listener is currently admitting new connections. `PauseAccept`
/// sets it, `ResumeAccept` clears it; neither touches in-flight tasks.
#[derive(Default)]
pub struct AcceptGate {
    paused: AtomicBool,
}

impl AcceptGate {
    pub fn new() -> AcceptGate { AcceptGate::default() }

    pub fn pause(&self) { self.paused.store(true, Ordering::SeqCst); }

    pub fn resume(&self) { self.paused.store(false, Ordering::SeqCst); }

    pub fn is_paused(&self) -> bool { self.paused.load(Ordering::SeqCst) }

    /// Returns the gate-check error a request handler should surface for any
    /// operation that must be rejected while paused.
    pub fn check(&self) -> Result<()> {
        if self.is_paused() {
            Err(Error::new(ErrorCode::AcceptPaused))
        } else {
            Ok(())
        }
    }
}

/// Refuses to shut down while any task has not reached a terminal state
/// — an operator has to wait the backlog out or cancel it first,
/// there is no forced-drop-in-flight-task path.
pub fn check_shutdown_precondition(tasks: &TaskManager) -> Result<()> {
    if tasks.has_pending_tasks() {
        Err(Error::new(ErrorCode::TasksPending))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_starts_open() {
        let gate = AcceptGate::new();
        assert!(gate.check().is_ok());
    }

    #[test]
    fn pause_then_resume_round_trips() {
        let gate = AcceptGate::new();
        gate.pause();
        assert_eq!(gate.check().unwrap_err().code, ErrorCode::AcceptPaused);
        gate.resume();
        assert!(gate.check().is_ok());
    }
}
