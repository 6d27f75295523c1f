//! Tick scheduling and away-time measurement.
//!
//! The loop is host-driven: the embedder calls [`GameLoop::tick`] with a
//! monotonic millisecond clock and receives the clamped delta to
//! simulate, or `None` while stopped or paused. Pausing preserves tick
//! and time counters; stopping zeroes them. Resuming re-bases the last
//! tick timestamp so the first delta after a pause is near zero rather
//! than the whole pause duration.
//!
//! Visibility hooks mirror a browser tab going to the background:
//! hiding auto-pauses, showing auto-resumes and reports how long the
//! loop was hidden so the caller can grant offline progress. A manual
//! pause is never undone by a visibility change.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Running,
    Paused,
}

/// What one tick should simulate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickContext {
    /// Clamped delta, in seconds.
    pub delta_secs: f64,
    /// 1-based tick ordinal since start.
    pub tick: u64,
    /// Accumulated simulated seconds since start.
    pub total_secs: f64,
    pub now_ms: u64,
}

pub struct GameLoop {
    state: LoopState,
    max_delta_secs: f64,
    last_tick_ms: u64,
    tick_count: u64,
    total_secs: f64,
    paused_at_ms: Option<u64>,
    /// Set when the pause came from a visibility hide, so only a
    /// visibility show undoes it.
    auto_paused: bool,
}

impl GameLoop {
    pub fn new(max_delta_secs: f64) -> Self {
        GameLoop {
            state: LoopState::Stopped,
            max_delta_secs,
            last_tick_ms: 0,
            tick_count: 0,
            total_secs: 0.0,
            paused_at_ms: None,
            auto_paused: false,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn total_secs(&self) -> f64 {
        self.total_secs
    }

    /// Begin ticking. A no-op unless stopped.
    pub fn start(&mut self, now_ms: u64) {
        if self.state != LoopState::Stopped {
            return;
        }
        self.state = LoopState::Running;
        self.last_tick_ms = now_ms;
    }

    /// Halt and zero the counters.
    pub fn stop(&mut self) {
        self.state = LoopState::Stopped;
        self.tick_count = 0;
        self.total_secs = 0.0;
        self.paused_at_ms = None;
        self.auto_paused = false;
    }

    /// Suspend ticking, keeping counters. Returns whether the state
    /// changed.
    pub fn pause(&mut self, now_ms: u64) -> bool {
        if self.state != LoopState::Running {
            return false;
        }
        self.state = LoopState::Paused;
        self.paused_at_ms = Some(now_ms);
        self.auto_paused = false;
        true
    }

    /// Resume after a pause. Returns the pause duration in milliseconds,
    /// or `None` if the loop was not paused. The next tick's delta is
    /// measured from `now_ms`, not from before the pause.
    pub fn resume(&mut self, now_ms: u64) -> Option<u64> {
        if self.state != LoopState::Paused {
            return None;
        }
        self.state = LoopState::Running;
        self.last_tick_ms = now_ms;
        self.auto_paused = false;
        self.paused_at_ms
            .take()
            .map(|at| now_ms.saturating_sub(at))
    }

    /// Environment went to the background: auto-pause if running.
    pub fn on_hidden(&mut self, now_ms: u64) {
        if self.pause(now_ms) {
            self.auto_paused = true;
        }
    }

    /// Environment returned to the foreground. Resumes only a pause that
    /// the matching hide caused, and reports the hidden duration for
    /// away-time rewards.
    pub fn on_visible(&mut self, now_ms: u64) -> Option<u64> {
        if self.state == LoopState::Paused && self.auto_paused {
            self.resume(now_ms)
        } else {
            None
        }
    }

    /// Advance the clock. Returns the tick to simulate while running,
    /// with the delta clamped to the configured maximum.
    pub fn tick(&mut self, now_ms: u64) -> Option<TickContext> {
        if self.state != LoopState::Running {
            return None;
        }
        let raw_secs = now_ms.saturating_sub(self.last_tick_ms) as f64 / 1000.0;
        let delta_secs = raw_secs.min(self.max_delta_secs);
        self.last_tick_ms = now_ms;
        self.tick_count += 1;
        self.total_secs += delta_secs;
        Some(TickContext {
            delta_secs,
            tick: self.tick_count,
            total_secs: self.total_secs,
            now_ms,
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
