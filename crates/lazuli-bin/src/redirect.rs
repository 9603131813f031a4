//! Redirect controller policy.
//!
//! Tracks the single `redirected` boolean and the unredirection grace timer.
//! The controller only decides; the session executes `redir_start` /
//! `redir_stop` (it owns the X host, the backend, and the damage ring).
//!
//! Timer semantics: the first frame where unredirection becomes possible
//! arms a one-shot deadline of `delay_ms`; any frame where it stops being
//! possible disarms it; the stop fires only when the deadline passes while
//! the condition still holds. With `delay_ms == 0` the stop is immediate.

use std::time::{Duration, Instant};
use tracing::debug;

/// What the session must execute after a controller update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirAction {
    None,
    /// Re-enter compositing (a window stopped covering the screen).
    Start,
    /// Leave compositing (grace period expired with the condition held).
    Stop,
}

#[derive(Debug)]
pub struct RedirectController {
    redirected: bool,
    unredir_delay: Duration,
    deadline: Option<Instant>,
}

impl RedirectController {
    pub fn new(unredir_delay_ms: u64) -> Self {
        Self {
            redirected: false,
            unredir_delay: Duration::from_millis(unredir_delay_ms),
            deadline: None,
        }
    }

    pub fn redirected(&self) -> bool {
        self.redirected
    }

    /// The session reports the actual transition after executing it.
    pub fn set_redirected(&mut self, redirected: bool) {
        self.redirected = redirected;
        self.deadline = None;
    }

    /// Pending grace deadline, for the loop's timer arming.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Feed this frame's unredirection verdict.
    pub fn note_decision(&mut self, unredir_possible: bool, now: Instant) -> RedirAction {
        if self.redirected {
            if !unredir_possible {
                if self.deadline.take().is_some() {
                    debug!(target: "runtime.redirect", "unredir_timer_disarmed");
                }
                return RedirAction::None;
            }
            if self.unredir_delay.is_zero() {
                return RedirAction::Stop;
            }
            match self.deadline {
                None => {
                    self.deadline = Some(now + self.unredir_delay);
                    debug!(
                        target: "runtime.redirect",
                        delay_ms = self.unredir_delay.as_millis() as u64,
                        "unredir_timer_armed"
                    );
                    RedirAction::None
                }
                Some(deadline) if now >= deadline => RedirAction::Stop,
                Some(_) => RedirAction::None,
            }
        } else if !unredir_possible {
            // Something needs compositing again.
            RedirAction::Start
        } else {
            RedirAction::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    #[test]
    fn immediate_stop_without_delay() {
        let mut c = RedirectController::new(0);
        c.set_redirected(true);
        let now = Instant::now();
        assert_eq!(c.note_decision(true, now), RedirAction::Stop);
    }

    #[test]
    fn grace_period_arms_then_fires() {
        let mut c = RedirectController::new(200);
        c.set_redirected(true);
        let base = Instant::now();
        assert_eq!(c.note_decision(true, base), RedirAction::None);
        assert!(c.deadline().is_some(), "timer armed on first true");
        // Still inside the grace period.
        assert_eq!(c.note_decision(true, at(base, 150)), RedirAction::None);
        // Deadline passed with the condition held.
        assert_eq!(c.note_decision(true, at(base, 200)), RedirAction::Stop);
    }

    #[test]
    fn condition_flap_rearms_from_scratch() {
        let mut c = RedirectController::new(200);
        c.set_redirected(true);
        let base = Instant::now();
        assert_eq!(c.note_decision(true, base), RedirAction::None);
        // A covering window appeared at t=100: timer disarmed.
        assert_eq!(c.note_decision(false, at(base, 100)), RedirAction::None);
        assert!(c.deadline().is_none());
        // Gone again at t=150: fresh 200ms grace, firing at t=350.
        assert_eq!(c.note_decision(true, at(base, 150)), RedirAction::None);
        assert_eq!(c.note_decision(true, at(base, 349)), RedirAction::None);
        assert_eq!(c.note_decision(true, at(base, 350)), RedirAction::Stop);
    }

    #[test]
    fn unredirected_screen_needing_compositing_restarts() {
        let mut c = RedirectController::new(200);
        c.set_redirected(false);
        let now = Instant::now();
        assert_eq!(c.note_decision(true, now), RedirAction::None, "still covered");
        assert_eq!(c.note_decision(false, now), RedirAction::Start);
    }

    #[test]
    fn transition_clears_timer_state() {
        let mut c = RedirectController::new(50);
        c.set_redirected(true);
        let base = Instant::now();
        c.note_decision(true, base);
        assert!(c.deadline().is_some());
        c.set_redirected(false);
        assert!(c.deadline().is_none());
    }
}
