//! Wall-clock fade stepping.
//!
//! Opacity moves toward its target in discrete steps of `in_step`/`out_step`
//! every `delta_ms`, catching up over missed intervals without ever crossing
//! the target. Times are plain milliseconds so tests can replay exact
//! schedules; the loop derives them from a monotonic clock.

use crate::Window;
use core_config::Config;

/// Fade tuning, copied out of config once per frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeParams {
    pub in_step: f64,
    pub out_step: f64,
    pub delta_ms: u64,
}

impl From<&Config> for FadeParams {
    fn from(config: &Config) -> Self {
        Self {
            in_step: config.fade.in_step,
            out_step: config.fade.out_step,
            delta_ms: config.fade.delta_ms,
        }
    }
}

/// Advance one window's fade to `now_ms`. Returns true when opacity moved.
///
/// The first call after a fade (re)starts only records the reference time:
/// a fade beginning between two ticks must not jump ahead of schedule.
pub fn step_fade(win: &mut Window, now_ms: u64, params: &FadeParams) -> bool {
    if win.opacity == win.opacity_tgt {
        win.fade_last_step_ms = Some(now_ms);
        return false;
    }
    let Some(last) = win.fade_last_step_ms else {
        win.fade_last_step_ms = Some(now_ms);
        return false;
    };
    let steps = now_ms.saturating_sub(last) / params.delta_ms;
    if steps == 0 {
        return false;
    }
    win.fade_last_step_ms = Some(last + steps * params.delta_ms);

    let before = win.opacity;
    if win.opacity < win.opacity_tgt {
        win.opacity = (win.opacity + params.in_step * steps as f64).min(win.opacity_tgt);
    } else {
        win.opacity = (win.opacity - params.out_step * steps as f64).max(win.opacity_tgt);
    }
    win.opacity != before
}
