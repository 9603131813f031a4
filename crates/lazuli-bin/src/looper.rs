//! The frame loop.
//!
//! Single-threaded cooperative scheduling on the tokio reactor: X socket
//! readability, the fade timer, the unredirection grace deadline, and unix
//! signals are the only wake sources. Each iteration runs the prepare phase
//! (drain + dispatch + flush) before deciding whether to emit a frame, so
//! event handling never interleaves with preprocess or paint.

use crate::session::Session;
use anyhow::Result;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};
use tokio::io::unix::AsyncFd;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info};

/// Why the loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExit {
    /// Clean quit (SIGINT/SIGTERM or benchmark quota).
    Quit,
    /// SIGUSR1: tear down and reinitialize against the same display.
    Restart,
    /// Unrecoverable condition; the process exits non-zero.
    Fatal(String),
}

/// Borrowed fd wrapper for reactor registration; the socket stays owned by
/// the X connection.
struct XSocket(RawFd);

impl AsRawFd for XSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

pub async fn run(session: &mut Session) -> Result<SessionExit> {
    let xfd = AsyncFd::with_interest(
        XSocket(session.host.raw_fd()),
        tokio::io::Interest::READABLE,
    )?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;

    let benchmark_mode = session.benchmark_active();
    let mut needs_frame = true;

    loop {
        // ---- prepare: drain queued X events, dispatch, flush ----------
        let events = session.host.poll_events();
        if !events.is_empty() {
            let outcome = session.dispatch_batch(&events)?;
            if outcome.quit {
                return Ok(SessionExit::Fatal(
                    "compositor-manager selection lost".into(),
                ));
            }
            needs_frame |= outcome.needs_frame || outcome.fade_started;
        }
        session.backend.handle_events();
        session.host.flush();

        // ---- frame ----------------------------------------------------
        if needs_frame || benchmark_mode {
            if session.config.pacing.software {
                let interval =
                    core_render::pacing::refresh_interval_us(session.config.pacing.refresh_rate);
                let now_us = session.now_ms() * 1000;
                let delay = core_render::pacing::delay_until_next_refresh(
                    now_us,
                    interval,
                    session.config.pacing.phase_us,
                );
                if delay >= 1 {
                    tokio::time::sleep(Duration::from_micros(delay)).await;
                }
            }
            let pre = session.frame();
            session.decide_redirection(&pre, Instant::now());
            needs_frame = false;
        }
        if session.benchmark_done() {
            info!(target: "runtime.loop", "benchmark_quota_reached");
            return Ok(SessionExit::Quit);
        }

        // ---- sleep: earliest of fade tick and unredirection deadline --
        let mut deadline: Option<Instant> = None;
        if session.fade_running {
            deadline = Some(Instant::now() + Duration::from_millis(session.config.fade.delta_ms));
        }
        if let Some(d) = session.redirect.deadline() {
            deadline = Some(deadline.map_or(d, |cur| cur.min(d)));
        }
        if benchmark_mode {
            // Benchmark frames run back to back.
            deadline = Some(Instant::now());
        }

        let timer = async {
            match deadline {
                Some(d) => tokio::time::sleep_until(tokio::time::Instant::from_std(d)).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = sigint.recv() => {
                info!(target: "runtime.loop", "sigint_quit");
                return Ok(SessionExit::Quit);
            }
            _ = sigterm.recv() => {
                info!(target: "runtime.loop", "sigterm_quit");
                return Ok(SessionExit::Quit);
            }
            _ = sigusr1.recv() => {
                info!(target: "runtime.loop", "sigusr1_restart");
                return Ok(SessionExit::Restart);
            }
            guard = xfd.readable() => {
                // Events are drained at the top of the next iteration.
                let mut guard = guard?;
                guard.clear_ready();
                debug!(target: "runtime.loop", "x_socket_readable");
            }
            _ = timer => {
                needs_frame = true;
            }
        }
    }
}
