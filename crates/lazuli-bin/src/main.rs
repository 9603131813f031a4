//! Lazuli entrypoint.
//!
//! Startup order matters: logging and the panic hook first, then the config
//! (parse failures are fatal here and never later), then the session, whose
//! loop runs until a signal or the benchmark quota ends it. SIGUSR1 tears
//! the whole session down and rebuilds it against the same display with a
//! freshly loaded config.

mod looper;
mod redirect;
mod session;

use anyhow::{Context, Result};
use clap::Parser;
use looper::SessionExit;
use session::Session;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

/// CLI arguments. Flags override the config file.
#[derive(Parser, Debug)]
#[command(name = "lazuli", version, about = "Lazuli compositing manager")]
struct Args {
    /// X display to connect to (defaults to $DISPLAY).
    #[arg(long)]
    display: Option<String>,
    /// Configuration file path (overrides discovery of `lazuli.toml`).
    #[arg(long = "config")]
    config: Option<PathBuf>,
    /// Log file path (defaults to ./lazuli.log).
    #[arg(long = "log-file")]
    log_file: Option<PathBuf>,
    /// Write a PID file at this path.
    #[arg(long = "write-pid-path")]
    write_pid_path: Option<PathBuf>,
    /// Exit after this many painted frames.
    #[arg(long)]
    benchmark: Option<u64>,
    /// Enable drop shadows.
    #[arg(long)]
    shadow: bool,
    /// Disable all opacity fading.
    #[arg(long = "no-fading")]
    no_fading: bool,
    /// Suppress fading on window open/close only.
    #[arg(long = "no-fading-openclose")]
    no_fading_openclose: bool,
    /// Unredirect when a solid fullscreen window covers the screen.
    #[arg(long = "unredir-if-possible")]
    unredir_if_possible: bool,
    /// Blur the background behind transparent windows.
    #[arg(long = "blur-background")]
    blur_background: bool,
    /// Force blending even for opaque windows.
    #[arg(long = "force-win-blend")]
    force_win_blend: bool,
}

struct AppStartup {
    log_guard: Option<WorkerGuard>,
}

impl AppStartup {
    fn new() -> Self {
        Self { log_guard: None }
    }

    fn configure_logging(&mut self, path: Option<&Path>) -> Result<()> {
        let log_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("lazuli.log"));
        if log_path.exists() {
            let _ = std::fs::remove_file(&log_path);
        }
        let dir = log_path.parent().filter(|p| !p.as_os_str().is_empty());
        let name = log_path.file_name().context("log file path has no name")?;
        let file_appender =
            tracing_appender::rolling::never(dir.unwrap_or(Path::new(".")), name);
        let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
        match tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(nb_writer)
            .try_init()
        {
            Ok(()) => {
                self.log_guard = Some(guard);
            }
            Err(_) => {
                // Global subscriber already installed (tests); drop the
                // guard so the writer shuts down.
            }
        }
        Ok(())
    }

    fn install_panic_hook() {
        static HOOK: Once = Once::new();
        HOOK.call_once(|| {
            let default_panic = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                tracing::error!(target: "runtime.panic", ?info, "panic");
                default_panic(info);
            }));
        });
    }
}

fn write_pid_file(path: &Path) -> Result<()> {
    std::fs::write(path, format!("{}\n", std::process::id()))
        .with_context(|| format!("cannot write pid file {}", path.display()))
}

fn apply_cli_overrides(config: &mut core_config::Config, args: &Args) {
    if args.shadow {
        config.shadow.enabled = true;
    }
    if args.no_fading {
        // Full-step fades settle on the first tick, i.e. no animation.
        config.fade.in_step = 1.0;
        config.fade.out_step = 1.0;
    }
    if args.no_fading_openclose {
        config.fade.no_fading_openclose = true;
    }
    if args.unredir_if_possible {
        config.unredir_if_possible = true;
    }
    if args.blur_background {
        config.blur_background = true;
        if config.blur_kernels.is_empty() {
            config.blur_kernels.push(core_config::BlurKernel::default_box());
        }
    }
    if args.force_win_blend {
        config.force_win_blend = true;
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut startup = AppStartup::new();
    startup.configure_logging(args.log_file.as_deref())?;
    AppStartup::install_panic_hook();
    info!(target: "runtime", version = env!("CARGO_PKG_VERSION"), "startup");

    if let Some(path) = &args.write_pid_path {
        write_pid_file(path)?;
    }

    loop {
        // Config reloads on every (re)start; a broken file is fatal before
        // the loop and never during.
        let mut config = core_config::load_from(args.config.clone())?;
        apply_cli_overrides(&mut config, &args);

        let mut session = Session::new(args.display.as_deref(), config, args.benchmark)?;
        let exit = looper::run(&mut session).await;
        session.shutdown();
        match exit? {
            SessionExit::Quit => {
                info!(target: "runtime", "shutdown");
                return Ok(());
            }
            SessionExit::Restart => {
                info!(target: "runtime", "restart_requested");
            }
            SessionExit::Fatal(message) => {
                error!(target: "runtime", message = %message, "fatal");
                anyhow::bail!(message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_layer_onto_config() {
        let mut config = core_config::Config::default();
        let args = Args::parse_from([
            "lazuli",
            "--shadow",
            "--no-fading",
            "--unredir-if-possible",
            "--blur-background",
        ]);
        apply_cli_overrides(&mut config, &args);
        assert!(config.shadow.enabled);
        assert_eq!(config.fade.in_step, 1.0);
        assert!(config.unredir_if_possible);
        assert!(config.blur_background);
        assert_eq!(config.blur_kernels.len(), 1, "default kernel installed");
    }

    #[test]
    fn pid_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lazuli.pid");
        write_pid_file(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim().parse::<u32>().unwrap(), std::process::id());
    }

    #[test]
    fn args_parse_defaults() {
        let args = Args::parse_from(["lazuli"]);
        assert!(args.display.is_none());
        assert!(args.benchmark.is_none());
        assert!(!args.shadow);
    }
}
