//! Configuration loading, validation, and derived tables.
//!
//! Parses `lazuli.toml` (or an override path supplied by the binary) into a
//! [`ConfigFile`], validates it into the effective [`Config`] consumed by the
//! engine. Unknown fields are tolerated (TOML deserialization tolerance) so
//! the file format can grow without breaking older binaries; *invalid* values
//! are fatal before the main loop starts and never after it.
//!
//! The window-matching rule language is an external collaborator: the file
//! carries raw pattern strings, and the binary may install compiled
//! predicates into the [`RuleSet`]s after startup. An empty `RuleSet` never
//! matches, so the engine works unchanged with no rule engine present.

use serde::Deserialize;
use std::{fmt, fs, path::PathBuf};
use thiserror::Error;
use tracing::info;

mod rules;
mod wintable;

pub use rules::{Rule, RuleSet, RuleTarget};
pub use wintable::{WintypeFileOptions, WintypeOptions, WintypeTable};

/// Hard ceiling on stacked blur convolution passes.
pub const MAX_BLUR_PASS: usize = 4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid config value: {0}")]
    Invalid(String),
}

// -------------------------------------------------------------------------------------------------
// File schema (serde side)
// -------------------------------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FadeSection {
    pub in_step: f64,
    pub out_step: f64,
    pub delta_ms: u64,
    /// Suppress fading on window open/close only (focus fades still run).
    pub no_fading_openclose: bool,
    pub exclude: Vec<String>,
}

impl Default for FadeSection {
    fn default() -> Self {
        Self {
            in_step: 0.028,
            out_step: 0.03,
            delta_ms: 10,
            no_fading_openclose: false,
            exclude: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ShadowSection {
    pub enabled: bool,
    pub radius: i32,
    pub offset_x: i32,
    pub offset_y: i32,
    pub opacity: f64,
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    /// Crop each shadow to the monitor its window is on.
    pub crop_to_monitor: bool,
    pub exclude: Vec<String>,
    /// Screen rectangles (`[x, y, width, height]`) shadows never touch.
    pub exclude_region: Vec<[i32; 4]>,
}

impl Default for ShadowSection {
    fn default() -> Self {
        Self {
            enabled: false,
            radius: 12,
            offset_x: -15,
            offset_y: -15,
            opacity: 0.75,
            red: 0.0,
            green: 0.0,
            blue: 0.0,
            crop_to_monitor: false,
            exclude: Vec::new(),
            exclude_region: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OpacitySection {
    pub active: f64,
    pub inactive: f64,
    /// Let `inactive` win over `_NET_WM_WINDOW_OPACITY`.
    pub inactive_override: bool,
    pub frame: f64,
    pub inactive_dim: f64,
    /// Dim with a fixed alpha instead of scaling by window opacity.
    pub dim_fixed: bool,
}

impl Default for OpacitySection {
    fn default() -> Self {
        Self {
            active: 1.0,
            inactive: 1.0,
            inactive_override: false,
            frame: 1.0,
            inactive_dim: 0.0,
            dim_fixed: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct BlurSection {
    pub background: bool,
    pub background_frame: bool,
    /// Keep the kernel center fixed instead of scaling with window opacity.
    pub background_fixed: bool,
    /// One entry per pass: `width`, `height`, then `width*height` weights
    /// (the center weight is recomputed at paint time unless fixed).
    pub kernels: Vec<KernelSpecFile>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KernelSpecFile {
    pub width: usize,
    pub height: usize,
    pub weights: Vec<f64>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UnredirSection {
    pub if_possible: bool,
    pub delay_ms: u64,
    pub exclude: Vec<String>,
}

impl Default for UnredirSection {
    fn default() -> Self {
        Self {
            if_possible: false,
            delay_ms: 0,
            exclude: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PacingSection {
    /// Software frame pacing (no-vsync backends).
    pub software: bool,
    /// Fallback refresh rate in Hz when RandR reports nothing.
    pub refresh_rate: u32,
    /// Phase offset into the refresh interval, microseconds.
    pub phase_us: i64,
}

impl Default for PacingSection {
    fn default() -> Self {
        Self {
            software: false,
            refresh_rate: 60,
            phase_us: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RulesSection {
    pub paint_exclude: Vec<String>,
    pub invert_color: Vec<String>,
    pub blur_background_exclude: Vec<String>,
    pub focus: Vec<String>,
    /// `"<opacity>:<pattern>"` entries, evaluated by the external matcher.
    pub opacity: Vec<String>,
}

/// Raw parsed file. All sections optional; defaults match a bare invocation.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ConfigFile {
    pub fade: FadeSection,
    pub shadow: ShadowSection,
    pub opacity: OpacitySection,
    pub blur: BlurSection,
    pub unredir: UnredirSection,
    pub pacing: PacingSection,
    pub rules: RulesSection,
    /// Force client-side blending even for opaque windows.
    pub force_win_blend: bool,
    /// Per-wintype overrides keyed by `WinType::config_key()`.
    pub wintypes: std::collections::HashMap<String, wintable::WintypeFileOptions>,
}

// -------------------------------------------------------------------------------------------------
// Effective config
// -------------------------------------------------------------------------------------------------

/// A single blur convolution pass with the center slot tracked explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct BlurKernel {
    pub width: usize,
    pub height: usize,
    /// Row-major weights, `width * height` entries; the center entry is a
    /// placeholder overwritten per paint unless `background_fixed`.
    pub weights: Vec<f64>,
}

impl BlurKernel {
    pub fn center_index(&self) -> usize {
        (self.height / 2) * self.width + self.width / 2
    }

    /// Default 3x3 box kernel used when blur is on but no kernel configured.
    pub fn default_box() -> Self {
        Self {
            width: 3,
            height: 3,
            weights: vec![1.0; 9],
        }
    }
}

/// Validated, effective configuration. Immutable after startup except for
/// force-override hooks (control surface) which mutate the rule sets only.
#[derive(Debug)]
pub struct Config {
    pub fade: FadeSection,
    pub shadow: ShadowSection,
    pub opacity: OpacitySection,
    pub blur_background: bool,
    pub blur_background_frame: bool,
    pub blur_background_fixed: bool,
    pub blur_kernels: Vec<BlurKernel>,
    pub unredir_if_possible: bool,
    pub unredir_delay_ms: u64,
    pub pacing: PacingSection,
    pub force_win_blend: bool,
    pub wintypes: WintypeTable,

    // Compiled rule sets; empty until a rule engine installs predicates.
    pub shadow_exclude: RuleSet,
    pub fade_exclude: RuleSet,
    pub paint_exclude: RuleSet,
    pub unredir_exclude: RuleSet,
    pub invert_color_rules: RuleSet,
    pub blur_exclude: RuleSet,
    pub focus_rules: RuleSet,
    pub opacity_rules: RuleSet,

    /// Raw pattern strings retained for the rule engine and diagnostics.
    pub raw_rules: RulesSection,
    pub raw_shadow_exclude: Vec<String>,
    pub raw_fade_exclude: Vec<String>,
    pub raw_unredir_exclude: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config::from_file(ConfigFile::default()).expect("defaults validate")
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fade({}ms,+{},-{}) shadow({}) blur({} passes) unredir({},{}ms)",
            self.fade.delta_ms,
            self.fade.in_step,
            self.fade.out_step,
            self.shadow.enabled,
            self.blur_kernels.len(),
            self.unredir_if_possible,
            self.unredir_delay_ms,
        )
    }
}

/// Best-effort config path following platform conventions (XDG).
pub fn discover() -> PathBuf {
    let local = PathBuf::from("lazuli.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("lazuli").join("lazuli.toml");
    }
    PathBuf::from("lazuli.toml")
}

/// Load and validate. A missing file yields defaults; an unreadable or
/// unparsable file is fatal (never degrade silently at startup).
pub fn load_from(path: Option<PathBuf>) -> Result<Config, ConfigError> {
    let explicit = path.is_some();
    let path = path.unwrap_or_else(discover);
    let content = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
            info!(target: "config", path = %path.display(), "config_file_absent_using_defaults");
            return Config::from_file(ConfigFile::default());
        }
        Err(source) => return Err(ConfigError::Read { path, source }),
    };
    let file: ConfigFile = toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.clone(),
        message: e.to_string(),
    })?;
    info!(target: "config", path = %path.display(), "config_file_loaded");
    Config::from_file(file)
}

impl Config {
    /// Validate a parsed file into the effective config.
    pub fn from_file(file: ConfigFile) -> Result<Config, ConfigError> {
        fn unit(name: &str, v: f64) -> Result<f64, ConfigError> {
            if (0.0..=1.0).contains(&v) && v.is_finite() {
                Ok(v)
            } else {
                Err(ConfigError::Invalid(format!("{name} = {v} not in [0, 1]")))
            }
        }
        fn step(name: &str, v: f64) -> Result<f64, ConfigError> {
            if v > 0.0 && v <= 1.0 {
                Ok(v)
            } else {
                Err(ConfigError::Invalid(format!("{name} = {v} not in (0, 1]")))
            }
        }

        step("fade.in_step", file.fade.in_step)?;
        step("fade.out_step", file.fade.out_step)?;
        if file.fade.delta_ms == 0 {
            return Err(ConfigError::Invalid("fade.delta_ms = 0".into()));
        }
        unit("shadow.opacity", file.shadow.opacity)?;
        for (name, v) in [
            ("shadow.red", file.shadow.red),
            ("shadow.green", file.shadow.green),
            ("shadow.blue", file.shadow.blue),
        ] {
            unit(name, v)?;
        }
        if file.shadow.radius < 0 {
            return Err(ConfigError::Invalid(format!(
                "shadow.radius = {} negative",
                file.shadow.radius
            )));
        }
        unit("opacity.active", file.opacity.active)?;
        unit("opacity.inactive", file.opacity.inactive)?;
        unit("opacity.frame", file.opacity.frame)?;
        unit("opacity.inactive_dim", file.opacity.inactive_dim)?;
        if file.opacity.active == 0.0 {
            return Err(ConfigError::Invalid("opacity.active = 0".into()));
        }
        if file.pacing.refresh_rate == 0 {
            return Err(ConfigError::Invalid("pacing.refresh_rate = 0".into()));
        }

        if file.blur.kernels.len() > MAX_BLUR_PASS {
            return Err(ConfigError::Invalid(format!(
                "blur.kernels has {} passes, max {MAX_BLUR_PASS}",
                file.blur.kernels.len()
            )));
        }
        let mut blur_kernels = Vec::with_capacity(file.blur.kernels.len().max(1));
        for (i, k) in file.blur.kernels.iter().enumerate() {
            if k.width % 2 == 0 || k.height % 2 == 0 || k.width == 0 || k.height == 0 {
                return Err(ConfigError::Invalid(format!(
                    "blur.kernels[{i}] dimensions {}x{} must be odd",
                    k.width, k.height
                )));
            }
            if k.weights.len() != k.width * k.height {
                return Err(ConfigError::Invalid(format!(
                    "blur.kernels[{i}] has {} weights, expected {}",
                    k.weights.len(),
                    k.width * k.height
                )));
            }
            blur_kernels.push(BlurKernel {
                width: k.width,
                height: k.height,
                weights: k.weights.clone(),
            });
        }
        if file.blur.background && blur_kernels.is_empty() {
            blur_kernels.push(BlurKernel::default_box());
        }

        let wintypes = WintypeTable::from_file(&file.wintypes)?;

        Ok(Config {
            blur_background: file.blur.background,
            blur_background_frame: file.blur.background_frame,
            blur_background_fixed: file.blur.background_fixed,
            blur_kernels,
            unredir_if_possible: file.unredir.if_possible,
            unredir_delay_ms: file.unredir.delay_ms,
            pacing: file.pacing.clone(),
            force_win_blend: file.force_win_blend,
            wintypes,
            shadow_exclude: RuleSet::default(),
            fade_exclude: RuleSet::default(),
            paint_exclude: RuleSet::default(),
            unredir_exclude: RuleSet::default(),
            invert_color_rules: RuleSet::default(),
            blur_exclude: RuleSet::default(),
            focus_rules: RuleSet::default(),
            opacity_rules: RuleSet::default(),
            raw_rules: file.rules.clone(),
            raw_shadow_exclude: file.shadow.exclude.clone(),
            raw_fade_exclude: file.fade.exclude.clone(),
            raw_unredir_exclude: file.unredir.exclude.clone(),
            fade: file.fade,
            shadow: file.shadow,
            opacity: file.opacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        let cfg = Config::default();
        assert_eq!(cfg.fade.delta_ms, 10);
        assert!(!cfg.shadow.enabled);
        assert!(cfg.blur_kernels.is_empty());
        assert!(!cfg.shadow_exclude.matches(&RuleTarget::default()));
    }

    #[test]
    fn load_from_missing_default_path_is_defaults() {
        // Explicitly nonexistent path must error; implicit discovery falls back.
        let err = load_from(Some(PathBuf::from("/nonexistent/lazuli.toml")));
        assert!(matches!(err, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn parse_and_validate_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"
[fade]
in_step = 0.1
delta_ms = 5

[shadow]
enabled = true
radius = 8
opacity = 0.5

[unredir]
if_possible = true
delay_ms = 200

[wintypes.tooltip]
shadow = false
opacity = 0.9
"#
        )
        .unwrap();
        let cfg = load_from(Some(f.path().to_path_buf())).unwrap();
        assert_eq!(cfg.fade.in_step, 0.1);
        assert_eq!(cfg.fade.delta_ms, 5);
        assert!(cfg.shadow.enabled);
        assert_eq!(cfg.shadow.radius, 8);
        assert!(cfg.unredir_if_possible);
        assert_eq!(cfg.unredir_delay_ms, 200);
        let tip = cfg.wintypes.get(core_events::WinType::Tooltip);
        assert_eq!(tip.shadow, Some(false));
        assert_eq!(tip.opacity, Some(0.9));
    }

    #[test]
    fn unknown_fields_tolerated() {
        let file: ConfigFile =
            toml::from_str("[fade]\nin_step = 0.2\nfuture_knob = true\n").unwrap();
        let cfg = Config::from_file(file).unwrap();
        assert_eq!(cfg.fade.in_step, 0.2);
    }

    #[test]
    fn invalid_values_are_fatal() {
        for toml_src in [
            "[fade]\nin_step = 0.0\n",
            "[fade]\ndelta_ms = 0\n",
            "[shadow]\nopacity = 1.5\n",
            "[opacity]\nactive = 0.0\n",
            "[pacing]\nrefresh_rate = 0\n",
        ] {
            let file: ConfigFile = toml::from_str(toml_src).unwrap();
            assert!(
                Config::from_file(file).is_err(),
                "expected rejection of {toml_src:?}"
            );
        }
    }

    #[test]
    fn blur_kernel_validation() {
        let file: ConfigFile = toml::from_str(
            "[blur]\nbackground = true\nkernels = [{ width = 2, height = 3, weights = [1,1,1,1,1,1] }]\n",
        )
        .unwrap();
        assert!(Config::from_file(file).is_err(), "even width rejected");

        let file: ConfigFile = toml::from_str("[blur]\nbackground = true\n").unwrap();
        let cfg = Config::from_file(file).unwrap();
        assert_eq!(cfg.blur_kernels.len(), 1, "default box kernel installed");
        assert_eq!(cfg.blur_kernels[0].center_index(), 4);
    }

    #[test]
    fn too_many_blur_passes_rejected() {
        let spec = "{ width = 3, height = 3, weights = [1,1,1,1,1,1,1,1,1] }";
        let src = format!("[blur]\nkernels = [{spec}, {spec}, {spec}, {spec}, {spec}]\n");
        let file: ConfigFile = toml::from_str(&src).unwrap();
        assert!(Config::from_file(file).is_err());
    }
}
