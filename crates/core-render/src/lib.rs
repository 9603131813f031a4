//! Per-frame pipeline: damage accumulation, preprocess, and paint.
//!
//! Each frame runs exactly two stack traversals:
//!
//! 1. [`preprocess::paint_preprocess`] walks top-to-bottom: advances fades,
//!    culls invisible windows, recomputes paint modes, rebuilds the shared
//!    opaque-above (`reg_ignore`) chain, decides whether unredirection is
//!    possible, and emits the frame's paint list.
//! 2. [`paint::paint_all`] walks the paint list bottom-to-top: root tile,
//!    shadows, blur, window bodies, dim, then one `present`.
//!
//! Invariants the pipeline maintains:
//! - After preprocess, every window's `reg_ignore` equals the union of the
//!   opaque regions of all windows strictly above it, and its
//!   `REG_IGNORE_VALID` flag is set.
//! - While redirection is off no paint is emitted at all; the caller simply
//!   never invokes the pipeline.
//! - The damage ring is rotated exactly once per successful present.
//!
//! The pipeline knows pixels only through `core-backend`'s trait; everything
//! here runs against the recording backend in tests.

pub mod damage;
pub mod kernel;
pub mod pacing;
pub mod paint;
pub mod preprocess;

pub use damage::DamageRing;
pub use kernel::{gaussian_kernel, ShadowContext};
pub use paint::{paint_all, PaintSetup};
pub use preprocess::{paint_preprocess, FrameEnv, ImageOps, PreprocessOutput};

/// Cumulative pipeline counters, sampled by the loop for periodic logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RenderMetrics {
    pub frames_painted: u64,
    /// Frames whose paint region was the whole screen.
    pub full_paints: u64,
    pub windows_painted: u64,
    pub shadows_painted: u64,
    pub blur_passes: u64,
    /// Preprocess runs that found at least one fade still in flight.
    pub fade_frames: u64,
    /// Rebind attempts that failed and flagged the window.
    pub image_errors: u64,
}
