//! Rendering backend abstraction.
//!
//! The paint pass talks to pixels exclusively through the [`Backend`] trait;
//! whether a 2-D picture compositor or a GPU texture pipeline is behind it is
//! invisible to the engine. Backends hand out opaque [`Image`] handles for
//! bound window pixmaps and rendered shadows; the engine never sees backend
//! resource types.
//!
//! Contract notes:
//! * `reg_paint` arguments are authoritative: drawing outside them produces
//!   wrong output. `reg_visible` is an optimization hint; ignoring it must
//!   still be correct.
//! * `buffer_age` is −1 for an uninitialized back buffer, otherwise ≥ 1 with
//!   1 meaning "presented last". `max_buffer_age` bounds what `buffer_age`
//!   may ever return and sizes the damage ring.
//! * A failed `bind_pixmap` must leave the backend usable; the engine marks
//!   the window image-errored and keeps compositing everything else.

use core_events::Wid;
use core_region::Region;
use thiserror::Error;

pub mod capabilities;
pub mod recording;

pub use capabilities::BackendCaps;

/// Opaque handle to a backend-owned image (bound pixmap or rendered shadow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Image(pub u64);

/// X pixmap id as handed to `bind_pixmap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixmapId(pub u32);

/// The subset of visual information a backend needs to bind a pixmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisualInfo {
    pub visual: u32,
    pub depth: u8,
    /// Depth-32 visuals carry an alpha channel.
    pub has_alpha: bool,
}

/// Straight (non-premultiplied) RGBA color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl Color {
    pub const fn rgba(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self { r, g, b, a }
    }
}

/// Image operations dispatched through [`Backend::image_op`]. Backends may
/// apply them in place or fold them into the image's presentation state for
/// the next `compose`; either way the effect lasts for the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOp {
    /// Invert colors over the whole image.
    InvertColorAll,
    /// Dim the whole image; `args[0]` is the dim strength.
    DimAll,
    /// Multiply alpha inside `reg_op`; `args[0]` is the factor.
    ApplyAlpha,
    /// Multiply alpha over the whole image; `args[0]` is the factor.
    ApplyAlphaAll,
    /// Resize a tiling image (root background) to `args[0] x args[1]`.
    ResizeTile,
}

/// Blur convolution pass handed to [`Backend::blur`]: odd `width`x`height`
/// kernel, row-major weights with the center already adjusted by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct BlurPass {
    pub width: usize,
    pub height: usize,
    pub weights: Vec<f64>,
}

/// Precomputed shadow alpha kernel (see `core-render::kernel`).
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowKernel {
    pub size: usize,
    /// `size * size` Gaussian weights, normalized to sum 1.
    pub weights: Vec<f64>,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend initialization failed: {0}")]
    Init(String),
    #[error("cannot bind pixmap {pixmap:?} for window {wid}: {message}")]
    BindPixmap {
        wid: Wid,
        pixmap: PixmapId,
        message: String,
    },
    #[error("shadow render failed: {0}")]
    Shadow(String),
    #[error("present failed: {0}")]
    Present(String),
    #[error("backend lost: {0}")]
    Lost(String),
}

/// Capability set every rendering backend implements.
///
/// Object-safe on purpose: the session holds a `Box<dyn Backend>` chosen at
/// init and the engine is generic over nothing.
pub trait Backend {
    /// Bind an X pixmap into a backend image. `owned` transfers pixmap
    /// ownership (the backend frees it on `release_image`).
    fn bind_pixmap(
        &mut self,
        wid: Wid,
        pixmap: PixmapId,
        visual: VisualInfo,
        owned: bool,
    ) -> Result<Image, BackendError>;

    /// Release an image and everything it owns. Unknown handles are a no-op.
    fn release_image(&mut self, image: Image);

    /// Compose `image` at `(dst_x, dst_y)` clipped to `reg_paint`.
    fn compose(&mut self, image: Image, dst_x: i32, dst_y: i32, reg_paint: &Region, reg_visible: &Region);

    /// Render a `w x h` shadow image from the kernel and color.
    fn render_shadow(
        &mut self,
        width: u16,
        height: u16,
        kernel: &ShadowKernel,
        color: Color,
    ) -> Result<Image, BackendError>;

    /// Blur the backing store inside `reg_blur`. Returns false when the
    /// backend cannot blur (callers fall back to no blur).
    fn blur(&mut self, opacity: f64, reg_blur: &Region, reg_visible: &Region, passes: &[BlurPass]) -> bool;

    /// Fill a region with a solid color (debug overlays only).
    fn fill(&mut self, color: Color, reg: &Region);

    /// Flip the back buffer to the screen.
    fn present(&mut self) -> Result<(), BackendError>;

    /// In-place image operation; false when unsupported.
    fn image_op(
        &mut self,
        op: ImageOp,
        image: Image,
        reg_op: &Region,
        reg_visible: &Region,
        args: &[f64],
    ) -> bool;

    /// Whether the image carries any non-opaque pixel.
    fn is_image_transparent(&self, image: Image) -> bool;

    /// Age of the current back buffer (−1 empty, else ≥ 1).
    fn buffer_age(&self) -> i32;

    /// Upper bound on `buffer_age`; sizes the damage ring. Always ≥ 1.
    fn max_buffer_age(&self) -> usize;

    /// React to a root geometry change in place. Returning false tells the
    /// session to deinit and reinit the backend instead.
    fn root_change(&mut self, width: u16, height: u16) -> bool {
        let _ = (width, height);
        false
    }

    /// Drain backend-internal events (GPU fences, GLX events). Called from
    /// the loop's prepare step; must not block.
    fn handle_events(&mut self) {}

    /// Probed capabilities.
    fn caps(&self) -> BackendCaps;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_op_args_carry_meaning() {
        // The enum is data; just pin the variants tests rely on.
        assert_ne!(ImageOp::ApplyAlpha, ImageOp::ApplyAlphaAll);
        assert_ne!(ImageOp::InvertColorAll, ImageOp::DimAll);
    }

    #[test]
    fn color_is_plain_data() {
        let c = Color::rgba(0.0, 0.0, 0.0, 0.75);
        assert_eq!(c.a, 0.75);
    }
}
