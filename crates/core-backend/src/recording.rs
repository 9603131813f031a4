//! Recording backend test double.
//!
//! Implements [`Backend`](crate::Backend) against no display at all: every
//! call is appended to a public call log, image handles are issued from a
//! counter, and failure injection flags let tests exercise the engine's
//! error paths (bind failure, present failure). Lives in the library (not
//! under `#[cfg(test)]`) because the render, dispatch, and bin crates all
//! drive their integration tests through it.

use crate::{
    Backend, BackendCaps, BackendError, BlurPass, Color, Image, ImageOp, PixmapId, ShadowKernel,
    VisualInfo,
};
use core_events::Wid;
use core_region::Region;
use std::collections::HashSet;

/// One recorded backend call, with enough payload for assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Bind { wid: Wid, pixmap: PixmapId, owned: bool },
    Release(Image),
    Compose { image: Image, dst_x: i32, dst_y: i32, paint_area: u64 },
    RenderShadow { width: u16, height: u16 },
    Blur { area: u64, passes: usize },
    Fill { area: u64 },
    Present,
    ImageOp { op: ImageOp, image: Image, args: Vec<f64> },
    RootChange { width: u16, height: u16 },
}

/// Backend that records instead of rendering.
pub struct RecordingBackend {
    pub calls: Vec<Call>,
    pub caps: BackendCaps,
    /// Value `buffer_age` returns next; tests rotate it.
    pub next_buffer_age: i32,
    pub max_age: usize,
    /// Window ids whose binds must fail.
    pub fail_bind_for: HashSet<Wid>,
    pub fail_present: bool,
    /// Images considered transparent by `is_image_transparent`.
    pub transparent_images: HashSet<Image>,
    live_images: HashSet<Image>,
    next_image: u64,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RecordingBackend {
    pub fn new(max_age: usize) -> Self {
        Self {
            calls: Vec::new(),
            caps: BackendCaps {
                supports_blur: true,
                tracks_buffer_age: max_age > 1,
                vsync: false,
            },
            next_buffer_age: -1,
            max_age: max_age.max(1),
            fail_bind_for: HashSet::new(),
            fail_present: false,
            transparent_images: HashSet::new(),
            live_images: HashSet::new(),
            next_image: 1,
        }
    }

    /// Images bound or rendered and not yet released.
    pub fn live_image_count(&self) -> usize {
        self.live_images.len()
    }

    pub fn is_live(&self, image: Image) -> bool {
        self.live_images.contains(&image)
    }

    /// Number of recorded calls matching the predicate.
    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn presents(&self) -> usize {
        self.count(|c| matches!(c, Call::Present))
    }

    pub fn composed_area(&self) -> u64 {
        self.calls
            .iter()
            .map(|c| match c {
                Call::Compose { paint_area, .. } => *paint_area,
                _ => 0,
            })
            .sum()
    }

    fn issue_image(&mut self) -> Image {
        let img = Image(self.next_image);
        self.next_image += 1;
        self.live_images.insert(img);
        img
    }
}

impl Backend for RecordingBackend {
    fn bind_pixmap(
        &mut self,
        wid: Wid,
        pixmap: PixmapId,
        _visual: VisualInfo,
        owned: bool,
    ) -> Result<Image, BackendError> {
        self.calls.push(Call::Bind { wid, pixmap, owned });
        if self.fail_bind_for.contains(&wid) {
            return Err(BackendError::BindPixmap {
                wid,
                pixmap,
                message: "injected failure".into(),
            });
        }
        Ok(self.issue_image())
    }

    fn release_image(&mut self, image: Image) {
        self.calls.push(Call::Release(image));
        self.live_images.remove(&image);
        self.transparent_images.remove(&image);
    }

    fn compose(&mut self, image: Image, dst_x: i32, dst_y: i32, reg_paint: &Region, _reg_visible: &Region) {
        self.calls.push(Call::Compose {
            image,
            dst_x,
            dst_y,
            paint_area: reg_paint.area(),
        });
    }

    fn render_shadow(
        &mut self,
        width: u16,
        height: u16,
        _kernel: &ShadowKernel,
        _color: Color,
    ) -> Result<Image, BackendError> {
        self.calls.push(Call::RenderShadow { width, height });
        Ok(self.issue_image())
    }

    fn blur(&mut self, _opacity: f64, reg_blur: &Region, _reg_visible: &Region, passes: &[BlurPass]) -> bool {
        self.calls.push(Call::Blur {
            area: reg_blur.area(),
            passes: passes.len(),
        });
        self.caps.supports_blur
    }

    fn fill(&mut self, _color: Color, reg: &Region) {
        self.calls.push(Call::Fill { area: reg.area() });
    }

    fn present(&mut self) -> Result<(), BackendError> {
        self.calls.push(Call::Present);
        if self.fail_present {
            return Err(BackendError::Present("injected failure".into()));
        }
        // Freshly presented buffer has age 1.
        self.next_buffer_age = 1;
        Ok(())
    }

    fn image_op(
        &mut self,
        op: ImageOp,
        image: Image,
        _reg_op: &Region,
        _reg_visible: &Region,
        args: &[f64],
    ) -> bool {
        self.calls.push(Call::ImageOp {
            op,
            image,
            args: args.to_vec(),
        });
        true
    }

    fn is_image_transparent(&self, image: Image) -> bool {
        self.transparent_images.contains(&image)
    }

    fn buffer_age(&self) -> i32 {
        self.next_buffer_age
    }

    fn max_buffer_age(&self) -> usize {
        self.max_age
    }

    fn root_change(&mut self, width: u16, height: u16) -> bool {
        self.calls.push(Call::RootChange { width, height });
        true
    }

    fn caps(&self) -> BackendCaps {
        self.caps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_and_release_track_liveness() {
        let mut b = RecordingBackend::new(2);
        let img = b
            .bind_pixmap(Wid(1), PixmapId(10), VisualInfo { visual: 0, depth: 24, has_alpha: false }, true)
            .unwrap();
        assert!(b.is_live(img));
        b.release_image(img);
        assert!(!b.is_live(img));
        assert_eq!(b.live_image_count(), 0);
    }

    #[test]
    fn injected_bind_failure() {
        let mut b = RecordingBackend::new(1);
        b.fail_bind_for.insert(Wid(7));
        let err = b.bind_pixmap(
            Wid(7),
            PixmapId(1),
            VisualInfo { visual: 0, depth: 24, has_alpha: false },
            false,
        );
        assert!(err.is_err());
        assert_eq!(b.live_image_count(), 0, "failed bind leaks no image");
    }

    #[test]
    fn present_resets_buffer_age() {
        let mut b = RecordingBackend::new(3);
        assert_eq!(b.buffer_age(), -1, "empty back buffer before first present");
        b.present().unwrap();
        assert_eq!(b.buffer_age(), 1);
        assert_eq!(b.presents(), 1);
    }
}
