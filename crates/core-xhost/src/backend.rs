//! XRender backend: the 2-D picture compositor.
//!
//! Pixels flow into a persistent back-buffer picture and reach the screen
//! with one `Composite` per present, so the back buffer always holds exactly
//! the last presented frame (`buffer_age` is 1 after the first present,
//! `max_buffer_age` is 1).
//!
//! Image operations (`APPLY_ALPHA*`, `INVERT_COLOR_ALL`, `DIM_ALL`) record
//! per-image presentation state that the next `compose` consumes and clears;
//! the bound pixmap itself is never modified.

use crate::XhostError;
use core_backend::{
    Backend, BackendCaps, BackendError, BlurPass, Color, Image, ImageOp, PixmapId, ShadowKernel,
    VisualInfo,
};
use core_events::Wid;
use core_region::Region;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, warn};
use x11rb::connection::Connection;
use x11rb::protocol::render::{
    self, ConnectionExt as _, CreatePictureAux, PictOp, PictType, Pictformat, Picture,
};
use x11rb::protocol::xfixes::ConnectionExt as _;
use x11rb::protocol::xproto::{self, ConnectionExt as _, Rectangle};
use x11rb::rust_connection::RustConnection;

/// 16.16 fixed point for render filter parameters.
fn fixed(v: f64) -> render::Fixed {
    (v * 65536.0) as render::Fixed
}

fn color16(v: f64) -> u16 {
    (v.clamp(0.0, 1.0) * f64::from(u16::MAX)) as u16
}

/// Picture formats the backend needs, resolved once at init.
#[derive(Debug, Clone, Copy)]
struct Formats {
    argb32: Pictformat,
    rgb24: Pictformat,
    a8: Pictformat,
}

struct XImage {
    picture: Picture,
    /// Present for owned images (named pixmaps, rendered shadows).
    pixmap: Option<xproto::Pixmap>,
    width: u16,
    height: u16,
    has_alpha: bool,
}

/// Per-image presentation state recorded by `image_op`, consumed by the
/// next `compose`.
#[derive(Debug, Default, Clone)]
struct Pending {
    /// Whole-image alpha factor.
    alpha_all: Option<f64>,
    /// Region-scoped alpha factors (frame bands).
    alpha_regions: Vec<(Region, f64)>,
    invert: bool,
    dim: Option<f64>,
}

/// The XRender implementation of the backend trait.
pub struct XRenderBackend {
    conn: Rc<RustConnection>,
    formats: Formats,
    target_window: u32,
    target_picture: Picture,
    back_pixmap: xproto::Pixmap,
    back_picture: Picture,
    width: u16,
    height: u16,
    depth: u8,
    images: HashMap<u64, XImage>,
    pending: HashMap<u64, Pending>,
    white_fill: Picture,
    next_image: u64,
    presented_once: bool,
}

impl XRenderBackend {
    /// Bind to the overlay window when present, else the root.
    pub fn new(
        conn: Rc<RustConnection>,
        target_window: u32,
        width: u16,
        height: u16,
        depth: u8,
    ) -> Result<Self, XhostError> {
        let formats = Self::find_formats(&conn)?;

        let target_picture = conn.generate_id()?;
        let target_format = if depth == 32 { formats.argb32 } else { formats.rgb24 };
        conn.render_create_picture(
            target_picture,
            target_window,
            target_format,
            &CreatePictureAux::new(),
        )?;

        let back_pixmap = conn.generate_id()?;
        conn.create_pixmap(depth, back_pixmap, target_window, width, height)?;
        let back_picture = conn.generate_id()?;
        conn.render_create_picture(back_picture, back_pixmap, target_format, &CreatePictureAux::new())?;

        let white_fill = conn.generate_id()?;
        conn.render_create_solid_fill(
            white_fill,
            render::Color {
                red: u16::MAX,
                green: u16::MAX,
                blue: u16::MAX,
                alpha: u16::MAX,
            },
        )?;

        conn.flush()?;
        debug!(target: "xhost.backend", target_window, width, height, depth, "xrender_backend_ready");
        Ok(Self {
            conn,
            formats,
            target_window,
            target_picture,
            back_pixmap,
            back_picture,
            width,
            height,
            depth,
            images: HashMap::new(),
            pending: HashMap::new(),
            white_fill,
            next_image: 1,
            presented_once: false,
        })
    }

    fn find_formats(conn: &RustConnection) -> Result<Formats, XhostError> {
        let reply = conn.render_query_pict_formats()?.reply()?;
        let mut argb32 = None;
        let mut rgb24 = None;
        let mut a8 = None;
        for f in &reply.formats {
            if f.type_ != PictType::DIRECT {
                continue;
            }
            match (f.depth, f.direct.alpha_mask) {
                (32, m) if m != 0 && argb32.is_none() => argb32 = Some(f.id),
                (24, _) if rgb24.is_none() => rgb24 = Some(f.id),
                (8, m) if m != 0 && a8.is_none() => a8 = Some(f.id),
                _ => {}
            }
        }
        match (argb32, rgb24, a8) {
            (Some(argb32), Some(rgb24), Some(a8)) => Ok(Formats { argb32, rgb24, a8 }),
            _ => Err(XhostError::Protocol(
                "render lacks ARGB32/RGB24/A8 picture formats".into(),
            )),
        }
    }

    fn region_rectangles(region: &Region) -> Vec<Rectangle> {
        region
            .rects()
            .iter()
            .map(|r| Rectangle {
                x: r.x1.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16,
                y: r.y1.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16,
                width: r.width().clamp(0, i32::from(u16::MAX)) as u16,
                height: r.height().clamp(0, i32::from(u16::MAX)) as u16,
            })
            .collect()
    }

    /// Clip the back buffer to a region for the duration of one closure.
    fn with_clip<F: FnOnce(&Self)>(&self, picture: Picture, region: &Region, f: F) {
        let rects = Self::region_rectangles(region);
        let Ok(xregion) = self.conn.generate_id() else {
            return;
        };
        if self.conn.xfixes_create_region(xregion, &rects).is_err() {
            return;
        }
        let _ = self
            .conn
            .xfixes_set_picture_clip_region(picture, xregion, 0, 0);
        f(self);
        let _ = self
            .conn
            .xfixes_set_picture_clip_region(picture, x11rb::NONE, 0, 0);
        let _ = self.conn.xfixes_destroy_region(xregion);
    }

    fn solid_alpha(&self, alpha: f64) -> Option<Picture> {
        let pid = self.conn.generate_id().ok()?;
        self.conn
            .render_create_solid_fill(
                pid,
                render::Color {
                    red: 0,
                    green: 0,
                    blue: 0,
                    alpha: color16(alpha),
                },
            )
            .ok()?;
        Some(pid)
    }

    fn composite_with_alpha(
        &self,
        image: &XImage,
        dst_x: i32,
        dst_y: i32,
        clip: &Region,
        alpha: f64,
    ) {
        let mask = if alpha < 1.0 { self.solid_alpha(alpha) } else { None };
        self.with_clip(self.back_picture, clip, |this| {
            let _ = this.conn.render_composite(
                PictOp::OVER,
                image.picture,
                mask.unwrap_or(x11rb::NONE),
                this.back_picture,
                0,
                0,
                0,
                0,
                dst_x as i16,
                dst_y as i16,
                image.width,
                image.height,
            );
        });
        if let Some(m) = mask {
            let _ = self.conn.render_free_picture(m);
        }
    }

    fn has_image(&self, image: Image) -> bool {
        self.images.contains_key(&image.0)
    }
}

impl Backend for XRenderBackend {
    fn bind_pixmap(
        &mut self,
        wid: Wid,
        pixmap: PixmapId,
        visual: VisualInfo,
        owned: bool,
    ) -> Result<Image, BackendError> {
        let geom = self
            .conn
            .get_geometry(pixmap.0)
            .map_err(|e| BackendError::BindPixmap {
                wid,
                pixmap,
                message: e.to_string(),
            })?
            .reply()
            .map_err(|e| BackendError::BindPixmap {
                wid,
                pixmap,
                message: e.to_string(),
            })?;
        if geom.width == 0 || geom.height == 0 {
            return Err(BackendError::BindPixmap {
                wid,
                pixmap,
                message: "zero-sized pixmap".into(),
            });
        }
        let format = if visual.has_alpha { self.formats.argb32 } else { self.formats.rgb24 };
        let picture = self.conn.generate_id().map_err(|e| BackendError::BindPixmap {
            wid,
            pixmap,
            message: e.to_string(),
        })?;
        self.conn
            .render_create_picture(picture, pixmap.0, format, &CreatePictureAux::new())
            .map_err(|e| BackendError::BindPixmap {
                wid,
                pixmap,
                message: e.to_string(),
            })?
            .check()
            .map_err(|e| BackendError::BindPixmap {
                wid,
                pixmap,
                message: e.to_string(),
            })?;

        let handle = Image(self.next_image);
        self.next_image += 1;
        self.images.insert(
            handle.0,
            XImage {
                picture,
                pixmap: owned.then_some(pixmap.0),
                width: geom.width,
                height: geom.height,
                has_alpha: visual.has_alpha,
            },
        );
        Ok(handle)
    }

    fn release_image(&mut self, image: Image) {
        self.pending.remove(&image.0);
        if let Some(img) = self.images.remove(&image.0) {
            let _ = self.conn.render_free_picture(img.picture);
            if let Some(pixmap) = img.pixmap {
                let _ = self.conn.free_pixmap(pixmap);
            }
        }
    }

    fn compose(&mut self, image: Image, dst_x: i32, dst_y: i32, reg_paint: &Region, _reg_visible: &Region) {
        let pending = self.pending.remove(&image.0).unwrap_or_default();
        let Some(img) = self.images.get(&image.0) else {
            return;
        };
        // Copy out the plain fields so `self` stays borrowable.
        let img = XImage {
            picture: img.picture,
            pixmap: None,
            width: img.width,
            height: img.height,
            has_alpha: img.has_alpha,
        };

        if pending.alpha_regions.is_empty() {
            let alpha = pending.alpha_all.unwrap_or(1.0);
            self.composite_with_alpha(&img, dst_x, dst_y, reg_paint, alpha);
        } else {
            // Frame bands: per-region alpha, remainder at the whole-image
            // factor (or opaque).
            let mut rest = reg_paint.clone();
            for (band, alpha) in &pending.alpha_regions {
                let clip = reg_paint.intersect(band);
                if clip.is_empty() {
                    continue;
                }
                rest = rest.subtract(band);
                self.composite_with_alpha(&img, dst_x, dst_y, &clip, *alpha);
            }
            if !rest.is_empty() {
                self.composite_with_alpha(&img, dst_x, dst_y, &rest, pending.alpha_all.unwrap_or(1.0));
            }
        }

        if pending.invert {
            self.with_clip(self.back_picture, reg_paint, |this| {
                let _ = this.conn.render_composite(
                    PictOp::DIFFERENCE,
                    this.white_fill,
                    x11rb::NONE,
                    this.back_picture,
                    0,
                    0,
                    0,
                    0,
                    0,
                    0,
                    this.width,
                    this.height,
                );
                if img.has_alpha {
                    // Restore destination alpha from the source image.
                    let _ = this.conn.render_composite(
                        PictOp::IN_REVERSE,
                        img.picture,
                        x11rb::NONE,
                        this.back_picture,
                        0,
                        0,
                        0,
                        0,
                        dst_x as i16,
                        dst_y as i16,
                        img.width,
                        img.height,
                    );
                }
            });
        }

        if let Some(strength) = pending.dim {
            let rects = Self::region_rectangles(reg_paint);
            let _ = self.conn.render_fill_rectangles(
                PictOp::OVER,
                self.back_picture,
                render::Color {
                    red: 0,
                    green: 0,
                    blue: 0,
                    alpha: color16(strength),
                },
                &rects,
            );
        }
    }

    fn render_shadow(
        &mut self,
        width: u16,
        height: u16,
        kernel: &ShadowKernel,
        color: Color,
    ) -> Result<Image, BackendError> {
        let mk = |e: &dyn std::fmt::Display| BackendError::Shadow(e.to_string());

        // Alpha mass: a hard rectangle inset by the kernel radius, softened
        // by one convolution pass with the Gaussian weights.
        let radius = (kernel.size / 2) as i16;
        let alpha_pixmap = self.conn.generate_id().map_err(|e| mk(&e))?;
        self.conn
            .create_pixmap(8, alpha_pixmap, self.target_window, width, height)
            .map_err(|e| mk(&e))?;
        let alpha_picture = self.conn.generate_id().map_err(|e| mk(&e))?;
        self.conn
            .render_create_picture(alpha_picture, alpha_pixmap, self.formats.a8, &CreatePictureAux::new())
            .map_err(|e| mk(&e))?;
        let clear = render::Color { red: 0, green: 0, blue: 0, alpha: 0 };
        let full = Rectangle { x: 0, y: 0, width, height };
        self.conn
            .render_fill_rectangles(PictOp::SRC, alpha_picture, clear, &[full])
            .map_err(|e| mk(&e))?;
        let inner = Rectangle {
            x: radius,
            y: radius,
            width: width.saturating_sub(2 * radius as u16),
            height: height.saturating_sub(2 * radius as u16),
        };
        let body = render::Color {
            red: 0,
            green: 0,
            blue: 0,
            alpha: color16(color.a),
        };
        self.conn
            .render_fill_rectangles(PictOp::SRC, alpha_picture, body, &[inner])
            .map_err(|e| mk(&e))?;

        let mut params = Vec::with_capacity(2 + kernel.weights.len());
        params.push(fixed(kernel.size as f64));
        params.push(fixed(kernel.size as f64));
        params.extend(kernel.weights.iter().map(|w| fixed(*w)));
        self.conn
            .render_set_picture_filter(alpha_picture, b"convolution", &params)
            .map_err(|e| mk(&e))?;

        // Colorize through the softened alpha into the final ARGB image.
        let out_pixmap = self.conn.generate_id().map_err(|e| mk(&e))?;
        self.conn
            .create_pixmap(32, out_pixmap, self.target_window, width, height)
            .map_err(|e| mk(&e))?;
        let out_picture = self.conn.generate_id().map_err(|e| mk(&e))?;
        self.conn
            .render_create_picture(out_picture, out_pixmap, self.formats.argb32, &CreatePictureAux::new())
            .map_err(|e| mk(&e))?;
        self.conn
            .render_fill_rectangles(PictOp::SRC, out_picture, clear, &[full])
            .map_err(|e| mk(&e))?;
        let tint = self.conn.generate_id().map_err(|e| mk(&e))?;
        self.conn
            .render_create_solid_fill(
                tint,
                render::Color {
                    red: color16(color.r),
                    green: color16(color.g),
                    blue: color16(color.b),
                    alpha: u16::MAX,
                },
            )
            .map_err(|e| mk(&e))?;
        self.conn
            .render_composite(
                PictOp::OVER,
                tint,
                alpha_picture,
                out_picture,
                0,
                0,
                0,
                0,
                0,
                0,
                width,
                height,
            )
            .map_err(|e| mk(&e))?;
        let _ = self.conn.render_free_picture(tint);
        let _ = self.conn.render_free_picture(alpha_picture);
        let _ = self.conn.free_pixmap(alpha_pixmap);

        let handle = Image(self.next_image);
        self.next_image += 1;
        self.images.insert(
            handle.0,
            XImage {
                picture: out_picture,
                pixmap: Some(out_pixmap),
                width,
                height,
                has_alpha: true,
            },
        );
        Ok(handle)
    }

    fn blur(&mut self, _opacity: f64, reg_blur: &Region, _reg_visible: &Region, passes: &[BlurPass]) -> bool {
        let Some(extents) = reg_blur.extents() else {
            return true;
        };
        let w = extents.width().clamp(1, i32::from(u16::MAX)) as u16;
        let h = extents.height().clamp(1, i32::from(u16::MAX)) as u16;

        // Copy the blur area out, convolve, and paste it back clipped to the
        // exact region.
        let Ok(tmp_pixmap) = self.conn.generate_id() else { return false };
        if self
            .conn
            .create_pixmap(self.depth, tmp_pixmap, self.target_window, w, h)
            .is_err()
        {
            return false;
        }
        let Ok(tmp_picture) = self.conn.generate_id() else { return false };
        let format = if self.depth == 32 { self.formats.argb32 } else { self.formats.rgb24 };
        if self
            .conn
            .render_create_picture(tmp_picture, tmp_pixmap, format, &CreatePictureAux::new())
            .is_err()
        {
            return false;
        }

        for pass in passes.iter() {
            let _ = self.conn.render_composite(
                PictOp::SRC,
                self.back_picture,
                x11rb::NONE,
                tmp_picture,
                extents.x1 as i16,
                extents.y1 as i16,
                0,
                0,
                0,
                0,
                w,
                h,
            );
            let mut params = Vec::with_capacity(2 + pass.weights.len());
            params.push(fixed(pass.width as f64));
            params.push(fixed(pass.height as f64));
            params.extend(pass.weights.iter().map(|v| fixed(*v)));
            if self
                .conn
                .render_set_picture_filter(tmp_picture, b"convolution", &params)
                .is_err()
            {
                break;
            }
            self.with_clip(self.back_picture, reg_blur, |this| {
                let _ = this.conn.render_composite(
                    PictOp::SRC,
                    tmp_picture,
                    x11rb::NONE,
                    this.back_picture,
                    0,
                    0,
                    0,
                    0,
                    extents.x1 as i16,
                    extents.y1 as i16,
                    w,
                    h,
                );
            });
        }

        let _ = self.conn.render_free_picture(tmp_picture);
        let _ = self.conn.free_pixmap(tmp_pixmap);
        true
    }

    fn fill(&mut self, color: Color, reg: &Region) {
        let rects = Self::region_rectangles(reg);
        let _ = self.conn.render_fill_rectangles(
            PictOp::OVER,
            self.back_picture,
            render::Color {
                red: color16(color.r),
                green: color16(color.g),
                blue: color16(color.b),
                alpha: color16(color.a),
            },
            &rects,
        );
    }

    fn present(&mut self) -> Result<(), BackendError> {
        self.conn
            .render_composite(
                PictOp::SRC,
                self.back_picture,
                x11rb::NONE,
                self.target_picture,
                0,
                0,
                0,
                0,
                0,
                0,
                self.width,
                self.height,
            )
            .map_err(|e| BackendError::Present(e.to_string()))?;
        self.conn
            .flush()
            .map_err(|e| BackendError::Present(e.to_string()))?;
        self.presented_once = true;
        Ok(())
    }

    fn image_op(
        &mut self,
        op: ImageOp,
        image: Image,
        reg_op: &Region,
        _reg_visible: &Region,
        args: &[f64],
    ) -> bool {
        if !self.has_image(image) {
            return false;
        }
        let pending = self.pending.entry(image.0).or_default();
        match op {
            ImageOp::ApplyAlphaAll => {
                pending.alpha_all = args.first().copied();
                true
            }
            ImageOp::ApplyAlpha => {
                if let Some(&alpha) = args.first() {
                    pending.alpha_regions.push((reg_op.clone(), alpha));
                    true
                } else {
                    false
                }
            }
            ImageOp::InvertColorAll => {
                pending.invert = true;
                true
            }
            ImageOp::DimAll => {
                pending.dim = args.first().copied();
                true
            }
            ImageOp::ResizeTile => {
                // Tiling pictures repeat; nothing to resize server-side.
                true
            }
        }
    }

    fn is_image_transparent(&self, image: Image) -> bool {
        self.images.get(&image.0).map(|i| i.has_alpha).unwrap_or(false)
    }

    fn buffer_age(&self) -> i32 {
        if self.presented_once { 1 } else { -1 }
    }

    fn max_buffer_age(&self) -> usize {
        1
    }

    fn root_change(&mut self, width: u16, height: u16) -> bool {
        // Rebuild the back buffer at the new size; the target picture is
        // window-backed and follows the resize on its own.
        let Ok(pixmap) = self.conn.generate_id() else { return false };
        if self
            .conn
            .create_pixmap(self.depth, pixmap, self.target_window, width, height)
            .is_err()
        {
            return false;
        }
        let Ok(picture) = self.conn.generate_id() else { return false };
        let format = if self.depth == 32 { self.formats.argb32 } else { self.formats.rgb24 };
        if self
            .conn
            .render_create_picture(picture, pixmap, format, &CreatePictureAux::new())
            .is_err()
        {
            return false;
        }
        let _ = self.conn.render_free_picture(self.back_picture);
        let _ = self.conn.free_pixmap(self.back_pixmap);
        self.back_pixmap = pixmap;
        self.back_picture = picture;
        self.width = width;
        self.height = height;
        self.presented_once = false;
        debug!(target: "xhost.backend", width, height, "back_buffer_rebuilt");
        true
    }

    fn caps(&self) -> BackendCaps {
        BackendCaps::new(true, true, false)
    }
}

impl Drop for XRenderBackend {
    fn drop(&mut self) {
        let images: Vec<u64> = self.images.keys().copied().collect();
        for id in images {
            self.release_image(Image(id));
        }
        let _ = self.conn.render_free_picture(self.white_fill);
        let _ = self.conn.render_free_picture(self.back_picture);
        let _ = self.conn.free_pixmap(self.back_pixmap);
        let _ = self.conn.render_free_picture(self.target_picture);
        if let Err(e) = self.conn.flush() {
            warn!(target: "xhost.backend", error = %e, "teardown_flush_failed");
        }
    }
}
