//! Shadow kernel precompute and placement.
//!
//! The drop shadow is a Gaussian falloff baked once per config into a
//! `(2r+1)²` weight kernel; backends turn it plus a color into an alpha
//! image sized to the window. Placement offsets the shadow by the configured
//! offsets and grows it by the blur radius on every side.

use core_backend::{Color, ShadowKernel};
use core_config::Config;
use core_region::Rect;

/// Normalized Gaussian kernel of diameter `2 * radius + 1`.
///
/// `radius == 0` degenerates to a single full-weight cell (hard shadow).
pub fn gaussian_kernel(radius: i32) -> ShadowKernel {
    let r = radius.max(0);
    let size = (2 * r + 1) as usize;
    let mut weights = vec![0.0f64; size * size];
    // Standard deviation chosen so the kernel reaches ~2σ at the edge.
    let sigma = f64::from(r.max(1)) * 0.5;
    let mut sum = 0.0;
    for y in 0..size {
        for x in 0..size {
            let dx = x as f64 - f64::from(r);
            let dy = y as f64 - f64::from(r);
            let w = (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
            weights[y * size + x] = w;
            sum += w;
        }
    }
    for w in &mut weights {
        *w /= sum;
    }
    ShadowKernel { size, weights }
}

/// Per-session shadow parameters: kernel, color, geometry rules.
#[derive(Debug, Clone)]
pub struct ShadowContext {
    pub kernel: ShadowKernel,
    pub color: Color,
    pub radius: i32,
    pub offset_x: i32,
    pub offset_y: i32,
}

impl ShadowContext {
    pub fn from_config(config: &Config) -> Self {
        Self {
            kernel: gaussian_kernel(config.shadow.radius),
            color: Color::rgba(
                config.shadow.red,
                config.shadow.green,
                config.shadow.blue,
                config.shadow.opacity,
            ),
            radius: config.shadow.radius,
            offset_x: config.shadow.offset_x,
            offset_y: config.shadow.offset_y,
        }
    }

    /// Screen rectangle the shadow image occupies for a window body rect.
    pub fn placement(&self, body: Rect) -> Rect {
        Rect::new(
            body.x1 + self.offset_x - self.radius,
            body.y1 + self.offset_y - self.radius,
            body.width() + 2 * self.radius,
            body.height() + 2 * self.radius,
        )
    }

    /// Pixel size of the shadow image for a window body rect.
    pub fn image_size(&self, body: Rect) -> (u16, u16) {
        let w = (body.width() + 2 * self.radius).max(1);
        let h = (body.height() + 2 * self.radius).max(1);
        (w.min(i32::from(u16::MAX)) as u16, h.min(i32::from(u16::MAX)) as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_is_normalized_and_peaked_at_center() {
        let k = gaussian_kernel(4);
        assert_eq!(k.size, 9);
        let sum: f64 = k.weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        let center = k.weights[4 * 9 + 4];
        for (i, w) in k.weights.iter().enumerate() {
            assert!(*w <= center + 1e-12, "weight {i} exceeds center");
            assert!(*w > 0.0);
        }
    }

    #[test]
    fn zero_radius_is_a_point() {
        let k = gaussian_kernel(0);
        assert_eq!(k.size, 1);
        assert!((k.weights[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn placement_offsets_and_grows() {
        let ctx = ShadowContext {
            kernel: gaussian_kernel(2),
            color: Color::rgba(0.0, 0.0, 0.0, 0.75),
            radius: 2,
            offset_x: -5,
            offset_y: 3,
        };
        let body = Rect::new(100, 100, 40, 30);
        let p = ctx.placement(body);
        assert_eq!(p, Rect::new(93, 101, 44, 34));
        assert_eq!(ctx.image_size(body), (44, 34));
    }
}
