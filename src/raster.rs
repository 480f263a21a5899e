//! CPU renderer for warp meshes
//!
//! Rasterizes the triangle list produced by `WarpGrid::build_mesh` and runs
//! the pixel mapper for every covered pixel, the same way a GPU would run
//! `WARP_SHADER`. Used for headless previews and for checking calibrations
//! without a display.
//!
//! Performance notes:
//! - Rows are shaded in parallel with rayon
//! - Triangles are set up once per frame with their pixel-space bounds

use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_line_segment_mut, Blend};
use rayon::prelude::*;
use tracing::debug;

use crate::config::RenderConfig;
use crate::grid::Mesh;
use crate::mapper::{sample_coord, shade, QuadAttributes};
use crate::session::{OverlayMesh, Viewport};

/// Shading parameters shared by every pixel of a frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Renderer {
    pub tint: [f32; 4],
    pub opacity: f32,
}

impl Default for Renderer {
    fn default() -> Self {
        Self {
            tint: [1.0; 4],
            opacity: 1.0,
        }
    }
}

/// A mesh triangle in pixel space
struct ScreenTriangle {
    corners: [[f32; 2]; 3],
    attrs: QuadAttributes,
    min: [f32; 2],
    max: [f32; 2],
}

impl ScreenTriangle {
    #[inline]
    fn contains(&self, px: f32, py: f32) -> bool {
        let [a, b, c] = self.corners;
        let w0 = edge(b, c, px, py);
        let w1 = edge(c, a, px, py);
        let w2 = edge(a, b, px, py);
        (w0 >= 0.0 && w1 >= 0.0 && w2 >= 0.0) || (w0 <= 0.0 && w1 <= 0.0 && w2 <= 0.0)
    }
}

#[inline]
fn edge(a: [f32; 2], b: [f32; 2], px: f32, py: f32) -> f32 {
    (b[0] - a[0]) * (py - a[1]) - (b[1] - a[1]) * (px - a[0])
}

impl Renderer {
    pub fn from_config(config: &RenderConfig) -> Self {
        Self {
            tint: config.tint,
            opacity: config.opacity,
        }
    }

    /// Draw `mesh` into `target`, sampling `texture`.
    ///
    /// Mesh positions are normalized to the target size. Pixels not covered
    /// by any triangle, or whose sample coordinate is not finite, keep their
    /// previous value.
    pub fn render(&self, mesh: &Mesh, texture: &RgbaImage, target: &mut RgbaImage) {
        let width = target.width() as usize;
        let viewport = Viewport::new(target.width(), target.height());
        let triangles = setup_triangles(mesh, &viewport);
        debug!(
            "Rasterizing {} triangles into {}x{}",
            triangles.len(),
            viewport.width,
            viewport.height
        );

        if width == 0 {
            return;
        }

        target
            .par_chunks_mut(width * 4)
            .enumerate()
            .for_each(|(y, row)| {
                let py = y as f32 + 0.5;
                for tri in &triangles {
                    if py < tri.min[1] || py > tri.max[1] {
                        continue;
                    }
                    let x0 = tri.min[0].floor().max(0.0) as usize;
                    let x1 = (tri.max[0].ceil().max(0.0) as usize).min(width);
                    for x in x0..x1 {
                        let px = x as f32 + 0.5;
                        if !tri.contains(px, py) {
                            continue;
                        }
                        let Some([s, t]) = sample_coord(viewport.to_local(px, py), &tri.attrs)
                        else {
                            continue;
                        };
                        let color = shade(self.tint, self.opacity, sample_bilinear(texture, s, t));
                        for (c, value) in color.iter().enumerate() {
                            row[x * 4 + c] = (value * 255.0).round().clamp(0.0, 255.0) as u8;
                        }
                    }
                }
            });
    }

    /// Alpha-blend the overlay line list over `target`
    pub fn draw_overlay(&self, overlay: &OverlayMesh, target: &mut RgbaImage) {
        let viewport = Viewport::new(target.width(), target.height());
        let color = Rgba(overlay.color.map(|c| (c * 255.0).round().clamp(0.0, 255.0) as u8));

        let mut canvas = Blend(target.clone());
        for (start, end) in overlay.segments() {
            let [x0, y0] = viewport.to_pixels(start[0], start[1]);
            let [x1, y1] = viewport.to_pixels(end[0], end[1]);
            draw_line_segment_mut(&mut canvas, (x0, y0), (x1, y1), color);
        }
        *target = canvas.0;
    }
}

fn setup_triangles(mesh: &Mesh, viewport: &Viewport) -> Vec<ScreenTriangle> {
    mesh.indices
        .chunks_exact(3)
        .filter_map(|tri| {
            let vertices = [
                &mesh.vertices[tri[0] as usize],
                &mesh.vertices[tri[1] as usize],
                &mesh.vertices[tri[2] as usize],
            ];
            let corners = vertices.map(|v| viewport.to_pixels(v.position[0], v.position[1]));
            let [a, b, c] = corners;
            if edge(a, b, c[0], c[1]).abs() < f32::EPSILON {
                return None;
            }

            let min = [
                a[0].min(b[0]).min(c[0]),
                a[1].min(b[1]).min(c[1]),
            ];
            let max = [
                a[0].max(b[0]).max(c[0]),
                a[1].max(b[1]).max(c[1]),
            ];
            Some(ScreenTriangle {
                corners,
                attrs: QuadAttributes::from(vertices[0]),
                min,
                max,
            })
        })
        .collect()
}

/// Bilinear texture lookup at normalized `(s, t)`, clamped to the edges
fn sample_bilinear(texture: &RgbaImage, s: f32, t: f32) -> [f32; 4] {
    let width = texture.width();
    let height = texture.height();
    if width == 0 || height == 0 {
        return [0.0; 4];
    }

    // Texel centers sit at half-integer positions
    let x = (s * width as f32 - 0.5).clamp(0.0, (width - 1) as f32);
    let y = (t * height as f32 - 0.5).clamp(0.0, (height - 1) as f32);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = texture.get_pixel(x0, y0).0;
    let p10 = texture.get_pixel(x1, y0).0;
    let p01 = texture.get_pixel(x0, y1).0;
    let p11 = texture.get_pixel(x1, y1).0;

    let mut result = [0.0f32; 4];
    for c in 0..4 {
        let value = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;
        result[c] = value / 255.0;
    }
    result
}
