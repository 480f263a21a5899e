//! Per-pixel inverse bilinear texture mapping
//!
//! Each warp cell is an arbitrary quadrilateral on screen. To find which
//! texel belongs at a screen pixel we recover the pixel's `(u, v)` position
//! inside the quad by solving
//!
//! ```text
//! q = u * b1 + v * b2 + u * v * b3
//! ```
//!
//! for `q = p - q0`, `b1 = q1 - q0`, `b2 = q2 - q0` and
//! `b3 = q0 - q1 - q2 + q3`. Eliminating `u` leaves a quadratic in `v`.
//!
//! The functions here are pure so they can be tested on the CPU; the same
//! algorithm ships to the GPU as `WARP_SHADER`.

use crate::grid::MeshVertex;

/// Below this magnitude the quadratic coefficient is treated as zero and
/// the quad as a parallelogram
pub const DEGENERATE_EPSILON: f32 = 1e-3;

/// Per-cell inputs to the pixel stage, identical for every vertex of a cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadAttributes {
    /// Cell corners: TL, BL, TR, BR
    pub quad: [[f32; 2]; 4],
    /// Texture-space origin of the cell
    pub tex0: [f32; 2],
    /// Grid extent (cols, rows)
    pub size: [f32; 2],
}

impl From<&MeshVertex> for QuadAttributes {
    fn from(vertex: &MeshVertex) -> Self {
        Self {
            quad: vertex.quad,
            tex0: vertex.tex0,
            size: vertex.size,
        }
    }
}

#[inline]
fn cross(a: [f32; 2], b: [f32; 2]) -> f32 {
    a[0] * b[1] - a[1] * b[0]
}

#[inline]
fn sub(a: [f32; 2], b: [f32; 2]) -> [f32; 2] {
    [a[0] - b[0], a[1] - b[1]]
}

/// Recover `(u, v)` of pixel `p` inside `quad` (TL, BL, TR, BR).
///
/// `u` runs along `q0 -> q1`, `v` along `q0 -> q2`. Only the positive root
/// of the quadratic is used, which is the correct one for counter-clockwise
/// winding with V up. A negative discriminant is clamped to zero.
pub fn inverse_bilinear(p: [f32; 2], quad: &[[f32; 2]; 4]) -> [f32; 2] {
    let [q0, q1, q2, q3] = *quad;
    let q = sub(p, q0);
    let b1 = sub(q1, q0);
    let b2 = sub(q2, q0);
    let b3 = [q0[0] - q1[0] - q2[0] + q3[0], q0[1] - q1[1] - q2[1] + q3[1]];

    let a = cross(b2, b3);
    let b = cross(b3, q) - cross(b1, b2);
    let c = cross(b1, q);

    let v = if a.abs() < DEGENERATE_EPSILON {
        -c / b
    } else {
        let discriminant = (b * b - 4.0 * a * c).max(0.0);
        0.5 * (-b + discriminant.sqrt()) / a
    };

    // Divide by the larger component of the denominator
    let denom = [b1[0] + v * b3[0], b1[1] + v * b3[1]];
    let u = if denom[0].abs() > denom[1].abs() {
        (q[0] - b2[0] * v) / denom[0]
    } else {
        (q[1] - b2[1] * v) / denom[1]
    };

    [u, v]
}

/// Texture coordinate `(s, t)` to sample for pixel `p`.
///
/// `u` is scaled by the row count and offset by the cell's row origin, `v`
/// by the column count and column origin; the pair is then read back with
/// its axes swapped. Returns `None` when the math does not produce a finite
/// coordinate (self-intersecting or collapsed quads).
pub fn sample_coord(p: [f32; 2], attrs: &QuadAttributes) -> Option<[f32; 2]> {
    let [u, v] = inverse_bilinear(p, &attrs.quad);
    let sample_u = u / attrs.size[1] + attrs.tex0[1];
    let sample_v = v / attrs.size[0] + attrs.tex0[0];

    if sample_u.is_finite() && sample_v.is_finite() {
        Some([sample_v, sample_u])
    } else {
        None
    }
}

/// Final pixel color: `(tint * opacity) * texel`, where opacity scales alpha only
#[inline]
pub fn shade(tint: [f32; 4], opacity: f32, texel: [f32; 4]) -> [f32; 4] {
    [
        tint[0] * texel[0],
        tint[1] * texel[1],
        tint[2] * texel[2],
        tint[3] * opacity * texel[3],
    ]
}

/// WGSL rendition of the pixel mapper for GPU backends.
///
/// Vertex inputs follow `MeshVertex::ATTRIBUTES` in order.
pub const WARP_SHADER: &str = r#"
struct Uniforms {
    transform: mat4x4<f32>,
    tint: vec4<f32>,
    opacity: f32,
};

@group(0) @binding(0) var<uniform> uniforms: Uniforms;
@group(0) @binding(1) var source_texture: texture_2d<f32>;
@group(0) @binding(2) var source_sampler: sampler;

struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) quad0: vec2<f32>,
    @location(2) quad1: vec2<f32>,
    @location(3) quad2: vec2<f32>,
    @location(4) quad3: vec2<f32>,
    @location(5) tex0: vec2<f32>,
    @location(6) size: vec2<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) color: vec4<f32>,
    @location(1) q: vec2<f32>,
    @location(2) @interpolate(flat) tex0: vec2<f32>,
    @location(3) @interpolate(flat) b1: vec2<f32>,
    @location(4) @interpolate(flat) b2: vec2<f32>,
    @location(5) @interpolate(flat) b3: vec2<f32>,
    @location(6) @interpolate(flat) size: vec2<f32>,
};

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.q = in.position - in.quad0;
    out.tex0 = in.tex0;
    out.b1 = in.quad1 - in.quad0;
    out.b2 = in.quad2 - in.quad0;
    out.b3 = in.quad0 - in.quad1 - in.quad2 + in.quad3;
    out.size = in.size;
    out.color = uniforms.tint * vec4<f32>(1.0, 1.0, 1.0, uniforms.opacity);
    out.clip_position = uniforms.transform * vec4<f32>(in.position, 0.0, 1.0);
    return out;
}

fn wedge(v: vec2<f32>, w: vec2<f32>) -> f32 {
    return v.x * w.y - v.y * w.x;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let a = wedge(in.b2, in.b3);
    let b = wedge(in.b3, in.q) - wedge(in.b1, in.b2);
    let c = wedge(in.b1, in.q);

    var uv: vec2<f32>;
    if (abs(a) < 0.001) {
        uv.y = -c / b;
    } else {
        let discriminant = max(b * b - 4.0 * a * c, 0.0);
        uv.y = 0.5 * (-b + sqrt(discriminant)) / a;
    }

    let denom = in.b1 + uv.y * in.b3;
    if (abs(denom.x) > abs(denom.y)) {
        uv.x = (in.q.x - in.b2.x * uv.y) / denom.x;
    } else {
        uv.x = (in.q.y - in.b2.y * uv.y) / denom.y;
    }

    uv.x = uv.x / in.size.y + in.tex0.y;
    uv.y = uv.y / in.size.x + in.tex0.x;

    return in.color * textureSample(source_texture, source_sampler, vec2<f32>(uv.y, uv.x));
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::WarpGrid;

    fn assert_close(actual: [f32; 2], expected: [f32; 2]) {
        assert!(
            (actual[0] - expected[0]).abs() < 1e-5 && (actual[1] - expected[1]).abs() < 1e-5,
            "{:?} != {:?}",
            actual,
            expected
        );
    }

    #[test]
    fn test_unit_square_identity() {
        let quad = [[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]];
        assert_close(inverse_bilinear([0.5, 0.5], &quad), [0.5, 0.5]);
        // u follows q0 -> q1 (y), v follows q0 -> q2 (x)
        assert_close(inverse_bilinear([0.25, 0.75], &quad), [0.75, 0.25]);
    }

    #[test]
    fn test_parallelogram_linear_branch() {
        // b1 = (1, 0), b2 = (0, 1), b3 = (0, 0)
        let quad = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        assert_close(inverse_bilinear([0.3, 0.4], &quad), [0.3, 0.4]);
    }

    #[test]
    fn test_trapezoid_linear_branch() {
        // b1 = (0, 1), b2 = (1, 0), b3 = (1, 0): b3 parallel to b2, so A = 0
        let quad = [[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [2.0, 1.0]];
        assert_close(inverse_bilinear([0.75, 0.5], &quad), [0.5, 0.5]);
        assert_close(inverse_bilinear([2.0, 1.0], &quad), [1.0, 1.0]);
    }

    #[test]
    fn test_sheared_parallelogram() {
        // b1 = (0, 2), b2 = (3, 1): still affine
        let quad = [[1.0, 1.0], [1.0, 3.0], [4.0, 2.0], [4.0, 4.0]];
        // u = 0.5, v = 0.25  =>  q = (0.75, 1.25)
        assert_close(inverse_bilinear([1.75, 2.25], &quad), [0.5, 0.25]);
    }

    #[test]
    fn test_quadratic_branch() {
        // b1 = (0, 1), b2 = (1, 0), b3 = (0, 1) gives A = 1
        let quad = [[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 2.0]];
        assert_close(inverse_bilinear([0.5, 0.75], &quad), [0.5, 0.5]);
        assert_close(inverse_bilinear([1.0, 2.0], &quad), [1.0, 1.0]);
        assert_close(inverse_bilinear([0.0, 0.0], &quad), [0.0, 0.0]);
    }

    #[test]
    fn test_default_grid_samples_identity() {
        let grid = WarpGrid::new(2, 3).unwrap();
        let mesh = grid.build_mesh();

        for cell in mesh.vertices.chunks(4) {
            let attrs = QuadAttributes::from(&cell[0]);
            let [tl, _, _, br] = attrs.quad;
            let p = [
                tl[0] + 0.3 * (br[0] - tl[0]),
                tl[1] + 0.6 * (br[1] - tl[1]),
            ];
            assert_close(sample_coord(p, &attrs).unwrap(), p);
        }
    }

    #[test]
    fn test_collapsed_quad_yields_none() {
        let attrs = QuadAttributes {
            quad: [[0.5, 0.5]; 4],
            tex0: [0.0, 0.0],
            size: [1.0, 1.0],
        };
        assert_eq!(sample_coord([0.5, 0.5], &attrs), None);
    }

    #[test]
    fn test_shade() {
        let color = shade([1.0, 0.5, 1.0, 1.0], 0.5, [0.2, 0.4, 0.6, 1.0]);
        assert_eq!(color, [0.2, 0.2, 0.6, 0.5]);
    }

    #[test]
    fn test_shader_declares_all_attributes() {
        for (location, attribute) in MeshVertex::ATTRIBUTES.iter().enumerate() {
            assert!(attribute.name.starts_with('v'));
            assert!(WARP_SHADER.contains(&format!("@location({}) ", location)));
        }
        assert!(WARP_SHADER.contains("vec2<f32>(uv.y, uv.x)"));
    }
}
