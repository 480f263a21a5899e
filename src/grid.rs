//! Deformable warp grid and its renderable mesh
//!
//! The grid is a lattice of `(rows + 1) * (cols + 1)` control points stored
//! row-major. Every cell of the lattice is rendered as two triangles whose
//! vertices carry all four corners of the cell, so the pixel stage can undo
//! the bilinear deformation (see `mapper`).

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

/// Errors raised when (re)building the lattice
#[derive(Debug, Error, PartialEq)]
pub enum GridError {
    #[error("grid needs at least one row and one column, got {rows}x{cols}")]
    InvalidDimensions { rows: u32, cols: u32 },
    #[error("calibration has {actual} values, expected {expected} for the grid size")]
    CalibrationLength { expected: usize, actual: usize },
}

/// A control point, normalized (0.0 to 1.0) for a fresh lattice and
/// arbitrary once the operator has dragged it
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControlPoint {
    pub x: f32,
    pub y: f32,
}

impl ControlPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, x: f32, y: f32) -> f32 {
        ((self.x - x).powi(2) + (self.y - y).powi(2)).sqrt()
    }

    #[inline]
    pub fn to_array(self) -> [f32; 2] {
        [self.x, self.y]
    }
}

/// One vertex of the warp mesh.
///
/// Layout matches the vertex stage inputs declared in `mapper::WARP_SHADER`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    /// Screen position of this vertex (one of the cell corners)
    pub position: [f32; 2],
    /// All four corners of the owning cell: TL, BL, TR, BR
    pub quad: [[f32; 2]; 4],
    /// Texture-space origin of the cell: (col / cols, row / rows)
    pub tex0: [f32; 2],
    /// Grid extent: (cols, rows)
    pub size: [f32; 2],
}

/// Description of one vertex attribute for a GPU backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub name: &'static str,
    pub components: u32,
    pub offset: usize,
}

impl MeshVertex {
    pub const ATTRIBUTES: [VertexAttribute; 7] = [
        VertexAttribute { name: "vPosition", components: 2, offset: 0 },
        VertexAttribute { name: "vQuad0", components: 2, offset: 8 },
        VertexAttribute { name: "vQuad1", components: 2, offset: 16 },
        VertexAttribute { name: "vQuad2", components: 2, offset: 24 },
        VertexAttribute { name: "vQuad3", components: 2, offset: 32 },
        VertexAttribute { name: "vTex0", components: 2, offset: 40 },
        VertexAttribute { name: "vSize", components: 2, offset: 48 },
    ];

    pub const STRIDE: usize = std::mem::size_of::<MeshVertex>();
}

/// Triangle list produced from the grid. Never edited by hand, only rebuilt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    /// Raw vertex bytes, ready for a GPU buffer upload
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// The calibration lattice
#[derive(Debug, Clone, PartialEq)]
pub struct WarpGrid {
    rows: u32,
    cols: u32,
    points: Vec<ControlPoint>,
    /// Index pairs of adjacent lattice points, used by the overlay only
    lines: Vec<[u32; 2]>,
}

impl WarpGrid {
    /// Create a grid holding the default evenly-spaced lattice
    pub fn new(rows: u32, cols: u32) -> Result<Self, GridError> {
        let mut grid = Self {
            rows: 1,
            cols: 1,
            points: Vec::new(),
            lines: Vec::new(),
        };
        grid.rebuild(rows, cols, None)?;
        Ok(grid)
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn points(&self) -> &[ControlPoint] {
        &self.points
    }

    pub fn point(&self, index: usize) -> ControlPoint {
        self.points[index]
    }

    pub fn lines(&self) -> &[[u32; 2]] {
        &self.lines
    }

    /// Number of points per lattice row
    #[inline]
    fn stride(&self) -> usize {
        self.cols as usize + 1
    }

    /// Row-major index of the lattice point at `(row, col)`
    #[inline]
    pub fn index(&self, row: u32, col: u32) -> usize {
        col as usize + row as usize * self.stride()
    }

    /// Replace the whole lattice.
    ///
    /// With `calibration`, each `(x, y)` pair becomes one control point in
    /// row-major order; without it, point `(row, col)` is placed at
    /// `(col / cols, row / rows)`. On error the grid is left untouched.
    pub fn rebuild(
        &mut self,
        rows: u32,
        cols: u32,
        calibration: Option<&[f32]>,
    ) -> Result<(), GridError> {
        let count = point_count(rows, cols)?;
        let points = match calibration {
            Some(values) => {
                if values.len() != 2 * count {
                    return Err(GridError::CalibrationLength {
                        expected: 2 * count,
                        actual: values.len(),
                    });
                }
                values
                    .chunks_exact(2)
                    .map(|pair| ControlPoint::new(pair[0], pair[1]))
                    .collect()
            }
            None => default_lattice(rows, cols),
        };

        self.rows = rows;
        self.cols = cols;
        self.points = points;
        self.lines = line_topology(rows, cols);
        Ok(())
    }

    /// Change the lattice size, clamping each dimension at 1.
    ///
    /// Prior point positions are discarded and the default lattice regenerated.
    pub fn resize(&mut self, rows: u32, cols: u32) {
        self.rows = rows.max(1);
        self.cols = cols.max(1);
        self.points = default_lattice(self.rows, self.cols);
        self.lines = line_topology(self.rows, self.cols);
    }

    /// Move one control point.
    ///
    /// Panics if `index` is out of range. The mesh is not rebuilt; call
    /// `build_mesh` once the batch of edits is done.
    pub fn set_point(&mut self, index: usize, x: f32, y: f32) {
        self.points[index] = ControlPoint::new(x, y);
    }

    /// Corners of a cell in TL, BL, TR, BR order
    pub fn cell_corners(&self, row: u32, col: u32) -> [ControlPoint; 4] {
        [
            self.points[self.index(row, col)],
            self.points[self.index(row + 1, col)],
            self.points[self.index(row, col + 1)],
            self.points[self.index(row + 1, col + 1)],
        ]
    }

    /// Build the triangle mesh for the current lattice.
    ///
    /// Cells are emitted column by column. Each cell contributes its 4
    /// corners as vertices and the triangles `(0, 3, 1)` and `(0, 2, 3)`.
    pub fn build_mesh(&self) -> Mesh {
        let cells = self.rows as usize * self.cols as usize;
        let mut vertices = Vec::with_capacity(cells * 4);
        let mut indices = Vec::with_capacity(cells * 6);
        let size = [self.cols as f32, self.rows as f32];

        for col in 0..self.cols {
            for row in 0..self.rows {
                let corners = self.cell_corners(row, col);
                let quad = corners.map(ControlPoint::to_array);
                let tex0 = [
                    col as f32 / self.cols as f32,
                    row as f32 / self.rows as f32,
                ];

                let base = vertices.len() as u32;
                vertices.extend(quad.iter().map(|&position| MeshVertex {
                    position,
                    quad,
                    tex0,
                    size,
                }));
                indices.extend_from_slice(&[
                    base,
                    base + 3,
                    base + 1,
                    base,
                    base + 2,
                    base + 3,
                ]);
            }
        }

        Mesh { vertices, indices }
    }

    /// Flattened `(x, y)` pairs in the order `rebuild` expects
    pub fn export_calibration(&self) -> Vec<f32> {
        self.points.iter().flat_map(|p| [p.x, p.y]).collect()
    }
}

/// Number of lattice points for a `rows` x `cols` grid.
///
/// Rejects empty grids and sizes whose mesh indices would not fit in `u32`.
pub fn point_count(rows: u32, cols: u32) -> Result<usize, GridError> {
    let invalid = GridError::InvalidDimensions { rows, cols };
    if rows == 0 || cols == 0 {
        return Err(invalid);
    }
    let vertices = (rows as usize)
        .checked_mul(cols as usize)
        .and_then(|cells| cells.checked_mul(4))
        .filter(|&n| n <= u32::MAX as usize);
    let points = (rows as usize + 1)
        .checked_mul(cols as usize + 1)
        .filter(|n| n.checked_mul(2).is_some());
    match (vertices, points) {
        (Some(_), Some(points)) => Ok(points),
        _ => Err(invalid),
    }
}

fn default_lattice(rows: u32, cols: u32) -> Vec<ControlPoint> {
    let mut points = Vec::with_capacity((rows as usize + 1) * (cols as usize + 1));
    for row in 0..=rows {
        for col in 0..=cols {
            points.push(ControlPoint::new(
                col as f32 / cols as f32,
                row as f32 / rows as f32,
            ));
        }
    }
    points
}

/// Every edge between horizontally or vertically adjacent lattice points.
///
/// Border edges on the right and bottom are included so the overlay is a
/// closed outline: `rows * (cols + 1) + (rows + 1) * cols` pairs.
fn line_topology(rows: u32, cols: u32) -> Vec<[u32; 2]> {
    let (rows, cols) = (rows as usize, cols as usize);
    let stride = cols + 1;
    let mut lines = Vec::with_capacity(rows * stride + (rows + 1) * cols);
    for row in 0..=rows {
        for col in 0..=cols {
            let i = col + row * stride;
            if col < cols {
                lines.push([i as u32, (i + 1) as u32]);
            }
            if row < rows {
                lines.push([i as u32, (i + stride) as u32]);
            }
        }
    }
    lines
}
