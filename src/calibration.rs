//! Persisted calibration record
//!
//! The file is a small JSON object:
//!
//! ```json
//! {"rows": 2, "cols": 2, "calibration": [x0, y0, x1, y1, ...]}
//! ```
//!
//! holding the control points of a `WarpGrid` flattened row-major.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::grid::{point_count, GridError, WarpGrid};

/// Errors raised while reading or writing a calibration file
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("calibration file {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed calibration data: {0}")]
    Json(#[from] serde_json::Error),
    #[error("calibration does not fit its grid: {0}")]
    Shape(#[from] GridError),
}

/// Serialized form of a `WarpGrid`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub rows: u32,
    pub cols: u32,
    pub calibration: Vec<f32>,
}

impl CalibrationRecord {
    pub fn from_grid(grid: &WarpGrid) -> Self {
        Self {
            rows: grid.rows(),
            cols: grid.cols(),
            calibration: grid.export_calibration(),
        }
    }

    /// Check that `calibration` holds exactly one pair per lattice point
    pub fn validate(&self) -> Result<(), GridError> {
        let expected = 2 * point_count(self.rows, self.cols)?;
        if self.calibration.len() != expected {
            return Err(GridError::CalibrationLength {
                expected,
                actual: self.calibration.len(),
            });
        }
        Ok(())
    }

    /// Rebuild `grid` from this record. The grid is unchanged on error.
    pub fn apply_to(&self, grid: &mut WarpGrid) -> Result<(), GridError> {
        grid.rebuild(self.rows, self.cols, Some(&self.calibration))
    }

    pub fn from_json(content: &str) -> Result<Self, CalibrationError> {
        let record: CalibrationRecord = serde_json::from_str(content)?;
        record.validate()?;
        Ok(record)
    }

    /// Read and validate a calibration file
    pub fn load(path: &Path) -> Result<Self, CalibrationError> {
        let content = std::fs::read_to_string(path).map_err(|source| CalibrationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let record = Self::from_json(&content)?;
        tracing::debug!(
            "Read {}x{} calibration from {:?}",
            record.rows,
            record.cols,
            path
        );
        Ok(record)
    }

    /// Write the record, replacing any existing file
    pub fn save(&self, path: &Path) -> Result<(), CalibrationError> {
        let content = serde_json::to_string(self)?;
        std::fs::write(path, content).map_err(|source| CalibrationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }
}
