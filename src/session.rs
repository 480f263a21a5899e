//! Interactive calibration session
//!
//! Owns the `WarpGrid` and turns keyboard commands and pointer gestures
//! into grid edits. After every edit the warp mesh (and, while the
//! calibration overlay is armed, the overlay line mesh) is rebuilt.

use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::calibration::CalibrationRecord;
use crate::config::CalibrationConfig;
use crate::grid::{Mesh, WarpGrid};

/// Tint of the overlay grid lines
pub const DEFAULT_OVERLAY_COLOR: [f32; 4] = [1.0, 0.0, 0.0, 0.5];

/// Commands the operator can issue from the keyboard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ToggleOverlay,
    ToggleHelp,
    RemoveRow,
    AddRow,
    RemoveColumn,
    AddColumn,
    Reset,
    Save,
    Load,
}

impl Command {
    /// Translate a platform key name into a command
    pub fn from_key(key: &str) -> Option<Self> {
        let command = match key.to_ascii_lowercase().as_str() {
            "f2" => Command::ToggleOverlay,
            "space" | " " => Command::ToggleHelp,
            "x" => Command::RemoveRow,
            "c" => Command::AddRow,
            "v" => Command::RemoveColumn,
            "b" => Command::AddColumn,
            "r" => Command::Reset,
            "s" => Command::Save,
            "l" => Command::Load,
            _ => return None,
        };
        Some(command)
    }

    pub fn key(&self) -> &'static str {
        match self {
            Command::ToggleOverlay => "F2",
            Command::ToggleHelp => "space",
            Command::RemoveRow => "x",
            Command::AddRow => "c",
            Command::RemoveColumn => "v",
            Command::AddColumn => "b",
            Command::Reset => "r",
            Command::Save => "s",
            Command::Load => "l",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Command::ToggleOverlay => "Toggle calibration",
            Command::ToggleHelp => "Toggle help",
            Command::RemoveRow => "Remove a row (current calibration is lost)",
            Command::AddRow => "Add a row (current calibration is lost)",
            Command::RemoveColumn => "Remove a column (current calibration is lost)",
            Command::AddColumn => "Add a column (current calibration is lost)",
            Command::Reset => "Reset the calibration grid",
            Command::Save => "Save the current calibration",
            Command::Load => "Load latest calibration",
        }
    }

    pub fn all() -> &'static [Command] {
        &[
            Command::ToggleOverlay,
            Command::ToggleHelp,
            Command::Reset,
            Command::Save,
            Command::Load,
            Command::RemoveRow,
            Command::AddRow,
            Command::RemoveColumn,
            Command::AddColumn,
        ]
    }
}

/// Size of the surface pointer events are reported against
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Convert a pixel position into the grid's normalized space
    pub fn to_local(&self, px: f32, py: f32) -> [f32; 2] {
        [px / self.width as f32, py / self.height as f32]
    }

    /// Convert a normalized position into pixels
    pub fn to_pixels(&self, x: f32, y: f32) -> [f32; 2] {
        [x * self.width as f32, y * self.height as f32]
    }
}

/// Line-list mesh drawn over the output while calibrating
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayMesh {
    pub vertices: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
    pub color: [f32; 4],
}

impl OverlayMesh {
    fn from_grid(grid: &WarpGrid, color: [f32; 4]) -> Self {
        Self {
            vertices: grid.points().iter().map(|p| p.to_array()).collect(),
            indices: grid.lines().iter().flatten().copied().collect(),
            color,
        }
    }

    /// Iterate over line segments as endpoint pairs
    pub fn segments(&self) -> impl Iterator<Item = ([f32; 2], [f32; 2])> + '_ {
        self.indices
            .chunks_exact(2)
            .map(|pair| (self.vertices[pair[0] as usize], self.vertices[pair[1] as usize]))
    }
}

/// Editing state around one warp grid
pub struct CalibrationSession {
    grid: WarpGrid,
    mesh: Mesh,
    /// Present while the calibration overlay is armed
    overlay: Option<OverlayMesh>,
    overlay_color: [f32; 4],
    help_visible: bool,
    help_text: String,
    /// Control point bound to the active pointer gesture
    grab: Option<usize>,
    calibration_path: PathBuf,
}

impl CalibrationSession {
    pub fn new(grid: WarpGrid, calibration_path: impl Into<PathBuf>) -> Self {
        let mesh = grid.build_mesh();
        Self {
            grid,
            mesh,
            overlay: None,
            overlay_color: DEFAULT_OVERLAY_COLOR,
            help_visible: true,
            help_text: String::new(),
            grab: None,
            calibration_path: calibration_path.into(),
        }
    }

    /// Start a session on a default grid, then try to load the saved calibration
    pub fn open(config: &CalibrationConfig) -> anyhow::Result<Self> {
        let grid = WarpGrid::new(config.rows, config.cols)?;
        let mut session = Self::new(grid, &config.file);
        session.load();
        Ok(session)
    }

    pub fn with_overlay_color(mut self, color: [f32; 4]) -> Self {
        self.overlay_color = color;
        if let Some(overlay) = self.overlay.as_mut() {
            overlay.color = color;
        }
        self
    }

    pub fn grid(&self) -> &WarpGrid {
        &self.grid
    }

    /// Latest warp mesh, ready for submission to the renderer
    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn overlay(&self) -> Option<&OverlayMesh> {
        self.overlay.as_ref()
    }

    pub fn is_armed(&self) -> bool {
        self.overlay.is_some()
    }

    pub fn help_visible(&self) -> bool {
        self.help_visible
    }

    pub fn grabbed(&self) -> Option<usize> {
        self.grab
    }

    pub fn calibration_path(&self) -> &Path {
        &self.calibration_path
    }

    /// Status and key help, only meaningful while armed
    pub fn help_text(&self) -> &str {
        &self.help_text
    }

    /// Show or hide the calibration overlay
    pub fn toggle_armed(&mut self) {
        if self.overlay.take().is_some() {
            self.grab = None;
            info!("Calibration overlay hidden");
        } else {
            self.refresh_overlay();
            info!("Calibration overlay shown");
        }
    }

    fn refresh_overlay(&mut self) {
        self.overlay = Some(OverlayMesh::from_grid(&self.grid, self.overlay_color));
        self.rebuild_help_text();
    }

    fn rebuild_help_text(&mut self) {
        let mut lines = vec![
            "Projection Mapping".to_string(),
            format!("Cols: {} - Rows: {}", self.grid.cols(), self.grid.rows()),
            String::new(),
            "Help".to_string(),
        ];
        lines.extend(
            Command::all()
                .iter()
                .map(|c| format!("{}: {}", c.key(), c.description())),
        );
        self.help_text = lines.join("\n");
    }

    /// Rebuild derived meshes after the grid changed
    fn grid_changed(&mut self) {
        self.mesh = self.grid.build_mesh();
        if self.is_armed() {
            self.refresh_overlay();
        }
    }

    /// Handle a keyboard command. Returns whether it was consumed.
    ///
    /// Everything except `ToggleOverlay` is ignored while disarmed.
    pub fn on_key_down(&mut self, command: Command) -> bool {
        let (rows, cols) = (self.grid.rows(), self.grid.cols());
        match command {
            Command::ToggleOverlay => self.toggle_armed(),
            _ if !self.is_armed() => return false,
            Command::ToggleHelp => self.help_visible = !self.help_visible,
            Command::RemoveRow => self.resize(rows.saturating_sub(1), cols),
            Command::AddRow => self.resize(rows.saturating_add(1), cols),
            Command::RemoveColumn => self.resize(rows, cols.saturating_sub(1)),
            Command::AddColumn => self.resize(rows, cols.saturating_add(1)),
            Command::Reset => self.resize(rows, cols),
            Command::Save => {
                if let Err(e) = self.save() {
                    error!("Unable to save calibration: {:#}", e);
                }
            }
            Command::Load => {
                self.load();
            }
        }
        true
    }

    /// Regenerate the default lattice at a new size
    fn resize(&mut self, rows: u32, cols: u32) {
        self.grab = None;
        self.grid.resize(rows, cols);
        info!(
            "Grid reset to {} rows x {} cols",
            self.grid.rows(),
            self.grid.cols()
        );
        self.grid_changed();
    }

    /// Select the control point nearest to `pos` and grab the gesture.
    ///
    /// Ignored while disarmed or while another gesture holds the grab.
    pub fn on_pointer_down(&mut self, pos: [f32; 2]) -> bool {
        if !self.is_armed() || self.grab.is_some() {
            return false;
        }

        let mut nearest = None;
        let mut min_dist = f32::INFINITY;
        for (i, point) in self.grid.points().iter().enumerate() {
            let d = point.distance(pos[0], pos[1]);
            if d < min_dist {
                min_dist = d;
                nearest = Some(i);
            }
        }

        self.grab = nearest;
        if let Some(i) = nearest {
            debug!("Grabbed control point {} at distance {:.4}", i, min_dist);
        }
        nearest.is_some()
    }

    pub fn on_pointer_move(&mut self, pos: [f32; 2]) -> bool {
        match self.grab {
            Some(index) => {
                self.drag_to(index, pos);
                true
            }
            None => false,
        }
    }

    /// Same effect as a move, then releases the grab
    pub fn on_pointer_up(&mut self, pos: [f32; 2]) -> bool {
        match self.grab.take() {
            Some(index) => {
                self.drag_to(index, pos);
                true
            }
            None => false,
        }
    }

    /// Abort the active gesture without moving anything (e.g. focus lost)
    pub fn on_cancel(&mut self) {
        if let Some(index) = self.grab.take() {
            debug!("Gesture on control point {} cancelled", index);
        }
    }

    fn drag_to(&mut self, index: usize, pos: [f32; 2]) {
        self.grid.set_point(index, pos[0], pos[1]);
        debug!("Control point {} moved to ({:.4}, {:.4})", index, pos[0], pos[1]);
        self.grid_changed();
    }

    /// Write the current grid to the calibration file
    pub fn save(&self) -> anyhow::Result<()> {
        CalibrationRecord::from_grid(&self.grid).save(&self.calibration_path)?;
        info!("Calibration saved to {:?}", self.calibration_path);
        Ok(())
    }

    /// Replace the grid with the saved calibration.
    ///
    /// Any failure is logged and leaves the grid untouched. Returns whether
    /// the file was applied.
    pub fn load(&mut self) -> bool {
        let record = match CalibrationRecord::load(&self.calibration_path) {
            Ok(record) => record,
            Err(e) => {
                error!("Unable to load {:?}: {}", self.calibration_path, e);
                return false;
            }
        };
        if let Err(e) = record.apply_to(&mut self.grid) {
            warn!("Ignoring calibration {:?}: {}", self.calibration_path, e);
            return false;
        }

        self.grab = None;
        info!(
            "Loaded {}x{} calibration from {:?}",
            record.rows, record.cols, self.calibration_path
        );
        self.grid_changed();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn armed_session(rows: u32, cols: u32, path: &Path) -> CalibrationSession {
        let mut session = CalibrationSession::new(WarpGrid::new(rows, cols).unwrap(), path);
        session.toggle_armed();
        session
    }

    #[test]
    fn test_save_mutate_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = armed_session(2, 2, &dir.path().join("calibration.json"));
        let saved = session.grid().points().to_vec();

        assert!(session.on_key_down(Command::Save));
        assert!(session.on_pointer_down([0.45, 0.55]));
        assert_eq!(session.grabbed(), Some(4));
        assert!(session.on_pointer_up([0.9, 0.9]));
        assert_eq!(session.grid().point(4).to_array(), [0.9, 0.9]);

        assert!(session.on_key_down(Command::Load));
        assert_eq!(session.grid().points(), saved.as_slice());
        assert_eq!(session.mesh(), &session.grid().build_mesh());
    }

    #[test]
    fn test_load_failure_keeps_grid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        let mut session = armed_session(2, 2, &path);
        session.on_pointer_down([0.0, 0.0]);
        session.on_pointer_up([0.2, 0.1]);
        let before = session.grid().clone();

        // missing file
        assert!(!session.load());
        assert_eq!(session.grid(), &before);

        // wrong shape
        std::fs::write(&path, r#"{"rows": 3, "cols": 3, "calibration": [0.5, 0.5]}"#).unwrap();
        assert!(!session.load());
        assert_eq!(session.grid(), &before);

        // not json
        std::fs::write(&path, "rows=3").unwrap();
        assert!(!session.load());
        assert_eq!(session.grid(), &before);
    }

    #[test]
    fn test_load_oversized_grid_keeps_grid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        let mut session = armed_session(2, 2, &path);
        let before = session.grid().clone();

        std::fs::write(
            &path,
            r#"{"rows": 4294967295, "cols": 4294967295, "calibration": []}"#,
        )
        .unwrap();
        assert!(!session.load());
        assert_eq!(session.grid(), &before);
        assert_eq!(session.overlay().unwrap().vertices.len(), 9);
    }

    #[test]
    fn test_remove_row_at_minimum_still_resets() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = armed_session(1, 2, &dir.path().join("calibration.json"));
        session.on_pointer_down([1.0, 1.0]);
        session.on_pointer_up([0.7, 0.8]);
        assert_ne!(session.grid(), &WarpGrid::new(1, 2).unwrap());

        assert!(session.on_key_down(Command::RemoveRow));
        assert_eq!(session.grid().rows(), 1);
        assert_eq!(session.grid(), &WarpGrid::new(1, 2).unwrap());
    }

    #[test]
    fn test_resize_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = armed_session(2, 2, &dir.path().join("calibration.json"));

        session.on_key_down(Command::AddRow);
        session.on_key_down(Command::AddColumn);
        session.on_key_down(Command::AddColumn);
        assert_eq!((session.grid().rows(), session.grid().cols()), (3, 4));
        assert_eq!(session.mesh().vertices.len(), 4 * 12);

        session.on_key_down(Command::RemoveColumn);
        assert_eq!((session.grid().rows(), session.grid().cols()), (3, 3));

        let overlay = session.overlay().unwrap();
        assert_eq!(overlay.vertices.len(), 16);
        assert_eq!(overlay.segments().count(), session.grid().lines().len());
        assert!(session.help_text().contains("Cols: 3 - Rows: 3"));
    }

    #[test]
    fn test_keys_ignored_while_disarmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        let mut session = CalibrationSession::new(WarpGrid::new(2, 2).unwrap(), &path);

        assert!(!session.on_key_down(Command::AddRow));
        assert!(!session.on_key_down(Command::Save));
        assert!(!session.on_key_down(Command::ToggleHelp));
        assert_eq!(session.grid().rows(), 2);
        assert!(!path.exists());
        assert!(session.help_visible());

        assert!(session.on_key_down(Command::ToggleOverlay));
        assert!(session.is_armed());
        assert!(session.on_key_down(Command::ToggleHelp));
        assert!(!session.help_visible());
        assert!(session.on_key_down(Command::ToggleOverlay));
        assert!(!session.is_armed());
        assert!(session.overlay().is_none());
    }

    #[test]
    fn test_pointer_ignored_while_disarmed() {
        let dir = tempfile::tempdir().unwrap();
        let mut session =
            CalibrationSession::new(WarpGrid::new(2, 2).unwrap(), dir.path().join("c.json"));
        assert!(!session.on_pointer_down([0.5, 0.5]));
        assert!(!session.on_pointer_move([0.6, 0.6]));
        assert_eq!(session.grid(), &WarpGrid::new(2, 2).unwrap());
    }

    #[test]
    fn test_drag_updates_every_move() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = armed_session(2, 2, &dir.path().join("calibration.json"));

        assert!(session.on_pointer_down([0.98, 0.03]));
        assert_eq!(session.grabbed(), Some(2));

        // grab holds even far outside the surface
        assert!(session.on_pointer_move([1.4, -0.2]));
        assert_eq!(session.grid().point(2).to_array(), [1.4, -0.2]);
        assert_eq!(session.overlay().unwrap().vertices[2], [1.4, -0.2]);
        assert_eq!(session.mesh(), &session.grid().build_mesh());

        // a second pointer cannot steal the grab
        assert!(!session.on_pointer_down([0.0, 0.0]));

        assert!(session.on_pointer_up([0.95, 0.05]));
        assert_eq!(session.grabbed(), None);
        assert_eq!(session.grid().point(2).to_array(), [0.95, 0.05]);
        assert!(!session.on_pointer_move([0.5, 0.5]));
    }

    #[test]
    fn test_nearest_tie_prefers_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = armed_session(1, 1, &dir.path().join("calibration.json"));
        // equidistant from all four corners
        session.on_pointer_down([0.5, 0.5]);
        assert_eq!(session.grabbed(), Some(0));
    }

    #[test]
    fn test_cancel_releases_without_moving() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = armed_session(2, 2, &dir.path().join("calibration.json"));
        session.on_pointer_down([0.5, 0.5]);
        session.on_cancel();
        assert_eq!(session.grabbed(), None);
        assert!(!session.on_pointer_up([0.1, 0.1]));
        assert_eq!(session.grid(), &WarpGrid::new(2, 2).unwrap());
    }

    #[test]
    fn test_resize_drops_grab() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = armed_session(2, 2, &dir.path().join("calibration.json"));
        session.on_pointer_down([1.0, 1.0]);
        assert_eq!(session.grabbed(), Some(8));
        session.on_key_down(Command::RemoveRow);
        assert_eq!(session.grabbed(), None);
        assert!(!session.on_pointer_move([0.3, 0.3]));
    }

    #[test]
    fn test_open_loads_saved_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        let mut grid = WarpGrid::new(3, 1).unwrap();
        grid.set_point(1, 0.8, 0.1);
        CalibrationRecord::from_grid(&grid).save(&path).unwrap();

        let config = CalibrationConfig {
            file: path,
            rows: 2,
            cols: 2,
        };
        let session = CalibrationSession::open(&config).unwrap();
        assert_eq!(session.grid(), &grid);
        assert!(!session.is_armed());
    }

    #[test]
    fn test_key_translation() {
        for command in Command::all() {
            assert_eq!(Command::from_key(command.key()), Some(*command));
        }
        assert_eq!(Command::from_key("q"), None);
    }

    #[test]
    fn test_viewport() {
        let viewport = Viewport::new(1920, 1080);
        assert_eq!(viewport.to_local(960.0, 270.0), [0.5, 0.25]);
        assert_eq!(viewport.to_pixels(0.5, 0.25), [960.0, 270.0]);
    }
}
