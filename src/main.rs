//! GridWarp - Grid-based projection mapping calibration
//!
//! Warps an image onto an irregular physical surface through a coarse grid
//! of draggable control points. The grid is edited interactively (here
//! driven by event scripts), persisted as JSON, and rendered with per-cell
//! inverse bilinear texture mapping.

mod calibration;
mod config;
mod grid;
mod mapper;
mod raster;
mod script;
mod session;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use image::RgbaImage;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::calibration::CalibrationRecord;
use crate::config::Config;
use crate::grid::{MeshVertex, WarpGrid};
use crate::raster::Renderer;
use crate::session::{CalibrationSession, Viewport};

/// GridWarp - projection mapping calibration
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Write a fresh, undeformed calibration file
    Init {
        /// Grid rows (defaults to the configured value)
        #[arg(long)]
        rows: Option<u32>,
        /// Grid columns (defaults to the configured value)
        #[arg(long)]
        cols: Option<u32>,
        /// Overwrite an existing calibration
        #[arg(long)]
        force: bool,
    },
    /// Warp an image through the saved calibration
    Render {
        /// Source image
        #[arg(short, long)]
        input: PathBuf,
        /// Output PNG
        #[arg(short, long)]
        output: PathBuf,
        /// Draw the calibration grid on top
        #[arg(long)]
        overlay: bool,
    },
    /// Drive a calibration session from an event script
    Session {
        /// Event script (see `script` module for the format)
        #[arg(short, long)]
        script: PathBuf,
        /// Image to render once the script has run
        #[arg(long, requires = "render_output")]
        render_input: Option<PathBuf>,
        /// Where to write the rendered image
        #[arg(long, requires = "render_input")]
        render_output: Option<PathBuf>,
    },
    /// Print the warp shader and its vertex layout
    Shader,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("GridWarp v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load_or_create(&args.config)?;

    match args.command {
        Cmd::Init { rows, cols, force } => init(&config, rows, cols, force),
        Cmd::Render {
            input,
            output,
            overlay,
        } => {
            let mut session = open_session(&config)?;
            if overlay {
                session.toggle_armed();
            }
            render(&config, &session, &input, &output)
        }
        Cmd::Session {
            script,
            render_input,
            render_output,
        } => run_session(&config, &script, render_input.zip(render_output)),
        Cmd::Shader => {
            print_shader();
            Ok(())
        }
    }
}

fn open_session(config: &Config) -> Result<CalibrationSession> {
    let session = CalibrationSession::open(&config.calibration)?
        .with_overlay_color(config.render.overlay_color);
    let grid = session.grid();
    info!(
        "Grid: {} rows x {} cols ({} control points)",
        grid.rows(),
        grid.cols(),
        grid.points().len()
    );
    let mesh = session.mesh();
    info!(
        "Mesh: {} triangles, {} bytes of vertex data",
        mesh.triangle_count(),
        mesh.vertex_bytes().len()
    );
    Ok(session)
}

fn init(config: &Config, rows: Option<u32>, cols: Option<u32>, force: bool) -> Result<()> {
    let path = &config.calibration.file;
    if path.exists() && !force {
        bail!("{:?} already exists, use --force to overwrite", path);
    }

    let grid = WarpGrid::new(
        rows.unwrap_or(config.calibration.rows),
        cols.unwrap_or(config.calibration.cols),
    )?;
    CalibrationRecord::from_grid(&grid)
        .save(path)
        .with_context(|| format!("Failed to write calibration {:?}", path))?;
    info!(
        "Wrote {}x{} calibration to {:?}",
        grid.rows(),
        grid.cols(),
        path
    );
    Ok(())
}

fn render(config: &Config, session: &CalibrationSession, input: &Path, output: &Path) -> Result<()> {
    let texture = image::open(input)
        .with_context(|| format!("Failed to open source image {:?}", input))?
        .to_rgba8();

    let mut target = RgbaImage::new(config.render.width, config.render.height);
    let renderer = Renderer::from_config(&config.render);
    renderer.render(session.mesh(), &texture, &mut target);
    if let Some(overlay) = session.overlay() {
        renderer.draw_overlay(overlay, &mut target);
    }

    target
        .save(output)
        .with_context(|| format!("Failed to write {:?}", output))?;
    info!(
        "Rendered {}x{} warp of {:?} to {:?}",
        target.width(),
        target.height(),
        input,
        output
    );
    Ok(())
}

fn run_session(
    config: &Config,
    script_path: &Path,
    render_paths: Option<(PathBuf, PathBuf)>,
) -> Result<()> {
    let text = std::fs::read_to_string(script_path)
        .with_context(|| format!("Failed to read script {:?}", script_path))?;
    let events = script::parse(&text)
        .with_context(|| format!("Failed to parse script {:?}", script_path))?;

    let mut session = open_session(config)?;
    let viewport = Viewport::new(config.render.width, config.render.height);
    script::replay(&mut session, &events, &viewport);
    info!("Replayed {} events", events.len());

    if session.is_armed() && session.help_visible() {
        println!("{}", session.help_text());
    }
    if session.grabbed().is_some() {
        warn!("Script ended with a gesture still in progress");
    }

    if let Some((input, output)) = render_paths {
        render(config, &session, &input, &output)?;
    } else if !session.calibration_path().exists() {
        info!(
            "Calibration not saved; {:?} does not exist yet",
            session.calibration_path()
        );
    }
    Ok(())
}

fn print_shader() {
    println!("// vertex stride: {} bytes", MeshVertex::STRIDE);
    for (location, attribute) in MeshVertex::ATTRIBUTES.iter().enumerate() {
        println!(
            "// @location({}) {}: {} x f32 at offset {}",
            location, attribute.name, attribute.components, attribute.offset
        );
    }
    println!("{}", mapper::WARP_SHADER);
}
