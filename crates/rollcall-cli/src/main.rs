use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::enroll::validate_student_name;
use rollcall_core::{AttendanceSheet, ClassName, FrameMatcher, Gallery, OnnxAnalyzer, Session};
use rollcall_hw::{Camera, FrameSource};
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod location;

use config::Config;
use engine::{EngineError, SessionSetup, StopReason};
use location::Location;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance taking")]
struct Cli {
    /// V4L2 camera device (overrides config)
    #[arg(long, global = true)]
    camera: Option<String>,

    /// Directory of enrolled student images (overrides config)
    #[arg(long, global = true)]
    gallery_dir: Option<PathBuf>,

    /// Directory holding attendance_<class>.csv files (overrides config)
    #[arg(long, global = true)]
    attendance_dir: Option<PathBuf>,

    /// Directory containing the ONNX face models (overrides config)
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take attendance for a class until Ctrl-C (SIGHUP reloads the gallery)
    Start {
        /// Class name; the sheet is attendance_<class>.csv
        #[arg(short, long)]
        class: String,
        /// Match distance threshold (lower is stricter)
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// Add a student from one camera frame
    Enroll {
        /// Student name, used as the image file name
        #[arg(short, long)]
        name: String,
    },
    /// Copy a class attendance sheet
    Export {
        #[arg(short, long)]
        class: String,
        /// Destination file
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Print the rows recorded for a class
    Show {
        #[arg(short, long)]
        class: String,
    },
    /// Build the gallery and list who is enrolled
    Gallery,
    /// List V4L2 capture devices
    Devices,
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(camera) = &self.camera {
            config.camera_device = camera.clone();
        }
        if let Some(dir) = &self.gallery_dir {
            config.gallery_dir = dir.clone();
        }
        if let Some(dir) = &self.attendance_dir {
            config.attendance_dir = dir.clone();
        }
        if let Some(dir) = &self.model_dir {
            config.model_dir = dir.clone();
        }
        if let Commands::Start { threshold: Some(t), .. } = &self.command {
            config.match_threshold = *t;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load().context("loading configuration")?;
    cli.apply_overrides(&mut config);
    tracing::debug!(?config, "configuration resolved");

    match cli.command {
        Commands::Start { class, .. } => start(config, &class).await,
        Commands::Enroll { name } => tokio::task::spawn_blocking(move || enroll(&config, &name)).await?,
        Commands::Export { class, out } => {
            let class = ClassName::parse(&class)?;
            let sheet = AttendanceSheet::for_class(&config.attendance_dir, &class);
            let bytes = sheet.export(&out)?;
            println!("Exported {} to {} ({bytes} bytes)", sheet.path().display(), out.display());
            Ok(())
        }
        Commands::Show { class } => {
            let class = ClassName::parse(&class)?;
            let sheet = AttendanceSheet::for_class(&config.attendance_dir, &class);
            let rows = sheet.records()?;
            if rows.is_empty() {
                println!("No attendance recorded for {class}");
            }
            for row in &rows {
                println!("{:<24} {:<20} {:<32} {}", row.name, row.timestamp, row.location, row.status);
            }
            Ok(())
        }
        Commands::Gallery => tokio::task::spawn_blocking(move || list_gallery(&config)).await?,
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
            Ok(())
        }
    }
}

async fn start(config: Config, class: &str) -> Result<()> {
    // Validate before touching the camera or the network.
    let class = ClassName::parse(class)?;

    let location = if config.geolocation {
        let url = config.geolocation_url.clone();
        let timeout = config.geolocation_timeout();
        tokio::task::spawn_blocking(move || Location::lookup(&url, timeout)).await?
    } else {
        tracing::info!("geolocation disabled");
        Location::unknown()
    };

    let (camera, analyzer, gallery) = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || -> Result<_> {
            let mut analyzer = load_analyzer(&config)?;
            let gallery = Gallery::build(&config.gallery_dir, &mut analyzer)?;
            if gallery.is_empty() {
                return Err(EngineError::EmptyGallery.into());
            }
            let mut camera = Camera::open(&config.camera_device).map_err(EngineError::from)?;
            camera.discard(config.warmup_frames);
            Ok((camera, analyzer, gallery))
        })
        .await??
    };

    let enrolled = gallery.len();
    let matcher = FrameMatcher::new(config.match_threshold, config.detect_scale);
    let threshold = matcher.threshold();
    let setup = SessionSetup {
        sheet: AttendanceSheet::for_class(&config.attendance_dir, &class),
        session: Session::start(class.clone()),
        matcher,
        location,
    };
    let sheet_path = setup.sheet.path().to_path_buf();

    let (handle, mut events) = engine::spawn_engine(camera, analyzer, gallery, setup)?;
    println!(
        "Taking attendance for {class} ({enrolled} students enrolled, match distance < {threshold}) -> {}. Press Ctrl-C to stop.",
        sheet_path.display()
    );

    let mut preview = handle.preview();
    let preview_task = tokio::spawn(async move {
        while preview.changed().await.is_ok() {
            let latest = preview
                .borrow_and_update()
                .as_ref()
                .map(|f| (f.sequence, f.avg_brightness()));
            if let Some((seq, brightness)) = latest {
                tracing::trace!(seq, brightness, "preview frame");
            }
        }
    });

    let mut hangup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(e) => {
                    tracing::debug!(name = %e.name, distance = e.distance, "attendance event");
                    println!(
                        "{} marked present at {} ({}) [{} this session]",
                        e.name,
                        e.timestamp.format(rollcall_core::recorder::TIMESTAMP_FORMAT),
                        e.location,
                        e.total_marked
                    );
                }
                // Worker exited and dropped its sender.
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, stopping session");
                handle.stop();
            }
            Some(()) = hangup.recv() => {
                let config = config.clone();
                match tokio::task::spawn_blocking(move || build_gallery(&config)).await? {
                    Ok(gallery) if gallery.is_empty() => {
                        tracing::warn!("reloaded gallery is empty, keeping the current one");
                    }
                    Ok(gallery) => {
                        println!("Gallery reloaded: {} students enrolled", gallery.len());
                        handle.replace_gallery(gallery);
                    }
                    Err(e) => tracing::warn!(error = %e, "gallery reload failed, keeping the current one"),
                }
            }
        }
    }

    let summary = tokio::task::spawn_blocking(move || handle.join()).await??;
    let _ = preview_task.await;

    println!(
        "Session for {} ended: {} marked present over {} frames",
        summary.class, summary.total_marked, summary.frames
    );
    match summary.reason {
        StopReason::Stopped => Ok(()),
        StopReason::SourceFailed(msg) => Err(anyhow::anyhow!("camera stopped delivering frames: {msg}")),
    }
}

fn enroll(config: &Config, name: &str) -> Result<()> {
    let name = validate_student_name(name)?;

    let mut analyzer = load_analyzer(config)?;
    let mut camera = Camera::open(&config.camera_device).map_err(EngineError::from)?;

    let (path, gallery) =
        engine::run_enrollment(&mut camera, &mut analyzer, &name, &config.gallery_dir, config.warmup_frames)?;
    println!("Student {name} added: {}", path.display());
    println!("Gallery now holds {} students", gallery.len());
    Ok(())
}

fn load_analyzer(config: &Config) -> Result<OnnxAnalyzer> {
    OnnxAnalyzer::load(&config.model_dir)
        .with_context(|| format!("loading face models from {}", config.model_dir.display()))
}

fn build_gallery(config: &Config) -> Result<Gallery> {
    let mut analyzer = load_analyzer(config)?;
    Ok(Gallery::build(&config.gallery_dir, &mut analyzer)?)
}

fn list_gallery(config: &Config) -> Result<()> {
    let gallery = build_gallery(config)?;

    println!("{} enrolled in {}", gallery.len(), config.gallery_dir.display());
    for entry in gallery.entries() {
        println!("  {:<24} {}", entry.display_name(), entry.source.display());
    }
    for skipped in gallery.skipped() {
        println!("  skipped {}: {}", skipped.path.display(), skipped.reason);
    }
    Ok(())
}
