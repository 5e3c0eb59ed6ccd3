//! weld_inspect - weld defect detection on images, videos and cameras
//!
//! Subcommands:
//! 1. `image`: single-shot detection on a still image
//! 2. `video`: capture session over a video file
//! 3. `camera`: capture session over a live camera (Ctrl-C to stop)
//! 4. `cameras`: list usable camera indices

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use weld_inspect::config::InspectConfig;
use weld_inspect::detect::{detect_single, Detection, Detector, DetectorRegistry};
use weld_inspect::frame::{RawImage, DEFAULT_JPEG_QUALITY};
use weld_inspect::ingest::{probe_cameras, SourceDescriptor};
use weld_inspect::session::{
    CaptureDetectionSession, ChannelObserver, SessionEvent, SessionSummary,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "weld_inspect", author, version, about)]
struct Args {
    /// Configuration file (JSON, or TOML by extension).
    #[arg(long, env = "WELD_CONFIG", global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Detector backend (tract|stub).
    #[arg(long, global = true)]
    backend: Option<String>,
    /// Path to the ONNX model.
    #[arg(long, global = true, value_name = "FILE")]
    model: Option<PathBuf>,
    /// Minimum detection confidence in [0, 1].
    #[arg(long, global = true)]
    confidence: Option<f32>,
    /// Maximum detections per frame.
    #[arg(long, global = true)]
    max_detections: Option<usize>,
    /// Target interval between frames in milliseconds.
    #[arg(long, global = true, value_name = "MS")]
    interval_ms: Option<u64>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE", global = true)]
    ui: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect defects in a still image (png, jpg, bmp)
    Image {
        path: PathBuf,
        /// Write the annotated image here.
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },

    /// Run detection over every frame of a video file
    Video {
        path: String,
        /// Write annotated frames as JPEG into this directory.
        #[arg(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,
    },

    /// Run detection on a live camera until Ctrl-C
    Camera {
        /// Camera index (/dev/videoN).
        #[arg(long, default_value_t = 0, conflicts_with = "device")]
        index: u32,
        /// Explicit device path or stub://name.
        #[arg(long)]
        device: Option<String>,
        /// Write annotated frames as JPEG into this directory.
        #[arg(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,
    },

    /// List usable camera indices
    Cameras {
        #[arg(long, default_value_t = 10)]
        max: u32,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let cfg = {
        let _stage = ui.stage("Load configuration");
        resolve_config(&args)?
    };

    match args.command {
        Command::Image { path, out } => {
            let detector = load_detector(&cfg, &ui);
            run_image(&path, out.as_deref(), detector.as_deref(), &cfg, &ui);
            Ok(())
        }
        Command::Video { path, out_dir } => {
            let detector = load_detector(&cfg, &ui);
            let summary = run_session(
                SourceDescriptor::VideoFile(path),
                &cfg,
                detector,
                out_dir.as_deref(),
                &ui,
            )?;
            report(&summary);
            Ok(())
        }
        Command::Camera {
            index,
            device,
            out_dir,
        } => {
            let descriptor = match device {
                Some(device) => SourceDescriptor::CameraDevice(device),
                None => SourceDescriptor::Camera(index),
            };
            let detector = load_detector(&cfg, &ui);
            let summary = run_session(descriptor, &cfg, detector, out_dir.as_deref(), &ui)?;
            report(&summary);
            Ok(())
        }
        Command::Cameras { max } => {
            let usable = {
                let _stage = ui.stage("Probe cameras");
                probe_cameras(max, &cfg.source)
            };
            if usable.is_empty() {
                println!("no cameras available");
            }
            for index in usable {
                println!("camera {} (/dev/video{})", index, index);
            }
            Ok(())
        }
    }
}

/// Config file and environment first, then command-line flags.
fn resolve_config(args: &Args) -> Result<InspectConfig> {
    let mut cfg = match &args.config {
        Some(path) => InspectConfig::load_from(path)?,
        None => InspectConfig::load()?,
    };
    if let Some(backend) = &args.backend {
        cfg.model.backend = backend.clone();
    }
    if let Some(model) = &args.model {
        cfg.model.path = model.clone();
    }
    if let Some(confidence) = args.confidence {
        cfg.detection.confidence = confidence;
    }
    if let Some(max_detections) = args.max_detections {
        cfg.detection.max_detections = max_detections;
    }
    if let Some(ms) = args.interval_ms {
        cfg.frame_interval = Duration::from_millis(ms);
    }
    cfg.validate()?;
    Ok(cfg)
}

/// A backend that fails to load leaves the session without a detector; the
/// session reports that through its outcome.
fn load_detector(cfg: &InspectConfig, ui: &ui::Ui) -> Option<Arc<dyn Detector>> {
    let _stage = ui.stage("Load detection model");
    let mut registry = DetectorRegistry::new();
    match registry.load(
        &cfg.model.backend,
        &cfg.model.path,
        cfg.model.input_size,
        cfg.model.class_names.clone(),
    ) {
        Ok(detector) => {
            if let Err(err) = detector.warm_up() {
                log::warn!("{} detector warm-up failed: {:#}", detector.name(), err);
            }
        }
        Err(err) => log::error!("detection model unavailable: {:#}", err),
    }
    registry.default_detector()
}

/// Image failures (undecodable file, no model, unwritable output) are
/// printed as the result line rather than failing the process.
fn run_image(
    path: &Path,
    out: Option<&Path>,
    detector: Option<&dyn Detector>,
    cfg: &InspectConfig,
    ui: &ui::Ui,
) -> bool {
    match inspect_image(path, out, detector, cfg, ui) {
        Ok(()) => true,
        Err(err) => {
            log::error!("inspection of {} failed: {:#}", path.display(), err);
            println!("result: inspection failed: {:#}", err);
            false
        }
    }
}

fn inspect_image(
    path: &Path,
    out: Option<&Path>,
    detector: Option<&dyn Detector>,
    cfg: &InspectConfig,
    ui: &ui::Ui,
) -> Result<()> {
    let image = RawImage::open(path)?;
    let batch = {
        let _stage = ui.stage("Detect defects");
        detect_single(detector, &image, &cfg.detection)?
    };

    print_table(&batch.detections);
    match batch.best() {
        Some(best) => println!("result: {} ({:.2})", best.label, best.confidence),
        None => println!("result: no defect detected"),
    }

    if let Some(out) = out {
        let _stage = ui.stage("Write annotated image");
        batch.annotated.save(out)?;
        println!("annotated image written to {}", out.display());
    }
    Ok(())
}

fn run_session(
    descriptor: SourceDescriptor,
    cfg: &InspectConfig,
    detector: Option<Arc<dyn Detector>>,
    out_dir: Option<&Path>,
    ui: &ui::Ui,
) -> Result<SessionSummary> {
    if let Some(dir) = out_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;
    }

    let (observer, events) = ChannelObserver::new();
    let mut session = CaptureDetectionSession::from_descriptor(
        &descriptor,
        &cfg.source,
        detector,
        cfg.session_config(),
        Arc::new(observer),
    );

    let stop = session.stop_handle();
    ctrlc::set_handler(move || stop.stop()).context("error setting Ctrl-C handler")?;

    session.start()?;
    let mut progress = ui.frames(&descriptor.to_string());

    let mut finished = None;
    for event in events.iter() {
        match event {
            SessionEvent::Frame(frame) => {
                progress.record(frame.detections.len());
                progress.println(&frame_line(frame.index, &frame.detections));
                if let Some(dir) = out_dir {
                    let path = dir.join(format!("frame_{:06}.jpg", frame.index));
                    if let Err(err) = write_jpeg(&frame.annotated, &path) {
                        log::warn!("failed to write {}: {:#}", path.display(), err);
                    }
                }
            }
            SessionEvent::Finished(summary) => {
                finished = Some(summary);
                break;
            }
        }
    }

    let joined = session.wait()?;
    let summary = finished.unwrap_or(joined);
    progress.finish(&summary.outcome.to_string());
    Ok(summary)
}

fn write_jpeg(image: &RawImage, path: &Path) -> Result<()> {
    let bytes = image.to_jpeg(DEFAULT_JPEG_QUALITY)?;
    std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

fn frame_line(index: u64, detections: &[Detection]) -> String {
    if detections.is_empty() {
        return format!("frame {:>6}: no defects", index);
    }
    let labels: Vec<String> = detections
        .iter()
        .map(|d| format!("{} {:.2}", d.label, d.confidence))
        .collect();
    format!(
        "frame {:>6}: {} defect(s): {}",
        index,
        detections.len(),
        labels.join(", ")
    )
}

fn print_table(detections: &[Detection]) {
    println!("{:<16} {:>10}  {}", "label", "confidence", "box");
    for detection in detections {
        let bbox = detection
            .bbox
            .map(|b| format!("({:.0},{:.0})-({:.0},{:.0})", b.x1, b.y1, b.x2, b.y2))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<16} {:>10.2}  {}",
            detection.label, detection.confidence, bbox
        );
    }
}

fn report(summary: &SessionSummary) {
    println!(
        "session {}: {} frame(s) processed, {} skipped",
        summary.outcome, summary.frames_processed, summary.frames_failed
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use weld_inspect::detect::StubDetector;

    fn plain_ui() -> ui::Ui {
        ui::Ui::from_args(Some("plain"), false, true)
    }

    #[test]
    fn undecodable_image_is_reported_not_raised() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("seam.png");
        std::fs::write(&path, b"not an image")?;
        let detector = StubDetector::with_single_defect();

        let ok = run_image(
            &path,
            None,
            Some(&detector as &dyn Detector),
            &InspectConfig::default(),
            &plain_ui(),
        );
        assert!(!ok);
        Ok(())
    }

    #[test]
    fn missing_detector_is_reported_not_raised() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("seam.png");
        RawImage::filled(16, 16, [90, 90, 90])?.save(&path)?;

        assert!(!run_image(&path, None, None, &InspectConfig::default(), &plain_ui()));
        Ok(())
    }

    #[test]
    fn image_with_detector_writes_annotated_copy() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("seam.png");
        let out = dir.path().join("seam_annotated.png");
        RawImage::filled(16, 16, [90, 90, 90])?.save(&path)?;
        let detector = StubDetector::with_single_defect();

        assert!(run_image(
            &path,
            Some(&out),
            Some(&detector as &dyn Detector),
            &InspectConfig::default(),
            &plain_ui(),
        ));
        assert!(out.exists());
        Ok(())
    }

    #[test]
    fn jpeg_write_error_names_the_path() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("missing").join("frame_000001.jpg");
        let err = write_jpeg(&RawImage::filled(8, 8, [0, 0, 0])?, &path).unwrap_err();
        assert!(err.to_string().contains("failed to write"));
        assert!(err.to_string().contains("frame_000001.jpg"));
        Ok(())
    }
}
