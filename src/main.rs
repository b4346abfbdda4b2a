use std::collections::VecDeque;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facecap::config::{self, Config};
use facecap::flow::{FlowCommand, FlowController, FlowEvent, Screen};
use facecap::session::CaptureSession;
use facecap::upload::{SourceKind, UploadCoordinator, UploadRequest};
use facecap::{pipeline, validator, SessionDriver, SpoolBackend, SystemClock};
use facecap_vision::{DeviceClass, FacingMode, LandmarkSet, ReplayDetector, TargetArea, V4lCamera};
use log::{info, warn};

#[derive(Parser)]
#[command(name = "facecap")]
#[command(version, about = "Guided face capture with geometric alignment checks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check one detection against a guide rectangle
    Validate {
        /// Landmark set as JSON (`null` for no face)
        #[arg(short, long)]
        landmarks: PathBuf,
        /// Guide rectangle as LEFT,TOP,RIGHT,BOTTOM in display pixels
        #[arg(short, long, value_parser = parse_area)]
        area: TargetArea,
        /// Use mobile thresholds
        #[arg(long)]
        mobile: bool,
    },
    /// Run a live camera session and submit the capture
    Capture {
        /// Detector output to replay, one JSON landmark set (or `null`) per line
        #[arg(short, long)]
        detections: PathBuf,
        #[arg(short, long)]
        email: String,
        /// Request the rear camera
        #[arg(long)]
        environment: bool,
        /// Display size as WIDTHxHEIGHT
        #[arg(long, value_parser = parse_size, default_value = "640x480")]
        display: (u32, u32),
    },
    /// Check a still image and submit it if aligned
    Upload {
        #[arg(short, long)]
        image: PathBuf,
        /// Detection for the image as JSON (`null` for no face)
        #[arg(short, long)]
        detection: PathBuf,
        #[arg(short, long)]
        email: String,
    },
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(None)?;

    match cli.command {
        Commands::Validate { landmarks, area, mobile } => validate(&landmarks, &area, mobile),
        Commands::Capture {
            detections,
            email,
            environment,
            display,
        } => capture(&cfg, &detections, email, environment, display),
        Commands::Upload { image, detection, email } => upload(&cfg, &image, &detection, email),
        Commands::Config => open_config(&cfg),
    }
}

fn parse_area(raw: &str) -> Result<TargetArea, String> {
    let values = raw
        .split(',')
        .map(|v| v.trim().parse::<f32>().map_err(|e| format!("{}: {}", v, e)))
        .collect::<Result<Vec<_>, _>>()?;
    match values.as_slice() {
        [left, top, right, bottom] if right > left && bottom > top => Ok(TargetArea {
            left: *left,
            top: *top,
            right: *right,
            bottom: *bottom,
        }),
        [_, _, _, _] => Err("area must have right > left and bottom > top".to_string()),
        _ => Err("expected LEFT,TOP,RIGHT,BOTTOM".to_string()),
    }
}

fn parse_size(raw: &str) -> Result<(u32, u32), String> {
    let (w, h) = raw.split_once('x').ok_or("expected WIDTHxHEIGHT")?;
    let w = w.parse::<u32>().map_err(|e| e.to_string())?;
    let h = h.parse::<u32>().map_err(|e| e.to_string())?;
    if w == 0 || h == 0 {
        return Err("display size must be non-zero".to_string());
    }
    Ok((w, h))
}

fn read_detection(path: &Path) -> Result<Option<LandmarkSet>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing landmarks in {}", path.display()))
}

fn validate(landmarks: &Path, area: &TargetArea, mobile: bool) -> Result<()> {
    let detection = read_detection(landmarks)?;
    let device = if mobile { DeviceClass::Mobile } else { DeviceClass::Desktop };

    if let Some(d) = &detection {
        let ratios = validator::FaceRatios::measure(d);
        info!("Score: {:.3}, box: {:?}", d.score(), d.bbox());
        info!(
            "Ratios: eye-to-jaw {:.3}, rotation {:.3}, symmetry {:.3} / {:.3}",
            ratios.eye_to_jaw, ratios.rotation, ratios.symmetry_left, ratios.symmetry_right
        );
    }

    let verdict = validator::validate(detection.as_ref(), area, device);
    info!("Verdict: {:?} ({})", verdict, verdict.hint());
    println!("{:?}", verdict);
    Ok(())
}

/// Executes flow commands against the camera driver and the backend.
struct Host {
    driver: SessionDriver<V4lCamera, ReplayDetector, SystemClock>,
    coordinator: UploadCoordinator,
    backend: SpoolBackend,
    flow: FlowController,
    capture_format: facecap_vision::capture::CaptureFormat,
}

impl Host {
    fn send(&mut self, event: FlowEvent) -> Result<()> {
        let mut queue: VecDeque<FlowCommand> = self.flow.on(event).into();
        while let Some(command) = queue.pop_front() {
            let follow_up = match command {
                FlowCommand::StartCamera => {
                    self.driver.start();
                    Some(FlowEvent::Session(self.driver.snapshot()))
                }
                FlowCommand::StopCamera => {
                    self.driver.stop();
                    None
                }
                FlowCommand::ResetCamera => {
                    self.coordinator.reset();
                    self.driver.reset();
                    Some(FlowEvent::Session(self.driver.snapshot()))
                }
                FlowCommand::OpenUploader => {
                    warn!("No uploader in a camera session");
                    None
                }
                FlowCommand::Submit(SourceKind::Camera) => Some(FlowEvent::UploadFinished(self.submit_capture()?)),
                FlowCommand::Submit(SourceKind::Upload) => {
                    warn!("Upload submission requested during a camera session");
                    None
                }
            };
            if let Some(event) = follow_up {
                queue.extend(self.flow.on(event));
            }
        }
        Ok(())
    }

    fn submit_capture(&mut self) -> Result<Result<(), facecap::SubmitError>> {
        let frame = self.driver.take_capture().context("session captured without a frame")?;
        let email = self.flow.email().context("submission without an email")?.to_string();
        let request = UploadRequest::from_capture(&frame, &self.capture_format, email)?;
        self.coordinator
            .submit(&mut self.backend, request)
            .context("a submission is already in flight")
    }
}

fn capture(cfg: &Config, detections: &Path, email: String, environment: bool, display: (u32, u32)) -> Result<()> {
    let facing = if environment { FacingMode::Environment } else { cfg.facing };
    let detector = ReplayDetector::open(detections).context("Failed to load detections")?;
    let viewport = cfg.viewport(display);

    let session = CaptureSession::new(facing).with_countdown(cfg.countdown_secs);
    info!("Session {} on camera {}", session.id(), cfg.camera);

    let driver = SessionDriver::new(session, V4lCamera::new(&cfg.camera), detector, SystemClock, viewport)
        .with_timing(cfg.timing())
        .with_overlay(Box::new(|landmarks: Option<&LandmarkSet>| {
            if let Some(l) = landmarks {
                log::debug!("overlay: face at {:?}", l.bbox());
            }
        }));

    let mut host = Host {
        driver,
        coordinator: UploadCoordinator::new(cfg.endpoint.clone()),
        backend: SpoolBackend::new(&cfg.spool_dir),
        flow: FlowController::new(viewport.device),
        capture_format: cfg.capture.clone(),
    };

    host.send(FlowEvent::DetectorLoaded)?;
    host.send(FlowEvent::SkipOnboarding)?;
    host.send(FlowEvent::EmailChanged(Some(email)))?;
    host.send(FlowEvent::ChooseCamera)?;

    let mut last = host.flow.screen();
    let limit = cfg.scan_duration();
    let started = std::time::Instant::now();
    while started.elapsed() < limit {
        if is_final(last) || !host.driver.step() {
            break;
        }
        host.send(FlowEvent::Session(host.driver.snapshot()))?;
        let screen = host.flow.screen();
        if screen != last {
            info!("Screen: {:?}", screen);
            last = screen;
        }
    }
    host.driver.stop();

    match host.flow.screen() {
        Screen::Success => {
            info!("✓ Capture submitted");
            Ok(())
        }
        screen if is_final(screen) => anyhow::bail!("Capture did not complete: {:?}", screen),
        screen => anyhow::bail!("Timed out after {}s in {:?}", limit.as_secs(), screen),
    }
}

fn is_final(screen: Screen) -> bool {
    matches!(
        screen,
        Screen::Success
            | Screen::CardNotFound
            | Screen::SubmitFailed
            | Screen::CameraPermissionDenied
            | Screen::CameraNotFound
            | Screen::CameraOverconstrained
    )
}

fn upload(cfg: &Config, image_path: &Path, detection: &Path, email: String) -> Result<()> {
    let frame = image::open(image_path)
        .with_context(|| format!("opening {}", image_path.display()))?
        .to_rgb8();
    let viewport = cfg.viewport(frame.dimensions());
    let mut detector = ReplayDetector::new(vec![read_detection(detection)?]);
    let verdict = pipeline::assess(&mut detector, &frame, &viewport);
    info!("Verdict: {:?} ({})", verdict, verdict.hint());

    let mut flow = FlowController::new(viewport.device);
    flow.on(FlowEvent::DetectorLoaded);
    flow.on(FlowEvent::SkipOnboarding);
    flow.on(FlowEvent::ChooseUpload);
    flow.on(FlowEvent::UploadSelected);
    flow.on(FlowEvent::UploadAssessed(verdict));
    flow.on(FlowEvent::EmailChanged(Some(email.clone())));

    if !flow.on(FlowEvent::SubmitUpload).contains(&FlowCommand::Submit(SourceKind::Upload)) {
        anyhow::bail!("Image not submitted: {}", verdict.hint());
    }

    let mut coordinator = UploadCoordinator::new(cfg.endpoint.clone());
    let mut backend = SpoolBackend::new(&cfg.spool_dir);
    let request = UploadRequest::from_file(image_path, email)?;
    let outcome = coordinator
        .submit(&mut backend, request)
        .context("a submission is already in flight")?;
    flow.on(FlowEvent::UploadFinished(outcome));

    match flow.screen() {
        Screen::Success => {
            info!("✓ Image submitted");
            Ok(())
        }
        screen => anyhow::bail!("Upload did not complete: {:?}", screen),
    }
}

fn open_config(cfg: &Config) -> Result<()> {
    if !config::CONFIG_PATH.exists() {
        config::save_config(cfg, None).context("Failed to write default config")?;
    }
    let config_path = config::CONFIG_PATH.as_os_str();
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
