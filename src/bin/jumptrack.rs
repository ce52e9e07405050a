use clap::Parser;
use jumptrack::config::Config;
use jumptrack::error::Error;
use jumptrack::progress::{self, CancelToken, Progress, Reporter};
use jumptrack::render;
use jumptrack::replay::{ReplayDetector, ReplayPoseEstimator};
use jumptrack::tracker::IouTracker;
use jumptrack::video::{FrameSource, VideoFileSource, VideoWriter};
use jumptrack::PostureScorer;

use crossbeam_channel::Receiver;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Measures run-up speed and scores jump postures of a long-jump video.
#[derive(Parser, Debug)]
#[command(name = "jumptrack", version)]
struct Opt {
    /// Input video
    video: PathBuf,

    /// JSON configuration, defaults are used for missing fields
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Recorded detections, one `<frame>:<json>` line per frame
    #[arg(long)]
    detections: Option<PathBuf>,

    /// Resolution the recorded detections were made at, e.g. 1920x1080
    #[arg(long, value_parser = parse_size)]
    detections_size: Option<(u32, u32)>,

    /// Recorded pose landmarks, one `<frame>:<json>` line per frame
    #[arg(long)]
    landmarks: Option<PathBuf>,

    /// Directory the results folder is created in
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s.split_once('x').ok_or("expected WIDTHxHEIGHT")?;
    let w = w.parse().map_err(|e| format!("{}", e))?;
    let h = h.parse().map_err(|e| format!("{}", e))?;

    Ok((w, h))
}

fn drain(name: &str, rx: Receiver<Progress>) {
    for event in rx {
        match event {
            Progress::Percent(p) => info!(task = name, "{}%", p),
            Progress::Speed(s) => info!(task = name, "speed {:.2} m/s", s),
            Progress::SpeedDone(r) => info!(task = name, ?r, "done"),
            Progress::PostureDone(r) => info!(task = name, outcomes = r.outcomes.len(), "done"),
            Progress::Preview(_) => {}
        }
    }
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let opt = Opt::parse();

    let config = match &opt.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let folder = render::results_folder(&opt.video, &opt.out)?;
    let overlay = render::Overlay::from_config(&config.render)?;
    let cancel = CancelToken::new();
    let mut speed_job = None;
    let mut posture_job = None;

    if let Some(path) = &opt.detections {
        let mut detector = ReplayDetector::from_file(path)?;
        if let Some((w, h)) = opt.detections_size {
            detector = detector.with_source_size(w, h);
        }

        let meter = jumptrack::speed_meter(&config, detector, IouTracker::new(config.tracker.clone()))?;
        let source = VideoFileSource::open(&opt.video)?;
        let (reporter, rx) = Reporter::channel();

        let handle = progress::spawn_speed(meter, source, None::<VideoWriter>, reporter, cancel.clone())?;
        speed_job = Some((handle, std::thread::spawn(move || drain("speed", rx))));
    }

    if let Some(path) = &opt.landmarks {
        let scorer = PostureScorer::new(ReplayPoseEstimator::from_file(path)?, config.posture.clone())
            .with_overlay(overlay.clone());
        let source = VideoFileSource::open(&opt.video)?;
        let sink = VideoWriter::new(render::annotated_video_path(&folder, &opt.video)?, source.fps());
        let (reporter, rx) = Reporter::channel();

        let handle = progress::spawn_posture(scorer, source, Some(sink), reporter, cancel.clone())?;
        posture_job = Some((handle, std::thread::spawn(move || drain("posture", rx))));
    }

    if speed_job.is_none() && posture_job.is_none() {
        error!("nothing to do, pass --detections and/or --landmarks");
        return Ok(());
    }

    if let Some((handle, printer)) = speed_job {
        let result = handle.join().map_err(|_| Error::WorkerGone)??;
        progress::join_logged("speed progress", printer);

        std::fs::write(folder.join("speed.json"), serde_json::to_vec_pretty(&result)?)?;
        match result.speed() {
            Some(speed) => info!("speed: {:.2} m/s", speed),
            None => info!("speed: not measured"),
        }
    }

    if let Some((handle, printer)) = posture_job {
        let report = handle.join().map_err(|_| Error::WorkerGone)??;
        progress::join_logged("posture progress", printer);

        render::write_posture_results(&folder, &report, config.posture.canvas, &overlay)?;
        for outcome in &report.outcomes {
            info!(posture = %outcome.posture(), score = ?outcome.score());
        }
    }

    info!(folder = %folder.display(), "results written");

    Ok(())
}
