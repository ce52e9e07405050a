pub mod bbox;
pub mod config;
pub mod crossing;
pub mod detection;
pub mod detector;
pub mod error;
pub mod frame;
pub mod math;
pub mod meter;
pub mod posture;
pub mod progress;
pub mod render;
pub mod replay;
pub mod skeleton;
pub mod tracker;
pub mod video;
pub mod worker;
pub mod zone;

mod track;

pub use crossing::SpeedResult;
pub use detection::Detection;
pub use frame::Frame;
pub use meter::SpeedMeter;
pub use posture::{PostureOutcome, PostureReport, PostureScorer, PostureType};
pub use track::Track;

use config::Config;
use detector::{Detect, DetectorAdapter, ReuseConfig};
use error::Error;
use std::time::Duration;
use tracker::{MultiObjectTracker, TrackerAdapter};

/// Wires a detector and a tracker into a speed meter as configured, moving
/// inference onto a worker thread when a latency budget is set.
pub fn speed_meter<D, T>(
    config: &Config,
    detector: D,
    tracker: T,
) -> Result<SpeedMeter<Box<dyn Detect + Send>, T>, Error>
where
    D: Detect + Send + 'static,
    T: MultiObjectTracker,
{
    config.validate()?;

    let detector: Box<dyn Detect + Send> = match config.detector.latency_budget_ms {
        Some(ms) => Box::new(worker::BudgetedDetector::spawn(
            detector,
            Duration::from_millis(ms),
        )?),
        None => Box::new(detector),
    };

    let meter = SpeedMeter::new(
        DetectorAdapter::new(detector, ReuseConfig::from(&config.detector)),
        TrackerAdapter::new(tracker),
        config.speed.clone(),
    )?;

    Ok(meter.with_overlay(render::Overlay::from_config(&config.render)?))
}
