use crate::error::Error;
use crate::posture::PostureType;
use crate::zone::{ENTRY_POLYGON, EXIT_POLYGON};

use serde_derive::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub speed: SpeedConfig,
    pub detector: DetectorConfig,
    pub tracker: TrackerConfig,
    pub posture: PostureConfig,
    pub render: RenderConfig,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let data = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&data)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.speed.validate()?;
        self.detector.validate()?;
        self.posture.validate()?;
        self.render.validate()
    }
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidConfig(msg.into())
}

fn check_fraction(name: &str, v: f64) -> Result<(), Error> {
    if v > 0.0 && v <= 1.0 {
        Ok(())
    } else {
        Err(invalid(format!("{} must be in (0, 1], got {}", name, v)))
    }
}

fn check_resolution(name: &str, (w, h): (u32, u32)) -> Result<(), Error> {
    if w == 0 || h == 0 {
        Err(invalid(format!("{} must be non-zero, got {}x{}", name, w, h)))
    } else {
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SpeedConfig {
    /// Distance between the two trigger zones in meters
    pub distance_m: f64,
    /// Process every n-th frame
    pub frame_skip: u32,
    /// Resolution the zone polygons are given in
    pub display_resolution: (u32, u32),
    /// Resolution detection and zone tests run at
    pub processing_resolution: (u32, u32),
    /// Pixel neighbourhood around each probe point
    pub zone_tolerance: u32,
    pub entry_polygon: Vec<(f32, f32)>,
    pub exit_polygon: Vec<(f32, f32)>,
    pub early_stop: bool,
    pub fallback_fraction: f64,
    /// Used when the source reports no frame rate
    pub fps_override: Option<f64>,
}

impl Default for SpeedConfig {
    fn default() -> Self {
        Self {
            distance_m: 4.0,
            frame_skip: 1,
            display_resolution: (1280, 720),
            processing_resolution: (1280, 720),
            zone_tolerance: 2,
            entry_polygon: ENTRY_POLYGON.to_vec(),
            exit_polygon: EXIT_POLYGON.to_vec(),
            early_stop: true,
            fallback_fraction: 0.8,
            fps_override: None,
        }
    }
}

impl SpeedConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.frame_skip == 0 {
            return Err(invalid("speed.frame_skip must be at least 1"));
        }

        if self.distance_m <= 0.0 {
            return Err(invalid("speed.distance_m must be positive"));
        }

        if self.entry_polygon.len() < 3 || self.exit_polygon.len() < 3 {
            return Err(invalid("trigger polygons need at least 3 vertices"));
        }

        let (w, h) = self.processing_resolution;
        if self.zone_tolerance > w.min(h) {
            return Err(invalid(format!(
                "speed.zone_tolerance {} exceeds the processing resolution {}x{}",
                self.zone_tolerance, w, h
            )));
        }

        if let Some(fps) = self.fps_override {
            if fps <= 0.0 {
                return Err(invalid("speed.fps_override must be positive"));
            }
        }

        check_fraction("speed.fallback_fraction", self.fallback_fraction)?;
        check_resolution("speed.display_resolution", self.display_resolution)?;
        check_resolution("speed.processing_resolution", self.processing_resolution)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DetectorConfig {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub input_size: u32,
    pub has_objectness: bool,
    pub class_names: Vec<String>,
    pub target_class: String,
    /// Histogram correlation above which the previous detections are reused
    pub similarity_threshold: Option<f64>,
    pub max_consecutive_reuse: u32,
    /// Wall-clock budget of one inference, unlimited when unset
    pub latency_budget_ms: Option<u64>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
            iou_threshold: 0.4,
            input_size: 640,
            has_objectness: true,
            class_names: vec!["person".into()],
            target_class: "person".into(),
            similarity_threshold: Some(0.98),
            max_consecutive_reuse: 3,
            latency_budget_ms: None,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), Error> {
        check_fraction("detector.confidence_threshold", self.confidence_threshold as f64)?;
        check_fraction("detector.iou_threshold", self.iou_threshold as f64)?;

        if self.input_size == 0 {
            return Err(invalid("detector.input_size must be non-zero"));
        }

        if let Some(t) = self.similarity_threshold {
            check_fraction("detector.similarity_threshold", t)?;
        }

        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    /// Consecutive hits before a track is confirmed
    pub n_init: u32,
    /// Updates without a match before a track is deleted
    pub max_age: u32,
    pub iou_threshold: f32,
    pub min_confidence: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            n_init: 3,
            max_age: 70,
            iou_threshold: 0.3,
            min_confidence: 0.3,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PostureConfig {
    pub take_off_weights: [f64; 3],
    pub hip_extension_weights: [f64; 3],
    pub abdominal_contraction_weights: [f64; 3],
    /// Weighted distance below which the cosine blend applies
    pub threshold: f64,
    pub cosine_blend: f64,
    /// Directory holding `<posture>.txt` reference skeletons
    pub reference_dir: PathBuf,
    /// Directory holding `<posture>.json` scoring models
    pub model_dir: PathBuf,
    pub canvas: (u32, u32),
}

impl Default for PostureConfig {
    fn default() -> Self {
        Self {
            take_off_weights: [0.3, 0.5, 0.2],
            hip_extension_weights: [0.3, 0.5, 0.2],
            abdominal_contraction_weights: [0.3, 0.5, 0.2],
            threshold: 1.0,
            cosine_blend: 0.3,
            reference_dir: PathBuf::from("."),
            model_dir: PathBuf::from("."),
            canvas: (1280, 720),
        }
    }
}

impl PostureConfig {
    pub fn weights(&self, posture: PostureType) -> [f64; 3] {
        match posture {
            PostureType::TakeOff => self.take_off_weights,
            PostureType::HipExtension => self.hip_extension_weights,
            PostureType::AbdominalContraction => self.abdominal_contraction_weights,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        check_fraction("posture.cosine_blend", self.cosine_blend)?;
        check_resolution("posture.canvas", self.canvas)?;

        for posture in PostureType::ALL {
            if self.weights(posture).iter().any(|w| *w < 0.0) {
                return Err(invalid(format!("{} weights must be non-negative", posture)));
            }
        }

        Ok(())
    }
}

/// Overlay text; labels are skipped when no font is configured.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    pub font_path: Option<PathBuf>,
    pub text_scale: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            font_path: None,
            text_scale: 28.0,
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if !self.text_scale.is_finite() || self.text_scale <= 0.0 {
            return Err(invalid("render.text_scale must be positive"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"speed": {"frame_skip": 2}, "tracker": {"max_age": 10}}"#).unwrap();

        let config = Config::from_file(&path).unwrap();

        assert_eq!(config.speed.frame_skip, 2);
        assert_eq!(config.speed.distance_m, 4.0);
        assert_eq!(config.speed.entry_polygon.len(), 4);
        assert_eq!(config.tracker.max_age, 10);
        assert_eq!(config.tracker.n_init, 3);
        assert_eq!(config.detector, DetectorConfig::default());
    }

    #[test]
    fn rejects_zero_frame_skip() {
        let mut config = Config::default();
        config.speed.frame_skip = 0;

        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn rejects_fraction_out_of_range() {
        let mut config = Config::default();
        config.speed.fallback_fraction = 1.5;

        assert!(config.validate().is_err());
        config.speed.fallback_fraction = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_tolerance_beyond_frame() {
        let mut config = Config::default();
        config.speed.processing_resolution = (320, 180);
        config.speed.zone_tolerance = 180;
        assert!(config.validate().is_ok());

        config.speed.zone_tolerance = 181;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn weights_follow_posture() {
        let mut config = PostureConfig::default();
        config.hip_extension_weights = [1.0, 0.0, 0.0];

        assert_eq!(config.weights(PostureType::HipExtension), [1.0, 0.0, 0.0]);
        assert_eq!(config.weights(PostureType::TakeOff), [0.3, 0.5, 0.2]);
    }
}
