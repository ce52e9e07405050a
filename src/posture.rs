use crate::config::PostureConfig;
use crate::error::Error;
use crate::frame::Frame;
use crate::math;
use crate::progress::{CancelToken, Progress, Reporter};
use crate::render::{self, Overlay};
use crate::skeleton::{PoseEstimator, SkeletonPoints};
use crate::video::{FrameSink, FrameSource};

use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PostureType {
    TakeOff,
    HipExtension,
    AbdominalContraction,
}

impl PostureType {
    pub const ALL: [PostureType; 3] = [
        PostureType::TakeOff,
        PostureType::HipExtension,
        PostureType::AbdominalContraction,
    ];

    /// File stem of the reference skeleton, scoring model and score card.
    pub fn name(&self) -> &'static str {
        match self {
            PostureType::TakeOff => "take_off",
            PostureType::HipExtension => "hip_extension",
            PostureType::AbdominalContraction => "abdominal_contraction",
        }
    }
}

impl fmt::Display for PostureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A stored reference skeleton with its joint angles computed once.
#[derive(Debug, Clone)]
pub struct ReferencePosture {
    pub posture: PostureType,
    pub points: SkeletonPoints,
    pub angles: [f64; 3],
}

impl ReferencePosture {
    pub fn new(posture: PostureType, points: SkeletonPoints) -> Self {
        let angles = points.take_off_angles();

        Self {
            posture,
            points,
            angles,
        }
    }

    /// Reads `<dir>/<posture>.txt`.
    pub fn load(dir: &Path, posture: PostureType) -> Result<Self, Error> {
        let path = dir.join(format!("{}.txt", posture.name()));
        let fail = |reason: String| Error::ReferencePosture {
            path: path.display().to_string(),
            reason,
        };

        let text = std::fs::read_to_string(&path).map_err(|e| fail(e.to_string()))?;
        let points = SkeletonPoints::parse(&text).map_err(fail)?;

        Ok(Self::new(posture, points))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceParams {
    pub weights: [f64; 3],
    pub threshold: f64,
    pub cosine_blend: f64,
}

impl DistanceParams {
    pub fn from_config(config: &PostureConfig, posture: PostureType) -> Self {
        Self {
            weights: config.weights(posture),
            threshold: config.threshold,
            cosine_blend: config.cosine_blend,
        }
    }
}

/// Weighted Euclidean distance of two angle vectors, refined with the cosine
/// distance once it drops below the threshold.
pub fn posture_distance(candidate: &[f64; 3], reference: &[f64; 3], params: &DistanceParams) -> f64 {
    let d = math::weighted_euclidean(candidate, reference, &params.weights);

    if d < params.threshold {
        let blend = params.cosine_blend;
        (1.0 - blend) * d + blend * math::cosine_distance(candidate, reference)
    } else {
        d
    }
}

/// Best frame seen so far for one posture.
#[derive(Debug, Clone)]
pub struct PostureBestMatch {
    pub posture: PostureType,
    pub distance: f64,
    pub points: Option<SkeletonPoints>,
    pub frame_index: Option<u64>,
    pub angles: Option<[f64; 3]>,
}

impl PostureBestMatch {
    pub fn new(posture: PostureType) -> Self {
        Self {
            posture,
            distance: f64::INFINITY,
            points: None,
            frame_index: None,
            angles: None,
        }
    }

    /// Replaces the match when `distance` is strictly lower. Returns whether it did.
    pub fn offer(
        &mut self,
        distance: f64,
        points: &SkeletonPoints,
        frame_index: u64,
        angles: [f64; 3],
    ) -> bool {
        if distance.is_nan() || distance >= self.distance {
            return false;
        }

        self.distance = distance;
        self.points = Some(points.clone());
        self.frame_index = Some(frame_index);
        self.angles = Some(angles);

        true
    }

    #[inline]
    pub fn is_matched(&self) -> bool {
        self.frame_index.is_some()
    }
}

/// A pretrained regression from joint angles to a score.
pub trait ScoringModel: Send {
    fn predict(&self, angles: &[f64; 3]) -> Result<f64, Error>;
}

/// `score = coefficients . angles + intercept`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LinearModel {
    pub coefficients: [f64; 3],
    pub intercept: f64,
}

impl LinearModel {
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let fail = |reason: String| Error::ScoringModel {
            name: path.display().to_string(),
            reason,
        };

        let data = std::fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
        serde_json::from_str(&data).map_err(|e| fail(e.to_string()))
    }
}

impl ScoringModel for LinearModel {
    fn predict(&self, angles: &[f64; 3]) -> Result<f64, Error> {
        let score = self
            .coefficients
            .iter()
            .zip(angles)
            .map(|(c, a)| c * a)
            .sum::<f64>()
            + self.intercept;

        if score.is_finite() {
            Ok(score)
        } else {
            Err(Error::ScoringModel {
                name: "linear".into(),
                reason: format!("non-finite score for {:?}", angles),
            })
        }
    }
}

/// Scoring models by posture, loaded once per run.
#[derive(Default)]
pub struct ModelRegistry {
    models: HashMap<PostureType, Box<dyn ScoringModel>>,
    failures: HashMap<PostureType, String>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `<dir>/<posture>.json` for every posture; a model that fails to
    /// load only disables its own posture.
    pub fn load(dir: &Path) -> Self {
        let mut registry = Self::new();

        for posture in PostureType::ALL {
            let path = dir.join(format!("{}.json", posture.name()));
            match LinearModel::from_file(&path) {
                Ok(model) => registry.insert(posture, model),
                Err(err) => {
                    warn!(%posture, %err, "scoring model unavailable");
                    registry.failures.insert(posture, err.to_string());
                }
            }
        }

        registry
    }

    pub fn insert(&mut self, posture: PostureType, model: impl ScoringModel + 'static) {
        self.failures.remove(&posture);
        self.models.insert(posture, Box::new(model));
    }

    pub fn get(&self, posture: PostureType) -> Option<&dyn ScoringModel> {
        self.models.get(&posture).map(|m| m.as_ref())
    }

    fn score(&self, posture: PostureType, angles: &[f64; 3]) -> Result<f64, String> {
        match self.get(posture) {
            Some(model) => model.predict(angles).map_err(|e| e.to_string()),
            None => Err(self
                .failures
                .get(&posture)
                .cloned()
                .unwrap_or_else(|| format!("no scoring model for {}", posture))),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PostureOutcome {
    /// Reference or model could not be loaded.
    Unavailable { posture: PostureType, reason: String },
    /// No frame with a detected person.
    NoMatch { posture: PostureType },
    Scored {
        posture: PostureType,
        frame_index: u64,
        distance: f64,
        angles: [f64; 3],
        score: f64,
        points: Vec<(f64, f64)>,
    },
}

impl PostureOutcome {
    pub fn posture(&self) -> PostureType {
        match self {
            PostureOutcome::Unavailable { posture, .. }
            | PostureOutcome::NoMatch { posture }
            | PostureOutcome::Scored { posture, .. } => *posture,
        }
    }

    pub fn score(&self) -> Option<f64> {
        match self {
            PostureOutcome::Scored { score, .. } => Some(*score),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct FrameAngle {
    pub frame_index: u64,
    pub degrees: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PostureReport {
    pub outcomes: Vec<PostureOutcome>,
    pub frames_read: u64,
    pub frames_with_pose: u64,
    pub take_off_angles: Vec<FrameAngle>,
}

impl PostureReport {
    pub fn outcome(&self, posture: PostureType) -> Option<&PostureOutcome> {
        self.outcomes.iter().find(|o| o.posture() == posture)
    }
}

/// The posture-scoring loop over one video.
pub struct PostureScorer<P> {
    estimator: P,
    references: HashMap<PostureType, Result<ReferencePosture, String>>,
    models: ModelRegistry,
    overlay: Overlay,
    config: PostureConfig,
}

impl<P: PoseEstimator> PostureScorer<P> {
    /// Loads reference skeletons and scoring models from the configured directories.
    pub fn new(estimator: P, config: PostureConfig) -> Self {
        let references = PostureType::ALL
            .iter()
            .map(|&posture| {
                let reference = ReferencePosture::load(&config.reference_dir, posture).map_err(|err| {
                    warn!(%posture, %err, "reference posture unavailable");
                    err.to_string()
                });

                (posture, reference)
            })
            .collect();

        let models = ModelRegistry::load(&config.model_dir);

        Self {
            estimator,
            references,
            models,
            overlay: Overlay::none(),
            config,
        }
    }

    /// Labels overlay frames with the take-off angle.
    pub fn with_overlay(mut self, overlay: Overlay) -> Self {
        self.overlay = overlay;
        self
    }

    /// Uses the given references and models; postures without a reference are unavailable.
    pub fn with_parts(
        estimator: P,
        references: Vec<ReferencePosture>,
        models: ModelRegistry,
        config: PostureConfig,
    ) -> Self {
        let mut map: HashMap<_, _> = PostureType::ALL
            .iter()
            .map(|&p| (p, Err(format!("no reference posture for {}", p))))
            .collect();

        for r in references {
            map.insert(r.posture, Ok(r));
        }

        Self {
            estimator,
            references: map,
            models,
            overlay: Overlay::none(),
            config,
        }
    }

    fn skeleton(&mut self, frame: &Frame) -> Option<SkeletonPoints> {
        let landmarks = match self.estimator.process(frame) {
            Ok(Some(landmarks)) => landmarks,
            Ok(None) => return None,
            Err(err) => {
                warn!(frame = frame.index, %err, "pose estimation failed");
                return None;
            }
        };

        match SkeletonPoints::from_landmarks(&landmarks) {
            Ok(points) => Some(points),
            Err(err) => {
                warn!(frame = frame.index, %err, "incomplete pose");
                None
            }
        }
    }

    /// Scans the whole source, keeping the best frame per posture, then scores each.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        mut sink: Option<&mut dyn FrameSink>,
        reporter: &Reporter,
        cancel: &CancelToken,
    ) -> Result<PostureReport, Error> {
        let total = source.frame_count();
        let mut best: Vec<_> = PostureType::ALL.iter().map(|&p| PostureBestMatch::new(p)).collect();
        let mut report = PostureReport {
            outcomes: Vec::new(),
            frames_read: 0,
            frames_with_pose: 0,
            take_off_angles: Vec::new(),
        };

        loop {
            if cancel.is_cancelled() {
                info!(frames = report.frames_read, "posture scan cancelled");
                break;
            }

            let mut frame = match source.read()? {
                Some(frame) => frame,
                None => break,
            };
            report.frames_read += 1;

            if let Some(points) = self.skeleton(&frame) {
                report.frames_with_pose += 1;
                let angles = points.take_off_angles();

                for m in best.iter_mut() {
                    let reference = match self.references.get(&m.posture) {
                        Some(Ok(reference)) => reference,
                        _ => continue,
                    };

                    let params = DistanceParams::from_config(&self.config, m.posture);
                    let d = posture_distance(&angles, &reference.angles, &params);
                    if m.offer(d, &points, frame.index, angles) {
                        debug!(posture = %m.posture, frame = frame.index, distance = d, "better match");
                    }
                }

                let degrees = math::round2(points.take_off_angle());
                report.take_off_angles.push(FrameAngle {
                    frame_index: frame.index,
                    degrees,
                });

                if sink.is_some() {
                    let mut img = frame.to_image();
                    let pixels = points.to_pixels(frame.width(), frame.height());
                    render::draw_skeleton(&mut img, &pixels, render::SKELETON_COLOR);
                    self.overlay
                        .text(&mut img, 10, 10, render::LABEL_COLOR, &render::angle_label(degrees));
                    frame = Frame::from_image(frame.index, &img);
                }
            }

            if let Some(sink) = sink.as_mut() {
                sink.write(&frame)?;
            }

            reporter.progress(report.frames_read, total);
            reporter.preview(&frame);
        }

        report.outcomes = best.into_iter().map(|m| self.outcome(m)).collect();

        for outcome in &report.outcomes {
            match outcome.score() {
                Some(score) => info!(posture = %outcome.posture(), score, "posture scored"),
                None => info!(posture = %outcome.posture(), ?outcome, "posture not scored"),
            }
        }

        reporter.send(Progress::PostureDone(report.clone()));

        Ok(report)
    }

    fn outcome(&self, m: PostureBestMatch) -> PostureOutcome {
        let posture = m.posture;

        if let Some(Err(reason)) = self.references.get(&posture) {
            return PostureOutcome::Unavailable {
                posture,
                reason: reason.clone(),
            };
        }

        let (points, frame_index, angles) = match (m.points, m.frame_index, m.angles) {
            (Some(points), Some(frame_index), Some(angles)) => (points, frame_index, angles),
            _ => return PostureOutcome::NoMatch { posture },
        };

        match self.models.score(posture, &angles) {
            Ok(score) => PostureOutcome::Scored {
                posture,
                frame_index,
                distance: m.distance,
                angles,
                score,
                points: points.to_pairs(),
            },
            Err(reason) => PostureOutcome::Unavailable { posture, reason },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra as na;

    fn skeleton(shift: f64) -> SkeletonPoints {
        let pts = (0..19)
            .map(|i| na::Point2::new(0.3 + i as f64 * 0.02 + shift * (i % 3) as f64, 0.2 + i as f64 * 0.03))
            .collect();
        SkeletonPoints::from_points(pts).unwrap()
    }

    fn params() -> DistanceParams {
        DistanceParams::from_config(&PostureConfig::default(), PostureType::TakeOff)
    }

    #[test]
    fn identical_angles_have_zero_distance() {
        let a = [120.0, 45.0, 30.0];

        assert!(posture_distance(&a, &a, &params()).abs() < 1e-12);
    }

    #[test]
    fn cosine_blend_only_below_threshold() {
        let p = params();
        let q = [100.0, 50.0, 30.0];

        let far = [110.0, 50.0, 30.0];
        let d = posture_distance(&far, &q, &p);
        assert!((d - (0.3f64 * 100.0).sqrt()).abs() < 1e-12);

        let near = [101.0, 50.0, 30.0];
        let raw = 0.3f64.sqrt();
        let blended = 0.7 * raw + 0.3 * math::cosine_distance(&near, &q);
        assert!((posture_distance(&near, &q, &p) - blended).abs() < 1e-12);
    }

    #[test]
    fn best_match_is_monotone_and_first_wins_ties() {
        let mut best = PostureBestMatch::new(PostureType::HipExtension);
        let points = skeleton(0.0);
        let angles = points.take_off_angles();

        assert!(best.offer(5.0, &points, 1, angles));
        assert!(!best.offer(5.0, &points, 2, angles));
        assert!(!best.offer(7.0, &points, 3, angles));
        assert!(best.offer(2.0, &points, 4, angles));

        assert_eq!(best.frame_index, Some(4));
        assert_eq!(best.distance, 2.0);
    }

    #[test]
    fn nan_distance_never_replaces() {
        let mut best = PostureBestMatch::new(PostureType::TakeOff);
        let points = skeleton(0.0);

        assert!(!best.offer(f64::NAN, &points, 0, [0.0; 3]));
        assert!(!best.is_matched());
    }

    #[test]
    fn linear_model_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take_off.json");
        std::fs::write(&path, r#"{"coefficients":[0.5,0.25,0.0],"intercept":10}"#).unwrap();

        let model = LinearModel::from_file(&path).unwrap();
        assert_eq!(model.predict(&[20.0, 4.0, 99.0]).unwrap(), 21.0);

        let registry = ModelRegistry::load(dir.path());
        assert!(registry.get(PostureType::TakeOff).is_some());
        assert!(registry.get(PostureType::HipExtension).is_none());
        assert!(registry.score(PostureType::HipExtension, &[0.0; 3]).is_err());
    }

    #[test]
    fn reference_loaded_from_text() {
        let dir = tempfile::tempdir().unwrap();
        let sk = skeleton(0.01);
        let text: String = sk.points().iter().map(|p| format!("{},{}\n", p.x, p.y)).collect();
        std::fs::write(dir.path().join("hip_extension.txt"), text).unwrap();

        let r = ReferencePosture::load(dir.path(), PostureType::HipExtension).unwrap();
        assert_eq!(r.angles, sk.take_off_angles());

        assert!(matches!(
            ReferencePosture::load(dir.path(), PostureType::TakeOff),
            Err(Error::ReferencePosture { .. })
        ));
    }
}
