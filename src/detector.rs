use crate::bbox::BBox;
use crate::config::DetectorConfig;
use crate::detection::{Detection, PERSON};
use crate::error::Error;
use crate::frame::{Frame, Letterbox};
use crate::math;

use ndarray::prelude::*;
use tracing::{debug, warn};

/// Anything that turns a frame into person boxes in that frame's coordinates.
pub trait Detect {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Error>;
}

impl<D: Detect + ?Sized> Detect for Box<D> {
    #[inline]
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Error> {
        (**self).detect(frame)
    }
}

/// The detection network itself.
///
/// Takes a `[1, 3, S, S]` RGB input in `[0, 1]` and returns `[batch, predictions, values]`
/// where each prediction row is `cx, cy, w, h, [objectness,] class scores...` in input pixels.
pub trait InferenceModel {
    fn run(&mut self, input: ArrayView4<'_, f32>) -> Result<Array3<f32>, Error>;
}

pub struct YoloDetectorConfig {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub input_size: u32,
    pub has_objectness: bool,
    pub class_names: Vec<String>,
    pub target: String,
}

impl YoloDetectorConfig {
    pub fn new(confidence_threshold: f32, class_names: Vec<String>) -> Self {
        Self {
            confidence_threshold,
            iou_threshold: 0.4,
            input_size: 640,
            has_objectness: true,
            class_names,
            target: PERSON.to_string(),
        }
    }
}

impl From<&DetectorConfig> for YoloDetectorConfig {
    fn from(cfg: &DetectorConfig) -> Self {
        Self {
            confidence_threshold: cfg.confidence_threshold,
            iou_threshold: cfg.iou_threshold,
            input_size: cfg.input_size,
            has_objectness: cfg.has_objectness,
            class_names: cfg.class_names.clone(),
            target: cfg.target_class.clone(),
        }
    }
}

pub struct YoloDetector<M> {
    model: M,
    config: YoloDetectorConfig,
}

impl<M: InferenceModel> YoloDetector<M> {
    pub fn new(model: M, config: YoloDetectorConfig) -> Self {
        Self { model, config }
    }

    fn class_name(&self, index: usize) -> Option<&str> {
        self.config.class_names.get(index).map(String::as_str)
    }

    fn postprocess(
        &self,
        view: ArrayView3<'_, f32>,
        letterbox: &Letterbox,
        frame_width: u32,
        frame_height: u32,
    ) -> Vec<Detection> {
        let offset = if self.config.has_objectness { 5 } else { 4 };
        let mut dets = Vec::new();

        for batch in view.outer_iter() {
            for row in batch.outer_iter() {
                if row.len() <= offset {
                    continue;
                }

                let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
                let objectness = if self.config.has_objectness { row[4] } else { 1.0 };

                let mut class_index = None;
                let mut score = 0.0;

                for (idx, val) in row.iter().skip(offset).copied().enumerate() {
                    if val > score {
                        class_index = Some(idx);
                        score = val;
                    }
                }

                let confidence = objectness * score;
                let label = match class_index.and_then(|idx| self.class_name(idx)) {
                    Some(label) if confidence > self.config.confidence_threshold => label,
                    _ => continue,
                };

                if label != self.config.target {
                    continue;
                }

                let bbox = BBox::xywh(cx, cy, w, h).as_ltrb();
                let bbox = letterbox.unmap(&bbox).clip(frame_width, frame_height);
                let bbox = BBox::ltrb(
                    bbox.left().round(),
                    bbox.top().round(),
                    bbox.right().round(),
                    bbox.bottom().round(),
                );

                dets.push(Detection::new(bbox, label, confidence));
            }
        }

        non_maximum_suppression(&mut dets, self.config.iou_threshold);

        dets
    }
}

impl<M: InferenceModel> Detect for YoloDetector<M> {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Error> {
        let (input, letterbox) = frame.letterbox(self.config.input_size);
        let predictions = self.model.run(input.view())?;

        Ok(self.postprocess(predictions.view(), &letterbox, frame.width(), frame.height()))
    }
}

/// Greedy NMS, keeps the most confident box of every overlapping cluster.
pub fn non_maximum_suppression(dets: &mut Vec<Detection>, iou_threshold: f32) {
    dets.sort_unstable_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut retain = vec![true; dets.len()];
    for idx in 0..dets.len() {
        if !retain[idx] {
            continue;
        }

        for other in idx + 1..dets.len() {
            if retain[other] && dets[idx].iou(&dets[other]) > iou_threshold {
                retain[other] = false;
            }
        }
    }

    let mut keep = retain.into_iter();
    dets.retain(|_| keep.next().unwrap_or(false));
}

#[derive(Debug, Clone)]
pub struct ReuseConfig {
    /// Histogram correlation above which a frame counts as unchanged, `None` disables reuse
    pub similarity_threshold: Option<f64>,
    pub max_consecutive_reuse: u32,
    pub signature_size: (u32, u32),
    pub signature_bins: usize,
}

impl Default for ReuseConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: Some(0.98),
            max_consecutive_reuse: 3,
            signature_size: (64, 36),
            signature_bins: 32,
        }
    }
}

impl From<&DetectorConfig> for ReuseConfig {
    fn from(cfg: &DetectorConfig) -> Self {
        Self {
            similarity_threshold: cfg.similarity_threshold,
            max_consecutive_reuse: cfg.max_consecutive_reuse,
            ..Default::default()
        }
    }
}

/// The most recent inference result together with the frame signature it was computed on.
#[derive(Debug, Default)]
struct LastResult {
    detections: Option<Vec<Detection>>,
    signature: Option<Vec<f32>>,
    reused: u32,
}

impl LastResult {
    fn store(&mut self, detections: Vec<Detection>, signature: Option<Vec<f32>>) {
        self.detections = Some(detections);
        self.signature = signature;
        self.reused = 0;
    }

    fn similarity(&self, signature: &[f32]) -> Option<f64> {
        let anchor = self.signature.as_ref()?;
        self.detections.as_ref()?;

        Some(math::histogram_correlation(anchor, signature))
    }

    fn reuse(&mut self) -> Vec<Detection> {
        self.reused += 1;
        self.fallback()
    }

    fn fallback(&self) -> Vec<Detection> {
        self.detections.clone().unwrap_or_default()
    }

    /// Drops the similarity anchor, the next frame goes through inference.
    fn invalidate(&mut self) {
        self.signature = None;
        self.reused = 0;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DetectorStats {
    pub inferred: u64,
    pub reused: u64,
    pub failed: u64,
}

/// Infallible front of a detector: reuses results for near-identical frames
/// and falls back to the previous result when inference fails.
pub struct DetectorAdapter<D> {
    inner: D,
    reuse: ReuseConfig,
    last: LastResult,
    stats: DetectorStats,
}

impl<D: Detect> DetectorAdapter<D> {
    pub fn new(inner: D, reuse: ReuseConfig) -> Self {
        Self {
            inner,
            reuse,
            last: LastResult::default(),
            stats: DetectorStats::default(),
        }
    }

    #[inline]
    pub fn stats(&self) -> DetectorStats {
        self.stats
    }

    #[inline]
    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn detect(&mut self, frame: &Frame) -> Vec<Detection> {
        let signature = self.reuse.similarity_threshold.map(|_| {
            let (w, h) = self.reuse.signature_size;
            frame.signature(w, h, self.reuse.signature_bins)
        });

        if let (Some(threshold), Some(sig)) = (self.reuse.similarity_threshold, &signature) {
            if self.last.reused >= self.reuse.max_consecutive_reuse {
                self.last.invalidate();
            } else if let Some(corr) = self.last.similarity(sig) {
                if corr > threshold {
                    debug!(frame = frame.index, corr, "frame unchanged, reusing detections");
                    self.stats.reused += 1;
                    return self.last.reuse();
                }
            }
        }

        match self.inner.detect(frame) {
            Ok(dets) => {
                self.stats.inferred += 1;
                self.last.store(dets.clone(), signature);
                dets
            }
            Err(err) => {
                self.stats.failed += 1;
                warn!(frame = frame.index, %err, "detection failed, using previous result");
                self.last.fallback()
            }
        }
    }
}
