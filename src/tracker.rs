use crate::bbox::{BBox, Ltrb, Xywh};
use crate::config::TrackerConfig;
use crate::detection::Detection;
use crate::error::Error;
use crate::frame::Frame;
use crate::track::Track;

use munkres::{solve_assignment, WeightMatrix};
use tracing::warn;

/// The association algorithm: matches boxes to identities across frames.
///
/// Returns the boxes of the tracks alive after this update with their ids.
pub trait MultiObjectTracker {
    fn update(
        &mut self,
        boxes: &[BBox<Xywh>],
        confidences: &[f32],
        frame: &Frame,
    ) -> Result<Vec<(BBox<Ltrb>, u32)>, Error>;
}

impl<T: MultiObjectTracker + ?Sized> MultiObjectTracker for Box<T> {
    #[inline]
    fn update(
        &mut self,
        boxes: &[BBox<Xywh>],
        confidences: &[f32],
        frame: &Frame,
    ) -> Result<Vec<(BBox<Ltrb>, u32)>, Error> {
        (**self).update(boxes, confidences, frame)
    }
}

/// Feeds detections to a tracker and labels what comes back.
///
/// One adapter per analysis run; nothing is shared between runs.
pub struct TrackerAdapter<T> {
    inner: T,
}

impl<T: MultiObjectTracker> TrackerAdapter<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn update(&mut self, detections: &[Detection], frame: &Frame) -> Vec<Track> {
        let label = match detections.first() {
            Some(det) => det.label.clone(),
            None => return Vec::new(),
        };

        let boxes: Vec<_> = detections.iter().map(|d| d.bbox().as_xywh()).collect();
        let confidences: Vec<_> = detections.iter().map(|d| d.confidence).collect();

        match self.inner.update(&boxes, &confidences, frame) {
            Ok(tracked) => tracked
                .into_iter()
                .map(|(bbox, id)| Track::new(id, bbox, label.clone()))
                .collect(),
            Err(err) => {
                warn!(frame = frame.index, %err, "tracker update failed");
                Vec::new()
            }
        }
    }
}

#[derive(Debug)]
struct Participant {
    id: u32,
    bbox: BBox<Ltrb>,
    hits: u32,
    time_since_update: u32,
}

impl Participant {
    #[inline]
    fn confirmed(&self, n_init: u32) -> bool {
        self.id > 0 && self.hits >= n_init
    }
}

/// IoU association solved with the Hungarian method.
///
/// A detection nobody claims starts a tentative track, `n_init` consecutive
/// hits confirm it and `max_age` updates without a match remove it.
pub struct IouTracker {
    config: TrackerConfig,
    participants: Vec<Participant>,
    next_id: u32,
}

impl IouTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            participants: Vec::with_capacity(16),
            next_id: 1,
        }
    }

    fn assignment(&self, boxes: &[BBox<Ltrb>]) -> Vec<(usize, usize)> {
        let rows = self.participants.len();
        let cols = boxes.len();
        if rows == 0 || cols == 0 {
            return Vec::new();
        }

        let n = rows.max(cols);
        let cost = |r: usize, c: usize| {
            if r < rows && c < cols {
                1.0 - self.participants[r].bbox.iou(&boxes[c])
            } else {
                1.0
            }
        };

        // solving reduces the matrix in place, overlaps are recomputed from the boxes
        let mut mat = WeightMatrix::from_fn(n, |(r, c)| cost(r, c));
        match solve_assignment(&mut mat) {
            Ok(positions) => positions
                .into_iter()
                .filter(|p| p.row < rows && p.column < cols)
                .filter(|p| 1.0 - cost(p.row, p.column) >= self.config.iou_threshold)
                .map(|p| (p.row, p.column))
                .collect(),
            Err(_) => {
                warn!("assignment could not be solved");
                Vec::new()
            }
        }
    }
}

impl MultiObjectTracker for IouTracker {
    fn update(
        &mut self,
        boxes: &[BBox<Xywh>],
        confidences: &[f32],
        _frame: &Frame,
    ) -> Result<Vec<(BBox<Ltrb>, u32)>, Error> {
        let boxes: Vec<_> = boxes
            .iter()
            .zip(confidences)
            .filter(|(_, &conf)| conf >= self.config.min_confidence)
            .map(|(b, _)| b.as_ltrb())
            .collect();

        let matches = self.assignment(&boxes);
        let mut claimed = vec![false; boxes.len()];

        for p in &mut self.participants {
            p.time_since_update += 1;
        }

        for &(row, col) in &matches {
            let p = &mut self.participants[row];
            p.bbox = boxes[col];
            p.hits += 1;
            p.time_since_update = 0;
            claimed[col] = true;
        }

        let n_init = self.config.n_init;
        let max_age = self.config.max_age;
        self.participants.retain(|p| {
            if p.confirmed(n_init) {
                p.time_since_update <= max_age
            } else {
                p.time_since_update == 0
            }
        });

        for p in &mut self.participants {
            if p.id == 0 && p.hits >= n_init {
                p.id = self.next_id;
                self.next_id += 1;
            }
        }

        for (bbox, _) in boxes.iter().zip(claimed).filter(|(_, c)| !c) {
            let mut p = Participant {
                id: 0,
                bbox: *bbox,
                hits: 1,
                time_since_update: 0,
            };

            if n_init <= 1 {
                p.id = self.next_id;
                self.next_id += 1;
            }

            self.participants.push(p);
        }

        Ok(self
            .participants
            .iter()
            .filter(|p| p.confirmed(n_init) && p.time_since_update == 0)
            .map(|p| (p.bbox, p.id))
            .collect())
    }
}
