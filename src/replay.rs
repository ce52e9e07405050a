//! Detections and pose landmarks recorded by an earlier run, one line per frame:
//! `<frame index>:<json>`.

use crate::detection::Detection;
use crate::detector::Detect;
use crate::error::Error;
use crate::frame::Frame;
use crate::skeleton::{Landmark, PoseEstimator};

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

fn parse_lines<T, R>(reader: R) -> Result<HashMap<u64, T>, Error>
where
    T: DeserializeOwned,
    R: BufRead,
{
    let mut items = HashMap::new();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let idx = line.find(':').ok_or_else(|| Error::Replay {
            line: lineno + 1,
            reason: "missing ':' separator".into(),
        })?;
        let (index, payload) = line.split_at(idx);

        let index = index.trim().parse::<u64>().map_err(|e| Error::Replay {
            line: lineno + 1,
            reason: e.to_string(),
        })?;
        let value = serde_json::from_str(&payload[1..]).map_err(|e| Error::Replay {
            line: lineno + 1,
            reason: e.to_string(),
        })?;

        items.insert(index, value);
    }

    Ok(items)
}

fn open(path: &Path) -> Result<std::io::BufReader<std::fs::File>, Error> {
    Ok(std::io::BufReader::new(std::fs::File::open(path)?))
}

/// Serves recorded detections by frame index; frames without a record have no detections.
pub struct ReplayDetector {
    frames: HashMap<u64, Vec<Detection>>,
    source_size: Option<(u32, u32)>,
}

impl ReplayDetector {
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, Error> {
        Ok(Self {
            frames: parse_lines(reader)?,
            source_size: None,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::from_reader(open(path.as_ref())?)
    }

    /// Recorded boxes are in `width x height` pixels and get rescaled to the frame being processed.
    pub fn with_source_size(mut self, width: u32, height: u32) -> Self {
        self.source_size = Some((width, height));
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Detect for ReplayDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Error> {
        let dets = self.frames.get(&frame.index).cloned().unwrap_or_default();

        let (sx, sy) = match self.source_size {
            Some((w, h)) if w > 0 && h > 0 => (
                frame.width() as f32 / w as f32,
                frame.height() as f32 / h as f32,
            ),
            _ => return Ok(dets),
        };

        Ok(dets
            .into_iter()
            .map(|d| {
                let bbox = d.bbox().scale(sx, sy);
                Detection::new(bbox, d.label, d.confidence)
            })
            .collect())
    }
}

/// Serves recorded landmarks by frame index, `null` or a missing record means no person.
pub struct ReplayPoseEstimator {
    frames: HashMap<u64, Option<Vec<Landmark>>>,
}

impl ReplayPoseEstimator {
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, Error> {
        Ok(Self {
            frames: parse_lines(reader)?,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::from_reader(open(path.as_ref())?)
    }
}

impl PoseEstimator for ReplayPoseEstimator {
    fn process(&mut self, frame: &Frame) -> Result<Option<Vec<Landmark>>, Error> {
        Ok(self.frames.get(&frame.index).cloned().flatten())
    }
}
