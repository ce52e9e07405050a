use crate::math;
use crate::zone::ZoneCode;

use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CrossingPhase {
    Scanning,
    EntrySeen,
    Complete,
}

/// Timing parameters turning a processed-frame interval into a speed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedFormula {
    pub distance_m: f64,
    pub fps: f64,
    pub frame_skip: u32,
}

impl SpeedFormula {
    /// Seconds elapsed between two processed frames `k` processed frames apart.
    #[inline]
    pub fn elapsed_seconds(&self, k: u64) -> f64 {
        k as f64 * self.frame_skip.max(1) as f64 / self.fps
    }

    /// Speed in m/s rounded to two decimals, `None` for a non-positive interval.
    pub fn speed(&self, k: u64) -> Option<f64> {
        if k == 0 || self.fps <= 0.0 {
            return None;
        }

        Some(math::round2(self.distance_m / self.elapsed_seconds(k)))
    }
}

/// Crossing bookkeeping of one speed measurement.
#[derive(Debug, Clone)]
pub struct CrossingState {
    formula: SpeedFormula,
    start: Option<u64>,
    end: Option<u64>,
    entered: BTreeSet<u32>,
    exited: BTreeSet<u32>,
    count: u32,
    speed: Option<f64>,
    measured_interval: Option<u64>,
    phase: CrossingPhase,
}

impl CrossingState {
    pub fn new(formula: SpeedFormula) -> Self {
        Self {
            formula,
            start: None,
            end: None,
            entered: BTreeSet::new(),
            exited: BTreeSet::new(),
            count: 0,
            speed: None,
            measured_interval: None,
            phase: CrossingPhase::Scanning,
        }
    }

    /// Records `track_id` seen in `zone` on processed frame `processed`.
    ///
    /// Only the first sighting of an id per zone counts. Returns whether it was new.
    /// Once a speed is measured, later ids are counted but no longer move the interval.
    pub fn record(&mut self, track_id: u32, zone: ZoneCode, processed: u64) -> bool {
        if self.phase == CrossingPhase::Complete {
            return false;
        }

        let fresh = match zone {
            ZoneCode::Entry => {
                let fresh = self.entered.insert(track_id);
                if fresh && self.speed.is_none() {
                    self.start = Some(processed);
                    if self.phase == CrossingPhase::Scanning {
                        self.phase = CrossingPhase::EntrySeen;
                    }
                }
                fresh
            }
            ZoneCode::Exit => {
                let fresh = self.exited.insert(track_id);
                if fresh && self.speed.is_none() {
                    self.end = Some(processed);
                }
                fresh
            }
            ZoneCode::None => false,
        };

        if fresh {
            self.count += 1;
            info!(track_id, ?zone, processed, count = self.count, "zone crossing");
            self.refresh_speed();
        }

        fresh
    }

    fn refresh_speed(&mut self) {
        if self.speed.is_some() {
            return;
        }

        if let Some(k) = self.interval() {
            if let Some(speed) = self.formula.speed(k) {
                self.speed = Some(speed);
                self.measured_interval = Some(k);
            }
        }
    }

    /// `end - start` when both are set and the exit comes after the entry.
    pub fn interval(&self) -> Option<u64> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if end > start => Some(end - start),
            _ => None,
        }
    }

    /// A speed is measured and both zones have an id.
    pub fn crossing_done(&self) -> bool {
        self.speed.is_some() && !self.entered.is_empty() && !self.exited.is_empty()
    }

    /// Freezes the measurement.
    pub fn complete(&mut self) {
        self.phase = CrossingPhase::Complete;
    }

    #[inline]
    pub fn phase(&self) -> CrossingPhase {
        self.phase
    }

    #[inline]
    pub fn start(&self) -> Option<u64> {
        self.start
    }

    #[inline]
    pub fn end(&self) -> Option<u64> {
        self.end
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[inline]
    pub fn speed(&self) -> Option<f64> {
        self.speed
    }

    pub fn result(&self, processed_frames: u64) -> SpeedResult {
        SpeedResult {
            speed_mps: self.speed.unwrap_or(0.0),
            measured: self.speed.is_some(),
            frame_interval: self.measured_interval,
            processed_frames,
            crossings: self.count,
        }
    }
}

/// Outcome of a speed measurement; `measured == false` means no valid crossing.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SpeedResult {
    pub speed_mps: f64,
    pub measured: bool,
    pub frame_interval: Option<u64>,
    pub processed_frames: u64,
    pub crossings: u32,
}

impl SpeedResult {
    #[inline]
    pub fn speed(&self) -> Option<f64> {
        if self.measured {
            Some(self.speed_mps)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formula(fps: f64, frame_skip: u32) -> SpeedFormula {
        SpeedFormula {
            distance_m: 4.0,
            fps,
            frame_skip,
        }
    }

    #[test]
    fn speed_formula_with_frame_skip() {
        let mut state = CrossingState::new(formula(30.0, 2));

        state.record(1, ZoneCode::Entry, 10);
        state.record(1, ZoneCode::Exit, 40);

        assert_eq!(state.interval(), Some(30));
        assert_eq!(formula(30.0, 2).elapsed_seconds(30), 2.0);
        assert_eq!(state.speed(), Some(2.0));
        assert!(state.crossing_done());
    }

    #[test]
    fn repeated_entry_keeps_first_frame() {
        let mut state = CrossingState::new(formula(25.0, 1));

        for frame in 5..10 {
            state.record(7, ZoneCode::Entry, frame);
        }

        assert_eq!(state.start(), Some(5));
        assert_eq!(state.count(), 1);
        assert_eq!(state.phase(), CrossingPhase::EntrySeen);
    }

    #[test]
    fn exit_before_entry_gives_no_speed() {
        let mut state = CrossingState::new(formula(25.0, 1));

        state.record(1, ZoneCode::Exit, 5);
        state.record(1, ZoneCode::Entry, 9);

        assert_eq!(state.interval(), None);
        assert!(!state.crossing_done());
        let result = state.result(9);
        assert!(!result.measured);
        assert_eq!(result.speed(), None);
        assert_eq!(result.speed_mps, 0.0);
        assert_eq!(result.crossings, 2);
    }

    #[test]
    fn exit_may_come_from_another_id() {
        let mut state = CrossingState::new(formula(25.0, 1));

        state.record(1, ZoneCode::Entry, 20);
        state.record(2, ZoneCode::Exit, 70);

        assert_eq!(state.speed(), Some(2.0));
    }

    #[test]
    fn later_entry_keeps_measured_interval() {
        let mut state = CrossingState::new(formula(25.0, 1));

        state.record(1, ZoneCode::Entry, 20);
        state.record(2, ZoneCode::Exit, 70);
        assert!(state.record(3, ZoneCode::Entry, 70));
        assert!(state.record(4, ZoneCode::Exit, 90));

        assert!(state.crossing_done());
        assert_eq!(state.start(), Some(20));
        assert_eq!(state.end(), Some(70));

        let result = state.result(90);
        assert_eq!(result.speed(), Some(2.0));
        assert_eq!(result.frame_interval, Some(50));
        assert_eq!(result.crossings, 4);
    }

    #[test]
    fn complete_freezes_state() {
        let mut state = CrossingState::new(formula(25.0, 1));

        state.record(1, ZoneCode::Entry, 20);
        state.record(1, ZoneCode::Exit, 70);
        state.complete();

        assert!(!state.record(3, ZoneCode::Entry, 80));
        assert_eq!(state.start(), Some(20));
        assert_eq!(state.result(70).frame_interval, Some(50));
    }
}
