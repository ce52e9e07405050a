use crate::config::SpeedConfig;
use crate::crossing::{CrossingState, SpeedFormula, SpeedResult};
use crate::detector::{Detect, DetectorAdapter};
use crate::error::Error;
use crate::frame::Frame;
use crate::progress::{CancelToken, Progress, Reporter};
use crate::render::{self, Overlay};
use crate::track::Track;
use crate::tracker::{MultiObjectTracker, TrackerAdapter};
use crate::video::{FrameSink, FrameSource};
use crate::zone::{TriggerMask, ZoneCode};

use tracing::{debug, info};

/// The speed-measurement loop: detection, tracking and zone crossing over one video.
///
/// A meter owns its detector and tracker, so every run starts from fresh tracking state.
pub struct SpeedMeter<D, T> {
    detector: DetectorAdapter<D>,
    tracker: TrackerAdapter<T>,
    mask: TriggerMask,
    overlay: Overlay,
    config: SpeedConfig,
}

impl<D: Detect, T: MultiObjectTracker> SpeedMeter<D, T> {
    pub fn new(
        detector: DetectorAdapter<D>,
        tracker: TrackerAdapter<T>,
        config: SpeedConfig,
    ) -> Result<Self, Error> {
        config.validate()?;

        let mask = TriggerMask::new(
            &config.entry_polygon,
            &config.exit_polygon,
            config.display_resolution,
            config.processing_resolution,
        )?;

        Ok(Self::with_mask(detector, tracker, mask, config))
    }

    /// Uses a ready mask; its size must match the processing resolution.
    pub fn with_mask(
        detector: DetectorAdapter<D>,
        tracker: TrackerAdapter<T>,
        mask: TriggerMask,
        config: SpeedConfig,
    ) -> Self {
        Self {
            detector,
            tracker,
            mask,
            overlay: Overlay::none(),
            config,
        }
    }

    /// Labels annotated frames with the crossing count and speed.
    pub fn with_overlay(mut self, overlay: Overlay) -> Self {
        self.overlay = overlay;
        self
    }

    fn frame_rate(&self, source: &dyn FrameSource) -> Result<f64, Error> {
        self.config
            .fps_override
            .or_else(|| Some(source.fps()).filter(|fps| *fps > 0.0))
            .ok_or_else(|| {
                Error::InvalidConfig("source has no frame rate, set speed.fps_override".into())
            })
    }

    /// Zone of every track on this frame, tracks outside both zones are left out.
    fn zones(&self, tracks: &[Track]) -> Vec<(u32, ZoneCode)> {
        tracks
            .iter()
            .map(|t| (t.track_id, self.mask.classify_box(&t.bbox, self.config.zone_tolerance)))
            .filter(|(_, zone)| *zone != ZoneCode::None)
            .collect()
    }

    fn annotate(&self, frame: &Frame, tracks: &[Track], state: &CrossingState) -> Frame {
        let mut img = frame.to_image();
        render::draw_zones(&mut img, &self.mask);
        render::draw_tracks(&mut img, tracks);

        let label = render::speed_label(state.count(), state.speed());
        self.overlay.text(&mut img, 10, 10, render::LABEL_COLOR, &label);

        Frame::from_image(frame.index, &img)
    }

    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        mut sink: Option<&mut dyn FrameSink>,
        reporter: &Reporter,
        cancel: &CancelToken,
    ) -> Result<SpeedResult, Error> {
        let fps = self.frame_rate(source)?;
        let total = source.frame_count();
        let skip = self.config.frame_skip.max(1);
        let (width, height) = self.config.processing_resolution;

        let mut state = CrossingState::new(SpeedFormula {
            distance_m: self.config.distance_m,
            fps,
            frame_skip: skip,
        });

        let mut read = 0u64;
        let mut processed = 0u64;

        info!(fps, ?total, skip, "speed measurement started");

        loop {
            if cancel.is_cancelled() {
                info!(read, "speed measurement cancelled");
                break;
            }

            let frame = match source.read()? {
                Some(frame) => frame,
                None => break,
            };
            read += 1;

            if (read - 1) % skip as u64 == 0 {
                processed += 1;

                let frame = frame.resize(width, height);
                let detections = self.detector.detect(&frame);
                let tracks = self.tracker.update(&detections, &frame);

                debug!(
                    frame = frame.index,
                    processed,
                    detections = detections.len(),
                    tracks = tracks.len()
                );

                for (track_id, zone) in self.zones(&tracks) {
                    if state.record(track_id, zone, processed) {
                        if let Some(speed) = state.speed() {
                            reporter.send(Progress::Speed(speed));
                        }
                    }
                }

                if let Some(sink) = sink.as_mut() {
                    sink.write(&self.annotate(&frame, &tracks, &state))?;
                }
            }

            reporter.progress(read, total);
            reporter.preview(&frame);

            if self.config.early_stop && state.crossing_done() {
                info!(read, processed, "crossing complete, stopping early");
                break;
            }

            if let (Some(total), Some(speed)) = (total, state.speed()) {
                if speed > 0.0 && read as f64 > self.config.fallback_fraction * total as f64 {
                    info!(read, total, "speed settled, stopping");
                    break;
                }
            }
        }

        state.complete();
        let result = state.result(processed);

        let stats = self.detector.stats();
        info!(
            speed = result.speed_mps,
            measured = result.measured,
            read,
            processed,
            inferred = stats.inferred,
            reused = stats.reused,
            failed = stats.failed,
            "speed measurement finished"
        );

        reporter.send(Progress::SpeedDone(result));

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::{BBox, Ltrb};
    use crate::config::TrackerConfig;
    use crate::detection::{Detection, PERSON};
    use crate::detector::ReuseConfig;
    use crate::tracker::IouTracker;
    use crate::video::{VecSink, VecSource};
    use ndarray::{s, Array2};

    /// Reports one person box per frame index.
    struct Scripted(Vec<(u64, BBox<Ltrb>)>);

    impl Detect for Scripted {
        fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Error> {
            Ok(self
                .0
                .iter()
                .filter(|(idx, _)| *idx == frame.index)
                .map(|(_, b)| Detection::new(*b, PERSON, 0.9))
                .collect())
        }
    }

    fn small_config() -> SpeedConfig {
        SpeedConfig {
            processing_resolution: (20, 10),
            display_resolution: (20, 10),
            zone_tolerance: 0,
            ..Default::default()
        }
    }

    fn meter(script: Vec<(u64, BBox<Ltrb>)>, config: SpeedConfig) -> SpeedMeter<Scripted, IouTracker> {
        let mut grid = Array2::zeros((10, 20));
        grid.slice_mut(s![.., 0..3]).fill(1);
        grid.slice_mut(s![.., 17..20]).fill(2);

        let reuse = ReuseConfig {
            similarity_threshold: None,
            ..Default::default()
        };
        let tracker = IouTracker::new(TrackerConfig {
            n_init: 1,
            ..Default::default()
        });

        SpeedMeter::with_mask(
            DetectorAdapter::new(Scripted(script), reuse),
            TrackerAdapter::new(tracker),
            TriggerMask::from_grid(grid),
            config,
        )
    }

    fn entry_box() -> BBox<Ltrb> {
        BBox::ltrb(1.0, 2.0, 2.0, 8.0)
    }

    fn exit_box() -> BBox<Ltrb> {
        BBox::ltrb(18.0, 2.0, 19.0, 8.0)
    }

    #[test]
    fn frame_skip_scales_elapsed_time() {
        let config = SpeedConfig {
            frame_skip: 2,
            ..small_config()
        };
        // processed frames are 0, 2, 4, ...; entry on the 6th, exit on the 21st
        let mut meter = meter(vec![(10, entry_box()), (40, exit_box())], config);
        let mut source = VecSource::blank(60, 20, 10, 30.0);

        let result = meter
            .run(&mut source, None, &Reporter::silent(), &CancelToken::new())
            .unwrap();

        assert_eq!(result.frame_interval, Some(15));
        assert_eq!(result.speed(), Some(4.0));
        assert_eq!(source.frames_read(), 41);
    }

    #[test]
    fn second_subject_entering_on_exit_frame_still_stops() {
        // another jumper steps into the entry zone as the first one leaves
        let next_entry = BBox::ltrb(0.0, 0.0, 2.0, 1.5);
        let mut meter = meter(
            vec![(10, entry_box()), (40, exit_box()), (40, next_entry)],
            small_config(),
        );
        let mut source = VecSource::blank(60, 20, 10, 30.0);

        let result = meter
            .run(&mut source, None, &Reporter::silent(), &CancelToken::new())
            .unwrap();

        assert_eq!(source.frames_read(), 41);
        assert_eq!(result.frame_interval, Some(30));
        assert_eq!(result.speed(), Some(4.0));
        assert_eq!(result.crossings, 3);
    }

    #[test]
    fn no_crossing_reads_everything() {
        let mut meter = meter(vec![(3, entry_box())], small_config());
        let mut source = VecSource::blank(30, 20, 10, 25.0);
        let mut sink = VecSink::default();

        let result = meter
            .run(&mut source, Some(&mut sink), &Reporter::silent(), &CancelToken::new())
            .unwrap();

        assert!(!result.measured);
        assert_eq!(result.crossings, 1);
        assert_eq!(source.frames_read(), 30);
        assert_eq!(sink.frames.len(), 30);
    }

    #[test]
    fn fallback_stop_without_early_stop() {
        let config = SpeedConfig {
            early_stop: false,
            fallback_fraction: 0.5,
            ..small_config()
        };
        let mut meter = meter(vec![(2, entry_box()), (7, exit_box())], config);
        let mut source = VecSource::blank(40, 20, 10, 25.0);

        let result = meter
            .run(&mut source, None, &Reporter::silent(), &CancelToken::new())
            .unwrap();

        assert_eq!(result.speed(), Some(20.0));
        assert_eq!(source.frames_read(), 21);
    }

    #[test]
    fn cancelled_before_first_frame() {
        let mut meter = meter(vec![], small_config());
        let mut source = VecSource::blank(10, 20, 10, 25.0);
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = meter.run(&mut source, None, &Reporter::silent(), &cancel).unwrap();

        assert_eq!(source.frames_read(), 0);
        assert_eq!(result.processed_frames, 0);
    }

    #[test]
    fn unknown_frame_rate_is_an_error() {
        let mut meter = meter(vec![], small_config());
        let mut source = VecSource::blank(10, 20, 10, 0.0);

        assert!(matches!(
            meter.run(&mut source, None, &Reporter::silent(), &CancelToken::new()),
            Err(Error::InvalidConfig(_))
        ));
    }
}
