use jumptrack::config::PostureConfig;
use jumptrack::error::Error;
use jumptrack::frame::Frame;
use jumptrack::progress::{CancelToken, Reporter};
use jumptrack::render;
use jumptrack::skeleton::{Landmark, PoseEstimator, SkeletonPoints, LANDMARK_COUNT};
use jumptrack::video::{VecSink, VecSource};
use jumptrack::{PostureOutcome, PostureScorer, PostureType};

use std::path::Path;

/// A pose whose legs swing a little further on every frame.
fn pose(frame: u64) -> Vec<Landmark> {
    let swing = frame as f64 * 0.015;

    (0..LANDMARK_COUNT)
        .map(|i| {
            let (mut x, y) = (0.3 + 0.01 * i as f64, 0.1 + 0.02 * i as f64);
            if matches!(i, 25 | 26 | 28) {
                x += swing;
            }
            Landmark::new(x, y, 1.0)
        })
        .collect()
}

/// Landmarks for every frame but 3 (nobody) and 2 (truncated).
struct Scripted;

impl PoseEstimator for Scripted {
    fn process(&mut self, frame: &Frame) -> Result<Option<Vec<Landmark>>, Error> {
        Ok(match frame.index {
            3 => None,
            2 => Some(pose(2)[..20].to_vec()),
            i => Some(pose(i)),
        })
    }
}

fn write_reference(dir: &Path, posture: PostureType, frame: u64) -> SkeletonPoints {
    let points = SkeletonPoints::from_landmarks(&pose(frame)).unwrap();
    let text: String = points
        .points()
        .iter()
        .map(|p| format!("{},{}\n", p.x, p.y))
        .collect();
    std::fs::write(dir.join(format!("{}.txt", posture.name())), text).unwrap();

    points
}

#[test]
fn finds_best_frame_per_posture() {
    let refs = tempfile::tempdir().unwrap();
    let models = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    write_reference(refs.path(), PostureType::TakeOff, 5);
    let hip = write_reference(refs.path(), PostureType::HipExtension, 8);
    std::fs::write(
        models.path().join("take_off.json"),
        r#"{"coefficients":[0,0,0],"intercept":42}"#,
    )
    .unwrap();
    std::fs::write(
        models.path().join("hip_extension.json"),
        r#"{"coefficients":[1,0,0],"intercept":0}"#,
    )
    .unwrap();
    std::fs::write(
        models.path().join("abdominal_contraction.json"),
        r#"{"coefficients":[1,1,1],"intercept":0}"#,
    )
    .unwrap();

    let config = PostureConfig {
        reference_dir: refs.path().to_path_buf(),
        model_dir: models.path().to_path_buf(),
        canvas: (128, 72),
        ..Default::default()
    };
    let mut scorer = PostureScorer::new(Scripted, config);
    let mut source = VecSource::blank(12, 64, 48, 25.0);
    let mut sink = VecSink::default();

    let report = scorer
        .run(&mut source, Some(&mut sink), &Reporter::silent(), &CancelToken::new())
        .unwrap();

    assert_eq!(report.frames_read, 12);
    assert_eq!(report.frames_with_pose, 10);
    assert_eq!(report.take_off_angles.len(), 10);
    assert_eq!(sink.frames.len(), 12);

    match report.outcome(PostureType::TakeOff) {
        Some(PostureOutcome::Scored {
            frame_index,
            distance,
            score,
            ..
        }) => {
            assert_eq!(*frame_index, 5);
            assert!(distance.abs() < 1e-9);
            assert_eq!(*score, 42.0);
        }
        other => panic!("unexpected take-off outcome {:?}", other),
    }

    match report.outcome(PostureType::HipExtension) {
        Some(PostureOutcome::Scored {
            frame_index, score, ..
        }) => {
            assert_eq!(*frame_index, 8);
            assert!((score - hip.take_off_angles()[0]).abs() < 1e-9);
        }
        other => panic!("unexpected hip-extension outcome {:?}", other),
    }

    // no reference file, the other postures are unaffected
    assert!(matches!(
        report.outcome(PostureType::AbdominalContraction),
        Some(PostureOutcome::Unavailable { .. })
    ));

    let written = render::write_posture_results(out.path(), &report, (128, 72), &render::Overlay::none()).unwrap();
    assert_eq!(written.len(), 3);
    assert!(out.path().join("take_off.jpg").is_file());
    assert!(out.path().join("hip_extension.jpg").is_file());
    assert!(out.path().join("report.json").is_file());
}

#[test]
fn video_without_people_has_no_match() {
    struct Nobody;

    impl PoseEstimator for Nobody {
        fn process(&mut self, _frame: &Frame) -> Result<Option<Vec<Landmark>>, Error> {
            Ok(None)
        }
    }

    let refs = tempfile::tempdir().unwrap();
    write_reference(refs.path(), PostureType::TakeOff, 0);

    let config = PostureConfig {
        reference_dir: refs.path().to_path_buf(),
        model_dir: refs.path().to_path_buf(),
        ..Default::default()
    };
    let mut scorer = PostureScorer::new(Nobody, config);
    let mut source = VecSource::blank(5, 8, 8, 25.0);

    let report = scorer
        .run(&mut source, None, &Reporter::silent(), &CancelToken::new())
        .unwrap();

    assert_eq!(
        report.outcome(PostureType::TakeOff),
        Some(&PostureOutcome::NoMatch {
            posture: PostureType::TakeOff
        })
    );
    assert!(report.outcomes.iter().all(|o| o.score().is_none()));
}
