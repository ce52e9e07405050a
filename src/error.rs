use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Json Error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Image Error: {0}")]
    ImageError(#[from] image::ImageError),

    #[cfg(feature = "opencv")]
    #[error("OpenCV Error: {0}")]
    OpencvError(#[from] opencv::Error),

    #[error("could not process video {path:?}: {reason}")]
    VideoOpen { path: String, reason: String },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("inference exceeded its budget of {0} ms")]
    InferenceTimeout(u64),

    #[error("tracker failed: {0}")]
    Tracking(String),

    #[error("reference posture {path:?}: {reason}")]
    ReferencePosture { path: String, reason: String },

    #[error("font {path:?}: {reason}")]
    Font { path: String, reason: String },

    #[error("scoring model {name:?}: {reason}")]
    ScoringModel { name: String, reason: String },

    #[error("expected 33 pose landmarks, got {0}")]
    MissingLandmarks(usize),

    #[error("trigger zones overlap at ({0}, {1})")]
    OverlappingZones(usize, usize),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("replay file line {line}: {reason}")]
    Replay { line: usize, reason: String },

    #[error("worker thread is gone")]
    WorkerGone,
}
