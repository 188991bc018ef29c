use {
    std::path::PathBuf,
    thiserror::Error,
};


/// Failures that are part of the training contract rather than plain I/O.
///
/// They travel inside [`anyhow::Error`], so callers that care about a
/// specific case can `downcast_ref::<SacError>()`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SacError {
    #[error("cannot sample {requested} transitions from the {segment} segment, it only holds {available}")]
    InsufficientTransitions {
        segment: &'static str,
        requested: usize,
        available: usize,
    },

    #[error("the demonstration segment is full ({capacity} entries)")]
    DemonstrationSegmentFull { capacity: usize },

    #[error("the demonstration segment is read-only once online data has been pushed")]
    DemonstrationSegmentClosed,

    #[error("shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("non-finite {which} loss ({value}), aborting the update")]
    NonFiniteLoss { which: &'static str, value: f32 },

    #[error("checkpoint file name {0:?} does not end in `model_<iteration>`")]
    CheckpointName(PathBuf),

    #[error("checkpoint is missing tensor `{0}`")]
    CheckpointMissingTensor(String),

    #[error("checkpoint tensor `{name}` has shape {actual:?}, expected {expected:?}")]
    CheckpointShape {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("unsupported checkpoint version {found}, expected {expected}")]
    CheckpointVersion { expected: u32, found: u32 },
}

impl SacError {
    pub fn shape(
        what: impl Into<String>,
        expected: &[usize],
        actual: &[usize],
    ) -> Self {
        Self::ShapeMismatch {
            what: what.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
