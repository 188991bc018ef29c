mod metrics;
mod train;

pub use metrics::{
    IterationRecord,
    MetricsLog,
};
pub use train::{
    Phase,
    Trainer,
};
