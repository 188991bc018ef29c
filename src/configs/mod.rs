mod train;
mod sac;

pub use train::TrainConfig;
pub use sac::SAC_Config;
