use {
    crate::error::SacError,
    serde::{
        Serialize,
        Deserialize,
    },
    std::path::{
        Path,
        PathBuf,
    },
};


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    // The training iteration to stop at (exclusive).
    num_learning_iterations: usize,
    // The number of environment steps in one rollout.
    episode_length: usize,
    // Write a checkpoint every this many iterations.
    log_interval: usize,
    // Directory for checkpoints, configs and metrics.
    log_dir: PathBuf,
    // Only run the deterministic policy, never touch the buffer or optimizers.
    is_testing: bool,
    // Reset every environment instance before every single step.
    apply_reset: bool,
}
impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            num_learning_iterations: 1_500,
            episode_length: 500,
            log_interval: 50,
            log_dir: PathBuf::from("run"),
            is_testing: false,
            apply_reset: false,
        }
    }
}
impl TrainConfig {
    pub fn new(
        num_learning_iterations: usize,
        episode_length: usize,
        log_interval: usize,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            num_learning_iterations,
            episode_length,
            log_interval,
            log_dir: log_dir.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), SacError> {
        if self.episode_length == 0 {
            return Err(SacError::InvalidConfig("episode_length must be positive".to_owned()));
        }
        if self.log_interval == 0 {
            return Err(SacError::InvalidConfig("log_interval must be positive".to_owned()));
        }
        Ok(())
    }
}

impl TrainConfig {
    pub fn num_learning_iterations(&self) -> usize {
        self.num_learning_iterations
    }
    pub fn episode_length(&self) -> usize {
        self.episode_length
    }
    pub fn log_interval(&self) -> usize {
        self.log_interval
    }
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
    pub fn is_testing(&self) -> bool {
        self.is_testing
    }
    pub fn apply_reset(&self) -> bool {
        self.apply_reset
    }
    pub fn set_num_learning_iterations(&mut self, num_learning_iterations: usize) {
        self.num_learning_iterations = num_learning_iterations;
    }
    pub fn set_episode_length(&mut self, episode_length: usize) {
        self.episode_length = episode_length;
    }
    pub fn set_log_interval(&mut self, log_interval: usize) {
        self.log_interval = log_interval;
    }
    pub fn set_log_dir(&mut self, log_dir: impl Into<PathBuf>) {
        self.log_dir = log_dir.into();
    }
    pub fn set_is_testing(&mut self, is_testing: bool) {
        self.is_testing = is_testing;
    }
    pub fn set_apply_reset(&mut self, apply_reset: bool) {
        self.apply_reset = apply_reset;
    }
}
