use {
    crate::error::SacError,
    serde::{
        Serialize,
        Deserialize,
    },
};


#[allow(non_camel_case_types)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SAC_Config {
    // The learning rate shared by the policy and both Q networks.
    pub learning_rate: f64,
    // The impact of the q value of the next state on the current state's q value.
    pub gamma: f64,
    // The weight for updating the target networks.
    pub tau: f64,
    // The entropy coefficient.
    pub alpha: f64,
    // Every reward is multiplied by this before it enters the replay buffer.
    pub reward_scale: f64,
    // The number of neurons in the hidden layers of all networks.
    pub hidden_1_size: usize,
    pub hidden_2_size: usize,
    // The number of demonstration transitions collected before going online.
    pub demonstration_buffer_len: usize,
    // The capacity of the online segment of the replay buffer.
    pub replay_buffer_len: usize,
    // The training batch size for each update.
    pub batch_size: usize,
    // Sampling weight stored with every demonstration transition.
    pub demonstration_weight: f32,
    // Updates run on demonstration batches when switching to online.
    pub demonstration_updates: usize,
    // Seed for the replay buffer and the policy noise.
    pub seed: u64,
}
impl Default for SAC_Config {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            gamma: 0.99,
            tau: 0.005,
            alpha: 0.2,
            reward_scale: 16.0,
            hidden_1_size: 256,
            hidden_2_size: 256,
            demonstration_buffer_len: 13_650,
            replay_buffer_len: 1_000_000,
            batch_size: 256,
            demonstration_weight: 50.0,
            demonstration_updates: 0,
            seed: 42,
        }
    }
}
impl SAC_Config {
    /// Settings for the drawer reaching task with a few hundred parallel
    /// instances.
    pub fn reach() -> Self {
        Self {
            learning_rate: 3e-4,
            demonstration_buffer_len: 16_384,
            replay_buffer_len: 200_000,
            ..Default::default()
        }
    }

    /// Reject values that would make training meaningless instead of
    /// silently clamping them.
    pub fn validate(&self) -> Result<(), SacError> {
        let invalid = |msg: String| Err(SacError::InvalidConfig(msg));

        if !(self.tau > 0.0 && self.tau <= 1.0) {
            return invalid(format!("tau must be in (0, 1], got {}", self.tau));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return invalid(format!("gamma must be in [0, 1], got {}", self.gamma));
        }
        if !(self.alpha >= 0.0 && self.alpha.is_finite()) {
            return invalid(format!("alpha must be a finite value >= 0, got {}", self.alpha));
        }
        if !(self.reward_scale.is_finite()) {
            return invalid(format!("reward_scale must be finite, got {}", self.reward_scale));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return invalid(format!("learning_rate must be positive, got {}", self.learning_rate));
        }
        if !(self.demonstration_weight > 0.0 && self.demonstration_weight.is_finite()) {
            return invalid(format!(
                "demonstration_weight must be positive, got {}",
                self.demonstration_weight,
            ));
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be positive".to_owned());
        }
        if self.replay_buffer_len < self.batch_size {
            return invalid(format!(
                "replay_buffer_len ({}) must hold at least one batch ({})",
                self.replay_buffer_len, self.batch_size,
            ));
        }
        // updates wait for more online transitions than there are demonstrations
        if self.replay_buffer_len <= self.demonstration_buffer_len {
            return invalid(format!(
                "replay_buffer_len ({}) must exceed demonstration_buffer_len ({})",
                self.replay_buffer_len, self.demonstration_buffer_len,
            ));
        }
        if self.hidden_1_size == 0 || self.hidden_2_size == 0 {
            return invalid("hidden layer sizes must be positive".to_owned());
        }
        if self.demonstration_updates > 0 && self.demonstration_buffer_len < self.batch_size {
            return invalid(format!(
                "demonstration_updates need demonstration_buffer_len ({}) >= batch_size ({})",
                self.demonstration_buffer_len, self.batch_size,
            ));
        }
        Ok(())
    }
}
