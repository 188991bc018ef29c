mod demonstration;
mod reach;

use {
    anyhow::Result,
    candle_core::{
        Device,
        Tensor,
    },
};

pub use crate::envs::{
    demonstration::DemonstrationTrajectory,
    reach::{
        ReachConfig,
        ReachEnv,
    },
};


/// Per-step bookkeeping that is not part of the learning signal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepInfo {
    /// Instances that satisfied the success criterion this step.
    pub successes: usize,
    /// Instances that finished and were reset inside this step.
    pub resets: Vec<usize>,
}

/// The result of one batched step.
///
/// # Fields
///
/// * `observations` - `(N, observation_space)`, taken after auto-resets.
/// * `rewards` - `(N,)` `f32`
/// * `dones` - `(N,)` `u8`, `1` where the instance finished this step.
#[derive(Debug, Clone)]
pub struct VecStep {
    pub observations: Tensor,
    pub rewards: Tensor,
    pub dones: Tensor,
    pub info: StepInfo,
}

/// A batch of `N` identical environment instances stepped together.
///
/// Finished instances are reset inside [`VecEnvironment::step`] with one
/// batched [`VecEnvironment::reset_instances`] call, so the returned
/// observation of a finished instance is already its first new one.
pub trait VecEnvironment {
    type Config;

    fn config(&self) -> &Self::Config;
    fn new(
        config: Self::Config,
        device: &Device,
    ) -> Result<Box<Self>>;

    fn num_envs(&self) -> usize;
    fn observation_space(&self) -> usize;
    fn state_space(&self) -> usize;
    fn action_space(&self) -> usize;

    /// Reset the given instances in one call.
    fn reset_instances(
        &mut self,
        ids: &[usize],
    ) -> Result<()>;

    /// The current `(N, observation_space)` observations.
    fn observations(&self) -> Result<Tensor>;

    /// Reset every instance and return the fresh observations.
    fn reset(&mut self) -> Result<Tensor> {
        let ids: Vec<usize> = (0..self.num_envs()).collect();
        self.reset_instances(&ids)?;
        self.observations()
    }

    /// `actions` is `(N, action_space)`.
    fn step(
        &mut self,
        actions: &Tensor,
    ) -> Result<VecStep>;

    /// The privileged `(N, state_space)` state.
    fn get_state(&self) -> Result<Tensor>;

    /// The `(N, action_space)` actions that follow the scripted demonstration
    /// from the current state.
    fn get_reverse_actions(&self) -> Result<Tensor>;
}

/// Anything that can pick an `(N, action_space)` action batch for a state
/// batch.
pub trait ActionSource<Env: VecEnvironment> {
    fn actions(
        &mut self,
        env: &Env,
        states: &Tensor,
    ) -> Result<Tensor>;
}

/// The scripted demonstrator: it asks the environment for the actions that
/// replay its demonstration trajectory.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReverseActions;

impl<Env: VecEnvironment> ActionSource<Env> for ReverseActions {
    fn actions(
        &mut self,
        env: &Env,
        _states: &Tensor,
    ) -> Result<Tensor> {
        env.get_reverse_actions()
    }
}
