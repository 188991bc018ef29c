mod networks;
mod sac;

pub use sac::{
    QNetwork,
    UpdateStats,
    SAC,
};

use {
    crate::components::{
        ReplayBuffer,
        Transition,
    },
    anyhow::Result,
    candle_core::{
        Device,
        Tensor,
    },
    std::{
        fmt::Display,
        path::Path,
    },
};


/// The execution mode of an agent is either training or testing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    Train,
    Test,
}

impl Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Train => write!(f, "Train"),
            RunMode::Test => write!(f, "Test"),
        }
    }
}

pub trait Algorithm {
    type Config;

    fn config(&self) -> &Self::Config;
    fn from_config(
        device: &Device,
        config: &Self::Config,
        size_state: usize,
        size_action: usize,
    ) -> Result<Box<Self>>;

    /// Stochastic actions in [`RunMode::Train`], deterministic ones in
    /// [`RunMode::Test`].
    fn actions(
        &mut self,
        state: &Tensor,
        mode: RunMode,
    ) -> candle_core::Result<Tensor>;

    /// Run one update on a batch sampled from the agent's own buffer.
    fn train(&mut self) -> Result<UpdateStats>;
}

pub trait OffPolicyAlgorithm: Algorithm {
    /// Store demonstration transitions, returning how many fit.
    fn remember_demonstration(
        &mut self,
        transitions: Vec<Transition>,
    ) -> Result<usize>;

    fn remember(
        &mut self,
        transitions: Vec<Transition>,
    ) -> Result<()>;

    fn replay_buffer(&self) -> &ReplayBuffer;
}

pub trait SaveableAlgorithm {
    fn save<P: AsRef<Path> + ?Sized>(
        &self,
        path: &P,
    ) -> Result<()>;

    fn load<P: AsRef<Path> + ?Sized>(
        &mut self,
        path: &P,
    ) -> Result<()>;
}
