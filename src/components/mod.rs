//! # Components
//!
//! This module contains the components that an agent is built from.
//!
//! ## Replay Buffer
//!
//! The [`ReplayBuffer`] struct implements a replay buffer split into a
//! weighted demonstration segment and a FIFO online segment, as used by
//! [`crate::agents::SAC`].

mod replay_buffer;

pub use replay_buffer::{
    ReplayBuffer,
    Segment,
    Transition,
    TransitionBatch,
};
