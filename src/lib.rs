pub mod error;
pub mod logging;
pub mod util;

pub mod agents;
pub mod checkpoint;
pub mod components;
pub mod configs;
pub mod engines;
pub mod envs;
