use {
    crate::{
        error::SacError,
        util::read_config,
    },
    anyhow::Result,
    serde::{
        Deserialize,
        Serialize,
    },
    std::path::Path,
};


/// A scripted joint-space trajectory, one waypoint per environment step.
///
/// Waypoint `0` is the pose right after a reset. After `k` steps the
/// demonstrator aims for waypoint `k + 1`; past the last waypoint it holds
/// still.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemonstrationTrajectory {
    waypoints: Vec<Vec<f32>>,
}

impl DemonstrationTrajectory {
    pub fn new(waypoints: Vec<Vec<f32>>) -> Result<Self, SacError> {
        let dof = match waypoints.first() {
            Some(first) if !first.is_empty() => first.len(),
            _ => {
                return Err(SacError::InvalidConfig(
                    "a demonstration needs at least one non-empty waypoint".to_owned(),
                ))
            }
        };
        if let Some(bad) = waypoints.iter().find(|w| w.len() != dof) {
            return Err(SacError::shape("demonstration waypoint", &[dof], &[bad.len()]));
        }
        Ok(Self { waypoints })
    }

    /// `steps + 1` evenly spaced waypoints from `from` to `to`.
    pub fn linear(
        from: &[f32],
        to: &[f32],
        steps: usize,
    ) -> Result<Self, SacError> {
        if from.len() != to.len() {
            return Err(SacError::shape("demonstration end pose", &[from.len()], &[to.len()]));
        }
        let steps = steps.max(1);
        Self::new(
            (0..=steps)
                .map(|k| {
                    let t = k as f32 / steps as f32;
                    from.iter().zip(to).map(|(a, b)| a + t * (b - a)).collect()
                })
                .collect(),
        )
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let trajectory: Self = read_config(path)?;
        Ok(Self::new(trajectory.waypoints)?)
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn dof(&self) -> usize {
        self.waypoints.first().map_or(0, Vec::len)
    }

    pub fn waypoint(
        &self,
        step: usize,
    ) -> &[f32] {
        &self.waypoints[step.min(self.waypoints.len() - 1)]
    }

    /// The action that moves `current` joint targets onto the next waypoint,
    /// given that one unit of action moves a joint by `dt * action_scale`.
    pub fn reverse_action(
        &self,
        step: usize,
        current: &[f32],
        dt: f32,
        action_scale: f32,
    ) -> Vec<f32> {
        if step + 1 >= self.waypoints.len() {
            return vec![0.0; current.len()];
        }
        self.waypoints[step + 1]
            .iter()
            .zip(current)
            .map(|(target, now)| (target - now) / (dt * action_scale))
            .collect()
    }
}
