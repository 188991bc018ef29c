use {
    super::{
        DemonstrationTrajectory,
        StepInfo,
        VecEnvironment,
        VecStep,
    },
    crate::error::SacError,
    anyhow::Result,
    candle_core::{
        DType,
        Device,
        Tensor,
    },
    rand::{
        rngs::StdRng,
        Rng,
        SeedableRng,
    },
    serde::{
        Deserialize,
        Serialize,
    },
    std::path::PathBuf,
    tracing::{
        debug,
        info,
    },
};


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReachConfig {
    // Number of simulated arms stepped together.
    pub num_envs: usize,
    // One planar revolute joint per link.
    pub link_lengths: Vec<f32>,
    pub joint_lower: f32,
    pub joint_upper: f32,
    // The pose every reset perturbs.
    pub default_pose: Vec<f32>,
    // The pose at which the gripper touches the handle.
    pub goal_pose: Vec<f32>,
    // Half-width of the uniform noise added to the default pose on reset.
    pub start_noise: f32,
    pub dt: f32,
    // Joint displacement per unit action is dt * action_scale.
    pub action_scale: f32,
    // An instance is done once its progress reaches episode_length - 1.
    pub episode_length: usize,
    // Distance between gripper and handle that counts as success.
    pub success_tolerance: f32,
    // Length of the generated demonstration if no file is given.
    pub demonstration_steps: usize,
    pub demonstration_file: Option<PathBuf>,
    pub seed: u64,
}
impl Default for ReachConfig {
    fn default() -> Self {
        Self {
            num_envs: 64,
            link_lengths: vec![0.4, 0.35, 0.25, 0.15],
            joint_lower: -2.9,
            joint_upper: 2.9,
            default_pose: vec![0.0, 0.3, 0.3, 0.3],
            goal_pose: vec![0.9, -0.6, -0.6, 0.4],
            start_noise: 0.125,
            dt: 1.0 / 60.0,
            action_scale: 7.5,
            episode_length: 500,
            success_tolerance: 0.02,
            demonstration_steps: 120,
            demonstration_file: None,
            seed: 42,
        }
    }
}
impl ReachConfig {
    pub fn dof(&self) -> usize {
        self.link_lengths.len()
    }

    pub fn validate(&self) -> Result<(), SacError> {
        let invalid = |msg: &str| Err(SacError::InvalidConfig(msg.to_owned()));
        if self.num_envs == 0 {
            return invalid("num_envs must be positive");
        }
        if self.link_lengths.is_empty() {
            return invalid("the arm needs at least one link");
        }
        if self.joint_lower >= self.joint_upper {
            return invalid("joint_lower must be below joint_upper");
        }
        if self.default_pose.len() != self.dof() {
            return Err(SacError::shape("default_pose", &[self.dof()], &[self.default_pose.len()]));
        }
        if self.goal_pose.len() != self.dof() {
            return Err(SacError::shape("goal_pose", &[self.dof()], &[self.goal_pose.len()]));
        }
        if !(self.dt > 0.0 && self.action_scale > 0.0) {
            return invalid("dt and action_scale must be positive");
        }
        if self.episode_length == 0 {
            return invalid("episode_length must be positive");
        }
        Ok(())
    }
}

/// Planar forward kinematics of a serial arm.
fn gripper_position(
    link_lengths: &[f32],
    joints: &[f32],
) -> [f32; 2] {
    let mut angle = 0.0f32;
    let mut position = [0.0f32; 2];
    for (length, joint) in link_lengths.iter().zip(joints) {
        angle += joint;
        position[0] += length * angle.cos();
        position[1] += length * angle.sin();
    }
    position
}


/// A batch of planar arms that have to bring their gripper to a drawer
/// handle.
///
/// Joints follow their position targets exactly, so the joint state of an
/// arm is its target vector. The reward is sparse: `1.0` while the gripper is
/// within `success_tolerance` of the handle, `0.0` otherwise.
pub struct ReachEnv {
    config: ReachConfig,
    device: Device,
    demonstration: DemonstrationTrajectory,
    handle: [f32; 2],

    targets: Vec<Vec<f32>>,
    progress: Vec<usize>,
    demonstration_step: Vec<usize>,

    rng: StdRng,
}

impl ReachEnv {
    fn scaled_joints<'a>(
        &self,
        joints: &'a [f32],
    ) -> impl Iterator<Item = f32> + 'a {
        let (lower, upper) = (self.config.joint_lower, self.config.joint_upper);
        joints
            .iter()
            .map(move |q| 2.0 * (q - lower) / (upper - lower) - 1.0)
    }

    fn observation_row(
        &self,
        i: usize,
    ) -> Vec<f32> {
        let gripper = gripper_position(&self.config.link_lengths, &self.targets[i]);
        self.scaled_joints(&self.targets[i])
            .chain([self.handle[0] - gripper[0], self.handle[1] - gripper[1]])
            .collect()
    }

    fn distance_to_handle(
        &self,
        i: usize,
    ) -> f32 {
        let gripper = gripper_position(&self.config.link_lengths, &self.targets[i]);
        (self.handle[0] - gripper[0]).hypot(self.handle[1] - gripper[1])
    }

    pub fn handle(&self) -> [f32; 2] {
        self.handle
    }

    pub fn demonstration(&self) -> &DemonstrationTrajectory {
        &self.demonstration
    }

    /// The joint targets of every instance.
    pub fn joint_targets(&self) -> &[Vec<f32>] {
        &self.targets
    }
}

impl VecEnvironment for ReachEnv {
    type Config = ReachConfig;

    fn config(&self) -> &ReachConfig {
        &self.config
    }

    fn new(
        config: ReachConfig,
        device: &Device,
    ) -> Result<Box<Self>> {
        config.validate()?;

        let demonstration = match &config.demonstration_file {
            Some(path) => DemonstrationTrajectory::from_file(path)?,
            None => DemonstrationTrajectory::linear(
                &config.default_pose,
                &config.goal_pose,
                config.demonstration_steps,
            )?,
        };
        if demonstration.dof() != config.dof() {
            Err(SacError::shape("demonstration", &[config.dof()], &[demonstration.dof()]))?
        }
        info!(
            "reach environment with {} arms of {} joints, demonstration of {} waypoints",
            config.num_envs,
            config.dof(),
            demonstration.len(),
        );

        let n = config.num_envs;
        let mut env = Self {
            handle: gripper_position(&config.link_lengths, &config.goal_pose),
            targets: vec![config.default_pose.clone(); n],
            progress: vec![0; n],
            demonstration_step: vec![0; n],
            rng: StdRng::seed_from_u64(config.seed),
            device: device.clone(),
            demonstration,
            config,
        };
        env.reset()?;
        Ok(Box::new(env))
    }

    fn num_envs(&self) -> usize {
        self.config.num_envs
    }

    fn observation_space(&self) -> usize {
        self.config.dof() + 2
    }

    fn state_space(&self) -> usize {
        self.observation_space() + 3
    }

    fn action_space(&self) -> usize {
        self.config.dof()
    }

    fn reset_instances(
        &mut self,
        ids: &[usize],
    ) -> Result<()> {
        let n = self.num_envs();
        if let Some(&bad) = ids.iter().find(|&&i| i >= n) {
            Err(SacError::InvalidConfig(format!("instance {bad} out of range for {n} instances")))?
        }

        let (lower, upper, noise) = (
            self.config.joint_lower,
            self.config.joint_upper,
            self.config.start_noise,
        );
        for &i in ids {
            let pose = self
                .config
                .default_pose
                .iter()
                .map(|q| {
                    let offset = if noise > 0.0 { self.rng.gen_range(-noise..noise) } else { 0.0 };
                    (q + offset).clamp(lower, upper)
                })
                .collect();
            self.targets[i] = pose;
            self.progress[i] = 0;
            self.demonstration_step[i] = 0;
        }
        debug!("reset instances {ids:?}");
        Ok(())
    }

    fn observations(&self) -> Result<Tensor> {
        let rows: Vec<f32> = (0..self.num_envs()).flat_map(|i| self.observation_row(i)).collect();
        Ok(Tensor::from_vec(rows, (self.num_envs(), self.observation_space()), &self.device)?)
    }

    fn step(
        &mut self,
        actions: &Tensor,
    ) -> Result<VecStep> {
        let (n, dof) = (self.num_envs(), self.action_space());
        if actions.dims() != [n, dof] {
            Err(SacError::shape("actions", &[n, dof], actions.dims()))?
        }
        let actions = actions.to_dtype(DType::F32)?.to_vec2::<f32>()?;

        let step_size = self.config.dt * self.config.action_scale;
        let (lower, upper) = (self.config.joint_lower, self.config.joint_upper);
        for (target, action) in self.targets.iter_mut().zip(&actions) {
            for (q, a) in target.iter_mut().zip(action) {
                *q = (*q + step_size * a.clamp(-1.0, 1.0)).clamp(lower, upper);
            }
        }

        let rewards: Vec<f32> = (0..n)
            .map(|i| {
                if self.distance_to_handle(i) < self.config.success_tolerance { 1.0 } else { 0.0 }
            })
            .collect();
        let successes = rewards.iter().filter(|&&r| r > 0.0).count();

        let last = self.config.episode_length.saturating_sub(1);
        let mut resets = Vec::new();
        let mut dones = Vec::with_capacity(n);
        for i in 0..n {
            self.progress[i] += 1;
            self.demonstration_step[i] += 1;
            let done = self.progress[i] >= last;
            if done {
                resets.push(i);
            }
            dones.push(u8::from(done));
        }
        if !resets.is_empty() {
            self.reset_instances(&resets)?;
        }

        Ok(VecStep {
            observations: self.observations()?,
            rewards: Tensor::from_vec(rewards, n, &self.device)?,
            dones: Tensor::from_vec(dones, n, &self.device)?,
            info: StepInfo { successes, resets },
        })
    }

    fn get_state(&self) -> Result<Tensor> {
        let episode_length = self.config.episode_length as f32;
        let rows: Vec<f32> = (0..self.num_envs())
            .flat_map(|i| {
                let mut row = self.observation_row(i);
                row.extend(self.handle);
                row.push(self.progress[i] as f32 / episode_length);
                row
            })
            .collect();
        Ok(Tensor::from_vec(rows, (self.num_envs(), self.state_space()), &self.device)?)
    }

    fn get_reverse_actions(&self) -> Result<Tensor> {
        let (dt, scale) = (self.config.dt, self.config.action_scale);
        let rows: Vec<f32> = self
            .targets
            .iter()
            .zip(&self.demonstration_step)
            .flat_map(|(target, &step)| {
                self.demonstration
                    .reverse_action(step, target, dt, scale)
                    .into_iter()
                    .map(|a| a.clamp(-1.0, 1.0))
            })
            .collect();
        Ok(Tensor::from_vec(rows, (self.num_envs(), self.action_space()), &self.device)?)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn env(config: ReachConfig) -> ReachEnv {
        *ReachEnv::new(config, &Device::Cpu).unwrap()
    }

    fn still(num_envs: usize) -> ReachConfig {
        ReachConfig {
            num_envs,
            start_noise: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn spaces_match_the_tensors() {
        let mut env = env(ReachConfig { num_envs: 3, ..Default::default() });
        assert_eq!(env.observation_space(), 6);
        assert_eq!(env.state_space(), 9);
        assert_eq!(env.action_space(), 4);

        assert_eq!(env.reset().unwrap().dims(), &[3, 6]);
        assert_eq!(env.get_state().unwrap().dims(), &[3, 9]);
        assert_eq!(env.get_reverse_actions().unwrap().dims(), &[3, 4]);

        let step = env.step(&Tensor::zeros((3, 4), DType::F32, &Device::Cpu).unwrap()).unwrap();
        assert_eq!(step.observations.dims(), &[3, 6]);
        assert_eq!(step.rewards.dims(), &[3]);
        assert_eq!(step.dones.dtype(), DType::U8);
    }

    #[test]
    fn misshapen_actions_are_rejected() {
        let mut env = env(still(2));
        let err = env.step(&Tensor::zeros((2, 3), DType::F32, &Device::Cpu).unwrap()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SacError>(),
            Some(SacError::ShapeMismatch { .. }),
        ));
    }

    #[test]
    fn demonstration_reaches_the_handle() {
        let config = still(2);
        let steps = config.demonstration_steps;
        let mut env = env(config);
        env.reset().unwrap();

        let mut last = None;
        for _ in 0..steps {
            let actions = env.get_reverse_actions().unwrap();
            last = Some(env.step(&actions).unwrap());
        }
        let last = last.unwrap();
        assert_eq!(last.rewards.to_vec1::<f32>().unwrap(), vec![1.0, 1.0]);
        assert_eq!(last.info.successes, 2);

        // past the last waypoint the demonstrator holds still
        let hold = env.get_reverse_actions().unwrap().to_vec2::<f32>().unwrap();
        assert!(hold.iter().flatten().all(|&a| a == 0.0));
    }

    #[test]
    fn finished_instances_reset_inside_the_step() {
        let mut env = env(ReachConfig { episode_length: 3, ..still(2) });
        let ones = Tensor::ones((2, 4), DType::F32, &Device::Cpu).unwrap();
        let fresh = env.reset().unwrap().to_vec2::<f32>().unwrap();

        let first = env.step(&ones).unwrap();
        assert_eq!(first.dones.to_vec1::<u8>().unwrap(), vec![0, 0]);
        assert_ne!(first.observations.to_vec2::<f32>().unwrap(), fresh);

        let second = env.step(&ones).unwrap();
        assert_eq!(second.dones.to_vec1::<u8>().unwrap(), vec![1, 1]);
        assert_eq!(second.info.resets, vec![0, 1]);
        assert_eq!(second.observations.to_vec2::<f32>().unwrap(), fresh);
    }

    #[test]
    fn reset_only_touches_the_given_instances() {
        let mut env = env(still(2));
        let fresh = env.reset().unwrap().to_vec2::<f32>().unwrap();
        let moved = env
            .step(&Tensor::ones((2, 4), DType::F32, &Device::Cpu).unwrap())
            .unwrap()
            .observations
            .to_vec2::<f32>()
            .unwrap();

        env.reset_instances(&[1]).unwrap();
        let now = env.observations().unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(now[0], moved[0]);
        assert_eq!(now[1], fresh[1]);

        assert!(env.reset_instances(&[2]).is_err());
    }

    #[test]
    fn joints_stay_within_limits() {
        let mut env = env(still(1));
        let push = Tensor::full(1f32, (1, 4), &Device::Cpu).unwrap();
        for _ in 0..200 {
            env.step(&push).unwrap();
        }
        let upper = env.config().joint_upper;
        assert!(env.joint_targets()[0].iter().all(|&q| q <= upper));
    }

    #[test]
    fn ragged_poses_are_rejected() {
        let config = ReachConfig { goal_pose: vec![0.0; 2], ..Default::default() };
        assert!(ReachEnv::new(config, &Device::Cpu).is_err());
    }
}
