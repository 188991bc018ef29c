use {
    super::{
        networks::{
            Critic,
            Policy,
        },
        Algorithm,
        OffPolicyAlgorithm,
        RunMode,
        SaveableAlgorithm,
    },
    crate::{
        checkpoint,
        components::{
            ReplayBuffer,
            Transition,
            TransitionBatch,
        },
        configs::SAC_Config,
        envs::{
            ActionSource,
            VecEnvironment,
        },
        error::SacError,
    },
    anyhow::Result,
    candle_core::{
        Device,
        Tensor,
    },
    candle_nn::{
        AdamW,
        Optimizer,
        ParamsAdamW,
    },
    rand::{
        rngs::StdRng,
        Rng,
        SeedableRng,
    },
    rand_distr::StandardNormal,
    std::path::Path,
    tracing::{
        debug,
        error,
    },
};

/// Selects one of the four Q networks held by [`SAC`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QNetwork {
    Q1,
    Q2,
    TargetQ1,
    TargetQ2,
}

/// Scalar losses of one update step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UpdateStats {
    pub q1_loss: f32,
    pub q2_loss: f32,
    pub policy_loss: f32,
}

fn finite_loss(
    loss: &Tensor,
    which: &'static str,
) -> Result<f32> {
    let value = loss.to_scalar::<f32>()?;
    if !value.is_finite() {
        error!("{which} loss is {value}, skipping the optimizer step");
        Err(SacError::NonFiniteLoss { which, value })?
    }
    Ok(value)
}


/// Soft actor-critic with twin critics and target networks.
///
/// The agent owns its replay buffer. Each network keeps its own varmap and
/// optimizer so that a loss only ever steps the parameters it belongs to.
#[allow(clippy::upper_case_acronyms)]
pub struct SAC {
    policy: Policy,
    policy_optim: AdamW,
    q1: Critic,
    q1_optim: AdamW,
    q2: Critic,
    q2_optim: AdamW,

    gamma: f64,
    tau: f64,
    alpha: f64,
    batch_size: usize,
    replay_buffer: ReplayBuffer,

    size_state: usize,
    size_action: usize,
    device: Device,
    rng: StdRng,
    config: SAC_Config,
}

impl SAC {
    pub fn new(
        device: &Device,
        config: &SAC_Config,
        size_state: usize,
        size_action: usize,
    ) -> Result<Self> {
        config.validate()?;
        if size_state == 0 || size_action == 0 {
            Err(SacError::InvalidConfig(format!(
                "state and action sizes must be positive, got {size_state} and {size_action}"
            )))?
        }

        let params = ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };

        let policy = Policy::new(
            device,
            size_state,
            config.hidden_1_size,
            config.hidden_2_size,
            size_action,
        )?;
        let policy_optim = AdamW::new(policy.varmap().all_vars(), params.clone())?;

        let q1 = Critic::new(
            device,
            "q1",
            size_state,
            config.hidden_1_size,
            config.hidden_2_size,
            size_action,
        )?;
        let q1_optim = AdamW::new(q1.vars()?, params.clone())?;

        let q2 = Critic::new(
            device,
            "q2",
            size_state,
            config.hidden_1_size,
            config.hidden_2_size,
            size_action,
        )?;
        let q2_optim = AdamW::new(q2.vars()?, params)?;

        Ok(Self {
            policy,
            policy_optim,
            q1,
            q1_optim,
            q2,
            q2_optim,
            gamma: config.gamma,
            tau: config.tau,
            alpha: config.alpha,
            batch_size: config.batch_size,
            replay_buffer: ReplayBuffer::new(
                config.demonstration_buffer_len,
                config.replay_buffer_len,
                size_state,
                size_action,
                config.seed,
            ),
            size_state,
            size_action,
            device: device.clone(),
            rng: StdRng::seed_from_u64(config.seed.wrapping_add(1)),
            config: config.clone(),
        })
    }

    pub fn size_state(&self) -> usize {
        self.size_state
    }

    pub fn size_action(&self) -> usize {
        self.size_action
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    fn standard_normal(
        &mut self,
        rows: usize,
    ) -> candle_core::Result<Tensor> {
        let noise: Vec<f32> = (&mut self.rng)
            .sample_iter(StandardNormal)
            .take(rows * self.size_action)
            .collect();
        Tensor::from_vec(noise, (rows, self.size_action), &self.device)
    }

    /// A reparameterized sample from the squashed policy together with its
    /// log probability `(B, 1)`.
    pub fn evaluate(
        &mut self,
        state: &Tensor,
    ) -> candle_core::Result<(Tensor, Tensor)> {
        let (rows, _) = state.dims2()?;
        let noise = self.standard_normal(rows)?;
        self.policy.evaluate(state, &noise)
    }

    /// A detached stochastic action batch for exploration.
    pub fn act(
        &mut self,
        state: &Tensor,
    ) -> candle_core::Result<Tensor> {
        let (action, _) = self.evaluate(&state.detach())?;
        Ok(action.detach())
    }

    /// The detached squashed mean action.
    pub fn act_inference(
        &self,
        state: &Tensor,
    ) -> candle_core::Result<Tensor> {
        Ok(self.policy.deterministic(&state.detach())?.detach())
    }

    /// Evaluate one of the four Q networks on a `(state, action)` batch.
    pub fn q_value(
        &self,
        network: QNetwork,
        state: &Tensor,
        action: &Tensor,
    ) -> candle_core::Result<Tensor> {
        match network {
            QNetwork::Q1 => self.q1.forward(state, action),
            QNetwork::Q2 => self.q2.forward(state, action),
            QNetwork::TargetQ1 => self.q1.target_forward(state, action),
            QNetwork::TargetQ2 => self.q2.target_forward(state, action),
        }
    }

    /// `r + gamma * (min(Q1'(s', a'), Q2'(s', a')) - alpha * log pi(a'|s'))`
    /// with `a'` freshly sampled from the current policy.
    ///
    /// The result is detached: no gradient reaches the policy or either target.
    pub fn bellman_backup(
        &mut self,
        batch: &TransitionBatch,
    ) -> candle_core::Result<Tensor> {
        let (next_actions, next_log_probs) = self.evaluate(&batch.next_states)?;
        let next_actions = next_actions.detach();
        let next_log_probs = next_log_probs.detach();

        let target_q = self
            .q1
            .target_forward(&batch.next_states, &next_actions)?
            .minimum(&self.q2.target_forward(&batch.next_states, &next_actions)?)?;
        let soft_value = (target_q - next_log_probs.affine(self.alpha, 0.0)?)?;
        let backup = (&batch.rewards + soft_value.affine(self.gamma, 0.0)?)?;
        Ok(backup.detach())
    }

    /// Regress both critics onto the backup with mean squared error.
    ///
    /// Both losses are checked before either optimizer steps, so a non-finite
    /// loss leaves every parameter untouched.
    pub fn update_critics(
        &mut self,
        batch: &TransitionBatch,
    ) -> Result<(f32, f32)> {
        let backup = self.bellman_backup(batch)?;

        let q1_loss = (self.q1.forward(&batch.states, &batch.actions)? - &backup)?
            .sqr()?
            .mean_all()?;
        let q2_loss = (self.q2.forward(&batch.states, &batch.actions)? - &backup)?
            .sqr()?
            .mean_all()?;

        let q1_value = finite_loss(&q1_loss, "q1")?;
        let q2_value = finite_loss(&q2_loss, "q2")?;

        self.q1_optim.backward_step(&q1_loss)?;
        self.q2_optim.backward_step(&q2_loss)?;

        Ok((q1_value, q2_value))
    }

    /// Step the policy on `mean(alpha * log pi(a|s) - min(Q1(s, a), Q2(s, a)))`.
    ///
    /// Gradients reach the critics through the sampled actions, but only the
    /// policy optimizer steps.
    pub fn update_policy(
        &mut self,
        batch: &TransitionBatch,
    ) -> Result<f32> {
        let (actions, log_probs) = self.evaluate(&batch.states)?;
        let q = self
            .q1
            .forward(&batch.states, &actions)?
            .minimum(&self.q2.forward(&batch.states, &actions)?)?;

        let policy_loss = (log_probs.affine(self.alpha, 0.0)? - q)?.mean_all()?;
        let value = finite_loss(&policy_loss, "policy")?;

        self.policy_optim.backward_step(&policy_loss)?;
        Ok(value)
    }

    /// `target = tau * online + (1 - tau) * target` for both critics.
    pub fn soft_update_targets(
        &mut self,
        tau: f64,
    ) -> candle_core::Result<()> {
        self.q1.track(tau)?;
        self.q2.track(tau)
    }

    /// One full update on a batch: critics, then policy, then targets.
    pub fn update_on(
        &mut self,
        batch: &TransitionBatch,
    ) -> Result<UpdateStats> {
        let (q1_loss, q2_loss) = self.update_critics(batch)?;
        let policy_loss = self.update_policy(batch)?;
        self.soft_update_targets(self.tau)?;

        debug!(q1_loss, q2_loss, policy_loss, segment = %batch.segment, "update");
        Ok(UpdateStats {
            q1_loss,
            q2_loss,
            policy_loss,
        })
    }

    /// Sample `batch_size` transitions from the active buffer segment and
    /// update on them.
    pub fn update(
        &mut self,
        batch_size: usize,
    ) -> Result<UpdateStats> {
        let batch = self.replay_buffer.sample(batch_size, &self.device)?;
        self.update_on(&batch)
    }
}

impl Algorithm for SAC {
    type Config = SAC_Config;

    fn config(&self) -> &SAC_Config {
        &self.config
    }

    fn from_config(
        device: &Device,
        config: &SAC_Config,
        size_state: usize,
        size_action: usize,
    ) -> Result<Box<Self>> {
        Ok(Box::new(Self::new(device, config, size_state, size_action)?))
    }

    fn actions(
        &mut self,
        state: &Tensor,
        mode: RunMode,
    ) -> candle_core::Result<Tensor> {
        match mode {
            RunMode::Train => self.act(state),
            RunMode::Test => self.act_inference(state),
        }
    }

    fn train(&mut self) -> Result<UpdateStats> {
        self.update(self.batch_size)
    }
}

impl OffPolicyAlgorithm for SAC {
    fn remember_demonstration(
        &mut self,
        transitions: Vec<Transition>,
    ) -> Result<usize> {
        self.replay_buffer
            .push_demonstration(transitions, self.config.demonstration_weight)
    }

    fn remember(
        &mut self,
        transitions: Vec<Transition>,
    ) -> Result<()> {
        self.replay_buffer.push(transitions)
    }

    fn replay_buffer(&self) -> &ReplayBuffer {
        &self.replay_buffer
    }
}

impl SaveableAlgorithm for SAC {
    fn save<P: AsRef<Path> + ?Sized>(
        &self,
        path: &P,
    ) -> Result<()> {
        checkpoint::save(
            &[self.policy.varmap(), self.q1.varmap(), self.q2.varmap()],
            path.as_ref(),
        )
    }

    fn load<P: AsRef<Path> + ?Sized>(
        &mut self,
        path: &P,
    ) -> Result<()> {
        checkpoint::load(
            &[self.policy.varmap(), self.q1.varmap(), self.q2.varmap()],
            path.as_ref(),
            &self.device,
        )
    }
}

impl<Env: VecEnvironment> ActionSource<Env> for SAC {
    fn actions(
        &mut self,
        _env: &Env,
        states: &Tensor,
    ) -> Result<Tensor> {
        Ok(self.act(states)?)
    }
}


#[cfg(test)]
mod tests {
    use {
        super::*,
        candle_nn::VarMap,
        std::collections::BTreeMap,
    };

    const STATE: usize = 3;
    const ACTION: usize = 2;

    fn small_config() -> SAC_Config {
        SAC_Config {
            hidden_1_size: 16,
            hidden_2_size: 16,
            demonstration_buffer_len: 8,
            replay_buffer_len: 64,
            batch_size: 4,
            ..Default::default()
        }
    }

    fn agent() -> SAC {
        SAC::new(&Device::Cpu, &small_config(), STATE, ACTION).unwrap()
    }

    fn batch(
        rows: usize,
        reward: f32,
    ) -> TransitionBatch {
        let device = Device::Cpu;
        TransitionBatch {
            segment: crate::components::Segment::Online,
            states: Tensor::randn(0f32, 1.0, (rows, STATE), &device).unwrap(),
            actions: Tensor::randn(0f32, 0.5, (rows, ACTION), &device).unwrap(),
            rewards: Tensor::full(reward, (rows, 1), &device).unwrap(),
            next_states: Tensor::randn(0f32, 1.0, (rows, STATE), &device).unwrap(),
            dones: Tensor::zeros((rows, 1), candle_core::DType::F32, &device).unwrap(),
        }
    }

    fn snapshot(varmap: &VarMap) -> BTreeMap<String, Vec<f32>> {
        varmap
            .data()
            .lock()
            .unwrap()
            .iter()
            .map(|(name, var)| {
                (
                    name.clone(),
                    var.as_tensor().flatten_all().unwrap().to_vec1::<f32>().unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn actions_have_the_requested_shape_and_range() {
        let mut sac = agent();
        let state = Tensor::randn(0f32, 1.0, (5, STATE), &Device::Cpu).unwrap();

        let train = Algorithm::actions(&mut sac, &state, RunMode::Train).unwrap();
        let test = Algorithm::actions(&mut sac, &state, RunMode::Test).unwrap();
        assert_eq!(train.dims(), &[5, ACTION]);
        assert_eq!(test.dims(), &[5, ACTION]);
        for row in train.to_vec2::<f32>().unwrap() {
            assert!(row.iter().all(|a| a.abs() <= 1.0));
        }

        let again = sac.act_inference(&state).unwrap();
        assert_eq!(test.to_vec2::<f32>().unwrap(), again.to_vec2::<f32>().unwrap());
    }

    #[test]
    fn targets_match_online_critics_at_construction() {
        let sac = agent();
        let state = Tensor::randn(0f32, 1.0, (4, STATE), &Device::Cpu).unwrap();
        let action = Tensor::randn(0f32, 1.0, (4, ACTION), &Device::Cpu).unwrap();

        for (online, target) in [(QNetwork::Q1, QNetwork::TargetQ1), (QNetwork::Q2, QNetwork::TargetQ2)] {
            let a = sac.q_value(online, &state, &action).unwrap();
            let b = sac.q_value(target, &state, &action).unwrap();
            assert_eq!(a.dims(), &[4, 1]);
            assert_eq!(a.to_vec2::<f32>().unwrap(), b.to_vec2::<f32>().unwrap());
        }
    }

    #[test]
    fn backup_is_a_snapshot_of_the_targets() {
        let mut sac = agent();
        let batch = batch(6, 1.0);
        let backup = sac.bellman_backup(&batch).unwrap();
        assert_eq!(backup.dims(), &[6, 1]);
        let before = backup.to_vec2::<f32>().unwrap();

        for var in sac.q1.varmap().all_vars() {
            var.set(&var.as_tensor().affine(0.0, 5.0).unwrap()).unwrap();
        }
        assert_eq!(backup.to_vec2::<f32>().unwrap(), before);
    }

    #[test]
    fn zero_gamma_backup_is_the_reward() {
        let config = SAC_Config { gamma: 0.0, ..small_config() };
        let mut sac = SAC::new(&Device::Cpu, &config, STATE, ACTION).unwrap();
        let backup = sac.bellman_backup(&batch(3, 2.5)).unwrap();
        assert_eq!(backup.to_vec2::<f32>().unwrap(), vec![vec![2.5]; 3]);
    }

    #[test]
    fn policy_step_leaves_critics_untouched() {
        let mut sac = agent();
        let q1 = snapshot(sac.q1.varmap());
        let q2 = snapshot(sac.q2.varmap());
        let policy = snapshot(sac.policy.varmap());

        sac.update_policy(&batch(8, 0.0)).unwrap();

        assert_eq!(snapshot(sac.q1.varmap()), q1);
        assert_eq!(snapshot(sac.q2.varmap()), q2);
        assert_ne!(snapshot(sac.policy.varmap()), policy);
    }

    #[test]
    fn critic_step_leaves_policy_and_targets_untouched() {
        let mut sac = agent();
        let policy = snapshot(sac.policy.varmap());
        let q1 = snapshot(sac.q1.varmap());

        sac.update_critics(&batch(8, 1.0)).unwrap();

        assert_eq!(snapshot(sac.policy.varmap()), policy);
        let after = snapshot(sac.q1.varmap());
        for (name, values) in &after {
            if name.starts_with("target-") {
                assert_eq!(values, &q1[name], "{name} moved");
            }
        }
        assert!(after.iter().any(|(name, values)| !name.starts_with("target-") && values != &q1[name]));
    }

    #[test]
    fn full_update_moves_targets_by_tau() {
        let config = SAC_Config { tau: 1.0, ..small_config() };
        let mut sac = SAC::new(&Device::Cpu, &config, STATE, ACTION).unwrap();
        let stats = sac.update_on(&batch(8, 1.0)).unwrap();
        assert!(stats.q1_loss.is_finite());
        assert!(stats.q2_loss.is_finite());
        assert!(stats.policy_loss.is_finite());

        // tau = 1 makes each target an exact copy again
        let state = Tensor::randn(0f32, 1.0, (4, STATE), &Device::Cpu).unwrap();
        let action = Tensor::randn(0f32, 1.0, (4, ACTION), &Device::Cpu).unwrap();
        let online = sac.q_value(QNetwork::Q2, &state, &action).unwrap();
        let target = sac.q_value(QNetwork::TargetQ2, &state, &action).unwrap();
        assert_eq!(online.to_vec2::<f32>().unwrap(), target.to_vec2::<f32>().unwrap());
    }

    #[test]
    fn non_finite_loss_skips_every_optimizer_step() {
        let mut sac = agent();
        let q1 = snapshot(sac.q1.varmap());
        let q2 = snapshot(sac.q2.varmap());

        let err = sac.update_critics(&batch(4, f32::NAN)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SacError>(),
            Some(SacError::NonFiniteLoss { which: "q1", .. }),
        ));
        assert_eq!(snapshot(sac.q1.varmap()), q1);
        assert_eq!(snapshot(sac.q2.varmap()), q2);
    }

    #[test]
    fn update_refuses_an_underfilled_buffer() {
        let mut sac = agent();
        let transitions = (0..3)
            .map(|_| Transition::new(vec![0.0; STATE], vec![0.0; ACTION], 1.0, vec![0.0; STATE], false))
            .collect();
        sac.remember_demonstration(transitions).unwrap();

        let err = sac.train().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SacError>(),
            Some(SacError::InsufficientTransitions { requested: 4, available: 3, .. }),
        ));
    }

    #[test]
    fn zero_sized_spaces_are_rejected() {
        assert!(SAC::new(&Device::Cpu, &small_config(), 0, ACTION).is_err());
        let config = SAC_Config { tau: 0.0, ..small_config() };
        assert!(SAC::new(&Device::Cpu, &config, STATE, ACTION).is_err());
    }
}
