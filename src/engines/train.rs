use {
    super::metrics::{
        IterationRecord,
        MetricsLog,
    },
    crate::{
        agents::{
            Algorithm,
            OffPolicyAlgorithm,
            RunMode,
            SaveableAlgorithm,
            UpdateStats,
            SAC,
        },
        checkpoint::{
            checkpoint_path,
            iteration_from_path,
        },
        components::Transition,
        configs::TrainConfig,
        envs::{
            ActionSource,
            VecEnvironment,
        },
        error::SacError,
        util::write_config,
    },
    anyhow::{
        anyhow,
        Result,
    },
    candle_core::{
        DType,
        Tensor,
    },
    serde::Serialize,
    std::{
        fs::create_dir_all,
        path::Path,
        sync::{
            atomic::{
                AtomicBool,
                Ordering,
            },
            Arc,
        },
    },
    strum::Display,
    tracing::{
        info,
        warn,
    },
};


/// Where the trainer stands in its lifecycle.
///
/// In `Warmup` the demonstrator acts and its transitions fill the
/// demonstration segment. Once that segment is full the trainer moves to
/// `Online` for good: the policy acts and learns from its own data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Phase {
    #[strum(serialize = "warmup")]
    Warmup,
    #[strum(serialize = "online")]
    Online,
}

fn mean_stats(stats: &[UpdateStats]) -> (f32, f32, f32) {
    if stats.is_empty() {
        return (f32::NAN, f32::NAN, f32::NAN);
    }
    let n = stats.len() as f32;
    let sum = stats.iter().fold((0.0, 0.0, 0.0), |acc, s| {
        (acc.0 + s.q1_loss, acc.1 + s.q2_loss, acc.2 + s.policy_loss)
    });
    (sum.0 / n, sum.1 / n, sum.2 / n)
}


/// Drives a [`SAC`] agent against a [`VecEnvironment`].
///
/// # Fields
///
/// * `demonstrator` - Acts during [`Phase::Warmup`].
/// * `iteration` - The next iteration to run, restored by [`Trainer::resume`].
/// * `resumed` - Whether the log directory belongs to the run being continued.
/// * `stop` - Checked before every step, set it to end the run early.
pub struct Trainer<Env: VecEnvironment> {
    env: Env,
    agent: SAC,
    demonstrator: Box<dyn ActionSource<Env>>,
    config: TrainConfig,
    phase: Phase,
    iteration: usize,
    resumed: bool,
    metrics: MetricsLog,
    stop: Arc<AtomicBool>,
}

impl<Env: VecEnvironment> Trainer<Env> {
    pub fn new(
        env: Env,
        agent: SAC,
        demonstrator: Box<dyn ActionSource<Env>>,
        config: TrainConfig,
    ) -> Result<Self> {
        config.validate()?;
        if agent.size_state() != env.observation_space() {
            Err(SacError::shape("agent state size", &[env.observation_space()], &[agent.size_state()]))?
        }
        if agent.size_action() != env.action_space() {
            Err(SacError::shape("agent action size", &[env.action_space()], &[agent.size_action()]))?
        }

        let phase = if agent.replay_buffer().is_demonstration_full() {
            Phase::Online
        } else {
            Phase::Warmup
        };
        Ok(Self {
            env,
            agent,
            demonstrator,
            config,
            phase,
            iteration: 0,
            resumed: false,
            metrics: MetricsLog::default(),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn agent(&self) -> &SAC {
        &self.agent
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn metrics(&self) -> &MetricsLog {
        &self.metrics
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// A flag that ends the run at the next step boundary once set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Restore the network parameters and continue counting from the
    /// iteration encoded in the checkpoint name.
    ///
    /// With `is_testing` set only the parameters are loaded.
    pub fn resume<P: AsRef<Path> + ?Sized>(
        &mut self,
        path: &P,
    ) -> Result<()> {
        let path = path.as_ref();
        if self.config.is_testing() {
            self.agent.load(path)?;
            warn!("loaded {} for evaluation", path.display());
            return Ok(());
        }
        let iteration = iteration_from_path(path)?;
        self.agent.load(path)?;
        self.iteration = iteration;
        self.resumed = true;
        warn!("resumed from {} at iteration {iteration}", path.display());
        Ok(())
    }

    /// Write the configs into the log directory, refusing to overwrite the
    /// configs of an earlier run unless resuming.
    pub fn write_configs<C: Serialize>(
        &self,
        extra: &[(&str, &C)],
    ) -> Result<()> {
        let log_dir = self.config.log_dir();
        let algorithm = log_dir.join("config_algorithm.ron");
        if !self.resumed && algorithm.try_exists()? {
            Err(anyhow!(
                "config files already exist in {}, refusing to overwrite an earlier run",
                log_dir.display(),
            ))?
        }

        create_dir_all(log_dir)?;
        write_config(self.agent.config(), algorithm)?;
        write_config(&self.config, log_dir.join("config_training.ron"))?;
        for (name, config) in extra {
            write_config(config, log_dir.join(format!("config_{name}.ron")))?;
        }
        Ok(())
    }

    fn checkpoint(
        &mut self,
        iteration: usize,
    ) -> Result<()> {
        let log_dir = self.config.log_dir();
        create_dir_all(log_dir)?;
        self.agent.save(&checkpoint_path(log_dir, iteration))?;
        self.metrics.write_parquet(&log_dir.join("metrics.parquet"))?;
        warn!("checkpoint written for iteration {iteration}");
        Ok(())
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn check_actions(
        &self,
        actions: &Tensor,
    ) -> Result<()> {
        let expected = [self.env.num_envs(), self.env.action_space()];
        if actions.dims() != expected {
            Err(SacError::shape("action batch", &expected, actions.dims()))?
        }
        Ok(())
    }

    /// Switch to [`Phase::Online`], running any configured updates on the
    /// demonstrations first.
    fn go_online(
        &mut self,
        stats: &mut Vec<UpdateStats>,
    ) -> Result<()> {
        warn!(
            "demonstration segment full with {} transitions, going online",
            self.agent.replay_buffer().demonstration_len(),
        );
        self.phase = Phase::Online;
        let updates = self.agent.config().demonstration_updates;
        for _ in 0..updates {
            stats.push(self.agent.train()?);
        }
        if updates > 0 {
            info!("ran {updates} updates on demonstration data");
        }
        Ok(())
    }

    fn should_update(&self) -> bool {
        let buffer = self.agent.replay_buffer();
        let config = self.agent.config();
        self.phase == Phase::Online
            && buffer.len() >= (config.demonstration_buffer_len + 1).max(config.batch_size)
    }

    /// Run iterations until `num_learning_iterations` or until stopped.
    ///
    /// With `is_testing` set this evaluates the deterministic policy without
    /// touching the buffer, the optimizers or the checkpoints.
    pub fn run(&mut self) -> Result<&MetricsLog> {
        if self.config.is_testing() {
            self.evaluate()?;
        } else {
            self.train()?;
        }
        Ok(&self.metrics)
    }

    fn train(&mut self) -> Result<()> {
        let num_envs = self.env.num_envs();
        let device = self.agent.device().clone();
        let reward_scale = self.agent.config().reward_scale;
        warn!(
            "training from iteration {} to {} with {num_envs} instances, starting in {}",
            self.iteration,
            self.config.num_learning_iterations(),
            self.phase,
        );

        while self.iteration < self.config.num_learning_iterations() {
            let it = self.iteration;
            let mut states = self.env.reset()?;
            let mut score = Tensor::zeros(num_envs, DType::F32, &device)?;
            let mut successes = 0;
            let mut stats = Vec::new();

            for _ in 0..self.config.episode_length() {
                if self.stopped() {
                    warn!("stop requested during iteration {it}");
                    return self.checkpoint(it);
                }
                if self.config.apply_reset() {
                    states = self.env.reset()?;
                }

                let source: &mut dyn ActionSource<Env> = match self.phase {
                    Phase::Warmup => self.demonstrator.as_mut(),
                    Phase::Online => &mut self.agent,
                };
                let actions = source.actions(&self.env, &states)?.detach();
                self.check_actions(&actions)?;

                let step = self.env.step(&actions)?;
                let rewards = step.rewards.to_dtype(DType::F32)?;
                let transitions = Transition::from_batch(
                    &states,
                    &actions,
                    &rewards.affine(reward_scale, 0.0)?,
                    &step.observations,
                    &step.dones,
                )?;
                match self.phase {
                    Phase::Warmup => {
                        self.agent.remember_demonstration(transitions)?;
                    }
                    Phase::Online => self.agent.remember(transitions)?,
                }

                score = (score + rewards)?;
                successes += step.info.successes;
                states = step.observations;

                if self.phase == Phase::Warmup && self.agent.replay_buffer().is_demonstration_full() {
                    self.go_online(&mut stats)?;
                }
                if self.should_update() {
                    stats.push(self.agent.train()?);
                }
            }

            let (q1_loss, q2_loss, policy_loss) = mean_stats(&stats);
            self.metrics.record(IterationRecord {
                iteration: it,
                phase: self.phase,
                mean_return: score.mean_all()?.to_scalar::<f32>()?,
                successes,
                buffer_len: self.agent.replay_buffer().len(),
                updates: stats.len(),
                q1_loss,
                q2_loss,
                policy_loss,
            });

            self.iteration += 1;
            if it % self.config.log_interval() == 0 {
                self.checkpoint(it)?;
            }
        }

        self.checkpoint(self.iteration)
    }

    fn evaluate(&mut self) -> Result<()> {
        let num_envs = self.env.num_envs();
        let device = self.agent.device().clone();
        warn!("evaluating the deterministic policy on {num_envs} instances");

        for rollout in 0..self.config.num_learning_iterations() {
            let mut states = self.env.reset()?;
            let mut score = Tensor::zeros(num_envs, DType::F32, &device)?;
            let mut successes = 0;

            for _ in 0..self.config.episode_length() {
                if self.stopped() {
                    warn!("stop requested during evaluation");
                    return Ok(());
                }
                if self.config.apply_reset() {
                    states = self.env.reset()?;
                }
                let actions = Algorithm::actions(&mut self.agent, &states, RunMode::Test)?;
                self.check_actions(&actions)?;

                let step = self.env.step(&actions)?;
                score = (score + step.rewards.to_dtype(DType::F32)?)?;
                successes += step.info.successes;
                states = step.observations;
            }

            self.metrics.record(IterationRecord {
                iteration: rollout,
                phase: self.phase,
                mean_return: score.mean_all()?.to_scalar::<f32>()?,
                successes,
                buffer_len: self.agent.replay_buffer().len(),
                updates: 0,
                q1_loss: f32::NAN,
                q2_loss: f32::NAN,
                policy_loss: f32::NAN,
            });
        }
        Ok(())
    }
}
