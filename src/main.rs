use {
    anyhow::Result,
    cabinet_sac::{
        agents::SAC,
        configs::{
            SAC_Config,
            TrainConfig,
        },
        engines::Trainer,
        envs::{
            ReachConfig,
            ReachEnv,
            ReverseActions,
            VecEnvironment,
        },
        logging::setup_logging,
        util::read_config,
    },
    candle_core::Device,
    clap::{
        Parser,
        ValueEnum,
    },
    std::{
        path::PathBuf,
        sync::atomic::Ordering,
    },
    tracing::{
        warn,
        Level,
    },
};

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Loglevel {
    Error, // put these only during active debugging and then downgrade later
    Warn,  // main events in the program
    Info,  // all the little details
    Debug, // every update and reset
    None,  // don't log anything
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum DeviceArg {
    Cpu,
    Cuda,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The device to run the networks on.
    #[arg(long, value_enum, default_value_t=DeviceArg::Cpu)]
    device: DeviceArg,

    /// Setup logging
    #[arg(long, value_enum, default_value_t=Loglevel::Warn)]
    log: Loglevel,

    /// Algorithm config (RON), defaults to the reach preset.
    #[arg(long)]
    alg_config: Option<PathBuf>,

    /// Training config (RON).
    #[arg(long)]
    train_config: Option<PathBuf>,

    /// Environment config (RON).
    #[arg(long)]
    env_config: Option<PathBuf>,

    /// Directory for checkpoints, configs, metrics and the log file.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Resume from a `model_<iteration>.safetensors` checkpoint.
    #[arg(long)]
    load_model: Option<PathBuf>,

    /// Evaluate the deterministic policy instead of training.
    #[arg(long)]
    test: bool,
}


fn main() -> Result<()> {
    let args = Args::parse();

    let sac_config: SAC_Config = match &args.alg_config {
        Some(path) => read_config(path)?,
        None => SAC_Config::reach(),
    };
    let mut train_config: TrainConfig = match &args.train_config {
        Some(path) => read_config(path)?,
        None => TrainConfig::default(),
    };
    let env_config: ReachConfig = match &args.env_config {
        Some(path) => read_config(path)?,
        None => ReachConfig {
            num_envs: 256,
            ..Default::default()
        },
    };
    if let Some(log_dir) = &args.log_dir {
        train_config.set_log_dir(log_dir.clone());
    }
    if args.test {
        train_config.set_is_testing(true);
    }
    std::fs::create_dir_all(train_config.log_dir())?;

    let level = match args.log {
        Loglevel::Error => Some(Level::ERROR),
        Loglevel::Warn => Some(Level::WARN),
        Loglevel::Info => Some(Level::INFO),
        Loglevel::Debug => Some(Level::DEBUG),
        Loglevel::None => None,
    };
    if let Some(level) = level {
        setup_logging(&train_config.log_dir().join("train.log"), Some(level), Some(level))?;
    }

    let device = match args.device {
        DeviceArg::Cpu => Device::Cpu,
        DeviceArg::Cuda => Device::new_cuda(0)?,
    };

    let env = *ReachEnv::new(env_config.clone(), &device)?;
    let agent = SAC::new(&device, &sac_config, env.observation_space(), env.action_space())?;
    let mut trainer = Trainer::new(env, agent, Box::new(ReverseActions), train_config)?;

    if let Some(path) = &args.load_model {
        trainer.resume(path)?;
    }
    if !args.test {
        trainer.write_configs(&[("environment", &env_config)])?;
    }

    let stop = trainer.stop_handle();
    ctrlc::set_handler(move || {
        warn!("interrupted, stopping after the current step");
        stop.store(true, Ordering::SeqCst);
    })?;

    let metrics = trainer.run()?;
    if let Some(last) = metrics.records().last() {
        warn!("finished at iteration {} with mean return {:.3}", last.iteration, last.mean_return);
    }
    Ok(())
}
