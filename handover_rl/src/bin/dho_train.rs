//! Handover RL command line.
//!
//! Usage:
//!   dho_train train --config dho.json --actors 4 --max-steps 2000 --csv metrics.csv
//!   dho_train decide --config dho.json --checkpoint-dir ./checkpoints --slots 200
//!
//! `train` runs distributed IMPALA training. `decide` replays the live
//! decision path against the simulator using the newest checkpoint; the
//! simulator stands in for the orbital-visibility and signaling layers.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use burn::backend::{Autodiff, NdArray};
use clap::{Parser, Subcommand, ValueEnum};

use handover_rl::checkpoint::{Checkpointer, CheckpointerConfig};
use handover_rl::env::{
    CapacitySource, HandoverDecision, HandoverEnv, JointAction, SlotInput, NO_REQUEST,
};
use handover_rl::{
    policy_store, CSVLogger, ConsoleLogger, DecisionMode, DecisionService, DecisionServiceConfig,
    DhoConfig, DistributedTrainer, MultiLogger, NetworkPolicy,
};

type TrainBackend = Autodiff<NdArray<f32>>;
type InferBackend = NdArray<f32>;

#[derive(Parser, Debug)]
#[command(name = "dho_train")]
#[command(about = "Train and replay LEO handover policies")]
#[command(version)]
struct Args {
    /// JSON config; missing fields take their defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Seed override
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run distributed training
    Train {
        #[arg(long)]
        actors: Option<usize>,

        /// Stop after this many learner updates
        #[arg(long)]
        max_steps: Option<u64>,

        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,

        /// Also write one metrics row per log call
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Learner steps between console lines
        #[arg(long, default_value = "10")]
        log_every: u64,
    },
    /// Replay live decisions against the simulator
    Decide {
        #[arg(long)]
        checkpoint_dir: PathBuf,

        #[arg(long, default_value = "100")]
        slots: u64,

        #[arg(long, value_enum, default_value = "greedy")]
        mode: Mode,

        /// Per-decision budget in ms
        #[arg(long)]
        budget_ms: Option<u64>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Greedy,
    Sampled,
}

impl From<Mode> for DecisionMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Greedy => DecisionMode::Greedy,
            Mode::Sampled => DecisionMode::Sampled,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = match &args.config {
        Some(path) => DhoConfig::from_json_file(path)?,
        None => DhoConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    match args.command {
        Command::Train {
            actors,
            max_steps,
            checkpoint_dir,
            csv,
            log_every,
        } => {
            if let Some(actors) = actors {
                config.actor_count = actors;
            }
            if let Some(steps) = max_steps {
                config.max_train_steps = steps;
            }
            if let Some(dir) = checkpoint_dir {
                config.checkpoint_dir = Some(dir);
            }
            train(config, csv, log_every)
        }
        Command::Decide {
            checkpoint_dir,
            slots,
            mode,
            budget_ms,
        } => {
            if let Some(ms) = budget_ms {
                config.decision_latency_budget_ms = ms;
            }
            decide(config, checkpoint_dir, slots, mode.into())
        }
    }
}

fn train(config: DhoConfig, csv: Option<PathBuf>, log_every: u64) -> Result<()> {
    let mut logger = MultiLogger::new().add(ConsoleLogger::new(log_every));
    if let Some(path) = csv {
        let csv_logger = CSVLogger::new(&path)
            .with_context(|| format!("creating metrics log {}", path.display()))?;
        logger = logger.add(csv_logger);
    }

    let trainer = DistributedTrainer::<TrainBackend>::new(config)?
        .with_log_interval(Duration::from_millis(500));
    let report = trainer.run(&mut logger)?;

    log::info!(
        "finished: {:?}, {} updates, v{}, avg return {:.3}, delay {:.3}, collision {:.3}",
        report.reason,
        report.final_train_step,
        report.final_version,
        report.metrics.avg_return,
        report.metrics.mean_delay,
        report.metrics.mean_collision
    );
    log::info!(
        "learner: {} discarded batches, {} dropped trajectories, mean rho {:.3}",
        report.learner.discarded_batches,
        report.learner.dropped_trajectories,
        report.learner.mean_rho
    );
    for actor in &report.actors {
        log::info!(
            "actor {}: {} steps, {} episodes, {} forced refreshes, max lag {}",
            actor.actor_id,
            actor.steps,
            actor.episodes,
            actor.forced_refreshes,
            actor.max_observed_lag
        );
    }
    Ok(())
}

fn decide(config: DhoConfig, checkpoint_dir: PathBuf, slots: u64, mode: DecisionMode) -> Result<()> {
    config.validate()?;
    let checkpointer = Checkpointer::new(CheckpointerConfig::new(&checkpoint_dir))?;
    let record = checkpointer
        .load_latest()
        .with_context(|| format!("no checkpoint in {}", checkpoint_dir.display()))?;
    log::info!(
        "serving v{} (step {}) in {:?} mode",
        record.snapshot.version,
        record.snapshot.train_step,
        mode
    );

    let store = policy_store(record.snapshot);
    let policy = NetworkPolicy::<InferBackend>::from_config(&config, store, mode, Default::default());
    let mut service = DecisionService::new(policy, DecisionServiceConfig::from_config(&config))?;

    let n_targets = config.n_targets;
    // Capacities reach the simulator through the slot input, as they would
    // from the visibility service.
    let mut capacity = config.capacity.build(n_targets, config.seed)?;
    let mut env = HandoverEnv::new(
        config.env_config(),
        config.capacity.build(n_targets, config.seed)?,
        config.seed,
    )?;
    let mut total_reward = 0.0f32;
    let mut episodes = 0u64;

    for _ in 0..slots {
        let state = env.state().clone();
        let caps = capacity.capacities(state.slot, n_targets);
        let input = SlotInput {
            time_index: state.slot,
            available_targets: (1..n_targets)
                .filter_map(|k| caps.get(k).map(|r| (k, r)))
                .collect(),
            ue_access_snapshot: state.access.iter().copied().enumerate().collect(),
        };

        let record = service.decide(&input)?;
        let action = to_action(&record.decisions, n_targets)?;
        let outcome = env.step_with_capacities(&action, &input.capacities(n_targets))?;
        total_reward += outcome.reward;

        log::debug!(
            "slot {}: {:?} fallback={} r={:.3}",
            input.time_index,
            record.decisions.iter().map(|d| d.target).collect::<Vec<_>>(),
            record.fallback,
            outcome.reward
        );

        if outcome.done {
            episodes += 1;
            log::info!(
                "episode {} ended ({:?}) return {:.3}",
                episodes,
                outcome.termination,
                outcome.episode_return.unwrap_or_default()
            );
            env.reset();
            service.reset_episode();
            capacity.reset(config.seed ^ episodes);
        }
    }

    let metrics = service.metrics();
    log::info!(
        "{} decisions, {} fallbacks, mean latency {:.3} ms (max {:.3}), total reward {:.3}",
        metrics.total_decisions,
        metrics.fallbacks,
        metrics.mean_latency_ms,
        metrics.max_latency_ms,
        total_reward
    );
    service.shutdown();
    Ok(())
}

fn to_action(decisions: &[HandoverDecision], n_targets: usize) -> Result<JointAction> {
    let choices: Vec<usize> = decisions
        .iter()
        .map(|d| d.target.unwrap_or(NO_REQUEST))
        .collect();
    Ok(JointAction::from_choices(&choices, n_targets)?)
}
