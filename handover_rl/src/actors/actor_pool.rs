//! Actor thread pool.
//!
//! One named OS thread per actor. Each thread builds its own simulators and
//! model copy, so nothing but the policy store, the trajectory sender and
//! the metrics cross the thread boundary.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;

use burn::tensor::backend::Backend;
use crossbeam_channel::Sender;

use crate::algorithms::policy::HandoverNetConfig;
use crate::config::DhoConfig;
use crate::core::policy_store::SharedPolicyStore;
use crate::error::HandoverError;
use crate::messages::{ActorMsg, ActorStats, FinishReason};
use crate::metrics::SharedTrainingMetrics;

use super::actor::{Actor, ActorConfig};

pub struct ActorHandle {
    pub actor_id: usize,
    pub thread: JoinHandle<ActorStats>,
}

impl ActorHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the thread; a panic becomes [`FinishReason::Panicked`].
    pub fn join(self) -> Result<ActorStats, FinishReason> {
        self.thread.join().map_err(|payload| {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            FinishReason::Panicked(msg)
        })
    }
}

#[derive(Default)]
pub struct ActorPool {
    handles: Vec<ActorHandle>,
}

impl ActorPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `config.actor_count` actors on backend `B`.
    pub fn spawn<B: Backend>(
        config: &DhoConfig,
        store: &SharedPolicyStore,
        sender: &Sender<ActorMsg>,
        metrics: &SharedTrainingMetrics,
        stop: &Arc<AtomicBool>,
    ) -> Result<Self, HandoverError> {
        let mut pool = Self::new();
        let net_config = HandoverNetConfig::from_config(config);

        for actor_id in 0..config.actor_count {
            let actor_config = ActorConfig::from_config(config, actor_id);
            let env_config = config.env_config();
            let capacity = config.capacity.clone();
            let store = Arc::clone(store);
            let sender = sender.clone();
            let metrics = Arc::clone(metrics);
            let stop = Arc::clone(stop);

            let thread = std::thread::Builder::new()
                .name(format!("dho-actor-{}", actor_id))
                .spawn(move || {
                    let device = B::Device::default();
                    let actor = Actor::<B>::new(
                        actor_config,
                        env_config,
                        &capacity,
                        net_config,
                        store,
                        sender.clone(),
                        metrics,
                        device,
                    );
                    match actor {
                        Ok(actor) => actor.run(&stop),
                        Err(e) => {
                            log::error!("actor {} failed to start: {}", actor_id, e);
                            let _ = sender.send(ActorMsg::Disconnected {
                                actor_id,
                                reason: e.to_string(),
                            });
                            ActorStats::new(actor_id)
                        }
                    }
                })
                .map_err(|e| HandoverError::Worker(format!("spawn actor {}: {}", actor_id, e)))?;

            pool.add(ActorHandle { actor_id, thread });
        }

        Ok(pool)
    }

    pub fn add(&mut self, handle: ActorHandle) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Actors whose thread has exited.
    pub fn finished(&self) -> usize {
        self.handles.iter().filter(|h| h.is_finished()).count()
    }

    /// Join every actor; panicked actors are logged and skipped.
    pub fn join_all(self) -> Vec<ActorStats> {
        self.handles
            .into_iter()
            .filter_map(|h| {
                let id = h.actor_id;
                match h.join() {
                    Ok(stats) => Some(stats),
                    Err(reason) => {
                        log::error!("actor {} ended: {:?}", id, reason);
                        None
                    }
                }
            })
            .collect()
    }
}
