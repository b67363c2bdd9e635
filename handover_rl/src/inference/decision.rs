//! Live handover decisions under a per-slot latency budget.
//!
//! [`DecisionService`] turns one [`SlotInput`] into one [`HandoverDecision`]
//! per UE. The policy runs on a dedicated worker thread; the caller waits at
//! most `latency_budget` for it. When the budget runs out, the worker has
//! died, or the policy fails, every UE gets "no request" for that slot and the
//! event is counted as a fallback. The caller is never blocked past the budget
//! by a slow policy.
//!
//! ```text
//! decide(input) ──request──► [dho-decision worker] ── policy.decide(state)
//!      │                                                   │
//!      └──── recv_timeout(budget) ◄──────── reply ─────────┘
//!                 │ timeout
//!                 └──► all "no request"
//! ```

use std::collections::VecDeque;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use crossbeam_channel::{RecvTimeoutError, SendTimeoutError, Sender};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use serde::{Deserialize, Serialize};

use leo_access_env::{HandoverDecision, JointAction, SlotInput, State};

use crate::algorithms::policy::{HandoverNet, HandoverNetConfig};
use crate::config::DhoConfig;
use crate::core::policy_store::SharedPolicyStore;
use crate::error::HandoverError;

/// Decisions kept by [`DecisionService::history`].
pub const HISTORY_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionMode {
    /// Most likely target per UE.
    #[default]
    Greedy,
    /// One draw from the policy per UE.
    Sampled,
}

/// Per-UE choices produced by a policy.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDecision {
    /// Column index per UE; 0 is "no request".
    pub choices: Vec<usize>,
    /// Probability of each chosen column.
    pub confidence: Vec<f32>,
    /// Behavior snapshot version that produced the choices.
    pub version: u64,
}

/// Anything that maps a state to per-UE choices.
pub trait DecisionPolicy: Send {
    fn decide(&mut self, state: &State) -> Result<PolicyDecision, HandoverError>;
}

/// Policy network that follows the store's behavior snapshot.
///
/// The snapshot version is checked on every call; a newer one is loaded
/// before deciding.
pub struct NetworkPolicy<B: Backend> {
    model: HandoverNet<B>,
    store: SharedPolicyStore,
    loaded_version: Option<u64>,
    mode: DecisionMode,
    episode_length: u64,
    rng: Xoshiro256StarStar,
    device: B::Device,
}

impl<B: Backend> NetworkPolicy<B> {
    pub fn new(
        net_config: HandoverNetConfig,
        store: SharedPolicyStore,
        mode: DecisionMode,
        episode_length: u64,
        seed: u64,
        device: B::Device,
    ) -> Self {
        Self {
            model: net_config.init::<B>(&device),
            store,
            loaded_version: None,
            mode,
            episode_length,
            rng: Xoshiro256StarStar::seed_from_u64(seed),
            device,
        }
    }

    pub fn from_config(
        config: &DhoConfig,
        store: SharedPolicyStore,
        mode: DecisionMode,
        device: B::Device,
    ) -> Self {
        Self::new(
            HandoverNetConfig::from_config(config),
            store,
            mode,
            config.episode_length,
            config.seed,
            device,
        )
    }

    /// Version currently loaded, if any.
    pub fn loaded_version(&self) -> Option<u64> {
        self.loaded_version
    }

    fn reload_if_stale(&mut self) -> Result<(), HandoverError> {
        if self.loaded_version == Some(self.store.version()) {
            return Ok(());
        }
        let snapshot = self.store.get_behavior();
        self.model = self.model.clone().load_snapshot(&snapshot, &self.device)?;
        if self.loaded_version.is_some() {
            log::debug!("decision policy reloaded v{}", snapshot.version);
        }
        self.loaded_version = Some(snapshot.version);
        Ok(())
    }
}

impl<B: Backend> DecisionPolicy for NetworkPolicy<B> {
    fn decide(&mut self, state: &State) -> Result<PolicyDecision, HandoverError> {
        self.reload_if_stale()?;

        let features = state.features(self.episode_length);
        let obs = Tensor::<B, 1>::from_floats(features.as_slice(), &self.device)
            .reshape([1, features.len()]);
        let output = self.model.policy.forward(obs);
        let version = self.loaded_version.unwrap_or_default();

        let (choices, confidence) = match self.mode {
            DecisionMode::Greedy => {
                let greedy = output
                    .greedy()?
                    .into_iter()
                    .next()
                    .ok_or_else(|| HandoverError::Tensor("empty policy output".into()))?;
                (greedy.choices, greedy.confidence)
            }
            DecisionMode::Sampled => {
                let probs = output
                    .probs()
                    .into_data()
                    .to_vec::<f32>()
                    .map_err(HandoverError::tensor)?;
                let sample = output
                    .sample(&mut self.rng)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| HandoverError::Tensor("empty policy output".into()))?;
                let n_targets = output.n_targets();
                let confidence = sample
                    .choices
                    .iter()
                    .enumerate()
                    .map(|(ue, &k)| probs[ue * n_targets + k])
                    .collect();
                (sample.choices, confidence)
            }
        };

        Ok(PolicyDecision {
            choices,
            confidence,
            version,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DecisionServiceConfig {
    pub n_ues: usize,
    pub n_targets: usize,
    pub latency_budget: Duration,
    pub history_capacity: usize,
}

impl DecisionServiceConfig {
    pub fn from_config(config: &DhoConfig) -> Self {
        Self {
            n_ues: config.n_ues,
            n_targets: config.n_targets,
            latency_budget: config.decision_latency_budget(),
            history_capacity: HISTORY_CAPACITY,
        }
    }

    pub fn with_latency_budget(mut self, budget: Duration) -> Self {
        self.latency_budget = budget;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }
}

/// One served slot.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionRecord {
    pub request_id: u64,
    pub time_index: u64,
    pub decisions: Vec<HandoverDecision>,
    /// Per-UE confidence; empty on fallback.
    pub confidence: Vec<f32>,
    /// Snapshot version used; `None` on fallback.
    pub policy_version: Option<u64>,
    pub latency: Duration,
    /// The safe default was substituted.
    pub fallback: bool,
}

/// Running service performance.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DecisionMetrics {
    pub total_decisions: u64,
    pub fallbacks: u64,
    pub mean_latency_ms: f64,
    pub max_latency_ms: f64,
}

impl DecisionMetrics {
    fn record(&mut self, latency: Duration, fallback: bool) {
        let ms = latency.as_secs_f64() * 1e3;
        self.total_decisions += 1;
        if fallback {
            self.fallbacks += 1;
        }
        self.mean_latency_ms += (ms - self.mean_latency_ms) / self.total_decisions as f64;
        self.max_latency_ms = self.max_latency_ms.max(ms);
    }

    pub fn fallback_rate(&self) -> f64 {
        if self.total_decisions == 0 {
            0.0
        } else {
            self.fallbacks as f64 / self.total_decisions as f64
        }
    }
}

struct Request {
    state: State,
    reply: Sender<Result<PolicyDecision, HandoverError>>,
}

/// Serves live decisions from a [`DecisionPolicy`] on a worker thread.
pub struct DecisionService {
    config: DecisionServiceConfig,
    requests: Option<Sender<Request>>,
    worker: Option<JoinHandle<()>>,
    prev_action: JointAction,
    next_request_id: u64,
    metrics: DecisionMetrics,
    history: VecDeque<DecisionRecord>,
}

impl DecisionService {
    pub fn new<P: DecisionPolicy + 'static>(
        policy: P,
        config: DecisionServiceConfig,
    ) -> Result<Self, HandoverError> {
        let (tx, rx) = crossbeam_channel::bounded::<Request>(1);
        let worker = std::thread::Builder::new()
            .name("dho-decision".to_string())
            .spawn(move || {
                let mut policy = policy;
                for request in rx.iter() {
                    let result = policy.decide(&request.state);
                    // The caller may have given up on this request.
                    let _ = request.reply.send(result);
                }
            })
            .map_err(|e| HandoverError::Worker(format!("spawn decision worker: {}", e)))?;

        Ok(Self {
            prev_action: JointAction::no_request(config.n_ues, config.n_targets),
            config,
            requests: Some(tx),
            worker: Some(worker),
            next_request_id: 0,
            metrics: DecisionMetrics::default(),
            history: VecDeque::new(),
        })
    }

    pub fn config(&self) -> &DecisionServiceConfig {
        &self.config
    }

    /// Decide for one slot.
    ///
    /// Errors only when `input` does not describe exactly the configured UEs;
    /// every other failure is absorbed into the safe default.
    pub fn decide(&mut self, input: &SlotInput) -> Result<DecisionRecord, HandoverError> {
        let start = Instant::now();
        let state = input.to_state(&self.prev_action, self.config.n_ues, self.config.n_targets)?;

        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let decided = match self.request(request_id, state, start) {
            Ok(decision) => JointAction::from_choices(&decision.choices, self.config.n_targets)
                .map(|action| (action, decision))
                .map_err(HandoverError::from),
            Err(e) => Err(e),
        };

        let latency = start.elapsed();
        let record = match decided {
            Ok((action, decision)) => {
                let record = DecisionRecord {
                    request_id,
                    time_index: input.time_index,
                    decisions: HandoverDecision::from_action(&action),
                    confidence: decision.confidence,
                    policy_version: Some(decision.version),
                    latency,
                    fallback: false,
                };
                self.prev_action = action;
                record
            }
            Err(e) => {
                match &e {
                    HandoverError::DecisionLatencyExceeded { .. } => log::warn!("{}", e),
                    _ => log::error!("decision {} failed, using no-request: {}", request_id, e),
                }
                self.prev_action = JointAction::no_request(self.config.n_ues, self.config.n_targets);
                DecisionRecord {
                    request_id,
                    time_index: input.time_index,
                    decisions: HandoverDecision::all_no_request(self.config.n_ues),
                    confidence: Vec::new(),
                    policy_version: None,
                    latency,
                    fallback: true,
                }
            }
        };

        self.metrics.record(latency, record.fallback);
        if self.config.history_capacity > 0 {
            if self.history.len() >= self.config.history_capacity {
                self.history.pop_front();
            }
            self.history.push_back(record.clone());
        }
        Ok(record)
    }

    /// Hand `state` to the worker and wait for the rest of the budget.
    fn request(
        &self,
        request_id: u64,
        state: State,
        start: Instant,
    ) -> Result<PolicyDecision, HandoverError> {
        let budget = self.config.latency_budget;
        let exceeded = || HandoverError::DecisionLatencyExceeded {
            request_id,
            budget_ms: budget.as_millis() as u64,
        };
        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| HandoverError::Worker("decision worker shut down".into()))?;

        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        let remaining = budget.saturating_sub(start.elapsed());
        match requests.send_timeout(
            Request {
                state,
                reply: reply_tx,
            },
            remaining,
        ) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => return Err(exceeded()),
            Err(SendTimeoutError::Disconnected(_)) => {
                return Err(HandoverError::Worker("decision worker exited".into()))
            }
        }

        let remaining = budget.saturating_sub(start.elapsed());
        match reply_rx.recv_timeout(remaining) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(exceeded()),
            Err(RecvTimeoutError::Disconnected) => {
                Err(HandoverError::Worker("decision worker dropped the request".into()))
            }
        }
    }

    pub fn metrics(&self) -> DecisionMetrics {
        self.metrics
    }

    /// Most recent decisions, oldest first.
    pub fn history(&self) -> &VecDeque<DecisionRecord> {
        &self.history
    }

    /// Previous joint action as the next state will see it.
    pub fn prev_action(&self) -> &JointAction {
        &self.prev_action
    }

    /// Start a new observation window: the previous action is "no request".
    pub fn reset_episode(&mut self) {
        self.prev_action = JointAction::no_request(self.config.n_ues, self.config.n_targets);
    }

    /// Stop the worker and wait for it.
    ///
    /// Blocks until any decision still running on the worker completes.
    pub fn shutdown(mut self) {
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("decision worker panicked");
            }
        }
    }
}

impl Drop for DecisionService {
    fn drop(&mut self) {
        // Closing the queue lets the worker exit once it is idle; never join
        // here so a stuck policy cannot block the caller.
        self.requests.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    use crate::core::policy_store::policy_store;

    type TB = NdArray<f32>;

    const J: usize = 3;
    const K: usize = 3;

    fn input(time_index: u64) -> SlotInput {
        SlotInput {
            time_index,
            available_targets: [(1, 2), (2, 1)].into_iter().collect(),
            ue_access_snapshot: (0..J).map(|ue| (ue, false)).collect(),
        }
    }

    fn service_config() -> DecisionServiceConfig {
        DecisionServiceConfig {
            n_ues: J,
            n_targets: K,
            latency_budget: Duration::from_millis(500),
            history_capacity: HISTORY_CAPACITY,
        }
    }

    fn network_policy(mode: DecisionMode, seed: u64) -> (NetworkPolicy<TB>, SharedPolicyStore) {
        let device = Default::default();
        let net_config = HandoverNetConfig::new(J, K, 16);
        let store = policy_store(net_config.init::<TB>(&device).to_snapshot(0, 0).unwrap());
        let policy = NetworkPolicy::new(net_config, Arc::clone(&store), mode, 50, seed, device);
        (policy, store)
    }

    /// Always picks the same choices and remembers every state it saw.
    struct FixedPolicy {
        choices: Vec<usize>,
        seen: Arc<Mutex<Vec<State>>>,
    }

    impl DecisionPolicy for FixedPolicy {
        fn decide(&mut self, state: &State) -> Result<PolicyDecision, HandoverError> {
            self.seen.lock().unwrap().push(state.clone());
            Ok(PolicyDecision {
                confidence: vec![1.0; self.choices.len()],
                choices: self.choices.clone(),
                version: 7,
            })
        }
    }

    struct SlowPolicy(Duration);

    impl DecisionPolicy for SlowPolicy {
        fn decide(&mut self, state: &State) -> Result<PolicyDecision, HandoverError> {
            std::thread::sleep(self.0);
            Ok(PolicyDecision {
                choices: vec![1; state.n_ues()],
                confidence: vec![1.0; state.n_ues()],
                version: 0,
            })
        }
    }

    struct FailingPolicy;

    impl DecisionPolicy for FailingPolicy {
        fn decide(&mut self, _state: &State) -> Result<PolicyDecision, HandoverError> {
            Err(HandoverError::Snapshot("corrupt".into()))
        }
    }

    #[test]
    fn test_network_policy_greedy() {
        let (policy, _store) = network_policy(DecisionMode::Greedy, 0);
        let mut service = DecisionService::new(policy, service_config()).unwrap();

        let record = service.decide(&input(0)).unwrap();
        assert!(!record.fallback);
        assert_eq!(record.decisions.len(), J);
        assert_eq!(record.confidence.len(), J);
        // greedy confidence is the max of K probabilities
        assert!(record.confidence.iter().all(|&c| c >= 1.0 / K as f32 - 1e-5 && c <= 1.0));
        assert_eq!(record.policy_version, Some(0));
        for (ue, decision) in record.decisions.iter().enumerate() {
            assert_eq!(decision.ue_id, ue);
            assert!(decision.target.map_or(true, |k| k > 0 && k < K));
        }
    }

    #[test]
    fn test_network_policy_hot_reload() {
        let (policy, store) = network_policy(DecisionMode::Greedy, 0);
        let mut service = DecisionService::new(policy, service_config()).unwrap();
        assert_eq!(service.decide(&input(0)).unwrap().policy_version, Some(0));

        let replacement = HandoverNetConfig::new(J, K, 16)
            .init::<TB>(&Default::default())
            .to_snapshot(0, 10)
            .unwrap();
        store.publish(replacement);

        assert_eq!(service.decide(&input(1)).unwrap().policy_version, Some(1));
    }

    #[test]
    fn test_sampled_mode_is_seeded() {
        let (policy_a, store) = network_policy(DecisionMode::Sampled, 11);
        let mut policy_b = NetworkPolicy::<TB>::new(
            HandoverNetConfig::new(J, K, 16),
            store,
            DecisionMode::Sampled,
            50,
            11,
            Default::default(),
        );
        let mut policy_a = policy_a;
        let state = State::initial(J, K);

        for _ in 0..5 {
            let a = policy_a.decide(&state).unwrap();
            let b = policy_b.decide(&state).unwrap();
            assert_eq!(a.choices, b.choices);
            assert!(a.confidence.iter().all(|&c| c > 0.0 && c <= 1.0));
        }
        assert_eq!(policy_a.loaded_version(), Some(0));
    }

    #[test]
    fn test_prev_action_feeds_next_state() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let policy = FixedPolicy {
            choices: vec![1, 0, 2],
            seen: Arc::clone(&seen),
        };
        let mut service = DecisionService::new(policy, service_config()).unwrap();

        let first = service.decide(&input(0)).unwrap();
        assert_eq!(first.decisions[0].target, Some(1));
        assert_eq!(first.decisions[1].target, None);
        assert_eq!(first.decisions[2].target, Some(2));
        service.decide(&input(1)).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].prev_action, JointAction::no_request(J, K));
        assert_eq!(seen[1].prev_action.choices(), vec![1, 0, 2]);
        assert_eq!(seen[1].slot, 1);

        service.reset_episode();
        assert_eq!(*service.prev_action(), JointAction::no_request(J, K));
    }

    #[test]
    fn test_slow_policy_falls_back_to_no_request() {
        let config = service_config().with_latency_budget(Duration::from_millis(10));
        let mut service = DecisionService::new(SlowPolicy(Duration::from_millis(200)), config).unwrap();

        let start = Instant::now();
        let record = service.decide(&input(0)).unwrap();
        assert!(start.elapsed() < Duration::from_millis(150));

        assert!(record.fallback);
        assert!(record.decisions.iter().all(|d| d.target.is_none()));
        assert_eq!(record.policy_version, None);
        assert_eq!(*service.prev_action(), JointAction::no_request(J, K));

        let metrics = service.metrics();
        assert_eq!(metrics.total_decisions, 1);
        assert_eq!(metrics.fallbacks, 1);
        assert_eq!(metrics.fallback_rate(), 1.0);
    }

    #[test]
    fn test_policy_error_falls_back() {
        let mut service = DecisionService::new(FailingPolicy, service_config()).unwrap();
        let record = service.decide(&input(0)).unwrap();
        assert!(record.fallback);
        assert_eq!(service.metrics().fallbacks, 1);
    }

    #[test]
    fn test_out_of_range_choice_falls_back() {
        let policy = FixedPolicy {
            choices: vec![0, 5, 0],
            seen: Arc::new(Mutex::new(Vec::new())),
        };
        let mut service = DecisionService::new(policy, service_config()).unwrap();
        assert!(service.decide(&input(0)).unwrap().fallback);
    }

    #[test]
    fn test_malformed_input_is_rejected() {
        let (policy, _store) = network_policy(DecisionMode::Greedy, 0);
        let mut service = DecisionService::new(policy, service_config()).unwrap();
        let bad = SlotInput {
            time_index: 0,
            available_targets: BTreeMap::new(),
            ue_access_snapshot: [(0, true)].into_iter().collect(),
        };

        assert!(matches!(service.decide(&bad), Err(HandoverError::Env(_))));
        assert_eq!(service.metrics().total_decisions, 0);
        assert!(service.history().is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let policy = FixedPolicy {
            choices: vec![0, 0, 0],
            seen: Arc::new(Mutex::new(Vec::new())),
        };
        let config = service_config().with_history_capacity(3);
        let mut service = DecisionService::new(policy, config).unwrap();

        for n in 0..5 {
            service.decide(&input(n)).unwrap();
        }

        let history = service.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history.front().unwrap().request_id, 2);
        assert_eq!(history.back().unwrap().time_index, 4);
        assert_eq!(service.metrics().total_decisions, 5);
        assert!(service.metrics().mean_latency_ms >= 0.0);
        service.shutdown();
    }
}
