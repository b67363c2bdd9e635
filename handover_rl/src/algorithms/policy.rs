//! Handover policy and value networks.
//!
//! The policy emits one categorical distribution per UE over `K` choices
//! (index 0 is "no request"). The joint action probability factorises across
//! UEs, so joint log-probabilities and entropies are sums over the UE axis.
//!
//! ```text
//! obs [B, 1 + J + J*K]
//!   ├── PolicyNet: fc1 → relu → fc2 → relu → head [B, J*K] → reshape [B, J, K] → log_softmax(2)
//!   └── ValueNet:  fc1 → relu → fc2 → relu → head [B, 1]   → flatten [B]
//! ```

use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::activation::{log_softmax, relu};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Int, Tensor};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::DhoConfig;
use crate::core::snapshot::ParameterSnapshot;
use crate::error::HandoverError;

/// Network shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoverNetConfig {
    pub obs_size: usize,
    pub hidden_size: usize,
    pub n_ues: usize,
    pub n_targets: usize,
}

impl HandoverNetConfig {
    pub fn new(n_ues: usize, n_targets: usize, hidden_size: usize) -> Self {
        Self {
            obs_size: leo_access_env::obs_size(n_ues, n_targets),
            hidden_size,
            n_ues,
            n_targets,
        }
    }

    pub fn from_config(config: &DhoConfig) -> Self {
        Self::new(config.n_ues, config.n_targets, config.hidden_size)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> HandoverNet<B> {
        HandoverNet {
            policy: PolicyNet {
                fc1: LinearConfig::new(self.obs_size, self.hidden_size).init(device),
                fc2: LinearConfig::new(self.hidden_size, self.hidden_size).init(device),
                head: LinearConfig::new(self.hidden_size, self.n_ues * self.n_targets).init(device),
                n_ues: self.n_ues,
                n_targets: self.n_targets,
            },
            value: ValueNet {
                fc1: LinearConfig::new(self.obs_size, self.hidden_size).init(device),
                fc2: LinearConfig::new(self.hidden_size, self.hidden_size).init(device),
                head: LinearConfig::new(self.hidden_size, 1).init(device),
            },
        }
    }
}

#[derive(Module, Debug)]
pub struct PolicyNet<B: Backend> {
    fc1: Linear<B>,
    fc2: Linear<B>,
    head: Linear<B>,
    n_ues: usize,
    n_targets: usize,
}

impl<B: Backend> PolicyNet<B> {
    pub fn forward(&self, obs: Tensor<B, 2>) -> JointPolicyOutput<B> {
        let [batch, _] = obs.dims();
        let x = relu(self.fc1.forward(obs));
        let x = relu(self.fc2.forward(x));
        let logits = self
            .head
            .forward(x)
            .reshape([batch, self.n_ues, self.n_targets]);
        JointPolicyOutput::new(log_softmax(logits, 2))
    }
}

#[derive(Module, Debug)]
pub struct ValueNet<B: Backend> {
    fc1: Linear<B>,
    fc2: Linear<B>,
    head: Linear<B>,
}

impl<B: Backend> ValueNet<B> {
    /// `V(s)` for each row: [batch]
    pub fn forward(&self, obs: Tensor<B, 2>) -> Tensor<B, 1> {
        let x = relu(self.fc1.forward(obs));
        let x = relu(self.fc2.forward(x));
        self.head.forward(x).flatten(0, 1)
    }
}

/// Policy and value networks trained together by the learner.
#[derive(Module, Debug)]
pub struct HandoverNet<B: Backend> {
    pub policy: PolicyNet<B>,
    pub value: ValueNet<B>,
}

impl<B: Backend> HandoverNet<B> {
    pub fn forward(&self, obs: Tensor<B, 2>) -> (JointPolicyOutput<B>, Tensor<B, 1>) {
        (self.policy.forward(obs.clone()), self.value.forward(obs))
    }

    pub fn n_ues(&self) -> usize {
        self.policy.n_ues
    }

    pub fn n_targets(&self) -> usize {
        self.policy.n_targets
    }

    /// Serialise both networks into a snapshot.
    pub fn to_snapshot(
        &self,
        version: u64,
        train_step: u64,
    ) -> Result<ParameterSnapshot, HandoverError> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let policy = recorder
            .record(self.policy.clone().into_record(), ())
            .map_err(|e| HandoverError::Snapshot(format!("policy record: {:?}", e)))?;
        let value = recorder
            .record(self.value.clone().into_record(), ())
            .map_err(|e| HandoverError::Snapshot(format!("value record: {:?}", e)))?;
        Ok(ParameterSnapshot::new(version, train_step, policy, value))
    }

    /// Replace both networks' parameters with the snapshot's.
    pub fn load_snapshot(
        self,
        snapshot: &ParameterSnapshot,
        device: &B::Device,
    ) -> Result<Self, HandoverError> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let policy_record = recorder
            .load(snapshot.policy.clone(), device)
            .map_err(|e| HandoverError::Snapshot(format!("policy load: {:?}", e)))?;
        let value_record = recorder
            .load(snapshot.value.clone(), device)
            .map_err(|e| HandoverError::Snapshot(format!("value load: {:?}", e)))?;
        Ok(Self {
            policy: self.policy.load_record(policy_record),
            value: self.value.load_record(value_record),
        })
    }
}

impl<B: AutodiffBackend> HandoverNet<B> {
    /// Name of the first layer whose gradient holds a NaN or an infinity.
    pub fn non_finite_gradient(
        &self,
        grads: &B::Gradients,
    ) -> Result<Option<&'static str>, HandoverError> {
        let layers = [
            ("policy.fc1", &self.policy.fc1),
            ("policy.fc2", &self.policy.fc2),
            ("policy.head", &self.policy.head),
            ("value.fc1", &self.value.fc1),
            ("value.fc2", &self.value.fc2),
            ("value.head", &self.value.head),
        ];
        for (name, layer) in layers {
            if !grad_is_finite(&layer.weight.val(), grads)? {
                return Ok(Some(name));
            }
            if let Some(bias) = &layer.bias {
                if !grad_is_finite(&bias.val(), grads)? {
                    return Ok(Some(name));
                }
            }
        }
        Ok(None)
    }
}

fn grad_is_finite<B: AutodiffBackend, const D: usize>(
    param: &Tensor<B, D>,
    grads: &B::Gradients,
) -> Result<bool, HandoverError> {
    match param.grad(grads) {
        Some(grad) => Ok(grad
            .into_data()
            .to_vec::<f32>()
            .map_err(HandoverError::tensor)?
            .iter()
            .all(|g| g.is_finite())),
        None => Ok(true),
    }
}

/// One sampled joint action.
#[derive(Debug, Clone, PartialEq)]
pub struct JointSample {
    /// Chosen index per UE
    pub choices: Vec<usize>,
    /// `log pi(a|s)` summed over UEs
    pub log_prob: f32,
}

/// One greedy joint action.
#[derive(Debug, Clone, PartialEq)]
pub struct GreedyChoice {
    pub choices: Vec<usize>,
    /// Probability of the chosen index, per UE
    pub confidence: Vec<f32>,
    pub log_prob: f32,
}

/// Per-UE categorical log-probabilities: [batch, J, K].
#[derive(Debug, Clone)]
pub struct JointPolicyOutput<B: Backend> {
    pub log_probs: Tensor<B, 3>,
}

impl<B: Backend> JointPolicyOutput<B> {
    pub fn new(log_probs: Tensor<B, 3>) -> Self {
        Self { log_probs }
    }

    pub fn batch_size(&self) -> usize {
        self.log_probs.dims()[0]
    }

    pub fn n_ues(&self) -> usize {
        self.log_probs.dims()[1]
    }

    pub fn n_targets(&self) -> usize {
        self.log_probs.dims()[2]
    }

    pub fn probs(&self) -> Tensor<B, 3> {
        self.log_probs.clone().exp()
    }

    /// Keep only the given batch rows.
    pub fn select_rows(&self, rows: Tensor<B, 1, Int>) -> Self {
        Self::new(self.log_probs.clone().select(0, rows))
    }

    fn host_log_probs(&self) -> Result<Vec<f32>, HandoverError> {
        self.log_probs
            .clone()
            .into_data()
            .to_vec::<f32>()
            .map_err(HandoverError::tensor)
    }

    /// Sample one choice per UE by inverse CDF.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Result<Vec<JointSample>, HandoverError> {
        let log_probs = self.host_log_probs()?;
        let (batch, n_ues, n_targets) = (self.batch_size(), self.n_ues(), self.n_targets());

        let mut samples = Vec::with_capacity(batch);
        for row in log_probs.chunks_exact(n_ues * n_targets).take(batch) {
            let mut choices = Vec::with_capacity(n_ues);
            let mut joint = 0.0f32;
            for ue_row in row.chunks_exact(n_targets) {
                let u: f32 = rng.gen();
                let mut cumsum = 0.0;
                let mut selected = n_targets - 1;
                for (k, lp) in ue_row.iter().enumerate() {
                    cumsum += lp.exp();
                    // last index absorbs rounding when the row sums just under 1
                    if u < cumsum || k == n_targets - 1 {
                        selected = k;
                        break;
                    }
                }
                joint += ue_row[selected];
                choices.push(selected);
            }
            samples.push(JointSample {
                choices,
                log_prob: joint,
            });
        }
        Ok(samples)
    }

    /// Most likely choice per UE.
    pub fn greedy(&self) -> Result<Vec<GreedyChoice>, HandoverError> {
        let log_probs = self.host_log_probs()?;
        let (batch, n_ues, n_targets) = (self.batch_size(), self.n_ues(), self.n_targets());

        let mut out = Vec::with_capacity(batch);
        for row in log_probs.chunks_exact(n_ues * n_targets).take(batch) {
            let mut choices = Vec::with_capacity(n_ues);
            let mut confidence = Vec::with_capacity(n_ues);
            let mut joint = 0.0f32;
            for ue_row in row.chunks_exact(n_targets) {
                let (best, lp) = ue_row
                    .iter()
                    .copied()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |acc, (k, lp)| {
                        if lp > acc.1 {
                            (k, lp)
                        } else {
                            acc
                        }
                    });
                choices.push(best);
                confidence.push(lp.exp());
                joint += lp;
            }
            out.push(GreedyChoice {
                choices,
                confidence,
                log_prob: joint,
            });
        }
        Ok(out)
    }

    /// Joint `log pi(a|s)` for flattened per-UE choices (`batch * J` entries).
    pub fn log_prob(&self, choices: &[i64], device: &B::Device) -> Tensor<B, 1> {
        let (batch, n_ues) = (self.batch_size(), self.n_ues());
        let indices: Tensor<B, 3, Int> =
            Tensor::<B, 1, Int>::from_ints(choices, device).reshape([batch, n_ues, 1]);
        self.log_probs
            .clone()
            .gather(2, indices)
            .sum_dim(1)
            .reshape([batch])
    }

    /// Joint entropy per row, the sum of per-UE entropies.
    pub fn entropy(&self) -> Tensor<B, 1> {
        let batch = self.batch_size();
        let neg = (self.probs() * self.log_probs.clone())
            .sum_dim(2)
            .sum_dim(1)
            .reshape([batch]);
        -neg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::ElementConversion;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256StarStar;

    type B = NdArray<f32>;

    fn net() -> HandoverNet<B> {
        HandoverNetConfig::new(3, 4, 16).init::<B>(&Default::default())
    }

    fn obs(batch: usize) -> Tensor<B, 2> {
        let size = leo_access_env::obs_size(3, 4);
        let data: Vec<f32> = (0..batch * size).map(|i| (i % 7) as f32 * 0.1).collect();
        Tensor::<B, 1>::from_floats(data.as_slice(), &Default::default()).reshape([batch, size])
    }

    #[test]
    fn test_forward_shapes() {
        let (policy, values) = net().forward(obs(5));
        assert_eq!(policy.log_probs.dims(), [5, 3, 4]);
        assert_eq!(values.dims(), [5]);
    }

    #[test]
    fn test_rows_are_distributions() {
        let (policy, _) = net().forward(obs(2));
        let sums = policy.probs().sum_dim(2).into_data().to_vec::<f32>().unwrap();
        for s in sums {
            assert!((s - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_sample_matches_log_prob() {
        let device = Default::default();
        let (policy, _) = net().forward(obs(4));
        let mut rng = Xoshiro256StarStar::seed_from_u64(3);
        let samples = policy.sample(&mut rng).unwrap();
        assert_eq!(samples.len(), 4);

        let flat: Vec<i64> = samples
            .iter()
            .flat_map(|s| s.choices.iter().map(|&c| c as i64))
            .collect();
        let lp = policy.log_prob(&flat, &device).into_data().to_vec::<f32>().unwrap();
        for (sample, lp) in samples.iter().zip(lp) {
            assert!(sample.choices.iter().all(|&c| c < 4));
            assert!((sample.log_prob - lp).abs() < 1e-4);
        }
    }

    #[test]
    fn test_greedy_picks_argmax() {
        let lp: Vec<f32> = vec![0.1f32, 0.7, 0.2, 0.6, 0.3, 0.1]
            .into_iter()
            .map(f32::ln)
            .collect();
        let log_probs =
            Tensor::<B, 1>::from_floats(lp.as_slice(), &Default::default()).reshape([1, 2, 3]);
        let greedy = JointPolicyOutput::new(log_probs).greedy().unwrap();
        assert_eq!(greedy[0].choices, vec![1, 0]);
        assert!((greedy[0].confidence[0] - 0.7).abs() < 1e-5);
        assert!((greedy[0].log_prob - (0.7f32 * 0.6).ln()).abs() < 1e-5);
    }

    #[test]
    fn test_uniform_entropy() {
        let log_probs = Tensor::<B, 3>::zeros([2, 3, 4], &Default::default())
            + (1.0f32 / 4.0).ln();
        let entropy = JointPolicyOutput::new(log_probs).entropy();
        let values = entropy.into_data().to_vec::<f32>().unwrap();
        for h in values {
            assert!((h - 3.0 * 4.0f32.ln()).abs() < 1e-4);
        }
    }

    #[test]
    fn test_snapshot_round_trip_preserves_outputs() {
        let device = Default::default();
        let source = net();
        let snapshot = source.to_snapshot(7, 70).unwrap();
        assert_eq!(snapshot.version, 7);

        let restored = net().load_snapshot(&snapshot, &device).unwrap();
        let (_, v1) = source.forward(obs(3));
        let (_, v2) = restored.forward(obs(3));
        let diff: f32 = (v1 - v2).abs().sum().into_scalar().elem();
        assert!(diff < 1e-6);
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error() {
        let snapshot = ParameterSnapshot::new(1, 1, vec![1, 2, 3], vec![4, 5]);
        let result = net().load_snapshot(&snapshot, &Default::default());
        assert!(matches!(result, Err(HandoverError::Snapshot(_))));
    }

    #[test]
    fn test_gradient_check_finds_non_finite_layer() {
        type TB = burn::backend::Autodiff<B>;
        let device = Default::default();
        let model = HandoverNetConfig::new(3, 4, 16).init::<TB>(&device);
        let input = || Tensor::<TB, 2>::from_data(obs(4).into_data(), &device);

        let (_, values) = model.forward(input());
        let grads = values.sum().backward();
        assert_eq!(model.non_finite_gradient(&grads).unwrap(), None);

        // sqrt has an infinite slope at zero: the loss stays 0, its gradient does not
        let (_, values) = model.forward(input());
        let loss = values.mul_scalar(0.0).sqrt().sum();
        let loss_value: f32 = loss.clone().into_scalar().elem();
        assert!(loss_value.is_finite());

        let grads = loss.backward();
        let flagged = model.non_finite_gradient(&grads).unwrap();
        assert!(matches!(flagged, Some(name) if name.starts_with("value")));
    }
}
