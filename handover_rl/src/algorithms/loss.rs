//! IMPALA loss with V-trace targets.
//!
//! ```text
//! L = -mean(rho * log pi(a|s) * A)  +  vf_coef * mean((V(s) - v)^2)  -  entropy_coef * mean(H)
//! ```
//!
//! `rho`, `A` and `v` come from [`compute_vtrace`](super::vtrace::compute_vtrace)
//! and are constants here; gradients flow through `log pi`, `V` and `H`.

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor};

use crate::error::HandoverError;

/// Loss coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossWeights {
    pub vf_coef: f32,
    pub entropy_coef: f32,
}

/// Scalar loss parts for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossComponents {
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy: f32,
    pub total_loss: f32,
}

impl LossComponents {
    pub fn is_finite(&self) -> bool {
        self.policy_loss.is_finite()
            && self.value_loss.is_finite()
            && self.entropy.is_finite()
            && self.total_loss.is_finite()
    }

    /// `TrainingDivergence` naming the first non-finite part.
    pub fn check_finite(&self, train_step: u64) -> Result<(), HandoverError> {
        let parts = [
            ("policy loss", self.policy_loss),
            ("value loss", self.value_loss),
            ("entropy", self.entropy),
            ("total loss", self.total_loss),
        ];
        match parts.iter().find(|(_, v)| !v.is_finite()) {
            Some((name, value)) => Err(HandoverError::TrainingDivergence {
                train_step,
                reason: format!("{} is {}", name, value),
            }),
            None => Ok(()),
        }
    }
}

fn scalar<B: Backend>(t: &Tensor<B, 1>) -> f32 {
    t.clone().into_scalar().elem()
}

/// Combined IMPALA loss.
///
/// All inputs are `[n]` over the same steps.
pub fn impala_loss<B: Backend>(
    target_log_probs: Tensor<B, 1>,
    entropy: Tensor<B, 1>,
    values: Tensor<B, 1>,
    rhos: Tensor<B, 1>,
    advantages: Tensor<B, 1>,
    vs: Tensor<B, 1>,
    weights: LossWeights,
) -> (Tensor<B, 1>, LossComponents) {
    let policy_loss = -(rhos * target_log_probs * advantages).mean();
    let value_loss = (values - vs).powf_scalar(2.0).mean();
    let mean_entropy = entropy.mean();

    let total = policy_loss.clone() + value_loss.clone().mul_scalar(weights.vf_coef)
        - mean_entropy.clone().mul_scalar(weights.entropy_coef);

    let components = LossComponents {
        policy_loss: scalar(&policy_loss),
        value_loss: scalar(&value_loss),
        entropy: scalar(&mean_entropy),
        total_loss: scalar(&total),
    };

    (total, components)
}
