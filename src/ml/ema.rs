// ============================================================
// Layer 5 — EMA Teacher
// ============================================================
// Exponential moving average of the trainable model's weights:
//
//   teacher ← α · teacher + (1 − α) · trainable
//
// followed by a separate weight-decay shrink of the trainable
// model itself:
//
//   trainable ← (1 − 0.02 · lr) · trainable
//
// Both are pure transforms over owned modules. The teacher is a
// `no_grad()` clone of the trainable model and is never handed to
// the optimizer.
//
// Parameters are paired by traversal order: a ModuleVisitor
// collects the trainable tensors, a ModuleMapper walks the teacher
// in the same order and blends each tensor in.

use burn::{
    module::{Module, ModuleMapper, ModuleVisitor, ParamId},
    prelude::*,
};

use crate::domain::error::{Result, UdaError};

/// Weight-decay factor relative to the learning rate
const DECAY_PER_LR: f64 = 0.02;

struct ParamCollector<B: Backend> {
    params: Vec<Tensor<B, 1>>,
}

impl<B: Backend> ModuleVisitor<B> for ParamCollector<B> {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        let numel = tensor.dims().iter().product::<usize>();
        self.params.push(tensor.clone().detach().reshape([numel]));
    }
}

struct EmaBlend<B: Backend> {
    source:     std::vec::IntoIter<Tensor<B, 1>>,
    decay:      f64,
    visited:    usize,
    mismatched: usize,
}

impl<B: Backend> ModuleMapper<B> for EmaBlend<B> {
    fn map_float<const D: usize>(&mut self, _id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        let dims  = tensor.dims();
        let numel = dims.iter().product::<usize>();
        self.visited += 1;
        match self.source.next() {
            Some(src) if src.dims()[0] == numel => {
                let require_grad = tensor.is_require_grad();
                let blended = tensor.mul_scalar(self.decay)
                    + src.reshape(dims).mul_scalar(1.0 - self.decay);
                // Only a detached leaf may be marked as tracked again
                blended.detach().set_require_grad(require_grad)
            }
            _ => {
                self.mismatched += 1;
                tensor
            }
        }
    }
}

struct Shrink {
    factor: f64,
}

impl<B: Backend> ModuleMapper<B> for Shrink {
    fn map_float<const D: usize>(&mut self, _id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        let require_grad = tensor.is_require_grad();
        tensor.mul_scalar(self.factor).detach().set_require_grad(require_grad)
    }
}

/// New teacher = decay · teacher + (1 − decay) · trainable.
///
/// Fails if the two modules do not have the same parameter layout.
pub fn ema_update<B: Backend, M: Module<B>>(trainable: &M, teacher: M, decay: f64) -> Result<M> {
    let mut collector = ParamCollector { params: Vec::new() };
    trainable.visit(&mut collector);
    let expected = collector.params.len();

    let mut blend = EmaBlend { source: collector.params.into_iter(), decay, visited: 0, mismatched: 0 };
    let teacher   = teacher.map(&mut blend);

    if blend.mismatched > 0 || blend.source.len() > 0 {
        return Err(UdaError::shape(
            format!("EMA teacher parameters ({} differ in size)", blend.mismatched),
            &[expected],
            &[blend.visited],
        ));
    }
    Ok(teacher)
}

/// trainable · (1 − 0.02 · lr)
pub fn apply_weight_decay<B: Backend, M: Module<B>>(trainable: M, lr: f64) -> M {
    trainable.map(&mut Shrink { factor: 1.0 - DECAY_PER_LR * lr })
}

/// Decay and learning rate of one run's EMA teacher.
#[derive(Debug, Clone, Copy)]
pub struct WeightEma {
    pub decay: f64,
    pub lr:    f64,
}

impl WeightEma {
    pub fn new(decay: f64, lr: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&decay) {
            return Err(UdaError::config(format!("EMA decay must be in [0, 1], got {decay}")));
        }
        Ok(Self { decay, lr })
    }

    /// Teacher starts as a frozen copy of the trainable model.
    pub fn init_teacher<B: Backend, M: Module<B>>(&self, trainable: &M) -> M {
        trainable.clone().no_grad()
    }

    /// One post-optimizer update: blend the teacher, then shrink the trainable weights.
    pub fn step<B: Backend, M: Module<B>>(&self, trainable: M, teacher: M) -> Result<(M, M)> {
        let teacher = ema_update(&trainable, teacher, self.decay)?;
        Ok((apply_weight_decay(trainable, self.lr), teacher))
    }
}
