// ============================================================
// Layer 5 — Consistency Loss Engine
// ============================================================
// One LossEngine per run. The strategy is fixed when the engine
// is built; compute() is called once per training step.
//
//   Uda       — CE on labeled (TSA) + KL/MSE between the teacher
//               view of `original` and the student on `augmented`
//   UdaMixup  — Uda with the pooled vectors of the labeled and
//               unlabeled halves mixed independently
//   MixMatch  — sharpened guessed labels, global pooled mixup,
//               optional interleave, ramped-up consistency weight
//   SupMixup  — labeled data only, mixup inside the classifier
//
// Teacher passes are detached: their outputs are fixed targets.

use std::str::FromStr;

use burn::{
    prelude::*,
    tensor::activation::softmax,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::batcher::{LabeledBatch, TokenBatch, UnlabeledBatch};
use crate::domain::{
    error::{Result, UdaError},
    traits::MixupRng,
};
use crate::ml::{
    classifier::Classifier,
    loss::{
        confidence_mask, cross_entropy_per_example, masked_mean, one_hot, reduce_supervised,
        sharpen, soft_cross_entropy_per_example, UnsupCriterion,
    },
    mixup::{MixDraw, MixupMode, MixupPlan},
    schedule::{interleave, linear_rampup, TsaSchedule},
};

// ─── StrategyKind ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Uda,
    UdaMixup,
    MixMatch,
    SupMixup,
}

impl StrategyKind {
    pub fn uses_unlabeled(self) -> bool {
        !matches!(self, StrategyKind::SupMixup)
    }
}

impl FromStr for StrategyKind {
    type Err = UdaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "uda"                 => Ok(StrategyKind::Uda),
            "uda_mixup"           => Ok(StrategyKind::UdaMixup),
            "mixmatch"            => Ok(StrategyKind::MixMatch),
            "sup_mixup" | "sup"   => Ok(StrategyKind::SupMixup),
            other => Err(UdaError::config(format!(
                "unknown strategy '{other}' (expected uda, uda_mixup, mixmatch or sup_mixup)"
            ))),
        }
    }
}

// ─── LossConfig ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossConfig {
    pub strategy:             StrategyKind,
    pub tsa:                  TsaSchedule,
    pub unsup_criterion:      UnsupCriterion,
    /// Weight of the consistency term in Uda / UdaMixup
    pub uda_coeff:            f64,
    /// Student temperature (Uda) or sharpening temperature (MixMatch)
    pub softmax_temp:         f64,
    /// None disables confidence masking
    pub confidence_threshold: Option<f64>,
    pub mixup_alpha:          f64,
    /// Final consistency weight of the MixMatch ramp-up
    pub lambda_u:             f64,
    pub total_steps:          usize,
    pub sup_mixup:            bool,
    pub unsup_mixup:          bool,
    /// None trains SupMixup without mixing
    pub mixup_mode:           Option<MixupMode>,
    pub manifold_mixup:       bool,
    /// Mix with a second pass of the same ids instead of the rows themselves
    pub clone_path:           bool,
    pub detach_clone:         bool,
    pub interleave:           bool,
    pub use_sup_loss:         bool,
    pub use_unsup_loss:       bool,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            strategy:             StrategyKind::Uda,
            tsa:                  TsaSchedule::Linear,
            unsup_criterion:      UnsupCriterion::Kl,
            uda_coeff:            1.0,
            softmax_temp:         0.85,
            confidence_threshold: Some(0.45),
            mixup_alpha:          0.75,
            lambda_u:             75.0,
            total_steps:          10_000,
            sup_mixup:            false,
            unsup_mixup:          false,
            mixup_mode:           None,
            manifold_mixup:       false,
            clone_path:           false,
            detach_clone:         false,
            interleave:           false,
            use_sup_loss:         true,
            use_unsup_loss:       true,
        }
    }
}

impl LossConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.use_sup_loss && !self.use_unsup_loss {
            return Err(UdaError::config("at least one of the supervised and unsupervised losses must be enabled"));
        }
        if !self.strategy.uses_unlabeled() && !self.use_sup_loss {
            return Err(UdaError::config("sup_mixup has no unsupervised term; use_sup_loss must be on"));
        }

        let mixes = match self.strategy {
            StrategyKind::Uda      => false,
            StrategyKind::UdaMixup => self.sup_mixup || self.unsup_mixup,
            StrategyKind::MixMatch => true,
            StrategyKind::SupMixup => self.mixup_mode.is_some(),
        };
        if mixes && !(self.mixup_alpha > 0.0) {
            return Err(UdaError::config(format!("mixup alpha must be positive, got {}", self.mixup_alpha)));
        }
        if self.strategy == StrategyKind::MixMatch && !(self.softmax_temp > 0.0) {
            return Err(UdaError::config(format!(
                "mixmatch sharpening temperature must be positive, got {}",
                self.softmax_temp
            )));
        }
        if let Some(t) = self.confidence_threshold {
            if !(0.0..1.0).contains(&t) {
                return Err(UdaError::config(format!("confidence threshold must be in [0, 1), got {t}")));
            }
        }
        if self.uda_coeff < 0.0 || self.lambda_u < 0.0 {
            return Err(UdaError::config("uda_coeff and lambda_u must be non-negative"));
        }
        Ok(())
    }
}

// ─── LossOutput ───────────────────────────────────────────────────────────────
/// Scalar losses of one step, each shaped [1]
#[derive(Debug, Clone)]
pub struct LossOutput<B: Backend> {
    pub total:        Tensor<B, 1>,
    pub supervised:   Tensor<B, 1>,
    pub unsupervised: Option<Tensor<B, 1>>,
}

/// Host-side copies for logging
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossValues {
    pub total:        f64,
    pub supervised:   f64,
    pub unsupervised: Option<f64>,
}

impl<B: Backend> LossOutput<B> {
    pub fn values(&self) -> LossValues {
        let read = |t: &Tensor<B, 1>| t.clone().into_scalar().elem::<f64>();
        LossValues {
            total:        read(&self.total),
            supervised:   read(&self.supervised),
            unsupervised: self.unsupervised.as_ref().map(read),
        }
    }
}

// ─── LossEngine ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct LossEngine {
    config: LossConfig,
}

impl LossEngine {
    pub fn new(config: LossConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &LossConfig {
        &self.config
    }

    pub fn uses_unlabeled(&self) -> bool {
        self.config.strategy.uses_unlabeled()
    }

    /// Loss for one training step.
    ///
    /// `unlabeled` is ignored by SupMixup; when it is None every other
    /// strategy falls back to its supervised term alone.
    pub fn compute<B: Backend>(
        &self,
        model:     &Classifier<B>,
        labeled:   &LabeledBatch<B>,
        unlabeled: Option<&UnlabeledBatch<B>>,
        step:      usize,
        rng:       &mut dyn MixupRng,
    ) -> Result<LossOutput<B>> {
        model.check_input(labeled.tokens(), None)?;
        let unlabeled = unlabeled.filter(|_| self.uses_unlabeled());
        if let Some(u) = unlabeled {
            model.check_input(u.original(), None)?;
            model.check_input(u.augmented(), None)?;
        }

        match (self.config.strategy, unlabeled) {
            (StrategyKind::Uda, u)              => self.uda(model, labeled, u, step, None),
            (StrategyKind::UdaMixup, u)         => self.uda(model, labeled, u, step, Some(rng)),
            (StrategyKind::MixMatch, Some(u))   => self.mixmatch(model, labeled, u, step, rng),
            (StrategyKind::MixMatch, None)      => self.supervised_only(model, labeled, step),
            (StrategyKind::SupMixup, _)         => self.sup_mixup(model, labeled, step, rng),
        }
    }

    fn tsa_threshold(&self, step: usize, num_classes: usize) -> Option<f64> {
        self.config.tsa.threshold(step, self.config.total_steps, 1.0 / num_classes as f64, 1.0)
    }

    fn student_temperature(&self) -> f64 {
        if self.config.softmax_temp > 0.0 { self.config.softmax_temp } else { 1.0 }
    }

    fn combine<B: Backend>(
        &self,
        supervised:   Tensor<B, 1>,
        unsupervised: Option<Tensor<B, 1>>,
        weight:       f64,
    ) -> LossOutput<B> {
        let sup_part = if self.config.use_sup_loss {
            supervised.clone()
        } else {
            supervised.clone().mul_scalar(0.0)
        };
        let total = match &unsupervised {
            Some(u) if self.config.use_unsup_loss => sup_part + u.clone().mul_scalar(weight),
            _ => sup_part,
        };
        LossOutput { total, supervised, unsupervised }
    }

    // ─── Uda / UdaMixup ───────────────────────────────────────────────────────
    fn uda<B: Backend>(
        &self,
        model:     &Classifier<B>,
        labeled:   &LabeledBatch<B>,
        unlabeled: Option<&UnlabeledBatch<B>>,
        step:      usize,
        mut rng:   Option<&mut dyn MixupRng>,
    ) -> Result<LossOutput<B>> {
        let cfg      = &self.config;
        let sup_size = labeled.batch_size();
        let device   = labeled.tokens().device();

        let tokens = match unlabeled {
            Some(u) => TokenBatch::cat(vec![labeled.tokens().clone(), u.augmented().clone()])?,
            None    => labeled.tokens().clone(),
        };
        let hidden = model.pooled(&tokens, None);

        // UdaMixup draws one (λ, perm) per half; a disabled half stays at λ = 1.
        let mut draw = |enabled: bool, rows: usize| -> MixDraw<B> {
            match rng.as_deref_mut() {
                Some(r) if enabled => MixDraw::sample(r, cfg.mixup_alpha, rows, &device),
                _ => MixDraw::identity(rows, &device),
            }
        };
        let sup_draw = draw(cfg.sup_mixup, sup_size);

        let sup_hidden = sup_draw.mix(hidden.clone().narrow(0, 0, sup_size));
        let (logits, unsup_draw) = match unlabeled {
            Some(u) => {
                let unsup_draw   = draw(cfg.unsup_mixup, u.batch_size());
                let unsup_hidden = unsup_draw.mix(hidden.narrow(0, sup_size, u.batch_size()));
                (model.classify_pooled(Tensor::cat(vec![sup_hidden, unsup_hidden], 0)), Some(unsup_draw))
            }
            None => (model.classify_pooled(sup_hidden), None),
        };

        let sup_logits = logits.clone().narrow(0, 0, sup_size);
        let per_example = if cfg.strategy == StrategyKind::Uda {
            cross_entropy_per_example(sup_logits, labeled.labels().clone())
        } else {
            let targets = sup_draw.mix(one_hot(labeled.labels().clone(), model.num_classes));
            soft_cross_entropy_per_example(sup_logits, targets)
        };
        let supervised = reduce_supervised(per_example, self.tsa_threshold(step, model.num_classes));

        let (Some(u), Some(unsup_draw)) = (unlabeled, unsup_draw) else {
            return Ok(self.combine(supervised, None, cfg.uda_coeff));
        };

        let teacher = unsup_draw.mix(teacher_probs(model, u.original()));
        let mask    = confidence_mask(teacher.clone(), cfg.confidence_threshold);
        let student = logits.narrow(0, sup_size, u.batch_size());
        let per_example = cfg.unsup_criterion.per_example(student, teacher, self.student_temperature());
        let unsupervised = masked_mean(per_example, mask);

        Ok(self.combine(supervised, Some(unsupervised), cfg.uda_coeff))
    }

    // ─── MixMatch ─────────────────────────────────────────────────────────────
    fn mixmatch<B: Backend>(
        &self,
        model:     &Classifier<B>,
        labeled:   &LabeledBatch<B>,
        unlabeled: &UnlabeledBatch<B>,
        step:      usize,
        rng:       &mut dyn MixupRng,
    ) -> Result<LossOutput<B>> {
        let cfg         = &self.config;
        let sup_size    = labeled.batch_size();
        let unsup_size  = unlabeled.batch_size();
        let num_classes = model.num_classes;
        let device      = labeled.tokens().device();

        let guess = (teacher_probs(model, unlabeled.original()) + teacher_probs(model, unlabeled.augmented()))
            .div_scalar(2.0);
        let guessed = sharpen(guess, cfg.softmax_temp).detach();

        let targets = Tensor::cat(
            vec![one_hot(labeled.labels().clone(), num_classes), guessed.clone(), guessed],
            0,
        );
        let parts = vec![
            labeled.tokens().clone(),
            unlabeled.original().clone(),
            unlabeled.augmented().clone(),
        ];
        let draw = MixDraw::sample(rng, cfg.mixup_alpha, sup_size + 2 * unsup_size, &device);

        let (logits, targets) = if cfg.interleave {
            if unsup_size != sup_size {
                return Err(UdaError::shape(
                    "interleaved mixmatch batches (unlabeled rows)",
                    &[sup_size],
                    &[unsup_size],
                ));
            }
            // Mix in interleaved layout, then undo the interleave on
            // logits and targets alike.
            let chunks = interleave_tokens(parts)?;
            let pooled: Vec<Tensor<B, 2>> = chunks.iter().map(|t| model.pooled(t, None)).collect();
            let targets = Tensor::cat(interleave(split_rows(targets, sup_size, 3))?, 0);

            let mixed_h = draw.mix(Tensor::cat(pooled, 0));
            let mixed_t = draw.mix(targets);

            let logits: Vec<Tensor<B, 2>> = split_rows(mixed_h, sup_size, 3)
                .into_iter()
                .map(|h| model.classify_pooled(h))
                .collect();
            (
                Tensor::cat(interleave(logits)?, 0),
                Tensor::cat(interleave(split_rows(mixed_t, sup_size, 3))?, 0),
            )
        } else {
            let pooled = model.pooled(&TokenBatch::cat(parts)?, None);
            (model.classify_pooled(draw.mix(pooled)), draw.mix(targets))
        };

        let logits_x  = logits.clone().narrow(0, 0, sup_size);
        let logits_u  = logits.narrow(0, sup_size, 2 * unsup_size);
        let targets_x = targets.clone().narrow(0, 0, sup_size);
        let targets_u = targets.narrow(0, sup_size, 2 * unsup_size);

        let supervised = reduce_supervised(
            soft_cross_entropy_per_example(logits_x, targets_x),
            self.tsa_threshold(step, num_classes),
        );

        let mask = match cfg.unsup_criterion {
            UnsupCriterion::Kl  => confidence_mask(targets_u.clone(), cfg.confidence_threshold),
            UnsupCriterion::Mse => confidence_mask(targets_u.clone(), None),
        };
        let per_example  = cfg.unsup_criterion.per_example(logits_u, targets_u, 1.0);
        let unsupervised = masked_mean(per_example, mask);

        let weight = linear_rampup(step, cfg.total_steps, cfg.lambda_u);
        debug!(step, lambda = draw.lambda, weight, "mixmatch step");
        Ok(self.combine(supervised, Some(unsupervised), weight))
    }

    fn supervised_only<B: Backend>(
        &self,
        model:   &Classifier<B>,
        labeled: &LabeledBatch<B>,
        step:    usize,
    ) -> Result<LossOutput<B>> {
        let per_example = cross_entropy_per_example(model.forward(labeled.tokens()), labeled.labels().clone());
        let supervised  = reduce_supervised(per_example, self.tsa_threshold(step, model.num_classes));
        Ok(self.combine(supervised, None, 0.0))
    }

    // ─── SupMixup ─────────────────────────────────────────────────────────────
    fn sup_mixup<B: Backend>(
        &self,
        model:   &Classifier<B>,
        labeled: &LabeledBatch<B>,
        step:    usize,
        rng:     &mut dyn MixupRng,
    ) -> Result<LossOutput<B>> {
        let cfg     = &self.config;
        let tokens  = labeled.tokens();
        let targets = one_hot(labeled.labels().clone(), model.num_classes);

        let (logits, targets) = match cfg.mixup_mode {
            Some(mode) => {
                let point = mode.resolve(cfg.manifold_mixup, model.n_layers(), rng);
                let draw  = MixDraw::sample(rng, cfg.mixup_alpha, labeled.batch_size(), &tokens.device());
                let mut plan = MixupPlan::new(point, &draw);
                if cfg.clone_path {
                    plan = plan.with_clone_ids(tokens.input_ids().clone(), cfg.detach_clone);
                }
                model.check_input(tokens, Some(&plan))?;
                debug!(step, ?point, lambda = draw.lambda, "sup mixup step");
                (model.forward_mixed(tokens, &plan), draw.mix(targets))
            }
            None => (model.forward(tokens), targets),
        };

        let supervised = reduce_supervised(
            soft_cross_entropy_per_example(logits, targets),
            self.tsa_threshold(step, model.num_classes),
        );
        Ok(self.combine(supervised, None, 0.0))
    }
}

/// Detached class probabilities, used as fixed targets
fn teacher_probs<B: Backend>(model: &Classifier<B>, tokens: &TokenBatch<B>) -> Tensor<B, 2> {
    softmax(model.forward(tokens).detach(), 1)
}

/// `parts` consecutive row blocks of `size` rows each
fn split_rows<B: Backend>(x: Tensor<B, 2>, size: usize, parts: usize) -> Vec<Tensor<B, 2>> {
    (0..parts).map(|i| x.clone().narrow(0, i * size, size)).collect()
}

fn interleave_tokens<B: Backend>(batches: Vec<TokenBatch<B>>) -> Result<Vec<TokenBatch<B>>> {
    let mut ids  = Vec::with_capacity(batches.len());
    let mut segs = Vec::with_capacity(batches.len());
    let mut mask = Vec::with_capacity(batches.len());
    for batch in batches {
        let (i, s, m) = batch.into_parts();
        ids.push(i);
        segs.push(s);
        mask.push(m);
    }

    interleave(ids)?
        .into_iter()
        .zip(interleave(segs)?)
        .zip(interleave(mask)?)
        .map(|((i, s), m)| TokenBatch::new(i, s, m))
        .collect()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::rng::ScriptedRng;
    use crate::ml::testing::{labeled_batch, scalar, tiny_classifier, token_batch, unlabeled_batch, DIM};
    use burn::{
        backend::{Autodiff, NdArray},
        nn::{Initializer, LinearConfig},
    };

    type B = NdArray;

    fn engine(config: LossConfig) -> LossEngine {
        LossEngine::new(config).unwrap()
    }

    #[test]
    fn test_all_masked_unsup_loss_is_zero() {
        let device    = Default::default();
        let mut model = tiny_classifier::<B>(4, &device);
        model.output  = LinearConfig::new(DIM, 4).with_initializer(Initializer::Zeros).init(&device);

        let labeled   = labeled_batch::<B>(&[0, 1, 2, 3], 6, &device);
        let unlabeled = unlabeled_batch::<B>(4, 6, &device);
        let engine    = engine(LossConfig {
            tsa: TsaSchedule::None,
            confidence_threshold: Some(0.45),
            ..LossConfig::default()
        });

        let out    = engine.compute(&model, &labeled, Some(&unlabeled), 10, &mut ScriptedRng::constant(1.0)).unwrap();
        let values = out.values();
        assert_eq!(values.unsupervised, Some(0.0));
        assert_eq!(values.total, values.supervised);
        assert!((values.supervised - 4f64.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_uda_without_unlabeled_is_supervised_only() {
        let device  = Default::default();
        let model   = tiny_classifier::<B>(3, &device);
        let labeled = labeled_batch::<B>(&[0, 2], 5, &device);
        let out = engine(LossConfig::default())
            .compute(&model, &labeled, None, 0, &mut ScriptedRng::constant(1.0))
            .unwrap();
        assert!(out.unsupervised.is_none());
        assert_eq!(scalar(out.total), scalar(out.supervised));
    }

    #[test]
    fn test_identical_views_give_zero_kl() {
        let device  = Default::default();
        let model   = tiny_classifier::<B>(3, &device);
        let labeled = labeled_batch::<B>(&[0, 1], 5, &device);
        let view    = token_batch::<B>(2, 5, 4, &device);
        let pair    = UnlabeledBatch::new(view.clone(), view).unwrap();

        let engine = engine(LossConfig {
            softmax_temp: 1.0,
            confidence_threshold: None,
            ..LossConfig::default()
        });
        let out = engine.compute(&model, &labeled, Some(&pair), 0, &mut ScriptedRng::constant(1.0)).unwrap();
        assert!(out.values().unsupervised.unwrap().abs() < 1e-5);
    }

    #[test]
    fn test_uda_mixup_with_unit_lambda_matches_uda() {
        let device    = Default::default();
        let model     = tiny_classifier::<B>(3, &device);
        let labeled   = labeled_batch::<B>(&[0, 1, 2], 5, &device);
        let unlabeled = unlabeled_batch::<B>(3, 5, &device);
        let base      = LossConfig { tsa: TsaSchedule::None, confidence_threshold: None, ..LossConfig::default() };

        let plain = engine(base.clone())
            .compute(&model, &labeled, Some(&unlabeled), 5, &mut ScriptedRng::constant(1.0))
            .unwrap()
            .values();
        let mixed = engine(LossConfig {
            strategy: StrategyKind::UdaMixup,
            sup_mixup: true,
            unsup_mixup: true,
            ..base
        })
        .compute(&model, &labeled, Some(&unlabeled), 5, &mut ScriptedRng::with_permutation(1.0, vec![2, 0, 1]))
        .unwrap()
        .values();

        assert!((plain.total - mixed.total).abs() < 1e-5);
        assert!((plain.unsupervised.unwrap() - mixed.unsupervised.unwrap()).abs() < 1e-5);
    }

    fn mixmatch_config(interleave: bool) -> LossConfig {
        LossConfig {
            strategy: StrategyKind::MixMatch,
            unsup_criterion: UnsupCriterion::Mse,
            tsa: TsaSchedule::None,
            softmax_temp: 0.5,
            total_steps: 100,
            interleave,
            ..LossConfig::default()
        }
    }

    #[test]
    fn test_mixmatch_interleave_matches_plain_pass() {
        let device    = Default::default();
        let model     = tiny_classifier::<B>(2, &device);
        let labeled   = labeled_batch::<B>(&[0, 1, 1, 0], 6, &device);
        let unlabeled = unlabeled_batch::<B>(4, 6, &device);

        let plain = engine(mixmatch_config(false))
            .compute(&model, &labeled, Some(&unlabeled), 50, &mut ScriptedRng::constant(1.0))
            .unwrap()
            .values();
        let inter = engine(mixmatch_config(true))
            .compute(&model, &labeled, Some(&unlabeled), 50, &mut ScriptedRng::constant(1.0))
            .unwrap()
            .values();

        assert!((plain.supervised - inter.supervised).abs() < 1e-5);
        assert!((plain.unsupervised.unwrap() - inter.unsupervised.unwrap()).abs() < 1e-6);
        assert!((plain.total - inter.total).abs() < 1e-4);
    }

    #[test]
    fn test_mixmatch_rampup_starts_at_zero() {
        let device    = Default::default();
        let model     = tiny_classifier::<B>(2, &device);
        let labeled   = labeled_batch::<B>(&[0, 1], 6, &device);
        let unlabeled = unlabeled_batch::<B>(2, 6, &device);

        let out = engine(mixmatch_config(false))
            .compute(&model, &labeled, Some(&unlabeled), 0, &mut ScriptedRng::constant(0.3))
            .unwrap()
            .values();
        assert!(out.unsupervised.is_some());
        assert_eq!(out.total, out.supervised);
    }

    #[test]
    fn test_mixmatch_interleave_needs_equal_batches() {
        let device    = Default::default();
        let model     = tiny_classifier::<B>(2, &device);
        let labeled   = labeled_batch::<B>(&[0, 1, 1, 0], 6, &device);
        let unlabeled = unlabeled_batch::<B>(2, 6, &device);

        let err = engine(mixmatch_config(true))
            .compute(&model, &labeled, Some(&unlabeled), 0, &mut ScriptedRng::constant(1.0))
            .unwrap_err();
        assert!(matches!(err, UdaError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_sup_mixup_unit_lambda_matches_plain_ce() {
        let device  = Default::default();
        let model   = tiny_classifier::<B>(3, &device);
        let labeled = labeled_batch::<B>(&[2, 0, 1], 5, &device);

        let config = LossConfig {
            strategy: StrategyKind::SupMixup,
            tsa: TsaSchedule::None,
            mixup_mode: Some(MixupMode::WordCls),
            manifold_mixup: true,
            ..LossConfig::default()
        };
        let mut rng = ScriptedRng::with_permutation(1.0, vec![1, 2, 0]);
        rng.index   = 1;
        let out = engine(config).compute(&model, &labeled, None, 3, &mut rng).unwrap();
        assert!(out.unsupervised.is_none());

        let expected = cross_entropy_per_example(model.forward(labeled.tokens()), labeled.labels().clone()).mean();
        assert!((scalar(out.total) - scalar(expected)).abs() < 1e-5);
    }

    #[test]
    fn test_sup_mixup_clone_path_runs() {
        let device  = Default::default();
        let model   = tiny_classifier::<B>(2, &device);
        let labeled = labeled_batch::<B>(&[1, 0], 5, &device);
        let config  = LossConfig {
            strategy: StrategyKind::SupMixup,
            mixup_mode: Some(MixupMode::Word),
            manifold_mixup: true,
            clone_path: true,
            detach_clone: true,
            ..LossConfig::default()
        };
        let mut rng = ScriptedRng::with_permutation(0.6, vec![1, 0]);
        rng.index   = 1;
        let out = engine(config).compute(&model, &labeled, None, 0, &mut rng).unwrap();
        assert!(out.values().total.is_finite());
    }

    #[test]
    fn test_mismatched_augmented_length_rejected() {
        let device    = Default::default();
        let model     = tiny_classifier::<B>(2, &device);
        let labeled   = labeled_batch::<B>(&[0, 1], 6, &device);
        let unlabeled = unlabeled_batch::<B>(2, 5, &device);
        let err = engine(LossConfig::default())
            .compute(&model, &labeled, Some(&unlabeled), 0, &mut ScriptedRng::constant(1.0))
            .unwrap_err();
        assert!(matches!(err, UdaError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_disabled_unsup_loss_still_reported() {
        let device    = Default::default();
        let model     = tiny_classifier::<B>(2, &device);
        let labeled   = labeled_batch::<B>(&[0, 1], 6, &device);
        let unlabeled = unlabeled_batch::<B>(2, 6, &device);
        let out = engine(LossConfig { use_unsup_loss: false, confidence_threshold: None, ..LossConfig::default() })
            .compute(&model, &labeled, Some(&unlabeled), 0, &mut ScriptedRng::constant(1.0))
            .unwrap()
            .values();
        assert!(out.unsupervised.is_some());
        assert_eq!(out.total, out.supervised);
    }

    #[test]
    fn test_gradients_reach_the_output_layer() {
        type AB = Autodiff<NdArray>;
        let device    = Default::default();
        let model     = tiny_classifier::<AB>(3, &device);
        let labeled   = labeled_batch::<AB>(&[0, 1, 2], 5, &device);
        let unlabeled = unlabeled_batch::<AB>(3, 5, &device);

        let out = engine(LossConfig { confidence_threshold: None, ..LossConfig::default() })
            .compute(&model, &labeled, Some(&unlabeled), 1, &mut ScriptedRng::constant(1.0))
            .unwrap();
        let grads = out.total.backward();
        assert!(model.output.weight.val().grad(&grads).is_some());
    }

    #[test]
    fn test_config_validation() {
        assert!(LossConfig::default().validate().is_ok());
        let both_off = LossConfig { use_sup_loss: false, use_unsup_loss: false, ..LossConfig::default() };
        assert!(both_off.validate().is_err());
        let bad_alpha = LossConfig { strategy: StrategyKind::MixMatch, mixup_alpha: 0.0, ..LossConfig::default() };
        assert!(bad_alpha.validate().is_err());
        let bad_temp = LossConfig { strategy: StrategyKind::MixMatch, softmax_temp: -1.0, ..LossConfig::default() };
        assert!(bad_temp.validate().is_err());
        let bad_thresh = LossConfig { confidence_threshold: Some(1.5), ..LossConfig::default() };
        assert!(bad_thresh.validate().is_err());
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("MixMatch".parse::<StrategyKind>().unwrap(), StrategyKind::MixMatch);
        assert_eq!("uda_mixup".parse::<StrategyKind>().unwrap(), StrategyKind::UdaMixup);
        assert!(matches!("fixmatch".parse::<StrategyKind>(), Err(UdaError::InvalidConfig(_))));
    }
}
