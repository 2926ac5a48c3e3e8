// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates one training run in order:
//
//   Step 1: Validate the run configuration
//   Step 2: Read labeled TSV            (Layer 4 - data)
//   Step 3: Read unlabeled TSV          (Layer 4 - data, if the
//                                        strategy uses it)
//   Step 4: Read eval TSV               (Layer 4 - data, optional)
//   Step 5: Save config                 (Layer 6 - infra)
//   Step 6: Run training loop           (Layer 5 - ml)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::data::{
    dataset::{LabeledDataset, UnlabeledDataset},
    loader::TsvExampleReader,
};
use crate::domain::{
    error::UdaError,
    traits::ExampleSource,
};
use crate::infra::{checkpoint::CheckpointManager, metrics::MetricsLogger};
use crate::ml::{
    config::{ClassifierConfig, ModelConfig},
    strategy::{LossConfig, StrategyKind},
    trainer::{run_training, TrainData, TrainSummary},
};

// ─── Run Configuration ───────────────────────────────────────────────────────
// Everything one run needs. Saved next to the checkpoints so
// `eval` can rebuild the same classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub sup_data:         PathBuf,
    pub unsup_data:       Option<PathBuf>,
    pub eval_data:        Option<PathBuf>,
    pub checkpoint_dir:   PathBuf,
    pub model:            ModelConfig,
    pub num_classes:      usize,
    pub loss:             LossConfig,
    pub train_batch_size: usize,
    pub eval_batch_size:  usize,
    /// Unlabeled rows per labeled row in each step
    pub unsup_ratio:      usize,
    pub lr:               f64,
    pub use_ema:          bool,
    pub ema_decay:        f64,
    pub seed:             u64,
    pub log_every:        usize,
    /// 0 disables periodic evaluation
    pub eval_every:       usize,
    /// 0 disables periodic checkpoints; the final one is always written
    pub save_every:       usize,
    /// Checkpoint directory of an earlier run to take initial weights from
    #[serde(default)]
    pub init_checkpoint:  Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            sup_data:         PathBuf::from("data/train_sup.tsv"),
            unsup_data:       Some(PathBuf::from("data/train_unsup.tsv")),
            eval_data:        Some(PathBuf::from("data/eval.tsv")),
            checkpoint_dir:   PathBuf::from("checkpoints"),
            model:            ModelConfig::new(30522),
            num_classes:      2,
            loss:             LossConfig::default(),
            train_batch_size: 8,
            eval_batch_size:  32,
            unsup_ratio:      3,
            lr:               2e-5,
            use_ema:          false,
            ema_decay:        0.999,
            seed:             42,
            log_every:        100,
            eval_every:       500,
            save_every:       1000,
            init_checkpoint:  None,
        }
    }
}

impl RunConfig {
    pub fn classifier(&self) -> ClassifierConfig {
        ClassifierConfig::new(self.model.clone(), self.num_classes)
    }

    pub fn unsup_batch_size(&self) -> usize {
        self.train_batch_size * self.unsup_ratio
    }

    pub fn validate(&self) -> std::result::Result<(), UdaError> {
        self.classifier().validate()?;
        self.loss.validate()?;

        if self.train_batch_size == 0 || self.eval_batch_size == 0 {
            return Err(UdaError::config("batch sizes must be positive"));
        }
        if self.loss.strategy.uses_unlabeled() {
            if self.unsup_ratio == 0 {
                return Err(UdaError::config("unsup_ratio must be at least 1"));
            }
            if self.unsup_data.is_none() {
                return Err(UdaError::config(format!(
                    "strategy {:?} needs an unlabeled data file",
                    self.loss.strategy
                )));
            }
        }
        if self.loss.strategy == StrategyKind::MixMatch && self.loss.interleave && self.unsup_ratio != 1 {
            return Err(UdaError::config("interleave needs equal labeled and unlabeled batches (unsup_ratio 1)"));
        }
        if !(self.lr > 0.0) {
            return Err(UdaError::config(format!("learning rate must be positive, got {}", self.lr)));
        }
        if !(0.0..=1.0).contains(&self.ema_decay) {
            return Err(UdaError::config(format!("ema_decay must be in [0, 1], got {}", self.ema_decay)));
        }
        if self.log_every == 0 {
            return Err(UdaError::config("log_every must be positive"));
        }
        if self.loss.total_steps == 0 {
            return Err(UdaError::config("total_steps must be positive"));
        }
        Ok(())
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: RunConfig,
}

impl TrainUseCase {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<TrainSummary> {
        let cfg = &self.config;

        // ── Step 1: Validate ──────────────────────────────────────────────────
        cfg.validate().context("Invalid run configuration")?;
        tracing::info!(
            "Strategy {:?}, {} steps, batch {} (unlabeled {})",
            cfg.loss.strategy,
            cfg.loss.total_steps,
            cfg.train_batch_size,
            if cfg.loss.strategy.uses_unlabeled() { cfg.unsup_batch_size() } else { 0 },
        );

        // ── Step 2: Labeled data ──────────────────────────────────────────────
        let sup_rows = TsvExampleReader::labeled(&cfg.sup_data, cfg.num_classes)
            .load_all()
            .with_context(|| format!("Cannot read labeled data '{}'", cfg.sup_data.display()))?;
        let labeled = LabeledDataset::new(sup_rows, cfg.num_classes)?;
        labeled.check_model(&cfg.model).context("Labeled data does not fit the model")?;
        tracing::info!("Class counts: {:?}", labeled.class_counts(cfg.num_classes));

        // ── Step 3: Unlabeled data ────────────────────────────────────────────
        let unlabeled = match (&cfg.unsup_data, cfg.loss.strategy.uses_unlabeled()) {
            (Some(path), true) => {
                let rows = TsvExampleReader::unlabeled(path)
                    .load_all()
                    .with_context(|| format!("Cannot read unlabeled data '{}'", path.display()))?;
                let dataset = UnlabeledDataset::new(rows)?;
                dataset.check_model(&cfg.model).context("Unlabeled data does not fit the model")?;
                Some(dataset)
            }
            (Some(path), false) => {
                tracing::warn!("Strategy {:?} ignores unlabeled data '{}'", cfg.loss.strategy, path.display());
                None
            }
            (None, _) => None,
        };

        // ── Step 4: Eval data ─────────────────────────────────────────────────
        let eval = match &cfg.eval_data {
            Some(path) => {
                let rows = TsvExampleReader::labeled(path, cfg.num_classes)
                    .load_all()
                    .with_context(|| format!("Cannot read eval data '{}'", path.display()))?;
                let dataset = LabeledDataset::new(rows, cfg.num_classes)?;
                dataset.check_model(&cfg.model).context("Eval data does not fit the model")?;
                Some(dataset)
            }
            None => None,
        };

        // ── Step 5: Save config for eval ──────────────────────────────────────
        let ckpt_manager = CheckpointManager::new(&cfg.checkpoint_dir)?;
        ckpt_manager.save_config(cfg)?;
        let metrics = MetricsLogger::new(&cfg.checkpoint_dir)?;

        // ── Step 6: Run training loop (Layer 5) ───────────────────────────────
        run_training(cfg, TrainData { labeled, unlabeled, eval }, &ckpt_manager, &metrics)
    }
}
