// ============================================================
// Layer 2 — Eval Use Case
// ============================================================
// Rebuilds a trained classifier from its checkpoint directory
// and reports accuracy on a labeled TSV file:
//
//   1. Load run_config.json           (Layer 6 - infra)
//   2. Rebuild the classifier shape   (Layer 5 - ml)
//   3. Load model or EMA weights      (Layer 6 - infra)
//   4. Read the eval TSV              (Layer 4 - data)
//   5. Mean accuracy over all rows    (Layer 5 - ml)

use anyhow::{Context, Result};
use burn::data::dataloader::DataLoaderBuilder;
use std::path::PathBuf;

use crate::data::{batcher::LabeledBatcher, dataset::LabeledDataset, loader::TsvExampleReader};
use crate::domain::traits::ExampleSource;
use crate::infra::checkpoint::{CheckpointManager, Weights};
use crate::ml::evaluator::evaluate_dataset;

type EvalBackend = burn::backend::Wgpu;

pub struct EvalUseCase {
    checkpoint_dir: PathBuf,
    /// Falls back to the eval file recorded in the run config
    eval_data:      Option<PathBuf>,
    use_ema:        bool,
}

impl EvalUseCase {
    pub fn new(checkpoint_dir: impl Into<PathBuf>, eval_data: Option<PathBuf>, use_ema: bool) -> Self {
        Self { checkpoint_dir: checkpoint_dir.into(), eval_data, use_ema }
    }

    /// Accuracy in [0, 1]
    pub fn execute(&self) -> Result<f64> {
        let ckpt = CheckpointManager::new(&self.checkpoint_dir)?;
        let cfg  = ckpt.load_config()?;

        let path = self
            .eval_data
            .clone()
            .or_else(|| cfg.eval_data.clone())
            .context("No eval data given and none recorded in the run config")?;

        let device = burn::backend::wgpu::WgpuDevice::default();
        let which  = if self.use_ema { Weights::Teacher } else { Weights::Model };
        let model  = ckpt.load(cfg.classifier().init::<EvalBackend>(&device), which, &device)?;

        let rows = TsvExampleReader::labeled(&path, cfg.num_classes)
            .load_all()
            .with_context(|| format!("Cannot read eval data '{}'", path.display()))?;
        let dataset = LabeledDataset::new(rows, cfg.num_classes)?;
        dataset.check_model(&cfg.model).context("Eval data does not fit the model")?;
        tracing::info!("Evaluating {:?} weights on '{}'", which, path.display());

        let loader = DataLoaderBuilder::new(LabeledBatcher::<EvalBackend>::new(device))
            .batch_size(cfg.eval_batch_size)
            .num_workers(1)
            .build(dataset);

        Ok(evaluate_dataset(&model, loader.as_ref()))
    }
}
