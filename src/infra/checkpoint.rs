// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores classifier weights using Burn's
// CompactRecorder.
//
// What gets saved:
//   1. Model weights (.mpk.gz)     — the trainable classifier
//   2. EMA teacher weights         — only when EMA is enabled
//   3. latest_step.json            — which step was last saved
//   4. run_config.json             — architecture + loss options
//
// The run config is needed to rebuild a classifier of the same
// shape before its weights can be loaded into it. A new run can
// warm-start from another run's directory the same way.
//
// File naming convention:
//   checkpoints/
//     model_steps_500.mpk.gz
//     teacher_steps_500.mpk.gz
//     latest_step.json
//     run_config.json
//     metrics.csv
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{bail, Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};

use crate::application::train_use_case::RunConfig;
use crate::ml::classifier::Classifier;

const LATEST_STEP: &str = "latest_step.json";
const RUN_CONFIG:  &str = "run_config.json";

/// Which set of weights a checkpoint file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weights {
    Model,
    Teacher,
}

impl Weights {
    fn prefix(self) -> &'static str {
        match self {
            Weights::Model   => "model",
            Weights::Teacher => "teacher",
        }
    }
}

/// Manages saving and loading of classifier checkpoints.
/// All files are stored in the configured directory.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Opens the directory of an earlier run without creating it.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            bail!("Checkpoint directory '{}' does not exist", dir.display());
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn weights_path(&self, which: Weights, step: usize) -> PathBuf {
        // No extension: the recorder adds it
        self.dir.join(format!("{}_steps_{step}", which.prefix()))
    }

    fn save<B: Backend>(&self, model: &Classifier<B>, which: Weights, step: usize) -> Result<()> {
        let path = self.weights_path(which, step);
        CompactRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;
        tracing::debug!("Saved {} weights at step {}", which.prefix(), step);
        Ok(())
    }

    /// Saves the trainable model and moves the latest-step pointer.
    pub fn save_model<B: Backend>(&self, model: &Classifier<B>, step: usize) -> Result<()> {
        self.save(model, Weights::Model, step)?;

        let latest_path = self.dir.join(LATEST_STEP);
        fs::write(&latest_path, serde_json::to_string(&step)?)
            .with_context(|| format!("Failed to write {LATEST_STEP}"))?;
        Ok(())
    }

    /// Saves the EMA teacher. Call before `save_model` for the same step.
    pub fn save_teacher<B: Backend>(&self, teacher: &Classifier<B>, step: usize) -> Result<()> {
        self.save(teacher, Weights::Teacher, step)
    }

    /// Loads weights of the latest saved step into `model`.
    ///
    /// `model` must have the architecture that was saved.
    pub fn load<B: Backend>(
        &self,
        model:  Classifier<B>,
        which:  Weights,
        device: &B::Device,
    ) -> Result<Classifier<B>> {
        let step = self.latest_step()?;
        let path = self.weights_path(which, step);

        tracing::info!("Loading {} weights from step {}", which.prefix(), step);

        let record = CompactRecorder::new()
            .load(path.clone(), device)
            .with_context(|| {
                format!("Cannot load checkpoint '{}'. Was it saved by 'train'?", path.display())
            })?;
        Ok(model.load_record(record))
    }

    /// Loads this run's latest trainable weights into a freshly built
    /// classifier of a new run. The two runs must share a model shape.
    pub fn warm_start<B: Backend>(
        &self,
        model:  Classifier<B>,
        cfg:    &RunConfig,
        device: &B::Device,
    ) -> Result<Classifier<B>> {
        let saved = self.load_config()?;
        if !saved.model.same_shape(&cfg.model) || saved.num_classes != cfg.num_classes {
            bail!(
                "Cannot warm-start from '{}': it holds a {}-layer dim={} model with {} classes, \
                 this run builds a {}-layer dim={} model with {} classes",
                self.dir.display(),
                saved.model.n_layers, saved.model.dim, saved.num_classes,
                cfg.model.n_layers, cfg.model.dim, cfg.num_classes,
            );
        }
        tracing::info!("Warm-starting from '{}'", self.dir.display());
        self.load(model, Weights::Model, device)
    }

    pub fn save_config(&self, cfg: &RunConfig) -> Result<()> {
        let path = self.dir.join(RUN_CONFIG);
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;

        tracing::debug!("Saved run config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<RunConfig> {
        let path = self.dir.join(RUN_CONFIG);
        let json = fs::read_to_string(&path).with_context(|| {
            format!(
                "Cannot read config from '{}'. Make sure you have run 'train' before 'eval'.",
                path.display()
            )
        })?;
        serde_json::from_str(&json)
            .with_context(|| format!("Malformed run config '{}'", path.display()))
    }

    /// Returns an error if nothing has been saved yet.
    pub fn latest_step(&self) -> Result<usize> {
        let path = self.dir.join(LATEST_STEP);
        let s = fs::read_to_string(&path)
            .with_context(|| format!("Cannot find '{LATEST_STEP}'. Have you run 'train' first?"))?;
        Ok(serde_json::from_str::<usize>(&s)?)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::testing::{tiny_classifier, tiny_config, token_batch};
    use burn::backend::NdArray;

    type B = NdArray;

    #[test]
    fn test_config_round_trip() {
        let dir     = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let mut cfg = RunConfig::default();
        cfg.num_classes = 5;
        cfg.seed        = 7;

        manager.save_config(&cfg).unwrap();
        let loaded = manager.load_config().unwrap();
        assert_eq!(loaded.num_classes, 5);
        assert_eq!(loaded.seed, 7);
        assert_eq!(loaded.model.dim, cfg.model.dim);
    }

    #[test]
    fn test_weights_restore_predictions() {
        let device  = Default::default();
        let dir     = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();

        let saved = tiny_classifier::<B>(3, &device);
        manager.save_teacher(&saved, 4).unwrap();
        manager.save_model(&saved, 4).unwrap();
        assert_eq!(manager.latest_step().unwrap(), 4);

        let tokens   = token_batch::<B>(2, 5, 0, &device);
        let expected: Vec<f32> = saved.forward(&tokens).into_data().to_vec().unwrap();

        for which in [Weights::Model, Weights::Teacher] {
            let fresh    = tiny_classifier::<B>(3, &device);
            let restored = manager.load(fresh, which, &device).unwrap();
            let actual: Vec<f32> = restored.forward(&tokens).into_data().to_vec().unwrap();
            // Weights are stored in half precision
            for (a, e) in actual.iter().zip(&expected) {
                assert!((a - e).abs() < 1e-2, "{which:?}: {a} vs {e}");
            }
        }
    }

    #[test]
    fn test_warm_start_restores_trained_weights() {
        let device  = Default::default();
        let dir     = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let mut cfg = RunConfig::default();
        cfg.model       = tiny_config(3).model;
        cfg.num_classes = 3;

        let saved = tiny_classifier::<B>(3, &device);
        manager.save_config(&cfg).unwrap();
        manager.save_model(&saved, 10).unwrap();

        let tokens   = token_batch::<B>(2, 5, 0, &device);
        let expected: Vec<f32> = saved.forward(&tokens).into_data().to_vec().unwrap();

        let source   = CheckpointManager::open(dir.path()).unwrap();
        let restored = source.warm_start(tiny_classifier::<B>(3, &device), &cfg, &device).unwrap();
        let actual: Vec<f32> = restored.forward(&tokens).into_data().to_vec().unwrap();
        for (a, e) in actual.iter().zip(&expected) {
            assert!((a - e).abs() < 1e-2);
        }
    }

    #[test]
    fn test_warm_start_rejects_other_shape() {
        let device  = Default::default();
        let dir     = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let mut cfg = RunConfig::default();
        cfg.model       = tiny_config(3).model;
        cfg.num_classes = 3;
        manager.save_config(&cfg).unwrap();
        manager.save_model(&tiny_classifier::<B>(3, &device), 1).unwrap();

        let mut other = cfg.clone();
        other.num_classes = 2;
        let err = manager.warm_start(tiny_classifier::<B>(2, &device), &other, &device).unwrap_err();
        assert!(err.to_string().contains("Cannot warm-start"));

        assert!(CheckpointManager::open(dir.path().join("nowhere")).is_err());
    }

    #[test]
    fn test_missing_checkpoint_is_error() {
        let dir     = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        assert!(manager.latest_step().is_err());
        assert!(manager.load_config().is_err());
    }
}
