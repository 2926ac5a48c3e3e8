// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Appends training metrics to a CSV file every `log_every` steps
// (and after each evaluation).
//
// Metrics recorded per row:
//   - step:       optimizer step the row refers to
//   - total_loss: loss the optimizer minimised
//   - sup_loss:   supervised component
//   - unsup_loss: unsupervised component, empty for supervised runs
//   - eval_acc:   accuracy on the eval set, empty between evaluations
//
// Output file: <checkpoint_dir>/metrics.csv
//
//   step,total_loss,sup_loss,unsup_loss,eval_acc
//   100,1.203100,0.981000,0.222100,
//   500,0.710400,0.512300,0.198100,0.734000
//
// The header is written only when the file is new, so a resumed
// run keeps appending to the same log.

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

use crate::ml::strategy::LossValues;

const HEADER: &str = "step,total_loss,sup_loss,unsup_loss,eval_acc";

/// One row of the metrics CSV
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepMetrics {
    pub step:       usize,
    pub total_loss: f64,
    pub sup_loss:   f64,
    /// None for strategies without an unsupervised term
    pub unsup_loss: Option<f64>,
    pub eval_acc:   Option<f64>,
}

impl StepMetrics {
    pub fn from_losses(step: usize, losses: &LossValues) -> Self {
        Self {
            step,
            total_loss: losses.total,
            sup_loss:   losses.supervised,
            unsup_loss: losses.unsupervised,
            eval_acc:   None,
        }
    }

    pub fn with_eval_acc(mut self, acc: f64) -> Self {
        self.eval_acc = Some(acc);
        self
    }

    fn csv_row(&self) -> String {
        let opt = |v: Option<f64>| v.map(|x| format!("{x:.6}")).unwrap_or_default();
        format!(
            "{},{:.6},{:.6},{},{}",
            self.step,
            self.total_loss,
            self.sup_loss,
            opt(self.unsup_loss),
            opt(self.eval_acc),
        )
    }
}

/// Append-only CSV log of StepMetrics rows.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create metrics directory '{}'", dir.display()))?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "{HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &StepMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;
        writeln!(f, "{}", m.csv_row())?;

        tracing::debug!("Logged step {} metrics: total_loss={:.4}", m.step, m.total_loss);
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}
