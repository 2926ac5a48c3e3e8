// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands: `train` and `eval`
// and all their configurable flags.
//
// Option names (strategy, TSA schedule, criterion, mixup mode)
// arrive as strings and are parsed in TryFrom<TrainArgs>, so an
// unknown name stops the run before any data is read.
//
// Reference: Rust Book §12 (Building a CLI Program)

use anyhow::{anyhow, Context, Result};
use burn::config::Config;
use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::application::train_use_case::RunConfig;
use crate::ml::{
    config::ModelConfig,
    loss::UnsupCriterion,
    mixup::MixupMode,
    schedule::TsaSchedule,
    strategy::{LossConfig, StrategyKind},
};

/// The two top-level subcommands available to the user
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a classifier on pre-tokenised TSV data
    Train(TrainArgs),

    /// Report accuracy of a saved checkpoint
    Eval(EvalArgs),
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    // ── Data ──────────────────────────────────────────────────────────────────
    /// Labeled TSV: input_ids, input_mask, segment_ids, label
    #[arg(long, default_value = "data/train_sup.tsv")]
    pub sup_data: PathBuf,

    /// Unlabeled TSV with ori_* and aug_* columns
    #[arg(long)]
    pub unsup_data: Option<PathBuf>,

    /// Labeled TSV used for periodic evaluation
    #[arg(long)]
    pub eval_data: Option<PathBuf>,

    /// Directory for checkpoints, run config and metrics.csv
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: PathBuf,

    /// Checkpoint directory of an earlier run to start from
    /// (its latest trainable weights; the model shape must match)
    #[arg(long)]
    pub init_checkpoint: Option<PathBuf>,

    // ── Model ─────────────────────────────────────────────────────────────────
    /// JSON model config; overrides the shape flags below
    #[arg(long)]
    pub model_cfg: Option<PathBuf>,

    #[arg(long, default_value_t = 30522)]
    pub vocab_size: usize,

    #[arg(long, default_value_t = 768)]
    pub dim: usize,

    #[arg(long, default_value_t = 12)]
    pub n_layers: usize,

    /// dim must be divisible by n_heads
    #[arg(long, default_value_t = 12)]
    pub n_heads: usize,

    #[arg(long, default_value_t = 3072)]
    pub dim_ff: usize,

    #[arg(long, default_value_t = 0.1)]
    pub p_drop_hidden: f64,

    #[arg(long, default_value_t = 0.1)]
    pub p_drop_attn: f64,

    #[arg(long, default_value_t = 512)]
    pub max_len: usize,

    #[arg(long, default_value_t = 2)]
    pub num_classes: usize,

    // ── Loss ──────────────────────────────────────────────────────────────────
    /// uda, uda_mixup, mixmatch or sup_mixup
    #[arg(long, default_value = "uda")]
    pub strategy: String,

    /// none, linear, exp or log [default: linear, none for mixmatch]
    #[arg(long)]
    pub tsa: Option<String>,

    /// kl or mse
    #[arg(long, default_value = "kl")]
    pub unsup_criterion: String,

    #[arg(long, default_value_t = 1.0)]
    pub uda_coeff: f64,

    /// Student temperature (UDA) or sharpening temperature (MixMatch)
    #[arg(long, default_value_t = 0.85)]
    pub softmax_temp: f64,

    /// Negative disables confidence masking
    #[arg(long, default_value_t = 0.45, allow_negative_numbers = true)]
    pub confidence_thresh: f64,

    #[arg(long, default_value_t = 0.75)]
    pub mixup_alpha: f64,

    #[arg(long, default_value_t = 75.0)]
    pub lambda_u: f64,

    #[arg(long, default_value_t = 10_000)]
    pub total_steps: usize,

    #[arg(long)]
    pub sup_mixup: bool,

    #[arg(long)]
    pub unsup_mixup: bool,

    /// word, word_cls, cls or word_cls_only
    #[arg(long)]
    pub mixup_mode: Option<String>,

    #[arg(long)]
    pub manifold_mixup: bool,

    #[arg(long)]
    pub clone_path: bool,

    #[arg(long)]
    pub detach_clone: bool,

    /// Interleave labeled and unlabeled rows (MixMatch, unsup_ratio 1)
    #[arg(long)]
    pub interleave: bool,

    /// Report the supervised loss without optimising it
    #[arg(long)]
    pub no_sup_loss: bool,

    /// Report the unsupervised loss without optimising it
    #[arg(long)]
    pub no_unsup_loss: bool,

    // ── Optimisation ──────────────────────────────────────────────────────────
    #[arg(long, default_value_t = 8)]
    pub train_batch_size: usize,

    #[arg(long, default_value_t = 32)]
    pub eval_batch_size: usize,

    /// Unlabeled rows per labeled row
    #[arg(long, default_value_t = 3)]
    pub unsup_ratio: usize,

    #[arg(long, default_value_t = 2e-5)]
    pub lr: f64,

    /// Keep an EMA teacher (always on for mixmatch unless --no-ema)
    #[arg(long)]
    pub use_ema: bool,

    #[arg(long, conflicts_with = "use_ema")]
    pub no_ema: bool,

    #[arg(long, default_value_t = 0.999)]
    pub ema_decay: f64,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[arg(long, default_value_t = 100)]
    pub log_every: usize,

    /// 0 disables periodic evaluation
    #[arg(long, default_value_t = 500)]
    pub eval_every: usize,

    /// 0 saves only at the end
    #[arg(long, default_value_t = 1000)]
    pub save_every: usize,
}

impl TrainArgs {
    fn model_config(&self) -> Result<ModelConfig> {
        if let Some(path) = &self.model_cfg {
            return ModelConfig::load(path)
                .map_err(|e| anyhow!("Cannot load model config '{}': {e}", path.display()));
        }
        Ok(ModelConfig::new(self.vocab_size)
            .with_dim(self.dim)
            .with_n_layers(self.n_layers)
            .with_n_heads(self.n_heads)
            .with_dim_ff(self.dim_ff)
            .with_p_drop_hidden(self.p_drop_hidden)
            .with_p_drop_attn(self.p_drop_attn)
            .with_max_len(self.max_len))
    }
}

/// Convert CLI TrainArgs into the application-layer RunConfig.
/// The application layer never sees clap types.
impl TryFrom<TrainArgs> for RunConfig {
    type Error = anyhow::Error;

    fn try_from(a: TrainArgs) -> Result<Self> {
        let strategy: StrategyKind = a.strategy.parse()?;
        let mixup_mode = a.mixup_mode.as_deref().map(str::parse::<MixupMode>).transpose()?;
        let tsa = match a.tsa.as_deref() {
            Some(name) => name.parse::<TsaSchedule>()?,
            None if strategy == StrategyKind::MixMatch => TsaSchedule::None,
            None => TsaSchedule::Linear,
        };

        let loss = LossConfig {
            strategy,
            tsa,
            unsup_criterion:      a.unsup_criterion.parse::<UnsupCriterion>()?,
            uda_coeff:            a.uda_coeff,
            softmax_temp:         a.softmax_temp,
            confidence_threshold: (a.confidence_thresh >= 0.0).then_some(a.confidence_thresh),
            mixup_alpha:          a.mixup_alpha,
            lambda_u:             a.lambda_u,
            total_steps:          a.total_steps,
            sup_mixup:            a.sup_mixup,
            unsup_mixup:          a.unsup_mixup,
            mixup_mode,
            manifold_mixup:       a.manifold_mixup,
            clone_path:           a.clone_path,
            detach_clone:         a.detach_clone,
            interleave:           a.interleave,
            use_sup_loss:         !a.no_sup_loss,
            use_unsup_loss:       !a.no_unsup_loss,
        };

        let use_ema = !a.no_ema && (a.use_ema || strategy == StrategyKind::MixMatch);
        let cfg = RunConfig {
            model:            a.model_config()?,
            sup_data:         a.sup_data,
            unsup_data:       a.unsup_data,
            eval_data:        a.eval_data,
            checkpoint_dir:   a.checkpoint_dir,
            num_classes:      a.num_classes,
            loss,
            train_batch_size: a.train_batch_size,
            eval_batch_size:  a.eval_batch_size,
            unsup_ratio:      a.unsup_ratio,
            lr:               a.lr,
            use_ema,
            ema_decay:        a.ema_decay,
            seed:             a.seed,
            log_every:        a.log_every,
            eval_every:       a.eval_every,
            save_every:       a.save_every,
            init_checkpoint:  a.init_checkpoint,
        };
        cfg.validate().context("Invalid training options")?;
        Ok(cfg)
    }
}

/// All arguments for the `eval` command
#[derive(Args, Debug)]
pub struct EvalArgs {
    /// Directory where `train` saved its checkpoints
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: PathBuf,

    /// Labeled TSV; defaults to the eval file of the training run
    #[arg(long)]
    pub eval_data: Option<PathBuf>,

    /// Evaluate the EMA teacher instead of the trained weights
    #[arg(long)]
    pub use_ema: bool,
}
