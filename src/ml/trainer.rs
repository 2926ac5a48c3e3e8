// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Step-based semi-supervised training with Burn's DataLoader and
// Adam.
//
//   - Training runs on MyBackend (Autodiff<Wgpu>); the loop itself
//     is generic over any AutodiffBackend so tests can use NdArray
//   - The labeled and unlabeled loaders are cycled independently
//     until total_steps optimizer steps have been taken; a short
//     trailing batch is skipped
//   - Evaluation runs on the inner backend via model.valid()
//   - With EMA enabled the teacher copy is updated after every
//     optimizer step and is the model that gets evaluated
//   - init_checkpoint warm-starts the trainable weights (and so the
//     teacher) from another run; step numbering restarts at 1
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use anyhow::{bail, Result};
use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder, DataLoaderIterator},
        dataset::Dataset,
    },
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::application::train_use_case::RunConfig;
use crate::data::{
    batcher::{LabeledBatch, LabeledBatcher, UnlabeledBatch, UnlabeledBatcher},
    dataset::{LabeledDataset, UnlabeledDataset},
};
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::{MetricsLogger, StepMetrics},
};
use crate::ml::{
    classifier::Classifier,
    ema::WeightEma,
    evaluator::evaluate_dataset,
    rng::SeededMixupRng,
    strategy::{LossEngine, LossValues},
};

type MyBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

/// Datasets of one run; `eval` is optional
pub struct TrainData {
    pub labeled:   LabeledDataset,
    pub unlabeled: Option<UnlabeledDataset>,
    pub eval:      Option<LabeledDataset>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainSummary {
    pub steps:       usize,
    pub last_losses: Option<LossValues>,
    pub eval_acc:    Option<f64>,
}

pub fn run_training(
    cfg:          &RunConfig,
    data:         TrainData,
    ckpt_manager: &CheckpointManager,
    metrics:      &MetricsLogger,
) -> Result<TrainSummary> {
    let device = burn::backend::wgpu::WgpuDevice::default();
    tracing::info!("Using WGPU device: {:?}", device);
    train_loop::<MyBackend>(cfg, data, ckpt_manager, metrics, &device)
}

// ─── Batch cycling ────────────────────────────────────────────────────────────
trait BatchRows {
    fn rows(&self) -> usize;
}

impl<B: Backend> BatchRows for LabeledBatch<B> {
    fn rows(&self) -> usize { self.batch_size() }
}

impl<B: Backend> BatchRows for UnlabeledBatch<B> {
    fn rows(&self) -> usize { self.batch_size() }
}

/// Next batch with exactly `rows` rows, restarting the loader at the
/// end of each pass. The dataset must hold at least `rows` items.
fn next_full<'a, O: BatchRows>(
    loader: &'a dyn DataLoader<O>,
    iter:   &mut Box<dyn DataLoaderIterator<O> + 'a>,
    rows:   usize,
) -> O {
    loop {
        match iter.next() {
            Some(batch) if batch.rows() == rows => return batch,
            Some(_) => continue,
            None    => *iter = loader.iter(),
        }
    }
}

fn evaluate<B: AutodiffBackend>(
    model:   &Classifier<B>,
    teacher: Option<&Classifier<B>>,
    loader:  &dyn DataLoader<LabeledBatch<B::InnerBackend>>,
) -> f64 {
    let target = teacher.unwrap_or(model);
    evaluate_dataset(&target.valid(), loader)
}

fn save<B: Backend>(
    ckpt_manager: &CheckpointManager,
    model:        &Classifier<B>,
    teacher:      Option<&Classifier<B>>,
    step:         usize,
) -> Result<()> {
    // Teacher first: latest_step.json only moves once both files exist
    if let Some(teacher) = teacher {
        ckpt_manager.save_teacher(teacher, step)?;
    }
    ckpt_manager.save_model(model, step)?;
    tracing::info!("Checkpoint saved at step {}", step);
    Ok(())
}

pub fn train_loop<B: AutodiffBackend>(
    cfg:          &RunConfig,
    data:         TrainData,
    ckpt_manager: &CheckpointManager,
    metrics:      &MetricsLogger,
    device:       &B::Device,
) -> Result<TrainSummary> {
    cfg.validate()?;
    B::seed(cfg.seed);
    let engine      = LossEngine::new(cfg.loss.clone())?;
    let total_steps = cfg.loss.total_steps;
    let sup_rows    = cfg.train_batch_size;
    let unsup_rows  = cfg.unsup_batch_size();

    // ── Build model ───────────────────────────────────────────────────────────
    let mut model: Classifier<B> = cfg.classifier().init(device);
    if let Some(dir) = &cfg.init_checkpoint {
        model = CheckpointManager::open(dir)?.warm_start(model, cfg, device)?;
    }
    tracing::info!(
        "Model ready: {} layers, dim={}, {} classes",
        cfg.model.n_layers, cfg.model.dim, cfg.num_classes
    );

    let ema = if cfg.use_ema { Some(WeightEma::new(cfg.ema_decay, cfg.lr)?) } else { None };
    let mut teacher = ema.as_ref().map(|e| e.init_teacher(&model));

    // ── Adam optimiser ────────────────────────────────────────────────────────
    let mut optim = AdamConfig::new().with_epsilon(1e-8).init();
    let mut rng   = SeededMixupRng::new(cfg.seed);

    // ── Data loaders ──────────────────────────────────────────────────────────
    if data.labeled.len() < sup_rows {
        bail!(
            "labeled set has {} examples, fewer than one batch of {}",
            data.labeled.len(), sup_rows
        );
    }
    let sup_loader = DataLoaderBuilder::new(LabeledBatcher::<B>::new(device.clone()))
        .batch_size(sup_rows)
        .shuffle(cfg.seed)
        .num_workers(1)
        .build(data.labeled);

    let unsup_loader = match (engine.uses_unlabeled(), data.unlabeled) {
        (true, Some(dataset)) => {
            if dataset.len() < unsup_rows {
                bail!(
                    "unlabeled set has {} examples, fewer than one batch of {}",
                    dataset.len(), unsup_rows
                );
            }
            Some(
                DataLoaderBuilder::new(UnlabeledBatcher::<B>::new(device.clone()))
                    .batch_size(unsup_rows)
                    .shuffle(cfg.seed.wrapping_add(1))
                    .num_workers(1)
                    .build(dataset),
            )
        }
        (true, None) => bail!("strategy {:?} needs unlabeled data", cfg.loss.strategy),
        (false, _)   => None,
    };

    // Eval batches skip autodiff entirely
    let eval_loader = data.eval.map(|dataset| {
        DataLoaderBuilder::new(LabeledBatcher::<B::InnerBackend>::new(device.clone()))
            .batch_size(cfg.eval_batch_size)
            .num_workers(1)
            .build(dataset)
    });

    let mut sup_iter   = sup_loader.iter();
    let mut unsup_iter = unsup_loader.as_ref().map(|loader| loader.iter());

    // ── Step loop ─────────────────────────────────────────────────────────────
    let mut last_losses = None;
    let mut eval_acc    = None;
    let mut saved_at    = None;

    for step in 0..total_steps {
        let done = step + 1;

        let labeled   = next_full(sup_loader.as_ref(), &mut sup_iter, sup_rows);
        let unlabeled = match (&unsup_loader, unsup_iter.as_mut()) {
            (Some(loader), Some(iter)) => Some(next_full(loader.as_ref(), iter, unsup_rows)),
            _ => None,
        };

        let output = engine.compute(&model, &labeled, unlabeled.as_ref(), step, &mut rng)?;
        let values = output.values();
        if !values.total.is_finite() {
            bail!("loss became {} at step {}", values.total, done);
        }

        // Backward pass + Adam update
        let grads = output.total.backward();
        let grads = GradientsParams::from_grads(grads, &model);
        model = optim.step(cfg.lr, model, grads);

        if let (Some(ema), Some(current)) = (ema.as_ref(), teacher.take()) {
            let (trained, updated) = ema.step(model, current)?;
            model   = trained;
            teacher = Some(updated);
        }

        let should_log  = done % cfg.log_every == 0;
        let should_eval = cfg.eval_every > 0 && done % cfg.eval_every == 0 && eval_loader.is_some();
        if should_log || should_eval {
            let mut row = StepMetrics::from_losses(done, &values);
            if let (true, Some(loader)) = (should_eval, eval_loader.as_ref()) {
                let acc = evaluate(&model, teacher.as_ref(), loader.as_ref());
                tracing::info!("Step {:>6} | eval_acc={:.2}%", done, acc * 100.0);
                eval_acc = Some(acc);
                row      = row.with_eval_acc(acc);
            }
            tracing::info!(
                "Step {:>6}/{} | total={:.4} | sup={:.4} | unsup={}",
                done,
                total_steps,
                values.total,
                values.supervised,
                values.unsupervised.map(|u| format!("{u:.4}")).unwrap_or_else(|| "-".to_string()),
            );
            metrics.log(&row)?;
        }

        if cfg.save_every > 0 && done % cfg.save_every == 0 {
            save(ckpt_manager, &model, teacher.as_ref(), done)?;
            saved_at = Some(done);
        }
        last_losses = Some(values);
    }

    // ── Final evaluation + checkpoint ─────────────────────────────────────────
    if let Some(loader) = eval_loader.as_ref() {
        if cfg.eval_every == 0 || total_steps % cfg.eval_every != 0 {
            let acc = evaluate(&model, teacher.as_ref(), loader.as_ref());
            tracing::info!("Final eval_acc={:.2}%", acc * 100.0);
            eval_acc = Some(acc);
        }
    }
    if saved_at != Some(total_steps) {
        save(ckpt_manager, &model, teacher.as_ref(), total_steps)?;
    }

    tracing::info!("Training complete!");
    Ok(TrainSummary { steps: total_steps, last_losses, eval_acc })
}
