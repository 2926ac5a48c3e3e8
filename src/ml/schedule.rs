// ============================================================
// Layer 5 — Training Schedules
// ============================================================
//   TsaSchedule   — training-signal-annealing threshold curve
//   linear_rampup — consistency weight warm-up
//   interleave    — batch-row exchange across equal-size groups
//
// The TSA threshold moves from `start` (usually 1 / num_classes)
// to `end` (usually 1) as training progresses. Labeled examples
// the model already predicts with probability above the threshold
// are left out of the supervised loss.

use std::str::FromStr;

use burn::{
    prelude::*,
    tensor::{BasicOps, TensorKind},
};
use serde::{Deserialize, Serialize};

use crate::domain::error::{Result, UdaError};

/// Curvature of the exponential and logarithmic schedules
const TSA_SCALE: f64 = 5.0;

// ─── TSA ──────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TsaSchedule {
    None,
    Linear,
    /// Stays near `start` for most of training, then rises sharply
    Exponential,
    /// Rises sharply first, then flattens towards `end`
    Logarithmic,
}

impl TsaSchedule {
    /// Threshold at `step`, or None when TSA is disabled.
    ///
    /// Progress is step / total_steps clamped to [0, 1]; the curves
    /// are normalised so progress 0 gives exactly `start` and
    /// progress 1 gives exactly `end`.
    pub fn threshold(self, step: usize, total_steps: usize, start: f64, end: f64) -> Option<f64> {
        let progress = if total_steps == 0 {
            1.0
        } else {
            (step as f64 / total_steps as f64).clamp(0.0, 1.0)
        };
        let floor = (-TSA_SCALE).exp();

        let alpha = match self {
            TsaSchedule::None        => return None,
            TsaSchedule::Linear      => progress,
            TsaSchedule::Exponential => (((progress - 1.0) * TSA_SCALE).exp() - floor) / (1.0 - floor),
            TsaSchedule::Logarithmic => (1.0 - (-progress * TSA_SCALE).exp()) / (1.0 - floor),
        };
        Some(start + alpha * (end - start))
    }
}

impl FromStr for TsaSchedule {
    type Err = UdaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "" | "none"                               => Ok(TsaSchedule::None),
            "linear" | "linear_schedule"              => Ok(TsaSchedule::Linear),
            "exp" | "exponential" | "exp_schedule"    => Ok(TsaSchedule::Exponential),
            "log" | "logarithmic" | "log_schedule"    => Ok(TsaSchedule::Logarithmic),
            other => Err(UdaError::config(format!(
                "unknown TSA schedule '{other}' (expected none, linear, exp or log)"
            ))),
        }
    }
}

// ─── Ramp-up ──────────────────────────────────────────────────────────────────
/// λ_u · clamp(step / total_steps, 0, 1). A zero total means "already ramped".
pub fn linear_rampup(step: usize, total_steps: usize, lambda_u: f64) -> f64 {
    if total_steps == 0 {
        return lambda_u;
    }
    lambda_u * (step as f64 / total_steps as f64).clamp(0.0, 1.0)
}

// ─── Interleave ───────────────────────────────────────────────────────────────
/// Boundaries that split `batch` rows into `groups` near-equal chunks.
/// The last chunks absorb the remainder; the result has groups + 1 entries.
pub fn interleave_offsets(batch: usize, groups: usize) -> Vec<usize> {
    let groups = groups.max(1);
    let mut sizes = vec![batch / groups; groups];
    let remainder = batch - sizes.iter().sum::<usize>();
    for x in 0..remainder {
        sizes[groups - 1 - x] += 1;
    }

    let mut offsets = Vec::with_capacity(groups + 1);
    offsets.push(0);
    for size in sizes {
        offsets.push(offsets[offsets.len() - 1] + size);
    }
    offsets
}

/// Swap chunk i of tensor 0 with chunk i of tensor i, for every i ≥ 1.
///
/// All tensors must share their first dimension. Applying the
/// function twice returns the original tensors.
pub fn interleave<B, const D: usize, K>(xs: Vec<Tensor<B, D, K>>) -> Result<Vec<Tensor<B, D, K>>>
where
    B: Backend,
    K: TensorKind<B> + BasicOps<B>,
{
    let Some(first) = xs.first() else {
        return Ok(xs);
    };
    let batch = first.dims()[0];
    for x in &xs {
        let rows = x.dims()[0];
        if rows != batch {
            return Err(UdaError::shape("interleaved batches (rows)", &[batch], &[rows]));
        }
    }
    if batch == 0 {
        return Ok(xs);
    }

    let groups  = xs.len();
    let offsets = interleave_offsets(batch, groups);

    // Empty chunks (batch < groups) are carried as None.
    let mut chunks: Vec<Vec<Option<Tensor<B, D, K>>>> = xs
        .into_iter()
        .map(|x| {
            (0..groups)
                .map(|p| {
                    let len = offsets[p + 1] - offsets[p];
                    (len > 0).then(|| x.clone().narrow(0, offsets[p], len))
                })
                .collect()
        })
        .collect();

    for i in 1..groups {
        let (head, tail) = chunks.split_at_mut(i);
        std::mem::swap(&mut head[0][i], &mut tail[0][i]);
    }

    Ok(chunks
        .into_iter()
        .map(|parts| Tensor::cat(parts.into_iter().flatten().collect(), 0))
        .collect())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    #[test]
    fn test_tsa_endpoints_exact() {
        for schedule in [TsaSchedule::Linear, TsaSchedule::Exponential, TsaSchedule::Logarithmic] {
            let start = schedule.threshold(0, 1000, 0.25, 1.0).unwrap();
            let end   = schedule.threshold(1000, 1000, 0.25, 1.0).unwrap();
            assert!((start - 0.25).abs() < 1e-12, "{schedule:?} start {start}");
            assert!((end - 1.0).abs() < 1e-12, "{schedule:?} end {end}");
        }
    }

    #[test]
    fn test_tsa_monotonic() {
        for schedule in [TsaSchedule::Linear, TsaSchedule::Exponential, TsaSchedule::Logarithmic] {
            let mut prev = f64::MIN;
            for step in (0..=100).step_by(5) {
                let t = schedule.threshold(step, 100, 0.5, 1.0).unwrap();
                assert!(t >= prev);
                prev = t;
            }
        }
    }

    #[test]
    fn test_tsa_curve_shapes() {
        let linear = TsaSchedule::Linear.threshold(50, 100, 0.0, 1.0).unwrap();
        let exp    = TsaSchedule::Exponential.threshold(50, 100, 0.0, 1.0).unwrap();
        let log    = TsaSchedule::Logarithmic.threshold(50, 100, 0.0, 1.0).unwrap();
        assert!((linear - 0.5).abs() < 1e-12);
        assert!(exp < linear);
        assert!(log > linear);
    }

    #[test]
    fn test_tsa_past_end_clamped() {
        let t = TsaSchedule::Linear.threshold(5000, 1000, 0.5, 1.0).unwrap();
        assert_eq!(t, 1.0);
        assert_eq!(TsaSchedule::None.threshold(10, 100, 0.5, 1.0), None);
    }

    #[test]
    fn test_tsa_parse() {
        assert_eq!("linear_schedule".parse::<TsaSchedule>().unwrap(), TsaSchedule::Linear);
        assert_eq!("LOG".parse::<TsaSchedule>().unwrap(), TsaSchedule::Logarithmic);
        assert!(matches!("cosine".parse::<TsaSchedule>(), Err(UdaError::InvalidConfig(_))));
    }

    #[test]
    fn test_rampup() {
        assert_eq!(linear_rampup(0, 100, 75.0), 0.0);
        assert_eq!(linear_rampup(50, 100, 75.0), 37.5);
        assert_eq!(linear_rampup(100, 100, 75.0), 75.0);
        assert_eq!(linear_rampup(500, 100, 75.0), 75.0);
        assert_eq!(linear_rampup(3, 0, 75.0), 75.0);
    }

    #[test]
    fn test_offsets_uneven() {
        assert_eq!(interleave_offsets(10, 3), vec![0, 3, 6, 10]);
        assert_eq!(interleave_offsets(11, 3), vec![0, 3, 7, 11]);
        assert_eq!(interleave_offsets(9, 3), vec![0, 3, 6, 9]);
    }

    fn column(values: &[f32]) -> Tensor<B, 2> {
        let n = values.len();
        Tensor::<B, 1>::from_floats(values, &Default::default()).reshape([n, 1])
    }

    fn flat(t: Tensor<B, 2>) -> Vec<f32> {
        t.into_data().to_vec().unwrap()
    }

    #[test]
    fn test_interleave_swaps_chunks() {
        let a = column(&[0.0, 1.0, 2.0]);
        let b = column(&[10.0, 11.0, 12.0]);
        let c = column(&[20.0, 21.0, 22.0]);
        let out = interleave(vec![a, b, c]).unwrap();
        assert_eq!(flat(out[0].clone()), vec![0.0, 11.0, 22.0]);
        assert_eq!(flat(out[1].clone()), vec![10.0, 1.0, 12.0]);
        assert_eq!(flat(out[2].clone()), vec![20.0, 21.0, 2.0]);
    }

    #[test]
    fn test_interleave_is_involution() {
        for batch in [2usize, 6, 7, 10] {
            let make = |base: f32| column(&(0..batch).map(|i| base + i as f32).collect::<Vec<_>>());
            let xs   = vec![make(0.0), make(100.0), make(200.0)];
            let back = interleave(interleave(xs.clone()).unwrap()).unwrap();
            for (orig, round) in xs.into_iter().zip(back) {
                assert_eq!(flat(orig), flat(round));
            }
        }
    }

    #[test]
    fn test_interleave_int_tensors() {
        let device = Default::default();
        let a = Tensor::<B, 2, Int>::from_ints([[1, 1], [2, 2]], &device);
        let b = Tensor::<B, 2, Int>::from_ints([[3, 3], [4, 4]], &device);
        let out = interleave(vec![a, b]).unwrap();
        let first: Vec<i64> = out[0].clone().into_data().convert::<i64>().to_vec().unwrap();
        assert_eq!(first, vec![1, 1, 4, 4]);
    }

    #[test]
    fn test_interleave_rejects_unequal_batches() {
        let err = interleave(vec![column(&[0.0, 1.0]), column(&[0.0])]).unwrap_err();
        assert!(matches!(err, UdaError::ShapeMismatch { .. }));
    }
}
