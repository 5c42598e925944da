//! Evaluation metrics (spec.md §4.G), grounded on
//! `original_source/src/loss/metric.h`.
//!
//! Every metric is a small stateful accumulator fanned across the worker
//! pool the same way as `Loss::evaluate`; each partition reduces to a
//! partial count (or, for AUC, a partial pair of bucket histograms) that
//! the driver folds together — mirroring the original's per-thread `Info`
//! structs without hand-rolling the thread dispatch per metric.

use crate::hyper::MetricKind;
use crate::pool::WorkerPool;

/// Bucket count for AUC's sigmoid histogram (`kMaxBucketSize` in the
/// original).
const AUC_BUCKETS: usize = 1_000_000;

pub trait Metric: Send + Sync {
    fn metric_type(&self) -> &'static str;
    fn accumulate(&mut self, y: &[f32], pred: &[f32], pool: &WorkerPool);
    fn reset(&mut self);
    fn get(&self) -> f32;
}

fn sign_label(y: f32) -> f32 {
    if y > 0.0 {
        1.0
    } else {
        -1.0
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AccMetric {
    total: u64,
    correct: u64,
}

impl AccMetric {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metric for AccMetric {
    fn metric_type(&self) -> &'static str {
        "Accuracy"
    }

    fn accumulate(&mut self, y: &[f32], pred: &[f32], pool: &WorkerPool) {
        assert_eq!(y.len(), pred.len());
        self.total += y.len() as u64;
        let partials = pool.map_partitioned(y.len(), |start, end| {
            (start..end).filter(|&i| sign_label(pred[i]) == sign_label(y[i])).count() as u64
        });
        self.correct += partials.into_iter().sum::<u64>();
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn get(&self) -> f32 {
        self.correct as f32 / self.total as f32
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PrecMetric {
    true_positive: u64,
    false_positive: u64,
}

impl PrecMetric {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metric for PrecMetric {
    fn metric_type(&self) -> &'static str {
        "Precision"
    }

    fn accumulate(&mut self, y: &[f32], pred: &[f32], pool: &WorkerPool) {
        assert_eq!(y.len(), pred.len());
        let partials = pool.map_partitioned(y.len(), |start, end| {
            let mut tp = 0u64;
            let mut fp = 0u64;
            for i in start..end {
                let (p, r) = (sign_label(pred[i]), sign_label(y[i]));
                if p > 0.0 && r > 0.0 {
                    tp += 1;
                } else if p > 0.0 && r < 0.0 {
                    fp += 1;
                }
            }
            (tp, fp)
        });
        for (tp, fp) in partials {
            self.true_positive += tp;
            self.false_positive += fp;
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn get(&self) -> f32 {
        self.true_positive as f32 / (self.true_positive + self.false_positive) as f32
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RecallMetric {
    true_positive: u64,
    false_negative: u64,
}

impl RecallMetric {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metric for RecallMetric {
    fn metric_type(&self) -> &'static str {
        "Recall"
    }

    fn accumulate(&mut self, y: &[f32], pred: &[f32], pool: &WorkerPool) {
        assert_eq!(y.len(), pred.len());
        let partials = pool.map_partitioned(y.len(), |start, end| {
            let mut tp = 0u64;
            let mut fn_ = 0u64;
            for i in start..end {
                let (p, r) = (sign_label(pred[i]), sign_label(y[i]));
                if p > 0.0 && r > 0.0 {
                    tp += 1;
                } else if p < 0.0 && r > 0.0 {
                    fn_ += 1;
                }
            }
            (tp, fn_)
        });
        for (tp, fn_) in partials {
            self.true_positive += tp;
            self.false_negative += fn_;
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn get(&self) -> f32 {
        self.true_positive as f32 / (self.true_positive + self.false_negative) as f32
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct F1Metric {
    total: u64,
    true_positive: u64,
    true_negative: u64,
}

impl F1Metric {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metric for F1Metric {
    fn metric_type(&self) -> &'static str {
        "F1"
    }

    fn accumulate(&mut self, y: &[f32], pred: &[f32], pool: &WorkerPool) {
        assert_eq!(y.len(), pred.len());
        self.total += y.len() as u64;
        let partials = pool.map_partitioned(y.len(), |start, end| {
            let mut tp = 0u64;
            let mut tn = 0u64;
            for i in start..end {
                let (p, r) = (sign_label(pred[i]), sign_label(y[i]));
                if p > 0.0 && r > 0.0 {
                    tp += 1;
                } else if p < 0.0 && r < 0.0 {
                    tn += 1;
                }
            }
            (tp, tn)
        });
        for (tp, tn) in partials {
            self.true_positive += tp;
            self.true_negative += tn;
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn get(&self) -> f32 {
        (self.true_positive as f64 * 2.0 / (self.total + self.true_positive - self.true_negative) as f64) as f32
    }
}

/// Bucketed AUC (spec.md §4.G): `1 - raw` rectangle-rule integration of
/// TPR·dFPR over a `sigmoid(pred)` histogram, exactly mirroring
/// `AUCMetric::CalcAUC`.
pub struct AucMetric {
    positive: Vec<u64>,
    negative: Vec<u64>,
}

impl AucMetric {
    pub fn new() -> Self {
        Self {
            positive: vec![0; AUC_BUCKETS],
            negative: vec![0; AUC_BUCKETS],
        }
    }

    fn bucket(pred: f32) -> usize {
        let s = crate::fastmath::sigmoid(pred, false);
        ((s * AUC_BUCKETS as f32) as usize) % AUC_BUCKETS
    }
}

impl Default for AucMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl Metric for AucMetric {
    fn metric_type(&self) -> &'static str {
        "AUC"
    }

    fn accumulate(&mut self, y: &[f32], pred: &[f32], pool: &WorkerPool) {
        assert_eq!(y.len(), pred.len());
        let partials: Vec<(Vec<u64>, Vec<u64>)> = pool.map_partitioned(y.len(), |start, end| {
            let mut pos = vec![0u64; AUC_BUCKETS];
            let mut neg = vec![0u64; AUC_BUCKETS];
            for i in start..end {
                let bkt = Self::bucket(pred[i]);
                if y[i] > 0.0 {
                    pos[bkt] += 1;
                } else {
                    neg[bkt] += 1;
                }
            }
            (pos, neg)
        });
        for (pos, neg) in partials {
            for b in 0..AUC_BUCKETS {
                self.positive[b] += pos[b];
                self.negative[b] += neg[b];
            }
        }
    }

    fn reset(&mut self) {
        self.positive.fill(0);
        self.negative.fill(0);
    }

    fn get(&self) -> f32 {
        let mut positive_sum: i64 = 0;
        let mut negative_sum: i64 = 0;
        let mut auc = 0.0f64;
        for i in 0..AUC_BUCKETS {
            let pre_positive_sum = positive_sum;
            positive_sum += self.positive[i] as i64;
            negative_sum += self.negative[i] as i64;
            auc += (pre_positive_sum + positive_sum) as f64 * self.negative[i] as f64 / 2.0;
        }
        let denom = (positive_sum * negative_sum) as f64;
        (1.0 - auc / denom) as f32
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MaeMetric {
    error: f64,
    total: u64,
}

impl MaeMetric {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metric for MaeMetric {
    fn metric_type(&self) -> &'static str {
        "MAE"
    }

    fn accumulate(&mut self, y: &[f32], pred: &[f32], pool: &WorkerPool) {
        assert_eq!(y.len(), pred.len());
        self.total += y.len() as u64;
        let partials = pool.map_partitioned(y.len(), |start, end| {
            (start..end).map(|i| (y[i] - pred[i]).abs() as f64).sum::<f64>()
        });
        self.error += partials.into_iter().sum::<f64>();
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn get(&self) -> f32 {
        (self.error / self.total as f64) as f32
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MapeMetric {
    error: f64,
    total: u64,
}

impl MapeMetric {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metric for MapeMetric {
    fn metric_type(&self) -> &'static str {
        "MAPE"
    }

    fn accumulate(&mut self, y: &[f32], pred: &[f32], pool: &WorkerPool) {
        assert_eq!(y.len(), pred.len());
        self.total += y.len() as u64;
        let partials = pool.map_partitioned(y.len(), |start, end| {
            (start..end).map(|i| ((y[i] - pred[i]).abs() / y[i].abs()) as f64).sum::<f64>()
        });
        self.error += partials.into_iter().sum::<f64>();
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn get(&self) -> f32 {
        (self.error / self.total as f64) as f32
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RmsdMetric {
    error: f64,
    total: u64,
}

impl RmsdMetric {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metric for RmsdMetric {
    fn metric_type(&self) -> &'static str {
        "RMSD"
    }

    fn accumulate(&mut self, y: &[f32], pred: &[f32], pool: &WorkerPool) {
        assert_eq!(y.len(), pred.len());
        self.total += y.len() as u64;
        let partials = pool.map_partitioned(y.len(), |start, end| {
            (start..end).map(|i| ((y[i] - pred[i]) as f64).powi(2)).sum::<f64>()
        });
        self.error += partials.into_iter().sum::<f64>();
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn get(&self) -> f32 {
        (self.error / self.total as f64).sqrt() as f32
    }
}

/// Build the metric matching `kind`, or `None` for [`MetricKind::None`]
/// (spec.md §4.H falls back to validation loss when this is `None`).
pub fn metric_for(kind: MetricKind) -> Option<Box<dyn Metric>> {
    match kind {
        MetricKind::Acc => Some(Box::new(AccMetric::new())),
        MetricKind::Prec => Some(Box::new(PrecMetric::new())),
        MetricKind::Recall => Some(Box::new(RecallMetric::new())),
        MetricKind::F1 => Some(Box::new(F1Metric::new())),
        MetricKind::Auc => Some(Box::new(AucMetric::new())),
        MetricKind::Mae => Some(Box::new(MaeMetric::new())),
        MetricKind::Mape => Some(Box::new(MapeMetric::new())),
        MetricKind::Rmsd => Some(Box::new(RmsdMetric::new())),
        MetricKind::None => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accuracy_counts_matching_signs() {
        let pool = WorkerPool::new(2);
        let mut m = AccMetric::new();
        m.accumulate(&[1.0, -1.0, 1.0, -1.0], &[0.5, -0.2, -0.1, -3.0], &pool);
        assert!((m.get() - 0.75).abs() < 1e-6);
    }

    #[test]
    fn precision_divides_tp_by_tp_plus_fp() {
        let pool = WorkerPool::new(1);
        let mut m = PrecMetric::new();
        m.accumulate(&[1.0, -1.0, 1.0], &[0.2, 0.3, -0.1], &pool);
        // preds: +,+,- ; labels: +,-,+ -> tp=1 (i=0), fp=1 (i=1)
        assert!((m.get() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn mae_matches_mean_absolute_error() {
        let pool = WorkerPool::new(2);
        let mut m = MaeMetric::new();
        m.accumulate(&[1.0, 2.0, 3.0], &[1.5, 1.0, 3.5], &pool);
        let expected = (0.5 + 1.0 + 0.5) / 3.0;
        assert!((m.get() - expected).abs() < 1e-5);
    }

    #[test]
    fn rmsd_matches_root_mean_square_error() {
        let pool = WorkerPool::new(1);
        let mut m = RmsdMetric::new();
        m.accumulate(&[0.0, 0.0], &[3.0, 4.0], &pool);
        assert!((m.get() - 3.535534).abs() < 1e-3);
    }

    #[test]
    fn auc_perfect_separation_is_one() {
        let pool = WorkerPool::new(1);
        let mut m = AucMetric::new();
        // all positives score high, all negatives score low: perfect ranking.
        m.accumulate(&[1.0, 1.0, -1.0, -1.0], &[5.0, 4.0, -5.0, -4.0], &pool);
        assert!(m.get() > 0.99, "got {}", m.get());
    }

    #[test]
    fn reset_clears_state() {
        let pool = WorkerPool::new(1);
        let mut m = AccMetric::new();
        m.accumulate(&[1.0], &[1.0], &pool);
        m.reset();
        assert_eq!(m.total, 0);
    }
}
