//! Hyperparameters (spec.md §3, §6) and the enums they're built from.

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreFunc {
    Linear,
    Fm,
    Ffm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossFunc {
    CrossEntropy,
    Squared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Optimizer {
    Sgd,
    AdaGrad,
    Ftrl,
}

impl Optimizer {
    /// Number of auxiliary slots per parameter (spec.md §3 GLOSSARY).
    pub fn aux_size(self) -> u32 {
        match self {
            Optimizer::Sgd => 1,
            Optimizer::AdaGrad => 2,
            Optimizer::Ftrl => 3,
        }
    }

    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "sgd" => Ok(Optimizer::Sgd),
            "adagrad" => Ok(Optimizer::AdaGrad),
            "ftrl" => Ok(Optimizer::Ftrl),
            other => Err(ConfigError::UnknownOptimizer(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Acc,
    Prec,
    Recall,
    F1,
    Auc,
    Mae,
    Mape,
    Rmsd,
    None,
}

impl MetricKind {
    /// True when a larger value is better (spec.md §4.H early-stop
    /// direction).
    pub fn higher_is_better(self) -> bool {
        matches!(
            self,
            MetricKind::Acc | MetricKind::Prec | MetricKind::Recall | MetricKind::F1 | MetricKind::Auc
        )
    }

    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "acc" => Ok(MetricKind::Acc),
            "prec" => Ok(MetricKind::Prec),
            "recall" => Ok(MetricKind::Recall),
            "f1" => Ok(MetricKind::F1),
            "auc" => Ok(MetricKind::Auc),
            "mae" => Ok(MetricKind::Mae),
            "mape" => Ok(MetricKind::Mape),
            "rmsd" | "rmse" => Ok(MetricKind::Rmsd),
            "none" => Ok(MetricKind::None),
            other => Err(ConfigError::UnknownMetric(other.to_string())),
        }
    }
}

/// Immutable training configuration (spec.md §3 `HyperParam`).
///
/// Built once from parsed CLI flags and never mutated once the trainer
/// starts, per spec.md §3.
#[derive(Debug, Clone)]
pub struct HyperParam {
    pub score_func: ScoreFunc,
    pub loss_func: LossFunc,
    pub optimizer: Optimizer,
    pub metric: MetricKind,

    pub k: u32,
    pub learning_rate: f32,
    pub lambda: f32,
    pub alpha: f32,
    pub beta: f32,
    pub lambda_1: f32,
    pub lambda_2: f32,
    pub model_scale: f32,

    pub max_epochs: u32,
    pub folds: u32,
    pub num_threads: usize,
    pub block_size_mib: u32,
    pub stop_window: u32,

    pub on_disk: bool,
    pub cross_validate: bool,
    pub lock_free: bool,
    pub early_stopping: bool,
    pub normalize: bool,
    pub quiet: bool,
    pub fast_math: bool,
}

impl HyperParam {
    pub fn aux_size(&self) -> u32 {
        self.optimizer.aux_size()
    }

    pub fn k_aligned(&self) -> u32 {
        crate::align::k_aligned(self.k)
    }

    /// Cross-flag and range validation (SPEC_FULL.md §11 item 1, mirroring
    /// `original_source/src/solver/checker.cc`).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.k == 0 {
            return Err(ConfigError::InvalidK(self.k as i64));
        }
        if !(self.learning_rate > 0.0) {
            return Err(ConfigError::InvalidLearningRate(self.learning_rate));
        }
        if self.lambda < 0.0 {
            return Err(ConfigError::InvalidLambda(self.lambda));
        }
        if self.optimizer == Optimizer::Ftrl && !(self.alpha > 0.0 && self.beta > 0.0) {
            return Err(ConfigError::InvalidFtrlRate {
                alpha: self.alpha,
                beta: self.beta,
            });
        }
        if self.max_epochs == 0 {
            return Err(ConfigError::InvalidEpochs(self.max_epochs as i64));
        }
        if self.cross_validate && self.folds < 2 {
            return Err(ConfigError::InvalidFolds(self.folds as i64));
        }
        if self.block_size_mib == 0 {
            return Err(ConfigError::InvalidBlockSize(self.block_size_mib as i64));
        }
        if self.stop_window == 0 {
            return Err(ConfigError::InvalidStopWindow(self.stop_window as i64));
        }
        Ok(())
    }

    pub fn resolved_num_threads(&self) -> usize {
        if self.num_threads == 0 {
            num_cpus::get()
        } else {
            self.num_threads
        }
    }
}

impl Default for HyperParam {
    fn default() -> Self {
        Self {
            score_func: ScoreFunc::Linear,
            loss_func: LossFunc::CrossEntropy,
            optimizer: Optimizer::Sgd,
            metric: MetricKind::None,
            k: 4,
            learning_rate: 0.2,
            lambda: 2e-5,
            alpha: 0.002,
            beta: 0.8,
            lambda_1: 0.001,
            lambda_2: 1.0,
            model_scale: 0.66,
            max_epochs: 10,
            folds: 5,
            num_threads: 0,
            block_size_mib: 500,
            stop_window: 2,
            on_disk: false,
            cross_validate: false,
            lock_free: true,
            early_stopping: true,
            normalize: true,
            quiet: false,
            fast_math: false,
        }
    }
}

/// `-s 0..5` maps to a (score, loss) pair (spec.md §6).
pub fn task_code_to_funcs(code: u8) -> Result<(ScoreFunc, LossFunc), ConfigError> {
    match code {
        0 => Ok((ScoreFunc::Linear, LossFunc::CrossEntropy)),
        1 => Ok((ScoreFunc::Linear, LossFunc::Squared)),
        2 => Ok((ScoreFunc::Fm, LossFunc::CrossEntropy)),
        3 => Ok((ScoreFunc::Fm, LossFunc::Squared)),
        4 => Ok((ScoreFunc::Ffm, LossFunc::CrossEntropy)),
        5 => Ok((ScoreFunc::Ffm, LossFunc::Squared)),
        other => Err(ConfigError::UnknownTaskCode(other)),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_passes_validation() {
        HyperParam::default().validate().unwrap();
    }

    #[test]
    fn zero_k_rejected() {
        let mut h = HyperParam::default();
        h.k = 0;
        assert!(matches!(h.validate(), Err(ConfigError::InvalidK(_))));
    }

    #[test]
    fn ftrl_requires_positive_rates() {
        let mut h = HyperParam::default();
        h.optimizer = Optimizer::Ftrl;
        h.alpha = 0.0;
        assert!(matches!(h.validate(), Err(ConfigError::InvalidFtrlRate { .. })));
    }

    #[test]
    fn task_codes_cover_all_six() {
        for code in 0..6u8 {
            task_code_to_funcs(code).unwrap();
        }
        assert!(task_code_to_funcs(6).is_err());
    }
}
