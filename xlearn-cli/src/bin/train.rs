//! `xlearn-train`: fit an LR/FM/FFM model with SGD/AdaGrad/FTRL over a
//! sparse libsvm/libffm/csv file, optionally validating, early-stopping,
//! cross-validating, or streaming the training set off disk (spec.md §6).

#[cfg(feature = "mimalloc")]
use mimalloc::MiMalloc;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::path::{Path, PathBuf};

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use eyre::Result;
use human_panic::setup_panic;

use xlearn::hyper::{task_code_to_funcs, HyperParam, MetricKind, Optimizer};
use xlearn::model::Model;
use xlearn::reader::{InMemoryReader, OnDiskReader, Reader};
use xlearn::trainer::Trainer;

/// Train a linear / factorization-machine / field-aware factorization
/// machine model over sparse data.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct TrainArgs {
    /// Training data path (libsvm, libffm, or csv).
    train_path: PathBuf,

    /// Model/loss combination: 0=LR+logloss 1=LR+squared 2=FM+logloss
    /// 3=FM+squared 4=FFM+logloss 5=FFM+squared.
    #[arg(short = 's', long = "task", default_value_t = 0)]
    task_code: u8,

    /// Metric tracked for reporting and early stopping.
    #[arg(short = 'x', long = "metric", default_value = "none")]
    metric: String,

    /// Optimiser: sgd, adagrad, or ftrl.
    #[arg(short = 'p', long = "optimizer", default_value = "sgd")]
    optimizer: String,

    /// Validation data path.
    #[arg(short = 'v', long = "validate")]
    validation: Option<PathBuf>,

    /// Binary model output path (`<train>.model` when unset, `none` to
    /// disable).
    #[arg(short = 'm', long = "model")]
    model_out: Option<String>,

    /// Human-readable txt model output path (`none` disables, the
    /// default).
    #[arg(short = 't', long = "txt-model", default_value = "none")]
    txt_model_out: String,

    /// Log file prefix; when unset, logging only goes to stderr.
    #[arg(short = 'l', long = "log")]
    log_prefix: Option<PathBuf>,

    /// Latent factor dimension (FM/FFM only).
    #[arg(short = 'k', long = "factor", default_value_t = 4)]
    k: u32,

    /// Learning rate.
    #[arg(short = 'r', long = "rate", default_value_t = 0.2)]
    learning_rate: f32,

    /// L2 regularisation lambda.
    #[arg(short = 'b', long = "lambda", default_value_t = 2e-5)]
    lambda: f32,

    /// FTRL alpha.
    #[arg(long = "alpha", default_value_t = 0.002)]
    alpha: f32,

    /// FTRL beta.
    #[arg(long = "beta", default_value_t = 0.8)]
    beta: f32,

    /// FTRL L1 lambda.
    #[arg(long = "lambda-1", default_value_t = 0.001)]
    lambda_1: f32,

    /// FTRL L2 lambda.
    #[arg(long = "lambda-2", default_value_t = 1.0)]
    lambda_2: f32,

    /// Model weight initialisation scale.
    #[arg(short = 'u', long = "init-scale", default_value_t = 0.66)]
    model_scale: f32,

    /// Maximum number of epochs.
    #[arg(short = 'e', long = "epoch", default_value_t = 10)]
    max_epochs: u32,

    /// Number of cross-validation folds.
    #[arg(short = 'f', long = "fold", default_value_t = 5)]
    folds: u32,

    /// Worker pool size; 0 auto-detects the number of CPUs.
    #[arg(long = "nthread", default_value_t = 0)]
    num_threads: usize,

    /// On-disk reader block size, in MiB.
    #[arg(long = "block", default_value_t = 500)]
    block_mib: u32,

    /// Early-stop window, in epochs.
    #[arg(long = "sw", default_value_t = 2)]
    stop_window: u32,

    /// Stream the training file off disk in bounded-memory blocks.
    #[arg(long = "disk")]
    on_disk: bool,

    /// Run k-fold cross-validation instead of a single training pass
    /// (disables the validation file, early stopping, and checkpointing).
    #[arg(long = "cv")]
    cross_validate: bool,

    /// Disable the HogWild lock-free gradient pass for a deterministic,
    /// single-threaded-equivalent update order.
    #[arg(long = "dis-lock-free")]
    dis_lock_free: bool,

    /// Disable early stopping.
    #[arg(long = "dis-es")]
    dis_early_stopping: bool,

    /// Disable instance-wise norm (every row's norm is 1.0).
    #[arg(long = "no-norm")]
    no_norm: bool,

    /// Suppress per-epoch metric output.
    #[arg(long = "quiet")]
    quiet: bool,

    #[command(flatten)]
    verbosity: Verbosity<InfoLevel>,
}

fn main() -> Result<()> {
    setup_panic!();
    jane_eyre::install()?;

    let args = TrainArgs::parse();

    xlearn_cli::init_logging(args.verbosity.log_level_filter(), args.log_prefix.as_deref(), args.quiet)?;

    xlearn_cli::check_input_file(&args.train_path)?;
    if let Some(path) = &args.validation {
        xlearn_cli::check_validation_file(path)?;
    }

    let (score_func, loss_func) = task_code_to_funcs(args.task_code)?;
    let optimizer = Optimizer::parse(&args.optimizer)?;
    let metric = MetricKind::parse(&args.metric)?;

    let mut hyper = HyperParam {
        score_func,
        loss_func,
        optimizer,
        metric,
        k: args.k,
        learning_rate: args.learning_rate,
        lambda: args.lambda,
        alpha: args.alpha,
        beta: args.beta,
        lambda_1: args.lambda_1,
        lambda_2: args.lambda_2,
        model_scale: args.model_scale,
        max_epochs: args.max_epochs,
        folds: args.folds,
        num_threads: args.num_threads,
        block_size_mib: args.block_mib,
        stop_window: args.stop_window,
        on_disk: args.on_disk,
        cross_validate: args.cross_validate,
        lock_free: !args.dis_lock_free,
        early_stopping: !args.dis_early_stopping,
        normalize: !args.no_norm,
        quiet: args.quiet,
        fast_math: false,
    };

    if hyper.cross_validate {
        if args.validation.is_some() {
            log::warn!("--cv disables -v; the validation file is ignored");
        }
        hyper.early_stopping = false;
    }
    hyper.validate()?;

    let trainer = Trainer::new(hyper.clone());
    let seed = 42;

    if hyper.cross_validate {
        let (num_feat, num_field) = scan_vocab(&args.train_path, &hyper)?;
        let report = trainer.cross_validate(
            &args.train_path,
            || Model::initialize(hyper.score_func, hyper.loss_func, num_feat, num_field, hyper.k, hyper.aux_size(), hyper.model_scale, seed),
            1024,
            seed,
        )?;
        for fold in &report.folds {
            log::info!("fold {}: loss={:.6} metric={:.6}", fold.fold, fold.metric.loss_val, fold.metric.metric_val);
        }
        log::info!("cv average: loss={:.6} metric={:.6}", report.average.loss_val, report.average.metric_val);
        return Ok(());
    }

    let (num_feat, num_field) = scan_vocab(&args.train_path, &hyper)?;
    let mut model = Model::initialize(hyper.score_func, hyper.loss_func, num_feat, num_field, hyper.k, hyper.aux_size(), hyper.model_scale, seed);

    let mut train_reader: Box<dyn Reader> = if hyper.on_disk {
        Box::new(OnDiskReader::open(&args.train_path, hyper.block_size_mib, None, hyper.normalize)?)
    } else {
        Box::new(InMemoryReader::open(&args.train_path, None, hyper.normalize, 1024, seed)?)
    };

    let mut val_reader = match &args.validation {
        Some(path) => Some(InMemoryReader::open(path, None, hyper.normalize, 1024, seed)?),
        None => None,
    };

    let report = trainer.train(&mut model, train_reader.as_mut(), val_reader.as_mut().map(|r| r as &mut dyn Reader));
    log::info!("training finished after {} epoch(s), stopped_early={}", report.history.len(), report.stopped_early);

    let model_path = resolve_model_out_path(&args);
    let txt_model_path = if args.txt_model_out == "none" { None } else { Some(PathBuf::from(&args.txt_model_out)) };

    if let Some(path) = &model_path {
        xlearn_cli::check_output_dir(path)?;
    }
    if let Some(path) = &txt_model_path {
        xlearn_cli::check_output_dir(path)?;
    }
    trainer.checkpoint(&model, model_path.as_deref(), txt_model_path.as_deref())?;

    Ok(())
}

/// One-shot scan of the training file for the feature/field vocabulary
/// size a freshly-initialised [`Model`] needs. Always goes through
/// `xlearn::reader::load_full` (and its binary cache), independent of
/// whether the epoch loop itself streams on-disk.
fn scan_vocab(train_path: &Path, hyper: &HyperParam) -> Result<(u32, u32)> {
    let batch = xlearn::reader::load_full(train_path, None, hyper.normalize)?;
    Ok((batch.max_feat() + 1, batch.max_field() + 1))
}

fn resolve_model_out_path(args: &TrainArgs) -> Option<PathBuf> {
    match args.model_out.as_deref() {
        Some("none") => None,
        Some(custom) => Some(PathBuf::from(custom)),
        None => Some(PathBuf::from(format!("{}.model", args.train_path.display()))),
    }
}
