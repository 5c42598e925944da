//! `xlearn-predict`: score a sparse data file with a checkpointed model
//! (spec.md §6).

#[cfg(feature = "mimalloc")]
use mimalloc::MiMalloc;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use eyre::Result;
use human_panic::setup_panic;

use xlearn::hyper::HyperParam;
use xlearn::kernel;
use xlearn::loss;
use xlearn::model::Model;
use xlearn::pool::WorkerPool;

/// Score a sparse data file against a trained model.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct PredictArgs {
    /// Test data path (libsvm, libffm, or csv; labels are optional and
    /// ignored).
    test_path: PathBuf,

    /// Model path produced by `xlearn-train`.
    model_path: PathBuf,

    /// Prediction output path (`<test>.out` default).
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Log file prefix; when unset, logging only goes to stderr.
    #[arg(short = 'l', long = "log")]
    log_prefix: Option<PathBuf>,

    /// Worker pool size; 0 auto-detects the number of CPUs.
    #[arg(long = "nthread", default_value_t = 0)]
    num_threads: usize,

    /// Threshold the raw score at 0 into {0, 1}.
    #[arg(long = "sign")]
    sign: bool,

    /// Apply the logistic function to the raw score.
    #[arg(long = "sigmoid")]
    sigmoid: bool,

    /// Disable instance-wise norm (every row's norm is 1.0).
    #[arg(long = "no-norm")]
    no_norm: bool,

    #[command(flatten)]
    verbosity: Verbosity<InfoLevel>,
}

fn main() -> Result<()> {
    setup_panic!();
    jane_eyre::install()?;

    let args = PredictArgs::parse();
    xlearn_cli::init_logging(args.verbosity.log_level_filter(), args.log_prefix.as_deref(), false)?;

    xlearn_cli::check_input_file(&args.test_path)?;
    xlearn_cli::check_input_file(&args.model_path)?;

    // `--sign` and `--sigmoid` are mutually exclusive; if both are set,
    // both are disabled (spec.md §6).
    let (sign, sigmoid) = if args.sign && args.sigmoid {
        log::warn!("--sign and --sigmoid are mutually exclusive; both are disabled");
        (false, false)
    } else {
        (args.sign, args.sigmoid)
    };

    let model = Model::deserialize(&args.model_path, xlearn::hyper::LossFunc::CrossEntropy)?;

    let batch = xlearn::reader::load_full(&args.test_path, Some(false), !args.no_norm)?;

    let mut hyper = HyperParam::default();
    hyper.score_func = model.score_func;
    hyper.num_threads = args.num_threads;
    let kernel = kernel::kernel_for(&hyper);
    let pool = WorkerPool::new(hyper.resolved_num_threads());

    let mut pred = Vec::new();
    loss::predict(&batch, &model, kernel.as_ref(), &pool, &mut pred);

    for p in pred.iter_mut() {
        if sigmoid {
            *p = 1.0 / (1.0 + (-*p).exp());
        }
        if sign {
            *p = if *p > 0.0 { 1.0 } else { 0.0 };
        }
    }

    let output_path = args.output.clone().unwrap_or_else(|| PathBuf::from(format!("{}.out", args.test_path.display())));
    xlearn_cli::check_output_dir(&output_path)?;
    let mut w = BufWriter::new(File::create(&output_path)?);
    for p in &pred {
        writeln!(w, "{p}")?;
    }
    w.flush()?;

    log::info!("wrote {} prediction(s) to {}", pred.len(), output_path.display());
    Ok(())
}
