use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::Parser;

use monovec::{real, Config, MonoModel};

#[derive(Parser)]
#[command(about = "Distributed word and sentence vector training", long_about = None, version)]
struct Options {
    /// Use text data from FILE to train the model; one sentence per line
    #[arg(long = "train", value_name = "FILE")]
    train_file: PathBuf,

    /// Save the word vectors in the word2vec text format to FILE
    #[arg(long = "output", value_name = "FILE")]
    output_file: Option<PathBuf>,

    /// Save the word vectors in binary mode instead
    #[arg(long)]
    binary: bool,

    /// Save the whole model (configuration, weights, vocabulary) to FILE
    #[arg(long = "save-model", value_name = "FILE")]
    save_model_file: Option<PathBuf>,

    /// Save the trained sentence vectors to FILE
    #[arg(long = "save-sent-vectors", value_name = "FILE")]
    save_sent_vectors_file: Option<PathBuf>,

    /// Set size of word vectors
    #[arg(long = "size", default_value_t = 100)]
    dimension: usize,

    /// Set max skip length between words
    #[arg(long, default_value_t = 5)]
    window: usize,

    /// Threshold for occurrence of words. Those that appear with higher
    /// frequency in the training data will be randomly down-sampled;
    /// useful range is (0, 1e-5), 0 disables
    #[arg(long, default_value_t = 1e-3)]
    sample: real,

    /// Use Hierarchical Softmax
    #[arg(long)]
    hs: bool,

    /// Number of negative examples; common values are 3 - 10 (0 = not used)
    #[arg(long, default_value_t = 5)]
    negative: usize,

    /// Use N threads
    #[arg(long = "threads", value_name = "N", default_value_t = 4)]
    num_threads: usize,

    /// Run more training iterations
    #[arg(long, default_value_t = 5)]
    iter: usize,

    /// Discard words that appear less than N times
    #[arg(long = "min-count", value_name = "N", default_value_t = 5)]
    min_count: u64,

    /// Set the starting learning rate; default is 0.025 for skip-gram and
    /// 0.05 for CBOW
    #[arg(long)]
    alpha: Option<real>,

    /// Use the skip-gram model (otherwise, the continuous bag of words model)
    #[arg(long = "skip-gram")]
    skip_gram: bool,

    /// Train a paragraph vector for every training sentence
    #[arg(long = "sent-vector")]
    sent_vector: bool,

    /// Lookup policy for exported vectors: 0 = input weights, 1 = output
    /// weights, 2 = their average, 3 = their concatenation
    #[arg(long, default_value_t = 0)]
    policy: u32,

    /// Report vocabulary statistics and progress during training
    #[arg(long)]
    verbose: bool,
}

fn run(options: Options) -> Result<()> {
    let config = Config {
        starting_alpha: options
            .alpha
            .unwrap_or(if options.skip_gram { 0.025 } else { 0.05 }),
        dimension: options.dimension,
        min_count: options.min_count,
        max_iterations: options.iter,
        window_size: options.window,
        n_threads: options.num_threads,
        subsampling: options.sample,
        verbose: options.verbose,
        hierarchical_softmax: options.hs,
        skip_gram: options.skip_gram,
        negative: options.negative,
        sent_vector: options.sent_vector,
        freeze: false,
    };

    let mut model = MonoModel::new(config)?;
    println!(
        "Starting training using file {}",
        options.train_file.display()
    );
    model.train(&options.train_file)?;

    if let Some(path) = &options.output_file {
        if options.binary {
            model.save_vectors_bin(path, options.policy)?;
        } else {
            model.save_vectors(path, options.policy)?;
        }
    }
    if let Some(path) = &options.save_model_file {
        model.save(path)?;
    }
    if let Some(path) = &options.save_sent_vectors_file {
        model.save_sent_vectors(path)?;
    }
    Ok(())
}

fn main() {
    let options = Options::parse();

    if let Err(err) = run(options) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
