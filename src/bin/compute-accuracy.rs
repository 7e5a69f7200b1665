use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use indicatif::ProgressBar;

use monovec::MonoModel;

#[derive(Parser)]
#[command(about = "Evaluate a trained model on a word-analogy question file")]
struct Options {
    /// Model file written by `monovec --save-model`
    #[arg(long = "model", value_name = "FILE")]
    model_file: PathBuf,

    /// Question file: four words per line, `: name` lines open sections
    #[arg(long = "questions", value_name = "FILE")]
    questions_file: PathBuf,

    /// Only search the N most frequent words (0 = the whole vocabulary)
    #[arg(long = "max-vocab", value_name = "N", default_value_t = 0)]
    max_vocabulary: usize,
}

fn run(options: Options) -> Result<()> {
    let model = MonoModel::load(&options.model_file)?;

    let pb = ProgressBar::new_spinner().with_message("evaluating analogies...");
    pb.enable_steady_tick(Duration::from_millis(100));
    let report = model.compute_accuracy(&options.questions_file, options.max_vocabulary)?;
    pb.finish_and_clear();

    for section in &report.sections {
        let pct = if section.total > 0 {
            100.0 * section.correct as f64 / section.total as f64
        } else {
            0.0
        };
        println!(
            "{}: {:.2}%  ({}/{})",
            section.name, pct, section.correct, section.total
        );
    }
    let pct = if report.total > 0 {
        100.0 * report.correct as f64 / report.total as f64
    } else {
        0.0
    };
    println!(
        "Total accuracy: {:.2}%  ({}/{} questions, {} skipped)",
        pct, report.correct, report.total, report.skipped
    );
    Ok(())
}

fn main() {
    let options = Options::parse();

    if let Err(err) = run(options) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
