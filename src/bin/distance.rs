use std::cmp::Reverse;
use std::io::Write;
use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::Parser;
use ordered_float::OrderedFloat;

use monovec::{dot, normalize, Embeddings};

/// number of closest words that will be shown
const N: usize = 40;

#[derive(Parser)]
#[command(about = "Interactive nearest-neighbour queries over exported word vectors")]
struct Options {
    /// Contains word projections in the BINARY FORMAT.
    #[arg(value_name = "FILE")]
    file_name: PathBuf,
}

fn run(options: Options) -> Result<()> {
    let vectors = Embeddings::load(&options.file_name)?;

    let mut line = String::new();
    'outer: loop {
        print!("Enter word or sentence (EXIT to break): ");
        let _ = std::io::stdout().flush();

        line.clear();
        match std::io::stdin().read_line(&mut line) {
            Err(err) => {
                eprintln!("error reading stdin: {err}");
                break;
            }
            Ok(0) => break,
            Ok(_) => {}
        }
        let query = line.trim();
        if query == "EXIT" {
            break;
        }

        let mut bi: Vec<usize> = vec![];
        for word in query.split_ascii_whitespace() {
            match vectors.lookup_word(word) {
                None => {
                    println!("Word: {word}  Out of dictionary word!");
                    continue 'outer;
                }
                Some(i) => {
                    println!("Word: {word}  Position in vocabulary: {i}");
                    bi.push(i);
                }
            }
        }
        if bi.is_empty() {
            continue;
        }

        let mut vec = vec![0.0f32; vectors.size()];
        for &i in &bi {
            for (v, r) in vec.iter_mut().zip(vectors[i].iter().copied()) {
                *v += r;
            }
        }
        normalize(&mut vec);

        println!();
        println!("                                              Word       Cosine distance");
        println!("------------------------------------------------------------------------");

        let mut best: Vec<(&str, f32)> = (0..vectors.num_words())
            .filter(|c| !bi.contains(c))
            .map(|c| (vectors.word(c), dot(&vec, &vectors[c])))
            .collect();
        best.sort_by_key(|&(_word, sim)| Reverse(OrderedFloat(sim)));
        for (word, sim) in best.iter().take(N) {
            println!("{word:>50}\t\t{sim:8.6}");
        }
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
