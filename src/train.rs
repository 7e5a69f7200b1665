use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::model::MonoModel;
use crate::sampler::UnigramTable;
use crate::vocab::{sent_id_token, tokenize, Vocabulary};
use crate::{real, Rng, MAX_EXP};

/// A worker's byte range of the training file. Ranges are aligned to
/// line starts, so no worker ever sees a partial sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Chunk {
    pub start_offset: u64,
    pub end_offset: u64,
    /// Ordinal of the first line in the range; sentence ids are derived
    /// from it.
    pub start_line: u64,
}

/// Divide the file into `n_threads` ranges of roughly equal byte size,
/// each starting on a line boundary.
pub(crate) fn chunkify(path: &Path, n_threads: usize) -> Result<Vec<Chunk>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let file_size = file.metadata().map_err(|e| Error::io(path, e))?.len();
    let mut reader = BufReader::new(file);

    let mut line_starts: Vec<(u64, u64)> = Vec::new();
    let mut offset = 0u64;
    let mut line = 0u64;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| Error::io(path, e))?;
        if n == 0 {
            break;
        }
        line_starts.push((offset, line));
        offset += n as u64;
        line += 1;
    }

    let starts: Vec<(u64, u64)> = (0..n_threads)
        .map(|i| {
            let target = file_size * i as u64 / n_threads as u64;
            let k = line_starts.partition_point(|&(off, _)| off < target);
            line_starts.get(k).copied().unwrap_or((file_size, line))
        })
        .collect();

    Ok((0..n_threads)
        .map(|i| Chunk {
            start_offset: starts[i].0,
            end_offset: starts.get(i + 1).map(|s| s.0).unwrap_or(file_size),
            start_line: starts[i].1,
        })
        .collect())
}

/// Where the sentence vector for the current sentence lives: a row of
/// the shared sentence matrix during training, or a caller-owned buffer
/// during online paragraph-vector inference.
pub(crate) enum SentSlot<'a> {
    None,
    Stored(usize),
    Online(&'a mut [real]),
}

/// Per-thread buffers for the hidden layer and the accumulated gradient.
struct Scratch {
    hidden: Vec<real>,
    error: Vec<real>,
}

impl Scratch {
    fn new(dimension: usize) -> Self {
        Scratch {
            hidden: vec![0.0; dimension],
            error: vec![0.0; dimension],
        }
    }
}

impl MonoModel {
    /// Train from scratch on a corpus of one sentence per line. Resets
    /// the vocabulary and all weight matrices.
    pub fn train(&mut self, training_file: &Path) -> Result<()> {
        self.config.validate()?;

        let (vocab, lines) = Vocabulary::from_training_file(
            training_file,
            self.config.min_count,
            self.config.sent_vector,
        )?;
        self.training_lines = lines;
        self.training_words = vocab.training_words();
        self.vocab = vocab;
        self.words_processed.store(0, Ordering::Relaxed);
        self.init_net();
        self.unigram_table = if self.config.negative > 0 {
            UnigramTable::new(&self.vocab)
        } else {
            UnigramTable::default()
        };

        if self.config.verbose {
            println!("Vocab size: {}", self.vocab.len());
            println!("Words in train file: {}", self.training_words);
        }
        if self.training_words == 0 {
            return Ok(());
        }

        let chunks = chunkify(training_file, self.config.n_threads)?;
        let start = Instant::now();
        let result = thread::scope(|s| {
            let this: &MonoModel = self;
            let handles: Vec<_> = chunks
                .into_iter()
                .enumerate()
                .map(|(id, chunk)| {
                    s.spawn(move || this.train_chunk(training_file, chunk, id, start))
                })
                .collect();
            let mut result = Ok(());
            for handle in handles {
                let outcome = handle.join().expect("worker thread panicked");
                if let Err(err) = outcome {
                    if result.is_ok() {
                        result = Err(err);
                    }
                }
            }
            result
        });
        if self.config.verbose {
            println!();
        }
        result
    }

    /// One worker: `max_iterations` passes over its own byte range, with
    /// no barrier between iterations.
    fn train_chunk(&self, path: &Path, chunk: Chunk, id: usize, start: Instant) -> Result<()> {
        let mut scratch = Scratch::new(self.config.dimension);
        for epoch in 0..self.config.max_iterations {
            let file = File::open(path).map_err(|e| Error::io(path, e))?;
            let mut reader = BufReader::new(file);
            reader
                .seek(SeekFrom::Start(chunk.start_offset))
                .map_err(|e| Error::io(path, e))?;

            let mut rng = Rng((id + epoch * self.config.n_threads) as u64);
            let mut alpha = self.decayed_alpha(self.words_processed.load(Ordering::Relaxed));
            let mut line_no = chunk.start_line;
            let mut pos = chunk.start_offset;
            let mut words_since_report = 0u64;
            let mut buf = Vec::new();

            while pos < chunk.end_offset {
                buf.clear();
                let n = reader
                    .read_until(b'\n', &mut buf)
                    .map_err(|e| Error::io(path, e))?;
                if n == 0 {
                    break;
                }
                pos += n as u64;

                let text = String::from_utf8_lossy(&buf);
                let words =
                    self.train_sentence(&text, line_no, &mut scratch, &mut rng, alpha);
                line_no += 1;

                if words > 0 {
                    let processed =
                        self.words_processed.fetch_add(words, Ordering::Relaxed) + words;
                    alpha = self.decayed_alpha(processed);
                    words_since_report += words;
                    if self.config.verbose && words_since_report > 10_000 {
                        words_since_report = 0;
                        self.report_progress(processed, alpha, start);
                    }
                }
            }
        }
        Ok(())
    }

    /// Linear decay of the learning rate, floored at 1e-4 of the start.
    fn decayed_alpha(&self, words_processed: u64) -> real {
        let total = (self.config.max_iterations as u64 * self.training_words).max(1);
        self.config.starting_alpha
            * (1.0 - words_processed as real / total as real).max(1e-4)
    }

    fn report_progress(&self, words_processed: u64, alpha: real, start: Instant) {
        let total = self.config.max_iterations as u64 * self.training_words;
        print!(
            "\rAlpha: {:.6}  Progress: {:.2}%  Words/thread/sec: {:.2}k  ",
            alpha,
            words_processed as f64 / (total + 1) as f64 * 100.0,
            words_processed as f64
                / ((start.elapsed().as_secs_f64() + 1.0)
                    * 1000.0
                    * self.config.n_threads as f64),
        );
        let _ = io::stdout().flush();
    }

    /// The per-sentence protocol: sentence-id prepend, vocabulary lookup
    /// (unknown tokens are skipped), subsampling, then one center-word
    /// update per surviving position. Returns the number of in-vocabulary
    /// word occurrences seen, which drives the learning-rate decay.
    fn train_sentence(
        &self,
        line: &str,
        sent_id: u64,
        scratch: &mut Scratch,
        rng: &mut Rng,
        alpha: real,
    ) -> u64 {
        let mut nodes: Vec<usize> = Vec::new();
        if self.config.sent_vector {
            if let Some(vw) = self.vocab.lookup(&sent_id_token(sent_id)) {
                nodes.push(vw.index);
            }
        }
        let mut words = 0u64;
        for token in tokenize(line) {
            if let Some(vw) = self.vocab.lookup(token) {
                if vw.is_sent_id {
                    continue;
                }
                words += 1;
                nodes.push(vw.index);
            }
        }

        // The subsampling randomly discards frequent words while keeping
        // the ranking the same. Sentence ids are kept unconditionally.
        if self.config.subsampling > 0.0 {
            let k = self.config.subsampling * self.training_words as real;
            nodes.retain(|&i| {
                let vw = self.vocab.get(i);
                if vw.is_sent_id {
                    return true;
                }
                let f = vw.count as real;
                let keep = ((f / k).sqrt() + 1.0) * k / f;
                keep >= rng.rand_real()
            });
        }

        let mut sent = if self.config.sent_vector {
            SentSlot::Stored(sent_id as usize)
        } else {
            SentSlot::None
        };
        for pos in 0..nodes.len() {
            self.train_word(&nodes, pos, &mut sent, scratch, rng, alpha, self.config.freeze);
        }
        words
    }

    fn train_word(
        &self,
        nodes: &[usize],
        pos: usize,
        sent: &mut SentSlot,
        scratch: &mut Scratch,
        rng: &mut Rng,
        alpha: real,
        freeze: bool,
    ) {
        if self.config.skip_gram {
            self.train_word_skip_gram(nodes, pos, sent, scratch, rng, alpha, freeze);
        } else {
            self.train_word_cbow(nodes, pos, sent, scratch, rng, alpha, freeze);
        }
    }

    /// CBOW: the hidden layer is the average of the context rows (plus
    /// the sentence vector), the center word is the target. The gradient
    /// is propagated back to every context row *unscaled*; the averaging
    /// factor is not re-applied.
    fn train_word_cbow(
        &self,
        nodes: &[usize],
        pos: usize,
        sent: &mut SentSlot,
        scratch: &mut Scratch,
        rng: &mut Rng,
        alpha: real,
        freeze: bool,
    ) {
        let target = nodes[pos];
        let radius = 1 + rng.rand_index(self.config.window_size);
        let start = pos.saturating_sub(radius);
        let stop = (pos + radius + 1).min(nodes.len());

        scratch.hidden.fill(0.0);
        let mut count = 0usize;
        for c in start..stop {
            if c == pos || self.vocab.get(nodes[c]).is_sent_id {
                continue;
            }
            let row = self.input_weights.row(nodes[c]);
            for (h, cell) in scratch.hidden.iter_mut().zip(row) {
                *h += cell.get();
            }
            count += 1;
        }
        // The sentence vector joins every context set, not only windows
        // that reach position 0.
        match sent {
            SentSlot::None => {}
            SentSlot::Stored(s) => {
                for (h, cell) in scratch.hidden.iter_mut().zip(self.sent_weights.row(*s)) {
                    *h += cell.get();
                }
                count += 1;
            }
            SentSlot::Online(v) => {
                for (h, x) in scratch.hidden.iter_mut().zip(v.iter()) {
                    *h += *x;
                }
                count += 1;
            }
        }
        if count == 0 {
            return;
        }
        let inv = 1.0 / count as real;
        for h in scratch.hidden.iter_mut() {
            *h *= inv;
        }

        scratch.error.fill(0.0);
        if self.config.hierarchical_softmax {
            self.hierarchical_update(target, &scratch.hidden, alpha, !freeze, &mut scratch.error);
        }
        if self.config.negative > 0 {
            self.neg_sampling_update(
                target,
                &scratch.hidden,
                alpha,
                rng,
                !freeze,
                &mut scratch.error,
            );
        }

        if !freeze {
            for c in start..stop {
                if c == pos || self.vocab.get(nodes[c]).is_sent_id {
                    continue;
                }
                for (cell, e) in self.input_weights.row(nodes[c]).iter().zip(&scratch.error) {
                    cell.add(*e);
                }
            }
        }
        match sent {
            SentSlot::None => {}
            SentSlot::Stored(s) => {
                for (cell, e) in self.sent_weights.row(*s).iter().zip(&scratch.error) {
                    cell.add(*e);
                }
            }
            SentSlot::Online(v) => {
                for (x, e) in v.iter_mut().zip(&scratch.error) {
                    *x += *e;
                }
            }
        }
    }

    /// Skip-gram: each context row in turn is the hidden layer, with the
    /// center word as target; the gradient lands on that context row.
    /// The sentence vector participates as one extra context.
    fn train_word_skip_gram(
        &self,
        nodes: &[usize],
        pos: usize,
        sent: &mut SentSlot,
        scratch: &mut Scratch,
        rng: &mut Rng,
        alpha: real,
        freeze: bool,
    ) {
        let target = nodes[pos];
        let radius = 1 + rng.rand_index(self.config.window_size);
        let start = pos.saturating_sub(radius);
        let stop = (pos + radius + 1).min(nodes.len());

        for c in start..stop {
            if c == pos || self.vocab.get(nodes[c]).is_sent_id {
                continue;
            }
            let row = self.input_weights.row(nodes[c]);
            for (h, cell) in scratch.hidden.iter_mut().zip(row) {
                *h = cell.get();
            }
            scratch.error.fill(0.0);
            if self.config.hierarchical_softmax {
                self.hierarchical_update(
                    target,
                    &scratch.hidden,
                    alpha,
                    !freeze,
                    &mut scratch.error,
                );
            }
            if self.config.negative > 0 {
                self.neg_sampling_update(
                    target,
                    &scratch.hidden,
                    alpha,
                    rng,
                    !freeze,
                    &mut scratch.error,
                );
            }
            if !freeze {
                for (cell, e) in row.iter().zip(&scratch.error) {
                    cell.add(*e);
                }
            }
        }

        match sent {
            SentSlot::None => {}
            SentSlot::Stored(s) => {
                let row = self.sent_weights.row(*s);
                for (h, cell) in scratch.hidden.iter_mut().zip(row) {
                    *h = cell.get();
                }
                scratch.error.fill(0.0);
                self.output_updates(target, scratch, alpha, rng, freeze);
                for (cell, e) in row.iter().zip(&scratch.error) {
                    cell.add(*e);
                }
            }
            SentSlot::Online(v) => {
                for (h, x) in scratch.hidden.iter_mut().zip(v.iter()) {
                    *h = *x;
                }
                scratch.error.fill(0.0);
                self.output_updates(target, scratch, alpha, rng, freeze);
                for (x, e) in v.iter_mut().zip(&scratch.error) {
                    *x += *e;
                }
            }
        }
    }

    fn output_updates(
        &self,
        target: usize,
        scratch: &mut Scratch,
        alpha: real,
        rng: &mut Rng,
        freeze: bool,
    ) {
        if self.config.hierarchical_softmax {
            self.hierarchical_update(target, &scratch.hidden, alpha, !freeze, &mut scratch.error);
        }
        if self.config.negative > 0 {
            self.neg_sampling_update(
                target,
                &scratch.hidden,
                alpha,
                rng,
                !freeze,
                &mut scratch.error,
            );
        }
    }

    /// Hierarchical softmax: one logistic decision per internal node on
    /// the target's root-to-leaf path. Code bit 0 is the positive class.
    /// Steps whose dot product saturates the sigmoid are skipped.
    fn hierarchical_update(
        &self,
        target: usize,
        hidden: &[real],
        alpha: real,
        update: bool,
        error: &mut [real],
    ) {
        let vw = self.vocab.get(target);
        for (&bit, &node) in vw.code.iter().zip(&vw.path) {
            let row = self.output_weights_hs.row(node as usize);
            let f: real = hidden.iter().zip(row).map(|(h, cell)| h * cell.get()).sum();
            if f <= -MAX_EXP || f >= MAX_EXP {
                continue;
            }
            let f = self.sigmoid(f);
            // 'g' is the gradient (d/df loss) multiplied by the learning rate
            let g = ((1 - bit) as real - f) * alpha;
            for (e, cell) in error.iter_mut().zip(row) {
                *e += g * cell.get();
            }
            if update {
                for (cell, &h) in row.iter().zip(hidden) {
                    cell.add(g * h);
                }
            }
        }
    }

    /// Negative sampling: the target with label 1 plus `negative` noise
    /// draws with label 0. A draw that hits the target is skipped, not
    /// redrawn.
    fn neg_sampling_update(
        &self,
        target: usize,
        hidden: &[real],
        alpha: real,
        rng: &mut Rng,
        update: bool,
        error: &mut [real],
    ) {
        for d in 0..=self.config.negative {
            let (label, idx) = if d == 0 {
                (1.0, target)
            } else {
                let Some(idx) = self.unigram_table.sample(rng) else {
                    break;
                };
                if idx == target {
                    continue;
                }
                (0.0, idx)
            };
            let row = self.output_weights.row(idx);
            let f: real = hidden.iter().zip(row).map(|(h, cell)| h * cell.get()).sum();
            let yh = self.sigmoid(f);
            let g = (label - yh) * alpha;
            for (e, cell) in error.iter_mut().zip(row) {
                *e += g * cell.get();
            }
            if update {
                for (cell, &h) in row.iter().zip(hidden) {
                    cell.add(g * h);
                }
            }
        }
    }

    /// Paragraph-vector inference over an unseen sentence: train a fresh
    /// vector against the frozen global parameters and return it.
    pub fn sent_vec(&self, sentence: &str) -> Result<Vec<real>> {
        let d = self.config.dimension;
        let nodes: Vec<usize> = tokenize(sentence)
            .filter_map(|token| self.vocab.lookup(token))
            .filter(|vw| !vw.is_sent_id)
            .map(|vw| vw.index)
            .collect();
        if nodes.is_empty() {
            return Err(Error::AllOov);
        }

        let mut rng = Rng(1);
        let mut v: Vec<real> = (0..d)
            .map(|_| (rng.rand_real() - 0.5) / d as real)
            .collect();
        let mut scratch = Scratch::new(d);
        let alpha = self.config.starting_alpha;
        for _ in 0..self.config.max_iterations {
            for pos in 0..nodes.len() {
                let mut sent = SentSlot::Online(&mut v);
                self.train_word(&nodes, pos, &mut sent, &mut scratch, &mut rng, alpha, true);
            }
        }
        Ok(v)
    }

    /// Compute a paragraph vector for every line of `input`, writing one
    /// space-separated vector per line. Lines with no known word yield a
    /// zero vector.
    pub fn sent_vec_file(&self, input: &Path, output: &Path) -> Result<()> {
        let infile = File::open(input).map_err(|e| Error::io(input, e))?;
        let outfile = File::create(output).map_err(|e| Error::io(output, e))?;
        let mut writer = BufWriter::new(outfile);

        let mut reader = BufReader::new(infile);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let n = reader
                .read_until(b'\n', &mut buf)
                .map_err(|e| Error::io(input, e))?;
            if n == 0 {
                break;
            }
            let text = String::from_utf8_lossy(&buf);
            let v = match self.sent_vec(&text) {
                Ok(v) => v,
                Err(Error::AllOov) => vec![0.0; self.config.dimension],
                Err(err) => return Err(err),
            };
            let mut sep = "";
            for x in v {
                write!(writer, "{sep}{x}").map_err(|e| Error::io(output, e))?;
                sep = " ";
            }
            writeln!(writer).map_err(|e| Error::io(output, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use std::io::Write as _;

    fn temp_corpus(text: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(text.as_bytes()).unwrap();
        f
    }

    #[test]
    fn chunks_are_line_aligned_and_cover_the_file() {
        let f = temp_corpus("first line here\nsecond\nthird one\nfourth line\nfifth\n");
        let text = std::fs::read(f.path()).unwrap();
        let chunks = chunkify(f.path(), 3).unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks.last().unwrap().end_offset, text.len() as u64);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end_offset, pair[1].start_offset);
        }
        for chunk in &chunks {
            let off = chunk.start_offset as usize;
            assert!(off == 0 || off == text.len() || text[off - 1] == b'\n');
        }
    }

    #[test]
    fn chunk_start_lines_match_offsets() {
        let f = temp_corpus("a\nbb\nccc\ndddd\n");
        let chunks = chunkify(f.path(), 2).unwrap();
        let text = std::fs::read(f.path()).unwrap();
        for chunk in &chunks {
            let newlines = text[..chunk.start_offset as usize]
                .iter()
                .filter(|&&b| b == b'\n')
                .count() as u64;
            assert_eq!(chunk.start_line, newlines);
        }
    }

    #[test]
    fn more_threads_than_lines_yields_empty_tail_chunks() {
        let f = temp_corpus("one two\n");
        let chunks = chunkify(f.path(), 4).unwrap();
        assert_eq!(chunks.len(), 4);
        assert!(chunks[1..].iter().all(|c| c.start_offset == c.end_offset));
    }

    #[test]
    fn alpha_decay_is_linear_with_a_floor() {
        let mut model = MonoModel::new(Config {
            starting_alpha: 0.05,
            max_iterations: 2,
            hierarchical_softmax: true,
            negative: 0,
            ..Config::default()
        })
        .unwrap();
        model.training_words = 100;
        assert!((model.decayed_alpha(0) - 0.05).abs() < 1e-7);
        assert!((model.decayed_alpha(100) - 0.025).abs() < 1e-7);
        // fully processed and beyond: floored, never zero or negative
        assert!((model.decayed_alpha(200) - 0.05 * 1e-4).abs() < 1e-9);
        assert!((model.decayed_alpha(10_000) - 0.05 * 1e-4).abs() < 1e-9);
    }

    #[test]
    fn sent_vec_of_unknown_words_is_all_oov() {
        let model = MonoModel::new(Config::default()).unwrap();
        assert!(matches!(model.sent_vec("nothing known"), Err(Error::AllOov)));
    }
}
