use std::cmp::Reverse;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ordered_float::OrderedFloat;

use crate::error::{Error, Result};
use crate::model::{AtomicMatrix, MonoModel};
use crate::vocab::tokenize;
use crate::{dot, norm, normalize, real};

/// Analogy results for one `:`-named section of a question file.
#[derive(Debug, Clone)]
pub struct SectionScore {
    pub name: String,
    pub correct: usize,
    pub total: usize,
}

/// Results of an analogy evaluation run.
#[derive(Debug, Clone, Default)]
pub struct AccuracyReport {
    pub sections: Vec<SectionScore>,
    pub correct: usize,
    pub total: usize,
    /// Questions dropped because a word was unknown or outside the
    /// vocabulary restriction.
    pub skipped: usize,
}

impl MonoModel {
    /// Cosine similarity between two words. Identical strings compare
    /// equal to 1.0 before any vocabulary lookup, so an out-of-vocabulary
    /// word is always similar to itself.
    pub fn similarity(&self, word1: &str, word2: &str, policy: u32) -> Result<real> {
        if word1 == word2 {
            return Ok(1.0);
        }
        let v1 = self.word_vec(word1, policy)?;
        let v2 = self.word_vec(word2, policy)?;
        Ok(dot(&v1, &v2) / (norm(&v1) * norm(&v2)))
    }

    pub fn distance(&self, word1: &str, word2: &str, policy: u32) -> Result<real> {
        Ok(1.0 - self.similarity(word1, word2, policy)?)
    }

    /// Average of per-position word similarities between two sequences of
    /// the same length. Pairs with an unknown word are skipped; if every
    /// pair was skipped the whole comparison fails with `AllOov`.
    pub fn similarity_ngrams(&self, seq1: &str, seq2: &str, policy: u32) -> Result<real> {
        let words1: Vec<&str> = tokenize(seq1).collect();
        let words2: Vec<&str> = tokenize(seq2).collect();
        if words1.len() != words2.len() {
            return Err(Error::LengthMismatch {
                left: words1.len(),
                right: words2.len(),
            });
        }

        let mut total = 0.0;
        let mut n = 0;
        for (w1, w2) in words1.iter().zip(&words2) {
            match self.similarity(w1, w2, policy) {
                Ok(sim) => {
                    total += sim;
                    n += 1;
                }
                Err(Error::NotInVocabulary(_)) => {}
                Err(err) => return Err(err),
            }
        }

        if n == 0 {
            Err(Error::AllOov)
        } else {
            Ok(total / n as real)
        }
    }

    /// Min-max normalize every dimension of every weight matrix to
    /// `[0, 1]`, independently per matrix. Constant dimensions are left
    /// alone.
    pub fn normalize_weights(&mut self) {
        normalize_matrix(&self.input_weights);
        normalize_matrix(&self.output_weights);
        normalize_matrix(&self.output_weights_hs);
        normalize_matrix(&self.sent_weights);
    }

    /// Evaluate word-analogy questions: lines of four words, with
    /// `: name` lines opening sections. The answer to `a b c ?` is the
    /// word whose input row maximizes cosine with `v_b − v_a + v_c`,
    /// cue words excluded. `max_vocabulary` of 0 searches every word;
    /// otherwise only the `max_vocabulary` most frequent words take part.
    pub fn compute_accuracy(&self, path: &Path, max_vocabulary: usize) -> Result<AccuracyReport> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let reader = BufReader::new(file);
        let v = self.vocab.len();
        let d = self.config.dimension;

        let mut eligible = vec![false; v];
        let mut by_count: Vec<usize> = self
            .vocab
            .words()
            .iter()
            .filter(|vw| !vw.is_sent_id)
            .map(|vw| vw.index)
            .collect();
        by_count.sort_by_key(|&i| Reverse(self.vocab.get(i).count));
        if max_vocabulary > 0 {
            by_count.truncate(max_vocabulary);
        }
        for &i in &by_count {
            eligible[i] = true;
        }

        let mut rows = vec![0.0; v * d];
        for &i in &by_count {
            let row = &mut rows[i * d..][..d];
            row.copy_from_slice(&self.input_weights.snapshot_row(i));
            normalize(row);
        }

        let mut report = AccuracyReport::default();
        let mut target = vec![0.0; d];
        for line in reader.lines() {
            let line = line.map_err(|e| Error::io(path, e))?;
            if let Some(name) = line.strip_prefix(':') {
                report.sections.push(SectionScore {
                    name: name.trim().to_string(),
                    correct: 0,
                    total: 0,
                });
                continue;
            }
            let words: Vec<&str> = tokenize(&line).collect();
            if words.len() != 4 {
                continue;
            }
            let indexes: Vec<usize> = words
                .iter()
                .filter_map(|w| self.vocab.lookup(w))
                .map(|vw| vw.index)
                .filter(|&i| eligible[i])
                .collect();
            let [a, b, c, expected] = match indexes[..] {
                [w0, w1, w2, w3] => [w0, w1, w2, w3],
                _ => {
                    report.skipped += 1;
                    continue;
                }
            };

            for j in 0..d {
                target[j] = rows[b * d + j] - rows[a * d + j] + rows[c * d + j];
            }
            let best = by_count
                .iter()
                .copied()
                .filter(|&i| i != a && i != b && i != c)
                .map(|i| (i, dot(&target, &rows[i * d..][..d])))
                .max_by_key(|&(_, sim)| OrderedFloat(sim));

            report.total += 1;
            let hit = best.map(|(i, _)| i) == Some(expected);
            if hit {
                report.correct += 1;
            }
            if let Some(section) = report.sections.last_mut() {
                section.total += 1;
                if hit {
                    section.correct += 1;
                }
            }
        }
        Ok(report)
    }
}

fn normalize_matrix(matrix: &AtomicMatrix) {
    for j in 0..matrix.dim() {
        let mut lo = real::INFINITY;
        let mut hi = real::NEG_INFINITY;
        for i in 0..matrix.rows() {
            let x = matrix.row(i)[j].get();
            lo = lo.min(x);
            hi = hi.max(x);
        }
        if hi > lo {
            let span = hi - lo;
            for i in 0..matrix.rows() {
                let cell = &matrix.row(i)[j];
                cell.set((cell.get() - lo) / span);
            }
        }
    }
}
