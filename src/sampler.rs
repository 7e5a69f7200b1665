use crate::vocab::Vocabulary;
use crate::Rng;

/// Number of slots in the noise table.
pub const UNIGRAM_TABLE_SIZE: usize = 100_000_000;

/// Precomputed table for drawing negative samples in O(1). The fraction
/// of slots holding vocabulary index `i` approximates
/// `count_i^0.75 / Σ count_j^0.75`. Sentence-id entries never appear.
pub struct UnigramTable {
    table: Vec<u32>,
}

impl UnigramTable {
    pub fn new(vocab: &Vocabulary) -> Self {
        UnigramTable::with_size(vocab, UNIGRAM_TABLE_SIZE)
    }

    fn with_size(vocab: &Vocabulary, size: usize) -> Self {
        let power = 0.75;
        let weights: Vec<(u32, f64)> = vocab
            .words()
            .iter()
            .filter(|vw| !vw.is_sent_id)
            .map(|vw| (vw.index as u32, (vw.count as f64).powf(power)))
            .collect();
        if weights.is_empty() {
            return UnigramTable { table: Vec::new() };
        }
        let total: f64 = weights.iter().map(|&(_, w)| w).sum();

        let mut table = Vec::with_capacity(size);
        let mut i = 0;
        let mut d1 = weights[0].1 / total;
        for a in 0..size {
            table.push(weights[i].0);
            if (a as f64 / size as f64) > d1 && i + 1 < weights.len() {
                i += 1;
                d1 += weights[i].1 / total;
            }
        }
        UnigramTable { table }
    }

    /// Draw a random vocabulary index, or `None` for an empty table.
    pub fn sample(&self, rng: &mut Rng) -> Option<usize> {
        if self.table.is_empty() {
            None
        } else {
            Some(self.table[rng.rand_index(self.table.len())] as usize)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Default for UnigramTable {
    fn default() -> Self {
        UnigramTable { table: Vec::new() }
    }
}
