use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::ops::Index;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

pub mod config;
pub mod error;
pub mod model;
pub mod sampler;
pub mod similarity;
pub mod train;
pub mod vocab;

pub use config::Config;
pub use error::{Error, Result};
pub use model::MonoModel;
pub use vocab::{VocabWord, Vocabulary};

#[allow(non_camel_case_types)]
pub type real = f32; // Precision of float numbers

/// Dot products outside this range saturate the sigmoid.
pub const MAX_EXP: real = 6.0;

pub fn norm(v: &[real]) -> real {
    v.iter().copied().map(|e| e * e).sum::<real>().sqrt()
}

pub fn normalize(v: &mut [real]) {
    let len = norm(v);
    if len > 0.0 {
        for e in v {
            *e /= len;
        }
    }
}

pub fn dot(a: &[real], b: &[real]) -> real {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(&a, &b)| a * b).sum()
}

/// Cosine of the angle between two vectors.
pub fn cosine(a: &[real], b: &[real]) -> real {
    dot(a, b) / (norm(a) * norm(b))
}

/// The word2vec linear congruential generator.
pub struct Rng(pub u64);

impl Rng {
    pub fn rand_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(25214903917).wrapping_add(11);
        self.0
    }

    /// Get a uniformly distributed random number in `0.0 .. 1.0`.
    pub fn rand_real(&mut self) -> real {
        (self.rand_u64() & 0xFFFF) as real / 65536.0
    }

    /// Uniform integer in `0..n`. Uses the upper state bits; the low bits
    /// of an LCG cycle too fast to be usable.
    pub fn rand_index(&mut self, n: usize) -> usize {
        (self.rand_u64() >> 16) as usize % n
    }
}

/// A shared f32 cell. Training updates these without synchronization
/// beyond relaxed atomicity on the raw bits; lost updates are tolerated.
#[derive(Default)]
#[repr(transparent)]
pub struct Real {
    bits: AtomicU32,
}

impl Real {
    pub fn get(&self) -> real {
        real::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: real) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn add(&self, x: real) {
        let a = self.get();
        self.set(a + x);
    }
}

/// Word embeddings loaded from a file in the word2vec binary format, as
/// written by [`MonoModel::save_vectors_bin`]. Rows are unit-normalized
/// on load, so dot products are cosines.
pub struct Embeddings {
    size: usize,
    vocab: Vec<String>,
    rows: Vec<real>,
}

impl Index<usize> for Embeddings {
    type Output = [real];

    fn index(&self, i: usize) -> &[real] {
        &self.rows[i * self.size..][..self.size]
    }
}

impl Embeddings {
    pub fn load(file_name: &Path) -> Result<Self> {
        let mut f =
            BufReader::new(File::open(file_name).map_err(|e| Error::io(file_name, e))?);
        let mut line = String::new();
        f.read_line(&mut line).map_err(|e| Error::io(file_name, e))?;
        let mut fields = line.split_ascii_whitespace();
        let mut read_dim = || -> Result<usize> {
            fields
                .next()
                .ok_or_else(|| Error::CorruptModel("missing vector file header".into()))?
                .parse()
                .map_err(|_| Error::CorruptModel("malformed vector file header".into()))
        };
        let num_words: usize = read_dim()?;
        let size: usize = read_dim()?;

        let mut vocab: Vec<String> = Vec::with_capacity(num_words);
        let mut rows = vec![0.0; num_words * size];
        for b in 0..num_words {
            let mut word = Vec::<u8>::new();
            let count = f
                .read_until(b' ', &mut word)
                .map_err(|e| Error::io(file_name, e))?;
            if count == 0 {
                return Err(Error::CorruptModel(format!(
                    "vector file ends after {b} of {num_words} words"
                )));
            }
            if word.last() == Some(&b' ') {
                word.pop();
            }
            word.retain(|c| *c != b'\n');
            vocab.push(String::from_utf8_lossy(&word).into_owned());

            let row = &mut rows[b * size..][..size];
            f.read_exact(bytemuck::cast_slice_mut::<real, u8>(row))
                .map_err(|e| Error::io(file_name, e))?;
            normalize(row);
        }

        Ok(Embeddings { size, vocab, rows })
    }

    pub fn num_words(&self) -> usize {
        self.vocab.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the index for a word. Exact match only, case-sensitive.
    pub fn lookup_word(&self, word: &str) -> Option<usize> {
        self.vocab.iter().position(|v| v == word)
    }

    /// Get the word for a word-index. Panics if `word` is out of range.
    pub fn word(&self, word: usize) -> &str {
        &self.vocab[word]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rng_is_deterministic() {
        let mut a = Rng(7);
        let mut b = Rng(7);
        for _ in 0..100 {
            assert_eq!(a.rand_u64(), b.rand_u64());
        }
    }

    #[test]
    fn rand_real_in_unit_interval() {
        let mut rng = Rng(1);
        for _ in 0..10_000 {
            let x = rng.rand_real();
            assert!((0.0..1.0).contains(&x));
        }
    }

    #[test]
    fn cosine_of_parallel_vectors() {
        let a = [1.0, 2.0, 3.0];
        let b = [2.0, 4.0, 6.0];
        assert!((cosine(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_zero_vector_is_noop() {
        let mut v = [0.0; 4];
        normalize(&mut v);
        assert_eq!(v, [0.0; 4]);
    }

    #[test]
    fn real_cell_roundtrips_bits() {
        let cell = Real::default();
        cell.set(0.1875);
        assert_eq!(cell.get(), 0.1875);
        cell.add(0.0625);
        assert_eq!(cell.get(), 0.25);
    }
}
