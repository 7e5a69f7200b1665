use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::AtomicU64;

use aligned_box::AlignedBox;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::sampler::UnigramTable;
use crate::vocab::{VocabWord, Vocabulary};
use crate::{real, Real, Rng, MAX_EXP};

pub(crate) const EXP_TABLE_SIZE: usize = 1000;

/// Alignment of the shared weight matrices. Keeps concurrently-updated
/// rows from sharing cache lines more than they have to.
const MATRIX_ALIGN: usize = 128;

/// A row-major matrix of shared f32 cells, written by all worker threads
/// with relaxed atomics and no locking.
pub(crate) struct AtomicMatrix {
    rows: usize,
    dim: usize,
    data: AlignedBox<[Real]>,
}

impl AtomicMatrix {
    pub fn empty() -> Self {
        AtomicMatrix::zeros(0, 0)
    }

    pub fn zeros(rows: usize, dim: usize) -> Self {
        // A zero-sized aligned allocation is not portable; keep one slot.
        let data = AlignedBox::slice_from_default(MATRIX_ALIGN, (rows * dim).max(1))
            .expect("memory allocation failed");
        AtomicMatrix { rows, dim, data }
    }

    pub fn from_vec(rows: usize, dim: usize, values: &[real]) -> Self {
        let m = AtomicMatrix::zeros(rows, dim);
        for (cell, &x) in m.data.iter().zip(values.iter()) {
            cell.set(x);
        }
        m
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn row(&self, r: usize) -> &[Real] {
        &self.data[r * self.dim..][..self.dim]
    }

    pub fn snapshot_row(&self, r: usize) -> Vec<real> {
        self.row(r).iter().map(Real::get).collect()
    }

    pub fn snapshot(&self) -> Vec<real> {
        self.data[..self.rows * self.dim]
            .iter()
            .map(Real::get)
            .collect()
    }

    /// Initialize every cell uniformly in `[-0.5/dim, +0.5/dim]`.
    pub fn fill_uniform(&self, rng: &mut Rng) {
        for cell in self.data[..self.rows * self.dim].iter() {
            cell.set((rng.rand_real() - 0.5) / self.dim as real);
        }
    }
}

/// A monolingual embedding model: vocabulary, Huffman coding, and the
/// shared weight matrices, together with training (see `train`) and
/// inference entry points.
pub struct MonoModel {
    pub(crate) config: Config,
    pub(crate) vocab: Vocabulary,
    /// Input (center/context) embeddings, one row per vocabulary entry.
    pub(crate) input_weights: AtomicMatrix,
    /// Output embeddings for negative sampling.
    pub(crate) output_weights: AtomicMatrix,
    /// Output embeddings for hierarchical softmax, one row per internal
    /// Huffman node.
    pub(crate) output_weights_hs: AtomicMatrix,
    /// Paragraph vectors, one row per training sentence.
    pub(crate) sent_weights: AtomicMatrix,
    pub(crate) unigram_table: UnigramTable,
    pub(crate) training_words: u64,
    pub(crate) training_lines: u64,
    pub(crate) words_processed: AtomicU64,
    exp_table: Vec<real>,
}

#[derive(Serialize, Deserialize)]
struct SavedMatrix {
    rows: u64,
    dim: u64,
    data: Vec<real>,
}

impl SavedMatrix {
    fn of(m: &AtomicMatrix) -> Self {
        SavedMatrix {
            rows: m.rows as u64,
            dim: m.dim as u64,
            data: m.snapshot(),
        }
    }

    fn restore(&self, what: &str) -> Result<AtomicMatrix> {
        let rows = self.rows as usize;
        let dim = self.dim as usize;
        if self.data.len() != rows * dim {
            return Err(Error::CorruptModel(format!(
                "{what} holds {} values for a {rows}x{dim} matrix",
                self.data.len()
            )));
        }
        Ok(AtomicMatrix::from_vec(rows, dim, &self.data))
    }
}

/// On-disk form of the whole model: configuration, the four weight
/// matrices (each with its dimensions), and the vocabulary.
#[derive(Serialize, Deserialize)]
struct SavedModel {
    config: Config,
    input_weights: SavedMatrix,
    output_weights: SavedMatrix,
    output_weights_hs: SavedMatrix,
    sent_weights: SavedMatrix,
    vocab: Vec<VocabWord>,
    training_words: u64,
    training_lines: u64,
}

fn build_exp_table() -> Vec<real> {
    (0..EXP_TABLE_SIZE)
        .map(|i| {
            let j = (i as real / EXP_TABLE_SIZE as real * 2.0 - 1.0) * MAX_EXP;
            let e = (j as f64).exp() as f32;
            e / (e + 1.0)
        })
        .collect()
}

impl MonoModel {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(MonoModel {
            config,
            vocab: Vocabulary::new(),
            input_weights: AtomicMatrix::empty(),
            output_weights: AtomicMatrix::empty(),
            output_weights_hs: AtomicMatrix::empty(),
            sent_weights: AtomicMatrix::empty(),
            unigram_table: UnigramTable::default(),
            training_words: 0,
            training_lines: 0,
            words_processed: AtomicU64::new(0),
            exp_table: build_exp_table(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    pub fn training_lines(&self) -> u64 {
        self.training_lines
    }

    /// Approximate logistic function, saturating outside `±MAX_EXP`.
    pub(crate) fn sigmoid(&self, x: real) -> real {
        if x > MAX_EXP {
            1.0
        } else if x < -MAX_EXP {
            0.0
        } else {
            self.exp_table
                [((x + MAX_EXP) * ((EXP_TABLE_SIZE / MAX_EXP as usize / 2) as real)) as usize]
        }
    }

    /// Allocate and initialize the weight matrices for the current
    /// vocabulary. Input and sentence rows start uniform in
    /// `[-0.5/D, +0.5/D]`; both output matrices start at zero.
    pub(crate) fn init_net(&mut self) {
        let v = self.vocab.len();
        let d = self.config.dimension;
        let mut rng = Rng(1);

        self.input_weights = AtomicMatrix::zeros(v, d);
        self.input_weights.fill_uniform(&mut rng);

        self.output_weights = if self.config.negative > 0 {
            AtomicMatrix::zeros(v, d)
        } else {
            AtomicMatrix::empty()
        };
        self.output_weights_hs = if self.config.hierarchical_softmax {
            AtomicMatrix::zeros(v.saturating_sub(1), d)
        } else {
            AtomicMatrix::empty()
        };
        self.sent_weights = if self.config.sent_vector {
            let m = AtomicMatrix::zeros(self.training_lines as usize, d);
            m.fill_uniform(&mut rng);
            m
        } else {
            AtomicMatrix::empty()
        };
    }

    fn require_negative(&self) -> Result<()> {
        if self.output_weights.rows() == 0 {
            return Err(Error::InvalidConfig(
                "policy requires a model trained with negative sampling".into(),
            ));
        }
        Ok(())
    }

    /// The embedding of a vocabulary entry under a lookup policy:
    /// 0 = input row, 1 = negative-sampling output row, 2 = their
    /// average, 3 = their concatenation (length 2D).
    pub fn word_vec_index(&self, index: usize, policy: u32) -> Result<Vec<real>> {
        match policy {
            0 => Ok(self.input_weights.snapshot_row(index)),
            1 => {
                self.require_negative()?;
                Ok(self.output_weights.snapshot_row(index))
            }
            2 => {
                self.require_negative()?;
                let a = self.input_weights.snapshot_row(index);
                let b = self.output_weights.snapshot_row(index);
                Ok(a.iter().zip(b.iter()).map(|(x, y)| (x + y) / 2.0).collect())
            }
            3 => {
                self.require_negative()?;
                let mut v = self.input_weights.snapshot_row(index);
                v.extend(self.output_weights.snapshot_row(index));
                Ok(v)
            }
            _ => Err(Error::InvalidConfig(format!("unknown policy {policy}"))),
        }
    }

    /// The embedding of a word, or `NotInVocabulary`.
    pub fn word_vec(&self, word: &str, policy: u32) -> Result<Vec<real>> {
        let vw = self
            .vocab
            .lookup(word)
            .ok_or_else(|| Error::NotInVocabulary(word.to_string()))?;
        self.word_vec_index(vw.index, policy)
    }

    /// Save the entire model in bincode format.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        let saved = SavedModel {
            config: self.config.clone(),
            input_weights: SavedMatrix::of(&self.input_weights),
            output_weights: SavedMatrix::of(&self.output_weights),
            output_weights_hs: SavedMatrix::of(&self.output_weights_hs),
            sent_weights: SavedMatrix::of(&self.sent_weights),
            vocab: self.vocab.words().to_vec(),
            training_words: self.training_words,
            training_lines: self.training_lines,
        };
        bincode::serialize_into(BufWriter::new(file), &saved)
            .map_err(|e| Error::CorruptModel(format!("failed to write model: {e}")))
    }

    /// Load a model saved with [`MonoModel::save`], validating every
    /// dimension and count relation.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let saved: SavedModel = bincode::deserialize_from(BufReader::new(file))
            .map_err(|e| Error::CorruptModel(format!("failed to read model: {e}")))?;

        saved.config.validate()?;
        let vocab = Vocabulary::from_entries(saved.vocab)?;
        let v = vocab.len();
        let d = saved.config.dimension;

        let check = |cond: bool, msg: &str| -> Result<()> {
            if cond {
                Ok(())
            } else {
                Err(Error::CorruptModel(msg.to_string()))
            }
        };

        let input_weights = saved.input_weights.restore("input weights")?;
        let output_weights = saved.output_weights.restore("output weights")?;
        let output_weights_hs = saved.output_weights_hs.restore("softmax weights")?;
        let sent_weights = saved.sent_weights.restore("sentence weights")?;

        check(
            input_weights.rows() == v && input_weights.dim() == d || v == 0,
            "input weight matrix does not match the vocabulary",
        )?;
        if saved.config.negative > 0 {
            check(
                output_weights.rows() == v && (v == 0 || output_weights.dim() == d),
                "output weight matrix does not match the vocabulary",
            )?;
        }
        if saved.config.hierarchical_softmax {
            check(
                output_weights_hs.rows() == v.saturating_sub(1)
                    && (v < 2 || output_weights_hs.dim() == d),
                "softmax weight matrix does not match the Huffman tree",
            )?;
        }
        if saved.config.sent_vector {
            check(
                sent_weights.rows() as u64 == saved.training_lines
                    && (saved.training_lines == 0 || sent_weights.dim() == d),
                "sentence weight matrix does not match the training line count",
            )?;
        }
        for vw in vocab.words() {
            check(
                vw.code.len() == vw.path.len(),
                "Huffman code and path lengths differ",
            )?;
            for &p in &vw.path {
                check(
                    (p as usize) < v.saturating_sub(1),
                    "Huffman path references a node outside the tree",
                )?;
            }
        }

        Ok(MonoModel {
            config: saved.config,
            vocab,
            input_weights,
            output_weights,
            output_weights_hs,
            sent_weights,
            unigram_table: UnigramTable::default(),
            training_words: saved.training_words,
            training_lines: saved.training_lines,
            words_processed: AtomicU64::new(0),
            exp_table: build_exp_table(),
        })
    }

    fn word_entries(&self) -> impl Iterator<Item = &VocabWord> {
        self.vocab.words().iter().filter(|vw| !vw.is_sent_id)
    }

    fn export_dim(&self, policy: u32) -> usize {
        if policy == 3 {
            2 * self.config.dimension
        } else {
            self.config.dimension
        }
    }

    /// Save word embeddings in the word2vec text format. Sentence-id
    /// entries are not included.
    pub fn save_vectors(&self, path: &Path, policy: u32) -> Result<()> {
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        let mut fo = BufWriter::new(file);
        let io_err = |e| Error::io(path, e);

        let n = self.word_entries().count();
        writeln!(fo, "{} {}", n, self.export_dim(policy)).map_err(io_err)?;
        for vw in self.word_entries() {
            write!(fo, "{}", vw.word).map_err(io_err)?;
            for x in self.word_vec_index(vw.index, policy)? {
                write!(fo, " {x}").map_err(io_err)?;
            }
            writeln!(fo).map_err(io_err)?;
        }
        Ok(())
    }

    /// Save word embeddings in the word2vec binary format.
    pub fn save_vectors_bin(&self, path: &Path, policy: u32) -> Result<()> {
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        let mut fo = BufWriter::new(file);
        let io_err = |e| Error::io(path, e);

        let n = self.word_entries().count();
        writeln!(fo, "{} {}", n, self.export_dim(policy)).map_err(io_err)?;
        for vw in self.word_entries() {
            write!(fo, "{} ", vw.word).map_err(io_err)?;
            let row = self.word_vec_index(vw.index, policy)?;
            fo.write_all(bytemuck::cast_slice::<real, u8>(&row))
                .map_err(io_err)?;
            writeln!(fo).map_err(io_err)?;
        }
        Ok(())
    }

    /// Save the trained paragraph vectors, one `<s_N>` line per training
    /// sentence, in the text format.
    pub fn save_sent_vectors(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        let mut fo = BufWriter::new(file);
        let io_err = |e| Error::io(path, e);

        writeln!(fo, "{} {}", self.sent_weights.rows(), self.sent_weights.dim())
            .map_err(io_err)?;
        for s in 0..self.sent_weights.rows() {
            write!(fo, "{}", crate::vocab::sent_id_token(s as u64)).map_err(io_err)?;
            for x in self.sent_weights.snapshot_row(s) {
                write!(fo, " {x}").map_err(io_err)?;
            }
            writeln!(fo).map_err(io_err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_table_tracks_exact_sigmoid() {
        let model = MonoModel::new(Config::default()).unwrap();
        for i in -60..=60 {
            let x = i as real / 10.0;
            let exact = 1.0 / (1.0 + (-x).exp());
            assert!(
                (model.sigmoid(x) - exact).abs() < 5e-3,
                "sigmoid({x}) = {} vs {exact}",
                model.sigmoid(x)
            );
        }
        assert_eq!(model.sigmoid(7.0), 1.0);
        assert_eq!(model.sigmoid(-7.0), 0.0);
    }

    #[test]
    fn matrix_snapshot_roundtrip() {
        let values: Vec<real> = (0..12).map(|i| i as real / 7.0).collect();
        let m = AtomicMatrix::from_vec(3, 4, &values);
        assert_eq!(m.snapshot(), values);
        assert_eq!(m.snapshot_row(1), &values[4..8]);
    }

    #[test]
    fn uniform_init_is_bounded_by_half_over_dim() {
        let m = AtomicMatrix::zeros(10, 16);
        m.fill_uniform(&mut Rng(1));
        let bound = 0.5 / 16.0;
        for x in m.snapshot() {
            assert!(x.abs() <= bound);
        }
    }

    #[test]
    fn load_rejects_garbage() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        f.write_all(b"not a model file at all").unwrap();
        assert!(matches!(
            MonoModel::load(f.path()),
            Err(Error::CorruptModel(_))
        ));
    }

    #[test]
    fn empty_model_rejects_unknown_word() {
        let model = MonoModel::new(Config::default()).unwrap();
        assert!(matches!(
            model.word_vec("missing", 0),
            Err(Error::NotInVocabulary(_))
        ));
    }

    #[test]
    fn unknown_policy_is_invalid() {
        let model = MonoModel::new(Config::default()).unwrap();
        assert!(matches!(
            model.word_vec_index(0, 4),
            Err(Error::InvalidConfig(_))
        ));
    }
}
