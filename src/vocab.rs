use std::cmp::Reverse;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Split a line of text into tokens. Tokens are sequences of
/// non-whitespace bytes; UTF-8 is treated opaquely and no casefolding is
/// performed.
pub fn tokenize(line: &str) -> impl Iterator<Item = &str> {
    line.split_ascii_whitespace()
}

/// The synthetic token prepended to sentence `n` of the training file
/// when sentence vectors are enabled.
pub fn sent_id_token(n: u64) -> String {
    format!("<s_{n}>")
}

/// One vocabulary leaf: a distinct token that survived the `min_count`
/// filter, with its Huffman code and the internal nodes on its
/// root-to-leaf path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabWord {
    pub word: String,
    pub count: u64,
    pub index: usize,
    /// Bits from root to leaf; 0 means "left" (the positive class).
    pub code: Vec<u8>,
    /// Internal-node indices from root to leaf; same length as `code`.
    pub path: Vec<u32>,
    pub is_sent_id: bool,
}

#[derive(Debug, Default)]
pub struct Vocabulary {
    words: Vec<VocabWord>,
    index: HashMap<String, usize>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Vocabulary::default()
    }

    /// Single pass over a training file: tokenize each line, count
    /// tokens, then drop entries below `min_count`, reassign contiguous
    /// indices and build the Huffman tree. When `sent_vector` is set,
    /// every line also contributes a sentence-id entry that is exempt
    /// from the `min_count` filter.
    ///
    /// Returns the vocabulary and the number of lines in the file.
    pub fn from_training_file(
        path: &Path,
        min_count: u64,
        sent_vector: bool,
    ) -> Result<(Vocabulary, u64)> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let mut reader = BufReader::new(file);
        let mut vocab = Vocabulary::new();

        let mut line = Vec::new();
        let mut lines: u64 = 0;
        loop {
            line.clear();
            let n = reader
                .read_until(b'\n', &mut line)
                .map_err(|e| Error::io(path, e))?;
            if n == 0 {
                break;
            }
            if sent_vector {
                vocab.add_sent_id(lines);
            }
            let text = String::from_utf8_lossy(&line);
            for token in tokenize(&text) {
                vocab.add_word(token);
            }
            lines += 1;
        }

        vocab.finish(min_count);
        Ok((vocab, lines))
    }

    /// Rebuild a vocabulary from stored entries (model load path).
    pub fn from_entries(words: Vec<VocabWord>) -> Result<Vocabulary> {
        let mut index = HashMap::with_capacity(words.len());
        for (i, vw) in words.iter().enumerate() {
            if vw.index != i {
                return Err(Error::CorruptModel(format!(
                    "vocabulary entry {i} has index {}",
                    vw.index
                )));
            }
            if index.insert(vw.word.clone(), i).is_some() {
                return Err(Error::CorruptModel(format!(
                    "duplicate vocabulary entry {:?}",
                    vw.word
                )));
            }
        }
        Ok(Vocabulary { words, index })
    }

    fn add_word(&mut self, word: &str) {
        if let Some(&i) = self.index.get(word) {
            self.words[i].count += 1;
        } else {
            let n = self.words.len();
            self.words.push(VocabWord {
                word: word.to_string(),
                count: 1,
                index: n,
                code: Vec::new(),
                path: Vec::new(),
                is_sent_id: false,
            });
            self.index.insert(word.to_string(), n);
        }
    }

    fn add_sent_id(&mut self, line: u64) {
        let word = sent_id_token(line);
        let n = self.words.len();
        self.index.insert(word.clone(), n);
        self.words.push(VocabWord {
            word,
            count: 1,
            index: n,
            code: Vec::new(),
            path: Vec::new(),
            is_sent_id: true,
        });
    }

    /// Apply the `min_count` filter, make indices contiguous again and
    /// assign Huffman codes.
    fn finish(&mut self, min_count: u64) {
        self.words
            .retain(|vw| vw.is_sent_id || vw.count >= min_count);
        self.index.clear();
        for (i, vw) in self.words.iter_mut().enumerate() {
            vw.index = i;
            self.index.insert(vw.word.clone(), i);
        }
        self.build_huffman();
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn lookup(&self, word: &str) -> Option<&VocabWord> {
        self.index.get(word).map(|&i| &self.words[i])
    }

    pub fn get(&self, index: usize) -> &VocabWord {
        &self.words[index]
    }

    pub fn words(&self) -> &[VocabWord] {
        &self.words
    }

    /// Total count over non-sentence-id entries; the `N` of the
    /// subsampling formula and of the learning-rate decay.
    pub fn training_words(&self) -> u64 {
        self.words
            .iter()
            .filter(|vw| !vw.is_sent_id)
            .map(|vw| vw.count)
            .sum()
    }

    // Create binary Huffman tree using the word counts. Frequent words
    // get short unique binary codes. Leaves enter the two-queue
    // construction in descending count order, so a sorted permutation of
    // the vocabulary is built first; indices stay in insertion order.
    #[allow(clippy::needless_range_loop)]
    fn build_huffman(&mut self) {
        let vocab_size = self.words.len();
        for vw in &mut self.words {
            vw.code.clear();
            vw.path.clear();
        }
        // With a single leaf the root is the leaf: no internal nodes, no code.
        if vocab_size < 2 {
            return;
        }

        let mut order: Vec<usize> = (0..vocab_size).collect();
        order.sort_by_key(|&i| Reverse(self.words[i].count));

        let mut count = vec![0u64; vocab_size * 2 + 1];
        let mut binary = vec![0u8; vocab_size * 2 + 1]; // which child a node is of its parent
        let mut parent_node = vec![0usize; vocab_size * 2 + 1];

        for a in 0..vocab_size {
            count[a] = self.words[order[a]].count;
        }
        for a in vocab_size..(vocab_size * 2) {
            count[a] = 1_000_000_000_000_000;
        }

        let mut pos1 = vocab_size;
        let mut pos2 = vocab_size;
        // Constructs the tree by adding one internal node at a time.
        for a in 0..(vocab_size - 1) {
            // First, find two smallest nodes 'min1, min2'
            let min1i;
            if pos1 > 0 && count[pos1 - 1] < count[pos2] {
                pos1 -= 1;
                min1i = pos1;
            } else {
                min1i = pos2;
                pos2 += 1;
            }

            let min2i;
            if pos1 > 0 && count[pos1 - 1] < count[pos2] {
                pos1 -= 1;
                min2i = pos1;
            } else {
                min2i = pos2;
                pos2 += 1;
            }

            count[vocab_size + a] = count[min1i] + count[min2i];
            parent_node[min1i] = vocab_size + a;
            parent_node[min2i] = vocab_size + a;
            binary[min2i] = 1;
        }

        // Walk from each leaf to the root, then flip the collected code
        // and path so they read root-to-leaf.
        for a in 0..vocab_size {
            let mut code: Vec<u8> = vec![];
            let mut path: Vec<u32> = vec![];
            let mut b = a;
            loop {
                if !code.is_empty() {
                    path.push((b - vocab_size) as u32);
                }
                code.push(binary[b]);
                b = parent_node[b];
                if b == vocab_size * 2 - 2 {
                    break;
                }
            }
            code.reverse();
            path.push((vocab_size - 2) as u32);
            path.reverse();
            let vw = &mut self.words[order[a]];
            vw.code = code;
            vw.path = path;
        }
    }
}
