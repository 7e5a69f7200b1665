use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::real;

/// Training hyper-parameters. Serialized as part of the model file so a
/// loaded model knows how it was trained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Initial learning rate, decayed linearly over training.
    pub starting_alpha: real,
    /// Number of dimensions of the embeddings.
    pub dimension: usize,
    /// Words occurring fewer times than this are dropped from the vocabulary.
    pub min_count: u64,
    /// Number of passes over the training corpus.
    pub max_iterations: usize,
    /// Maximum distance between a center word and its context words.
    pub window_size: usize,
    pub n_threads: usize,
    /// Subsampling threshold `t`; 0 disables subsampling.
    pub subsampling: real,
    pub verbose: bool,
    pub hierarchical_softmax: bool,
    /// Skip-gram if true, CBOW otherwise.
    pub skip_gram: bool,
    /// Number of negative samples per target; 0 disables negative sampling.
    pub negative: usize,
    /// Train a paragraph vector per training sentence.
    pub sent_vector: bool,
    /// Freeze the global matrices; only sentence vectors receive gradient.
    pub freeze: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            starting_alpha: 0.05,
            dimension: 100,
            min_count: 5,
            max_iterations: 5,
            window_size: 5,
            n_threads: 4,
            subsampling: 1e-3,
            verbose: false,
            hierarchical_softmax: false,
            skip_gram: false,
            negative: 5,
            sent_vector: false,
            freeze: false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(Error::InvalidConfig("dimension must be positive".into()));
        }
        if self.n_threads == 0 {
            return Err(Error::InvalidConfig("n_threads must be positive".into()));
        }
        if self.window_size == 0 {
            return Err(Error::InvalidConfig("window_size must be positive".into()));
        }
        if self.max_iterations == 0 {
            return Err(Error::InvalidConfig(
                "max_iterations must be positive".into(),
            ));
        }
        if !self.hierarchical_softmax && self.negative == 0 {
            return Err(Error::InvalidConfig(
                "no output layer: enable hierarchical softmax or negative sampling".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_dimension() {
        let config = Config {
            dimension: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn rejects_zero_threads() {
        let config = Config {
            n_threads: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn rejects_missing_output_layer() {
        let config = Config {
            hierarchical_softmax: false,
            negative: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
