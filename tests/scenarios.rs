//! End-to-end checks of training, inference and persistence on small
//! hand-built corpora.

use std::fs;
use std::io::Write;

use monovec::{cosine, norm, Config, Embeddings, Error, MonoModel, Rng};

fn corpus(text: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(text.as_bytes()).unwrap();
    f
}

/// Single-threaded CBOW + hierarchical softmax, no subsampling.
fn hs_config() -> Config {
    Config {
        starting_alpha: 0.05,
        dimension: 4,
        min_count: 1,
        max_iterations: 1,
        window_size: 2,
        n_threads: 1,
        subsampling: 0.0,
        verbose: false,
        hierarchical_softmax: true,
        skip_gram: false,
        negative: 0,
        sent_vector: false,
        freeze: false,
    }
}

fn trained_abc() -> MonoModel {
    let f = corpus("a b c a b c a b c\n");
    let mut model = MonoModel::new(hs_config()).unwrap();
    model.train(f.path()).unwrap();
    model
}

#[test]
fn tiny_corpus_vocabulary_and_self_similarity() {
    let model = trained_abc();

    assert_eq!(model.vocab().len(), 3);
    for w in ["a", "b", "c"] {
        assert_eq!(model.vocab().lookup(w).unwrap().count, 3);
    }
    assert_eq!(model.similarity("a", "a", 0).unwrap(), 1.0);
}

#[test]
fn single_surviving_word_means_no_softmax_updates() {
    let f = corpus("x x x x x x x x x x\n");
    let mut config = hs_config();
    config.min_count = 2;
    let mut model = MonoModel::new(config).unwrap();
    model.train(f.path()).unwrap();

    assert_eq!(model.vocab().len(), 1);
    let x = model.vocab().lookup("x").unwrap();
    assert_eq!(x.count, 10);
    assert!(x.code.is_empty());
    assert!(x.path.is_empty());

    // With zero internal nodes there is no gradient, so the input row
    // still holds its seeded initialization.
    let mut rng = Rng(1);
    let expected: Vec<f32> = (0..4).map(|_| (rng.rand_real() - 0.5) / 4.0).collect();
    assert_eq!(model.word_vec("x", 0).unwrap(), expected);
}

#[test]
fn ngram_similarity_error_cases() {
    let model = trained_abc();

    assert!(matches!(
        model.similarity_ngrams("foo bar", "foo", 0),
        Err(Error::LengthMismatch { left: 2, right: 1 })
    ));
    assert!(matches!(
        model.similarity_ngrams("OOV1 OOV2", "OOV3 OOV4", 0),
        Err(Error::AllOov)
    ));
    // known pairs still average
    let sim = model.similarity_ngrams("a b", "a c", 0).unwrap();
    assert!((-1.0..=1.0).contains(&sim));
}

#[test]
fn cosine_bounds_symmetry_and_distance() {
    let text = "the quick brown fox jumps over the lazy dog\n".repeat(10);
    let f = corpus(&text);
    let mut config = hs_config();
    config.dimension = 8;
    config.max_iterations = 5;
    let mut model = MonoModel::new(config).unwrap();
    model.train(f.path()).unwrap();

    let words = ["the", "quick", "brown", "fox", "dog"];
    for w1 in words {
        for w2 in words {
            let sim = model.similarity(w1, w2, 0).unwrap();
            let rev = model.similarity(w2, w1, 0).unwrap();
            assert!((-1.0 - 1e-5..=1.0 + 1e-5).contains(&sim), "{w1}/{w2}: {sim}");
            assert!((sim - rev).abs() < 1e-6);
            assert!((model.distance(w1, w2, 0).unwrap() - (1.0 - sim)).abs() < 1e-6);
        }
    }

    model.normalize_weights();
    for w1 in words {
        for w2 in words {
            let sim = model.similarity(w1, w2, 0).unwrap();
            assert!(
                (-1e-5..=1.0 + 1e-5).contains(&sim),
                "{w1}/{w2} after normalization: {sim}"
            );
        }
    }
}

#[test]
fn paragraph_vector_inference_matches_stored_vector() {
    let lines = [
        "apple banana apple banana apple banana apple banana",
        "cat dog cat dog cat dog cat dog",
        "sun moon sun moon sun moon sun moon",
    ];
    let f = corpus(&(lines.join("\n") + "\n"));
    let config = Config {
        starting_alpha: 0.05,
        dimension: 8,
        min_count: 1,
        max_iterations: 50,
        window_size: 3,
        n_threads: 1,
        subsampling: 0.0,
        verbose: false,
        hierarchical_softmax: true,
        skip_gram: false,
        negative: 0,
        sent_vector: true,
        freeze: false,
    };
    let mut model = MonoModel::new(config).unwrap();
    model.train(f.path()).unwrap();

    // Read the trained sentence vectors back through the export.
    let out = tempfile::NamedTempFile::new().unwrap();
    model.save_sent_vectors(out.path()).unwrap();
    let text = fs::read_to_string(out.path()).unwrap();
    let stored: Vec<Vec<f32>> = text
        .lines()
        .skip(1)
        .map(|l| {
            l.split_whitespace()
                .skip(1)
                .map(|x| x.parse().unwrap())
                .collect()
        })
        .collect();
    assert_eq!(stored.len(), 3);

    for (i, line) in lines.iter().enumerate() {
        let v = model.sent_vec(line).unwrap();
        let cos = cosine(&v, &stored[i]);
        assert!(cos > 0.5, "sentence {i}: cosine with stored vector is {cos}");
    }
}

#[test]
fn model_roundtrip_is_byte_exact() {
    let f = corpus("a b c d e a b c d a b c a b a\nf g h f g f\na c e g b d f h\n");
    let config = Config {
        starting_alpha: 0.05,
        dimension: 4,
        min_count: 1,
        max_iterations: 2,
        window_size: 2,
        n_threads: 1,
        subsampling: 0.0,
        verbose: false,
        hierarchical_softmax: true,
        skip_gram: false,
        negative: 2,
        sent_vector: false,
        freeze: false,
    };
    let mut model = MonoModel::new(config).unwrap();
    model.train(f.path()).unwrap();

    let first = tempfile::NamedTempFile::new().unwrap();
    model.save(first.path()).unwrap();
    let loaded = MonoModel::load(first.path()).unwrap();

    assert_eq!(loaded.vocab().len(), model.vocab().len());
    for vw in model.vocab().words() {
        let back = loaded.vocab().lookup(&vw.word).unwrap();
        assert_eq!(back.index, vw.index);
        assert_eq!(back.count, vw.count);
        assert_eq!(back.code, vw.code);
        assert_eq!(back.path, vw.path);
    }
    for vw in model.vocab().words() {
        for policy in 0..4 {
            assert_eq!(
                loaded.word_vec(&vw.word, policy).unwrap(),
                model.word_vec(&vw.word, policy).unwrap()
            );
        }
    }

    // Saving the loaded model reproduces the file byte for byte.
    let second = tempfile::NamedTempFile::new().unwrap();
    loaded.save(second.path()).unwrap();
    assert_eq!(
        fs::read(first.path()).unwrap(),
        fs::read(second.path()).unwrap()
    );
}

#[test]
fn policy_shapes_with_negative_sampling() {
    let f = corpus("a b c d a b c a b a\n");
    let config = Config {
        starting_alpha: 0.05,
        dimension: 4,
        min_count: 1,
        max_iterations: 1,
        window_size: 2,
        n_threads: 1,
        subsampling: 0.0,
        verbose: false,
        hierarchical_softmax: false,
        skip_gram: true,
        negative: 2,
        sent_vector: false,
        freeze: false,
    };
    let mut model = MonoModel::new(config).unwrap();
    model.train(f.path()).unwrap();

    let input = model.word_vec("a", 0).unwrap();
    let output = model.word_vec("a", 1).unwrap();
    let average = model.word_vec("a", 2).unwrap();
    let both = model.word_vec("a", 3).unwrap();
    assert_eq!(input.len(), 4);
    assert_eq!(output.len(), 4);
    assert_eq!(both.len(), 8);
    assert_eq!(both[..4], input[..]);
    assert_eq!(both[4..], output[..]);
    for i in 0..4 {
        assert!((average[i] - (input[i] + output[i]) / 2.0).abs() < 1e-7);
    }
}

#[test]
fn output_policies_require_negative_sampling() {
    let model = trained_abc();
    for policy in 1..=3 {
        assert!(matches!(
            model.word_vec("a", policy),
            Err(Error::InvalidConfig(_))
        ));
    }
}

#[test]
fn sent_vec_file_writes_one_vector_per_line() {
    let model = trained_abc();
    let input = corpus("a b c\nzzz qqq\n");
    let output = tempfile::NamedTempFile::new().unwrap();
    model.sent_vec_file(input.path(), output.path()).unwrap();

    let text = fs::read_to_string(output.path()).unwrap();
    let rows: Vec<Vec<f32>> = text
        .lines()
        .map(|l| l.split_whitespace().map(|x| x.parse().unwrap()).collect())
        .collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].len(), 4);
    assert!(rows[0].iter().any(|&x| x != 0.0));
    assert_eq!(rows[1], vec![0.0; 4]);
}

#[test]
fn binary_export_roundtrips_through_embeddings() {
    let model = trained_abc();
    let out = tempfile::NamedTempFile::new().unwrap();
    model.save_vectors_bin(out.path(), 0).unwrap();

    let vectors = Embeddings::load(out.path()).unwrap();
    assert_eq!(vectors.num_words(), 3);
    assert_eq!(vectors.size(), 4);
    for w in ["a", "b", "c"] {
        let i = vectors.lookup_word(w).unwrap();
        assert!((norm(&vectors[i]) - 1.0).abs() < 1e-4);
    }
    assert!(vectors.lookup_word("d").is_none());
}

#[test]
fn text_export_header_and_rows() {
    let model = trained_abc();
    let out = tempfile::NamedTempFile::new().unwrap();
    model.save_vectors(out.path(), 0).unwrap();

    let text = fs::read_to_string(out.path()).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("3 4"));
    let mut words = vec![];
    for line in lines {
        let mut fields = line.split_whitespace();
        words.push(fields.next().unwrap().to_string());
        assert_eq!(fields.count(), 4);
    }
    words.sort();
    assert_eq!(words, ["a", "b", "c"]);
}

#[test]
fn analogy_evaluation_sections_and_skips() {
    let model = trained_abc();
    let questions = corpus(": letters\na b c missing\na b c a\nx y z w\n");
    let report = model.compute_accuracy(questions.path(), 0).unwrap();

    assert_eq!(report.sections.len(), 1);
    assert_eq!(report.sections[0].name, "letters");
    assert_eq!(report.total, 1);
    assert_eq!(report.sections[0].total, 1);
    assert_eq!(report.skipped, 2);
}

#[test]
fn multithreaded_training_covers_all_lines() {
    let text = "alpha beta gamma delta\n".repeat(12);
    let f = corpus(&text);
    let mut config = hs_config();
    config.n_threads = 3;
    config.max_iterations = 2;
    let mut model = MonoModel::new(config).unwrap();
    model.train(f.path()).unwrap();

    assert_eq!(model.vocab().len(), 4);
    for w in ["alpha", "beta", "gamma", "delta"] {
        assert_eq!(model.vocab().lookup(w).unwrap().count, 12);
    }
    assert_eq!(model.training_lines(), 12);
}
