use retrieval::config::TokenizerConfig;
use retrieval::tokenizer::{tokenize, tokenize_with};

#[test]
fn it_normalizes_and_stems() {
    let words = tokenize("Running Runners RUN! The ｃａｆé's menu.");
    // Stemming to "run" should appear
    assert!(words.contains(&"run".to_string()));
    // NFKC folds fullwidth letters
    assert!(words.iter().any(|w| w.starts_with("caf")));
}

#[test]
fn it_filters_stopwords() {
    let words = tokenize("The quick brown fox and the lazy dog");
    assert!(!words.contains(&"the".to_string()));
    assert!(!words.contains(&"and".to_string()));
    assert_eq!(words.len(), 5);
}

#[test]
fn it_splits_on_punctuation_and_keeps_numbers() {
    let cfg = TokenizerConfig { stem: false, min_len: 2 };
    assert_eq!(tokenize_with("e-mail: foo@bar.com, 2024!", &cfg), vec!["mail", "foo", "bar", "com", "2024"]);
}

#[test]
fn min_len_is_configurable() {
    let cfg = TokenizerConfig { stem: false, min_len: 4 };
    assert_eq!(tokenize_with("big data pipelines", &cfg), vec!["data", "pipelines"]);
}
