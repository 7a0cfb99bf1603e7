use crate::config::TokenizerConfig;
use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref ALNUM_RUN: Regex = Regex::new(r"[\p{L}\p{N}]+").expect("valid regex");
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
    // Apostrophes split tokens, so contractions appear here as their fragments ("don", "ll").
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","ain","all","am","an","and","any","are","aren","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","could","couldn",
            "did","didn","do","does","doesn","doing","don","down","during",
            "each","few","for","from","further",
            "had","hadn","has","hasn","have","haven","having","he","her","here","hers","herself","him","himself","his","how",
            "i","if","in","into","is","isn","it","its","itself",
            "just","ll","me","more","most","mustn","my","myself",
            "needn","no","nor","not","now","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "re","same","shan","she","should","shouldn","so","some","such",
            "than","that","the","their","theirs","them","themselves","then","there","these","they","this","those","through","to","too",
            "under","until","up","ve","very",
            "was","wasn","we","were","weren","what","when","where","which","while","who","whom","why","will","with","won","would","wouldn",
            "you","your","yours","yourself","yourselves"
        ];
        words.iter().copied().collect()
    };
}

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(token)
}

/// Tokenize with the default configuration (stemming on, single characters dropped).
pub fn tokenize(text: &str) -> Vec<String> {
    tokenize_with(text, &TokenizerConfig::default())
}

/// NFKC-normalize and lowercase `text`, split it into alphanumeric runs, drop short
/// tokens and stop-words, and optionally stem what remains.
pub fn tokenize_with(text: &str, config: &TokenizerConfig) -> Vec<String> {
    let normalized = text.nfkc().collect::<String>().to_lowercase();
    let mut tokens = Vec::new();
    for mat in ALNUM_RUN.find_iter(&normalized) {
        let token = mat.as_str();
        if token.chars().count() < config.min_len || is_stopword(token) {
            continue;
        }
        if config.stem {
            tokens.push(STEMMER.stem(token).into_owned());
        } else {
            tokens.push(token.to_string());
        }
    }
    tokens
}
