//! Text segmentation - split text into sentences, lines or paragraphs

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    // Terminal punctuation followed by whitespace or end of text
    static ref SENTENCE_END: Regex = Regex::new(r"[.!?]+(?:\s+|$)").unwrap();
    static ref PARAGRAPH_BREAK: Regex = Regex::new(r"\n\s*\n").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Segmentation options; with no split mode set the whole text is one segment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Segmentation {
    pub sentences: bool,
    pub lines: bool,
    pub paragraphs: bool,
    /// Segments shorter than this (in characters) are dropped
    pub minlength: Option<usize>,
}

impl Segmentation {
    pub fn sentences() -> Self {
        Self {
            sentences: true,
            ..Self::default()
        }
    }

    /// Split `text`, collapse whitespace inside each piece and drop empty
    /// or too-short pieces
    pub fn segment(&self, text: &str) -> Vec<String> {
        let pieces: Vec<&str> = if self.sentences {
            split_sentences(text)
        } else if self.lines {
            text.lines().collect()
        } else if self.paragraphs {
            PARAGRAPH_BREAK.split(text).collect()
        } else {
            vec![text]
        };

        pieces
            .into_iter()
            .map(|piece| WHITESPACE.replace_all(piece.trim(), " ").into_owned())
            .filter(|piece| !piece.is_empty())
            .filter(|piece| {
                self.minlength
                    .map_or(true, |min| piece.chars().count() >= min)
            })
            .collect()
    }
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(text) {
        sentences.push(&text[start..m.end()]);
        start = m.end();
    }
    if start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences
}
