//! Heuristic scores attached to traces: plain substring checks on model output.

use serde::{Deserialize, Serialize};

pub const LOW_CONFIDENCE: f64 = 0.3;
pub const MEDIUM_CONFIDENCE: f64 = 0.7;
pub const HIGH_CONFIDENCE: f64 = 0.9;

const UNSURE_MARKERS: [&str; 2] = ["I don't know", "I'm not sure"];
const HEDGE_MARKERS: [&str; 2] = ["might be", "possibly"];

/// Confidence of an answer, judged from hedging phrases in its text.
pub fn confidence_score(text: &str) -> f64 {
    if UNSURE_MARKERS.iter().any(|m| text.contains(m)) {
        LOW_CONFIDENCE
    } else if HEDGE_MARKERS.iter().any(|m| text.contains(m)) {
        MEDIUM_CONFIDENCE
    } else {
        HIGH_CONFIDENCE
    }
}

/// Sentiment distribution as returned by the model (or the fallback).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Sentiment {
    #[serde(default)]
    pub positive: f64,
    #[serde(default)]
    pub neutral: f64,
    #[serde(default)]
    pub negative: f64,
}

impl Sentiment {
    pub fn neutral() -> Self {
        Self {
            neutral: 1.0,
            ..Default::default()
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{positive: {}, neutral: {}, negative: {}}}",
            self.positive, self.neutral, self.negative
        )
    }
}

/// Reads a sentiment JSON object from model output.
///
/// When the content is not a JSON object, falls back to keyword matching:
/// "positive" wins over "negative", and anything else is fully neutral.
pub fn parse_sentiment(content: &str) -> Sentiment {
    let trimmed = content.trim();
    match serde_json::from_str::<Sentiment>(trimmed) {
        Ok(sentiment) => sentiment,
        Err(e) => {
            tracing::debug!(error = %e, "Sentiment output is not JSON; using keyword fallback");
            sentiment_fallback(trimmed)
        }
    }
}

pub fn sentiment_fallback(content: &str) -> Sentiment {
    let lowered = content.to_lowercase();
    if lowered.contains("positive") {
        Sentiment {
            positive: 0.7,
            neutral: 0.3,
            negative: 0.0,
        }
    } else if lowered.contains("negative") {
        Sentiment {
            positive: 0.0,
            neutral: 0.3,
            negative: 0.7,
        }
    } else {
        Sentiment::neutral()
    }
}

/// Negative sentiment contributes nothing.
pub fn overall_quality(sentiment: &Sentiment) -> f64 {
    sentiment.positive * 0.7 + sentiment.neutral * 0.5
}

/// Splits a model's keyword list into one keyword per line.
pub fn parse_keywords(text: &str) -> Vec<String> {
    text.trim()
        .lines()
        .map(|line| strip_list_marker(line.trim()).trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}

/// Removes a leading `1.`, `2)`, `-`, `*` or `•` marker. A marker only counts
/// when whitespace follows it, so "5G networks" and "3D printing" stay intact.
fn strip_list_marker(line: &str) -> &str {
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    let marker_len = if digits > 0 {
        match line[digits..].chars().next() {
            Some('.') | Some(')') => digits + 1,
            _ => return line,
        }
    } else {
        match line.chars().next() {
            Some(c @ ('-' | '*' | '•')) => c.len_utf8(),
            _ => return line,
        }
    };
    let rest = &line[marker_len..];
    if rest.starts_with(char::is_whitespace) {
        rest
    } else {
        line
    }
}

pub fn keyword_quality(keywords: &[String]) -> f64 {
    if keywords.len() >= 5 {
        0.9
    } else {
        0.5
    }
}
