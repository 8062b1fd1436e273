//! # Workflows Module
//!
//! Multi-step example programs. Each one opens its own trace, nests spans and
//! generations below it, attaches scores, and prints excerpts of what the
//! models returned. Flushing is left to the caller (see `langfuse::with_flush`).

pub mod anthropic_research;
pub mod bedrock_comparison;
pub mod content_processing;
pub mod document_chains;
pub mod quickstart;

/// The first `max_chars` characters of `text`, followed by `...`.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", head)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        assert_eq!(excerpt("Qubits können überlagert sein", 9), "Qubits kö...");
        assert_eq!(excerpt("short", 200), "short...");
        assert_eq!(excerpt("", 10), "...");
    }
}
