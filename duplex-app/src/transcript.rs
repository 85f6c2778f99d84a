//! Running transcript of committed utterances.

use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptLog {
    utterances: Vec<String>,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a final utterance. Blank text is ignored.
    pub fn push_final(&mut self, text: &str) {
        let text = text.trim();
        if !text.is_empty() {
            self.utterances.push(text.to_string());
        }
    }

    /// All utterances joined with single spaces.
    pub fn text(&self) -> String {
        self.utterances.join(" ")
    }

    pub fn utterances(&self) -> &[String] {
        &self.utterances
    }

    pub fn len(&self) -> usize {
        self.utterances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }

    pub fn clear(&mut self) {
        self.utterances.clear();
    }
}
