use serde::Serialize;

/// Result reported by a transcriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    /// Provisional text for the utterance in progress; replaces earlier interim text
    Interim(String),
    /// Settled text for a finished utterance
    Final(String),
    /// Recognition error; the session keeps running
    Error(String),
    /// The transcriber stopped producing results
    Ended,
}

/// Settled and provisional text, kept apart
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    final_text: String,
    interim_text: String,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn final_text(&self) -> &str {
        &self.final_text
    }

    pub fn interim_text(&self) -> &str {
        &self.interim_text
    }

    pub fn set_interim(&mut self, text: &str) {
        self.interim_text.clear();
        self.interim_text.push_str(text.trim());
    }

    /// Append a settled utterance and drop the interim text it supersedes
    pub fn push_final(&mut self, text: &str) {
        let text = text.trim();
        if !text.is_empty() {
            if !self.final_text.is_empty() {
                self.final_text.push(' ');
            }
            self.final_text.push_str(text);
        }
        self.interim_text.clear();
    }

    /// Apply one transcriber event. Returns true if the text changed.
    pub fn apply(&mut self, event: &TranscriptEvent) -> bool {
        match event {
            TranscriptEvent::Interim(text) => {
                let changed = self.interim_text != text.trim();
                self.set_interim(text);
                changed
            }
            TranscriptEvent::Final(text) => {
                let changed = !text.trim().is_empty() || !self.interim_text.is_empty();
                self.push_final(text);
                changed
            }
            TranscriptEvent::Error(_) | TranscriptEvent::Ended => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.final_text.is_empty() && self.interim_text.is_empty()
    }

    pub fn clear(&mut self) {
        self.final_text.clear();
        self.interim_text.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interim_replaces_interim() {
        let mut transcript = Transcript::new();
        transcript.apply(&TranscriptEvent::Interim("hel".into()));
        transcript.apply(&TranscriptEvent::Interim("hello wor".into()));

        assert_eq!(transcript.interim_text(), "hello wor");
        assert_eq!(transcript.final_text(), "");
    }

    #[test]
    fn test_final_appends_and_clears_interim() {
        let mut transcript = Transcript::new();
        transcript.apply(&TranscriptEvent::Interim("hello wor".into()));
        transcript.apply(&TranscriptEvent::Final("hello world".into()));
        transcript.apply(&TranscriptEvent::Interim("how are".into()));
        transcript.apply(&TranscriptEvent::Final(" how are you ".into()));

        assert_eq!(transcript.final_text(), "hello world how are you");
        assert_eq!(transcript.interim_text(), "");
    }

    #[test]
    fn test_interim_never_leaks_into_final() {
        let mut transcript = Transcript::new();
        transcript.apply(&TranscriptEvent::Final("one".into()));
        transcript.apply(&TranscriptEvent::Interim("[two".into()));
        transcript.apply(&TranscriptEvent::Error("no-speech".into()));

        assert_eq!(transcript.final_text(), "one");
        assert_eq!(transcript.interim_text(), "[two");
    }

    #[test]
    fn test_apply_reports_changes() {
        let mut transcript = Transcript::new();
        assert!(transcript.apply(&TranscriptEvent::Interim("a".into())));
        assert!(!transcript.apply(&TranscriptEvent::Interim("a".into())));
        assert!(transcript.apply(&TranscriptEvent::Final("a".into())));
        assert!(!transcript.apply(&TranscriptEvent::Ended));
        assert!(!transcript.is_empty());

        transcript.clear();
        assert!(transcript.is_empty());
    }
}
