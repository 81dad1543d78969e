//! Session configuration shared by both adapter variants.

/// Which adapter variant drives a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionMode {
    /// Duplex low-latency voice over the live WebSocket API.
    Live,
    /// Turn-based text chat over the streaming HTTP API.
    Chat,
}

/// Parameters fixed for the lifetime of one connection.
///
/// There is no in-place mutation: changing any of these requires tearing the
/// session down and connecting a new one.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Prebuilt voice name used for synthesized speech.
    pub voice: String,
    pub temperature: f64,
    pub top_p: f64,
    /// System instruction sent with the session setup. May be empty.
    pub system_instruction: String,
    /// Declares the `report_score` tool and instructs the model to use it.
    pub score_tracking: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            voice: "Aoede".to_string(),
            temperature: 0.5,
            top_p: 0.95,
            system_instruction: String::new(),
            score_tracking: false,
        }
    }
}

const SCORE_DIRECTIVE: &str = "\n\nIMPORTANT: You are configured to track the user's answer quality. \
When the user answers, you MUST evaluate it and call the \"report_score\" function with a score from 0 to 10.";

impl SessionConfig {
    /// The instruction actually sent upstream: when score tracking is on,
    /// the scoring directive is appended so the model knows to call the tool.
    pub fn effective_instruction(&self) -> String {
        if self.score_tracking {
            format!("{}{}", self.system_instruction, SCORE_DIRECTIVE)
        } else {
            self.system_instruction.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_session_parameters() {
        let config = SessionConfig::default();
        assert_eq!(config.voice, "Aoede");
        assert_eq!(config.temperature, 0.5);
        assert_eq!(config.top_p, 0.95);
        assert!(!config.score_tracking);
    }

    #[test]
    fn instruction_untouched_without_score_tracking() {
        let config = SessionConfig {
            system_instruction: "Review the note with the user.".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.effective_instruction(),
            "Review the note with the user."
        );
    }

    #[test]
    fn instruction_augmented_when_score_tracking() {
        let config = SessionConfig {
            system_instruction: "Quiz the user.".to_string(),
            score_tracking: true,
            ..Default::default()
        };
        let instruction = config.effective_instruction();
        assert!(instruction.starts_with("Quiz the user."));
        assert!(instruction.contains("report_score"));
    }
}
