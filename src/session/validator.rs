//! Filters connection noise out of inbound text.
//!
//! Browser clients tend to emit junk right after connecting ("undefined",
//! "null", start sentinels, stray numbers). Until the first real message has
//! been accepted, a candidate must contain at least one alphabetic character.
//! After that, anything non-empty and not in the ignore set is accepted.

const IGNORE_SET: [&str; 7] = ["", " ", "\n", "undefined", "null", "__start__", "start"];

#[derive(Debug, Default)]
pub struct MessageValidator {
    seen_first_real: bool,
}

impl MessageValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `message` is real user text. Accepting the first alphabetic
    /// message flips the validator into its permissive mode for the rest of
    /// the session.
    pub fn is_valid(&mut self, message: &str) -> bool {
        let cleaned = message.trim().to_lowercase();

        if cleaned.is_empty() || IGNORE_SET.contains(&cleaned.as_str()) {
            return false;
        }

        if !self.seen_first_real {
            if cleaned.chars().any(char::is_alphabetic) {
                self.seen_first_real = true;
                return true;
            }
            return false;
        }

        true
    }

    pub fn has_seen_real_message(&self) -> bool {
        self.seen_first_real
    }
}
