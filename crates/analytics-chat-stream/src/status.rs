/// Single "current status" slot of one streaming message.
///
/// Each update replaces the slot; nothing is ever appended.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusProjector {
    slot: Option<String>,
}

impl StatusProjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the slot text. Returns false for blank text or when the text
    /// is already shown.
    pub fn replace(&mut self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() || self.slot.as_deref() == Some(text) {
            return false;
        }
        self.slot = Some(text.to_string());
        true
    }

    /// Text currently in the slot, or an empty string.
    pub fn current(&self) -> &str {
        self.slot.as_deref().unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_replaces_instead_of_appending() {
        let mut status = StatusProjector::new();
        assert!(status.replace("Planning query"));
        assert!(status.replace("Running query"));
        assert_eq!(status.current(), "Running query");
    }

    #[test]
    fn repeated_and_blank_updates_are_ignored() {
        let mut status = StatusProjector::new();
        assert!(status.replace("Loading"));
        assert!(!status.replace("Loading"));
        assert!(!status.replace("   "));
        assert_eq!(status.current(), "Loading");
    }

    #[test]
    fn clear_empties_the_slot() {
        let mut status = StatusProjector::new();
        status.replace("Loading");
        status.clear();
        assert_eq!(status.current(), "");
    }
}
