use crate::request::ConversationId;

/// Association between one session and the conversation its frames may
/// mutate.
///
/// The target is the resolved id once the backend disclosed it, otherwise the
/// conversation displayed when the session started. Callers must ask
/// [`ConversationBinding::may_mutate`] for every frame; the answer changes as
/// the user navigates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationBinding {
    started: Option<ConversationId>,
    resolved: Option<ConversationId>,
}

impl ConversationBinding {
    pub fn new(started: Option<ConversationId>) -> Self {
        Self {
            started,
            resolved: None,
        }
    }

    pub fn started(&self) -> Option<&ConversationId> {
        self.started.as_ref()
    }

    pub fn resolved(&self) -> Option<&ConversationId> {
        self.resolved.as_ref()
    }

    /// Records the backend-disclosed id. Write-once: later calls are ignored
    /// and return false.
    pub fn resolve(&mut self, id: ConversationId) -> bool {
        if self.resolved.is_some() {
            return false;
        }
        self.resolved = Some(id);
        true
    }

    /// Conversation the session is bound to, if it has an id yet.
    pub fn target(&self) -> Option<&ConversationId> {
        self.resolved.as_ref().or(self.started.as_ref())
    }

    /// Whether a frame may touch the UI while `displayed` is on screen.
    ///
    /// A session for a brand-new conversation (no id on either side) is
    /// eligible only while nothing is selected.
    pub fn may_mutate(&self, displayed: Option<&ConversationId>) -> bool {
        match (self.target(), displayed) {
            (Some(target), Some(displayed)) => target == displayed,
            (None, None) => true,
            _ => false,
        }
    }
}
