//! Encoder attachment state machine.

/// Where the encoder attachment currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttachState {
    #[default]
    Detached,
    Attaching,
    Attached,
    Detaching,
}

/// Engine call to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Attach,
    Detach,
}

/// Attachment state plus the state callers asked for.
///
/// At most one transition is in flight. Requests made meanwhile only
/// update `desired`; [`Attachment::completed`] then starts whatever
/// transition is still needed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attachment {
    state: AttachState,
    desired: bool,
}

impl Attachment {
    pub const fn state(&self) -> AttachState {
        self.state
    }

    pub const fn desired(&self) -> bool {
        self.desired
    }

    pub const fn is_attached(&self) -> bool {
        matches!(self.state, AttachState::Attached)
    }

    /// Record the wanted state and return the transition to start, if any.
    pub fn request(&mut self, attached: bool) -> Option<Transition> {
        self.desired = attached;
        self.reconcile()
    }

    /// Record the end of the in-flight transition.
    ///
    /// A failed attach leaves the encoder detached and drops the request.
    pub fn completed(&mut self, ok: bool) -> Option<Transition> {
        self.state = match (self.state, ok) {
            (AttachState::Attaching, true) => AttachState::Attached,
            (AttachState::Attaching, false) => {
                self.desired = false;
                AttachState::Detached
            }
            (AttachState::Detaching, _) => AttachState::Detached,
            (state, _) => state,
        };
        self.reconcile()
    }

    fn reconcile(&mut self) -> Option<Transition> {
        match (self.state, self.desired) {
            (AttachState::Detached, true) => {
                self.state = AttachState::Attaching;
                Some(Transition::Attach)
            }
            (AttachState::Attached, false) => {
                self.state = AttachState::Detaching;
                Some(Transition::Detach)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_are_idempotent() {
        let mut attachment = Attachment::default();
        assert_eq!(attachment.request(true), Some(Transition::Attach));
        assert_eq!(attachment.request(true), None);
        assert_eq!(attachment.completed(true), None);
        assert!(attachment.is_attached());
        assert_eq!(attachment.request(true), None);
    }

    #[test]
    fn test_detach_during_attach_runs_after() {
        let mut attachment = Attachment::default();
        assert_eq!(attachment.request(true), Some(Transition::Attach));
        assert_eq!(attachment.request(false), None);
        assert_eq!(attachment.state(), AttachState::Attaching);

        assert_eq!(attachment.completed(true), Some(Transition::Detach));
        assert_eq!(attachment.state(), AttachState::Detaching);
        assert_eq!(attachment.completed(true), None);
        assert_eq!(attachment.state(), AttachState::Detached);
    }

    #[test]
    fn test_attach_during_detach_runs_after() {
        let mut attachment = Attachment::default();
        attachment.request(true);
        attachment.completed(true);
        assert_eq!(attachment.request(false), Some(Transition::Detach));
        assert_eq!(attachment.request(true), None);
        assert_eq!(attachment.completed(true), Some(Transition::Attach));
        assert_eq!(attachment.state(), AttachState::Attaching);
    }

    #[test]
    fn test_flapping_request_settles_without_transition() {
        let mut attachment = Attachment::default();
        attachment.request(true);
        attachment.request(false);
        attachment.request(true);
        assert_eq!(attachment.completed(true), None);
        assert!(attachment.is_attached());
    }

    #[test]
    fn test_failed_attach_drops_request() {
        let mut attachment = Attachment::default();
        attachment.request(true);
        assert_eq!(attachment.completed(false), None);
        assert_eq!(attachment.state(), AttachState::Detached);
        assert!(!attachment.desired());
    }
}
