//! Open/closed/errored lifecycle shared by every stream role.

use crate::error::{Error, ErrorKind, Result};

/// Lifecycle state of a flow unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// Data may still move.
    Open,

    /// Terminated normally.
    Closed,

    /// Terminated abnormally.
    Errored,
}

/// Tracks whether a stream role is open, closed or errored.
///
/// A flow unit leaves `Open` exactly once and is terminal afterwards.
/// `close` and `fail` return whether the call performed the transition, so
/// the owning role emits its close/error notification only on `true`.
#[derive(Debug)]
pub struct FlowUnit {
    state: FlowState,
    last_error: Option<Error>,
}

impl FlowUnit {
    pub const fn new() -> Self {
        Self {
            state: FlowState::Open,
            last_error: None,
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == FlowState::Open
    }

    pub fn is_errored(&self) -> bool {
        self.state == FlowState::Errored
    }

    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    pub fn last_error_kind(&self) -> Option<ErrorKind> {
        self.last_error.as_ref().map(Error::kind)
    }

    /// Fails with [`Error::ClosedStream`] once the unit is terminal.
    pub fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::ClosedStream)
        }
    }

    /// Transitions to `Closed`. Later calls, and calls after `fail`, are no-ops.
    pub fn close(&mut self) -> bool {
        if !self.is_open() {
            return false;
        }
        self.state = FlowState::Closed;
        true
    }

    /// Transitions to `Errored`, recording `err`.
    pub fn fail(&mut self, err: Error) -> bool {
        if !self.is_open() {
            return false;
        }
        self.state = FlowState::Errored;
        self.last_error = Some(err);
        true
    }
}

impl Default for FlowUnit {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_is_idempotent() {
        let mut flow = FlowUnit::new();
        assert!(flow.close());
        assert!(!flow.close());
        assert!(!flow.close());
        assert_eq!(flow.state(), FlowState::Closed);
        assert!(flow.last_error().is_none());
    }

    #[test]
    fn test_close_after_fail_is_noop() {
        let mut flow = FlowUnit::new();
        assert!(flow.fail(Error::other("boom")));
        assert!(!flow.close());
        assert!(!flow.fail(Error::ClosedStream));
        assert!(flow.is_errored());
        assert_eq!(flow.last_error_kind(), Some(ErrorKind::Other));
    }

    #[test]
    fn test_ensure_open() {
        let mut flow = FlowUnit::new();
        assert!(flow.ensure_open().is_ok());
        flow.close();
        assert_eq!(flow.ensure_open(), Err(Error::ClosedStream));
    }
}
