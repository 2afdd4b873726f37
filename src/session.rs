//! Per-connection session state
//!
//! A connection starts unregistered, may bind exactly one handle for its
//! lifetime, and ends when the peer leaves or the stream closes. All other
//! session data (the stream itself, the peer address) lives in the worker;
//! the handle is the only protocol-visible state.

use crate::error::CommandError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Session {
    #[default]
    Unregistered,
    Registered {
        handle: String,
    },
}

impl Session {
    pub fn handle(&self) -> Option<&str> {
        match self {
            Session::Unregistered => None,
            Session::Registered { handle } => Some(handle),
        }
    }

    pub fn is_registered(&self) -> bool {
        matches!(self, Session::Registered { .. })
    }

    /// The handle a registration-gated command runs under, or the
    /// precondition error naming that command.
    pub fn require_handle(&self, keyword: &str) -> Result<&str, CommandError> {
        self.handle()
            .ok_or_else(|| CommandError::Unregistered(keyword.to_string()))
    }

    /// Transition `Unregistered -> Registered(handle)`. Registry uniqueness
    /// is checked by the caller before this point; the session itself only
    /// rejects double registration.
    pub fn register(&mut self, handle: String) -> Result<(), CommandError> {
        match self {
            Session::Unregistered => {
                *self = Session::Registered { handle };
                Ok(())
            }
            Session::Registered { handle: current } => {
                Err(CommandError::AlreadyRegistered(current.clone()))
            }
        }
    }
}
