//! Error taxonomy for the command loop
//!
//! `CommandError` covers every recoverable failure: the `Display` text is the
//! exact line written back to the client, after which the connection keeps
//! serving commands. Fatal conditions (peer hung up, deadline exceeded)
//! travel as `anyhow::Error` and tear down the worker instead.

use thiserror::Error;

/// Recoverable per-command failures. One error line to the client, no state
/// mutation, connection stays open.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Wrong argument count for a known command.
    #[error("Error: Invalid {0} command syntax.")]
    Syntax(String),

    /// Command requires a registered handle.
    #[error("Error: Register a handle before using {0}.")]
    Unregistered(String),

    /// Session already holds a handle; re-registration is rejected.
    #[error("Error: Already registered as {0}.")]
    AlreadyRegistered(String),

    /// Requested handle is taken by a live connection.
    #[error("Error: Registration failed. Handle or alias already exists.")]
    HandleTaken,

    /// `/get` on a file that was never stored.
    #[error("Error: File not found on the server.")]
    FileNotFound,

    /// Storage write failed mid-upload.
    #[error("Error: Failed to save the file.")]
    SaveFailed,

    /// Storage read failed mid-download.
    #[error("Error: Failed to read the file.")]
    ReadFailed,

    /// Filename rejected before touching the filesystem.
    #[error("Error: Invalid filename.")]
    BadFilename,

    /// Handle rejected before touching Registry or filesystem.
    #[error("Error: Invalid handle.")]
    BadHandle,

    /// Directory enumeration failed.
    #[error("Error: Failed to list the directory.")]
    ListFailed,

    /// Keyword did not match any command.
    #[error("Error: Command not found.")]
    Unknown,
}
