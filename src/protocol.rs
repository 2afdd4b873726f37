//! Shared protocol constants for the fex line-oriented transport

/// Default listening/connect port.
pub const DEFAULT_PORT: u16 = 12345;

/// Sentinel line terminating a transfer frame. A content line equal to this
/// cannot be transferred faithfully; see DESIGN.md for the known limitation.
pub const SENTINEL: &str = "EOF";

/// Prompt line the server writes after a `/get` frame so the client knows
/// the transfer response is complete.
pub const PROMPT: &str = "Enter command:";

/// Any server response starting with this text tells the client to stop
/// its loop and close the stream.
pub const DISCONNECT_MARKER: &str = "Connection closed";

// Maximum command line length (8KB) - prevents DoS via memory exhaustion
pub const MAX_COMMAND_LINE: usize = 8 * 1024;

// Maximum single content line inside a transfer frame (1MB). Content is
// streamed line by line, so this bounds per-connection memory, not file size.
pub const MAX_CONTENT_LINE: usize = 1024 * 1024;

/// Timestamp format for upload status lines, fixed width.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// Centralized deadline constants so the server and client behave consistently
pub mod timeouts {
    // Base timeout for writes (ms)
    pub const WRITE_BASE_MS: u64 = 500;

    // Additional timeout per MB of data (ms)
    pub const PER_MB_MS: u64 = 1;

    // Calculate write deadline based on payload size (ms)
    // 500ms base + 1ms per 1MB payload (ceil)
    pub fn write_deadline_ms(payload_len: usize) -> u64 {
        let mb = (payload_len as u64 + 1_048_575) / 1_048_576;
        WRITE_BASE_MS + mb * PER_MB_MS
    }
}
