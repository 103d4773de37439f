//! Re-exports of the log macros used across the server.

pub use slog_scope::{debug, error, info, warn};
