//! Global logger initialization.

use slog::{o, Drain};
use slog_scope::GlobalLoggerGuard;

/// Initializes global [`slog`] logger which will output logs with
/// [`slog_term`]'s decorator, filtered by the `RUST_LOG` environment
/// variable.
///
/// The returned guard must be kept alive for the whole process lifetime.
pub fn init() -> GlobalLoggerGuard {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let logger = slog::Logger::root(drain, o!());
    let scope_guard = slog_scope::set_global_logger(logger);
    slog_stdlog::init().unwrap();

    scope_guard
}
