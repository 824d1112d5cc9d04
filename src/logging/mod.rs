//! Logging infrastructure - structured tracing for the binding layer
//!
//! Events carry one of four targets under the crate prefix so they can be
//! filtered separately: `interop_bindings::bind`, `interop_bindings::converter`,
//! `interop_bindings::call` and `interop_bindings::signature`.

use crate::interop::{MethodHandle, ObjectRef};
use once_cell::sync::OnceCell;
use std::io;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

pub const TARGET_BIND: &str = "interop_bindings::bind";
pub const TARGET_CONVERTER: &str = "interop_bindings::converter";
pub const TARGET_CALL: &str = "interop_bindings::call";
pub const TARGET_SIGNATURE: &str = "interop_bindings::signature";

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Log file path; console output when unset
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // INTEROP_BINDINGS_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("INTEROP_BINDINGS_LOG_LEVEL") {
            config.level = parse_level(&level_str);
        }

        // INTEROP_BINDINGS_LOG_FILE: path to log file
        if let Ok(path) = std::env::var("INTEROP_BINDINGS_LOG_FILE") {
            config.log_path = Some(path);
        }

        config.json_format = std::env::var("INTEROP_BINDINGS_LOG_JSON").is_ok();
        config.show_spans = std::env::var("INTEROP_BINDINGS_LOG_SPANS").is_ok();

        config
    }

    /// Verbose config for debugging binding problems
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            log_path: None,
            json_format: false,
            show_spans: true,
        }
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize logging with configuration from the environment
pub fn init() -> Option<WorkerGuard> {
    init_with_config(LogConfig::from_env())
}

/// Initialize logging with custom configuration
///
/// Only the first call installs a subscriber. The returned guard flushes the
/// file writer when dropped and must be kept alive by the caller.
pub fn init_with_config(config: LogConfig) -> Option<WorkerGuard> {
    let mut guard = None;
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(config.level));

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let (writer, file_guard) = match config.log_path.as_deref().map(Path::new) {
            Some(path) => {
                let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
                let file = path.file_name().map_or_else(|| "interop_bindings.log".into(), |f| f.to_os_string());
                let (writer, file_guard) =
                    tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file));
                (fmt::writer::BoxMakeWriter::new(writer), Some(file_guard))
            }
            None => (fmt::writer::BoxMakeWriter::new(io::stdout), None),
        };
        guard = file_guard;

        let layer = fmt::layer()
            .with_writer(writer)
            .with_span_events(span_events)
            .with_target(true)
            .with_thread_ids(cfg!(debug_assertions))
            .with_line_number(cfg!(debug_assertions));
        let layer = if config.json_format {
            layer.json().boxed()
        } else {
            layer.boxed()
        };

        // Another subscriber may already be installed by the host
        let _ = tracing_subscriber::registry().with(env_filter).with(layer).try_init();
    });
    guard
}

/// Filter used when `RUST_LOG` is unset; covers every binding target
fn default_filter(level: Level) -> EnvFilter {
    EnvFilter::new(format!("interop_bindings={}", level.as_str().to_lowercase()))
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Binding-specific logging functions
// ============================================================================

/// Log a bind request
pub fn log_bind(display_name: &str, method: MethodHandle, signature: &str, cached: bool) {
    use tracing::debug;
    debug!(
        target: TARGET_BIND,
        event = "bind",
        name = display_name,
        method = %method,
        signature = signature,
        cached = cached,
        "Method bound"
    );
}

/// Log a cache hit
#[inline]
pub fn log_cache_hit(cache: &str, key: &str) {
    use tracing::trace;
    trace!(
        target: TARGET_BIND,
        event = "cache_hit",
        cache = cache,
        key = key,
        "Cache hit"
    );
}

/// Log converter compilation
pub fn log_converter_compiled(signature: &str, method: Option<MethodHandle>, size: usize, roots: usize) {
    use tracing::debug;
    debug!(
        target: TARGET_CONVERTER,
        event = "converter_compiled",
        signature = signature,
        method = ?method,
        scratch_bytes = size,
        root_count = roots,
        "Converter compiled"
    );
}

/// Log call stub attachment
pub fn log_stub_attached(stub_name: &str, buffer_size: usize) {
    use tracing::trace;
    trace!(
        target: TARGET_CONVERTER,
        event = "stub_attached",
        stub = stub_name,
        buffer_bytes = buffer_size,
        "Call stub attached"
    );
}

/// Log a native invocation
#[inline]
pub fn log_invoke(display_name: &str, method: MethodHandle, arg_count: usize) {
    use tracing::trace;
    trace!(
        target: TARGET_CALL,
        event = "invoke",
        name = display_name,
        method = %method,
        args = arg_count,
        "Invoking native method"
    );
}

/// Log a managed exception surfacing from a call
pub fn log_fault(display_name: &str, exception: ObjectRef, message: &str) {
    use tracing::debug;
    debug!(
        target: TARGET_CALL,
        event = "native_fault",
        name = display_name,
        exception = %exception,
        message = message,
        "Native call threw"
    );
}

/// Log a call that re-entered a binding whose scratch is leased
pub fn log_reentrant_lease(friendly_name: &str, depth: usize) {
    use tracing::debug;
    debug!(
        target: TARGET_CALL,
        event = "reentrant_lease",
        name = friendly_name,
        depth = depth,
        "Re-entrant call, allocating fresh scratch"
    );
}

/// Log the deprecated trailing `m` signature form
pub fn log_legacy_signature(signature: &str) {
    use tracing::warn;
    warn!(
        target: TARGET_SIGNATURE,
        event = "legacy_raw_result",
        signature = signature,
        "Deprecated raw return value signature: '{}'. End the signature with '!' instead of 'm'.",
        signature
    );
}

/// Subscriber layer that records the level and target of every event
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct EventCapture {
    events: std::sync::Arc<parking_lot::Mutex<Vec<(Level, String)>>>,
}

#[cfg(test)]
impl EventCapture {
    /// Run `f` with this layer behind the default filter at `level`
    pub(crate) fn capture<R>(&self, level: Level, f: impl FnOnce() -> R) -> R {
        let subscriber = tracing_subscriber::registry()
            .with(default_filter(level))
            .with(self.clone());
        tracing::subscriber::with_default(subscriber, f)
    }

    pub(crate) fn count(&self, level: Level, target: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(l, t)| *l == level && t == target)
            .count()
    }
}

#[cfg(test)]
impl<S: tracing::Subscriber> Layer<S> for EventCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let meta = event.metadata();
        self.events.lock().push((*meta.level(), meta.target().to_owned()));
    }
}
