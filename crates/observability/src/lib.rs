//! Process-wide logging setup.

/// Initialize tracing/logging.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Subscriber configuration (filters, format).
pub mod tracing;
