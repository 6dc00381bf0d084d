//! JSON structured logs, filtered through `RUST_LOG` (default `info`).
//!
//! Targets are kept in the output so the `tollgate::audit` stream can be
//! split from operational logs downstream.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info";

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_twice_is_a_no_op() {
        super::init();
        super::init();
        ::tracing::info!(target: "tollgate::audit", outcome = "success", "still logging");
    }
}
