//! `tracing` subscriber setup for host applications.

use tracing_subscriber::EnvFilter;

/// Install a formatted `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` (for example the
/// config's `log_filter`) is used, falling back to `info` if it does not
/// parse. Returns `false` when a global subscriber was already installed,
/// so calling this more than once is harmless.
pub fn init_logging(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_a_no_op() {
        init_logging("kestrel_ecs=debug");
        assert!(!init_logging("warn"));
        tracing::debug!("still logging after a second init");
    }
}
