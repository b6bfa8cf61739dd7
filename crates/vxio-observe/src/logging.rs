use tracing_subscriber::EnvFilter;

/// Initializes a `tracing_subscriber` using `VXIO_LOG` first, then `RUST_LOG`, then `info`.
///
/// Log field contract for vxio processes:
/// - Proof events use `target: "vxio_proof"` and carry an `event` field.
/// - Include `thread_id` on every producer-side event.
/// - Include `slot` on every handoff event (serve, discard).
/// - Periodic snapshots use `target: "vxio_metrics"`.
pub fn init_tracing() {
    let filter = env_filter();
    // A second init (e.g. from tests sharing a process) is not an error.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .try_init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("VXIO_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
