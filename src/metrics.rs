use tracing::trace;

// Outcome counts per catalog action and elapsed time per sync stage.

pub fn action_recorded(kind: &'static str, outcome: &'static str) {
    trace!(
        target = "catalog_sync.metrics",
        kind = kind,
        outcome = outcome,
        "action_recorded"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "catalog_sync.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}
