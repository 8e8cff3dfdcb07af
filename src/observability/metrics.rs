//! Resolution cycle metrics.
//!
//! # Metrics
//! - `config_resolve_cycles_total` (counter): watcher cycles by outcome
//!   (`changed`, `unchanged`, `failed`, `fatal`)
//! - `config_changed_fields_total` (counter): fields applied by the watcher
//! - `config_apply_failures_total` (counter): change batches dropped because
//!   a field failed to apply

pub const RESOLVE_CYCLES: &str = "config_resolve_cycles_total";
pub const CHANGED_FIELDS: &str = "config_changed_fields_total";
pub const APPLY_FAILURES: &str = "config_apply_failures_total";

pub fn record_cycle(outcome: &'static str) {
    ::metrics::counter!(RESOLVE_CYCLES, "outcome" => outcome).increment(1);
}

pub fn record_changed_fields(count: usize) {
    ::metrics::counter!(CHANGED_FIELDS).increment(count as u64);
}

pub fn record_apply_failure() {
    ::metrics::counter!(APPLY_FAILURES).increment(1);
}
