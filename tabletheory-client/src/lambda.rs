//! Lambda Optimizations — process-wide client reuse, cold-start model
//! pre-registration, and timeout-derived cancellation deadlines. A process-
//! wide `Lazy<DashMap<...>>` keyed client pool, keyed on a client's
//! configuration identity rather than a model name.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tabletheory_core::{ModelError, Schema};
use tabletheory_registry::RegistryOptions;
use tracing::debug;

use crate::cancellation::CancellationSignal;
use crate::Client;

/// Default safety margin subtracted from a Lambda invocation's remaining
/// execution window before it is wired up as a cancellation deadline. Leaves
/// headroom for the runtime to flush logs and return a response after
/// TableTheory's own cancellation fires.
pub const DEFAULT_TIMEOUT_MARGIN: Duration = Duration::from_millis(500);

static CLIENT_POOL: Lazy<DashMap<String, Client>> = Lazy::new(DashMap::new);

/// Returns the process-wide client registered under `key`, constructing and
/// caching one via `build` on first use. Subsequent Lambda invocations in
/// the same execution environment reuse the same client, store connection,
/// and schema cache rather than paying reflection/connection-setup cost on
/// every cold path.
pub fn shared_client(key: &str, build: impl FnOnce() -> Client) -> Client {
    if let Some(existing) = CLIENT_POOL.get(key) {
        return existing.clone();
    }
    let client = build();
    CLIENT_POOL.insert(key.to_string(), client.clone());
    debug!(key, "constructed process-wide client");
    client
}

/// Clears the process-wide client pool. Test-only: production code never
/// needs to evict a warm client.
#[doc(hidden)]
pub fn clear_shared_clients() {
    CLIENT_POOL.clear();
}

/// Eagerly registers every listed model type's schema, so the first real
/// request in a warm Lambda invocation doesn't pay the one-time directive
/// parsing cost. Intended to run once at module init / cold-start.
pub fn pre_register_models(
    registrations: &[fn(&RegistryOptions) -> Result<Arc<Schema>, ModelError>],
    options: &RegistryOptions,
) -> Result<Vec<Arc<Schema>>, ModelError> {
    registrations.iter().map(|register| register(options)).collect()
}

/// Registers a single `Model` type, for use from `pre_register_models`'s
/// function-pointer list: `register_model::<User> as fn(&RegistryOptions) ->
/// Result<Arc<Schema>, ModelError>`.
pub fn register_model<T: tabletheory_core::Model + Any>(
    options: &RegistryOptions,
) -> Result<Arc<Schema>, ModelError> {
    tabletheory_registry::register::<T>(options)
}

/// Derives a cancellation signal scoped to a Lambda invocation's remaining
/// execution window, subtracting `margin` (the fixed safety margin) so
/// TableTheory stops issuing new store calls before the runtime itself
/// tears down the invocation.
pub fn with_lambda_timeout(remaining: Duration, margin: Duration) -> CancellationSignal {
    let budget = remaining.saturating_sub(margin);
    CancellationSignal::with_timeout(budget)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_budget_subtracts_margin() {
        let remaining = Duration::from_secs(5);
        let margin = Duration::from_secs(1);
        let signal = with_lambda_timeout(remaining, margin);
        assert!(!signal.is_cancelled());
    }

    #[test]
    fn timeout_budget_saturates_at_zero_when_margin_exceeds_remaining() {
        let remaining = Duration::from_millis(100);
        let margin = Duration::from_secs(1);
        let signal = with_lambda_timeout(remaining, margin);
        // A zero-duration deadline fires on the next scheduler tick; we only
        // assert this doesn't panic or underflow.
        let _ = signal.is_cancelled();
    }
}
