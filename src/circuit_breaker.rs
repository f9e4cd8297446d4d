use failsafe::{backoff, failure_policy, CircuitBreaker, Config, StateMachine};
use std::future::Future;
use std::time::Duration;

/// Breaker guarding one notification channel.
pub type ChannelBreaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>;

/// Creates a circuit breaker for an outbound notification channel so a dead
/// provider is not hammered on every event.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// # States
///
/// - **CLOSED**: Normal operation, deliveries pass through.
/// - **OPEN**: Too many failures, deliveries are skipped.
/// - **HALF_OPEN**: Next delivery tests whether the provider recovered.
pub fn create_channel_circuit_breaker() -> ChannelBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

/// Outcome of a guarded call.
#[derive(Debug, PartialEq, Eq)]
pub enum Guarded<T, E> {
    Completed(Result<T, E>),
    /// The breaker is open; the operation was not started.
    Rejected,
}

/// Run an async operation through `breaker`, recording its outcome.
pub async fn call_guarded<T, E, F>(breaker: &ChannelBreaker, operation: F) -> Guarded<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    if !breaker.is_call_permitted() {
        return Guarded::Rejected;
    }

    let outcome = operation.await;
    match breaker.call(|| outcome) {
        Ok(value) => Guarded::Completed(Ok(value)),
        Err(failsafe::Error::Inner(e)) => Guarded::Completed(Err(e)),
        // Opened by a concurrent failure while this call was in flight
        Err(failsafe::Error::Rejected) => Guarded::Rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_circuit_breaker_opens_after_failures() {
        let cb = create_channel_circuit_breaker();

        // Simulate 5 consecutive failures
        for _ in 0..5 {
            let result = call_guarded(&cb, async { Err::<(), &str>("simulated error") }).await;
            assert_eq!(result, Guarded::Completed(Err("simulated error")));
        }

        // Next call should be rejected without running the operation
        let mut ran = false;
        let result = call_guarded(&cb, async {
            ran = true;
            Ok::<(), &str>(())
        })
        .await;

        assert_eq!(result, Guarded::Rejected);
        assert!(!ran);
    }

    #[tokio::test]
    async fn test_circuit_breaker_allows_success() {
        let cb = create_channel_circuit_breaker();

        let result = call_guarded(&cb, async { Ok::<i32, &str>(42) }).await;

        assert_eq!(result, Guarded::Completed(Ok(42)));
    }
}
