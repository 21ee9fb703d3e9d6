//! Failure classification and phase-aware retry.
//!
//! Retrying is never a generic loop here: whether a failed statement may be
//! re-sent depends on which lifecycle role it plays and on what the current
//! run has already confirmed. Re-running an export over the frozen batch
//! reproduces (at worst duplicates) data; re-running a delete destroys data
//! unless the corresponding export is known to have succeeded.

use std::future::Future;

use tracing::{debug, warn};

use crate::{
    config::RetryConfig,
    script::StatementRole,
    store::{StoreError, StoreResult, is_permanent_message},
};

/// How a store failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth retrying: connection drops, timeouts, server overload.
    Transient,
    /// Not recoverable by retrying: malformed statements, auth failures.
    Fatal,
}

/// Classify a store error.
pub fn classify(error: &StoreError) -> FailureClass {
    match error {
        StoreError::Connection(_) | StoreError::Timeout(_) => FailureClass::Transient,
        StoreError::Auth(_) | StoreError::Statement(_) | StoreError::Protocol(_) => {
            FailureClass::Fatal
        }
        StoreError::Http { status, body } => {
            let retryable_status = *status == 429 || (500..=599).contains(status);
            if retryable_status && !is_permanent_message(body) {
                FailureClass::Transient
            } else {
                FailureClass::Fatal
            }
        }
    }
}

/// Phase-aware retry driver.
pub struct RetryController {
    config: RetryConfig,
}

impl RetryController {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Whether a failed statement of this role may be re-sent at all.
    ///
    /// `export_confirmed` must only be true when the export covering the
    /// current batch is known to have succeeded, in this run or through
    /// artifact verification.
    pub fn allows_retry(&self, role: StatementRole, export_confirmed: bool) -> bool {
        match role {
            StatementRole::Export => true,
            StatementRole::Delete => export_confirmed,
            StatementRole::Mark | StatementRole::Query => false,
        }
    }

    /// Execute `operation`, retrying transient failures when the role
    /// admits it. The last error is returned on exhaustion, never
    /// swallowed.
    pub async fn execute<F, Fut, T>(
        &self,
        role: StatementRole,
        export_confirmed: bool,
        operation: F,
    ) -> StoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let retryable = self.config.enabled && self.allows_retry(role, export_confirmed);
        let max_attempts = if retryable {
            self.config.max_retries + 1
        } else {
            1
        };

        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(role = %role, attempt = attempt + 1, "statement succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let transient = classify(&error) == FailureClass::Transient;
                    if transient && attempt + 1 < max_attempts {
                        let delay = self.config.delay_for_attempt(attempt);
                        warn!(
                            role = %role,
                            error = %error,
                            attempt = attempt + 1,
                            max_attempts,
                            delay_ms = delay.as_millis(),
                            "transient failure, will retry after delay"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    if attempt > 0 {
                        warn!(
                            role = %role,
                            error = %error,
                            attempts = attempt + 1,
                            "statement failed after all retry attempts"
                        );
                    }
                    return Err(error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            jitter: 0.0,
            ..RetryConfig::default()
        }
    }

    #[test]
    fn classifies_connection_and_timeout_as_transient() {
        assert_eq!(
            classify(&StoreError::Connection("reset".into())),
            FailureClass::Transient
        );
        assert_eq!(
            classify(&StoreError::Timeout(std::time::Duration::from_secs(1))),
            FailureClass::Transient
        );
    }

    #[test]
    fn classifies_auth_and_statement_as_fatal() {
        assert_eq!(
            classify(&StoreError::Auth("denied".into())),
            FailureClass::Fatal
        );
        assert_eq!(
            classify(&StoreError::Statement("bad".into())),
            FailureClass::Fatal
        );
    }

    #[test]
    fn http_status_classification_consults_the_body() {
        let overload = StoreError::Http {
            status: 503,
            body: "server temporarily unavailable".into(),
        };
        assert_eq!(classify(&overload), FailureClass::Transient);

        // ClickHouse reports statement errors over HTTP 500.
        let syntax = StoreError::Http {
            status: 500,
            body: "Code: 62. DB::Exception: Syntax error".into(),
        };
        assert_eq!(classify(&syntax), FailureClass::Fatal);

        let rate_limited = StoreError::Http {
            status: 429,
            body: String::new(),
        };
        assert_eq!(classify(&rate_limited), FailureClass::Transient);

        let client_error = StoreError::Http {
            status: 404,
            body: String::new(),
        };
        assert_eq!(classify(&client_error), FailureClass::Fatal);
    }

    #[test]
    fn export_is_always_retryable_delete_needs_proof() {
        let controller = RetryController::new(fast_config(3));
        assert!(controller.allows_retry(StatementRole::Export, false));
        assert!(controller.allows_retry(StatementRole::Delete, true));
        assert!(!controller.allows_retry(StatementRole::Delete, false));
        assert!(!controller.allows_retry(StatementRole::Mark, true));
    }

    #[tokio::test]
    async fn export_retries_transient_failures() {
        let controller = RetryController::new(fast_config(3));
        let attempts = AtomicU32::new(0);

        let result = controller
            .execute(StatementRole::Export, false, || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(StoreError::Connection("reset".into()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_failures_are_not_retried() {
        let controller = RetryController::new(fast_config(3));
        let attempts = AtomicU32::new(0);

        let result: StoreResult<()> = controller
            .execute(StatementRole::Export, false, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::Statement("syntax".into())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delete_without_export_proof_gets_a_single_attempt() {
        let controller = RetryController::new(fast_config(3));
        let attempts = AtomicU32::new(0);

        let result: StoreResult<()> = controller
            .execute(StatementRole::Delete, false, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::Connection("reset".into())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_surfaces_the_last_error() {
        let controller = RetryController::new(fast_config(2));
        let attempts = AtomicU32::new(0);

        let result: StoreResult<()> = controller
            .execute(StatementRole::Export, false, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::Connection("still down".into())) }
            })
            .await;

        match result {
            Err(StoreError::Connection(msg)) => assert_eq!(msg, "still down"),
            other => panic!("unexpected result: {other:?}"),
        }
        // Initial attempt plus two retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn disabled_config_never_retries() {
        let controller = RetryController::new(RetryConfig {
            enabled: false,
            ..fast_config(5)
        });
        let attempts = AtomicU32::new(0);

        let result: StoreResult<()> = controller
            .execute(StatementRole::Export, true, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::Connection("down".into())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
