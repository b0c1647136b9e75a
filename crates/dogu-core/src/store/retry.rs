// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded retry of read-modify-write operations on conflict.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::Result;

/// How often a conflicting write is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay between attempts; attempt `n` waits `n * backoff`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(10),
        }
    }
}

/// Run `op` until it succeeds, fails with a non-conflict error, or the policy
/// runs out of attempts. The last conflict is returned when attempts run out.
///
/// `op` must re-read the object on every call; the helper does not cache
/// anything between attempts.
pub async fn retry_on_conflict<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_conflict() && attempt < max_attempts => {
                debug!(attempt, max_attempts, error = %e, "Write conflict, retrying");
                tokio::time::sleep(policy.backoff * attempt).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::Error;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_retries_conflicts_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_on_conflict(&fast(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::conflict("Dogu", "ldap"))
            } else {
                Ok("written")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "written");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_on_conflict(&fast(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::conflict("Dogu", "ldap"))
        })
        .await;

        assert!(result.unwrap_err().is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_on_conflict(&fast(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::not_found("Dogu", "ldap"))
        })
        .await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
