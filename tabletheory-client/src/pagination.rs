//! Pagination Engine — retry-with-verification for eventually-consistent
//! reads, and parallel scan segmentation validation. Cursor encode/decode
//! itself lives in `tabletheory_core::Cursor`; this only adds the
//! executor-facing retry and fan-out policy around it.

use std::time::Duration;

use tabletheory_core::{ExpressionError, TableTheoryError, TableTheoryResult};

use crate::cancellation::CancellationSignal;
use crate::retry::BackoffPolicy;
use crate::store::PageResponse;

/// Controls `page_with_retry`'s willingness to retry a page that came back
/// empty, and how many attempts and what backoff to apply.
#[derive(Debug, Clone, Copy)]
pub struct PageRetryPolicy {
    pub retry_on_empty: bool,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for PageRetryPolicy {
    fn default() -> Self {
        Self {
            retry_on_empty: false,
            max_attempts: 3,
            backoff: BackoffPolicy {
                initial: Duration::from_millis(50),
                factor: 2.0,
                max: Duration::from_secs(2),
                max_attempts: 3,
            },
        }
    }
}

/// Fetch a page by calling `fetch` up to `policy.max_attempts` times,
/// retrying when the result is empty (if `policy.retry_on_empty`) or when
/// `verify` rejects it. The final attempt's result is returned regardless
/// of whether it still fails verification.
pub async fn page_with_retry<F, Fut, V>(
    policy: &PageRetryPolicy,
    cancel: &CancellationSignal,
    mut fetch: F,
    verify: V,
) -> TableTheoryResult<PageResponse>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = TableTheoryResult<PageResponse>>,
    V: Fn(&PageResponse) -> bool,
{
    let mut attempt = 0u32;
    loop {
        let page = fetch().await?;
        let should_retry = (policy.retry_on_empty && page.items.is_empty()) || !verify(&page);
        attempt += 1;
        if !should_retry || attempt >= policy.max_attempts || cancel.is_cancelled() {
            return Ok(page);
        }
        tokio::select! {
            _ = tokio::time::sleep(policy.backoff.delay_for_attempt(attempt)) => {}
            _ = cancel.cancelled() => return Ok(page),
        }
    }
}

/// One segment of an `N`-way parallel scan.
#[derive(Debug, Clone, Copy)]
pub struct ScanSegment {
    pub segment: u32,
    pub total_segments: u32,
}

impl ScanSegment {
    pub fn validate(self) -> TableTheoryResult<Self> {
        if self.total_segments == 0 || self.segment >= self.total_segments {
            return Err(TableTheoryError::Expression(ExpressionError::InvalidScanSegment {
                segment: self.segment,
                total: self.total_segments,
            }));
        }
        Ok(self)
    }
}

/// The segment list for an `N`-way parallel scan, `0..total_segments`.
pub fn segments(total_segments: u32) -> Vec<ScanSegment> {
    (0..total_segments)
        .map(|segment| ScanSegment {
            segment,
            total_segments,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_empty_page_until_non_empty() {
        let calls = AtomicU32::new(0);
        let policy = PageRetryPolicy {
            retry_on_empty: true,
            max_attempts: 5,
            backoff: BackoffPolicy {
                initial: Duration::from_millis(1),
                factor: 1.0,
                max: Duration::from_millis(2),
                max_attempts: 5,
            },
        };
        let page = page_with_retry(
            &policy,
            &CancellationSignal::never(),
            || async {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                Ok(PageResponse {
                    items: if call < 2 {
                        Vec::new()
                    } else {
                        vec![std::collections::BTreeMap::new()]
                    },
                    last_evaluated_key: None,
                })
            },
            |_| true,
        )
        .await
        .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn verify_predicate_forces_retry() {
        let calls = AtomicU32::new(0);
        let policy = PageRetryPolicy {
            retry_on_empty: false,
            max_attempts: 3,
            backoff: BackoffPolicy {
                initial: Duration::from_millis(1),
                factor: 1.0,
                max: Duration::from_millis(2),
                max_attempts: 3,
            },
        };
        let page = page_with_retry(
            &policy,
            &CancellationSignal::never(),
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(PageResponse {
                    items: vec![std::collections::BTreeMap::new()],
                    last_evaluated_key: None,
                })
            },
            |_| false,
        )
        .await
        .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn rejects_segment_out_of_range() {
        let err = ScanSegment {
            segment: 4,
            total_segments: 4,
        }
        .validate()
        .unwrap_err();
        assert!(matches!(
            err,
            TableTheoryError::Expression(ExpressionError::InvalidScanSegment { .. })
        ));
    }

    #[test]
    fn segments_produces_the_full_range() {
        let all = segments(3);
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].segment, 2);
    }
}
