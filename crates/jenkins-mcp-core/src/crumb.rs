//! CSRF crumb cache.
//!
//! Jenkins requires a crumb header on state-changing calls when CSRF
//! protection is enabled. The cache keeps the last crumb for a bounded time
//! and guarantees a single writer: the slot's mutex is held across the fetch,
//! so N callers that find the cache empty at once trigger one crumb-issuer
//! call and the rest reuse its result.

use std::{future::Future, time::Duration};

use tokio::{sync::Mutex, time::Instant};

use crate::JenkinsError;

/// A crumb and the header it must be sent in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crumb {
    /// Header name, usually `Jenkins-Crumb`.
    pub field: String,
    pub value: String,
}

#[derive(Debug)]
struct CachedCrumb {
    /// `None` means the server has CSRF protection disabled.
    crumb: Option<Crumb>,
    fetched_at: Instant,
}

#[derive(Debug)]
pub(crate) struct CrumbCache {
    ttl: Duration,
    slot: Mutex<Option<CachedCrumb>>,
}

impl CrumbCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// Returns the cached crumb, running `fetch` if the cache is empty or
    /// stale. A failed fetch leaves the cache empty.
    pub(crate) async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<Option<Crumb>, JenkinsError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<Crumb>, JenkinsError>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(cached) = slot.as_ref()
            && cached.fetched_at.elapsed() < self.ttl
        {
            return Ok(cached.crumb.clone());
        }

        let crumb = fetch().await?;
        *slot = Some(CachedCrumb {
            crumb: crumb.clone(),
            fetched_at: Instant::now(),
        });
        Ok(crumb)
    }

    /// Drops the cached crumb if it is still the one the server rejected.
    ///
    /// A concurrent caller may already have replaced it with a fresh crumb;
    /// that one is kept.
    pub(crate) async fn invalidate(&self, rejected: Option<&Crumb>) {
        let mut slot = self.slot.lock().await;
        if slot
            .as_ref()
            .is_some_and(|cached| cached.crumb.as_ref() == rejected)
        {
            *slot = None;
        }
    }
}
