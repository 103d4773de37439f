//! One-shot `/api/settings` bootstrap cache.

use std::{cell::RefCell, rc::Rc};

use async_trait::async_trait;
use derive_more::Display;
use futures::future::{FutureExt as _, LocalBoxFuture, Shared};
use hermes_client_api_proto::{IceMode, IceServer};

/// Settings document served by `GET /api/settings`.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// WebSocket endpoint to dial.
    pub ws_url: String,

    /// ICE transport mode to honor.
    pub ice_mode: IceMode,

    /// ICE servers to hand to peer connections.
    pub ice_servers: Vec<IceServer>,
}

/// Error of fetching the settings document.
#[derive(Clone, Debug, Display)]
#[display(fmt = "settings fetch failed: {}", _0)]
pub struct FetchError(pub String);

impl std::error::Error for FetchError {}

/// Source of the settings document (an HTTP fetch on the web platform).
#[async_trait(?Send)]
pub trait SettingsFetcher {
    /// Retrieves the settings document.
    async fn fetch(&self) -> Result<Settings, FetchError>;
}

type SharedFetch = Shared<LocalBoxFuture<'static, Result<Settings, FetchError>>>;

/// Memoizing settings cache.
///
/// At most one fetch is in flight at any time and a successful result is
/// kept forever; concurrent callers share the in-flight attempt. A
/// failed attempt clears the slot, so the next caller retries.
pub struct SettingsCache {
    fetcher: Rc<dyn SettingsFetcher>,
    slot: RefCell<Option<SharedFetch>>,
}

impl SettingsCache {
    /// Creates a new empty [`SettingsCache`] reading through `fetcher`.
    #[must_use]
    pub fn new(fetcher: Rc<dyn SettingsFetcher>) -> Self {
        Self {
            fetcher,
            slot: RefCell::new(None),
        }
    }

    /// Returns the settings, fetching them on the first call.
    ///
    /// # Errors
    ///
    /// Propagates the [`FetchError`] of the underlying fetch; the error
    /// is not cached.
    pub async fn get(&self) -> Result<Settings, FetchError> {
        let shared = {
            let mut slot = self.slot.borrow_mut();
            match &*slot {
                Some(inflight) => inflight.clone(),
                None => {
                    let fetcher = Rc::clone(&self.fetcher);
                    let fetch = async move { fetcher.fetch().await }
                        .boxed_local()
                        .shared();
                    *slot = Some(fetch.clone());
                    fetch
                }
            }
        };
        let result = shared.await;
        if result.is_err() {
            drop(self.slot.borrow_mut().take());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use futures::future::join;

    use super::*;

    /// Fetcher counting its calls and failing the first `fail_first`
    /// ones.
    struct CountingFetcher {
        calls: Cell<usize>,
        fail_first: usize,
    }

    #[async_trait(?Send)]
    impl SettingsFetcher for CountingFetcher {
        async fn fetch(&self) -> Result<Settings, FetchError> {
            let n = self.calls.get();
            self.calls.set(n + 1);
            tokio::task::yield_now().await;
            if n < self.fail_first {
                Err(FetchError("boom".into()))
            } else {
                Ok(Settings {
                    ws_url: "ws://example.org/ws".into(),
                    ice_mode: IceMode::StunTurn,
                    ice_servers: Vec::new(),
                })
            }
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let fetcher = Rc::new(CountingFetcher {
            calls: Cell::new(0),
            fail_first: 0,
        });
        let cache = SettingsCache::new(Rc::clone(&fetcher) as Rc<dyn SettingsFetcher>);

        let (a, b) = join(cache.get(), cache.get()).await;
        assert!(a.is_ok() && b.is_ok());
        drop(cache.get().await.unwrap());

        assert_eq!(fetcher.calls.get(), 1);
    }

    #[tokio::test]
    async fn failure_is_not_cached() {
        let fetcher = Rc::new(CountingFetcher {
            calls: Cell::new(0),
            fail_first: 1,
        });
        let cache = SettingsCache::new(Rc::clone(&fetcher) as Rc<dyn SettingsFetcher>);

        assert!(cache.get().await.is_err());
        assert!(cache.get().await.is_ok());
        assert!(cache.get().await.is_ok());

        assert_eq!(fetcher.calls.get(), 2);
    }
}
