//! Memoized SDK loading
//!
//! The SDK is initialized at most once per loader. Callers that arrive while
//! a load is running await the same shared future. A failed load stays
//! failed.

use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};

use super::{DeviceError, PlaybackSdk};

type LoadFuture = Shared<BoxFuture<'static, Result<(), String>>>;

enum LoadState {
    NotStarted,
    InFlight(LoadFuture),
    Complete,
    Failed(String),
}

/// Observable loader state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    NotStarted,
    InFlight,
    Complete,
    Failed,
}

pub struct SdkLoader<K> {
    sdk: Arc<K>,
    state: Mutex<LoadState>,
}

impl<K: PlaybackSdk> SdkLoader<K> {
    pub fn new(sdk: K) -> Self {
        Self {
            sdk: Arc::new(sdk),
            state: Mutex::new(LoadState::NotStarted),
        }
    }

    pub fn sdk(&self) -> &K {
        &self.sdk
    }

    pub fn status(&self) -> LoadStatus {
        match &*self.state.lock().unwrap_or_else(|e| e.into_inner()) {
            LoadState::NotStarted => LoadStatus::NotStarted,
            LoadState::InFlight(_) => LoadStatus::InFlight,
            LoadState::Complete => LoadStatus::Complete,
            LoadState::Failed(_) => LoadStatus::Failed,
        }
    }

    /// Load the SDK unless that already happened or is happening.
    pub async fn ensure_loaded(&self) -> Result<(), DeviceError> {
        let pending = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match &*state {
                LoadState::Complete => return Ok(()),
                LoadState::Failed(msg) => return Err(DeviceError::Load(msg.clone())),
                LoadState::InFlight(fut) => fut.clone(),
                LoadState::NotStarted => {
                    tracing::debug!("Loading playback SDK");
                    let sdk = Arc::clone(&self.sdk);
                    let fut = async move {
                        sdk.load().await.map_err(|e| match e {
                            DeviceError::Load(msg) => msg,
                            other => other.to_string(),
                        })
                    }
                        .boxed()
                        .shared();
                    *state = LoadState::InFlight(fut.clone());
                    fut
                }
            }
        };

        let result = pending.await;

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(*state, LoadState::InFlight(_)) {
            *state = match &result {
                Ok(()) => LoadState::Complete,
                Err(msg) => {
                    tracing::warn!("Playback SDK failed to load: {}", msg);
                    LoadState::Failed(msg.clone())
                }
            };
        }

        result.map_err(DeviceError::Load)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceOptions, PlaybackDevice};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    struct GatedSdk {
        loads: AtomicUsize,
        gate: Semaphore,
        fail: bool,
    }

    impl GatedSdk {
        fn new(fail: bool) -> Self {
            Self {
                loads: AtomicUsize::new(0),
                gate: Semaphore::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl PlaybackSdk for GatedSdk {
        async fn load(&self) -> Result<(), DeviceError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| DeviceError::Load(e.to_string()))?;
            if self.fail {
                return Err(DeviceError::Load("script blocked".to_string()));
            }
            Ok(())
        }

        fn create_device(
            &self,
            _options: DeviceOptions,
        ) -> Result<Arc<dyn PlaybackDevice>, DeviceError> {
            Err(DeviceError::NotReady)
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_load() {
        let loader = SdkLoader::new(GatedSdk::new(false));
        assert_eq!(loader.status(), LoadStatus::NotStarted);

        let (first, second) = tokio::join!(loader.ensure_loaded(), async {
            tokio::task::yield_now().await;
            assert_eq!(loader.status(), LoadStatus::InFlight);
            loader.sdk().gate.add_permits(1);
            loader.ensure_loaded().await
        });

        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(loader.sdk().loads.load(Ordering::SeqCst), 1);
        assert_eq!(loader.status(), LoadStatus::Complete);

        loader.ensure_loaded().await.unwrap();
        assert_eq!(loader.sdk().loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_load_is_not_retried() {
        let loader = SdkLoader::new(GatedSdk::new(true));
        loader.sdk().gate.add_permits(2);

        let first = loader.ensure_loaded().await.unwrap_err();
        let second = loader.ensure_loaded().await.unwrap_err();

        assert_eq!(first.to_string(), "could not load playback SDK: script blocked");
        assert_eq!(second.to_string(), "could not load playback SDK: script blocked");
        assert_eq!(loader.sdk().loads.load(Ordering::SeqCst), 1);
        assert_eq!(loader.status(), LoadStatus::Failed);
    }
}
