//! Background execution guard.
//!
//! Hosts suspend apps shortly after they leave the foreground. The guard holds
//! a [`BackgroundExecution`] extension for as long as a drive is active,
//! renewing it before the platform expiry and re-acquiring it if a renewal is
//! refused.
//!
//! Dropping the guard releases the extension on the current runtime.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::events::{EventDispatcher, SessionEvent};
use crate::traits::{BackgroundExecution, ExtensionToken};

/// Keeps a background execution extension alive while a drive is active.
pub struct BackgroundExecutionGuard {
    backend: Arc<dyn BackgroundExecution>,
    renew_interval: Duration,
    events: EventDispatcher,
    token: Arc<Mutex<Option<ExtensionToken>>>,
    renewal: Option<(CancellationToken, JoinHandle<()>)>,
}

impl std::fmt::Debug for BackgroundExecutionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundExecutionGuard")
            .field("renew_interval", &self.renew_interval)
            .field("renewing", &self.renewal.is_some())
            .finish()
    }
}

impl BackgroundExecutionGuard {
    /// Create a closed guard.
    pub fn new(
        backend: Arc<dyn BackgroundExecution>,
        renew_interval: Duration,
        events: EventDispatcher,
    ) -> Self {
        Self {
            backend,
            renew_interval,
            events,
            token: Arc::new(Mutex::new(None)),
            renewal: None,
        }
    }

    /// Acquire an extension and start renewing it.
    ///
    /// Any extension already held is released first, so opening twice never
    /// holds two extensions.
    pub async fn open(&mut self) -> Result<()> {
        self.close().await;

        let token = self.backend.acquire().await?;
        info!("Background execution extension {} acquired", token);
        *self.token.lock().await = Some(token);

        let cancel_token = CancellationToken::new();
        let task_token = cancel_token.clone();
        let backend = Arc::clone(&self.backend);
        let held = Arc::clone(&self.token);
        let events = self.events.clone();
        let period = self.renew_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        debug!("Background renewal stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        renew_or_reacquire(backend.as_ref(), &held, &events).await;
                    }
                }
            }
        });

        self.renewal = Some((cancel_token, handle));
        Ok(())
    }

    /// Stop renewing and release the extension. Closing twice is harmless.
    pub async fn close(&mut self) {
        if let Some((cancel_token, handle)) = self.renewal.take() {
            cancel_token.cancel();
            if let Err(e) = handle.await {
                warn!("Background renewal task ended abnormally: {}", e);
            }
        }

        let token = self.token.lock().await.take();
        if let Some(token) = token {
            info!("Releasing background execution extension {}", token);
            self.backend.release(token).await;
        }
    }

    /// Whether an extension is currently held.
    pub async fn is_held(&self) -> bool {
        self.token.lock().await.is_some()
    }

    /// The extension currently held.
    pub async fn token(&self) -> Option<ExtensionToken> {
        self.token.lock().await.clone()
    }
}

async fn renew_or_reacquire(
    backend: &dyn BackgroundExecution,
    held: &Mutex<Option<ExtensionToken>>,
    events: &EventDispatcher,
) {
    let mut slot = held.lock().await;

    if let Some(token) = slot.as_ref() {
        match backend.renew(token).await {
            Ok(()) => {
                debug!("Background execution extension {} renewed", token);
                return;
            }
            Err(e) => {
                warn!("Failed to renew {}: {}, re-acquiring", token, e);
                events.send(SessionEvent::BackgroundExtensionLost {
                    error: e.to_string(),
                });
            }
        }
    }

    if let Some(expired) = slot.take() {
        backend.release(expired).await;
    }
    match backend.acquire().await {
        Ok(token) => {
            info!("Background execution extension {} re-acquired", token);
            *slot = Some(token);
        }
        Err(e) => warn!("Failed to re-acquire background execution: {}", e),
    }
}

impl Drop for BackgroundExecutionGuard {
    fn drop(&mut self) {
        let renewal = self.renewal.take();
        if let Some((cancel_token, _)) = &renewal {
            cancel_token.cancel();
        }

        let Ok(handle) = Handle::try_current() else {
            if self.token.try_lock().is_ok_and(|slot| slot.is_some()) {
                warn!("No tokio runtime available to release the extension in guard drop");
            }
            return;
        };
        let backend = Arc::clone(&self.backend);
        let held = Arc::clone(&self.token);
        handle.spawn(async move {
            // A renewal in flight may still swap the token.
            if let Some((_, task)) = renewal {
                let _ = task.await;
            }
            if let Some(token) = held.lock().await.take() {
                debug!("Releasing background execution extension {} on drop", token);
                backend.release(token).await;
            }
        });
    }
}
