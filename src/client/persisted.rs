//! Generic persisted value with hydration-queue semantics.
//!
//! Durable storage comes up asynchronously, after the first mutations may
//! already have happened. Until the one-time hydration read completes, every
//! mutation applies to the in-memory value immediately (the caller sees the
//! change right away) and is also queued as a replayable closure. Hydration
//! then loads the persisted value, replays the queue on top of it in the
//! original call order - so a slow load can never clobber fast early writes -
//! persists the merged result and flips the hydrated flag.

use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use super::backend::StorageBackend;

type Mutator<T> = Box<dyn Fn(&mut T) + Send + Sync>;

struct Inner<T> {
  value: T,
  queue: Vec<Mutator<T>>,
  hydrated: bool,
  persist_pending: bool,
}

pub struct PersistedStore<T> {
  name: String,
  backend: Arc<dyn StorageBackend>,
  inner: Mutex<Inner<T>>,
  /// Serializes persists so a slow write cannot overwrite a newer one.
  persist_gate: tokio::sync::Mutex<()>,
  hydrated_tx: watch::Sender<bool>,
  attempts: u32,
  backoff: Duration,
}

impl<T> PersistedStore<T>
where
  T: Clone + Serialize + DeserializeOwned + Send + 'static,
{
  pub fn new(name: impl Into<String>, initial: T, backend: Arc<dyn StorageBackend>) -> Self {
    let (hydrated_tx, _) = watch::channel(false);
    Self {
      name: name.into(),
      backend,
      inner: Mutex::new(Inner {
        value: initial,
        queue: Vec::new(),
        hydrated: false,
        persist_pending: false,
      }),
      persist_gate: tokio::sync::Mutex::new(()),
      hydrated_tx,
      attempts: 3,
      backoff: Duration::from_millis(250),
    }
  }

  /// Override the persistence retry policy.
  pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
    self.attempts = attempts.max(1);
    self.backoff = backoff;
    self
  }

  pub fn get(&self) -> T {
    self.inner.lock().expect("store lock poisoned").value.clone()
  }

  pub fn hydrated(&self) -> bool {
    self.inner.lock().expect("store lock poisoned").hydrated
  }

  /// Receiver that flips to `true` once hydration completes.
  pub fn hydrated_signal(&self) -> watch::Receiver<bool> {
    self.hydrated_tx.subscribe()
  }

  /// Whether the last persistence attempt was deferred after exhausting its
  /// retries.
  pub fn persist_pending(&self) -> bool {
    self
      .inner
      .lock()
      .expect("store lock poisoned")
      .persist_pending
  }

  /// Apply a mutation. The in-memory value changes before this function
  /// awaits anything; persistence (or queueing, before hydration) follows.
  pub async fn update<F>(&self, mutate: F)
  where
    F: Fn(&mut T) + Send + Sync + 'static,
  {
    {
      let mut inner = self.inner.lock().expect("store lock poisoned");
      mutate(&mut inner.value);
      if !inner.hydrated {
        inner.queue.push(Box::new(mutate));
        return;
      }
    }
    self.persist().await;
  }

  /// One-time hydration: load the persisted value, replay queued mutations
  /// on top of it, persist the merge. A second call is a no-op.
  pub async fn hydrate(&self) {
    if self.hydrated() {
      return;
    }

    let loaded: Option<T> = match self.read_with_retry().await {
      Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
          tracing::warn!("Discarding malformed persisted '{}': {}", self.name, e);
          None
        }
      },
      Ok(None) => None,
      Err(e) => {
        tracing::warn!(
          "Could not load persisted '{}', in-memory state stands: {}",
          self.name,
          e
        );
        None
      }
    };

    {
      let mut inner = self.inner.lock().expect("store lock poisoned");
      if inner.hydrated {
        return;
      }
      if let Some(mut base) = loaded {
        for mutate in &inner.queue {
          mutate(&mut base);
        }
        inner.value = base;
      }
      // With nothing loaded, the queued mutations already live in `value`.
      inner.queue.clear();
      inner.hydrated = true;
    }
    // send_replace: the flag must stick even when no receiver subscribed yet.
    let _ = self.hydrated_tx.send_replace(true);

    self.persist().await;
  }

  /// Persist the current full value with bounded retry. On exhaustion the
  /// in-memory value still stands; the pending flag defers durability to the
  /// next successful write.
  async fn persist(&self) {
    let _gate = self.persist_gate.lock().await;

    let bytes = {
      let inner = self.inner.lock().expect("store lock poisoned");
      serde_json::to_vec(&inner.value)
    };
    let bytes = match bytes {
      Ok(bytes) => bytes,
      Err(e) => {
        tracing::error!("Cannot serialize '{}': {}", self.name, e);
        return;
      }
    };

    match self.write_with_retry(&bytes).await {
      Ok(()) => {
        self
          .inner
          .lock()
          .expect("store lock poisoned")
          .persist_pending = false;
      }
      Err(e) => {
        tracing::warn!("Deferring persistence of '{}': {}", self.name, e);
        self
          .inner
          .lock()
          .expect("store lock poisoned")
          .persist_pending = true;
      }
    }
  }

  async fn write_with_retry(&self, bytes: &[u8]) -> Result<()> {
    let mut delay = self.backoff;
    for attempt in 1..=self.attempts {
      match self.backend.set(&self.name, bytes).await {
        Ok(()) => return Ok(()),
        Err(e) if attempt < self.attempts => {
          tracing::debug!("Write of '{}' attempt {} failed: {}", self.name, attempt, e);
          tokio::time::sleep(delay).await;
          delay *= 2;
        }
        Err(e) => return Err(e),
      }
    }
    Err(eyre!("No persistence attempts configured"))
  }

  async fn read_with_retry(&self) -> Result<Option<Vec<u8>>> {
    let mut delay = self.backoff;
    for attempt in 1..=self.attempts {
      match self.backend.get(&self.name).await {
        Ok(value) => return Ok(value),
        Err(e) if attempt < self.attempts => {
          tracing::debug!("Read of '{}' attempt {} failed: {}", self.name, attempt, e);
          tokio::time::sleep(delay).await;
          delay *= 2;
        }
        Err(e) => return Err(e),
      }
    }
    Err(eyre!("No persistence attempts configured"))
  }
}
