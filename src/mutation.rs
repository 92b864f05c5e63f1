//! Mutation hook: one remote write plus the cache updates that follow it.
//!
//! A `Mutation<I, O>` wraps a write operation taking `I` and returning `O`.
//! When the write succeeds its `on_success` routine runs against the shared
//! [`QueryCache`] (invalidate prefixes, patch entries with the returned
//! value). A failed write leaves the cache alone and is never retried.

use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cache::QueryCache;
use crate::error::{DataError, DataResult};

type MutateFn<I, O> = Arc<dyn Fn(I) -> BoxFuture<'static, DataResult<O>> + Send + Sync>;
type SuccessFn<I, O> = Arc<dyn Fn(&QueryCache, &I, &O) + Send + Sync>;

/// The state of the last write started with [`Mutation::start`].
#[derive(Debug, Clone)]
pub enum MutationState<O> {
  Idle,
  Pending,
  Success(Arc<O>),
  Error(DataError),
}

impl<O> MutationState<O> {
  pub fn is_pending(&self) -> bool {
    matches!(self, MutationState::Pending)
  }

  pub fn data(&self) -> Option<&O> {
    match self {
      MutationState::Success(data) => Some(data.as_ref()),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&DataError> {
    match self {
      MutationState::Error(e) => Some(e),
      _ => None,
    }
  }
}

pub struct Mutation<I, O> {
  name: &'static str,
  cache: QueryCache,
  mutate: MutateFn<I, O>,
  on_success: Option<SuccessFn<I, O>>,
  state: MutationState<O>,
  receiver: Option<mpsc::UnboundedReceiver<DataResult<Arc<O>>>>,
}

impl<I, O> Mutation<I, O>
where
  I: Clone + Send + Sync + 'static,
  O: Send + Sync + 'static,
{
  pub fn new<F, Fut>(name: &'static str, cache: QueryCache, mutate: F) -> Self
  where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DataResult<O>> + Send + 'static,
  {
    Self {
      name,
      cache,
      mutate: Arc::new(move |input| mutate(input).boxed()),
      on_success: None,
      state: MutationState::Idle,
      receiver: None,
    }
  }

  /// Routine run against the cache after every successful write.
  pub fn on_success<F>(mut self, f: F) -> Self
  where
    F: Fn(&QueryCache, &I, &O) + Send + Sync + 'static,
  {
    self.on_success = Some(Arc::new(f));
    self
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  /// Perform the write and wait for it.
  pub async fn run(&self, input: I) -> DataResult<Arc<O>> {
    execute(
      self.name,
      self.cache.clone(),
      Arc::clone(&self.mutate),
      self.on_success.clone(),
      input,
    )
    .await
  }

  /// Start the write in the background; see [`Mutation::poll`].
  ///
  /// Starting again while a write is pending abandons the earlier result,
  /// though its cache updates still apply if it succeeds.
  pub fn start(&mut self, input: I) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = MutationState::Pending;

    let task = execute(
      self.name,
      self.cache.clone(),
      Arc::clone(&self.mutate),
      self.on_success.clone(),
      input,
    );
    tokio::spawn(async move {
      // Ignore send errors - the caller may have gone away
      let _ = tx.send(task.await);
    });
  }

  /// Pick up the result of a started write.
  ///
  /// Returns `true` if the state changed.
  pub fn poll(&mut self) -> bool {
    let Some(receiver) = &mut self.receiver else {
      return false;
    };
    match receiver.try_recv() {
      Ok(Ok(output)) => {
        self.state = MutationState::Success(output);
        self.receiver = None;
        true
      }
      Ok(Err(error)) => {
        self.state = MutationState::Error(error);
        self.receiver = None;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        self.state = MutationState::Error(DataError::network("write was cancelled"));
        self.receiver = None;
        true
      }
    }
  }

  pub fn state(&self) -> &MutationState<O> {
    &self.state
  }

  pub fn is_pending(&self) -> bool {
    self.state.is_pending()
  }

  /// Back to idle, forgetting the last result.
  pub fn reset(&mut self) {
    self.state = MutationState::Idle;
    self.receiver = None;
  }
}

async fn execute<I: Clone, O>(
  name: &'static str,
  cache: QueryCache,
  mutate: MutateFn<I, O>,
  on_success: Option<SuccessFn<I, O>>,
  input: I,
) -> DataResult<Arc<O>> {
  match mutate(input.clone()).await {
    Ok(output) => {
      debug!(mutation = name, "write succeeded");
      if let Some(on_success) = &on_success {
        on_success(&cache, &input, &output);
      }
      Ok(Arc::new(output))
    }
    Err(e) => {
      warn!(mutation = name, error = %e, "write failed");
      Err(e)
    }
  }
}

impl<I, O> std::fmt::Debug for Mutation<I, O> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Mutation")
      .field("name", &self.name)
      .field("pending", &self.receiver.is_some())
      .finish_non_exhaustive()
  }
}
