//! # Possibly-Async Results
//!
//! Attribute filters may answer synchronously or asynchronously. Callers
//! that only use synchronous filters should not pay for async plumbing, so
//! every walk in this crate produces a [`MaybeAsync`]:
//!
//! - `Ready` while every step so far answered synchronously,
//! - `Deferred` from the first step that did not. The remaining steps then
//!   run inside the future, in the same order.

use crate::ConcordError;
use futures::future::LocalBoxFuture;
use std::future::Future;

/// A value that is either available now or produced by a local future.
pub enum MaybeAsync<T> {
    Ready(T),
    Deferred(LocalBoxFuture<'static, T>),
}

impl<T> std::fmt::Debug for MaybeAsync<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(_) => f.write_str("MaybeAsync::Ready(..)"),
            Self::Deferred(_) => f.write_str("MaybeAsync::Deferred(..)"),
        }
    }
}

impl<T> From<T> for MaybeAsync<T> {
    fn from(value: T) -> Self {
        Self::Ready(value)
    }
}

impl<T: 'static> MaybeAsync<T> {
    /// Wrap a future.
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = T> + 'static,
    {
        Self::Deferred(Box::pin(future))
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// The value, if it is already available.
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Deferred(_) => None,
        }
    }

    /// Wait for the value.
    pub async fn resolve(self) -> T {
        match self {
            Self::Ready(value) => value,
            Self::Deferred(future) => future.await,
        }
    }

    /// Transform the value, staying synchronous when possible.
    pub fn map<U: 'static, F>(self, f: F) -> MaybeAsync<U>
    where
        F: FnOnce(T) -> U + 'static,
    {
        match self {
            Self::Ready(value) => MaybeAsync::Ready(f(value)),
            Self::Deferred(future) => MaybeAsync::deferred(async move { f(future.await) }),
        }
    }

    /// Chain another possibly-async step.
    pub fn and_then<U: 'static, F>(self, f: F) -> MaybeAsync<U>
    where
        F: FnOnce(T) -> MaybeAsync<U> + 'static,
    {
        match self {
            Self::Ready(value) => f(value),
            Self::Deferred(future) => {
                MaybeAsync::deferred(async move { f(future.await).resolve().await })
            }
        }
    }
}

impl<T: 'static> MaybeAsync<Result<T, ConcordError>> {
    /// The result, failing with [`ConcordError::AsyncRequired`] if the
    /// computation went asynchronous.
    pub fn into_sync(self) -> Result<T, ConcordError> {
        match self {
            Self::Ready(result) => result,
            Self::Deferred(_) => Err(ConcordError::AsyncRequired),
        }
    }

    /// Chain a fallible step after a successful one.
    pub fn and_then_ok<U: 'static, F>(self, f: F) -> MaybeAsync<Result<U, ConcordError>>
    where
        F: FnOnce(T) -> MaybeAsync<Result<U, ConcordError>> + 'static,
    {
        self.and_then(|result| match result {
            Ok(value) => f(value),
            Err(err) => MaybeAsync::Ready(Err(err)),
        })
    }

    /// Transform a successful value.
    pub fn map_ok<U: 'static, F>(self, f: F) -> MaybeAsync<Result<U, ConcordError>>
    where
        F: FnOnce(T) -> U + 'static,
    {
        self.map(|result| result.map(f))
    }
}

/// Run `step` over every item in order, stopping at the first error.
///
/// Items are processed synchronously until one step defers; the rest are
/// awaited one by one inside the returned future.
pub fn try_for_each<I, U, F>(items: Vec<I>, mut step: F) -> MaybeAsync<Result<Vec<U>, ConcordError>>
where
    I: 'static,
    U: 'static,
    F: FnMut(I) -> MaybeAsync<Result<U, ConcordError>> + 'static,
{
    let mut results = Vec::with_capacity(items.len());
    let mut remaining = items.into_iter();

    while let Some(item) = remaining.next() {
        match step(item) {
            MaybeAsync::Ready(Ok(value)) => results.push(value),
            MaybeAsync::Ready(Err(err)) => return MaybeAsync::Ready(Err(err)),
            MaybeAsync::Deferred(future) => {
                return MaybeAsync::deferred(async move {
                    results.push(future.await?);
                    for item in remaining {
                        results.push(step(item).resolve().await?);
                    }
                    Ok::<_, ConcordError>(results)
                });
            }
        }
    }

    MaybeAsync::Ready(Ok(results))
}
