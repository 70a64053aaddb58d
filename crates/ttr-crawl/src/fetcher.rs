//! The fetch seam between the orchestrator and a transaction history
//! provider.

use crate::request::FetchRequest;
use async_trait::async_trait;
use std::sync::Arc;
use ttr_core::{Edge, FetchError};

/// Issues one history fetch and classifies its outcome.
///
/// Implementations must not retry on their own; retries, splits and
/// pagination are decided by the orchestrator from the returned error.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Edge>, FetchError>;
}

#[async_trait]
impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Edge>, FetchError> {
        (**self).fetch(request).await
    }
}
