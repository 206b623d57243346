use async_trait::async_trait;
use razor_types::RazorError;

use crate::{Request, Response};

/// Turns a request into text and/or tool calls. Every stage holds one of
/// these; production wires in an [`LlmClient`](crate::LlmClient) behind a
/// retry wrapper, tests wire in scripted replies.
#[async_trait]
pub trait Generate: Send + Sync {
    async fn complete(&self, request: &Request) -> Result<Response, RazorError>;
}

#[async_trait]
impl<G: Generate + ?Sized> Generate for std::sync::Arc<G> {
    async fn complete(&self, request: &Request) -> Result<Response, RazorError> {
        (**self).complete(request).await
    }
}

/// A concrete vendor endpoint the client can route to by `name()`.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn complete(&self, request: &Request) -> Result<Response, RazorError>;
    fn name(&self) -> &str;
    /// Model used when a request leaves `model` empty.
    fn default_model(&self) -> &str;
}
