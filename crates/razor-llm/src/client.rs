use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use razor_types::RazorError;

use crate::{Generate, ProviderAdapter, Request, Response};

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

/// Hooks run around every provider call, in registration order.
pub trait Middleware: Send + Sync {
    fn before(&self, _request: &mut Request) {}
    fn after(&self, _request: &Request, _response: &mut Response) {}
}

/// Debug-level trace of each request and response.
pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn before(&self, request: &mut Request) {
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Generation request"
        );
    }

    fn after(&self, _request: &Request, response: &mut Response) {
        tracing::debug!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            tool_calls = response.tool_calls.len(),
            finish = ?response.finish_reason,
            "Generation response"
        );
    }
}

#[derive(Default)]
struct UsageCounters {
    calls: AtomicU64,
    input: AtomicU64,
    output: AtomicU64,
}

/// Running token totals for a whole run. Clones share one set of counters:
/// register a clone with the client and read the totals from the original.
#[derive(Clone, Default)]
pub struct UsageMiddleware(Arc<UsageCounters>);

impl UsageMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u64 {
        self.0.calls.load(Ordering::Relaxed)
    }

    pub fn total_input_tokens(&self) -> u64 {
        self.0.input.load(Ordering::Relaxed)
    }

    pub fn total_output_tokens(&self) -> u64 {
        self.0.output.load(Ordering::Relaxed)
    }
}

impl Middleware for UsageMiddleware {
    fn after(&self, _request: &Request, response: &mut Response) {
        let counters = &self.0;
        counters.calls.fetch_add(1, Ordering::Relaxed);
        counters
            .input
            .fetch_add(response.usage.input_tokens, Ordering::Relaxed);
        counters
            .output
            .fetch_add(response.usage.output_tokens, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// LlmClient
// ---------------------------------------------------------------------------

/// Routes requests to a registered provider and runs the middleware chain.
///
/// A request naming a provider goes to that provider; otherwise the first
/// provider registered handles it. An empty `model` is filled with the
/// chosen provider's default before middleware sees the request.
#[derive(Default)]
pub struct LlmClient {
    providers: Vec<Box<dyn ProviderAdapter>>,
    middleware: Vec<Box<dyn Middleware>>,
}

impl LlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a provider. Registering a second provider under an existing
    /// name replaces the first one in place.
    pub fn register_provider(&mut self, provider: impl ProviderAdapter + 'static) {
        let boxed: Box<dyn ProviderAdapter> = Box::new(provider);
        match self.providers.iter().position(|p| p.name() == boxed.name()) {
            Some(slot) => self.providers[slot] = boxed,
            None => self.providers.push(boxed),
        }
    }

    pub fn with_middleware(mut self, m: impl Middleware + 'static) -> Self {
        self.middleware.push(Box::new(m));
        self
    }

    fn route(&self, request: &Request) -> Result<&dyn ProviderAdapter, RazorError> {
        let found = match request.provider.as_deref() {
            Some(name) => self
                .providers
                .iter()
                .find(|p| p.name() == name)
                .ok_or_else(|| RazorError::Other(format!("Provider '{}' not registered", name)))?,
            None => self
                .providers
                .first()
                .ok_or_else(|| RazorError::Other("No providers registered".into()))?,
        };
        Ok(found.as_ref())
    }
}

#[async_trait]
impl Generate for LlmClient {
    async fn complete(&self, request: &Request) -> Result<Response, RazorError> {
        let provider = self.route(request)?;
        let mut outgoing = request.clone();
        if outgoing.model.is_empty() {
            outgoing.model = provider.default_model().to_string();
        }

        self.middleware.iter().for_each(|m| m.before(&mut outgoing));
        let mut response = provider.complete(&outgoing).await?;
        self.middleware
            .iter()
            .for_each(|m| m.after(&outgoing, &mut response));
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Message, Usage};
    use std::sync::Mutex;

    /// Replies with its own name and records the model it was asked for.
    struct Named {
        name: &'static str,
        seen_models: Arc<Mutex<Vec<String>>>,
    }

    impl Named {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                seen_models: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl ProviderAdapter for Named {
        async fn complete(&self, request: &Request) -> Result<Response, RazorError> {
            self.seen_models.lock().unwrap().push(request.model.clone());
            let mut reply = Response::text(&request.model, self.name);
            reply.usage = Usage {
                input_tokens: 7,
                output_tokens: 5,
                total_tokens: 12,
            };
            Ok(reply)
        }

        fn name(&self) -> &str {
            self.name
        }

        fn default_model(&self) -> &str {
            "house-model"
        }
    }

    fn ask(model: &str) -> Request {
        Request::new(model, vec![Message::user("document utils.py")])
    }

    #[tokio::test]
    async fn unnamed_request_goes_to_first_provider() {
        let mut client = LlmClient::new();
        client.register_provider(Named::new("primary"));
        client.register_provider(Named::new("backup"));
        assert_eq!(client.complete(&ask("m")).await.unwrap().text, "primary");
    }

    #[tokio::test]
    async fn named_request_is_routed_or_rejected() {
        let mut client = LlmClient::new();
        client.register_provider(Named::new("primary"));
        client.register_provider(Named::new("backup"));

        let mut req = ask("m");
        req.provider = Some("backup".into());
        assert_eq!(client.complete(&req).await.unwrap().text, "backup");

        req.provider = Some("elsewhere".into());
        let err = client.complete(&req).await.unwrap_err();
        assert!(err.to_string().contains("'elsewhere' not registered"));
    }

    #[tokio::test]
    async fn empty_client_refuses() {
        let err = LlmClient::new().complete(&ask("m")).await.unwrap_err();
        assert!(err.to_string().contains("No providers registered"));
    }

    #[tokio::test]
    async fn empty_model_uses_provider_default() {
        let provider = Named::new("primary");
        let seen = provider.seen_models.clone();
        let mut client = LlmClient::new();
        client.register_provider(provider);

        client.complete(&ask("")).await.unwrap();
        client.complete(&ask("gpt-4o-mini")).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["house-model", "gpt-4o-mini"]);
    }

    #[tokio::test]
    async fn reregistering_a_name_replaces_it() {
        let first = Named::new("primary");
        let first_seen = first.seen_models.clone();
        let mut client = LlmClient::new();
        client.register_provider(first);
        client.register_provider(Named::new("primary"));

        client.complete(&ask("m")).await.unwrap();
        assert!(first_seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn usage_totals_are_shared_between_clones() {
        let usage = UsageMiddleware::new();
        let mut client = LlmClient::new().with_middleware(usage.clone());
        client.register_provider(Named::new("primary"));

        for _ in 0..3 {
            client.complete(&ask("m")).await.unwrap();
        }
        assert_eq!(usage.calls(), 3);
        assert_eq!(usage.total_input_tokens(), 21);
        assert_eq!(usage.total_output_tokens(), 15);
    }

    struct ForceDeterministic;

    impl Middleware for ForceDeterministic {
        fn before(&self, request: &mut Request) {
            request.temperature = Some(0.0);
        }

        fn after(&self, request: &Request, response: &mut Response) {
            response.text.push_str(&format!(" t={:?}", request.temperature));
        }
    }

    #[tokio::test]
    async fn after_hook_sees_rewritten_request() {
        let mut client = LlmClient::new().with_middleware(ForceDeterministic);
        client.register_provider(Named::new("primary"));
        let reply = client.complete(&ask("m")).await.unwrap();
        assert_eq!(reply.text, "primary t=Some(0.0)");
    }
}
