use std::sync::Arc;

use async_trait::async_trait;

use sleuth_types::SleuthError;

use crate::{ChatMessage, Request, Response};

// ---------------------------------------------------------------------------
// GenerationProvider
// ---------------------------------------------------------------------------

/// A text-generation backend: prompt messages in, text out.
///
/// Implementations must be safe for concurrent use; independent runs may share
/// one provider.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn complete(&self, request: &Request) -> Result<Response, SleuthError>;
    fn name(&self) -> &str;
    fn default_model(&self) -> &str;

    /// Plain-text convenience over [`complete`](GenerationProvider::complete).
    async fn generate(
        &self,
        messages: Vec<ChatMessage>,
        temperature: f32,
        stop: Option<Vec<String>>,
    ) -> Result<String, SleuthError> {
        let request = Request::new(self.default_model(), messages)
            .with_temperature(temperature)
            .with_stop(stop.unwrap_or_default());
        Ok(self.complete(&request).await?.text)
    }
}

// ---------------------------------------------------------------------------
// DynProvider
// ---------------------------------------------------------------------------

/// Shared, cloneable handle to a provider.
#[derive(Clone)]
pub struct DynProvider(Arc<dyn GenerationProvider>);

impl DynProvider {
    pub fn new(provider: impl GenerationProvider + 'static) -> Self {
        Self(Arc::new(provider))
    }

    pub fn from_arc(provider: Arc<dyn GenerationProvider>) -> Self {
        Self(provider)
    }

    pub async fn complete(&self, request: &Request) -> Result<Response, SleuthError> {
        self.0.complete(request).await
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn default_model(&self) -> &str {
        self.0.default_model()
    }
}

impl std::fmt::Debug for DynProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DynProvider").field(&self.name()).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct EchoProvider {
        seen: Mutex<Vec<Request>>,
    }

    #[async_trait]
    impl GenerationProvider for EchoProvider {
        async fn complete(&self, request: &Request) -> Result<Response, SleuthError> {
            self.seen.lock().unwrap().push(request.clone());
            let last = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(Response::text(&request.model, format!("echo: {last}")))
        }

        fn name(&self) -> &str {
            "echo"
        }

        fn default_model(&self) -> &str {
            "echo-1"
        }
    }

    #[tokio::test]
    async fn generate_builds_request_from_arguments() {
        let provider = EchoProvider {
            seen: Mutex::new(Vec::new()),
        };
        let text = provider
            .generate(vec![ChatMessage::user("hello")], 0.3, Some(vec!["STOP".into()]))
            .await
            .unwrap();
        assert_eq!(text, "echo: hello");

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen[0].model, "echo-1");
        assert_eq!(seen[0].temperature, Some(0.3));
        assert_eq!(seen[0].stop_sequences, vec!["STOP".to_string()]);
    }

    #[tokio::test]
    async fn dyn_provider_is_shared_between_clones() {
        let provider = DynProvider::new(EchoProvider {
            seen: Mutex::new(Vec::new()),
        });
        let other = provider.clone();
        let req = Request::new("echo-1", vec![ChatMessage::user("hi")]);
        let resp = other.complete(&req).await.unwrap();
        assert_eq!(resp.text, "echo: hi");
        assert_eq!(provider.name(), "echo");
        assert_eq!(format!("{provider:?}"), "DynProvider(\"echo\")");
    }
}
