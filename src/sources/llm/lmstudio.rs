use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};

use super::{Completion, CompletionRequest, LlmProvider, ModelInfo, ProviderConfig, ProviderKind};
use crate::error::FinderError;

const LMSTUDIO_API: &str = "lmstudio";

/// OpenAI-compatible chat completions as served by LM Studio.
#[derive(Clone)]
pub struct LmStudioProvider {
    client: ClientWithMiddleware,
    config: ProviderConfig,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

impl LmStudioProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, FinderError> {
        Ok(Self {
            client: crate::sources::llm_client()?,
            config: config.clone(),
        })
    }

    /// Accepts base URLs with or without the trailing `/v1`.
    fn endpoint(&self, path: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base);
        crate::sources::join_url(base, &format!("v1/{}", path.trim_start_matches('/')))
    }
}

#[async_trait]
impl LlmProvider for LmStudioProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::LmStudio
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, FinderError> {
        let req = self
            .client
            .get(self.endpoint("models"))
            .timeout(self.config.timeout);
        let resp: ModelsResponse = super::send_json(LMSTUDIO_API, req).await?;
        Ok(resp
            .data
            .into_iter()
            .map(|m| ModelInfo {
                description: format!("LM Studio: {}", m.id),
                name: m.id,
            })
            .collect())
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, FinderError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });
        let body = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        };
        let req = self
            .client
            .post(self.endpoint("chat/completions"))
            .timeout(self.config.timeout)
            .json(&body);
        let resp: ChatResponse = super::send_json(LMSTUDIO_API, req).await?;

        let text = resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        let (prompt_tokens, completion_tokens) = resp
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((None, None));
        let usage = super::usage_or_estimate(
            &self.config.model,
            request,
            &text,
            prompt_tokens,
            completion_tokens,
        );
        Ok(Completion { text, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base: &str) -> LmStudioProvider {
        let config = ProviderConfig::resolve(
            &Config::with_data_dir("/tmp/sf"),
            Some("lmstudio"),
            Some("Qwen30B-A3B"),
            Some(base),
        )
        .expect("config");
        LmStudioProvider::new(&config).expect("provider")
    }

    #[test]
    fn endpoint_handles_v1_suffix() {
        assert_eq!(
            provider("http://localhost:1234/v1").endpoint("models"),
            "http://localhost:1234/v1/models"
        );
        assert_eq!(
            provider("http://localhost:1234").endpoint("chat/completions"),
            "http://localhost:1234/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn complete_sends_chat_messages_and_reads_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "model": "Qwen30B-A3B",
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "hello"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "ok"}}],
                "usage": {"prompt_tokens": 30, "completion_tokens": 2, "total_tokens": 32}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let completion = provider(&format!("{}/v1", server.uri()))
            .complete(&CompletionRequest::new("hello").with_system("sys"))
            .await
            .expect("completion");
        assert_eq!(completion.text, "ok");
        assert_eq!(completion.usage.total_tokens, 32);
    }

    #[tokio::test]
    async fn missing_usage_is_estimated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "12345678"}}]
            })))
            .mount(&server)
            .await;

        let completion = provider(&server.uri())
            .complete(&CompletionRequest::new("abcdefghijkl"))
            .await
            .expect("completion");
        assert_eq!(completion.usage.prompt_tokens, 3);
        assert_eq!(completion.usage.completion_tokens, 2);
    }

    #[tokio::test]
    async fn list_models_reads_data_ids() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"id": "qwen3-30b-a3b", "object": "model"}]
            })))
            .mount(&server)
            .await;

        let models = provider(&server.uri()).list_models().await.expect("models");
        assert_eq!(models, vec![ModelInfo::new("qwen3-30b-a3b", "LM Studio: qwen3-30b-a3b")]);
    }
}
