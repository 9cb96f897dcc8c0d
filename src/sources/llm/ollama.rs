use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};

use super::{Completion, CompletionRequest, LlmProvider, ModelInfo, ProviderConfig, ProviderKind};
use crate::error::FinderError;

const OLLAMA_API: &str = "ollama";

#[derive(Clone)]
pub struct OllamaProvider {
    client: ClientWithMiddleware,
    config: ProviderConfig,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

impl OllamaProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, FinderError> {
        Ok(Self {
            client: crate::sources::llm_client()?,
            config: config.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        crate::sources::join_url(&self.config.base_url, path)
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, FinderError> {
        let req = self
            .client
            .get(self.endpoint("api/tags"))
            .timeout(self.config.timeout);
        let tags: TagsResponse = super::send_json(OLLAMA_API, req).await?;
        Ok(tags
            .models
            .into_iter()
            .map(|m| ModelInfo {
                description: format!("Ollama: {}", m.name),
                name: m.name,
            })
            .collect())
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, FinderError> {
        let body = GenerateRequest {
            model: &self.config.model,
            prompt: &request.prompt,
            system: request.system.as_deref(),
            stream: false,
            options: GenerateOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };
        let req = self
            .client
            .post(self.endpoint("api/generate"))
            .timeout(self.config.timeout)
            .json(&body);
        let resp: GenerateResponse = super::send_json(OLLAMA_API, req).await?;
        let usage = super::usage_or_estimate(
            &self.config.model,
            request,
            &resp.response,
            resp.prompt_eval_count,
            resp.eval_count,
        );
        Ok(Completion {
            text: resp.response,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base: &str) -> OllamaProvider {
        let config = ProviderConfig::resolve(
            &Config::with_data_dir("/tmp/sf"),
            Some("ollama"),
            Some("mistral:latest"),
            Some(base),
        )
        .expect("config");
        OllamaProvider::new(&config).expect("provider")
    }

    #[tokio::test]
    async fn complete_reports_backend_token_counts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "model": "mistral:latest",
                "stream": false,
                "system": "sys"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": "{\"is_match\": true}",
                "prompt_eval_count": 120,
                "eval_count": 8
            })))
            .expect(1)
            .mount(&server)
            .await;

        let completion = provider(&server.uri())
            .complete(&CompletionRequest::new("prompt").with_system("sys"))
            .await
            .expect("completion");
        assert_eq!(completion.text, "{\"is_match\": true}");
        assert_eq!(completion.usage.prompt_tokens, 120);
        assert_eq!(completion.usage.completion_tokens, 8);
        assert_eq!(completion.usage.total_tokens, 128);
        assert_eq!(completion.usage.model, "mistral:latest");
    }

    #[tokio::test]
    async fn list_models_reads_tags() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{"name": "llama3:8b"}, {"name": "mistral:latest"}]
            })))
            .mount(&server)
            .await;

        let models = provider(&server.uri()).list_models().await.expect("models");
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].name, "llama3:8b");
        assert_eq!(models[0].description, "Ollama: llama3:8b");
    }

    #[tokio::test]
    async fn http_error_is_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model 'x' not found"))
            .mount(&server)
            .await;

        let err = provider(&server.uri())
            .complete(&CompletionRequest::new("p"))
            .await
            .expect_err("404");
        assert!(err.is_upstream());
        assert!(err.to_string().contains("model 'x' not found"));
    }

    #[tokio::test]
    async fn unreachable_backend_falls_back_to_recommended_models() {
        let listing = super::super::list_models_with_fallback(&provider("http://127.0.0.1:9")).await;
        assert_eq!(listing.provider, ProviderKind::Ollama);
        assert!(listing.models.iter().any(|m| m.name == "mistral:latest"));
        assert!(listing.note.is_some());
    }
}
