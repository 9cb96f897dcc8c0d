use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};

use super::{Completion, CompletionRequest, LlmProvider, ModelInfo, ProviderConfig, ProviderKind};
use crate::error::FinderError;

const MLX_API: &str = "mlx";

/// An MLX generation server reached over HTTP.
///
/// The server does not enumerate its models, so listing combines the
/// recommended catalog with directories under the local MLX models folder.
#[derive(Clone)]
pub struct MlxProvider {
    client: ClientWithMiddleware,
    config: ProviderConfig,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default, alias = "text")]
    response: String,
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
}

impl MlxProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, FinderError> {
        Ok(Self {
            client: crate::sources::llm_client()?,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl LlmProvider for MlxProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mlx
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, FinderError> {
        let mut models = ProviderKind::Mlx.recommended_models();
        if let Some(root) = super::models_root("SUPPORT_FINDER_MLX_MODELS_DIR", "mlx-models") {
            let installed = super::scan_model_dirs(&root, false, &models).await;
            models.extend(installed);
        }
        Ok(models)
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, FinderError> {
        let body = GenerateRequest {
            model: &self.config.model,
            prompt: &request.prompt,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            system: request.system.as_deref(),
        };
        let req = self
            .client
            .post(crate::sources::join_url(&self.config.base_url, "generate"))
            .timeout(self.config.timeout)
            .json(&body);
        let resp: GenerateResponse = super::send_json(MLX_API, req).await?;
        let usage = super::usage_or_estimate(
            &self.config.model,
            request,
            &resp.response,
            resp.prompt_tokens,
            resp.completion_tokens,
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

    fn provider(base: &str) -> MlxProvider {
        let config = ProviderConfig::resolve(&Config::with_data_dir("/tmp/sf"), Some("mlx"), None, Some(base))
            .expect("config");
        MlxProvider::new(&config).expect("provider")
    }

    #[tokio::test]
    async fn complete_posts_generate_and_estimates_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .and(body_partial_json(serde_json::json!({
                "prompt": "abcdefgh",
                "max_tokens": 1000
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"response": "abcd"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let completion = provider(&server.uri())
            .complete(&CompletionRequest::new("abcdefgh"))
            .await
            .expect("completion");
        assert_eq!(completion.text, "abcd");
        assert_eq!(completion.usage.prompt_tokens, 2);
        assert_eq!(completion.usage.completion_tokens, 1);
        assert_eq!(completion.usage.model, "mlx-community/Llama-3-8B-Instruct-4bit");
    }

    #[tokio::test]
    async fn server_errors_surface_as_err() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("out of memory"))
            .mount(&server)
            .await;

        let err = provider(&server.uri())
            .complete(&CompletionRequest::new("p"))
            .await
            .expect_err("500");
        assert!(err.is_upstream());
    }

    #[tokio::test]
    async fn list_models_starts_with_recommended_catalog() {
        let models = provider("http://127.0.0.1:9").list_models().await.expect("models");
        assert!(models.len() >= ProviderKind::Mlx.recommended_models().len());
        assert_eq!(models[0].name, "Qwen/Qwen1.5-0.5B-Chat-4bit");
    }
}
