use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};

use super::{Completion, CompletionRequest, LlmProvider, ModelInfo, ProviderConfig, ProviderKind};
use crate::error::FinderError;

const LLAMACPP_API: &str = "llamacpp";

/// A `llama-server` instance serving one GGUF model.
#[derive(Clone)]
pub struct LlamaCppProvider {
    client: ClientWithMiddleware,
    config: ProviderConfig,
}

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    prompt: &'a str,
    temperature: f32,
    n_predict: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_prompt: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CompletionReply {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tokens_evaluated: Option<u64>,
    #[serde(default)]
    tokens_predicted: Option<u64>,
}

impl LlamaCppProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, FinderError> {
        Ok(Self {
            client: crate::sources::llm_client()?,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl LlmProvider for LlamaCppProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::LlamaCpp
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, FinderError> {
        let mut models = ProviderKind::LlamaCpp.recommended_models();
        if let Some(root) = super::models_root("SUPPORT_FINDER_LLAMACPP_MODELS_DIR", "unsloth/models") {
            let installed = super::scan_model_dirs(&root, true, &models).await;
            models.extend(installed);
        }
        Ok(models)
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, FinderError> {
        let body = CompletionBody {
            prompt: &request.prompt,
            temperature: request.temperature,
            n_predict: request.max_tokens,
            stream: false,
            system_prompt: request.system.as_deref(),
        };
        let req = self
            .client
            .post(crate::sources::join_url(&self.config.base_url, "completion"))
            .timeout(self.config.timeout)
            .json(&body);
        let reply: CompletionReply = super::send_json(LLAMACPP_API, req).await?;
        let usage = super::usage_or_estimate(
            &self.config.model,
            request,
            &reply.content,
            reply.tokens_evaluated,
            reply.tokens_predicted,
        );
        Ok(Completion {
            text: reply.content,
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

    fn provider(base: &str) -> LlamaCppProvider {
        let config = ProviderConfig::resolve(
            &Config::with_data_dir("/tmp/sf"),
            Some("llamacpp"),
            None,
            Some(base),
        )
        .expect("config");
        LlamaCppProvider::new(&config).expect("provider")
    }

    #[tokio::test]
    async fn complete_reads_content_and_token_counts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/completion"))
            .and(body_partial_json(serde_json::json!({
                "n_predict": 1000,
                "system_prompt": "sys"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": "{\"organizations\": []}",
                "tokens_evaluated": 40,
                "tokens_predicted": 6
            })))
            .expect(1)
            .mount(&server)
            .await;

        let completion = provider(&server.uri())
            .complete(&CompletionRequest::new("p").with_system("sys"))
            .await
            .expect("completion");
        assert_eq!(completion.text, "{\"organizations\": []}");
        assert_eq!(completion.usage.total_tokens, 46);
        assert_eq!(completion.usage.model, "ud-q4_k_xl");
    }

    #[tokio::test]
    async fn html_error_page_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/completion"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<html>proxy</html>", "text/html"),
            )
            .mount(&server)
            .await;

        let err = provider(&server.uri())
            .complete(&CompletionRequest::new("p"))
            .await
            .expect_err("html");
        assert!(err.to_string().contains("HTML"));
    }
}
