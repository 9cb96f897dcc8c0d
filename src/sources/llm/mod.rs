//! Locally hosted LLM backends behind one [`LlmProvider`] trait.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::entities::organization::TokenUsage;
use crate::error::FinderError;

mod llamacpp;
mod lmstudio;
mod mlx;
mod ollama;

pub use llamacpp::LlamaCppProvider;
pub use lmstudio::LmStudioProvider;
pub use mlx::MlxProvider;
pub use ollama::OllamaProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    #[serde(rename = "lmstudio")]
    LmStudio,
    Mlx,
    #[serde(rename = "llamacpp")]
    LlamaCpp,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [Self::Ollama, Self::LmStudio, Self::Mlx, Self::LlamaCpp];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::LmStudio => "lmstudio",
            Self::Mlx => "mlx",
            Self::LlamaCpp => "llamacpp",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Ollama => "Ollama",
            Self::LmStudio => "LM Studio",
            Self::Mlx => "MLX",
            Self::LlamaCpp => "llama.cpp",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Ollama => "ローカルLLMを実行するためのOllamaフレームワーク",
            Self::LmStudio => "OpenAI互換APIでモデルを提供するLM Studio",
            Self::Mlx => "Apple Silicon向けに最適化されたMLXフレームワーク",
            Self::LlamaCpp => "GGUFモデルを実行するllama.cppサーバー",
        }
    }

    fn default_base(self) -> (&'static str, &'static str) {
        match self {
            Self::Ollama => ("http://localhost:11434", "SUPPORT_FINDER_OLLAMA_BASE"),
            Self::LmStudio => ("http://localhost:1234", "SUPPORT_FINDER_LMSTUDIO_BASE"),
            Self::Mlx => ("http://localhost:8080", "SUPPORT_FINDER_MLX_BASE"),
            Self::LlamaCpp => ("http://localhost:8081", "SUPPORT_FINDER_LLAMACPP_BASE"),
        }
    }

    /// Base URL from `SUPPORT_FINDER_<PROVIDER>_BASE`, else the backend's usual local port.
    pub fn default_base_url(self) -> String {
        let (default, env_var) = self.default_base();
        crate::sources::env_base(default, env_var).into_owned()
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::Ollama => crate::config::DEFAULT_MODEL,
            Self::LmStudio => "Qwen30B-A3B",
            Self::Mlx => "mlx-community/Llama-3-8B-Instruct-4bit",
            Self::LlamaCpp => "ud-q4_k_xl",
        }
    }

    /// Models suggested when the backend cannot be asked.
    pub fn recommended_models(self) -> Vec<ModelInfo> {
        let rows: &[(&str, &str)] = match self {
            Self::Ollama => &[
                ("mistral:latest", "バランスの取れた性能と速度（デフォルト）"),
                ("llama3:8b", "Llama3 8B - バランスの取れた性能と速度"),
                ("llama3:70b", "Llama3 70B - 高性能モデル"),
                ("gemma:7b", "Gemma - Google製の高性能モデル"),
                ("phi3:mini", "Phi-3 - Microsoftの軽量高性能モデル"),
                ("tinyllama:latest", "軽量で高速（精度は低下）"),
            ],
            Self::LmStudio => &[
                ("Qwen30B-A3B", "Qwen 30B - 日本語に強い高性能モデル（デフォルト）"),
                ("Qwen32B", "Qwen 32B - 日本語に強い大規模モデル"),
                ("Llama-3-70B-Instruct", "Llama 3 70B - 高性能モデル"),
            ],
            Self::Mlx => &[
                ("Qwen/Qwen1.5-0.5B-Chat-4bit", "Qwen 0.5B - 超軽量モデル（4ビット量子化）"),
                ("Qwen/Qwen1.5-1.8B-Chat-4bit", "Qwen 1.8B - 軽量モデル（4ビット量子化）"),
                ("Qwen/Qwen1.5-4B-Chat-4bit", "Qwen 4B - バランスの取れたモデル（4ビット量子化）"),
                ("Qwen/Qwen1.5-7B-Chat-4bit", "Qwen 7B - 高性能モデル（4ビット量子化）"),
                ("Qwen/Qwen1.5-14B-Chat-4bit", "Qwen 14B - 最高性能モデル（4ビット量子化）"),
                ("mlx-community/Llama-3-8B-Instruct-4bit", "Llama 3 8B - 高性能モデル（4ビット量子化）"),
                ("mlx-community/Llama-3-70B-Instruct-4bit", "Llama 3 70B - 最高性能モデル（4ビット量子化）"),
            ],
            Self::LlamaCpp => &[
                ("ud-q4_k_xl", "Unsloth Llama4 Scout 17B - 高精度（Q4量子化）"),
                ("ud-q2_k_xl", "Unsloth Llama4 Scout 17B - 超高速（Q2量子化）"),
                ("ud-iq2_xxs", "Unsloth Llama4 Scout 17B - 超軽量（IQ2量子化）"),
                ("phi-4-reasoning-plus-8bit", "Phi-4 Reasoning Plus - 推論特化（8ビット量子化）"),
                ("qwen32b", "Qwen 32B - 高精度汎用モデル"),
            ],
        };
        rows.iter()
            .map(|(name, description)| ModelInfo::new(name, description))
            .collect()
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = FinderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', '_', ' ', '.'], "");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| {
                FinderError::InvalidArgument(format!(
                    "Invalid provider: {s}. Must be one of: ollama, lmstudio, mlx, llamacpp"
                ))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub description: String,
}

impl ModelInfo {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
        }
    }
}

/// Which backend to call, where, and with which model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub base_url: String,
    pub model: String,
    #[serde(skip)]
    pub timeout: Duration,
}

impl ProviderConfig {
    /// Fills unset parts from the configured defaults and validates the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`FinderError::InvalidArgument`] for an unknown provider or a
    /// base URL that is not absolute http(s).
    pub fn resolve(
        config: &Config,
        provider: Option<&str>,
        model: Option<&str>,
        base_url: Option<&str>,
    ) -> Result<Self, FinderError> {
        let kind = match provider.map(str::trim).filter(|p| !p.is_empty()) {
            Some(raw) => raw.parse()?,
            None => config.default_provider,
        };
        let model = match model.map(str::trim).filter(|m| !m.is_empty()) {
            Some(model) => model.to_string(),
            None if kind == config.default_provider => config.default_model.clone(),
            None => kind.default_model().to_string(),
        };
        let base_url = match base_url.map(str::trim).filter(|b| !b.is_empty()) {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => kind.default_base_url(),
        };
        let parsed = Url::parse(&base_url).map_err(|e| {
            FinderError::InvalidArgument(format!("Invalid base_url '{base_url}': {e}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FinderError::InvalidArgument(format!(
                "Invalid base_url '{base_url}': expected an http(s) URL"
            )));
        }
        Ok(Self {
            kind,
            base_url,
            model,
            timeout: config.llm_timeout,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            temperature: 0.1,
            max_tokens: 1000,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn model(&self) -> &str;

    /// Models the backend reports (or, for file-based backends, has installed).
    async fn list_models(&self) -> Result<Vec<ModelInfo>, FinderError>;

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, FinderError>;
}

/// Builds the adapter for `config.kind`.
pub fn build(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>, FinderError> {
    let provider: Arc<dyn LlmProvider> = match config.kind {
        ProviderKind::Ollama => Arc::new(OllamaProvider::new(config)?),
        ProviderKind::LmStudio => Arc::new(LmStudioProvider::new(config)?),
        ProviderKind::Mlx => Arc::new(MlxProvider::new(config)?),
        ProviderKind::LlamaCpp => Arc::new(LlamaCppProvider::new(config)?),
    };
    Ok(provider)
}

/// One row of the provider listing.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub name: ProviderKind,
    pub display_name: &'static str,
    pub description: &'static str,
    pub default_base_url: String,
    pub default_model: &'static str,
}

pub fn providers() -> Vec<ProviderInfo> {
    ProviderKind::ALL
        .into_iter()
        .map(|kind| ProviderInfo {
            name: kind,
            display_name: kind.display_name(),
            description: kind.description(),
            default_base_url: kind.default_base_url(),
            default_model: kind.default_model(),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelListing {
    pub provider: ProviderKind,
    pub models: Vec<ModelInfo>,
    pub default: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Lists models, falling back to the recommended catalog when the backend
/// is unreachable or reports nothing.
pub async fn list_models_with_fallback(provider: &dyn LlmProvider) -> ModelListing {
    let kind = provider.kind();
    let (models, note) = match provider.list_models().await {
        Ok(models) if !models.is_empty() => (models, None),
        Ok(_) => (
            kind.recommended_models(),
            Some(format!("{} reported no models; showing recommended models", kind.display_name())),
        ),
        Err(err) => {
            warn!(provider = %kind, error = %err, "Model listing failed; using recommended models");
            (
                kind.recommended_models(),
                Some(format!("{} unavailable ({err}); showing recommended models", kind.display_name())),
            )
        }
    };
    ModelListing {
        provider: kind,
        models,
        default: kind.default_model().to_string(),
        note,
    }
}

/// One token per four bytes, for backends that report no counts.
pub(crate) fn estimate_tokens(text: &str) -> u64 {
    (text.len() / 4) as u64
}

pub(crate) fn usage_or_estimate(
    model: &str,
    request: &CompletionRequest,
    text: &str,
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
) -> TokenUsage {
    let prompt_tokens = prompt_tokens.unwrap_or_else(|| {
        estimate_tokens(&request.prompt) + request.system.as_deref().map_or(0, estimate_tokens)
    });
    let completion_tokens = completion_tokens.unwrap_or_else(|| estimate_tokens(text));
    TokenUsage::new(model, prompt_tokens, completion_tokens)
}

/// Sends a request built on the shared LLM client and decodes a JSON reply.
pub(crate) async fn send_json<T: DeserializeOwned>(
    api: &str,
    req: reqwest_middleware::RequestBuilder,
) -> Result<T, FinderError> {
    let resp = req.send().await?;
    let status = resp.status();
    let content_type = resp.headers().get(reqwest::header::CONTENT_TYPE).cloned();
    let bytes = crate::sources::read_limited_body(resp, api).await?;
    if !status.is_success() {
        let excerpt = crate::sources::body_excerpt(&bytes);
        return Err(FinderError::Api {
            api: api.to_string(),
            message: format!("HTTP {status}: {excerpt}"),
        });
    }
    crate::sources::ensure_json_content_type(api, content_type.as_ref(), &bytes)?;
    serde_json::from_slice(&bytes).map_err(|source| FinderError::ApiJson {
        api: api.to_string(),
        source,
    })
}

/// Subdirectories of `root` as model entries, skipping names already listed.
///
/// With `require_gguf`, only directories holding a `.gguf` file count.
pub(crate) async fn scan_model_dirs(
    root: &Path,
    require_gguf: bool,
    known: &[ModelInfo],
) -> Vec<ModelInfo> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    let mut found = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if !entry.file_type().await.is_ok_and(|t| t.is_dir()) {
            continue;
        }
        if require_gguf && !contains_gguf(&path).await {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let name = if require_gguf { name.to_lowercase() } else { name };
        if known.iter().chain(found.iter()).any(|m: &ModelInfo| m.name.eq_ignore_ascii_case(&name)) {
            continue;
        }
        found.push(ModelInfo {
            description: format!("インストール済みモデル: {name}"),
            name,
        });
    }
    found.sort_by(|a, b| a.name.cmp(&b.name));
    debug!(root = %root.display(), models = found.len(), "Scanned local model directory");
    found
}

async fn contains_gguf(dir: &Path) -> bool {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return false;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry
            .path()
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gguf"))
        {
            return true;
        }
    }
    false
}

/// `$env_var` if set, else `~/<default_rel>`.
pub(crate) fn models_root(env_var: &str, default_rel: &str) -> Option<PathBuf> {
    crate::config::env_value(env_var)
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|home| home.join(default_rel)))
}
