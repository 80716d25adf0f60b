use std::collections::HashMap;
use std::env;
use std::time::Duration;

use analysis_engine::SessionConfig;

use crate::clients::ProviderKind;
use crate::error::AppError;

/// One entry of the model table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelRoute {
    /// Identifier clients send in `model`
    pub id: String,
    pub provider: ProviderKind,
    /// Model name sent to the provider
    pub upstream: String,
    /// Configuration key holding the credential for this model
    pub credential_var: String,
}

impl ModelRoute {
    pub fn new(id: &str, provider: ProviderKind, upstream: &str, credential_var: &str) -> Self {
        Self {
            id: id.to_string(),
            provider,
            upstream: upstream.to_string(),
            credential_var: credential_var.to_string(),
        }
    }
}

fn builtin_models() -> Vec<ModelRoute> {
    vec![
        ModelRoute::new(
            "claude-sonnet",
            ProviderKind::Anthropic,
            "claude-sonnet-4-5",
            "ANTHROPIC_API_KEY",
        ),
        ModelRoute::new(
            "claude-haiku",
            ProviderKind::Anthropic,
            "claude-haiku-4-5",
            "ANTHROPIC_API_KEY",
        ),
        ModelRoute::new("gpt-4o", ProviderKind::OpenAi, "gpt-4o", "OPENAI_API_KEY"),
        ModelRoute::new("gpt-4o-mini", ProviderKind::OpenAi, "gpt-4o-mini", "OPENAI_API_KEY"),
    ]
}

const CREDENTIAL_VARS: &[&str] = &["ANTHROPIC_API_KEY", "OPENAI_API_KEY"];

/// A model route together with its credential, resolved for one request
#[derive(Clone, Debug)]
pub struct ResolvedModel {
    pub route: ModelRoute,
    pub credential: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub stockfish_path: String,
    /// Search depth used for chat turns
    pub analysis_depth: u32,
    pub engine_base_timeout_secs: u64,
    pub engine_per_depth_timeout_ms: u64,
    pub engine_queue_capacity: usize,
    pub engine_threads: u32,
    pub engine_hash_mb: u32,
    pub anthropic_base_url: String,
    pub openai_base_url: String,
    pub max_tokens: u32,
    /// Longest gap between provider stream chunks
    pub provider_idle_timeout_secs: u64,
    pub models: Vec<ModelRoute>,
    credentials: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            stockfish_path: "/usr/local/bin/stockfish".to_string(),
            analysis_depth: 15,
            engine_base_timeout_secs: 5,
            engine_per_depth_timeout_ms: 1000,
            engine_queue_capacity: 32,
            engine_threads: 1,
            engine_hash_mb: 256,
            anthropic_base_url: "https://api.anthropic.com".to_string(),
            openai_base_url: "https://api.openai.com".to_string(),
            max_tokens: 1024,
            provider_idle_timeout_secs: 120,
            models: builtin_models(),
            credentials: HashMap::new(),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let credentials = CREDENTIAL_VARS
            .iter()
            .filter_map(|var| {
                env::var(var)
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| (var.to_string(), v))
            })
            .collect();

        Self {
            host: env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
            stockfish_path: env::var("STOCKFISH_PATH").unwrap_or(defaults.stockfish_path),
            analysis_depth: env_or("ANALYSIS_DEPTH", defaults.analysis_depth).max(1),
            engine_base_timeout_secs: env_or(
                "ENGINE_BASE_TIMEOUT_SECS",
                defaults.engine_base_timeout_secs,
            ),
            engine_per_depth_timeout_ms: env_or(
                "ENGINE_PER_DEPTH_TIMEOUT_MS",
                defaults.engine_per_depth_timeout_ms,
            ),
            engine_queue_capacity: env_or("ENGINE_QUEUE_CAPACITY", defaults.engine_queue_capacity),
            engine_threads: env_or("ENGINE_THREADS", defaults.engine_threads),
            engine_hash_mb: env_or("ENGINE_HASH_MB", defaults.engine_hash_mb),
            anthropic_base_url: env::var("ANTHROPIC_BASE_URL")
                .unwrap_or(defaults.anthropic_base_url),
            openai_base_url: env::var("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            max_tokens: env_or("MAX_TOKENS", defaults.max_tokens),
            provider_idle_timeout_secs: env_or(
                "PROVIDER_IDLE_TIMEOUT_SECS",
                defaults.provider_idle_timeout_secs,
            ),
            models: defaults.models,
            credentials,
        }
    }

    /// Set a credential (tests, or embedding the server)
    pub fn with_credential(mut self, var: &str, value: &str) -> Self {
        self.credentials.insert(var.to_string(), value.to_string());
        self
    }

    /// Add or replace a model route
    pub fn with_model(mut self, route: ModelRoute) -> Self {
        self.models.retain(|m| m.id != route.id);
        self.models.push(route);
        self
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            base_timeout: Duration::from_secs(self.engine_base_timeout_secs),
            per_depth_timeout: Duration::from_millis(self.engine_per_depth_timeout_ms),
            queue_capacity: self.engine_queue_capacity,
            threads: self.engine_threads,
            hash_mb: self.engine_hash_mb,
            ..SessionConfig::default()
        }
    }

    pub fn model_ids(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.id.as_str()).collect()
    }

    /// Look up the model and its credential for a request.
    pub fn resolve_model(&self, model: &str) -> Result<ResolvedModel, AppError> {
        let route = self
            .models
            .iter()
            .find(|m| m.id == model)
            .ok_or_else(|| AppError::UnknownModel(model.to_string()))?;

        let credential = self
            .credentials
            .get(&route.credential_var)
            .ok_or_else(|| AppError::MissingCredential(model.to_string()))?;

        Ok(ResolvedModel {
            route: route.clone(),
            credential: credential.clone(),
        })
    }
}
