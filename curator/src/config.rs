use serde::Deserialize;
use std::env;

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub slack: SlackConfig,
    pub poller: PollerConfig,
    pub database: DatabaseConfig,
    pub embeddings: EmbeddingsConfig,
    pub context: ContextConfig,
    pub llm: Option<LlmConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackConfig {
    pub token: Option<String>,
    pub cookie: Option<String>,
    /// Handle the agent answers to in channel messages, without the `@`.
    pub handle: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    pub poll_interval_secs: u64,
    /// Capacity of the inbound event channel between the poller and the
    /// agent loop. A full channel applies backpressure to the poller.
    pub event_buffer: usize,
    /// Re-list workspace conversations every N poll cycles to pick up
    /// newly joined channels and DMs.
    pub refresh_every_cycles: u64,
    pub history_page_limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub auth_token: Option<String>,
    pub local_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextConfig {
    /// Character budget for the assembled context block.
    pub budget_chars: usize,
    /// Maximum memories retrieved per query.
    pub top_k: u32,
}

/// LLM configuration for the response generator.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            slack: SlackConfig {
                token: env::var("SLACK_TOKEN").ok(),
                cookie: env::var("SLACK_COOKIE").ok(),
                handle: env::var("CURATOR_HANDLE").unwrap_or_else(|_| "ai-curator".to_string()),
            },
            poller: PollerConfig {
                poll_interval_secs: parse_env_or("POLL_INTERVAL_SECS", 5),
                event_buffer: parse_env_or("EVENT_BUFFER", 64),
                refresh_every_cycles: parse_env_or("CONVERSATION_REFRESH_CYCLES", 60),
                history_page_limit: parse_env_or("HISTORY_PAGE_LIMIT", 100),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or_else(|_| "file:curator.db".to_string()),
                auth_token: env::var("DATABASE_AUTH_TOKEN").ok(),
                local_path: env::var("DATABASE_LOCAL_PATH").ok(),
            },
            embeddings: EmbeddingsConfig {
                model: env::var("EMBEDDING_MODEL")
                    .unwrap_or_else(|_| "BAAI/bge-small-en-v1.5".to_string()),
                dimensions: parse_env_or("EMBEDDING_DIMENSIONS", 384),
                batch_size: parse_env_or("EMBEDDING_BATCH_SIZE", 256),
            },
            context: ContextConfig {
                budget_chars: parse_env_or("CONTEXT_BUDGET_CHARS", 2000),
                top_k: parse_env_or("MEMORY_TOP_K", 5),
            },
            llm: env::var("LLM_MODEL").ok().map(|model| LlmConfig {
                model,
                api_key: env::var("LLM_API_KEY").ok(),
                base_url: env::var("LLM_BASE_URL").ok(),
                timeout_secs: parse_env_or("LLM_TIMEOUT", 30),
                max_retries: parse_env_or("LLM_MAX_RETRIES", 3),
            }),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}

/// Known LLM providers that use OpenAI-compatible APIs.
pub const KNOWN_LLM_PROVIDERS: &[&str] = &["openai", "openrouter", "ollama", "lmstudio"];

/// Parse an LLM model name into (provider, model) tuple.
pub fn parse_llm_provider_model(model: &str) -> (&str, &str) {
    if let Some((prefix, rest)) = model.split_once('/') {
        let prefix_lower = prefix.to_lowercase();
        if KNOWN_LLM_PROVIDERS.contains(&prefix_lower.as_str()) {
            return (prefix, rest);
        }
    }
    // Default to treating the whole string as a local model
    ("local", model)
}
