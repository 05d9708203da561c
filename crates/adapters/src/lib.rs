mod base_url;
mod error;
mod llm;
mod retry;

pub use base_url::{check_base_url, ollama_api_root};
pub use error::AdapterError;
pub use llm::{
    create_llm_adapter, create_llm_adapter_from_profile, OllamaAdapter, OpenAiLikeAdapter,
};
pub use retry::{call_with_retry, RetryConfig};

pub use story_core::config::{Config, ConfigStore, LlmConfig};
pub use story_core::model::{LanguageModel, LanguageModelError};
