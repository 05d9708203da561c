use std::time::Duration;

use log::{debug, warn};
use reqwest::blocking::Client;
use reqwest::header::{self, HeaderValue};
use serde::{Deserialize, Serialize};

use story_core::config::{Config, LlmConfig, DEFAULT_OLLAMA_URL};
use story_core::model::{LanguageModel, LanguageModelError};

use crate::base_url::{check_base_url, ollama_api_root};
use crate::error::AdapterError;
use crate::retry::{call_with_retry, RetryConfig};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

pub fn create_llm_adapter(
    config: &Config,
    profile_name: &str,
) -> Result<Box<dyn LanguageModel>, AdapterError> {
    let profile = config.get_llm_profile(profile_name).ok_or_else(|| {
        AdapterError::InvalidConfig(format!("unknown LLM profile `{}`", profile_name))
    })?;
    create_llm_adapter_from_profile(profile)
}

pub fn create_llm_adapter_from_profile(
    profile: &LlmConfig,
) -> Result<Box<dyn LanguageModel>, AdapterError> {
    let fmt = profile.interface_format.trim().to_lowercase();
    let retry = RetryConfig::new(profile.max_retries.max(1), Duration::from_secs(2));

    let (default_url, system_prompt) = match fmt.as_str() {
        "" | "ollama" => return Ok(Box::new(OllamaAdapter::new(profile, retry)?)),
        "ollama-openai" => ("http://localhost:11434/v1", DEFAULT_SYSTEM_PROMPT),
        "openai" => ("https://api.openai.com/v1", DEFAULT_SYSTEM_PROMPT),
        "deepseek" => ("https://api.deepseek.com/v1", DEFAULT_SYSTEM_PROMPT),
        "lm studio" => ("http://localhost:1234/v1", DEFAULT_SYSTEM_PROMPT),
        "ml studio" => ("http://localhost:5000/v1", DEFAULT_SYSTEM_PROMPT),
        "grok" => ("https://api.x.ai/v1", "You are Grok, created by xAI."),
        other => {
            return Err(AdapterError::InvalidConfig(format!(
                "unknown interface_format: {}",
                other
            )))
        }
    };

    let adapter = OpenAiLikeAdapter::new(
        profile,
        resolve_base_url(&profile.base_url, default_url),
        Some(system_prompt.to_string()),
        retry,
    )?;
    Ok(Box::new(adapter))
}

fn optional_string(value: &str) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn resolve_base_url(base_url: &str, default: &str) -> String {
    if base_url.trim().is_empty() {
        check_base_url(default)
    } else {
        check_base_url(base_url)
    }
}

fn require_model_name(profile: &LlmConfig) -> Result<String, AdapterError> {
    let name = profile.model_name.trim();
    if name.is_empty() {
        return Err(AdapterError::InvalidConfig(
            "model_name must not be empty".to_string(),
        ));
    }
    Ok(name.to_string())
}

/// A `timeout` of zero waits for the model indefinitely.
fn build_client(timeout: u64) -> Result<Client, AdapterError> {
    let timeout = (timeout > 0).then(|| Duration::from_secs(timeout));
    Ok(Client::builder().timeout(timeout).build()?)
}

fn handle_status(
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, AdapterError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().unwrap_or_default();
    Err(AdapterError::HttpStatus { status, body })
}

/// Ollama's native `/api/generate` endpoint, non-streaming.
pub struct OllamaAdapter {
    client: Client,
    url: String,
    model_name: String,
    options: GenerateOptions,
    retry: RetryConfig,
}

impl OllamaAdapter {
    pub fn new(profile: &LlmConfig, retry: RetryConfig) -> Result<Self, AdapterError> {
        let model_name = require_model_name(profile)?;
        let base = if profile.base_url.trim().is_empty() {
            DEFAULT_OLLAMA_URL
        } else {
            profile.base_url.as_str()
        };
        let root = ollama_api_root(base);
        if root.is_empty() {
            return Err(AdapterError::InvalidConfig(
                "base_url must not be empty".to_string(),
            ));
        }

        Ok(Self {
            client: build_client(profile.timeout)?,
            url: format!("{root}/api/generate"),
            model_name,
            options: GenerateOptions::from_profile(profile),
            retry,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn invoke_once(&self, prompt: &str) -> Result<String, AdapterError> {
        let body = GenerateRequest {
            model: &self.model_name,
            prompt,
            stream: false,
            options: &self.options,
        };
        debug!("POST {} ({} prompt chars)", self.url, prompt.len());
        let response = self.client.post(&self.url).json(&body).send()?;
        let parsed: GenerateResponse = handle_status(response)?.json()?;
        parse_generate_response(parsed)
    }
}

impl LanguageModel for OllamaAdapter {
    fn invoke(&self, prompt: &str) -> Result<String, LanguageModelError> {
        call_with_retry(|| self.invoke_once(prompt), &self.retry).map_err(LanguageModelError::new)
    }
}

#[derive(Clone, Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_ctx: u32,
    /// `-1` lets the model generate until it stops on its own.
    num_predict: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

impl GenerateOptions {
    fn from_profile(profile: &LlmConfig) -> Self {
        Self {
            temperature: profile.temperature,
            num_ctx: profile.num_ctx,
            num_predict: if profile.max_tokens == 0 {
                -1
            } else {
                i64::from(profile.max_tokens)
            },
            stop: profile.stop.clone(),
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: &'a GenerateOptions,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn parse_generate_response(response: GenerateResponse) -> Result<String, AdapterError> {
    if let Some(error) = response.error {
        return Err(AdapterError::Service(error));
    }
    if response.done_reason.as_deref() == Some("length") {
        warn!("Ollama response truncated due to num_predict/num_ctx limit");
    }
    match response.response {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(AdapterError::EmptyResponse),
    }
}

/// Chat-completions endpoint shared by OpenAI, DeepSeek, LM Studio, Grok and
/// Ollama's compatibility layer.
pub struct OpenAiLikeAdapter {
    client: Client,
    url: String,
    api_key: Option<String>,
    model_name: String,
    max_tokens: Option<u32>,
    temperature: f32,
    stop: Vec<String>,
    system_prompt: Option<String>,
    retry: RetryConfig,
}

impl OpenAiLikeAdapter {
    pub fn new(
        profile: &LlmConfig,
        base_url: String,
        system_prompt: Option<String>,
        retry: RetryConfig,
    ) -> Result<Self, AdapterError> {
        if base_url.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "base_url must not be empty".to_string(),
            ));
        }
        let model_name = require_model_name(profile)?;

        Ok(Self {
            client: build_client(profile.timeout)?,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: optional_string(&profile.api_key),
            model_name,
            max_tokens: if profile.max_tokens == 0 {
                None
            } else {
                Some(profile.max_tokens)
            },
            temperature: profile.temperature,
            stop: profile.stop.clone(),
            system_prompt,
            retry,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn invoke_once(&self, prompt: &str) -> Result<String, AdapterError> {
        let mut messages: Vec<ChatMessageRequest<'_>> = Vec::new();
        if let Some(system) = self.system_prompt.as_deref() {
            messages.push(ChatMessageRequest {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessageRequest {
            role: "user",
            content: prompt,
        });

        let body = ChatCompletionRequest {
            model: &self.model_name,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stop: (!self.stop.is_empty()).then_some(self.stop.as_slice()),
        };

        let mut request = self.client.post(&self.url).header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.json(&body).send()?;
        let parsed: ChatCompletionResponse = handle_status(response)?.json()?;
        extract_choice_content(parsed).ok_or(AdapterError::EmptyResponse)
    }
}

impl LanguageModel for OpenAiLikeAdapter {
    fn invoke(&self, prompt: &str) -> Result<String, LanguageModelError> {
        call_with_retry(|| self.invoke_once(prompt), &self.retry).map_err(LanguageModelError::new)
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessageRequest<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
}

#[derive(Serialize)]
struct ChatMessageRequest<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

fn extract_choice_content(response: ChatCompletionResponse) -> Option<String> {
    for choice in response.choices {
        if choice.finish_reason.as_deref() == Some("length") {
            warn!("chat completion truncated due to max_tokens limit");
        }
        let content = choice.message.and_then(|message| message.content);
        if let Some(content) = content.filter(|text| !text.trim().is_empty()) {
            return Some(content);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile(format: &str) -> LlmConfig {
        LlmConfig {
            interface_format: format.to_string(),
            model_name: "gemma3:27b".to_string(),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn generate_request_carries_profile_options() {
        let options = GenerateOptions::from_profile(&LlmConfig::local_ollama());
        let body = GenerateRequest {
            model: "gemma3:27b",
            prompt: "Once upon a time",
            stream: false,
            options: &options,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["stream"], json!(false));
        assert_eq!(value["options"]["num_predict"], json!(-1));
        assert_eq!(value["options"]["num_ctx"], json!(128_000));
        assert_eq!(value["options"]["temperature"], json!(1.0));
        assert_eq!(
            value["options"]["stop"],
            json!(["<|im_end|>", "<|end_of_text|>", "<|eot_id|>"])
        );
    }

    #[test]
    fn parses_generate_response() {
        let ok: GenerateResponse =
            serde_json::from_value(json!({"response": "A tale.", "done": true})).unwrap();
        assert_eq!(parse_generate_response(ok).unwrap(), "A tale.");

        let empty: GenerateResponse =
            serde_json::from_value(json!({"response": "  ", "done": true})).unwrap();
        assert!(matches!(
            parse_generate_response(empty),
            Err(AdapterError::EmptyResponse)
        ));

        let failed: GenerateResponse =
            serde_json::from_value(json!({"error": "model 'x' not found"})).unwrap();
        match parse_generate_response(failed) {
            Err(AdapterError::Service(message)) => assert_eq!(message, "model 'x' not found"),
            other => panic!("expected service error, got {other:?}"),
        }
    }

    #[test]
    fn extracts_first_non_empty_choice() {
        let response: ChatCompletionResponse = serde_json::from_value(json!({
            "choices": [
                {"message": {"content": ""}},
                {"message": {"content": "Bilbo ran."}, "finish_reason": "stop"}
            ]
        }))
        .unwrap();
        assert_eq!(extract_choice_content(response).as_deref(), Some("Bilbo ran."));
    }

    #[test]
    fn ollama_adapter_targets_native_endpoint() {
        let mut config = profile("ollama");
        config.base_url = "http://localhost:11434/v1".into();
        let adapter = OllamaAdapter::new(&config, RetryConfig::default()).unwrap();
        assert_eq!(adapter.url(), "http://localhost:11434/api/generate");

        let adapter = OllamaAdapter::new(&profile("ollama"), RetryConfig::default()).unwrap();
        assert_eq!(adapter.url(), "http://localhost:11434/api/generate");
    }

    #[test]
    fn openai_like_adapter_builds_chat_url() {
        let mut config = profile("openai");
        config.base_url = "http://localhost:1234".into();
        let adapter = OpenAiLikeAdapter::new(
            &config,
            resolve_base_url(&config.base_url, "https://api.openai.com/v1"),
            None,
            RetryConfig::default(),
        )
        .unwrap();
        assert_eq!(adapter.url(), "http://localhost:1234/v1/chat/completions");
    }

    #[test]
    fn factory_rejects_bad_profiles() {
        assert!(matches!(
            create_llm_adapter_from_profile(&profile("carrier pigeon")),
            Err(AdapterError::InvalidConfig(_))
        ));

        let mut nameless = profile("ollama");
        nameless.model_name = "  ".into();
        assert!(matches!(
            create_llm_adapter_from_profile(&nameless),
            Err(AdapterError::InvalidConfig(_))
        ));

        assert!(create_llm_adapter(&Config::default(), "missing").is_err());
    }

    #[test]
    fn factory_accepts_known_formats() {
        for format in ["ollama", "ollama-openai", "openai", "deepseek", "LM Studio", "grok"] {
            assert!(
                create_llm_adapter_from_profile(&profile(format)).is_ok(),
                "format {format}"
            );
        }
    }
}
