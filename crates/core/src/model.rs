use std::error::Error as StdError;
use std::fmt;

/// Error raised by a [`LanguageModel`] when the service is unreachable, the
/// requested model is missing, or the call fails for any other reason.
#[derive(Debug)]
pub struct LanguageModelError {
    inner: Box<dyn StdError + Send + Sync>,
}

impl LanguageModelError {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            inner: Box::new(error),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        let text: String = message.into();
        Self { inner: text.into() }
    }
}

impl fmt::Display for LanguageModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl StdError for LanguageModelError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

/// Blocking text generation. Every call suspends until the model answers.
pub trait LanguageModel: Send + Sync {
    fn invoke(&self, prompt: &str) -> Result<String, LanguageModelError>;
}

impl<M: LanguageModel + ?Sized> LanguageModel for &M {
    fn invoke(&self, prompt: &str) -> Result<String, LanguageModelError> {
        (**self).invoke(prompt)
    }
}

impl<M: LanguageModel + ?Sized> LanguageModel for Box<M> {
    fn invoke(&self, prompt: &str) -> Result<String, LanguageModelError> {
        (**self).invoke(prompt)
    }
}

/// Approximate token count: one whitespace-separated word per token.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}
