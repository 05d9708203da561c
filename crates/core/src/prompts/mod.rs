use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::PromptConfig;

const BUILT_IN_PROMPTS: &str = include_str!("../../prompts/default.toml");

pub const INITIAL_NARRATIVE_PROMPT: &str = "initial_narrative";
pub const REFINE_NARRATIVE_PROMPT: &str = "refine_narrative";
pub const CHAPTER_SECTION_PROMPT: &str = "chapter_section";

pub type PromptArguments = HashMap<String, String>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromptSource {
    BuiltIn,
    File(PathBuf),
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt `{0}` not found")]
    NotFound(String),
    #[error("missing argument `{argument}` when rendering prompt `{key}`")]
    MissingArgument { key: String, argument: String },
    #[error("failed to read prompt file `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse built-in prompt definitions: {0}")]
    ParseBuiltIn(toml::de::Error),
    #[error("failed to parse prompt file `{path}` as TOML: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to parse prompt file `{path}` as YAML: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

#[derive(Clone, Debug)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed `{placeholder}` template. Every placeholder is a required
/// argument.
#[derive(Clone, Debug)]
pub struct PromptTemplate {
    key: String,
    description: Option<String>,
    source: PromptSource,
    segments: Vec<Segment>,
    placeholders: BTreeSet<String>,
}

impl PromptTemplate {
    pub fn parse(key: impl Into<String>, template: &str, source: PromptSource) -> Self {
        let (segments, placeholders) = parse_template(template);
        Self {
            key: key.into(),
            description: None,
            source,
            segments,
            placeholders,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn source(&self) -> &PromptSource {
        &self.source
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.placeholders.iter().map(String::as_str)
    }

    pub fn render(&self, arguments: &PromptArguments) -> Result<String, PromptError> {
        if let Some(missing) = self
            .placeholders
            .iter()
            .find(|name| !arguments.contains_key(*name))
        {
            return Err(PromptError::MissingArgument {
                key: self.key.clone(),
                argument: missing.clone(),
            });
        }

        let mut output = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => output.push_str(text),
                Segment::Placeholder(name) => output.push_str(&arguments[name]),
            }
        }
        Ok(output)
    }
}

/// Prompt templates keyed by name: the built-in set, overridden by any
/// `.toml` / `.yaml` files found in the configured directories.
#[derive(Debug)]
pub struct PromptRegistry {
    prompts: BTreeMap<String, PromptTemplate>,
    directories: Vec<PathBuf>,
}

impl PromptRegistry {
    pub fn new() -> Result<Self, PromptError> {
        Self::with_custom_directories(Vec::new())
    }

    pub fn from_prompt_config(config: &PromptConfig) -> Result<Self, PromptError> {
        Self::with_custom_directories(config.custom_directories.clone())
    }

    pub fn with_custom_directories(directories: Vec<PathBuf>) -> Result<Self, PromptError> {
        let mut registry = Self {
            prompts: BTreeMap::new(),
            directories,
        };
        registry.reload()?;
        Ok(registry)
    }

    pub fn reload(&mut self) -> Result<(), PromptError> {
        let mut prompts = BTreeMap::new();
        for template in parse_toml_document(BUILT_IN_PROMPTS, PromptSource::BuiltIn)
            .map_err(PromptError::ParseBuiltIn)?
        {
            prompts.insert(template.key.clone(), template);
        }
        for dir in &self.directories {
            load_directory(dir, &mut prompts)?;
        }
        self.prompts = prompts;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&PromptTemplate> {
        self.prompts.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.prompts.keys().map(String::as_str)
    }

    pub fn format(&self, key: &str, args: &PromptArguments) -> Result<String, PromptError> {
        self.get(key)
            .ok_or_else(|| PromptError::NotFound(key.to_string()))?
            .render(args)
    }

    pub fn format_with<I, K, V>(&self, key: &str, arguments: I) -> Result<String, PromptError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let args: PromptArguments = arguments
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        self.format(key, &args)
    }
}

fn load_directory(
    dir: &Path,
    prompts: &mut BTreeMap<String, PromptTemplate>,
) -> Result<(), PromptError> {
    if !dir.is_dir() {
        return Ok(());
    }

    let io_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source| PromptError::Io { path, source }
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error(dir))? {
        let path = entry.map_err(io_error(dir))?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    for path in files {
        let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
            continue;
        };
        let ext = ext.to_ascii_lowercase();
        if !matches!(ext.as_str(), "toml" | "yaml" | "yml") {
            continue;
        }

        let contents = fs::read_to_string(&path).map_err(io_error(&path))?;
        let source = PromptSource::File(path.clone());
        let templates = if ext == "toml" {
            parse_toml_document(&contents, source).map_err(|source| PromptError::ParseToml {
                path: path.clone(),
                source,
            })?
        } else {
            let document: PromptDocument =
                serde_yaml::from_str(&contents).map_err(|source| PromptError::ParseYaml {
                    path: path.clone(),
                    source,
                })?;
            document.into_templates(&source)
        };
        for template in templates {
            prompts.insert(template.key.clone(), template);
        }
    }

    Ok(())
}

fn parse_toml_document(
    contents: &str,
    source: PromptSource,
) -> Result<Vec<PromptTemplate>, toml::de::Error> {
    let document: PromptDocument = toml::from_str(contents)?;
    Ok(document.into_templates(&source))
}

#[derive(Debug, Deserialize)]
struct PromptDocument {
    #[serde(default)]
    prompts: BTreeMap<String, RawPrompt>,
}

impl PromptDocument {
    fn into_templates(self, source: &PromptSource) -> Vec<PromptTemplate> {
        self.prompts
            .into_iter()
            .map(|(key, raw)| {
                let mut template = PromptTemplate::parse(key, &raw.template, source.clone());
                template.description = raw.description;
                template
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct RawPrompt {
    #[serde(alias = "text")]
    template: String,
    #[serde(default)]
    description: Option<String>,
}

fn parse_template(template: &str) -> (Vec<Segment>, BTreeSet<String>) {
    let mut segments = Vec::new();
    let mut placeholders = BTreeSet::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for next in chars.by_ref() {
                    if next == '}' {
                        closed = true;
                        break;
                    }
                    name.push(next);
                }
                let trimmed = name.trim();
                if closed && !trimmed.is_empty() {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    placeholders.insert(trimmed.to_string());
                    segments.push(Segment::Placeholder(trimmed.to_string()));
                } else {
                    literal.push('{');
                    literal.push_str(&name);
                    if closed {
                        literal.push('}');
                    }
                }
            }
            _ => literal.push(ch),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }

    (segments, placeholders)
}
