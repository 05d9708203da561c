use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::chapter::{ChapterError, ChapterGenerator, ChapterOutcome, PersistedNarrative};
use crate::config::{ConfigError, StoryConfig};
use crate::events::{batch_events, extract_key_events, EventError};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::LanguageModel;
use crate::output_path::resolve_available_path;
use crate::prompts::PromptRegistry;
use crate::refine::{RefineError, RefineRequest, RefinementEngine, RefinementOutcome};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{kind} `{path}` was not found")]
    MissingInput { kind: &'static str, path: PathBuf },
    #[error("the {kind} `{path}` is empty")]
    EmptySource { kind: &'static str, path: PathBuf },
    #[error("failed to read {kind} `{path}`: {source}")]
    ReadInput {
        kind: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    #[error(transparent)]
    Refine(#[from] RefineError),
    #[error(transparent)]
    Events(#[from] EventError),
    #[error(transparent)]
    Chapter(#[from] ChapterError),
    #[error("no narrative was produced (chunk {chunk} failed: {reason})")]
    NoNarrative { chunk: usize, reason: String },
}

/// Everything one run needs, already merged from config file and flags.
#[derive(Clone, Debug)]
pub struct StoryRequest {
    pub story_path: PathBuf,
    pub instructions_path: PathBuf,
    pub settings: StoryConfig,
}

impl StoryRequest {
    pub fn new(
        story_path: impl Into<PathBuf>,
        instructions_path: impl Into<PathBuf>,
        settings: StoryConfig,
    ) -> Self {
        Self {
            story_path: story_path.into(),
            instructions_path: instructions_path.into(),
            settings,
        }
    }

    /// Rejects bad sizes and missing inputs. Runs before any model call.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.settings.validate()?;
        ensure_exists("story file", &self.story_path)?;
        ensure_exists("instructions file", &self.instructions_path)?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct StoryReport {
    pub narrative_path: PathBuf,
    pub refinement: RefinementOutcome,
    pub chapter: ChapterOutcome,
    pub key_events: usize,
}

pub struct StoryPipeline<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
}

impl<'a> StoryPipeline<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink) -> Self {
        Self { prompts, sink }
    }

    pub fn run<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        request: &StoryRequest,
    ) -> Result<StoryReport, PipelineError> {
        request.validate()?;
        let refinement = self.refine(model, request)?;
        if !refinement.has_narrative() {
            let (chunk, reason) = refinement
                .failure
                .as_ref()
                .map(|failure| (failure.chunk, failure.reason.clone()))
                .unwrap_or((1, "no output".to_string()));
            return Err(PipelineError::NoNarrative { chunk, reason });
        }
        if let Some(failure) = &refinement.failure {
            self.log(
                LogLevel::Warn,
                format!(
                    "Continuing with the partial narrative ({} of {} chunks) after chunk {} failed.",
                    refinement.steps_completed, refinement.total_chunks, failure.chunk
                ),
            );
        }

        let narrative = PersistedNarrative::load(&refinement.narrative_path)?;
        let (chapter, key_events) = self.chapter(model, request, &narrative)?;

        Ok(StoryReport {
            narrative_path: refinement.narrative_path.clone(),
            refinement,
            chapter,
            key_events,
        })
    }

    /// Refinement only. The narrative goes to the first free path derived
    /// from `save_summary`.
    pub fn refine<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        request: &StoryRequest,
    ) -> Result<RefinementOutcome, PipelineError> {
        request.settings.validate()?;
        ensure_exists("story file", &request.story_path)?;

        let source = read_input("story file", &request.story_path)?;
        if source.trim().is_empty() {
            return Err(PipelineError::EmptySource {
                kind: "story file",
                path: request.story_path.clone(),
            });
        }

        let settings = &request.settings;
        let narrative_path = resolve_available_path(&settings.save_summary);
        let engine = RefinementEngine::new(self.prompts, self.sink);
        let outcome = engine.run(
            model,
            &RefineRequest {
                source: &source,
                chunk_size: settings.chunk_size,
                chunk_overlap: settings.chunk_overlap,
                summary_length: settings.summary_length,
                narrative_path,
            },
        )?;
        Ok(outcome)
    }

    /// Chapter generation from an already persisted narrative. Returns the
    /// outcome and the number of key events found.
    pub fn chapter<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        request: &StoryRequest,
        narrative: &PersistedNarrative,
    ) -> Result<(ChapterOutcome, usize), PipelineError> {
        request.settings.validate()?;
        ensure_exists("instructions file", &request.instructions_path)?;

        let instructions = read_input("instructions file", &request.instructions_path)?;
        let events = extract_key_events(&instructions);
        self.log(
            LogLevel::Debug,
            format!(
                "Found {} key events in {}.",
                events.len(),
                request.instructions_path.display()
            ),
        );
        let batches = batch_events(&events, request.settings.key_event_chunk_size)?;

        let generator = ChapterGenerator::new(self.prompts, self.sink);
        let outcome = generator.generate(
            model,
            narrative,
            &batches,
            &request.settings.new_chapter,
        )?;
        Ok((outcome, events.len()))
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message.into()));
    }
}

fn ensure_exists(kind: &'static str, path: &Path) -> Result<(), PipelineError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(PipelineError::MissingInput {
            kind,
            path: path.to_path_buf(),
        })
    }
}

fn read_input(kind: &'static str, path: &Path) -> Result<String, PipelineError> {
    fs::read_to_string(path).map_err(|source| PipelineError::ReadInput {
        kind,
        path: path.to_path_buf(),
        source,
    })
}
