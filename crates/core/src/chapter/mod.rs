use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::events::EventBatch;
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::{LanguageModel, LanguageModelError};
use crate::prompts::{PromptError, PromptRegistry, CHAPTER_SECTION_PROMPT};

mod accumulator;

pub use accumulator::{ChapterAccumulator, FinalChapter, SECTION_SEPARATOR};

#[derive(Debug, Error)]
pub enum ChapterError {
    #[error("failed to read narrative `{path}`: {source}")]
    ReadNarrative { path: PathBuf, source: io::Error },
    #[error("failed to render prompt for event batch {batch}: {source}")]
    Prompt {
        batch: usize,
        #[source]
        source: PromptError,
    },
    #[error("model call for event batch {batch} failed: {source}")]
    Model {
        batch: usize,
        #[source]
        source: LanguageModelError,
    },
    #[error("failed to write chapter `{path}`: {source}")]
    WriteFile { path: PathBuf, source: io::Error },
}

/// The narrative file produced by refinement, loaded for the chapter stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistedNarrative {
    path: PathBuf,
    content: String,
}

impl PersistedNarrative {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ChapterError> {
        let path = path.into();
        let content = fs::read_to_string(&path).map_err(|source| ChapterError::ReadNarrative {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path, content })
    }

    pub fn from_parts(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

impl fmt::Display for PersistedNarrative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

pub fn render_section_prompt(
    prompts: &PromptRegistry,
    accumulator: &ChapterAccumulator,
    batch: &EventBatch,
) -> Result<String, PromptError> {
    prompts.format_with(
        CHAPTER_SECTION_PROMPT,
        [
            ("previous_story", accumulator.as_str().to_string()),
            ("key_events", batch.bulleted()),
        ],
    )
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchFailure {
    /// One-based batch position.
    pub batch: usize,
    pub reason: String,
}

#[derive(Clone, Debug)]
pub struct ChapterOutcome {
    pub chapter: FinalChapter,
    pub path: PathBuf,
    pub total_batches: usize,
    pub batches_completed: usize,
    pub failure: Option<BatchFailure>,
}

impl ChapterOutcome {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }

    pub fn text(&self) -> String {
        self.chapter.render()
    }
}

pub struct ChapterGenerator<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
}

impl<'a> ChapterGenerator<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink) -> Self {
        Self { prompts, sink }
    }

    /// Generates one section per batch, feeding each call the narrative plus
    /// every earlier section, then writes the chapter to `output_path`. A
    /// model failure stops generation; the sections produced so far are still
    /// written.
    pub fn generate<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        narrative: &PersistedNarrative,
        batches: &[EventBatch],
        output_path: &Path,
    ) -> Result<ChapterOutcome, ChapterError> {
        self.log(
            LogLevel::Info,
            "Applying provided instructions to create a new chapter to the story...",
        );
        if batches.is_empty() {
            self.log(LogLevel::Warn, "No key events found between the markers.");
        }

        let total = batches.len();
        let mut accumulator = ChapterAccumulator::new(narrative.content());
        let mut chapter = FinalChapter::new();
        let mut failure = None;

        for batch in batches {
            let position = batch.index() + 1;
            self.log(
                LogLevel::Info,
                format!(
                    "Generating story section for key events {} [chunk {position} of {total}]...",
                    batch.range_label()
                ),
            );

            let prompt = render_section_prompt(self.prompts, &accumulator, batch).map_err(
                |source| ChapterError::Prompt {
                    batch: position,
                    source,
                },
            )?;

            match model.invoke(&prompt) {
                Ok(section) => {
                    if section.trim().is_empty() {
                        self.log(
                            LogLevel::Warn,
                            format!("Model returned an empty section for chunk {position}."),
                        );
                    }
                    chapter.push(&section);
                    accumulator.push(&section);
                }
                Err(source) => {
                    let reason = source.to_string();
                    self.log(
                        LogLevel::Error,
                        format!("Error generating story section for chunk {position}: {reason}"),
                    );
                    failure = Some(BatchFailure {
                        batch: position,
                        reason,
                    });
                    break;
                }
            }
        }

        write_chapter(output_path, &chapter.render())?;
        self.log(
            LogLevel::Info,
            format!("New chapter written to {}.", output_path.display()),
        );

        Ok(ChapterOutcome {
            batches_completed: chapter.sections(),
            chapter,
            path: output_path.to_path_buf(),
            total_batches: total,
            failure,
        })
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message.into()));
    }
}

/// Overwrites the chapter in place, keeping the existing file's permissions
/// and links.
fn write_chapter(path: &Path, content: &str) -> Result<(), ChapterError> {
    let write_error = |source| ChapterError::WriteFile {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_error)?;
    }
    fs::write(path, content).map_err(write_error)
}
