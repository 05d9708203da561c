use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::{count_tokens, LanguageModel, LanguageModelError};
use crate::prompts::{
    PromptError, PromptRegistry, INITIAL_NARRATIVE_PROMPT, REFINE_NARRATIVE_PROMPT,
};
use crate::segment::{Chunk, SegmentError, Segmenter};

mod journal;

pub use journal::NarrativeJournal;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RefinePhase {
    Init,
    Seeded,
    Refining,
    Done,
    Failed,
}

impl fmt::Display for RefinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Init => "init",
            Self::Seeded => "seeded",
            Self::Refining => "refining",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RefineStage {
    Initial,
    Refine,
}

impl fmt::Display for RefineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => f.write_str("initial narrative"),
            Self::Refine => f.write_str("narrative refinement"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RefineError {
    #[error("source text produced no chunks")]
    NoChunks,
    #[error(transparent)]
    Segment(#[from] SegmentError),
    #[error("failed to render {stage} prompt: {source}")]
    Prompt {
        stage: RefineStage,
        #[source]
        source: PromptError,
    },
    #[error("model call for chunk {chunk} failed: {source}")]
    Model {
        chunk: usize,
        #[source]
        source: LanguageModelError,
    },
    #[error("failed to write narrative `{path}`: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// The running narrative. Each step replaces the text wholesale.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NarrativeState {
    text: String,
    steps: usize,
}

impl NarrativeState {
    pub fn seed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            steps: 1,
        }
    }

    pub fn advance(self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            steps: self.steps + 1,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

pub fn length_constraint(summary_length: usize) -> String {
    format!(
        "The final narrative should be a detailed, comprehensive retelling of around {summary_length} tokens."
    )
}

pub fn render_initial_prompt(
    prompts: &PromptRegistry,
    chunk: &Chunk,
    summary_length: usize,
) -> Result<String, PromptError> {
    prompts.format_with(
        INITIAL_NARRATIVE_PROMPT,
        [
            ("text", chunk.content().to_string()),
            ("length_constraint", length_constraint(summary_length)),
        ],
    )
}

pub fn render_refine_prompt(
    prompts: &PromptRegistry,
    state: &NarrativeState,
    chunk: &Chunk,
) -> Result<String, PromptError> {
    prompts.format_with(
        REFINE_NARRATIVE_PROMPT,
        [
            ("current_story", state.as_str()),
            ("new_story", chunk.content()),
        ],
    )
}

/// One refinement step: seeds the narrative when `state` is `None`,
/// otherwise refines it with `chunk`. Does not touch the filesystem.
pub fn refine_step<M: LanguageModel + ?Sized>(
    model: &M,
    prompts: &PromptRegistry,
    state: Option<NarrativeState>,
    chunk: &Chunk,
    summary_length: usize,
) -> Result<NarrativeState, RefineError> {
    let prompt = match &state {
        None => render_initial_prompt(prompts, chunk, summary_length).map_err(|source| {
            RefineError::Prompt {
                stage: RefineStage::Initial,
                source,
            }
        })?,
        Some(current) => {
            render_refine_prompt(prompts, current, chunk).map_err(|source| {
                RefineError::Prompt {
                    stage: RefineStage::Refine,
                    source,
                }
            })?
        }
    };

    let output = model
        .invoke(&prompt)
        .map_err(|source| RefineError::Model {
            chunk: chunk.sequence_index() + 1,
            source,
        })?;

    Ok(match state {
        None => NarrativeState::seed(output),
        Some(current) => current.advance(output),
    })
}

#[derive(Clone, Debug)]
pub struct RefineRequest<'a> {
    pub source: &'a str,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub summary_length: usize,
    pub narrative_path: PathBuf,
}

/// The step that halted refinement, one-based, and the model's reason.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepFailure {
    pub chunk: usize,
    pub reason: String,
}

#[derive(Clone, Debug)]
pub struct RefinementOutcome {
    pub phase: RefinePhase,
    pub total_chunks: usize,
    pub steps_completed: usize,
    pub narrative_path: PathBuf,
    pub failure: Option<StepFailure>,
}

impl RefinementOutcome {
    /// Whether at least one step reached the narrative file.
    pub fn has_narrative(&self) -> bool {
        self.steps_completed > 0
    }

    pub fn is_complete(&self) -> bool {
        self.phase == RefinePhase::Done
    }
}

pub struct RefinementEngine<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
}

impl<'a> RefinementEngine<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink) -> Self {
        Self { prompts, sink }
    }

    /// Runs every chunk of the source through the model in order, committing
    /// each output to the narrative file. A model failure stops the loop and
    /// is reported in the outcome; earlier commits stay on disk.
    pub fn run<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        request: &RefineRequest<'_>,
    ) -> Result<RefinementOutcome, RefineError> {
        let segmenter = Segmenter::new(request.chunk_size, request.chunk_overlap)?;
        let total_chunks = segmenter.chunks(request.source).count();
        if total_chunks == 0 {
            return Err(RefineError::NoChunks);
        }

        self.log(
            LogLevel::Info,
            "Processing initial chunk to create the story background summary...",
        );
        self.log(
            LogLevel::Info,
            format!(
                "Generated summary will be saved to: {}",
                request.narrative_path.display()
            ),
        );
        self.log(
            LogLevel::Info,
            format!("Original text split into {total_chunks} chunks."),
        );

        let mut journal = NarrativeJournal::new(&request.narrative_path);
        let mut phase = RefinePhase::Init;
        let mut state: Option<NarrativeState> = None;
        let mut failure = None;

        for chunk in segmenter.chunks(request.source) {
            let position = chunk.sequence_index() + 1;
            if position > 1 {
                self.log(
                    LogLevel::Info,
                    format!("Refining background story with chunk {position} of {total_chunks}..."),
                );
            }

            let next = match refine_step(
                model,
                self.prompts,
                state.take(),
                &chunk,
                request.summary_length,
            ) {
                Ok(next) => next,
                Err(RefineError::Model { chunk, source }) => {
                    let reason = source.to_string();
                    if chunk == 1 {
                        self.log(LogLevel::Error, "Error processing the first chunk.");
                    } else {
                        self.log(
                            LogLevel::Error,
                            format!("Error refining narrative with chunk {chunk}."),
                        );
                    }
                    self.log(LogLevel::Error, format!("Reason: {reason}"));
                    failure = Some(StepFailure { chunk, reason });
                    phase = RefinePhase::Failed;
                    break;
                }
                Err(other) => return Err(other),
            };

            self.inspect_output(&next, position, request.summary_length);
            commit(&mut journal, next.as_str())?;
            phase = if phase == RefinePhase::Init {
                RefinePhase::Seeded
            } else {
                RefinePhase::Refining
            };
            state = Some(next);
        }

        if phase != RefinePhase::Failed {
            phase = RefinePhase::Done;
        }

        Ok(RefinementOutcome {
            phase,
            total_chunks,
            steps_completed: journal.commits(),
            narrative_path: request.narrative_path.clone(),
            failure,
        })
    }

    fn inspect_output(&self, state: &NarrativeState, position: usize, summary_length: usize) {
        if state.as_str().trim().is_empty() {
            self.log(
                LogLevel::Warn,
                format!("Model returned an empty narrative for chunk {position}."),
            );
            return;
        }
        self.log(
            LogLevel::Debug,
            format!(
                "Chunk {position} narrative is ~{} tokens (target {summary_length}).",
                count_tokens(state.as_str())
            ),
        );
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message.into()));
    }
}

fn commit(journal: &mut NarrativeJournal, output: &str) -> Result<(), RefineError> {
    journal
        .commit(output)
        .map_err(|source| RefineError::WriteFile {
            path: journal.path().to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::VecLogSink;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct ScriptedModel {
        replies: Mutex<Vec<Result<String, String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<&str, &str>>) -> Self {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .rev()
                        .map(|reply| reply.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    impl LanguageModel for ScriptedModel {
        fn invoke(&self, prompt: &str) -> Result<String, LanguageModelError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match self.replies.lock().unwrap().pop() {
                Some(Ok(text)) => Ok(text),
                Some(Err(reason)) => Err(LanguageModelError::message(reason)),
                None => Err(LanguageModelError::message("no scripted reply")),
            }
        }
    }

    fn chunk_text(count: usize) -> String {
        (0..count)
            .map(|i| format!("Paragraph {i} tells a small part of the tale."))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn request(source: &str, path: PathBuf) -> RefineRequest<'_> {
        RefineRequest {
            source,
            chunk_size: 60,
            chunk_overlap: 10,
            summary_length: 500,
            narrative_path: path,
        }
    }

    #[test]
    fn state_is_replaced_not_appended() {
        let state = NarrativeState::seed("one").advance("two");
        assert_eq!(state.as_str(), "two");
        assert_eq!(state.steps(), 2);
    }

    #[test]
    fn step_uses_initial_then_refine_prompt() {
        let prompts = PromptRegistry::new().unwrap();
        let model = ScriptedModel::new(vec![Ok("seeded"), Ok("refined")]);
        let chunks = Segmenter::new(60, 10).unwrap().split(&chunk_text(3));

        let state = refine_step(&model, &prompts, None, &chunks[0], 321).unwrap();
        let state = refine_step(&model, &prompts, Some(state), &chunks[1], 321).unwrap();
        assert_eq!(state.as_str(), "refined");

        let sent = model.prompts();
        assert!(sent[0].contains("retelling of around 321 tokens."));
        assert!(sent[0].contains(chunks[0].content()));
        assert!(sent[1].contains("\"seeded\""));
        assert!(sent[1].contains(chunks[1].content()));
    }

    #[test]
    fn engine_commits_every_step() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("summary.txt");
        let source = chunk_text(3);
        let total = Segmenter::new(60, 10).unwrap().split(&source).len();
        let replies: Vec<Result<&str, &str>> = ["A", "B", "C", "D", "E", "F"]
            .into_iter()
            .take(total)
            .map(Ok)
            .collect();
        let expected: String = ["A", "B", "C", "D", "E", "F"][..total].concat();

        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let model = ScriptedModel::new(replies);
        let outcome = RefinementEngine::new(&prompts, &sink)
            .run(&model, &request(&source, path.clone()))
            .unwrap();

        assert_eq!(outcome.phase, RefinePhase::Done);
        assert_eq!(outcome.steps_completed, total);
        assert_eq!(fs::read_to_string(&path).unwrap(), expected);
        assert!(sink
            .messages_at(LogLevel::Info)
            .contains(&format!("Original text split into {total} chunks.")));
    }

    #[test]
    fn first_chunk_failure_leaves_no_narrative() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("summary.txt");
        let source = chunk_text(3);
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let model = ScriptedModel::new(vec![Err("connection refused")]);

        let outcome = RefinementEngine::new(&prompts, &sink)
            .run(&model, &request(&source, path.clone()))
            .unwrap();

        assert_eq!(outcome.phase, RefinePhase::Failed);
        assert!(!outcome.has_narrative());
        assert_eq!(
            outcome.failure,
            Some(StepFailure {
                chunk: 1,
                reason: "connection refused".into()
            })
        );
        assert!(!path.exists());
        assert_eq!(model.prompts().len(), 1);
        assert!(sink
            .messages_at(LogLevel::Error)
            .contains(&"Reason: connection refused".to_string()));
    }

    /// Answers every call, but on `swap_on` moves the narrative file aside
    /// and leaves a directory in its place so the next commit fails.
    struct FileSwappingModel {
        narrative: PathBuf,
        backup: PathBuf,
        swap_on: usize,
        calls: Mutex<usize>,
    }

    impl LanguageModel for FileSwappingModel {
        fn invoke(&self, _prompt: &str) -> Result<String, LanguageModelError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls == self.swap_on {
                fs::rename(&self.narrative, &self.backup).unwrap();
                fs::create_dir(&self.narrative).unwrap();
            }
            Ok(format!("step {calls}. "))
        }
    }

    #[test]
    fn write_failure_stops_refinement_and_keeps_earlier_commits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("summary.txt");
        let backup = dir.path().join("summary.before.txt");
        let source = chunk_text(5);
        assert!(Segmenter::new(60, 10).unwrap().split(&source).len() > 2);

        let prompts = PromptRegistry::new().unwrap();
        let model = FileSwappingModel {
            narrative: path.clone(),
            backup: backup.clone(),
            swap_on: 2,
            calls: Mutex::new(0),
        };
        let err = RefinementEngine::new(&prompts, &crate::logging::NullLogSink)
            .run(&model, &request(&source, path.clone()))
            .unwrap_err();

        match err {
            RefineError::WriteFile { path: failed, .. } => assert_eq!(failed, path),
            other => panic!("expected write failure, got {other:?}"),
        }
        assert_eq!(*model.calls.lock().unwrap(), 2);
        assert_eq!(fs::read_to_string(&backup).unwrap(), "step 1. ");
    }

    #[test]
    fn unwritable_narrative_path_fails_after_first_call() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("summary.txt");
        fs::create_dir(&path).unwrap();
        let source = chunk_text(3);
        let prompts = PromptRegistry::new().unwrap();
        let model = ScriptedModel::new(vec![Ok("A"), Ok("B"), Ok("C")]);

        let err = RefinementEngine::new(&prompts, &crate::logging::NullLogSink)
            .run(&model, &request(&source, path.clone()))
            .unwrap_err();

        assert!(matches!(err, RefineError::WriteFile { .. }));
        assert_eq!(model.prompts().len(), 1);
    }

    #[test]
    fn empty_source_is_rejected() {
        let dir = tempdir().unwrap();
        let prompts = PromptRegistry::new().unwrap();
        let model = ScriptedModel::new(vec![]);
        let err = RefinementEngine::new(&prompts, &crate::logging::NullLogSink)
            .run(&model, &request("", dir.path().join("summary.txt")))
            .unwrap_err();
        assert!(matches!(err, RefineError::NoChunks));
        assert!(model.prompts().is_empty());
    }

    #[test]
    fn invalid_sizes_fail_before_any_call() {
        let dir = tempdir().unwrap();
        let prompts = PromptRegistry::new().unwrap();
        let model = ScriptedModel::new(vec![Ok("unused")]);
        let mut req = request("text", dir.path().join("summary.txt"));
        req.chunk_overlap = req.chunk_size;
        let err = RefinementEngine::new(&prompts, &crate::logging::NullLogSink)
            .run(&model, &req)
            .unwrap_err();
        assert!(matches!(err, RefineError::Segment(_)));
        assert!(model.prompts().is_empty());
    }
}
