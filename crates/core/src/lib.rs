pub mod chapter;
pub mod config;
pub mod events;
pub mod logging;
pub mod model;
pub mod output_path;
pub mod pipeline;
pub mod prompts;
pub mod refine;
pub mod segment;

pub use chapter::{
    BatchFailure, ChapterAccumulator, ChapterError, ChapterGenerator, ChapterOutcome,
    FinalChapter, PersistedNarrative,
};
pub use config::{
    Config, ConfigError, ConfigStore, LlmConfig, PromptConfig, RecentUsage, StoryConfig,
};
pub use events::{batch_events, chunk_list, extract_key_events, EventBatch, EventError, KeyEvent};
pub use logging::{
    install_log_bridge, LogBridge, LogLevel, LogRecord, LogSink, NullLogSink, StdoutLogSink,
    VecLogSink,
};
pub use model::{count_tokens, LanguageModel, LanguageModelError};
pub use output_path::resolve_available_path;
pub use pipeline::{PipelineError, StoryPipeline, StoryReport, StoryRequest};
pub use prompts::{PromptArguments, PromptError, PromptRegistry, PromptSource, PromptTemplate};
pub use refine::{
    NarrativeJournal, NarrativeState, RefineError, RefinePhase, RefineRequest, RefinementEngine,
    RefinementOutcome, StepFailure,
};
pub use segment::{Chunk, Chunks, SegmentError, Segmenter};
