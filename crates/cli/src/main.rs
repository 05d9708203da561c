use clap::{Args, Parser, Subcommand};
use story_adapters::{create_llm_adapter_from_profile, AdapterError, LanguageModelError};
use story_core::config::DEFAULT_INTERFACE_FORMAT;
use story_core::{
    install_log_bridge, ConfigStore, LanguageModel, LlmConfig, LogLevel, LogRecord, LogSink,
    PersistedNarrative, PipelineError, PromptError, PromptRegistry, StdoutLogSink, StoryConfig,
    StoryPipeline, StoryRequest,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

const BANNER_WIDTH: usize = 50;

fn main() {
    let started = Instant::now();
    let result = run();
    if let Err(err) = result {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
    println!(
        "\nTotal script execution time: {}",
        format_elapsed(started.elapsed())
    );
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let min_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let sink = StdoutLogSink::with_min_level(min_level);
    if install_log_bridge(sink.clone(), min_level).is_err() {
        sink.log(LogRecord::new(
            LogLevel::Warn,
            "another logger is already installed; adapter warnings go there",
        ));
    }

    match cli.command {
        Command::Write(args) => run_write(&cli.config, args, &sink),
        Command::Narrative(args) => run_narrative(&cli.config, args, &sink),
        Command::Chapter(args) => run_chapter(&cli.config, args, &sink),
        Command::Config(command) => handle_config(&cli.config, command, &sink),
    }
}

fn handle_config(
    config_path: &Path,
    command: ConfigCommand,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    match command {
        ConfigCommand::TestLlm(args) => run_test_llm(config_path, args, sink),
    }
}

/// Shared state for the story commands: merged settings, prompts and model.
struct Session {
    store: ConfigStore,
    interface: String,
    model: Box<dyn LanguageModel>,
    prompts: PromptRegistry,
    request: StoryRequest,
}

impl Session {
    fn open(
        config_path: &Path,
        model_args: &ModelArgs,
        story_args: &StoryArgs,
        needs_story: bool,
        sink: &dyn LogSink,
    ) -> Result<Self, CliError> {
        let mut store = ConfigStore::open(config_path.to_path_buf())?;
        store.ensure_recent_defaults();

        let settings = story_args.apply(store.config().story.clone());
        let story_path = match story_args
            .story
            .clone()
            .or_else(|| settings.story_path.clone())
        {
            Some(path) => path,
            None if needs_story => return Err(CliError::MissingArgument("--story")),
            None => PathBuf::new(),
        };
        let instructions_path = story_args
            .instructions
            .clone()
            .or_else(|| settings.instructions_path.clone())
            .ok_or(CliError::MissingArgument("--instructions"))?;
        let request = StoryRequest::new(story_path, instructions_path, settings);

        let (interface, profile) = resolve_llm_profile(&store, model_args)?;
        sink.log(LogRecord::new(
            LogLevel::Debug,
            format!(
                "Model: {} | Interface: {} | Base URL: {}",
                profile.model_name, profile.interface_format, profile.base_url
            ),
        ));
        let model = create_llm_adapter_from_profile(&profile).map_err(|source| {
            CliError::Connect {
                url: profile.base_url.clone(),
                model: profile.model_name.clone(),
                source,
            }
        })?;

        let prompts = PromptRegistry::from_prompt_config(&store.config().prompts)?;

        Ok(Self {
            store,
            interface,
            model,
            prompts,
            request,
        })
    }

    fn remember_interface(&mut self) -> Result<(), CliError> {
        if self
            .store
            .config()
            .llm_profiles
            .contains_key(&self.interface)
        {
            self.store.touch_llm_interface(self.interface.clone());
            self.store.save()?;
        }
        Ok(())
    }
}

fn run_write(config_path: &Path, args: WriteArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let mut session = Session::open(config_path, &args.model, &args.story, true, sink)?;
    let pipeline = StoryPipeline::new(&session.prompts, sink);
    let report = pipeline.run(session.model.as_ref(), &session.request)?;

    if let Some(failure) = &report.chapter.failure {
        sink.log(LogRecord::new(
            LogLevel::Warn,
            format!(
                "Chapter stopped at event batch {} of {}: {}",
                failure.batch, report.chapter.total_batches, failure.reason
            ),
        ));
    }
    print_chapter(&report.chapter.text());
    session.remember_interface()
}

fn run_narrative(
    config_path: &Path,
    args: WriteArgs,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    let mut session = Session::open(config_path, &args.model, &args.story, true, sink)?;
    let pipeline = StoryPipeline::new(&session.prompts, sink);
    let outcome = pipeline.refine(session.model.as_ref(), &session.request)?;

    match &outcome.failure {
        Some(failure) if !outcome.has_narrative() => {
            return Err(PipelineError::NoNarrative {
                chunk: failure.chunk,
                reason: failure.reason.clone(),
            }
            .into());
        }
        Some(failure) => sink.log(LogRecord::new(
            LogLevel::Warn,
            format!(
                "Narrative is partial: {} of {} chunks before chunk {} failed.",
                outcome.steps_completed, outcome.total_chunks, failure.chunk
            ),
        )),
        None => {}
    }
    sink.log(LogRecord::new(
        LogLevel::Info,
        format!("Narrative written to {}.", outcome.narrative_path.display()),
    ));
    session.remember_interface()
}

fn run_chapter(
    config_path: &Path,
    args: ChapterArgs,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    let mut session = Session::open(config_path, &args.model, &args.story, false, sink)?;
    let narrative =
        PersistedNarrative::load(&args.narrative).map_err(PipelineError::from)?;
    let pipeline = StoryPipeline::new(&session.prompts, sink);
    let (outcome, _) = pipeline.chapter(session.model.as_ref(), &session.request, &narrative)?;

    print_chapter(&outcome.text());
    session.remember_interface()
}

fn run_test_llm(config_path: &Path, args: TestLlmArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let mut store = ConfigStore::open(config_path.to_path_buf())?;
    store.ensure_recent_defaults();

    let (selected, profile) = resolve_llm_profile(&store, &args.model)?;
    sink.log(LogRecord::new(
        LogLevel::Info,
        format!("Testing LLM profile: {selected}"),
    ));
    sink.log(LogRecord::new(
        LogLevel::Debug,
        format!(
            "Model: {} | Interface: {} | Base URL: {}",
            profile.model_name, profile.interface_format, profile.base_url
        ),
    ));

    let adapter = create_llm_adapter_from_profile(&profile)?;
    sink.log(LogRecord::new(
        LogLevel::Info,
        "Sending test prompt: Please reply 'OK'".to_string(),
    ));

    match adapter.invoke("Please reply 'OK'") {
        Ok(response) => {
            if response.trim().is_empty() {
                return Err(CliError::TestFailed(
                    "LLM test failed: empty response".to_string(),
                ));
            }
            sink.log(LogRecord::new(
                LogLevel::Info,
                "LLM profile test succeeded.".to_string(),
            ));
            sink.log(LogRecord::new(
                LogLevel::Debug,
                format!("Test reply: {response}"),
            ));
        }
        Err(err) => {
            sink.log(LogRecord::new(
                LogLevel::Error,
                format!("LLM profile test failed: {err}"),
            ));
            return Err(CliError::Model(err));
        }
    }

    if store.config().llm_profiles.contains_key(&selected) {
        store.touch_llm_interface(selected);
        store.save()?;
    }
    Ok(())
}

/// Picks the named profile, the most recent one, the first one, or a local
/// Ollama default, then applies `--model` / `--ollama-url`.
fn resolve_llm_profile(
    store: &ConfigStore,
    args: &ModelArgs,
) -> Result<(String, LlmConfig), CliError> {
    let (name, mut profile) = match normalize_preference(args.llm_interface.clone()) {
        Some(name) => {
            let profile = store
                .config()
                .get_llm_profile(&name)
                .cloned()
                .ok_or_else(|| CliError::UnknownInterface(name.clone()))?;
            (name, profile)
        }
        None => match store
            .last_llm_interface()
            .map(str::to_string)
            .or_else(|| store.config().llm_profiles.keys().next().cloned())
        {
            Some(name) => {
                let profile = store.config().llm_profiles[&name].clone();
                (name, profile)
            }
            None => (
                DEFAULT_INTERFACE_FORMAT.to_string(),
                LlmConfig::local_ollama(),
            ),
        },
    };

    if let Some(model) = normalize_preference(args.model.clone()) {
        profile.model_name = model;
    }
    if let Some(url) = normalize_preference(args.ollama_url.clone()) {
        profile.base_url = url;
    }
    if let Some(timeout) = args.timeout {
        profile.timeout = timeout;
    }
    Ok((name, profile))
}

fn normalize_preference(value: Option<String>) -> Option<String> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn print_chapter(text: &str) {
    let rule = "=".repeat(BANNER_WIDTH);
    println!("\n{rule}");
    println!("{text}");
    println!("{rule}");
}

fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

#[derive(Debug, Error)]
enum CliError {
    #[error("config error: {0}")]
    Config(#[from] story_core::ConfigError),
    #[error("missing required argument {0} (or set it in the config file)")]
    MissingArgument(&'static str),
    #[error("no LLM profile named `{0}`")]
    UnknownInterface(String),
    #[error(
        "failed to connect to the model service. Please ensure it is running at {url} and the model '{model}' is available: {source}"
    )]
    Connect {
        url: String,
        model: String,
        #[source]
        source: AdapterError,
    },
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
    #[error("LLM call failed: {0}")]
    Model(#[from] LanguageModelError),
    #[error("failed to load prompts: {0}")]
    Prompt(#[from] PromptError),
    #[error("{0}")]
    Pipeline(#[from] PipelineError),
    #[error("{0}")]
    TestFailed(String),
}

#[derive(Parser)]
#[command(
    name = "storyctl",
    version,
    about = "Rewrite a large story into a narrative and write a new chapter from key events"
)]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    /// Show debug output
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the narrative, then write the new chapter
    Write(WriteArgs),
    /// Build the narrative only
    Narrative(WriteArgs),
    /// Write the new chapter from an existing narrative file
    Chapter(ChapterArgs),
    /// Configuration helpers
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Send a test prompt through an LLM profile
    TestLlm(TestLlmArgs),
}

#[derive(Args, Clone, Debug, Default)]
struct ModelArgs {
    /// LLM profile from the config file (defaults to the most recent one)
    #[arg(long, alias = "llm_interface")]
    llm_interface: Option<String>,

    /// Model name, e.g. gemma3:27b
    #[arg(long)]
    model: Option<String>,

    /// Model service URL, e.g. http://localhost:11434
    #[arg(long, alias = "ollama_url", value_name = "URL")]
    ollama_url: Option<String>,

    /// Per-request timeout in seconds; 0 waits for the model indefinitely
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
}

#[derive(Args, Clone, Debug, Default)]
struct StoryArgs {
    /// Large text file to rewrite
    #[arg(long, value_name = "FILE")]
    story: Option<PathBuf>,

    /// Instructions file containing the key events
    #[arg(long, value_name = "FILE")]
    instructions: Option<PathBuf>,

    /// Maximum chunk size in characters
    #[arg(long, alias = "chunk_size", value_name = "CHARS")]
    chunk_size: Option<usize>,

    /// Characters shared between consecutive chunks
    #[arg(long, alias = "chunk_overlap", value_name = "CHARS")]
    chunk_overlap: Option<usize>,

    /// Narrative output file; a numeric suffix is added if it exists
    #[arg(long, alias = "save_summary", value_name = "FILE")]
    save_summary: Option<PathBuf>,

    /// Chapter output file (overwritten)
    #[arg(long, alias = "new_chapter", value_name = "FILE")]
    new_chapter: Option<PathBuf>,

    /// Target narrative length in tokens
    #[arg(long, alias = "summary_length", value_name = "TOKENS")]
    summary_length: Option<usize>,

    /// Key events per generation call. Lower means a longer chapter
    #[arg(long, alias = "key_event_chunk_size", value_name = "N")]
    key_event_chunk_size: Option<usize>,
}

impl StoryArgs {
    fn apply(&self, mut settings: StoryConfig) -> StoryConfig {
        if let Some(value) = self.chunk_size {
            settings.chunk_size = value;
        }
        if let Some(value) = self.chunk_overlap {
            settings.chunk_overlap = value;
        }
        if let Some(value) = &self.save_summary {
            settings.save_summary = value.clone();
        }
        if let Some(value) = &self.new_chapter {
            settings.new_chapter = value.clone();
        }
        if let Some(value) = self.summary_length {
            settings.summary_length = value;
        }
        if let Some(value) = self.key_event_chunk_size {
            settings.key_event_chunk_size = value;
        }
        settings
    }
}

#[derive(Args)]
struct WriteArgs {
    #[command(flatten)]
    story: StoryArgs,

    #[command(flatten)]
    model: ModelArgs,
}

#[derive(Args)]
struct ChapterArgs {
    /// Narrative file produced by `storyctl narrative`
    #[arg(long, value_name = "FILE")]
    narrative: PathBuf,

    #[command(flatten)]
    story: StoryArgs,

    #[command(flatten)]
    model: ModelArgs,
}

#[derive(Args)]
struct TestLlmArgs {
    #[command(flatten)]
    model: ModelArgs,
}
