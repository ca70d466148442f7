// docs-to-voice - Convert text into speech with sentence timelines

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docs_to_voice::VoiceError;
use docs_to_voice::config::{
    Config, Setting, SettingSources, validate_max_chars, validate_rate, validate_speech_rate,
};
use docs_to_voice::pipeline::{self, Backend, RunRequest};
use docs_to_voice::tts::macos_say::MacOsSayBackend;
use docs_to_voice::tts::model_studio::ModelStudioClient;
use docs_to_voice::tts::{Mode, TtsBackend, TtsOptions};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "docs-to-voice")]
#[command(
    about = "Convert text into speech and generate timeline JSON/SRT files",
    long_about = None
)]
#[command(version)]
struct Args {
    /// Root project directory; audio goes to DIR/audio/<project-name>/
    #[arg(long)]
    project_dir: Option<PathBuf>,

    /// Raw text input
    #[arg(long, conflicts_with = "input_file")]
    text: Option<String>,

    /// Path to input text file
    #[arg(long)]
    input_file: Option<PathBuf>,

    /// Folder name under DIR/audio/ (default: project directory name)
    #[arg(long)]
    project_name: Option<String>,

    /// Output filename (default: voice-YYYYMMDD-HHMMSS)
    #[arg(long)]
    output_name: Option<String>,

    /// Path to .env file with settings
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// TTS mode: say|api
    #[arg(long)]
    mode: Option<String>,

    /// macOS say voice
    #[arg(long)]
    voice: Option<String>,

    /// macOS say rate (words per minute)
    #[arg(long)]
    rate: Option<String>,

    /// Speech rate multiplier applied after synthesis (e.g. 1.2 faster, 0.8 slower)
    #[arg(long)]
    speech_rate: Option<String>,

    /// Model Studio TTS endpoint
    #[arg(long)]
    api_endpoint: Option<String>,

    /// Model Studio model name
    #[arg(long)]
    api_model: Option<String>,

    /// Model Studio voice
    #[arg(long)]
    api_voice: Option<String>,

    /// Max chars per TTS request before auto chunking (0 disables chunking)
    #[arg(long)]
    max_chars: Option<String>,

    /// Disable punctuation pause enhancement in say mode
    #[arg(long)]
    no_auto_prosody: bool,

    /// Overwrite output if it already exists
    #[arg(long)]
    force: bool,

    /// List available say voices
    #[arg(long)]
    list_voices: bool,

    /// Enable debug output
    #[arg(short, long, default_value_t = false)]
    debug: bool,

    /// Configuration subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Set a default (mode, voice, api_endpoint, api_model, api_voice, max_chars, speech_rate)
    Set {
        /// Config key
        key: String,
        /// New value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    // Handle config subcommands
    if let Some(Commands::Config { action }) = &args.command {
        return handle_config_command(action);
    }

    if args.list_voices {
        return list_voices(&MacOsSayBackend::new()).await;
    }

    let config = Config::load().context("Failed to load configuration")?;
    let weights = config.timing.clone();
    let sources = SettingSources::gather(&args.env_file, config)?;

    let mode: Mode = sources
        .resolve(args.mode.as_deref(), Setting::Mode)
        .unwrap_or_default()
        .parse()?;
    let voice = sources.resolve(args.voice.as_deref(), Setting::Voice);
    let api_endpoint = sources
        .resolve(args.api_endpoint.as_deref(), Setting::ApiEndpoint)
        .unwrap_or_default();
    let api_model = sources
        .resolve(args.api_model.as_deref(), Setting::ApiModel)
        .unwrap_or_default();
    let api_voice = sources
        .resolve(args.api_voice.as_deref(), Setting::ApiVoice)
        .unwrap_or_default();
    let api_key = sources.resolve(None, Setting::ApiKey);

    let max_chars = validate_max_chars(
        &sources
            .resolve(args.max_chars.as_deref(), Setting::MaxChars)
            .unwrap_or_default(),
    )?;
    let rate = match args.rate.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        Some(raw) => Some(validate_rate(raw)?),
        None => None,
    };
    let speech_rate = validate_speech_rate(
        &sources
            .resolve(args.speech_rate.as_deref(), Setting::SpeechRate)
            .unwrap_or_default(),
    )?;

    log::debug!("Mode: {}", mode);
    log::debug!("Max chars: {:?}", max_chars);
    log::debug!("Speech rate: {:?}", speech_rate);

    if mode == Mode::Api && api_key.is_none() {
        anyhow::bail!("DASHSCOPE_API_KEY is required for api mode.");
    }

    let project_dir = args
        .project_dir
        .clone()
        .context("--project-dir is required")?;
    let source_text = read_input_text(args.text.as_deref(), args.input_file.as_deref())?;

    let request = RunRequest {
        source_text,
        project_dir,
        project_name: args.project_name.clone(),
        output_name: args.output_name.clone(),
        max_chars,
        speech_rate,
        auto_prosody: !args.no_auto_prosody,
        force: args.force,
        say_options: TtsOptions { rate, voice },
        weights,
    };

    let say_engine;
    let api_client;
    let backend = match mode {
        Mode::Say => {
            say_engine = MacOsSayBackend::new();
            Backend::Say(&say_engine)
        }
        Mode::Api => {
            api_client = ModelStudioClient::new(
                &api_endpoint,
                api_key.as_deref().unwrap_or_default(),
                &api_model,
                &api_voice,
            );
            Backend::Api(&api_client)
        }
    };

    let progress = if args.debug {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} [{bar:30}] {pos}/{len} chunks")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar
    };

    // Dropping the pipeline future on Ctrl-C removes its scratch directory
    let outcome = tokio::select! {
        result = pipeline::run(&request, backend, &progress) => result,
        _ = tokio::signal::ctrl_c() => Err(VoiceError::Interrupted),
    };
    progress.finish_and_clear();

    let output = outcome?;
    println!("{}", output.audio_path.display());
    Ok(())
}

/// Text from `--input-file` (relative to the working directory) or `--text`
fn read_input_text(text: Option<&str>, input_file: Option<&Path>) -> Result<String> {
    match (input_file, text) {
        (Some(path), _) => {
            let path = std::path::absolute(path)?;
            if !path.is_file() {
                anyhow::bail!("Input file not found: {}", path.display());
            }
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        (None, Some(text)) => Ok(text.to_string()),
        (None, None) => anyhow::bail!("Either --text or --input-file is required"),
    }
}

fn handle_config_command(action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = Config::load()?;
            println!("Configuration file: {:?}", Config::config_path()?);
            println!();
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(key, value)?;
            config.save()?;
            println!("{} set to: {}", key, value);
        }
    }
    Ok(())
}

async fn list_voices(backend: &dyn TtsBackend) -> Result<()> {
    let voices = backend.list_voices().await?;

    println!("Available voices for {} backend:", backend.name());
    println!();

    for voice in voices {
        if let Some(lang) = &voice.language {
            println!("  {} ({})", voice.name, lang);
        } else {
            println!("  {}", voice.name);
        }
    }

    Ok(())
}
