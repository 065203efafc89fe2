#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, BufRead, Read};
use std::path::{Path, PathBuf};
use tracing::{Level as TraceLevel, info};
use tracing_subscriber::FmtSubscriber;
use url::Url;

use timeflip::config::{ConfigStore, JsonFileStore};
use timeflip::constants::config::LOG_LEVEL_ENV;
use timeflip::content_script::ContentScript;
use timeflip::convert::ConversionMode;
use timeflip::dom::Document;
use timeflip::ipc::NoActiveTab;
use timeflip::settings_panel::SettingsPanel;

#[derive(Parser)]
#[command(name = "timeflip")]
#[command(about = "Rewrite times of day between 24-hour and 12-hour notation")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert text given as arguments, or stdin line by line
    Convert {
        /// Conversion direction
        #[arg(short, long, default_value = "24to12")]
        mode: ConversionMode,

        /// Text to convert
        text: Vec<String>,
    },

    /// Show or change the stored settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },

    /// Run the content script over a page of text and print it converted, then reverted
    Page {
        /// Page address; its hostname decides whether conversion is active
        #[arg(long)]
        url: Url,

        /// Page text, one paragraph per line (stdin if omitted)
        file: Option<PathBuf>,
    },
}

#[derive(Subcommand, Clone)]
enum SettingsAction {
    /// Print the stored settings
    Show,

    /// Select the conversion direction
    Mode { mode: ConversionMode },

    /// Switch conversion on or off for every site
    Global { state: Toggle },

    /// Switch conversion on or off for one site
    Site { host: String, state: Toggle },
}

#[derive(ValueEnum, Clone, Copy)]
enum Toggle {
    On,
    Off,
}

impl From<Toggle> for bool {
    fn from(toggle: Toggle) -> Self {
        matches!(toggle, Toggle::On)
    }
}

fn init_logging() -> Result<()> {
    // Parse log level from environment variable
    let log_level = match std::env::var(LOG_LEVEL_ENV)
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    // stdout carries command output
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to install log subscriber")
}

fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => fs::read_to_string(path).context(format!("Failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            io::stdin().read_to_string(&mut text).context("Failed to read stdin")?;
            Ok(text)
        }
    }
}

fn convert(mode: ConversionMode, text: &[String]) -> Result<()> {
    if !text.is_empty() {
        println!("{}", mode.convert(&text.join(" ")));
        return Ok(());
    }
    for line in io::stdin().lock().lines() {
        let line = line.context("Failed to read stdin")?;
        println!("{}", mode.convert(&line));
    }
    Ok(())
}

async fn settings(store: JsonFileStore, action: SettingsAction) -> Result<()> {
    let path = store.path().to_path_buf();
    let mut panel = SettingsPanel::load(store, NoActiveTab)?;

    let status = match action {
        SettingsAction::Show => None,
        SettingsAction::Mode { mode } => panel.select_mode(mode).await.cloned(),
        SettingsAction::Global { state } => panel.set_globally_enabled(state.into()).await.cloned(),
        SettingsAction::Site { host, state } => panel.set_site_enabled(&host, state.into()).await.cloned(),
    };

    if let Some(status) = &status {
        if status.is_error() {
            anyhow::bail!("{} ({})", status.text, path.display());
        }
        eprintln!("{}", status.text);
    }
    let json = serde_json::to_string_pretty(panel.settings()).context("Failed to serialize settings to JSON")?;
    println!("{json}");
    Ok(())
}

fn print_page(document: &Document) {
    let Some(body) = document.body() else {
        return;
    };
    for &paragraph in document.children(body) {
        println!("{}", document.text_content(paragraph));
    }
}

fn page(store: &impl ConfigStore, url: Url, file: Option<&Path>) -> Result<()> {
    let text = read_input(file)?;
    let document = Document::from_text(url, &text)?;

    let mut script = ContentScript::start(document, store);
    let stats = script.engine().stats();
    info!(passes = stats.passes, conversions = stats.conversions, "initial pass done");
    print_page(script.document());

    println!("---");
    let restored = script.revert();
    info!(restored, "reverted page");
    print_page(script.document());
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    let store = match cli.config {
        Some(path) => JsonFileStore::new(path),
        None => JsonFileStore::open_default()?,
    };
    info!(path = %store.path().display(), "using settings file");

    match cli.command {
        Commands::Convert { mode, text } => convert(mode, &text),
        Commands::Settings { action } => settings(store, action.unwrap_or(SettingsAction::Show)).await,
        Commands::Page { url, file } => page(&store, url, file.as_deref()),
    }
}
