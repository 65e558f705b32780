use std::process::ExitCode;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use narrate_core::{
    ApiClient, ClientConfig, PlaybackQueue, SettingsPatch, Summary, SummaryService,
    ViewSubscriber,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "narrate", version, about = "Narrate News command line client")]
struct Cli {
    /// Backend base URL, overrides the configuration file
    #[arg(long, global = true)]
    api: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Summaries published on a day, newest first (default: today)
    Summaries {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Follow a day's summaries and print the view on every refresh
    Watch {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Extracted articles, optionally filtered by day
    Articles {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Voices offered by a TTS provider
    Voices { provider: String },
    /// Show or change the server settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
    /// Start a processing pass on the server
    Process,
    /// Show the effective client configuration or write it to disk
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    Show,
    /// Persist the effective configuration, `--api` included
    Save,
}

#[derive(Debug, Subcommand)]
enum SettingsAction {
    Show,
    Set(SetArgs),
}

#[derive(Debug, Args)]
struct SetArgs {
    #[arg(long)]
    provider: Option<String>,
    #[arg(long)]
    voice: Option<String>,
    #[arg(long)]
    neet_model: Option<String>,
    #[arg(long)]
    summarizer_model: Option<String>,
    /// Replaces the feed list; repeat for several feeds
    #[arg(long = "feed")]
    feeds: Vec<String>,
    #[arg(long)]
    auto_play: Option<bool>,
    /// Seconds between processing passes
    #[arg(long)]
    interval: Option<u64>,
}

impl From<SetArgs> for SettingsPatch {
    fn from(args: SetArgs) -> Self {
        SettingsPatch {
            tts_provider: args.provider,
            voice: args.voice,
            neet_model: args.neet_model,
            summarizer_model: args.summarizer_model,
            rss_feeds: (!args.feeds.is_empty()).then_some(args.feeds),
            auto_play: args.auto_play,
            process_interval: args.interval,
        }
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let mut config = ClientConfig::load();
    if let Some(api) = cli.api.clone() {
        config.api.audio_base_url = api.clone();
        config.api.base_url = api;
    }

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(command: Command, config: ClientConfig) -> CliResult {
    let client = ApiClient::from_config(&config.api)?;
    let today = Utc::now().with_timezone(&config.view.offset()).date_naive();

    match command {
        Command::Summaries { date } => {
            let service = SummaryService::new(Arc::new(client), &config);
            let date = date.unwrap_or(today);
            print_view(date, &service.current_view(date).await?);
        }
        Command::Watch { date } => {
            let service = SummaryService::new(Arc::new(client), &config);
            let date = date.unwrap_or(today);
            let mut subscriber = ViewSubscriber::new(service, |date, queue| {
                print_view(date, &queue);
            });
            subscriber.select_date(date);
            info!(%date, "watching summaries, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            subscriber.unsubscribe();
        }
        Command::Articles { date } => {
            let articles = client.articles(date).await?;
            for article in articles.values() {
                let published = article
                    .publish_date
                    .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "undated".into());
                println!("{published}  {}  <{}>", article.title, article.url);
            }
        }
        Command::Voices { provider } => {
            for voice in client.voices(&provider).await? {
                println!("{}\t{}", voice.id, voice.name);
            }
        }
        Command::Settings { action } => match action.unwrap_or(SettingsAction::Show) {
            SettingsAction::Show => print_json(&client.settings().await?)?,
            SettingsAction::Set(args) => {
                let patch = SettingsPatch::from(args);
                if patch.is_empty() {
                    return Err("nothing to change".into());
                }
                let current = client.settings().await?;
                // the server's answer is authoritative
                let stored = client.update_settings(&patch.apply(&current)).await?;
                print_json(&stored)?;
            }
        },
        Command::Process => {
            client.start_processing().await?;
            println!("processing started");
        }
        Command::Config { action } => match action.unwrap_or(ConfigAction::Show) {
            ConfigAction::Show => print_json(&config)?,
            ConfigAction::Save => {
                config.save()?;
                println!("saved to {}", ClientConfig::config_file_path()?.display());
            }
        },
    }
    Ok(())
}

fn print_view(date: NaiveDate, queue: &PlaybackQueue) {
    println!("== {date} ({} summaries)", queue.len());
    for (index, summary) in queue.iter().enumerate() {
        print_summary(index, summary);
    }
}

fn print_summary(index: usize, summary: &Summary) {
    let time = summary
        .article
        .publish_date
        .map(|d| d.format("%H:%M").to_string())
        .unwrap_or_default();
    println!("{index:>3}. [{time}] {}", summary.article.title);
    println!("     {}", summary.audio_path);
}

fn print_json<T: serde::Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
