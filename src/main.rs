use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::info;
use std::path::PathBuf;

mod config;
mod crawl;
mod database;
mod error;
mod export;
mod label;
mod telegram;

use config::Config;
use crawl::{ChatRef, CrawlOptions, Crawler};

#[derive(Parser)]
#[command(name = "misinfo-crawler", about = "Crawl Telegram chats and label misinformation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database tables (safe to run repeatedly)
    InitDb {
        /// Seed topics and misconceptions from a JSON file
        /// ({"topic name": ["misconception name", ...]})
        #[arg(long)]
        labels: Option<PathBuf>,
    },
    /// Crawl the given chats (usernames or numeric ids of known chats)
    Crawl {
        #[arg(required = true)]
        chats: Vec<ChatRef>,
        /// Stop each chat once messages get older than this day (YYYY-MM-DD)
        #[arg(long)]
        min_date: Option<NaiveDate>,
        /// Skip messages newer than the end of this day (YYYY-MM-DD)
        #[arg(long)]
        max_date: Option<NaiveDate>,
        /// Store messages without the interactive labeling prompt
        #[arg(long)]
        no_label: bool,
        /// Only surface messages containing at least one of these keywords
        #[arg(long, num_args = 1..)]
        keywords: Vec<String>,
        /// Start fresh even if a matching unfinished crawl exists
        #[arg(long)]
        no_resume: bool,
    },
    /// Interactively add a topic
    AddTopic,
    /// Interactively add a misconception
    AddMisconception,
    /// Re-run the labeling prompt for a stored message
    Relabel { hash: String },
    /// Export labeled messages as JSONL training data plus misinfo.json
    ExportTraining {
        /// Drop messages longer than this many characters
        #[arg(long, default_value_t = 10_000)]
        max_length: usize,
        /// Output file; misinfo.json is written next to it
        #[arg(long, default_value = "data/export/messages.jsonl")]
        out: PathBuf,
    },
    /// Export topic and misconception tables with their ids
    ExportLabels {
        #[arg(long, default_value = "data/export/labels.json")]
        out: PathBuf,
    },
    /// Import topic and misconception tables exported elsewhere
    ImportLabels { file: PathBuf },
    /// Print stored chats with message and label counts
    Report,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv().ok();
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let mut conn = database::open(&config.db_path)?;

    match cli.command {
        Command::InitDb { labels } => {
            info!("database initialized at {}", config.db_path);
            if let Some(path) = labels {
                let (topics, misconceptions) = export::seed_labels(&conn, &path)?;
                info!(
                    "seeded {} topics and {} misconceptions from {}",
                    topics,
                    misconceptions,
                    path.display()
                );
            }
        }
        Command::Crawl {
            chats,
            min_date,
            max_date,
            no_label,
            keywords,
            no_resume,
        } => {
            let (api_id, api_hash) = config.telegram_credentials()?;
            let client = telegram::connect(api_id, api_hash, &config.session_file).await?;
            info!("Telegram client connected and authorized.");
            let mut crawler = Crawler {
                client: &client,
                conn: &mut conn,
                store: crawl::default_store(),
                hash_size: config.hash_size,
            };
            let opts = CrawlOptions {
                min_date: min_date.map(crawl::day_start),
                max_date: max_date.map(crawl::day_end),
                no_labeling: no_label,
                keywords,
                no_resume,
            };
            crawler.run(&chats, opts).await?;
        }
        Command::AddTopic => {
            label::add_topic_interactive(&conn)?;
        }
        Command::AddMisconception => {
            label::add_misconception_interactive(&conn)?;
        }
        Command::Relabel { hash } => {
            let record = database::get_message(&conn, &hash)?
                .with_context(|| format!("no stored message with hash {}", hash))?;
            label::handle_message(&mut conn, &record)?;
        }
        Command::ExportTraining { max_length, out } => {
            if let Some(parent) = out.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = std::fs::File::create(&out)?;
            let written = export::write_training_jsonl(&conn, max_length, file)?;
            info!("wrote {} rows to {}", written, out.display());

            let misinfo_path = out.with_file_name("misinfo.json");
            let misinfo = export::misinfo_json(&conn)?;
            std::fs::write(&misinfo_path, serde_json::to_string_pretty(&misinfo)?)?;
            info!("wrote misconception index to {}", misinfo_path.display());
        }
        Command::ExportLabels { out } => {
            if let Some(parent) = out.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let dump = export::export_labels(&conn)?;
            if dump.topics.is_empty() {
                bail!("there are no topics to export");
            }
            std::fs::write(&out, serde_json::to_string_pretty(&dump)?)?;
            info!(
                "exported {} topics and {} misconceptions to {}",
                dump.topics.len(),
                dump.misconceptions.len(),
                out.display()
            );
        }
        Command::ImportLabels { file } => {
            let dump: export::LabelDump =
                serde_json::from_str(&std::fs::read_to_string(&file)?)?;
            let (topics, misconceptions) = export::import_labels(&mut conn, &dump)?;
            info!(
                "imported {} topics and {} misconceptions",
                topics, misconceptions
            );
        }
        Command::Report => {
            database::print_report(&conn)?;
        }
    }

    Ok(())
}
