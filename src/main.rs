use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use rank_tracker::config::{Config, ConfigOverrides};
use rank_tracker::history::summarize_history;
use rank_tracker::keywords::{parse_keyword_lines, Device, KeywordBatch, SearchEngine};
use rank_tracker::output::csv::{history_to_csv, keywords_to_csv};
use rank_tracker::output::json::{render_json, render_json_line};
use rank_tracker::output::table::{
    render_history_table, render_keyword_page, render_quota_table, render_run_report_table,
};
use rank_tracker::providers::ProviderKind;
use rank_tracker::scheduler::{RunReport, Scheduler};
use rank_tracker::server::run_server;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Debug, Parser)]
#[command(
    name = "rank-tracker",
    about = "Quota-aware keyword rank tracking scheduler"
)]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long)]
    db: Option<String>,
    #[arg(short, long)]
    provider: Option<ProviderKind>,
    #[arg(long = "daily-limit")]
    daily_limit: Option<u32>,
    #[arg(long = "batch-size")]
    batch_size: Option<u32>,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Add keywords, one per line, from a file or stdin.
    Add {
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long = "target-url")]
        target_url: Option<String>,
        #[arg(long, default_value_t = SearchEngine::GoogleCom)]
        engine: SearchEngine,
        #[arg(long, default_value = "")]
        location: String,
        #[arg(long, default_value_t = Device::Desktop)]
        device: Device,
    },
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long = "per-page", default_value_t = 100)]
        per_page: u32,
    },
    History {
        id: i64,
        #[arg(long, default_value_t = 30)]
        limit: usize,
    },
    Pause {
        id: i64,
    },
    Resume {
        id: i64,
    },
    Delete {
        id: i64,
    },
    /// Run the scheduler once.
    Run,
    /// Run the scheduler on a fixed interval.
    Watch {
        #[arg(long)]
        interval_secs: Option<u64>,
        #[arg(long)]
        iterations: Option<u32>,
    },
    Quota,
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 3001)]
        port: u16,
    },
    Config {
        #[arg(long)]
        init: bool,
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(Some(&config_path))?;
    config.apply_overrides(ConfigOverrides {
        provider: cli.provider,
        api_key: None,
        db_path: cli.db.clone(),
        daily_limit: cli.daily_limit,
        batch_size: cli.batch_size,
    });

    if let Commands::Config { init, show } = &cli.command {
        return handle_config_command(*init, *show, &config, &config_path);
    }
    if let Commands::Serve { host, port } = &cli.command {
        let bind = format!("{host}:{port}");
        let addr: SocketAddr = bind
            .parse()
            .map_err(|e| anyhow!("invalid bind address {bind}: {e}"))?;
        return run_server(config, addr).await;
    }

    let scheduler = Scheduler::open(&config)?;

    match &cli.command {
        Commands::Add {
            file,
            target_url,
            engine,
            location,
            device,
        } => {
            let raw = read_keyword_input(file.as_deref())?;
            let lines = parse_keyword_lines(&raw);
            if lines.is_empty() {
                return Err(anyhow!("no keywords found in input"));
            }
            let batch = KeywordBatch {
                target_url: target_url.clone(),
                search_engine: *engine,
                location: location.clone(),
                device: *device,
            };
            let inserted = scheduler
                .keywords()
                .add_keywords(&lines, &batch, Utc::now())?;
            println!("Added {inserted} keywords");
        }
        Commands::List { page, per_page } => {
            let listing = scheduler.keywords().list_page(*page, *per_page)?;
            match cli.output {
                OutputFormat::Table => println!("{}", render_keyword_page(&listing)),
                OutputFormat::Json => println!("{}", render_json(&listing)?),
                OutputFormat::Csv => print!("{}", keywords_to_csv(&listing.keywords)?),
            }
        }
        Commands::History { id, limit } => {
            let keyword = scheduler
                .keywords()
                .get(*id)?
                .ok_or_else(|| anyhow!("keyword {id} not found"))?;
            let records = scheduler.history().for_keyword(*id, (*limit).max(1))?;
            match cli.output {
                OutputFormat::Table => {
                    println!("{} (#{})", keyword.keyword, keyword.id);
                    println!("{}", render_history_table(&records));
                    println!("{}", summarize_history(&records));
                }
                OutputFormat::Json => println!("{}", render_json(&records)?),
                OutputFormat::Csv => print!("{}", history_to_csv(&records)?),
            }
        }
        Commands::Pause { id } => set_active(&scheduler, *id, false)?,
        Commands::Resume { id } => set_active(&scheduler, *id, true)?,
        Commands::Delete { id } => {
            if !scheduler.keywords().delete(*id)? {
                return Err(anyhow!("keyword {id} not found"));
            }
            println!("Deleted keyword {id} and its history");
        }
        Commands::Run => {
            let report = scheduler.run().await?;
            print_run_report(&report, cli.output)?;
        }
        Commands::Watch {
            interval_secs,
            iterations,
        } => {
            let interval_secs = interval_secs.unwrap_or(config.scheduler.interval_secs);
            run_watch_loop(&scheduler, interval_secs, *iterations, cli.output).await?;
        }
        Commands::Quota => {
            let status = scheduler.quota().status(scheduler.settings(), Utc::now());
            match cli.output {
                OutputFormat::Table => println!("{}", render_quota_table(&status)),
                OutputFormat::Json => println!("{}", render_json(&status)?),
                OutputFormat::Csv => {
                    warn!("CSV output for quota not implemented, using JSON");
                    println!("{}", render_json(&status)?);
                }
            }
        }
        Commands::Config { .. } | Commands::Serve { .. } => {
            unreachable!("config and serve handled before dispatch")
        }
    }

    Ok(())
}

fn handle_config_command(init: bool, show: bool, config: &Config, config_path: &Path) -> Result<()> {
    if init {
        Config::write_template(config_path)?;
        println!("Wrote config template to {}", config_path.display());
    }
    if show || !init {
        println!("{}", render_json(&config.redacted())?);
    }
    Ok(())
}

fn read_keyword_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed reading keywords from {}", path.display())),
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("failed reading keywords from stdin")?;
            Ok(raw)
        }
    }
}

fn set_active(scheduler: &Scheduler, id: i64, active: bool) -> Result<()> {
    if !scheduler.keywords().set_active(id, active)? {
        return Err(anyhow!("keyword {id} not found"));
    }
    let state = if active { "resumed" } else { "paused" };
    println!("Keyword {id} {state}");
    Ok(())
}

async fn run_watch_loop(
    scheduler: &Scheduler,
    interval_secs: u64,
    iterations: Option<u32>,
    format: OutputFormat,
) -> Result<()> {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut completed = 0u32;
    loop {
        interval.tick().await;
        info!("watch iteration {}", completed + 1);
        match scheduler.run().await {
            Ok(report) => {
                if matches!(format, OutputFormat::Json) {
                    println!("{}", render_json_line(&report)?);
                } else {
                    print_run_report(&report, format)?;
                }
            }
            Err(err) => warn!("scheduler run failed: {err:#}"),
        }
        completed += 1;
        if iterations.is_some_and(|limit| completed >= limit.max(1)) {
            break;
        }
    }
    Ok(())
}

fn print_run_report(report: &RunReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", render_run_report_table(report)),
        OutputFormat::Json => println!("{}", render_json(report)?),
        OutputFormat::Csv => {
            warn!("CSV output for run reports not implemented, using JSON");
            println!("{}", render_json(report)?);
        }
    }
    Ok(())
}
