use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use feedkeeper::config::Config;
use feedkeeper::feed::HttpFeedFetcher;
use feedkeeper::storage::{Article, Database, DatabaseError, Settings, Source};
use feedkeeper::sync::{Scheduler, SyncEngine};

/// Get the config directory path (~/.config/feedkeeper/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedkeeper"))
}

/// Create the config directory with user-only permissions.
fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        if let Err(e) = std::fs::set_permissions(config_dir, perms) {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(
    name = "feedkeeper",
    version,
    about = "Keep RSS/Atom feeds synced into a local SQLite store"
)]
struct Args {
    /// Config file (default: ~/.config/feedkeeper/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file, overriding the config file
    #[arg(long, global = true, value_name = "FILE")]
    database: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a feed source and fetch it immediately
    Add {
        name: String,
        url: String,
        #[arg(long)]
        category: Option<String>,
    },
    /// Edit a source; changing the URL re-fetches it
    Edit {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        url: Option<String>,
        /// New category; pass an empty string to clear it
        #[arg(long)]
        category: Option<String>,
    },
    /// Remove a source and all of its articles
    Remove { id: i64 },
    /// List sources
    List,
    /// List a source's articles, newest first
    Articles { source_id: i64 },
    /// List unread articles across all sources
    Unread,
    /// List favorite articles across all sources
    Favorites,
    /// Mark an article as read
    Read { article_id: i64 },
    /// Toggle an article's favorite flag
    Favorite { article_id: i64 },
    /// Mark every article as read
    MarkAllRead,
    /// Sync all sources (or one) now
    Refresh {
        #[arg(long, value_name = "ID")]
        source: Option<i64>,
    },
    /// Import sources from an OPML file
    Import { file: PathBuf },
    /// Export sources to an OPML file
    Export { file: PathBuf },
    /// Show or change refresh interval and retention cap
    Settings {
        /// Refresh interval in minutes
        #[arg(long)]
        interval: Option<i64>,
        /// Maximum articles kept per source
        #[arg(long)]
        retention: Option<i64>,
    },
    /// Sync on the configured interval and print new articles until Ctrl-C.
    /// Interval changes made with `settings` are picked up within a minute.
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = match args.database.clone() {
        Some(path) => path,
        None => {
            ensure_config_dir(&config_dir)?;
            config.database_path_in(&config_dir)
        }
    };
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;

    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of feedkeeper appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let fetcher =
        HttpFeedFetcher::new(config.fetch_options()).context("Failed to create HTTP client")?;
    let engine = Arc::new(
        SyncEngine::new(db, Arc::new(fetcher))
            .with_fetch_timeout(config.sync_fetch_timeout())
            .with_notification_capacity(config.notification_capacity),
    );

    let out = Output { json: args.json };
    run_command(args.command, engine, &out).await
}

async fn run_command(command: Command, engine: Arc<SyncEngine>, out: &Output) -> Result<()> {
    match command {
        Command::Add {
            name,
            url,
            category,
        } => {
            let source = engine.add_source(&name, &url, category.as_deref()).await?;
            out.source(&source)?;
        }
        Command::Edit {
            id,
            name,
            url,
            category,
        } => {
            let mut source = engine
                .source(id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Source {} not found", id))?;
            if let Some(name) = name {
                source.name = name;
            }
            if let Some(url) = url {
                source.url = url;
            }
            if let Some(category) = category {
                source.category = Some(category);
            }
            let source = engine.update_source(&source).await?;
            out.source(&source)?;
        }
        Command::Remove { id } => {
            if !engine.delete_source(id).await? {
                anyhow::bail!("Source {} not found", id);
            }
            out.message(&format!("Removed source {}", id));
        }
        Command::List => out.sources(&engine.sources().await?)?,
        Command::Articles { source_id } => {
            out.articles(&engine.articles_for_source(source_id).await?)?
        }
        Command::Unread => out.articles(&engine.unread_articles().await?)?,
        Command::Favorites => out.articles(&engine.favorite_articles().await?)?,
        Command::Read { article_id } => {
            if !engine.mark_read(article_id).await? {
                anyhow::bail!("Article {} not found", article_id);
            }
            out.message(&format!("Marked article {} as read", article_id));
        }
        Command::Favorite { article_id } => match engine.toggle_favorite(article_id).await? {
            Some(true) => out.message(&format!("Article {} added to favorites", article_id)),
            Some(false) => out.message(&format!("Article {} removed from favorites", article_id)),
            None => anyhow::bail!("Article {} not found", article_id),
        },
        Command::MarkAllRead => {
            let count = engine.mark_all_read().await?;
            out.message(&format!("Marked {} articles as read", count));
        }
        Command::Refresh { source: Some(id) } => {
            let articles = engine.sync_source(id).await?;
            if let Some(source) = engine.source(id).await? {
                if let Some(error) = &source.last_error {
                    eprintln!("Warning: {}: {}", source.name, error);
                }
            }
            out.articles(&articles)?;
        }
        Command::Refresh { source: None } => {
            let articles = engine.sync_all().await?;
            report_failed_sources(&engine).await?;
            out.articles(&articles)?;
        }
        Command::Import { file } => {
            let report = engine
                .import_opml_file(&file)
                .await
                .with_context(|| format!("Failed to import {}", file.display()))?;
            out.message(&format!(
                "Imported {} feeds ({} skipped)",
                report.imported, report.failed
            ));
        }
        Command::Export { file } => {
            let count = engine
                .export_opml_to_file(&file)
                .await
                .with_context(|| format!("Failed to export {}", file.display()))?;
            out.message(&format!("Exported {} feeds to {}", count, file.display()));
        }
        Command::Settings {
            interval,
            retention,
        } => {
            let mut settings = engine.settings().await?;
            if interval.is_some() || retention.is_some() {
                if let Some(minutes) = interval {
                    settings.refresh_interval_minutes = minutes;
                }
                if let Some(cap) = retention {
                    settings.max_articles_per_source = cap;
                }
                settings = engine.update_settings(&settings).await?;
            }
            out.settings(&settings)?;
        }
        Command::Run => run_daemon(engine, out).await?,
    }
    Ok(())
}

async fn report_failed_sources(engine: &SyncEngine) -> Result<()> {
    for source in engine.sources().await? {
        if let Some(error) = &source.last_error {
            eprintln!("Warning: {}: {}", source.name, error);
        }
    }
    Ok(())
}

/// How often `run` re-reads the stored refresh interval.
const SETTINGS_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// Initial pass, then scheduled passes until Ctrl-C.
async fn run_daemon(engine: Arc<SyncEngine>, out: &Output) -> Result<()> {
    let mut events = engine.subscribe();

    let initial = engine.sync_all().await?;
    tracing::info!(new = initial.len(), "Initial sync complete");
    out.articles(&initial)?;

    let scheduler = Scheduler::start(engine.clone()).await?;
    println!(
        "Syncing every {} minutes. Press Ctrl-C to stop.",
        scheduler.period().as_secs() / 60
    );

    // Settings may be changed by another feedkeeper process
    let mut settings_poll = tokio::time::interval(SETTINGS_POLL_INTERVAL);
    settings_poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = settings_poll.tick() => {
                if let Err(e) = scheduler.reload_period().await {
                    tracing::warn!(error = %e, "Failed to reload refresh interval");
                }
            }
            event = events.recv() => match event {
                Ok(event) => out.articles(&event.articles)?,
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed = missed, "Notification receiver lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    scheduler.shutdown().await;
    Ok(())
}

// ============================================================================
// Output
// ============================================================================

struct Output {
    json: bool,
}

impl Output {
    fn print_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    fn message(&self, text: &str) {
        if self.json {
            println!("{}", serde_json::json!({ "message": text }));
        } else {
            println!("{}", text);
        }
    }

    fn source(&self, source: &Source) -> Result<()> {
        self.sources(std::slice::from_ref(source))
    }

    fn sources(&self, sources: &[Source]) -> Result<()> {
        if self.json {
            return self.print_json(sources);
        }
        for s in sources {
            let synced = s.last_synced.map(format_time).unwrap_or_else(|| "never".into());
            println!(
                "{:>4}  {:<30}  {:<12}  {}  (synced {})",
                s.id,
                s.name,
                s.category.as_deref().unwrap_or("-"),
                s.url,
                synced
            );
            if let Some(error) = &s.last_error {
                println!("      last error: {}", error);
            }
        }
        Ok(())
    }

    fn articles(&self, articles: &[Article]) -> Result<()> {
        if self.json {
            return self.print_json(articles);
        }
        for a in articles {
            let flags = format!(
                "{}{}",
                if a.read { ' ' } else { '*' },
                if a.favorite { '♥' } else { ' ' }
            );
            println!(
                "{:>6} {} {}  {}  {}",
                a.id,
                flags,
                format_time(a.published),
                a.title,
                a.link
            );
        }
        Ok(())
    }

    fn settings(&self, settings: &Settings) -> Result<()> {
        if self.json {
            return self.print_json(settings);
        }
        println!("refresh interval: {} minutes", settings.refresh_interval_minutes);
        println!("retention cap:    {} articles per source", settings.max_articles_per_source);
        Ok(())
    }
}

fn format_time(unix_secs: i64) -> String {
    chrono::DateTime::from_timestamp(unix_secs, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| unix_secs.to_string())
}
