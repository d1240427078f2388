use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

use feedloom::config::Config;
use feedloom::feed::FeedClient;
use feedloom::ingest::{Ingestor, Scheduler, Subscriptions};
use feedloom::storage::{Database, DatabaseError};

/// Get the config directory path (~/.config/feedloom/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedloom"))
}

#[derive(Parser, Debug)]
#[command(name = "feedloom", version, about = "RSS/Atom feed ingestion")]
struct Args {
    /// Config file (default: ~/.config/feedloom/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll all feeds on the configured interval until Ctrl-C
    Run,
    /// Run a single update pass and print the report
    Poll,
    /// Subscribe to a feed URL, fetching it if new
    Subscribe {
        url: String,
        /// Also record a subscription for this user
        #[arg(long)]
        user: Option<String>,
    },
    /// Remove a user's subscription to a feed
    Unsubscribe {
        feed_id: Uuid,
        #[arg(long)]
        user: String,
    },
    /// List feed URLs found on a web page
    Discover { page_url: String },
    /// List known feeds
    Feeds,
    /// List a feed's articles, most recent first
    Articles {
        feed_id: Uuid,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Check that every index entry agrees with its record
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    // SEC-007: Set directory permissions on Unix (user-only access)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o700)) {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    let config_path = args.config.clone().unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = config.database_path_in(&config_dir);
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: Another feedloom process appears to be using the database. Please stop it and try again.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let client = FeedClient::new(config.client_options()).context("Failed to build HTTP client")?;
    let ingestor = Ingestor::new(db.clone(), client).with_inter_feed_delay(config.inter_feed_delay());

    let result = run_command(args.command, &config, &db, ingestor).await;
    db.close().await;
    result
}

async fn run_command(command: Command, config: &Config, db: &Database, ingestor: Ingestor) -> Result<()> {
    match command {
        Command::Run => {
            let scheduler = Scheduler::new(ingestor, config.poll_interval());
            scheduler.start();
            tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
            println!("Shutting down, waiting for the current pass to finish...");
            scheduler.shutdown().await;
        }
        Command::Poll => {
            let report = ingestor.run_pass().await.context("Failed to list feeds")?;
            println!(
                "{} feeds, {} updated, {} new articles",
                report.feeds, report.updated, report.new_articles
            );
            for (feed_id, error) in &report.failed {
                println!("  failed {feed_id}: {error}");
            }
        }
        Command::Subscribe { url, user } => {
            let subscriptions = Subscriptions::new(ingestor);
            match user {
                Some(user) => {
                    let (feed, _) = subscriptions.subscribe_user(&user, &url).await?;
                    println!("{user} subscribed to {} ({})", feed.title, feed.id);
                }
                None => {
                    let feed = subscriptions.subscribe(&url).await?;
                    println!("{} ({})", feed.title, feed.id);
                }
            }
        }
        Command::Unsubscribe { feed_id, user } => {
            Subscriptions::new(ingestor).unsubscribe_user(&user, feed_id).await?;
            println!("{user} unsubscribed from {feed_id}");
        }
        Command::Discover { page_url } => {
            let found = Subscriptions::new(ingestor).discover_feeds(&page_url).await?;
            println!("Found {} feed(s)", found.len());
            for url in found {
                println!("  {url}");
            }
        }
        Command::Feeds => {
            for feed in db.list_feeds().await.context("Failed to load feeds")? {
                let fetched = feed
                    .last_fetched
                    .map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
                println!("{}  {}  {}  (fetched {fetched})", feed.id, feed.title, feed.url);
            }
        }
        Command::Articles { feed_id, limit } => {
            let articles = db
                .list_articles_for_feed(feed_id)
                .await
                .context("Failed to load articles")?;
            for article in articles.into_iter().take(limit) {
                println!("{}  {}  {}", article.published_at.format("%Y-%m-%d"), article.title, article.url);
            }
        }
        Command::Check => {
            let report = db.check_consistency().await.context("Failed to scan the store")?;
            println!(
                "{} records, {} index entries",
                report.primary_records, report.index_entries
            );
            if report.is_consistent() {
                println!("Indexes are consistent");
            } else {
                for (label, keys) in [
                    ("missing", &report.missing),
                    ("mismatched", &report.mismatched),
                    ("orphaned", &report.orphaned),
                    ("dangling", &report.dangling),
                    ("undecodable", &report.undecodable),
                ] {
                    for key in keys {
                        println!("  {label}: {key}");
                    }
                }
                anyhow::bail!("Store indexes are inconsistent");
            }
        }
    }
    Ok(())
}
