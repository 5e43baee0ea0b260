use anyhow::{bail, Context};
use clap::Parser;
use notifscout_api::{JsonFileSource, Notification, NotificationFilters, NotificationSource};
use notifscout_core::filter::FilterStore;
use notifscout_core::{Config, NamedFilterStore, NotificationPipeline, Scorer, SortCriterion};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "notifscout")]
#[command(version, about = "Filter, rank and sort GitHub notifications", long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true, env = "NOTIFSCOUT_CONFIG")]
    config: Option<PathBuf>,

    /// Override a setting, e.g. --set engine.batch_size=50
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    overrides: Vec<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run a query over a JSON dump of notifications
    Filter {
        /// File holding a JSON array of notifications
        #[arg(short, long)]
        input: PathBuf,
        /// Filter expression, e.g. "is:unread AND repo:rust-lang/*"
        #[arg(default_value = "")]
        query: String,
        /// Sort criteria like "time:desc", replaces the configured ones
        #[arg(short, long)]
        sort: Vec<String>,
        /// Only unread notifications
        #[arg(long)]
        unread: bool,
    },
    /// Score every notification and list the most relevant first
    Score {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short = 'n', long, default_value_t = 20)]
        top: usize,
    },
    /// Show how a query is parsed
    Explain { query: String },
    /// Manage saved filters used as @name
    Filters {
        #[command(subcommand)]
        action: FilterAction,
    },
    /// Print the effective configuration
    Config,
}

#[derive(clap::Subcommand)]
enum FilterAction {
    List,
    Save {
        name: String,
        expression: String,
        #[arg(short, long)]
        description: Option<String>,
    },
    Remove {
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging - helps when things go sideways
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "notifscout=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.apply(&parse_overrides(&cli.overrides)?)?;

    match cli.command {
        Some(Commands::Filter {
            input,
            query,
            sort,
            unread,
        }) => {
            if !sort.is_empty() {
                // Validate up front so a typo fails before any work happens
                for criterion in &sort {
                    criterion.parse::<SortCriterion>()?;
                }
                config.sort.criteria = sort;
            }

            let cache = notifscout_cache::open(&config.cache.settings())?;
            let store: Arc<dyn FilterStore> = Arc::new(NamedFilterStore::load()?);
            let pipeline =
                NotificationPipeline::from_config(&config, Some(cache.clone()), Some(store))?;

            let mut filters = NotificationFilters::new();
            if unread {
                filters = filters.unread_only();
            }

            tracing::info!("Running {:?} over {}", query, input.display());
            let source = JsonFileSource::new(input);
            let results = pipeline.fetch_and_run(&source, &filters, &query).await?;
            for notification in &results {
                print_notification(notification, None);
            }
            println!("\n{} notifications", results.len());

            cache.close();
        }
        Some(Commands::Score { input, top }) => {
            let cache = notifscout_cache::open(&config.cache.settings())?;
            let scorer = Scorer::new(config.score.clone(), config.scoring.clone())?
                .with_cache(cache.clone());

            let notifications = JsonFileSource::new(&input)
                .fetch(&NotificationFilters::new())
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let scores = scorer.score_all(notifications.clone()).await?;

            let mut ranked: Vec<_> = notifications
                .iter()
                .filter_map(|n| scores.get(&n.id).map(|s| (s.total, n)))
                .collect();
            ranked.sort_by(|a, b| b.0.cmp(&a.0));

            for (total, notification) in ranked.into_iter().take(top) {
                print_notification(notification, Some(total));
            }

            cache.close();
        }
        Some(Commands::Explain { query }) => {
            let store: Arc<dyn FilterStore> = Arc::new(NamedFilterStore::load()?);
            let pipeline = NotificationPipeline::from_config(&config, None, Some(store))?;
            let filter = pipeline.parse(&query)?;

            println!("{}", filter.describe());
            if let Some(key) = filter.index_key() {
                println!("index: {:?}", key);
            }
        }
        Some(Commands::Filters { action }) => {
            let mut store = NamedFilterStore::load()?;
            match action {
                FilterAction::List => {
                    for (name, filter) in store.list() {
                        match &filter.description {
                            Some(description) => {
                                println!("@{:<16} {}  # {}", name, filter.expression, description)
                            }
                            None => println!("@{:<16} {}", name, filter.expression),
                        }
                    }
                }
                FilterAction::Save {
                    name,
                    expression,
                    description,
                } => {
                    // Refuse to save something that won't parse
                    let current: Arc<dyn FilterStore> = Arc::new(store.clone());
                    let check = NotificationPipeline::from_config(&config, None, Some(current))?;
                    check.parse(&expression)?;

                    store.set(&name, &expression, description)?;
                    store.save()?;
                    println!("Saved @{}", name);
                }
                FilterAction::Remove { name } => {
                    if store.remove(&name).is_none() {
                        bail!("No saved filter named @{}", name);
                    }
                    store.save()?;
                    println!("Removed @{}", name);
                }
            }
        }
        Some(Commands::Config) => {
            print!("{}", config.to_toml()?);
        }
        None => {
            println!("No command specified. Try --help");
        }
    }

    Ok(())
}

fn parse_overrides(raw: &[String]) -> anyhow::Result<HashMap<String, String>> {
    raw.iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => Ok((key.trim().to_string(), value.to_string())),
            None => bail!("--set expects KEY=VALUE, got {:?}", pair),
        })
        .collect()
}

fn print_notification(notification: &Notification, score: Option<u8>) {
    let marker = if notification.is_unread() { "●" } else { " " };
    let score = score.map(|s| format!("{:>3} ", s)).unwrap_or_default();
    println!(
        "{}{} {:<30} {:<12} {} ({})",
        score,
        marker,
        notification.repo_full_name(),
        notification.subject_type().as_str(),
        notification.title(),
        notification.updated_at().format("%Y-%m-%d %H:%M")
    );
}
