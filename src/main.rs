use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use prwatch::config::Config;
use prwatch::github::GithubClient;
use prwatch::registry::RunRegistry;
use prwatch::services::StaticCredentials;
use prwatch::storage::{NewSubscription, SubscriptionStore};
use prwatch::watch::Poller;

#[derive(Parser)]
#[command(
    name = "prwatch",
    about = "Automated preview testing for GitHub pull requests",
    version,
    long_about = None
)]
struct Cli {
    /// Config file path (TOML)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + polling loop)
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        bind: Option<String>,

        /// SQLite database path (overrides config)
        #[arg(long)]
        db: Option<String>,
    },

    /// Run one poll cycle over every active subscription, then exit
    Poll,

    /// Manage repository subscriptions
    Subscribe {
        #[command(subcommand)]
        action: SubscribeAction,
    },

    /// Inspect test runs
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },

    /// Re-execute one scenario of a finished run
    Rerun {
        /// Run id
        #[arg(long)]
        run: i64,

        /// Zero-based scenario index within the stored results
        #[arg(long)]
        scenario: usize,
    },
}

#[derive(Subcommand)]
enum SubscribeAction {
    /// Add (or reactivate) a subscription
    Add {
        /// Repository owner
        #[arg(long)]
        owner: String,

        /// Repository name
        #[arg(long)]
        repo: String,

        /// Branch patterns to skip (repeatable; `main` by default)
        #[arg(long)]
        exclude: Vec<String>,

        /// Base domain for fixed-domain deployments
        #[arg(long)]
        base_domain: Option<String>,

        /// Send notifications for this subscription
        #[arg(long)]
        notify: bool,
    },

    /// List all subscriptions
    List,

    /// Deactivate a subscription
    Remove {
        /// Subscription id
        #[arg(long)]
        id: i64,
    },
}

#[derive(Subcommand)]
enum RunsAction {
    /// List recent runs
    List {
        /// Only runs for this subscription
        #[arg(long)]
        subscription: Option<i64>,

        /// Maximum rows to show
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Show one run with its full results
    Show {
        /// Run id
        #[arg(long)]
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind, db } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(db) = db {
                config.storage.db_path = db;
            }
            tracing::info!(bind = %config.server.bind, "Starting prwatch daemon");
            prwatch::serve(config).await?;
        }
        Commands::Poll => {
            tracing::info!("Running one poll cycle");
            let pool = prwatch::storage::open_pool(&config.storage.db_path)?;
            let subscriptions = SubscriptionStore::new(pool.clone());
            let pipeline = prwatch::build_pipeline(&config, pool);
            let credentials = Arc::new(StaticCredentials::new(config.github.token.clone()));
            let poller = Poller::new(subscriptions, pipeline, credentials);
            poller.poll_all().await;
            poller.drain().await;
        }
        Commands::Subscribe { action } => {
            let pool = prwatch::storage::open_pool(&config.storage.db_path)?;
            let store = SubscriptionStore::new(pool);

            match action {
                SubscribeAction::Add {
                    owner,
                    repo,
                    exclude,
                    base_domain,
                    notify,
                } => {
                    let id = store.subscribe(NewSubscription {
                        owner: owner.clone(),
                        repo: repo.clone(),
                        exclude_branches: if exclude.is_empty() {
                            None
                        } else {
                            Some(exclude)
                        },
                        base_domain,
                        notify,
                        ..Default::default()
                    })?;
                    println!("Subscribed to {}/{} (id {})", owner, repo, id);
                }
                SubscribeAction::List => {
                    let subs = store.list_all()?;
                    if subs.is_empty() {
                        println!("No subscriptions found.");
                    } else {
                        println!(
                            "{:<5} | {:<30} | {:<7} | {:<7} | Last polled",
                            "Id", "Repository", "Active", "Notify"
                        );
                        println!("{:-<5}-|-{:-<30}-|-{:-<7}-|-{:-<7}-|-{:-<25}", "", "", "", "", "");
                        for sub in subs {
                            let polled = sub
                                .last_polled_at
                                .map(|t| t.to_rfc3339())
                                .unwrap_or_else(|| "never".to_string());
                            println!(
                                "{:<5} | {:<30} | {:<7} | {:<7} | {}",
                                sub.id, sub.repo_full_name, sub.active, sub.notify, polled
                            );
                        }
                    }
                }
                SubscribeAction::Remove { id } => {
                    store.unsubscribe(id)?;
                    println!("Subscription {} deactivated.", id);
                }
            }
        }
        Commands::Runs { action } => {
            let pool = prwatch::storage::open_pool(&config.storage.db_path)?;
            let registry = RunRegistry::new(pool);

            match action {
                RunsAction::List {
                    subscription,
                    limit,
                } => {
                    let runs = registry.list(subscription, limit)?;
                    if runs.is_empty() {
                        println!("No runs found.");
                    } else {
                        println!(
                            "{:<5} | {:<6} | {:<30} | {:<10} | Created",
                            "Id", "PR", "Repository", "Status"
                        );
                        println!("{:-<5}-|-{:-<6}-|-{:-<30}-|-{:-<10}-|-{:-<25}", "", "", "", "", "");
                        for run in runs {
                            let created = run
                                .created_at
                                .map(|t| t.to_rfc3339())
                                .unwrap_or_default();
                            println!(
                                "{:<5} | {:<6} | {:<30} | {:<10} | {}",
                                run.id,
                                run.pr_number,
                                run.repo_full_name.as_deref().unwrap_or("-"),
                                run.status,
                                created
                            );
                        }
                    }
                }
                RunsAction::Show { id } => match registry.get(id)? {
                    Some(run) => println!("{}", serde_json::to_string_pretty(&run)?),
                    None => println!("Run {} not found.", id),
                },
            }
        }
        Commands::Rerun { run, scenario } => {
            tracing::info!(%run, %scenario, "Re-executing scenario");
            let pool = prwatch::storage::open_pool(&config.storage.db_path)?;
            let store = SubscriptionStore::new(pool.clone());
            let pipeline = prwatch::build_pipeline(&config, pool);
            let api = GithubClient::new(config.github.token.as_deref());
            let result = pipeline
                .rerun_scenario(&store, &api, run, scenario)
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}
