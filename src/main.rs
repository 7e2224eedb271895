//! # Watchbell: reminder scheduler CLI
//!
//! Usage:
//!   watchbell run                                   # Start the engine until Ctrl-C
//!                                                   # (reads control commands on stdin)
//!   watchbell add --container c1 --group g1 --title "Standup" --every 30
//!   watchbell list --due                            # Items needing a reminder now
//!   watchbell remind <id>                           # Send a reminder immediately
//!
//! One-shot commands edit the store directly. A `run` process sharing the
//! store sees those edits at its next wake; use the stdin commands of `run`
//! to reschedule immediately.

mod control;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use watchbell_core::traits::{Clock, Notifier, SystemClock};
use watchbell_core::types::{ItemPatch, NewItem, WatchedItem};
use watchbell_core::WatchbellConfig;
use watchbell_scheduler::store::DueFilter;
use watchbell_scheduler::{
    AudienceResolver, EngineParts, FailureTracker, ItemManager, ItemQuery, ItemStore,
    JsonFileStore, LogNotifier, MemoryItemStore, Pagination, ReminderEngine, SqliteItemStore,
    StaticDirectory, WatchService, WebhookNotifier,
};

use crate::control::ControlCommand;

#[derive(Parser)]
#[command(
    name = "watchbell",
    version,
    about = "🔔 Watchbell — reminders that sleep until they're due"
)]
struct Cli {
    /// Config file (default: ~/.watchbell/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reminder engine until Ctrl-C, accepting commands on stdin
    Run,
    /// Watch an item (re-adding an existing id keeps its history)
    Add {
        /// Item id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        container: String,
        #[arg(long)]
        group: String,
        #[arg(long)]
        title: String,
        /// Reminder interval in minutes
        #[arg(long)]
        every: f64,
        /// Create paused
        #[arg(long)]
        paused: bool,
    },
    /// List watched items
    List {
        #[arg(long)]
        group: Option<String>,
        /// Only items whose reminder is due now
        #[arg(long)]
        due: bool,
        #[arg(long)]
        json: bool,
    },
    /// Stop watching an item
    Remove {
        id: String,
        /// Refuse unless the item belongs to this group
        #[arg(long)]
        group: Option<String>,
    },
    /// Pause reminders for an item
    Pause { id: String },
    /// Resume reminders for an item
    Resume { id: String },
    /// Send a reminder for an item right now
    Remind { id: String },
    /// Show when the next reminder is due
    Next,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

fn open_store(config: &WatchbellConfig) -> Result<Arc<dyn ItemStore>> {
    let path = expand_path(&config.storage.path);
    let store: Arc<dyn ItemStore> = match config.storage.backend.as_str() {
        "sqlite" => Arc::new(SqliteItemStore::open(Path::new(&path))?),
        // For the json backend `path` names the directory holding items.json.
        "json" => Arc::new(JsonFileStore::open(Path::new(&path))?),
        "memory" => Arc::new(MemoryItemStore::new()),
        other => anyhow::bail!("Unknown storage backend: {other}"),
    };
    tracing::debug!("🗄️ Storage: {} ({})", store.name(), path);
    Ok(store)
}

fn build(config: &WatchbellConfig) -> Result<WatchService> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = open_store(config)?;
    let manager = Arc::new(ItemManager::new(store, clock.clone()));

    let directory = Arc::new(StaticDirectory::from_config(&config.directory));
    let notifier: Arc<dyn Notifier> = match WebhookNotifier::from_config(&config.notify) {
        Some(webhook) => Arc::new(webhook),
        None => Arc::new(LogNotifier),
    };
    tracing::debug!("📨 Notifier: {}", notifier.name());

    let engine = ReminderEngine::new(
        EngineParts {
            manager: manager.clone(),
            resolver: Arc::new(AudienceResolver::new(
                directory.clone(),
                config.audience.clone(),
            )),
            failures: Arc::new(FailureTracker::new(clock.clone(), &config.cooldown)),
            notifier,
            acknowledgements: directory,
            clock,
        },
        config.scheduler.clone(),
    );
    Ok(WatchService::new(manager, engine))
}

async fn require_item(manager: &ItemManager, id: &str) -> Result<WatchedItem> {
    manager
        .get_item(id)
        .await?
        .with_context(|| format!("No watched item with id {id}"))
}

async fn print_items(manager: &ItemManager, query: &ItemQuery) -> Result<()> {
    let items = manager.list_items(query, Pagination::default()).await?;
    if items.is_empty() {
        println!("📭 No watched items");
    } else {
        println!("📋 {} watched item(s):", items.len());
        for item in &items {
            print_item(item);
        }
    }
    Ok(())
}

fn print_status(engine: &ReminderEngine) {
    let status = engine.status();
    let next = status
        .next_wake_time
        .map(|t| t.format("%H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "none".into());
    println!(
        "📊 {:?} · {} active · next wake {}",
        status.state, status.active_item_count, next
    );
}

/// Apply one stdin command to the running engine.
async fn handle_control(service: &WatchService, command: ControlCommand) -> Result<()> {
    match command {
        ControlCommand::Add {
            id,
            container,
            group,
            every,
            title,
        } => {
            let item = service
                .watch(NewItem::new(id, container, group, title, every))
                .await?;
            println!("✅ Watching {}", item.item_id);
            print_item(&item);
        }
        ControlCommand::Remove { id, group } => {
            if service.unwatch(&id, group.as_deref()).await? {
                println!("🗑️ Removed {id}");
            } else {
                println!("⚠️ No watched item with id {id}");
            }
        }
        ControlCommand::Pause(id) => {
            service.set_paused(&id, true).await?;
            println!("⏸️ Paused {id}");
        }
        ControlCommand::Resume(id) => {
            service.set_paused(&id, false).await?;
            println!("▶️ Resumed {id}");
        }
        ControlCommand::Remind(id) => {
            let delivered = service.remind(&id).await?;
            println!("🔔 Reminder for {id} reached {delivered} recipient(s)");
        }
        ControlCommand::List => print_items(service.manager(), &ItemQuery::all()).await?,
        ControlCommand::Status => print_status(service.engine()),
        ControlCommand::Help => println!("{}", control::HELP),
        ControlCommand::Quit => {}
    }
    Ok(())
}

fn print_item(item: &WatchedItem) {
    let status = if item.is_paused { "⏸️ " } else { "▶️ " };
    let last = item
        .last_reminder_at
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".into());
    println!(
        "{status} {} — '{}' in {} (group {})",
        item.item_id, item.title, item.container_id, item.group_id
    );
    println!(
        "      every {} min · last {} · next {} · {} acked",
        item.interval_minutes,
        last,
        item.next_reminder_time().format("%Y-%m-%d %H:%M"),
        item.responded_user_ids.len()
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "watchbell=debug,watchbell_scheduler=debug,watchbell_core=debug"
    } else {
        "watchbell=info,watchbell_scheduler=info,watchbell_core=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => {
            WatchbellConfig::load_from(Path::new(&expand_path(&path.to_string_lossy())))?
        }
        None => WatchbellConfig::load()?,
    };
    let service = build(&config)?;
    let manager = service.manager().clone();

    match cli.command {
        Command::Run => {
            println!("🔔 Watchbell v{}", env!("CARGO_PKG_VERSION"));
            println!("   🗄️  Storage:  {} ({})", config.storage.backend, config.storage.path);
            println!(
                "   ⏱️  Max wait: {}s{}",
                config.scheduler.max_wait().as_secs(),
                if config.scheduler.test_mode { " (test mode)" } else { "" }
            );
            println!("   ⌨️  Type 'help' for commands");
            println!();

            service.engine().initialize().await;
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            let mut stdin_open = true;
            loop {
                tokio::select! {
                    signal = tokio::signal::ctrl_c() => {
                        signal?;
                        break;
                    }
                    line = lines.next_line(), if stdin_open => match line {
                        Ok(Some(line)) => match control::parse_line(&line) {
                            Ok(Some(ControlCommand::Quit)) => break,
                            Ok(Some(command)) => {
                                if let Err(e) = handle_control(&service, command).await {
                                    println!("⚠️ {e}");
                                }
                            }
                            Ok(None) => {}
                            Err(e) => println!("⚠️ {e}"),
                        },
                        Ok(None) => stdin_open = false,
                        Err(e) => {
                            tracing::warn!("⚠️ Stopped reading commands: {e}");
                            stdin_open = false;
                        }
                    },
                }
            }
            service.engine().stop();
            let status = service.engine().status();
            println!("👋 Stopped ({} active items)", status.active_item_count);
        }
        Command::Add {
            id,
            container,
            group,
            title,
            every,
            paused,
        } => {
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let mut params = NewItem::new(&id, container, group, title, every);
            params.is_paused = paused;
            if let Some(existing) = manager.get_item(&id).await? {
                params = params.preserving(&existing);
            }
            let item = manager.create_item(params).await?;
            println!("✅ Watching {}", item.item_id);
            print_item(&item);
        }
        Command::List { group, due, json } => {
            let query = ItemQuery {
                group_id: group,
                due: due.then(|| DueFilter {
                    due: true,
                    as_of: manager.now(),
                }),
                ..ItemQuery::all()
            };
            if json {
                let items = manager.list_items(&query, Pagination::default()).await?;
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                print_items(&manager, &query).await?;
            }
        }
        Command::Remove { id, group } => {
            if manager.remove_item(&id, group.as_deref()).await? {
                println!("🗑️ Removed {id}");
            } else {
                println!("⚠️ No watched item with id {id}");
            }
        }
        Command::Pause { id } => {
            require_item(&manager, &id).await?;
            manager.update_item(&id, ItemPatch::paused(true)).await?;
            println!("⏸️ Paused {id}");
        }
        Command::Resume { id } => {
            require_item(&manager, &id).await?;
            manager.update_item(&id, ItemPatch::paused(false)).await?;
            println!("▶️ Resumed {id}");
        }
        Command::Remind { id } => {
            let item = require_item(&manager, &id).await?;
            let delivered = service.engine().send_manual_reminder(&item).await?;
            if delivered == 0 {
                println!("🤫 Nothing sent for {id} (all acknowledged or cooling down)");
            } else {
                println!("🔔 Reminder for {id} reached {delivered} recipient(s)");
            }
        }
        Command::Next => match manager.get_next_reminder_time().await? {
            Some(next) => {
                println!("⏰ Next reminder due {}", next.format("%Y-%m-%d %H:%M:%S UTC"))
            }
            None => println!("💤 Nothing scheduled"),
        },
    }

    Ok(())
}
