use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use chansync::config::Config;
use chansync::transfer::TransferEventReceiver;
use chansync::{
    telemetry, ChannelManager, ChannelRecord, ContentId, FileStore, LocalTransferManager,
    MetadataStore, PublicKey, TransferEvent, TransferManager,
};

#[derive(Parser, Debug)]
#[command(name = "chansync", version, about = "Keep subscribed metadata channels fetched and imported")]
struct Cli {
    /// Configuration file (default: <data dir>/chansync/chansync.toml)
    #[arg(short, long, global = true, env = "CHANSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Override node.state_dir
    #[arg(long, global = true, env = "CHANSYNC_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Override node.public_key (hex)
    #[arg(long, global = true, env = "CHANSYNC_PUBLIC_KEY")]
    public_key: Option<PublicKey>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the channel manager until interrupted
    Run,

    /// Fetch and import every outdated subscribed channel once
    Check {
        /// Print the reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove transfers of deleted, updated and unsubscribed channels once
    Cruft {
        #[arg(long)]
        json: bool,
    },

    /// List known channels
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Subscribe to a channel
    Subscribe { public_key: PublicKey },

    /// Unsubscribe from a channel
    Unsubscribe { public_key: PublicKey },

    /// Publish a new version of the personal channel and seed it
    Commit {
        content_id: ContentId,
        version: u64,
        #[arg(long, default_value = "")]
        title: String,
    },

    /// Record a channel announcement (new content id and version)
    Record {
        public_key: PublicKey,
        content_id: ContentId,
        version: u64,
        #[arg(long, default_value = "")]
        title: String,
    },
}

struct Node {
    events: TransferEventReceiver,
    store: Arc<FileStore>,
    transfers: Arc<LocalTransferManager>,
    manager: Arc<ChannelManager>,
}

async fn open_store(config: &Config) -> Result<Arc<FileStore>> {
    let store = FileStore::open(config.database_path(), config.personal_key()?)
        .await
        .with_context(|| format!("Failed to open {}", config.database_path().display()))?;
    Ok(Arc::new(store))
}

async fn open_node(config: &Config) -> Result<Node> {
    let store = open_store(config).await?;

    let (transfers, events) = LocalTransferManager::new(config.pool_dir(), config.downloads_dir());
    transfers
        .restore()
        .await
        .with_context(|| format!("Failed to scan {}", config.downloads_dir().display()))?;
    let transfers = Arc::new(transfers);

    let manager = Arc::new(ChannelManager::new(store.clone(), transfers.clone(), config.settings()));

    Ok(Node {
        events,
        store,
        transfers,
        manager,
    })
}

async fn run(config: &Config) -> Result<()> {
    let node = open_node(config).await?;
    debug!(downloads = %config.downloads_dir().display(), "Node ready");

    let handle = node.manager.start(node.events);
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    node.manager.shutdown().await;
    handle.await.context("Channel manager task failed")?;
    Ok(())
}

async fn check(config: &Config, json: bool) -> Result<()> {
    let Node {
        manager,
        transfers,
        mut events,
        ..
    } = open_node(config).await?;

    manager.ensure_personal_channel_seeding().await?;
    let update = manager.check_channel_updates().await?;

    // Wait for the downloads just started and for a personal archive still
    // being copied in, then pick the downloads up with a second pass
    let mut pending: HashSet<ContentId> = update.started_ids.iter().copied().collect();
    pending.extend(
        transfers
            .list_active_transfers()
            .await?
            .into_iter()
            .filter(|t| !t.status.is_complete())
            .map(|t| t.content_id),
    );
    while !pending.is_empty() {
        let Some(event) = events.recv().await else {
            break;
        };
        match &event {
            TransferEvent::Finished { content_id, .. } => {
                pending.remove(content_id);
                continue;
            }
            TransferEvent::Failed { content_id, .. } => {
                pending.remove(content_id);
            }
            TransferEvent::Removed { .. } => {}
        }
        manager.handle_event(event).await;
    }
    if !update.started_ids.is_empty() {
        manager.check_channel_updates().await?;
    }
    let drain = manager.drain_queue().await;

    if json {
        let report = serde_json::json!({ "update": update, "drain": drain });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} candidates, {} started, {} queued, {} in progress, {} failed",
            update.candidates, update.started, update.enqueued, update.in_progress, update.failed
        );
        println!("{} imported, {} failed imports", drain.imported, drain.failed);
    }
    Ok(())
}

async fn cruft(config: &Config, json: bool) -> Result<()> {
    let Node {
        manager,
        mut events,
        ..
    } = open_node(config).await?;
    let report = manager.remove_cruft_channels().await?;

    // Removals finish in the background; wait so content is gone on exit
    let mut pending = report.removed;
    while pending > 0 {
        match events.recv().await {
            Some(TransferEvent::Removed { .. }) => pending -= 1,
            Some(_) => {}
            None => break,
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for removal in &report.removals {
            println!(
                "{} {:?}{}",
                removal.content_id,
                removal.reason,
                if removal.delete_content { " (content deleted)" } else { "" }
            );
        }
        println!("{} of {} transfers removed", report.removed, report.transfers);
    }
    Ok(())
}

async fn commit(config: &Config, content_id: ContentId, version: u64, title: String) -> Result<()> {
    let Node {
        manager,
        store,
        transfers,
        mut events,
    } = open_node(config).await?;

    let me = store.personal_key().clone();
    let mut channel = store
        .get(&me)
        .await
        .unwrap_or_else(|| ChannelRecord::new(me.clone(), title.clone()));
    if version < channel.remote_version {
        anyhow::bail!(
            "Commit v{} is older than the published v{}",
            version,
            channel.remote_version
        );
    }
    channel.content_id = Some(content_id);
    channel.remote_version = version;
    channel.local_version = version;
    if !title.is_empty() {
        channel.title = title;
    }
    store.upsert(channel).await?;

    let started = manager.updated_personal_channel(content_id).await?;
    let in_place = transfers
        .get_transfer(&content_id)
        .await?
        .is_some_and(|t| t.status.is_complete());

    // A personal archive coming from the pool must be copied in before exit
    if started && !in_place {
        loop {
            match events.recv().await {
                Some(TransferEvent::Finished { content_id: id, .. }) if id == content_id => break,
                Some(TransferEvent::Failed { content_id: id, reason }) if id == content_id => {
                    anyhow::bail!("Failed to fetch personal archive {}: {}", id, reason);
                }
                Some(_) => {}
                None => break,
            }
        }
    }

    info!(content_id = %content_id, version, "Personal channel committed");
    Ok(())
}

async fn status(config: &Config, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let me = store.personal_key().clone();
    let mut channels = store.all_channels().await?;
    channels.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.public_key.cmp(&b.public_key)));

    if json {
        println!("{}", serde_json::to_string_pretty(&channels)?);
        return Ok(());
    }

    for channel in &channels {
        let state = if channel.is_personal(&me) {
            "personal".cyan()
        } else if !channel.subscribed {
            "unsubscribed".dimmed()
        } else if channel.update_available() {
            "update available".yellow()
        } else {
            "up to date".green()
        };
        let content = channel
            .content_id
            .map(|id| id.short())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<24} v{}/{}  {}  {}",
            channel.dir_name(),
            channel.title,
            channel.local_version,
            channel.remote_version,
            content,
            state
        );
    }
    Ok(())
}

async fn set_subscribed(config: &Config, public_key: &PublicKey, subscribed: bool) -> Result<()> {
    let store = open_store(config).await?;
    store.set_subscribed(public_key, subscribed).await?;
    info!(public_key = %public_key, subscribed, "Subscription updated");
    Ok(())
}

async fn record(config: &Config, public_key: PublicKey, content_id: ContentId, version: u64, title: String) -> Result<()> {
    let store = open_store(config).await?;
    let mut channel = store
        .get(&public_key)
        .await
        .unwrap_or_else(|| ChannelRecord::new(public_key.clone(), title.clone()));

    if version < channel.remote_version {
        anyhow::bail!(
            "Announcement v{} is older than known v{} for {}",
            version,
            channel.remote_version,
            public_key
        );
    }
    channel.content_id = Some(content_id);
    channel.remote_version = version;
    if !title.is_empty() {
        channel.title = title;
    }

    store.upsert(channel).await?;
    info!(public_key = %public_key, content_id = %content_id, version, "Channel recorded");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.verbose, cli.quiet);

    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if let Some(state_dir) = cli.state_dir {
        config.node.state_dir = state_dir;
    }
    if let Some(public_key) = cli.public_key {
        config.node.public_key = Some(public_key);
    }

    match cli.command {
        Command::Run => run(&config).await,
        Command::Check { json } => check(&config, json).await,
        Command::Cruft { json } => cruft(&config, json).await,
        Command::Status { json } => status(&config, json).await,
        Command::Subscribe { public_key } => set_subscribed(&config, &public_key, true).await,
        Command::Unsubscribe { public_key } => set_subscribed(&config, &public_key, false).await,
        Command::Commit {
            content_id,
            version,
            title,
        } => commit(&config, content_id, version, title).await,
        Command::Record {
            public_key,
            content_id,
            version,
            title,
        } => record(&config, public_key, content_id, version, title).await,
    }
}
