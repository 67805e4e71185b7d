use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tubefeed::config::Config;
use tubefeed::gateway::{FetchGateway, HttpTransport};
use tubefeed::identity::IdentityPool;
use tubefeed::storage::{AssetCache, SubscriptionStore};
use tubefeed::sync::{SyncError, SyncOptions, SyncReport, Syncer};

const PROXY_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Get the config directory path (~/.config/tubefeed/)
fn get_config_dir(home: &Path) -> PathBuf {
    home.join(".config").join("tubefeed")
}

fn home_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home))
}

#[derive(Parser, Debug)]
#[command(name = "tubefeed", about = "Channel feed subscriptions with Tor stream isolation")]
struct Args {
    /// Config file (default: ~/.config/tubefeed/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Route every request through the SOCKS proxy, overriding the config
    #[arg(long, global = true)]
    tor: bool,

    /// Download thumbnails after refreshing, overriding the config
    #[arg(long, global = true)]
    thumbnails: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List subscriptions with unseen/total counts
    List,
    /// Subscribe to a channel id under a display title
    Subscribe {
        id: String,
        title: String,
        /// Only record the subscription, don't fetch it yet
        #[arg(long)]
        no_refresh: bool,
    },
    /// Remove a subscription and its cached thumbnails
    Unsubscribe { title: String },
    /// Refresh the given subscriptions (all when none are named)
    Refresh { titles: Vec<String> },
    /// Mark every entry of a subscription as seen
    MarkRead { title: String },
    /// Find the feed address advertised by a channel or site page
    Resolve { url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let home = home_dir()?;

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => get_config_dir(&home).join("config.toml"),
    };
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config '{}'", config_path.display()))?;
    config.use_proxy |= args.tor;
    config.fetch_thumbnails |= args.thumbnails;

    let data_dir = config.data_dir_or(&home);
    prepare_data_dir(&data_dir)?;

    let transport = HttpTransport::new(
        config.proxy_host.clone(),
        config.proxy_port,
        config.request_timeout(),
    )
    .context("Failed to build HTTP client")?;
    if config.use_proxy {
        transport
            .check_proxy(PROXY_CHECK_TIMEOUT)
            .await
            .with_context(|| {
                format!(
                    "Tor daemon not found at {}:{}. Start it, or run without --tor and use_proxy",
                    config.proxy_host, config.proxy_port
                )
            })?;
    }

    let syncer = build_syncer(&config, &data_dir, transport);
    syncer
        .store()
        .load_or_init()
        .context("Failed to open subscription store")?;

    tokio::select! {
        result = run(args.command, &syncer) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, batch abandoned before saving");
            anyhow::bail!("Interrupted; the subscription store was left unchanged")
        }
    }
}

fn prepare_data_dir(data_dir: &Path) -> Result<()> {
    if !data_dir.exists() {
        std::fs::create_dir_all(data_dir).with_context(|| {
            format!("Failed to create data directory '{}'", data_dir.display())
        })?;
    }

    // User-only access: the store lists everything the user watches
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(data_dir, std::fs::Permissions::from_mode(0o700))
        {
            tracing::warn!(
                path = %data_dir.display(),
                error = %e,
                "Failed to set data directory permissions to 0700"
            );
        }
    }

    Ok(())
}

fn build_syncer(config: &Config, data_dir: &Path, transport: HttpTransport) -> Syncer {
    let gateway = FetchGateway::new(Arc::new(transport), config.max_connections);
    let identities = Arc::new(IdentityPool::new(
        config.identity_pool_size,
        config.identity_ttl(),
    ));

    Syncer::new(
        gateway,
        identities,
        SubscriptionStore::new(data_dir.join("database")),
        AssetCache::new(data_dir.join("thumbnails")),
        SyncOptions::from_config(config),
    )
}

async fn run(command: Command, syncer: &Syncer) -> Result<()> {
    match command {
        Command::List => {
            let subs = syncer.store().load()?;
            if subs.is_empty() {
                println!("No subscriptions yet. Add one with: tubefeed subscribe ID TITLE");
            }
            for summary in subs.summaries() {
                println!("{summary}");
            }
        }
        Command::Subscribe {
            id,
            title,
            no_refresh,
        } => {
            let report = syncer
                .subscribe(&id, &title, !no_refresh)
                .await
                .map_err(explain)?;
            println!("Subscribed to {title} ({})", syncer.feed_address(&id));
            if let Some(report) = report {
                print_report(&report);
            }
        }
        Command::Unsubscribe { title } => {
            if syncer.unsubscribe_by_title(&title).await? {
                println!("Unsubscribed from {title}");
            } else {
                println!("Not subscribed to {title}");
            }
        }
        Command::Refresh { titles } => {
            let report = if titles.is_empty() {
                syncer.refresh_all().await
            } else {
                let subs = syncer.store().load()?;
                let ids = titles
                    .iter()
                    .map(|title| {
                        subs.id_for_title(title)
                            .map(str::to_owned)
                            .with_context(|| format!("Not subscribed to {title}"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                syncer.refresh(&ids).await
            };
            print_report(&report.map_err(explain)?);
        }
        Command::MarkRead { title } => {
            let mut subs = syncer.store().load()?;
            let id = subs
                .id_for_title(&title)
                .map(str::to_owned)
                .with_context(|| format!("Not subscribed to {title}"))?;
            subs.mark_all_read(&id)?;
            syncer.store().save(&subs)?;
            println!("Marked {title} as read");
        }
        Command::Resolve { url } => match syncer.resolve_feed_address(&url).await? {
            Some(address) => println!("{address}"),
            None => anyhow::bail!("No feed address found on {url}"),
        },
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    println!(
        "Refreshed {} feed(s): {} new, {} updated, {} thumbnail(s) fetched",
        report.feeds, report.added, report.updated, report.assets_fetched
    );
}

/// Network failures leave the store untouched, so retrying is always safe.
fn explain(err: SyncError) -> anyhow::Error {
    if err.is_network() {
        anyhow::Error::new(err).context("Network error; nothing was saved, run the command again to retry")
    } else {
        err.into()
    }
}
