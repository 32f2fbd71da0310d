use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use common::cli::{CommonArgs, CommonCommands, utils};
use common::config::Configuration;
use common::model::{MediaId, Post, PostId};
use common::store::{ContentRepository, SqlStore};
use std::sync::Arc;
use sweeper::{DrainOutcome, Hooks, StoredScheduler, Sweeper, ensure_scheduled};
use tokio::time::MissedTickBehavior;

#[derive(Parser)]
#[command(name = "mediasweep")]
#[command(about = "mediasweep - conservative cleanup of media left behind by deleted posts")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Option<MediaSweepCommands>,
}

#[derive(Subcommand)]
enum MediaSweepCommands {
    #[command(flatten)]
    Common(CommonCommands),
    /// Feed a permanent post deletion and clean up its media
    PostDeleted {
        /// ID of the deleted post
        post_id: PostId,
        /// Post type, used when the post is no longer in the store
        #[arg(long)]
        post_type: Option<String>,
        /// Featured image, used when the post is no longer in the store
        #[arg(long)]
        thumbnail_id: Option<MediaId>,
        /// Operator that receives the outcome notice
        #[arg(long)]
        operator: Option<String>,
    },
    /// Drain the deletion queue now, within the run-now budget
    RunNow {
        #[arg(long)]
        operator: Option<String>,
    },
    /// Show pending work and lock state
    Status,
    /// Drop every queued item without processing it
    ClearQueue,
}

impl Default for MediaSweepCommands {
    fn default() -> Self {
        Self::Common(CommonCommands::Start)
    }
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => log::info!("Received SIGINT"),
            _ = sigterm.recv() => log::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        log::info!("Received Ctrl+C");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on CLI arguments
    utils::init_logging(&cli.common);

    let config = utils::load_config(cli.common.config.as_ref())?;

    // Handle commands that don't need the store
    let command = cli.command.unwrap_or_default();
    if let MediaSweepCommands::Common(ref common_cmd) = command
        && utils::handle_common_command(common_cmd, &config).await?
    {
        return Ok(());
    }

    config.validate().context("Invalid configuration")?;

    log::info!("Loaded configuration:");
    log::info!("  Database DSN: {}", config.database.dsn);
    log::info!("  Uploads directory: {}", config.database.uploads_dir.display());

    let store = Arc::new(
        SqlStore::connect(&config.database)
            .await
            .context("Failed to connect to content store")?
            .with_scan_defaults(config.scan.clone()),
    );
    let scheduler = Arc::new(StoredScheduler::new(
        store.clone(),
        config.queue.schedule_poll_interval,
    ));
    let sweeper = Sweeper::new(store.clone(), scheduler.clone(), Hooks::new(), &config)
        .context("Failed to initialize sweeper")?;

    match command {
        MediaSweepCommands::Common(_) => run_worker(&sweeper, &scheduler, &config).await,
        MediaSweepCommands::PostDeleted {
            post_id,
            post_type,
            thumbnail_id,
            operator,
        } => {
            let post = deleted_post_snapshot(&store, post_id, post_type, thumbnail_id).await?;
            let stats = sweeper
                .coordinator()
                .on_post_permanently_deleted(&post, operator.as_deref())
                .await
                .with_context(|| format!("Failed to clean up media of post {post_id}"))?;
            println!("Post {post_id}: {stats}");
            Ok(())
        }
        MediaSweepCommands::RunNow { operator } => {
            let report = sweeper
                .run_now(operator.as_deref())
                .await
                .context("Run now failed")?;
            if report.contended {
                println!("Another drain is in progress, retry scheduled");
            }
            println!(
                "{} drains, {} items processed, {} remaining: {}",
                report.drains, report.processed, report.remaining, report.stats
            );
            Ok(())
        }
        MediaSweepCommands::Status => {
            let status = sweeper.status().await.context("Failed to read queue status")?;
            println!("{status}");
            Ok(())
        }
        MediaSweepCommands::ClearQueue => {
            let dropped = sweeper
                .clear_queue()
                .await
                .context("Failed to clear queue")?;
            println!("Dropped {dropped} queued items");
            Ok(())
        }
    }
}

/// Snapshot the post, then remove it so the scan no longer sees it.
async fn deleted_post_snapshot(
    store: &SqlStore,
    post_id: PostId,
    post_type: Option<String>,
    thumbnail_id: Option<MediaId>,
) -> Result<Post> {
    let snapshot = store
        .get_post(post_id)
        .await
        .with_context(|| format!("Failed to load post {post_id}"))?;

    let post = match snapshot {
        Some(post) => post,
        None => {
            let Some(post_type) = post_type else {
                bail!("post {post_id} is not in the store; pass --post-type");
            };
            let mut post = Post::new(post_id, post_type);
            post.thumbnail_id = thumbnail_id;
            post
        }
    };

    if store
        .delete_post(post_id)
        .await
        .with_context(|| format!("Failed to delete post {post_id}"))?
    {
        log::info!("Deleted post {post_id} ({})", post.post_type);
    }

    Ok(post)
}

async fn run_worker(
    sweeper: &Sweeper,
    scheduler: &StoredScheduler,
    config: &Configuration,
) -> Result<()> {
    let status = sweeper.status().await.context("Failed to read queue status")?;
    if !status.is_idle() {
        log::info!("{} queued items pending at startup", status.pending);
        ensure_scheduled(scheduler, config.queue.initial_delay).await;
    }

    let mut fallback = tokio::time::interval(config.queue.fallback_interval);
    fallback.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    fallback.tick().await;

    let shutdown = wait_for_shutdown_signal();
    tokio::pin!(shutdown);

    log::info!(
        "Worker started, polling schedule every {:?}, fallback drain every {:?}",
        config.queue.schedule_poll_interval,
        config.queue.fallback_interval
    );

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                break;
            }
            _ = scheduler.wait_due() => drain_once(sweeper, "scheduled").await,
            _ = fallback.tick() => drain_once(sweeper, "fallback").await,
        }
    }

    log::info!("Received shutdown signal, stopping worker");
    sweeper.metrics().summary().log();
    log::info!("Worker stopped");

    Ok(())
}

async fn drain_once(sweeper: &Sweeper, trigger: &str) {
    match sweeper.processor().drain().await {
        Ok(DrainOutcome::Idle) => log::debug!("{trigger} drain: queue empty"),
        Ok(DrainOutcome::Contended) => log::info!("{trigger} drain: lock held elsewhere"),
        Ok(DrainOutcome::Drained(report)) => log::info!(
            "{trigger} drain: {} processed, {} remaining, {}",
            report.processed,
            report.remaining,
            report.stats
        ),
        Err(e) => log::error!("{trigger} drain failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_starts_worker() {
        let cli = Cli::try_parse_from(["mediasweep"]).unwrap();
        assert!(matches!(
            cli.command.unwrap_or_default(),
            MediaSweepCommands::Common(CommonCommands::Start)
        ));
    }

    #[test]
    fn test_post_deleted_arguments() {
        let cli = Cli::try_parse_from([
            "mediasweep",
            "post-deleted",
            "42",
            "--post-type",
            "page",
            "--thumbnail-id",
            "7",
            "--operator",
            "admin",
        ])
        .unwrap();

        match cli.command {
            Some(MediaSweepCommands::PostDeleted {
                post_id,
                post_type,
                thumbnail_id,
                operator,
            }) => {
                assert_eq!(post_id, 42);
                assert_eq!(post_type.as_deref(), Some("page"));
                assert_eq!(thumbnail_id, Some(7));
                assert_eq!(operator.as_deref(), Some("admin"));
            }
            _ => panic!("expected post-deleted"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["mediasweep", "status", "--verbose"]).unwrap();
        assert!(cli.common.verbose);
        assert!(matches!(cli.command, Some(MediaSweepCommands::Status)));
    }

    #[test]
    fn test_common_commands_are_flattened() {
        let cli = Cli::try_parse_from(["mediasweep", "config", "--json"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(MediaSweepCommands::Common(CommonCommands::Config { json: true }))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_taken_before_post_is_removed() {
        let store = common::testing::memory_store().await;
        let seed = common::testing::Seeder::new(&store);
        seed.post(5, "page", "").await;
        seed.media(50, Some(5), "2024/05/a.jpg").await;
        seed.thumbnail(5, 50).await;

        let post = deleted_post_snapshot(&store, 5, None, None).await.unwrap();
        assert_eq!(post.post_type, "page");
        assert_eq!(post.thumbnail_id, Some(50));
        assert!(store.get_post(5).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_of_missing_post_needs_type() {
        let store = common::testing::memory_store().await;

        assert!(deleted_post_snapshot(&store, 9, None, None).await.is_err());

        let post = deleted_post_snapshot(&store, 9, Some("post".to_string()), Some(3))
            .await
            .unwrap();
        assert_eq!(post.thumbnail_id, Some(3));
    }
}
