use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vnclub::api::{ApiClient, NovelEntry, PageResult};
use vnclub::browse::{BrowseDriver, BrowsePage, LoadState, NovelListSource, Outcome, PageBrowser};
use vnclub::config::Config;
use vnclub::entity::{EntityId, EntityKind};
use vnclub::image::{resolve_image_url, ImageOptions};
use vnclub::preferences::{PreferenceManager, TitleLanguage};
use vnclub::snapshot::{NovelsSnapshot, SnapshotCache, SnapshotKind, SnapshotRead};
use vnclub::stats::{
    RecommendationLoader, RecommendationState, StatsEvent, StatsLoader, StatsState,
};
use vnclub::storage::{Database, DatabaseError};
use vnclub::url_state::{Tab, UrlSync, ViewState};

/// Get the config directory path (~/.config/vnclub/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("vnclub"))
}

#[derive(Parser, Debug)]
#[command(name = "vnclub", about = "Visual novel stats and recommendations from the VN Club API")]
struct Args {
    /// Drop cached snapshots from earlier runs before doing anything else
    #[arg(long, global = true)]
    new_session: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show a user's stats summary (from the session snapshot when fresh)
    Stats {
        /// User id (u12345) or username
        user: String,
        /// Ask the backend to recompute instead of serving its cache
        #[arg(long)]
        refresh: bool,
    },
    /// List a user's visual novels
    Novels {
        user: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// Filter query string, e.g. "includeTags=32:Romance&min_rating=70"
        query: Option<String>,
    },
    /// Show recommendations for a user
    Recommend {
        user: String,
        query: Option<String>,
    },
    /// Rewrite a VNDB image URL to its proxied form
    Image {
        url: String,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        vn: Option<String>,
    },
    /// Normalize a stats page query string
    Url { query: String },
    /// Show or change display preferences
    Prefs {
        #[arg(long)]
        title_language: Option<TitleLanguage>,
        #[arg(long)]
        nsfw_reveal: Option<bool>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    // Pure commands need neither config nor network.
    match &args.command {
        Command::Image { url, width, vn } => {
            let opts = ImageOptions {
                width: *width,
                entity_id: vn.clone(),
            };
            match resolve_image_url(Some(url.as_str()), &opts) {
                Some(proxied) => println!("{proxied}"),
                None => {
                    eprintln!("Error: not a recognized VNDB image URL");
                    std::process::exit(1);
                }
            }
            return Ok(());
        }
        Command::Url { query } => {
            println!("{}", ViewState::from_query(query).to_query());
            return Ok(());
        }
        _ => {}
    }

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o700))
        {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    let config = Config::load(&config_dir.join("config.toml")).context("Failed to load config")?;

    let db_path = config_dir.join("vnclub.db");
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of vnclub appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    if args.new_session {
        let dropped = db.begin_session().await.context("Failed to reset session")?;
        tracing::info!(entries = dropped, "Started new session");
    }

    let mut prefs = match PreferenceManager::load(&config, &db).await {
        Ok(prefs) => prefs,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load preferences, using config defaults");
            PreferenceManager::from_config(&config)
        }
    };

    let client = ApiClient::new(&config.api_base_url, config.timeouts)
        .context("Invalid api_base_url in config")?;

    match args.command {
        Command::Stats { user, refresh } => {
            let uid = resolve_user(&client, &user).await?;
            run_stats(&config, &db, client, uid, refresh).await
        }
        Command::Novels { user, page, query } => {
            let uid = resolve_user(&client, &user).await?;
            run_novels(&config, &db, &prefs, client, uid, page, query.as_deref()).await
        }
        Command::Recommend { user, query } => {
            let uid = resolve_user(&client, &user).await?;
            run_recommend(&config, &prefs, client, uid, query.as_deref()).await
        }
        Command::Prefs {
            title_language,
            nsfw_reveal,
        } => {
            if let Some(lang) = title_language {
                prefs.set_title_language(&db, lang).await?;
            }
            if let Some(reveal) = nsfw_reveal {
                prefs.set_nsfw_reveal(&db, reveal).await?;
            }
            println!("title_language = {}", prefs.title_language());
            println!("nsfw_reveal = {}", prefs.nsfw_reveal());
            Ok(())
        }
        Command::Image { .. } | Command::Url { .. } => Ok(()),
    }
}

/// Accept either an id or a username.
async fn resolve_user(client: &ApiClient, user: &str) -> Result<EntityId> {
    if let Ok(uid) = EntityId::parse(user) {
        if uid.kind() == EntityKind::User {
            return Ok(uid);
        }
        anyhow::bail!("'{user}' is a {:?} id, not a user", uid.kind());
    }
    let info = client
        .lookup_user(user, &CancellationToken::new())
        .await
        .with_context(|| format!("Failed to look up user '{user}'"))?;
    tracing::debug!(uid = %info.uid, username = %info.username, "Resolved user");
    Ok(info.uid)
}

async fn run_stats(
    config: &Config,
    db: &Database,
    client: ApiClient,
    uid: EntityId,
    refresh: bool,
) -> Result<()> {
    let (tx, mut rx) = mpsc::channel(4);
    let cache = SnapshotCache::with_freshness(db.clone(), config.freshness_window());
    let mut loader = StatsLoader::new(client, cache, tx);

    let state = loader.open(uid.clone()).await;
    if let StatsState::Ready(_) = state {
        print_stats(state);
    }
    if refresh {
        loader.refresh();
    }

    while loader.in_flight() {
        let Some(response) = rx.recv().await else {
            break;
        };
        match loader.handle_response(response).await {
            StatsEvent::Loaded | StatsEvent::Revalidated => print_stats(loader.state()),
            StatsEvent::Failed(failure) => {
                eprintln!("Error: {}", failure.message());
                eprintln!("  {}", failure.detail);
                eprintln!("  View on VNDB: {}", failure.upstream_url);
                std::process::exit(1);
            }
            StatsEvent::RevalidationDropped | StatsEvent::Discarded => {}
        }
    }
    Ok(())
}

fn print_stats(state: &StatsState) {
    let StatsState::Ready(snapshot) = state else {
        return;
    };
    let stats = &snapshot.primary;
    println!("{} ({})", stats.user.username, stats.user.uid);
    println!(
        "  {} VNs: {} completed, {} playing, {} dropped, {} wishlisted",
        stats.summary.total_vns,
        stats.summary.completed,
        stats.summary.playing,
        stats.summary.dropped,
        stats.summary.wishlist
    );
    if let Some(avg) = stats.summary.average_score {
        println!("  Average score: {avg:.1}");
    }
    if let Some(tags) = &snapshot.secondary {
        let names: Vec<&str> = tags.top_tags.iter().take(5).map(|t| t.name.as_str()).collect();
        if !names.is_empty() {
            println!("  Top tags: {}", names.join(", "));
        }
    }
}

async fn run_novels(
    config: &Config,
    db: &Database,
    prefs: &PreferenceManager,
    client: ApiClient,
    uid: EntityId,
    page: u32,
    query: Option<&str>,
) -> Result<()> {
    let state = ViewState {
        uid: Some(uid.clone()),
        tab: Tab::Novels,
        page: page.max(1),
        ..query.map(ViewState::from_query).unwrap_or_default()
    };
    let first_page = state.page == 1 && state.filters.is_default();
    let cache = SnapshotCache::with_freshness(db.clone(), config.freshness_window());

    let cached = if first_page {
        cache
            .read::<PageResult<NovelEntry>, ()>(SnapshotKind::Novels, &uid)
            .await
    } else {
        SnapshotRead::Absent
    };
    let fresh = cached.is_fresh();
    let cached = cached.into_snapshot();
    if let Some(snapshot) = &cached {
        print_novels(prefs.title_language(), &snapshot.primary);
        if fresh {
            return Ok(());
        }
        tracing::debug!(uid = %uid, "Novel list snapshot is stale, revalidating");
    }

    let (tx, mut rx) = mpsc::channel(8);
    let browser = PageBrowser::<NovelEntry>::new(
        uid.clone(),
        Tab::Novels,
        state.filters.clone(),
        config.prefetch_capacity(),
    );
    let driver = BrowseDriver::new(browser, NovelListSource::new(client), tx);
    let mut view = BrowsePage::open(UrlSync::new(state), driver);
    tracing::debug!(query = %view.query(), "Loading novels");

    while let Some(event) = rx.recv().await {
        match view.handle_event(event) {
            Outcome::Displayed => break,
            Outcome::Failed => {
                if cached.is_some() {
                    tracing::debug!(uid = %uid, "Revalidation failed, keeping cached list");
                    return Ok(());
                }
                if let LoadState::Failed(failure) = view.driver().browser().state() {
                    eprintln!("Error: {}", failure.message());
                    eprintln!("  View on VNDB: {}", failure.upstream_url);
                }
                std::process::exit(1);
            }
            Outcome::Prefetched | Outcome::Discarded => {}
        }
    }

    let Some(result) = view.driver().browser().current() else {
        return Ok(());
    };
    if cached.as_ref().map(|s| &s.primary) != Some(result) {
        if cached.is_some() {
            println!();
            println!("Updated:");
        }
        print_novels(prefs.title_language(), result);
    }
    if first_page {
        cache
            .write(SnapshotKind::Novels, &uid, &NovelsSnapshot::new(result.clone(), None))
            .await;
    }
    Ok(())
}

fn print_novels(lang: TitleLanguage, result: &PageResult<NovelEntry>) {
    for entry in &result.items {
        let title = lang.pick(&entry.title, entry.alt_title.as_deref());
        match entry.user_score {
            Some(score) => println!("{:>8}  {:>3}  {}", entry.id.as_str(), score, title),
            None => println!("{:>8}    -  {}", entry.id.as_str(), title),
        }
    }
    println!(
        "Page {} of {} ({} total)",
        result.page, result.total_pages, result.total_items
    );
}

async fn run_recommend(
    config: &Config,
    prefs: &PreferenceManager,
    client: ApiClient,
    uid: EntityId,
    query: Option<&str>,
) -> Result<()> {
    let filters = query
        .map(|q| ViewState::from_query(q).filters)
        .unwrap_or_default();
    let (tx, mut rx) = mpsc::channel(1);
    let mut loader = RecommendationLoader::new(client, config.retry, tx);
    loader.load(uid, filters);

    // Ctrl-C abandons the load, retries included.
    let interrupted = CancellationToken::new();
    let watcher = interrupted.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            watcher.cancel();
        }
    });

    let response = tokio::select! {
        response = rx.recv() => response,
        _ = interrupted.cancelled() => {
            loader.cancel();
            None
        }
    };
    let Some(response) = response else {
        return Ok(());
    };
    loader.handle_response(response);

    match loader.state() {
        RecommendationState::Ready(recs) => {
            let lang = prefs.title_language();
            for rec in &recs.items {
                let title = lang.pick(&rec.vn.name, rec.vn.original.as_deref());
                println!("{:>6.2}  {:>8}  {}", rec.score, rec.vn.id.as_str(), title);
            }
            Ok(())
        }
        RecommendationState::Failed(failure) => {
            eprintln!("Error: {}", failure.message());
            eprintln!("  {}", failure.detail);
            std::process::exit(1);
        }
        RecommendationState::Idle | RecommendationState::Loading => Ok(()),
    }
}
