use std::sync::Arc;

use clap::Parser;
use rusqlite::params;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use treehole::anonyname::NamePool;
use treehole::config::{Cli, Command, Config};
use treehole::db;
use treehole::db::models::Floor;
use treehole::floor::{self, attach_prefetch, reaction_summary, set_reaction};
use treehole::search::{self, ElasticIndex, SearchIndex, SearchQuery, SearchQueue};
use treehole::state::{AppState, DbPool};
use treehole::views::ViewCountBatcher;

const REINDEX_CHUNK: i64 = 1000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging; stdout carries command output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::debug!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    // Initialize database
    let pool = db::create_pool(&config.db_path())?;
    db::run_migrations(&pool)?;

    if matches!(cli.command, Command::Migrate) {
        return Ok(());
    }

    let names = match &config.names.path {
        Some(path) => NamePool::from_file(path)?,
        None => NamePool::embedded()?,
    };

    // Search index and its outbound workers
    let (queue, index, workers) = match &config.search.url {
        Some(url) => {
            let index: Arc<dyn SearchIndex> = Arc::new(ElasticIndex::new(
                url,
                config.search.timeout(),
                config.search.bulk_budget_bytes,
            )?);
            let (queue, lanes) = SearchQueue::channel(config.search.workers);
            let workers = search::spawn_workers(index.clone(), lanes);
            tracing::info!(url = %url, workers = config.search.workers, "Search index enabled");
            (queue, Some(index), workers)
        }
        None => {
            tracing::info!("Search index disabled, using database search");
            (SearchQueue::disabled(), None, Vec::new())
        }
    };

    let state = AppState::new(pool, config, Arc::new(names), queue, index);
    let result = run(&state, cli.command).await;

    // Let queued index updates finish before exiting
    drop(state);
    for worker in workers {
        worker.await?;
    }

    result
}

async fn run(state: &AppState, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Migrate => {}
        Command::NewHole { user, content } => {
            let (hole, floor) = state.sequencer.create_hole(user, &content)?;
            print_json(&serde_json::json!({ "hole": hole, "floor": floor }))?;
        }
        Command::Post {
            hole,
            user,
            reply_to,
            content,
        } => {
            let floor = state.sequencer.create_floor(hole, user, &content, reply_to)?;
            print_json(&floor)?;
        }
        Command::React { floor, user, value } => {
            let score = set_reaction(&state.db, floor, user, value)?;
            let conn = state.db.get()?;
            let summary = reaction_summary(&conn, floor, user)?;
            print_json(&serde_json::json!({ "score": score, "reactions": summary }))?;
        }
        Command::Delete {
            floor,
            user,
            reason,
        } => {
            let floor = state.moderation.delete_floor(floor, user, &reason)?;
            print_json(&floor)?;
        }
        Command::Show { hole } => {
            let (views, batcher) =
                ViewCountBatcher::spawn(state.db.clone(), state.config.views.flush_interval());
            let floors = {
                let conn = state.db.get()?;
                floor::get_hole(&conn, hole)?;
                floor::list_floors(&conn, hole)?
            };
            views.record(hole);
            drop(views);
            batcher.await?;
            print_json(&floors)?;
        }
        Command::Holes { limit } => {
            let conn = state.db.get()?;
            let mut holes = floor::list_holes(&conn, limit)?;
            attach_prefetch(&conn, &mut holes, state.config.floors.prefetch_size)?;
            print_json(&holes)?;
        }
        Command::Search {
            keyword,
            accurate,
            offset,
            size,
        } => {
            let mut query = SearchQuery::new(keyword);
            query.accurate = accurate;
            query.offset = offset;
            query.size = size;
            let floors = search::search_floors(&state.db, state.index.as_deref(), &query).await?;
            print_json(&floors)?;
        }
        Command::Reindex => {
            if !state.search.is_enabled() {
                anyhow::bail!("no search index configured");
            }
            let count = reindex(&state.db, &state.search)?;
            tracing::info!(count, "Reindex queued");
        }
    }
    Ok(())
}

/// Queue every indexable floor in id order, one bulk task per chunk.
fn reindex(db: &DbPool, queue: &SearchQueue) -> anyhow::Result<usize> {
    let conn = db.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM floor
         WHERE id > ?1 AND deleted = 0 AND sensitive = 0
           AND hole_id IN (SELECT id FROM hole WHERE hidden = 0)
         ORDER BY id LIMIT ?2",
        Floor::COLUMNS
    ))?;

    let mut last_id = 0;
    let mut total = 0;
    loop {
        let chunk = stmt
            .query_map(params![last_id, REINDEX_CHUNK], Floor::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        let Some(last) = chunk.last() else {
            break;
        };
        last_id = last.id;
        total += chunk.len();
        queue.bulk_index(&chunk);
    }
    Ok(total)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
