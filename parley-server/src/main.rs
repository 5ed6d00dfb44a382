use std::sync::Arc;

use clap::Parser;
use parley_core::{
    create_embedding_backend, create_generation_backend, EmbeddingBackend, GenerationBackend,
    ParleyConfig,
};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use parley_server::http::{start_http_server, HttpState};
use parley_server::status::WatchStatusSink;
use parley_server::subsystems::accounts::{AccountStore, PgAccountStore};
use parley_server::subsystems::conversations::PgConversationStore;
use parley_server::subsystems::dispatch::Dispatcher;
use parley_server::subsystems::reply::ReplyGenerator;
use parley_server::subsystems::retrieve::{KnowledgeRetriever, PgChunkSource};
use parley_server::subsystems::session::SessionManager;
use parley_server::transport::BridgeConnector;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "parley.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience; production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match ParleyConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over [service] log_level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.service.log_level.as_str()));
    fmt().with_env_filter(filter).init();

    let pool = match parley_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match parley_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ PostgreSQL connected: {}", v),
            Err(e) => {
                println!("❌ PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }

        match parley_core::db::check_pgvector(&pool).await {
            Ok(v) => println!("✅ pgvector version: {}", v),
            Err(e) => {
                println!("❌ pgvector check failed: {}", e);
                std::process::exit(1);
            }
        }

        match parley_core::db::missing_tables(&pool).await {
            Ok(missing) if missing.is_empty() => println!("✅ Schema: all tables present"),
            Ok(missing) => {
                println!("❌ Schema incomplete, missing: {}", missing.join(", "));
                std::process::exit(1);
            }
            Err(e) => {
                println!("❌ Schema check failed: {}", e);
                std::process::exit(1);
            }
        }

        println!("✅ Parley DB health check passed");
        return Ok(());
    }

    let accounts: Arc<dyn AccountStore> = Arc::new(PgAccountStore::new(pool.clone()));
    let ctx = match accounts.load_account_context(config.account.id).await {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Failed to resolve account context: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(
        organization_id = %ctx.organization_id,
        account_id = %ctx.account_id,
        "Bound to account"
    );

    let embedder: Arc<dyn EmbeddingBackend> = Arc::from(create_embedding_backend(&config)?);
    let generation: Arc<dyn GenerationBackend> = Arc::from(create_generation_backend(&config)?);

    let retriever = Arc::new(KnowledgeRetriever::new(
        embedder,
        Arc::new(PgChunkSource::new(pool.clone())),
        config.retrieval.clone(),
    ));
    let generator = Arc::new(ReplyGenerator::new(
        generation,
        config.generation.system_prompt.clone(),
        config.retrieval.max_snippets,
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        ctx,
        retriever.clone(),
        generator,
        Arc::new(PgConversationStore::new(pool.clone())),
        config.dispatcher.clone(),
    ));

    let status_sink = Arc::new(WatchStatusSink::new());

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    if config.http.enabled {
        let state = Arc::new(HttpState {
            pool: pool.clone(),
            config: config.clone(),
            context: ctx,
            retriever,
            status: status_sink.subscribe(),
        });
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = start_http_server(state, http_shutdown).await {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    // The bridge keeps its auth state in the first session directory.
    let session_dir = config
        .session
        .expanded_dirs()
        .first()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let connector = Arc::new(BridgeConnector::new(config.transport.clone(), session_dir));

    let manager = SessionManager::new(
        ctx,
        connector,
        accounts,
        status_sink,
        dispatcher,
        config.session.clone(),
    );
    let session = manager.run(tx.subscribe()).await;
    tracing::info!(status = %session.status, "Parley stopped");

    Ok(())
}
