use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use textboard::openapi::ApiDoc;
use textboard::repo::Repo;
use textboard::storage::build_media_store;
use textboard::word_filter::WordFilterStore;
use textboard::{configure, AppState, Board, BoardConfig};

#[cfg(feature = "postgres-store")]
async fn postgres_repo() -> anyhow::Result<Option<Arc<dyn Repo>>> {
    use sqlx::postgres::PgPoolOptions;
    let Ok(db_url) = std::env::var("DATABASE_URL") else {
        return Ok(None);
    };
    let pool = PgPoolOptions::new().max_connections(5).connect(&db_url).await?;
    let repo = textboard::repo::pg::PgRepo::new(pool);
    repo.migrate().await?;
    info!("Using Postgres repository backend");
    Ok(Some(Arc::new(repo)))
}

#[cfg(not(feature = "postgres-store"))]
async fn postgres_repo() -> anyhow::Result<Option<Arc<dyn Repo>>> {
    Ok(None)
}

#[cfg(feature = "inmem-store")]
fn inmem_repo(cfg: &BoardConfig) -> anyhow::Result<Option<Arc<dyn Repo>>> {
    info!("Using in-memory repository backend (snapshot in {})", cfg.data_dir.display());
    let repo = textboard::repo::inmem::InMemRepo::in_dir(&cfg.data_dir)?;
    Ok(Some(Arc::new(repo)))
}

#[cfg(not(feature = "inmem-store"))]
fn inmem_repo(_cfg: &BoardConfig) -> anyhow::Result<Option<Arc<dyn Repo>>> {
    Ok(None)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds to reduce manual setup overhead.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    validate_env_vars()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping textboard");
    let cfg = BoardConfig::from_env();
    textboard::metrics::setup(cfg.metrics_addr.as_deref())?;

    let repo = match postgres_repo().await? {
        Some(repo) => repo,
        None => inmem_repo(&cfg)?
            .ok_or_else(|| anyhow::anyhow!("no repository backend: set DATABASE_URL or enable inmem-store"))?,
    };

    let board = Board::new(
        repo,
        build_media_store(&cfg.media_dir, cfg.max_upload_bytes).await?,
        WordFilterStore::load(&cfg.word_filter_path),
        &cfg,
    );
    board.settings().seed_defaults().await?;

    // uploads are also swept on every new upload; this covers quiet periods
    let sweeper = board.clone();
    let every = std::time::Duration::from_secs(cfg.upload_ttl_secs.clamp(60, 3600) as u64);
    actix_web::rt::spawn(async move {
        let mut tick = tokio::time::interval(every);
        loop {
            tick.tick().await;
            sweeper.sweep_uploads(chrono::Utc::now()).await;
        }
    });

    let openapi = ApiDoc::openapi();
    info!("OpenAPI spec generated");

    let state = web::Data::new(AppState { board });
    let server = HttpServer::new(move || {
        let mut cors = Cors::default()
            .allow_any_header()
            .allowed_methods(["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
            .supports_credentials()
            .max_age(3600);
        if let Ok(front) = std::env::var("FRONTEND_URL") {
            cors = cors.allowed_origin(&front);
        }

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(cors)
            .app_data(state.clone())
            .configure(configure)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(cfg.bind_addr.as_str())?;

    info!("Listening on http://{}", cfg.bind_addr);

    server.run().await?;
    Ok(())
}

/// Moderator tokens are signed with JWT_SECRET; refuse to start without a usable one.
fn validate_env_vars() -> anyhow::Result<()> {
    match std::env::var("JWT_SECRET") {
        Err(_) => anyhow::bail!("JWT_SECRET must be set (copy .env.example to .env and configure it)"),
        Ok(secret) if secret.len() < 32 => anyhow::bail!("JWT_SECRET must be at least 32 characters long"),
        Ok(_) => Ok(()),
    }
}
