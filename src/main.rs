use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use anyhow::Context;
use tracing::{error, info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use panel_server::openapi::ApiDoc;
use panel_server::reconcile::sweep_orphans;
use panel_server::repo::SqliteRepo;
use panel_server::routes::not_found;
use panel_server::storage::FsRenditionStore;
use panel_server::{configure, AppState, Config, ResponseHeaders};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds to reduce manual setup overhead.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    // A panicking handler takes down its worker, not the process; make sure it is logged.
    std::panic::set_hook(Box::new(|panic| {
        error!("panic: {panic}");
    }));

    info!("Bootstrapping panel server");
    let cfg = Config::from_env();

    let store = FsRenditionStore::open(cfg.upload_dir.clone(), cfg.thumb_dir.clone())
        .await
        .context("creating rendition directories")?;
    let repo = SqliteRepo::open(&cfg.database_path)
        .await
        .with_context(|| format!("opening metadata store {}", cfg.database_path.display()))?;
    info!("Metadata store ready at {}", cfg.database_path.display());

    if cfg.sweep_orphans {
        if let Err(e) = sweep_orphans(&repo, &store, cfg.sweep_grace).await {
            // leftover files are harmless; keep serving
            error!("orphan sweep failed: {e:#}");
        }
    }

    let state = web::Data::new(AppState {
        repo: Arc::new(repo),
        store: Arc::new(store),
        max_upload_bytes: cfg.max_upload_bytes,
        base_url: cfg.base_url.clone(),
    });
    let openapi = ApiDoc::openapi();

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(["GET", "POST", "OPTIONS"])
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(ResponseHeaders)
            .wrap(cors)
            .app_data(state.clone())
            .configure(configure)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
            .default_service(web::to(not_found))
    })
    .bind((cfg.host.as_str(), cfg.port))
    .with_context(|| format!("binding {}:{}", cfg.host, cfg.port))?;

    info!("Listening on http://{}:{} (public base {})", cfg.host, cfg.port, cfg.base_url);

    server.run().await?;
    Ok(())
}
