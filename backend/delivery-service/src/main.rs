use actix_web::{middleware::Logger, web, App, HttpServer};
use delivery_service::{
    config, db, error, handlers, logging,
    realtime::{listener::run_change_listener, WorkspaceChannels},
    services::{FfmpegTranscoder, HttpObjectStorage, HttpRelayTransport, MediaStorage},
    state::{AppState, Integrations},
    store::PgStore,
};
use std::sync::Arc;
use tokio::task::JoinHandle;

#[actix_web::main]
async fn main() -> Result<(), error::AppError> {
    let cfg = Arc::new(config::Config::from_env()?);
    logging::init_tracing(cfg.log_format);

    let pool = db::init_pool(&cfg.database)
        .await
        .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;
    let store = Arc::new(PgStore::new(pool.clone()));
    let channels = WorkspaceChannels::new();

    let relay = HttpRelayTransport::new(cfg.relay_timeout)
        .map_err(|e| error::AppError::StartServer(format!("relay client: {e}")))?;
    let media_storage = cfg.media_storage.clone().map(|storage| {
        Arc::new(HttpObjectStorage::new(storage)) as Arc<dyn MediaStorage>
    });
    if media_storage.is_none() {
        tracing::warn!("MEDIA_STORAGE_URL/MEDIA_STORAGE_KEY not set, base64 media uploads are disabled");
    }
    let integrations = Integrations {
        relay: Arc::new(relay),
        media_storage,
        transcoder: Arc::new(FfmpegTranscoder::new(cfg.ffmpeg_path.clone()).with_timeout(cfg.transcode_timeout)),
    };

    let state = AppState::new(
        cfg.clone(),
        store.clone(),
        store.clone(),
        integrations,
        channels.clone(),
    );

    // Postgres LISTEN/NOTIFY -> per-workspace live subscribers
    let listener: JoinHandle<anyhow::Result<()>> =
        tokio::spawn(run_change_listener(pool, store, channels));

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting delivery-service");

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(handlers::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind {bind_addr}: {e}")))?
    .run();

    let result = server
        .await
        .map_err(|e| error::AppError::StartServer(format!("run server: {e}")));

    listener.abort();
    tracing::info!("delivery-service stopped");
    result
}
