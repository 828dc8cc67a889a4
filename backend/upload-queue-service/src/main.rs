/// Upload Queue Service - HTTP server
///
/// Accepts image upload submissions, schedules them through the priority
/// queue, and hands compressed payloads to the analysis pipeline.
use actix_web::{middleware as actix_middleware, web, App, HttpResponse, HttpServer};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use upload_queue_service::handlers;
use upload_queue_service::metrics;
use upload_queue_service::services::{HttpAnalysisClient, UploadQueueService};
use upload_queue_service::Config;

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("upload_queue_service=info".parse().expect("valid directive")),
        )
        .init();

    // Load configuration from environment
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load configuration");

    let bind_address = format!("{}:{}", config.app.host, config.app.port);
    let drain_timeout = Duration::from_secs(30);

    let analysis = Arc::new(HttpAnalysisClient::new(&config.analysis));
    let service = Arc::new(UploadQueueService::new(config, analysis));

    // Dispatcher loop runs beside the HTTP server until shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = tokio::spawn(service.clone().run(shutdown_rx));

    let service_data = web::Data::new(service.clone());
    let server = HttpServer::new(move || {
        App::new()
            .app_data(service_data.clone())
            .wrap(actix_middleware::Logger::default())
            .route(
                "/api/v1/health",
                web::get()
                    .to(|| async { HttpResponse::Ok().json(serde_json::json!({"status": "ok"})) }),
            )
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .service(
                web::scope("/api/v1")
                    .service(
                        web::scope("/uploads")
                            .route("", web::post().to(handlers::enqueue_upload))
                            .route("/{upload_id}", web::get().to(handlers::get_upload_status)),
                    )
                    .service(
                        web::scope("/queue")
                            .route("/stats", web::get().to(handlers::queue_stats))
                            .route("/health", web::get().to(handlers::queue_health))
                            .route("/{queue_name}", web::delete().to(handlers::clear_queue)),
                    ),
            )
    })
    .bind(&bind_address)?
    .run();

    info!(%bind_address, "Upload queue service listening");
    server.await?;

    // The server returns on SIGINT/SIGTERM; stop the dispatcher and drain
    let _ = shutdown_tx.send(true);
    service.shutdown(drain_timeout).await;
    let _ = dispatcher.await;

    info!("Upload queue service stopped");
    Ok(())
}
