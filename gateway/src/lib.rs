pub mod config;
pub mod errors;
pub mod failover;
pub mod headers;
pub mod metrics_defs;
mod proxy_service;
pub mod router;
pub mod session;
pub mod upstreams;

pub use errors::ProxyError;
pub use proxy_service::GatewayService;

use shared::admin_service::AdminService;
use shared::http::{run_http_service, serve};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;

/// Runs the gateway and admin listeners until either fails.
pub async fn run(config: config::Config) -> Result<(), ProxyError> {
    let service = GatewayService::new(&config)?;
    let ready = Arc::new(AtomicBool::new(false));

    let ready_check = ready.clone();
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::<_, ProxyError>::new(move || ready_check.load(Ordering::Relaxed)),
    );

    let gateway_task = serve_gateway(&config.listener, service, ready);

    tokio::try_join!(gateway_task, admin_task)?;
    Ok(())
}

/// Binds the proxy listener, flips readiness, then serves.
async fn serve_gateway(
    listener: &config::Listener,
    service: GatewayService,
    ready: Arc<AtomicBool>,
) -> Result<(), ProxyError> {
    let listener = TcpListener::bind(format!("{}:{}", listener.host, listener.port)).await?;
    ready.store(true, Ordering::Relaxed);
    serve(listener, service).await
}
