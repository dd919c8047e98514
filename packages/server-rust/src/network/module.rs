//! Network module with deferred startup lifecycle.
//!
//! `new()` wires shared state, `start()` binds the TCP listener, and
//! `serve()` accepts connections until shutdown. The split lets the binary
//! learn the bound port and attach devices between `start()` and `serve()`.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::{NetworkConfig, TlsConfig};
use super::handlers::{
    authenticate_handler, clear_callback_handler, get_callback_handler, health_handler,
    list_endpoints_handler, liveness_handler, pull_handler, read_handler, readiness_handler,
    set_callback_handler, subscribe_handler, unsubscribe_handler, version_handler, write_handler,
    AppState,
};
use super::middleware::{build_http_layers, track_in_flight};
use super::shutdown::ShutdownController;
use crate::auth::{require_token, JwtAuthenticator};
use crate::service::Gateway;
use crate::transport::EndpointDirectory;

/// Manages the full HTTP server lifecycle.
///
/// Follows the deferred startup pattern:
/// 1. `new()` -- allocates shared state (shutdown controller)
/// 2. `start()` -- binds TCP listener to the configured address
/// 3. `serve()` -- begins accepting connections until shutdown is signalled
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    gateway: Arc<Gateway>,
    directory: Arc<EndpointDirectory>,
    auth: Arc<JwtAuthenticator>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    /// Creates a new network module without binding any port.
    #[must_use]
    pub fn new(
        config: NetworkConfig,
        gateway: Arc<Gateway>,
        directory: Arc<EndpointDirectory>,
        auth: Arc<JwtAuthenticator>,
    ) -> Self {
        Self {
            config,
            listener: None,
            gateway,
            directory,
            auth,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    /// Returns a shared reference to the shutdown controller.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `POST /authenticate`, `GET /version`
    /// - `GET /health`, `/health/live`, `/health/ready`
    /// - `GET /endpoints`, `GET|POST /endpoints/{name}/{*path}`
    /// - `PUT|DELETE /subscriptions/{name}/{*path}`
    /// - `GET /notification/pull`, `PUT|GET|DELETE /notification/callback`
    pub fn build_router(&self) -> Router {
        let state = AppState {
            gateway: Arc::clone(&self.gateway),
            directory: Arc::clone(&self.directory),
            auth: Arc::clone(&self.auth),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(self.config.clone()),
            start_time: Instant::now(),
        };

        Router::new()
            .route("/authenticate", post(authenticate_handler))
            .route("/version", get(version_handler))
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/endpoints", get(list_endpoints_handler))
            .route(
                "/endpoints/{name}/{*path}",
                get(read_handler).post(write_handler),
            )
            .route(
                "/subscriptions/{name}/{*path}",
                put(subscribe_handler).delete(unsubscribe_handler),
            )
            .route("/notification/pull", get(pull_handler))
            .route(
                "/notification/callback",
                put(set_callback_handler)
                    .get(get_callback_handler)
                    .delete(clear_callback_handler),
            )
            .layer(axum::middleware::from_fn_with_state(
                Arc::clone(&self.auth),
                require_token,
            ))
            .layer(axum::middleware::from_fn_with_state(
                Arc::clone(&self.shutdown),
                track_in_flight,
            ))
            .layer(DefaultBodyLimit::max(self.config.max_body_bytes))
            .layer(build_http_layers(&self.config))
            .with_state(state)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which differs from the configured one
    /// when port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, "TCP listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves requests until `shutdown` resolves, then drains.
    ///
    /// After the shutdown signal the health state moves to `Draining`, new
    /// requests get 503, and in-flight ones get up to the configured drain
    /// timeout to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called, if TLS material cannot
    /// be loaded, or on a fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let router = self.build_router();

        self.shutdown.set_ready();

        match self.config.tls.clone() {
            Some(tls) => serve_tls(listener, router, &tls, shutdown).await?,
            None => serve_plain(listener, router, shutdown).await?,
        }

        drain(&self.shutdown, &self.config).await;
        Ok(())
    }
}

async fn serve_plain(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("Serving plain HTTP connections");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Serves TLS connections using `axum-server` with rustls.
///
/// Reuses the pre-bound TCP listener by converting it to a `std::net::TcpListener`.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls: &TlsConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load TLS certificates: {e}"))?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        shutdown.await;
        shutdown_handle.graceful_shutdown(None);
    });

    info!(%addr, "Serving TLS connections");

    axum_server::from_tcp_rustls(std_listener, rustls_config)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;
    Ok(())
}

async fn drain(shutdown: &ShutdownController, config: &NetworkConfig) {
    shutdown.trigger_shutdown();

    if shutdown.wait_for_drain(config.drain_timeout).await {
        info!("All requests drained");
    } else {
        warn!(
            in_flight = shutdown.in_flight_count(),
            "Drain timeout expired with in-flight requests remaining"
        );
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::network::handlers::testing::app_state;

    fn module() -> NetworkModule {
        let state = app_state();
        NetworkModule::new(
            NetworkConfig {
                port: 0,
                host: "127.0.0.1".to_string(),
                ..NetworkConfig::default()
            },
            state.gateway,
            state.directory,
            state.auth,
        )
    }

    #[test]
    fn new_creates_module_without_binding() {
        assert!(module().listener.is_none());
    }

    #[test]
    fn shutdown_controller_returns_shared_arc() {
        let module = module();
        assert!(Arc::ptr_eq(
            &module.shutdown_controller(),
            &module.shutdown_controller()
        ));
    }

    #[tokio::test]
    async fn router_serves_version() {
        let response = module()
            .build_router()
            .oneshot(Request::get("/version").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn start_binds_to_os_assigned_port() {
        let mut module = module();
        let port = module.start().await.unwrap();
        assert!(port > 0);
        assert!(module.listener.is_some());
    }

    #[tokio::test]
    async fn serve_without_start_is_an_error() {
        let result = module().serve(std::future::pending::<()>()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn serve_drains_on_shutdown() {
        let mut module = module();
        module.start().await.unwrap();
        let controller = module.shutdown_controller();

        module.serve(async {}).await.unwrap();
        assert_eq!(controller.health_state(), crate::network::HealthState::Stopped);
    }
}
