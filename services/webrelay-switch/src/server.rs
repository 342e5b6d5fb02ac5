//! HTTP adapter
//!
//! Every request is handed to the [`RequestRouter`] through a single axum
//! fallback handler. Query parameters and, for non-GET requests,
//! form-encoded body parameters are merged into one parameter list.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::{FormRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::{Method as HttpMethod, StatusCode, Uri};
use axum::{Form, Json, Router};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::device::SwitchDevice;
use crate::error::Result;
use crate::request::{AlpacaRequest, Method};
use crate::response::AlpacaResponse;
use crate::router::RequestRouter;

type Params = Vec<(String, String)>;

/// Shared state of the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    device: Arc<Mutex<SwitchDevice>>,
    router: RequestRouter,
    restart: CancellationToken,
}

impl AppState {
    /// `restart` is cancelled once a request asks for the device to restart
    pub fn new(device: Arc<Mutex<SwitchDevice>>, restart: CancellationToken) -> Self {
        Self {
            device,
            router: RequestRouter::new(),
            restart,
        }
    }
}

/// Build the axum router serving the switch API
pub fn build_router(state: AppState) -> Router {
    Router::new().fallback(handle).with_state(state)
}

async fn handle(
    State(state): State<AppState>,
    method: HttpMethod,
    uri: Uri,
    query: std::result::Result<Query<Params>, QueryRejection>,
    form: std::result::Result<Form<Params>, FormRejection>,
) -> (StatusCode, Json<AlpacaResponse>) {
    let method = Method::parse(method.as_str());
    let mut request = AlpacaRequest::new(method, uri.path());
    if let Ok(Query(params)) = query {
        request = request.with_params(params);
    }
    // Form reads the query string itself for GET requests
    if method != Method::Get {
        if let Ok(Form(params)) = form {
            request = request.with_params(params);
        }
    }

    let outcome = {
        let mut device = state.device.lock().await;
        state.router.dispatch(&mut device, &request).await
    };
    if outcome.restart {
        info!("Restart requested by {} {}", request.method, request.path);
        state.restart.cancel();
    }

    let status =
        StatusCode::from_u16(outcome.response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(outcome.response))
}

/// A server bound to its listen address, ready to start
pub struct BoundServer {
    listener: TcpListener,
    listen_addr: SocketAddr,
    device: Arc<Mutex<SwitchDevice>>,
    shutdown: CancellationToken,
}

impl BoundServer {
    pub fn new(listener: TcpListener, device: SwitchDevice) -> Result<Self> {
        let listen_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            listen_addr,
            device: Arc::new(Mutex::new(device)),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Handle on the device served by this server
    pub fn device(&self) -> Arc<Mutex<SwitchDevice>> {
        Arc::clone(&self.device)
    }

    /// Token that stops the server when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve until shut down.
    ///
    /// A restart request drains the server, rebuilds the device from its
    /// store and serves again on the same address.
    pub async fn start(self) -> Result<()> {
        let BoundServer {
            mut listener,
            listen_addr,
            device,
            shutdown,
        } = self;

        let shutdown_on_signal = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                shutdown_on_signal.cancel();
            }
        });

        loop {
            let restart = CancellationToken::new();
            let app = build_router(AppState::new(Arc::clone(&device), restart.clone()));
            let stop = shutdown.clone();
            let restart_requested = restart.clone();

            info!("Serving switch API on http://{}", listen_addr);
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    tokio::select! {
                        _ = restart_requested.cancelled() => {}
                        _ = stop.cancelled() => {}
                    }
                })
                .await?;

            if shutdown.is_cancelled() {
                break;
            }

            {
                let mut device = device.lock().await;
                device.reboot();
                device.restore_outputs().await;
            }
            listener = TcpListener::bind(listen_addr).await?;
            debug!("Rebound to {}", listen_addr);
        }

        info!("Server stopped");
        Ok(())
    }
}
