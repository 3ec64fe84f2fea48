mod auth;
mod context;
mod errors;
mod protocol;
mod rest;
mod ws;

use std::env;
use std::net::{Ipv6Addr, SocketAddr};
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use log::info;
use poker_collab::Collab;
use poker_core::RuntimeConfig;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub use context::ServerContext;
pub use errors::{ServerError, ServerResult};

/// The default port the server listens on.
pub const DEFAULT_PORT: u16 = 8900;

/// Builds the full application router: `GET /ws/room/{roomId}` (the
/// ConnectionGateway) plus the `/reports/export` and `/jobs/{jobId}` REST
/// endpoints, behind a permissive CORS layer. Exposed separately from
/// [run_server] so tests can bind it to an ephemeral port.
pub fn app(context: ServerContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws/room/:room_id", get(ws::ws_upgrade))
        .merge(rest::router())
        .with_state(context)
        .layer(cors)
}

/// Starts the HTTP/WebSocket server.
pub async fn run_server(collab: Collab, runtime_config: RuntimeConfig) {
    let context = ServerContext {
        collab: Arc::new(collab),
        runtime_config: Arc::new(runtime_config),
    };

    let port = env::var("POKER_SERVER_PORT")
        .map(|x| x.parse::<u16>().expect("port must be a number"))
        .unwrap_or(DEFAULT_PORT);

    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();

    let listener = TcpListener::bind(&addr).await.expect("listens on address");

    info!("poker-server listening on {addr}");

    axum::serve(listener, app(context).into_make_service()).await.unwrap();
}
