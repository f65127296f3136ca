//! WebSocket server built on warp.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use warp::ws::{Message, WebSocket};
use warp::{Filter, Rejection, Reply};

use playsync_coordinator::Transport;

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::router::{CloseReason, ConnectionEvent, ConnectionRouter, Outgoing};

/// WebSocket server for coordinator clients.
///
/// Binds on start, serves `GET /ws` and `GET /health`, and reports every
/// connection through the event channel given to [`SyncServer::start`].
///
/// # Example
///
/// ```no_run
/// use tokio::sync::mpsc;
/// use ws_server::{ServerConfig, SyncServer};
///
/// #[tokio::main]
/// async fn main() {
///     let (tx, _rx) = mpsc::unbounded_channel();
///     let server = SyncServer::start(ServerConfig::default().with_port(3000), tx)
///         .await
///         .expect("Failed to start server");
///
///     println!("Listening on {}", server.local_addr());
///     server.shutdown().await.unwrap();
/// }
/// ```
pub struct SyncServer {
    local_addr: SocketAddr,
    router: Arc<ConnectionRouter>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    server_handle: Option<JoinHandle<()>>,
}

impl SyncServer {
    /// Bind and start serving.
    ///
    /// # Arguments
    ///
    /// * `config` - Validated before binding
    /// * `event_sender` - Channel receiving connection lifecycle and messages
    ///
    /// # Returns
    ///
    /// The running server, or an error if the config is invalid or the
    /// address cannot be bound.
    pub async fn start(
        config: ServerConfig,
        event_sender: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Result<Self> {
        config.validate()?;

        let router = Arc::new(ConnectionRouter::new(
            event_sender,
            config.outbound_capacity,
        ));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let (local_addr, server) = warp::serve(routes(&config, router.clone()))
            .try_bind_with_graceful_shutdown(config.bind_addr, async move {
                shutdown_rx.recv().await;
            })
            .map_err(|source| ServerError::Bind {
                addr: config.bind_addr,
                source,
            })?;

        info!(addr = %local_addr, "WebSocket server listening");
        let server_handle = tokio::spawn(server);

        Ok(Self {
            local_addr,
            router,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    /// The bound address, with the real port when port 0 was requested
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn router(&self) -> &Arc<ConnectionRouter> {
        &self.router
    }

    /// The router as the coordinator's outbound transport
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.router.clone()
    }

    /// Close every socket, stop accepting and wait for the server task
    pub async fn shutdown(mut self) -> Result<()> {
        self.router.close_all();

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.server_handle.take() {
            handle.await?;
        }

        info!("WebSocket server stopped");
        Ok(())
    }
}

/// The server's warp filter
///
/// Exposed so the routes can be exercised with `warp::test` without binding.
pub fn routes(
    config: &ServerConfig,
    router: Arc<ConnectionRouter>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| "ok");

    let max_size = config.max_frame_size;
    let socket = warp::path("ws")
        .and(warp::path::end())
        .and(origin_check(Arc::new(config.clone())))
        .and(warp::ws())
        .map(move |ws: warp::ws::Ws| {
            let router = router.clone();
            ws.max_message_size(max_size)
                .max_frame_size(max_size)
                .on_upgrade(move |socket| handle_socket(socket, router))
        });

    health.or(socket).recover(handle_rejection)
}

fn origin_check(
    config: Arc<ServerConfig>,
) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>("origin")
        .and_then(move |origin: Option<String>| {
            let config = config.clone();
            async move {
                if config.origin_allowed(origin.as_deref()) {
                    Ok(())
                } else {
                    warn!(origin = ?origin, "Rejected WebSocket handshake from disallowed origin");
                    Err(warp::reject::custom(ForbiddenOrigin))
                }
            }
        })
        .untuple_one()
}

async fn handle_socket(socket: WebSocket, router: Arc<ConnectionRouter>) {
    let (id, mut outgoing) = router.open();
    let (mut sink, mut stream) = socket.split();

    let reason = loop {
        tokio::select! {
            queued = outgoing.recv() => match queued {
                Some(Outgoing::Frame(text)) => {
                    if let Err(e) = sink.send(Message::text(text)).await {
                        debug!(connection = %id, error = %e, "Write failed");
                        break CloseReason::TransportClose;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = sink.send(Message::close()).await;
                    break CloseReason::ServerDisconnect;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(message)) if message.is_close() => break CloseReason::ClientDisconnect,
                Some(Ok(message)) => {
                    // Binary and control frames carry no events
                    if let Ok(text) = message.to_str() {
                        router.route_frame(&id, text);
                    }
                }
                Some(Err(e)) => {
                    debug!(connection = %id, error = %e, "Read failed");
                    break CloseReason::TransportClose;
                }
                None => break CloseReason::TransportClose,
            },
        }
    };

    let _ = sink.close().await;
    router.close(&id, reason);
}

#[derive(Debug)]
struct ForbiddenOrigin;

impl warp::reject::Reject for ForbiddenOrigin {}

async fn handle_rejection(err: Rejection) -> std::result::Result<impl Reply, Infallible> {
    let code;
    let message;

    if err.is_not_found() {
        code = warp::http::StatusCode::NOT_FOUND;
        message = "Not found";
    } else if err.find::<ForbiddenOrigin>().is_some() {
        code = warp::http::StatusCode::FORBIDDEN;
        message = "Origin not allowed";
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        code = warp::http::StatusCode::METHOD_NOT_ALLOWED;
        message = "Method not allowed";
    } else {
        code = warp::http::StatusCode::BAD_REQUEST;
        message = "Bad request";
    }

    Ok(warp::reply::with_status(message, code))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(config: ServerConfig) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
        let (tx, _rx) = mpsc::unbounded_channel();
        routes(&config, Arc::new(ConnectionRouter::new(tx, 8)))
    }

    #[tokio::test]
    async fn test_health() {
        let response = warp::test::request()
            .path("/health")
            .reply(&filter(ServerConfig::local()))
            .await;

        assert_eq!(response.status(), 200);
        assert_eq!(response.body(), "ok");
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let response = warp::test::request()
            .path("/nope")
            .reply(&filter(ServerConfig::local()))
            .await;

        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_plain_get_on_socket_path_is_rejected() {
        let response = warp::test::request()
            .path("/ws")
            .reply(&filter(ServerConfig::local()))
            .await;

        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_disallowed_origin() {
        let config = ServerConfig::local().with_allowed_origins(["https://remote.example"]);
        let response = warp::test::request()
            .path("/ws")
            .header("origin", "https://evil.example")
            .reply(&filter(config))
            .await;

        assert_eq!(response.status(), 403);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let server = SyncServer::start(ServerConfig::local(), tx).await.unwrap();

        assert_ne!(server.local_addr().port(), 0);
        assert_eq!(server.router().connection_count(), 0);
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = SyncServer::start(ServerConfig::local().with_max_frame_size(0), tx).await;
        assert!(matches!(result, Err(ServerError::Configuration(_))));
    }
}
