//! The development server.
//!
//! Two listeners are involved:
//!
//! 1. **HTTP**: `axum` with `tower-http`'s `ServeDir`, serving the output
//!    root on a single-threaded `tokio` runtime in its own thread.
//! 2. **Reload**: a plain `tungstenite` WebSocket listener. Browsers connect
//!    to it through the script injected into every page in development mode
//!    and reload once they receive `"reload"`.
//!
//! Both sockets are bound before anything is built, so the reload port can
//! be baked into the generated pages.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use axum::Router;
use camino::{Utf8Path, Utf8PathBuf};
use console::style;
use tower_http::services::ServeDir;
use tracing::info;
use tungstenite::WebSocket;

use crate::error::ServerError;

const HTTP_PORT: u16 = 3000;
const RELOAD_PORT: u16 = 1337;
const MAX_CLIENTS: usize = 10;

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// A task finished in development mode, connected browsers should refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadEvent {
    pub task: String,
}

/// Bound but not yet running server sockets.
#[derive(Debug)]
pub struct DevServer {
    root: Utf8PathBuf,
    http: TcpListener,
    http_port: u16,
    reload: TcpListener,
    reload_port: u16,
}

impl DevServer {
    /// Binds both listeners.
    ///
    /// Without an explicit `port` the HTTP server tries 3000 and falls back
    /// to any free port. An explicitly requested port must be available.
    pub fn bind(root: impl Into<Utf8PathBuf>, port: Option<u16>) -> Result<Self, ServerError> {
        let http = match port {
            Some(port) => bind(port).map_err(|source| ServerError::Bind { port, source })?,
            None => reserve_port(HTTP_PORT)?,
        };
        let reload = reserve_port(RELOAD_PORT)?;

        Ok(Self {
            root: root.into(),
            http_port: local_port(&http)?,
            reload_port: local_port(&reload)?,
            http,
            reload,
        })
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn reload_port(&self) -> u16 {
        self.reload_port
    }

    /// Spawns the server threads.
    pub fn start(self) -> Result<ServerHandle, ServerError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ServerError::Runtime)?;

        self.http.set_nonblocking(true).map_err(ServerError::Socket)?;

        let clients = Clients::default();
        let (tx_reload, rx_reload) = channel();

        let thread_i = new_thread_ws_incoming(self.reload, clients.clone());
        let thread_o = new_thread_ws_reload(rx_reload, clients);

        let url = format!("http://localhost:{}/", self.http_port);
        info!(url = %style(&url).yellow(), "starting a HTTP server");

        let root = self.root;
        let http = self.http;
        let thread_http = thread::spawn(move || {
            if let Err(e) = runtime.block_on(serve_dir(http, &root)) {
                tracing::error!("HTTP server stopped: {e}");
            }
        });

        Ok(ServerHandle {
            http_port: self.http_port,
            reload_port: self.reload_port,
            reload: tx_reload,
            _threads: vec![thread_i, thread_o, thread_http],
        })
    }
}

/// A running dev server. The threads live until the process exits.
#[derive(Debug)]
pub struct ServerHandle {
    http_port: u16,
    reload_port: u16,
    reload: Sender<ReloadEvent>,
    _threads: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn reload_port(&self) -> u16 {
        self.reload_port
    }

    /// Where tasks deliver their [`ReloadEvent`]s.
    pub fn reload_sender(&self) -> Sender<ReloadEvent> {
        self.reload.clone()
    }

    pub fn url(&self) -> String {
        format!("http://localhost:{}/", self.http_port)
    }
}

/// Serves `root` until the process exits.
pub fn serve(root: impl Into<Utf8PathBuf>, port: Option<u16>) -> Result<ServerHandle, ServerError> {
    DevServer::bind(root, port)?.start()
}

async fn serve_dir(listener: TcpListener, root: &Utf8Path) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::from_std(listener)?;
    let router = Router::new()
        // path to the output root
        .fallback_service(ServeDir::new(root));

    axum::serve(listener, router).await
}

fn bind(port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port)))
}

fn reserve_port(preferred: u16) -> Result<TcpListener, ServerError> {
    match bind(preferred) {
        Ok(sock) => Ok(sock),
        Err(_) => bind(0).map_err(|source| ServerError::Bind { port: 0, source }),
    }
}

fn local_port(listener: &TcpListener) -> Result<u16, ServerError> {
    listener
        .local_addr()
        .map(|addr| addr.port())
        .map_err(ServerError::Socket)
}

fn new_thread_ws_incoming(server: TcpListener, clients: Clients) -> JoinHandle<()> {
    thread::spawn(move || {
        for stream in server.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("reload connection failed: {e}");
                    continue;
                }
            };

            match tungstenite::accept(stream) {
                Ok(socket) => clients
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(socket),
                Err(e) => tracing::warn!("reload handshake failed: {e}"),
            }
        }
    })
}

fn new_thread_ws_reload(rx: Receiver<ReloadEvent>, clients: Clients) -> JoinHandle<()> {
    thread::spawn(move || {
        while let Ok(event) = rx.recv() {
            // Tasks of one group finish close together, one reload is enough.
            let mut tasks = vec![event.task];
            tasks.extend(rx.try_iter().map(|e| e.task));
            tracing::debug!("reloading after {}", tasks.join(", "));

            let mut clients = clients.lock().unwrap_or_else(PoisonError::into_inner);
            broadcast(&mut clients);
        }
    })
}

/// Sends `"reload"` to every client. Clients that can't be reached anymore
/// are dropped, and only the 10 most recent connections are kept.
fn broadcast(clients: &mut Vec<WebSocket<TcpStream>>) {
    clients.retain_mut(|socket| match socket.send("reload".into()) {
        Ok(_) => true,
        Err(tungstenite::Error::Io(e)) => {
            tracing::debug!("dropping reload client: {e}");
            false
        }
        Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => false,
        Err(e) => {
            tracing::error!("Error: {e:?}");
            true
        }
    });

    // Close all but the last 10 connections
    let len = clients.len();
    if len > MAX_CLIENTS {
        for mut socket in clients.drain(0..len - MAX_CLIENTS) {
            socket.close(None).ok();
        }
    }
}
