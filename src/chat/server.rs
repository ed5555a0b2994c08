/// Chat server core: listener and per-connection handler.
use std::error::Error;
use std::net::SocketAddr;
use std::time::Duration;

use futures::SinkExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::codec::ChunkCodec;
use super::command::Command;
use super::config::ServerConfig;
use super::log::ChatLog;
use super::registry::{Connection, Registry};
use super::router::{Admission, Router, ANONYMOUS, IDENTIFY_FIRST_NOTICE, REJECTED_NOTICE};

pub type BoxError = Box<dyn Error + Send + Sync>;

/// Pause after a failed accept so a persistent failure (e.g. out of file
/// descriptors) doesn't spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Per-connection settings copied out of [`ServerConfig`].
#[derive(Debug, Clone, Copy)]
struct Settings {
    allow_anonymous: bool,
    read_buffer: usize,
}

/// A bound chat server, ready to accept.
pub struct ChatServer {
    listener: TcpListener,
    router: Router,
    settings: Settings,
}

impl ChatServer {
    /// Bind the listener and open the chat log. Bind failure is returned to
    /// the caller; the server can't run without its port.
    pub async fn bind(config: &ServerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.bind).await?;
        info!(addr = %listener.local_addr()?, "tidechat listening");

        let log = match &config.log_file {
            Some(path) => ChatLog::open(path.clone()),
            None => ChatLog::disabled(),
        };
        log.log(&format!("Server started at {}", listener.local_addr()?));

        Ok(Self {
            listener,
            router: Router::new(Registry::shared(), log),
            settings: Settings {
                allow_anonymous: config.allow_anonymous,
                read_buffer: config.read_buffer,
            },
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Accept connections forever, one task per connection.
    pub async fn run(self) -> Result<(), BoxError> {
        let Self {
            listener,
            router,
            settings,
        } = self;

        loop {
            let (socket, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("accept failed: {e}");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            info!(%addr, "new connection");

            let router = router.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_client(socket, addr, &router, settings).await {
                    warn!(%addr, "client error: {e}");
                }
                info!(%addr, "disconnected");
            });
        }
    }
}

/// Bind and serve until the process exits.
pub async fn run(config: &ServerConfig) -> Result<(), BoxError> {
    ChatServer::bind(config).await?.run().await
}

/// Where a connection is in its lifecycle. Leaving the read loop is the
/// terminal state.
#[derive(Debug)]
enum Phase {
    /// Nothing received yet.
    Unidentified,
    /// Chatting as `name`. `admitted` is false for anonymous senders,
    /// which never enter the registry.
    Identified { name: String, admitted: bool },
    /// Turned away at the door under `name`, with the notice to send before
    /// closing.
    Rejected { name: String, notice: &'static str },
}

impl Phase {
    /// Name announced when the connection leaves.
    fn name(&self) -> &str {
        match self {
            Phase::Unidentified => ANONYMOUS,
            Phase::Identified { name, .. } | Phase::Rejected { name, .. } => name,
        }
    }
}

/// Handle a single client connection.
async fn handle_client(
    socket: TcpStream,
    addr: SocketAddr,
    router: &Router,
    settings: Settings,
) -> Result<(), BoxError> {
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let conn = Connection::new(addr, tx);
    let mut phase = Phase::Unidentified;

    let result = read_loop(socket, &conn, rx, router, settings, &mut phase).await;

    // The socket is closed by now; cleanup runs on every exit path.
    if let Err(e) = &result {
        router
            .log()
            .error(&format!("Error handling client '{}': {e}", phase.name()));
    }
    teardown(&conn, router, phase).await;

    result
}

async fn read_loop(
    socket: TcpStream,
    conn: &Connection,
    mut rx: mpsc::UnboundedReceiver<String>,
    router: &Router,
    settings: Settings,
    phase: &mut Phase,
) -> Result<(), BoxError> {
    let mut framed = Framed::new(socket, ChunkCodec::new(settings.read_buffer));

    loop {
        tokio::select! {
            // Incoming chunk from the client's TCP stream.
            chunk = framed.next() => {
                let command = match chunk {
                    Some(Ok(chunk)) => Command::parse(&chunk),
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()), // Connection closed.
                };

                if let Phase::Identified { name, .. } = phase {
                    router.route(conn, name.as_str(), command).await;
                } else {
                    *phase = first_command(conn, router, settings, command).await;
                    if let Phase::Rejected { notice, .. } = phase {
                        framed.send((*notice).to_owned()).await?;
                        return Ok(());
                    }
                }
            }

            // Outgoing frame queued by any handler, this one included.
            Some(frame) = rx.recv() => {
                framed.send(frame).await?;
            }
        }
    }
}

/// Handle the first chunk on a connection and decide what it becomes.
async fn first_command(
    conn: &Connection,
    router: &Router,
    settings: Settings,
    command: Command,
) -> Phase {
    match command {
        Command::Identify(name) => match router.admit(conn, &name).await {
            Admission::Admitted => Phase::Identified {
                name,
                admitted: true,
            },
            Admission::Rejected => Phase::Rejected {
                name,
                notice: REJECTED_NOTICE,
            },
        },
        first if settings.allow_anonymous => {
            debug!(conn = %conn.id, "chatting without /user");
            router.route(conn, ANONYMOUS, first).await;
            Phase::Identified {
                name: ANONYMOUS.into(),
                admitted: false,
            }
        }
        _ => Phase::Rejected {
            name: ANONYMOUS.into(),
            notice: IDENTIFY_FIRST_NOTICE,
        },
    }
}

/// Remove the connection and tell everyone it left. Runs however the
/// connection ended, including rejection and silent close.
async fn teardown(conn: &Connection, router: &Router, phase: Phase) {
    let admitted = matches!(phase, Phase::Identified { admitted: true, .. });
    info!(conn = %conn.id, user = %phase.name(), admitted, "leaving");
    router.depart(conn, phase.name()).await;
}
