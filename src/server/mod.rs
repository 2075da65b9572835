//! Server mode - accepts client connections and pushes the source archive
//! to one of them on every scheduler tick.
//!
//! Each connection is owned by one supervisor task. The supervisor reads the
//! REGISTER frame, registers the client, then writes queued chunks to the
//! socket until the connection is evicted, the peer hangs up, or the server
//! shuts down. On exit it removes its own registration.

pub mod registry;
pub mod scheduler;

pub use registry::{RegisteredClient, Registry, RegistrationToken};
pub use scheduler::{Scheduler, SchedulerConfig, TickOutcome};

use crate::error::{PushError, Result};
use crate::streaming::protocol::{self as wire, Fatal, FatalCode, MessageType, Register};
use crate::streaming::{chunk_channel, ChunkSource, Sender, SenderConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on
    pub listen: String,
    /// Bytes per Pending chunk
    pub chunk_size: usize,
    /// Broadcast settings
    pub scheduler: SchedulerConfig,
}

/// A bound push server.
pub struct Server {
    listener: TcpListener,
    registry: Registry,
    scheduler: Arc<Scheduler>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let sender_config = SenderConfig {
            chunk_size: config.chunk_size,
        };
        sender_config.validate()?;

        let listener = TcpListener::bind(&config.listen).await?;
        let registry = Registry::new();
        let sender = Sender::new(sender_config);
        let scheduler = Scheduler::new(registry.clone(), sender, config.scheduler);

        Ok(Self {
            listener,
            registry,
            scheduler: Arc::new(scheduler),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Accept connections and run the scheduler until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(addr = %self.local_addr()?, "listening");

        let scheduler = self.scheduler.clone();
        let scheduler_shutdown = shutdown.clone();
        let scheduler_handle =
            tokio::spawn(async move { scheduler.run(scheduler_shutdown).await });

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
            };

            let registry = self.registry.clone();
            let conn_shutdown = shutdown.child_token();
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, peer, registry, conn_shutdown).await {
                    error!(%peer, error = %e, "connection ended with error");
                }
            });
        }

        if let Err(e) = scheduler_handle.await {
            error!(error = %e, "scheduler task failed");
        }
        info!("server stopped");
        Ok(())
    }
}

/// Supervise one client connection from registration to hang-up.
pub async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Registry,
    shutdown: CancellationToken,
) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    let register = match read_registration(&mut reader).await {
        Ok(register) => register,
        Err((fatal, err)) => {
            if let Some(fatal) = fatal {
                // Best effort; the peer may already be gone
                let _ = wire::write_frame(&mut writer, &fatal.encode()).await;
                let _ = writer.shutdown().await;
            }
            return Err(err);
        }
    };
    let client_id = register.client_id;

    let (sink, mut source) = chunk_channel();
    let closer = shutdown.child_token();
    let token = registry.register(&client_id, sink, closer.clone()).await;
    info!(%client_id, %peer, "added client");

    let result = tokio::select! {
        _ = closer.cancelled() => {
            debug!(%client_id, "connection closed by server");
            Ok(())
        }
        res = write_chunks(&mut writer, &mut source) => res,
        res = wait_for_hangup(&mut reader) => res,
    };

    closer.cancel();
    if registry.deregister(&client_id, token).await {
        info!(%client_id, "removed client");
    }
    let _ = writer.shutdown().await;

    result
}

/// Read and validate the REGISTER frame.
///
/// On rejection returns the FATAL frame to send back, if the peer is still
/// there to read it.
async fn read_registration<R>(
    reader: &mut R,
) -> std::result::Result<Register, (Option<Fatal>, PushError)>
where
    R: AsyncRead + Unpin,
{
    let reject = |code: FatalCode, message: String| {
        (
            Some(Fatal::new(code, message.clone())),
            PushError::Registration(message),
        )
    };

    let (msg_type, payload) = match wire::read_frame(reader).await {
        Ok(Some(frame)) => frame,
        Ok(None) => {
            return Err((
                None,
                PushError::Registration("connection closed before registering".into()),
            ))
        }
        Err(e) => return Err((None, PushError::Registration(e.to_string()))),
    };

    if msg_type != MessageType::Register {
        return Err(reject(
            FatalCode::UnexpectedMessage,
            format!("Expected REGISTER, got {:?}", msg_type),
        ));
    }

    let register = Register::decode(payload)
        .map_err(|e| (None, PushError::Registration(e.to_string())))?;

    if register.version != wire::PROTOCOL_VERSION {
        return Err(reject(
            FatalCode::UnsupportedVersion,
            format!(
                "Unsupported protocol version {} (server speaks {})",
                register.version,
                wire::PROTOCOL_VERSION
            ),
        ));
    }

    if register.client_id.trim().is_empty() {
        return Err(reject(FatalCode::InvalidIdentity, "Empty client id".into()));
    }

    Ok(register)
}

/// Drain queued chunks onto the socket until the registry drops the sink.
///
/// A chunk is acknowledged only after its frame is written; the Completed
/// chunk is flushed first. On a write error the pending acknowledgement is
/// dropped with the chunk.
async fn write_chunks<W>(writer: &mut W, source: &mut ChunkSource) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = source.recv().await {
        wire::write_frame(writer, &item.chunk.encode()).await?;
        if item.chunk.is_completed() {
            writer.flush().await?;
        }
        item.mark_written();
    }
    debug!("stream replaced or deregistered");
    Ok(())
}

/// Resolve once the peer closes its side of the connection.
///
/// Clients send nothing after REGISTER; stray bytes are ignored.
async fn wait_for_hangup<R>(reader: &mut R) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 256];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        warn!(bytes = n, "ignoring unexpected data from client");
    }
}
