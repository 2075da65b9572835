//! Client mode - connects to a push server, registers, and decodes every
//! archive the server pushes.

pub mod decoder;

pub use decoder::{decode_archive, parse_title, DecodedArchive, EntryReport};

use crate::error::Result;
use crate::streaming::protocol::{self as wire, Register};
use crate::streaming::{CompletedTransfer, ReceiveStats, Receiver};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Default pause between spawning clients
pub const DEFAULT_SPAWN_DELAY: Duration = Duration::from_secs(1);

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address
    pub server: String,
    /// Number of clients to start
    pub clients: usize,
    /// Pause before starting each client
    pub spawn_delay: Duration,
}

/// Fresh random 128-bit identity, hex encoded.
pub fn generate_client_id() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

/// A registered connection to the push server.
pub struct PushClient {
    client_id: String,
    stream: TcpStream,
}

impl PushClient {
    /// Connect to `addr` and register as `client_id`.
    pub async fn connect(addr: &str, client_id: impl Into<String>) -> Result<Self> {
        let client_id = client_id.into();
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;

        wire::write_frame(&mut stream, &Register::new(client_id.clone()).encode()).await?;
        stream.flush().await?;

        Ok(Self { client_id, stream })
    }

    /// Receive transfers until the stream ends, handing each to `on_complete`.
    pub async fn run<F>(
        mut self,
        shutdown: &CancellationToken,
        on_complete: F,
    ) -> Result<ReceiveStats>
    where
        F: FnMut(CompletedTransfer) -> Result<()>,
    {
        let mut receiver = Receiver::new(self.client_id.clone());
        receiver.run(&mut self.stream, shutdown, on_complete).await
    }

    /// Receive transfers, decode each as an archive and log its titles.
    pub async fn run_decoding(self, shutdown: &CancellationToken) -> Result<ReceiveStats> {
        let client_id = self.client_id.clone();
        self.run(shutdown, move |done| {
            let archive = decode_archive(&done.payload)?;
            decoder::report(&client_id, &archive);
            Ok(())
        })
        .await
    }
}

/// Start `config.clients` clients one after another and wait for them all.
///
/// A client that fails to connect or whose stream fails is reported and
/// does not affect the others.
pub async fn run_clients(config: ClientConfig, shutdown: CancellationToken) -> Result<()> {
    let mut tasks = JoinSet::new();

    for _ in 0..config.clients {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(config.spawn_delay) => {}
        }

        let client_id = generate_client_id();
        info!(%client_id, "client created");

        let client = match PushClient::connect(&config.server, client_id.clone()).await {
            Ok(client) => client,
            Err(e) => {
                error!(%client_id, error = %e, "failed to connect");
                continue;
            }
        };

        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            match client.run_decoding(&shutdown).await {
                Ok(stats) => info!(
                    %client_id,
                    transfers = stats.transfers,
                    bytes = stats.bytes,
                    "client finished"
                ),
                Err(e) => error!(%client_id, error = %e, "client stream failed"),
            }
        });
    }
    info!(clients = tasks.len(), "finished creating clients");

    while let Some(res) = tasks.join_next().await {
        if let Err(e) = res {
            error!(error = %e, "client task panicked");
        }
    }
    Ok(())
}
