use crate::client::{ClientConfig, DEFAULT_SPAWN_DELAY};
use crate::error::{PushError, Result};
use crate::server::scheduler::{DEFAULT_MAX_ATTEMPTS, DEFAULT_TRANSFER_TIMEOUT};
use crate::server::{SchedulerConfig, ServerConfig};
use crate::streaming::{SenderConfig, DATA_CHUNK_SIZE};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "chunkpush")]
#[command(about = "Push an archive to registered clients in chunks", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log filter (overrides RUST_LOG), e.g. "debug" or "chunkpush=trace"
    #[arg(long, global = true, env = "CHUNKPUSH_LOG")]
    pub log: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept clients and push the source archive to one of them periodically
    Serve(ServeArgs),
    /// Start clients that register with a server and decode what it pushes
    Connect(ConnectArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "CHUNKPUSH_LISTEN", default_value = "127.0.0.1:5001")]
    pub listen: String,

    /// Archive pushed on every tick
    #[arg(long, env = "CHUNKPUSH_SOURCE")]
    pub source: PathBuf,

    /// Seconds between broadcast ticks
    #[arg(long, default_value_t = 10)]
    pub interval_secs: u64,

    /// Bytes per chunk
    #[arg(long, default_value_t = DATA_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Deadline for one transfer, in seconds
    #[arg(long, default_value_t = DEFAULT_TRANSFER_TIMEOUT.as_secs())]
    pub transfer_timeout_secs: u64,

    /// Clients tried per tick when transfers fail
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: usize,
}

#[derive(clap::Args, Debug)]
pub struct ConnectArgs {
    /// Server address
    #[arg(long, env = "CHUNKPUSH_SERVER", default_value = "127.0.0.1:5001")]
    pub server: String,

    /// Total number of clients
    #[arg(long, default_value_t = 0)]
    pub clients: usize,

    /// Milliseconds to wait before starting each client
    #[arg(long, default_value_t = DEFAULT_SPAWN_DELAY.as_millis() as u64)]
    pub spawn_delay_ms: u64,
}

impl ServeArgs {
    pub fn into_config(self) -> Result<ServerConfig> {
        SenderConfig {
            chunk_size: self.chunk_size,
        }
        .validate()?;

        if self.interval_secs == 0 {
            return Err(PushError::Config("--interval-secs must be greater than zero".into()));
        }
        if self.transfer_timeout_secs == 0 {
            return Err(PushError::Config(
                "--transfer-timeout-secs must be greater than zero".into(),
            ));
        }

        let mut scheduler = SchedulerConfig::new(self.source);
        scheduler.interval = Duration::from_secs(self.interval_secs);
        scheduler.transfer_timeout = Duration::from_secs(self.transfer_timeout_secs);
        scheduler.max_attempts = self.max_attempts.max(1);

        Ok(ServerConfig {
            listen: self.listen,
            chunk_size: self.chunk_size,
            scheduler,
        })
    }
}

impl ConnectArgs {
    pub fn into_config(self) -> ClientConfig {
        ClientConfig {
            server: self.server,
            clients: self.clients,
            spawn_delay: Duration::from_millis(self.spawn_delay_ms),
        }
    }
}
