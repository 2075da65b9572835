//! Periodic broadcast: every tick, push the source archive to one random
//! registered client.
//!
//! Ticks are strictly serial. A tick that runs long delays the next one
//! instead of overlapping it, so a client stream never carries two
//! transfers at once.

use crate::error::PushError;
use crate::server::registry::Registry;
use crate::streaming::{Sender, TransferStats};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::BufReader;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Default broadcast period
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Default deadline for one transfer
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(300);

/// Default clients tried per tick before giving up
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between ticks
    pub interval: Duration,
    /// Archive pushed on every tick
    pub source: PathBuf,
    /// Deadline for one complete transfer
    pub transfer_timeout: Duration,
    /// Clients tried per tick when transfers fail
    pub max_attempts: usize,
}

impl SchedulerConfig {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            source: source.into(),
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Registry was empty
    NoClients,
    /// A full transfer reached `client_id`
    Delivered {
        client_id: String,
        stats: TransferStats,
    },
    /// Every attempt failed on the client side; failed clients were evicted
    Failed { attempts: usize },
    /// The source could not be read
    SourceUnavailable,
}

pub struct Scheduler {
    registry: Registry,
    sender: Sender,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(registry: Registry, sender: Sender, config: SchedulerConfig) -> Self {
        Self {
            registry,
            sender,
            config,
        }
    }

    /// Tick every `interval` until `shutdown` fires.
    ///
    /// The first tick fires one interval after start.
    pub async fn run(&self, shutdown: CancellationToken) {
        let start = Instant::now() + self.config.interval;
        let mut ticker = time::interval_at(start, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.tick() => {}
            }
        }

        info!("scheduler stopped");
    }

    /// Pick a client and push the source to it.
    pub async fn tick(&self) -> TickOutcome {
        let clients = self.registry.len().await;
        info!(clients, "timer triggered");

        if clients == 0 {
            info!("no clients to send data");
            return TickOutcome::NoClients;
        }

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = 0;
        while attempts < max_attempts {
            let Some(client) = self.registry.pick_random().await else {
                break;
            };
            attempts += 1;

            // Opened per attempt, before any chunk goes out, so a bad source
            // never leaves a client with a partial transfer.
            let source = match File::open(&self.config.source).await {
                Ok(file) => BufReader::new(file),
                Err(e) => {
                    error!(
                        source = %self.config.source.display(),
                        error = %e,
                        "failed to open source archive"
                    );
                    return TickOutcome::SourceUnavailable;
                }
            };

            info!(client_id = %client.client_id, attempt = attempts, "sending data to client");
            let transfer = self.sender.send(&client.client_id, &client.sink, source);
            let err = match time::timeout(self.config.transfer_timeout, transfer).await {
                Ok(Ok(stats)) => {
                    info!(
                        client_id = %client.client_id,
                        bytes = stats.bytes,
                        chunks = stats.chunks,
                        "transfer delivered"
                    );
                    return TickOutcome::Delivered {
                        client_id: client.client_id.clone(),
                        stats,
                    };
                }
                Ok(Err(e)) => e,
                Err(_) => PushError::Timeout {
                    client_id: client.client_id.clone(),
                    secs: self.config.transfer_timeout.as_secs(),
                },
            };

            // The stream may hold a partial transfer now; close it either way
            warn!(client_id = %client.client_id, error = %err, "transfer failed, evicting client");
            self.registry.evict(&client).await;

            if !err.is_stream_fatal() {
                return TickOutcome::SourceUnavailable;
            }
        }

        warn!(attempts, "no client received the transfer this tick");
        TickOutcome::Failed { attempts }
    }
}
