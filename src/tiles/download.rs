//! Download contract between the tile loader and the network transport
//!
//! The loader only ever hands out [`DownloadJob`]s. Whoever runs the job
//! fetches the bytes, stores them at the destination and calls
//! [`DownloadJob::complete`], which feeds them back into the tile pipeline.

use crate::core::geo::TileId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Why a tile is being downloaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DownloadUsage {
    /// A tile needed by the current view
    #[default]
    Browse,
    /// Prefetching, may be served with lower priority
    Bulk,
}

type CompletionHandler = Box<dyn FnOnce(Vec<u8>) + Send>;

/// A single tile download
pub struct DownloadJob {
    pub url: String,
    /// Absolute file path the downloaded bytes are stored at
    pub destination: PathBuf,
    pub id: TileId,
    pub usage: DownloadUsage,
    on_complete: Option<CompletionHandler>,
}

impl DownloadJob {
    pub fn new(url: String, destination: PathBuf, id: TileId, usage: DownloadUsage) -> Self {
        Self {
            url,
            destination,
            id,
            usage,
            on_complete: None,
        }
    }

    /// Installs the handler that receives the downloaded bytes
    pub fn on_complete<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(Vec<u8>) + Send + 'static,
    {
        self.on_complete = Some(Box::new(handler));
        self
    }

    /// Delivers the downloaded bytes to whoever requested the tile
    pub fn complete(self, data: Vec<u8>) {
        if let Some(handler) = self.on_complete {
            handler(data);
        }
    }
}

impl fmt::Debug for DownloadJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadJob")
            .field("url", &self.url)
            .field("destination", &self.destination)
            .field("id", &self.id)
            .field("usage", &self.usage)
            .finish()
    }
}

/// Anything able to run download jobs
pub trait DownloadManager: Send + Sync {
    /// Queues a job, must not block on the transfer
    fn add_job(&self, job: DownloadJob);
}

/// Drops every job, for purely local data
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineDownloadManager;

impl DownloadManager for OfflineDownloadManager {
    fn add_job(&self, job: DownloadJob) {
        log::debug!("offline, skipping download of {}", job.url);
    }
}

#[cfg(feature = "tokio-runtime")]
pub use http::HttpDownloadManager;

#[cfg(feature = "tokio-runtime")]
mod http {
    use super::{DownloadJob, DownloadManager};
    use crate::{MapError, Result};
    use once_cell::sync::Lazy;
    use reqwest::Client;
    use std::time::Duration;
    use tokio::runtime::Runtime;

    /// Shared HTTP client with a User-Agent so that public tile servers
    /// don't reject the request.
    static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
        Client::builder()
            .user_agent(concat!("globelet/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default()
    });

    const MAX_ATTEMPTS: usize = 2;

    /// Fetches tiles over HTTP on its own tokio runtime
    pub struct HttpDownloadManager {
        runtime: Runtime,
    }

    impl HttpDownloadManager {
        pub fn new() -> Result<Self> {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .thread_name("globelet-download")
                .enable_all()
                .build()?;
            Ok(Self { runtime })
        }

        async fn fetch(url: &str) -> Result<Vec<u8>> {
            let response = HTTP_CLIENT
                .get(url)
                .send()
                .await
                .map_err(|e| MapError::Network(e.to_string()))?;
            if !response.status().is_success() {
                return Err(MapError::Network(format!("HTTP {}", response.status())));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|e| MapError::Network(e.to_string()))?;
            Ok(bytes.to_vec())
        }

        async fn run(job: DownloadJob) {
            for attempt in 1..=MAX_ATTEMPTS {
                log::debug!("fetch tile {} attempt {}", job.id, attempt);
                match Self::fetch(&job.url).await {
                    Ok(data) => {
                        log::info!("downloaded tile {} ({} bytes)", job.id, data.len());
                        if let Some(parent) = job.destination.parent() {
                            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                                log::warn!("cannot create {}: {}", parent.display(), e);
                            }
                        }
                        if let Err(e) = tokio::fs::write(&job.destination, &data).await {
                            log::warn!("cannot store {}: {}", job.destination.display(), e);
                        }
                        // merging can be expensive, keep it off the reactor threads
                        let _ = tokio::task::spawn_blocking(move || job.complete(data)).await;
                        return;
                    }
                    Err(e) => {
                        log::warn!("tile {} download failed on attempt {}: {}", job.id, attempt, e);
                        if attempt == MAX_ATTEMPTS {
                            log::error!("giving up on tile {}", job.id);
                        } else {
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
            }
        }
    }

    impl DownloadManager for HttpDownloadManager {
        fn add_job(&self, job: DownloadJob) {
            self.runtime.spawn(Self::run(job));
        }
    }
}
