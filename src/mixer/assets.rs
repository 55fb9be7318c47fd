//! External sample assets
//!
//! A layer may name a recorded sample instead of being synthesized. The
//! bytes come from an [`AssetSource`]; any fetch or decode failure is
//! reported as `AssetLoad` so the mixer can fall back to synthesis.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use crate::engine::{decode_wav_bytes, AudioBuffer};
use crate::error::{Result, SoundscapeError};

/// Boxed future returned by [`AssetSource::fetch`]
pub type AssetFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;

/// Supplies raw encoded audio for a URL
pub trait AssetSource: Send + Sync {
    /// Fetch the encoded bytes behind `url`
    fn fetch<'a>(&'a self, url: &'a str) -> AssetFuture<'a>;
}

/// Fetch and decode an asset at the context sample rate
///
/// Decode errors are folded into `AssetLoad` so callers see one failure kind.
pub async fn load_buffer(
    source: &dyn AssetSource,
    url: &str,
    sample_rate: u32,
) -> Result<AudioBuffer> {
    let bytes = source.fetch(url).await?;
    decode_wav_bytes(&bytes, sample_rate).map_err(|err| SoundscapeError::AssetLoad {
        url: url.to_string(),
        reason: err.to_string(),
        source: Some(Box::new(err)),
    })
}

// ============================================================================
// Filesystem
// ============================================================================

/// Reads assets from disk, relative to a root directory
///
/// Accepts bare paths and `file://` URLs.
#[derive(Debug, Clone)]
pub struct FileAssetSource {
    root: PathBuf,
}

impl FileAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path an asset URL resolves to
    pub fn resolve(&self, url: &str) -> PathBuf {
        let path = Path::new(url.strip_prefix("file://").unwrap_or(url));
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl AssetSource for FileAssetSource {
    fn fetch<'a>(&'a self, url: &'a str) -> AssetFuture<'a> {
        Box::pin(async move {
            let path = self.resolve(url);
            tokio::fs::read(&path)
                .await
                .map_err(|err| SoundscapeError::AssetLoad {
                    url: url.to_string(),
                    reason: format!("cannot read {}: {}", path.display(), err),
                    source: Some(Box::new(err)),
                })
        })
    }
}

// ============================================================================
// HTTP
// ============================================================================

/// Downloads assets over HTTP(S)
#[cfg(feature = "remote-assets")]
#[derive(Debug, Clone)]
pub struct HttpAssetSource {
    client: reqwest::Client,
}

#[cfg(feature = "remote-assets")]
impl HttpAssetSource {
    /// Create a source whose requests time out after `timeout`
    pub fn new(timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SoundscapeError::Platform {
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

#[cfg(feature = "remote-assets")]
impl AssetSource for HttpAssetSource {
    fn fetch<'a>(&'a self, url: &'a str) -> AssetFuture<'a> {
        Box::pin(async move {
            let load_error = |reason: String, err: Option<reqwest::Error>| SoundscapeError::AssetLoad {
                url: url.to_string(),
                reason,
                source: err.map(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
            };

            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| load_error(e.to_string(), Some(e)))?;
            if !response.status().is_success() {
                return Err(load_error(format!("server returned {}", response.status()), None));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|e| load_error(e.to_string(), Some(e)))?;
            Ok(bytes.to_vec())
        })
    }
}
