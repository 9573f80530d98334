//! Turns track references into streamable sources.

use crate::{
    config::ResolverConfig,
    error::ResolutionError,
    track::{ResolvedSource, ResolvedTrack, StreamHandle, Track},
};
use async_trait::async_trait;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

/// Looks up a reference and returns a handle the transcoder can read from.
/// Implementations must not download the media itself.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, reference: &str) -> Result<ResolvedSource, ResolutionError>;
}

#[derive(Clone)]
pub struct SourceResolver {
    extractor: Arc<dyn Extractor>,
    timeout: Duration,
    max_duration: Option<Duration>,
}

impl SourceResolver {
    pub fn new(extractor: Arc<dyn Extractor>, config: &ResolverConfig) -> Self {
        SourceResolver {
            extractor,
            timeout: config.timeout(),
            max_duration: config.max_duration(),
        }
    }

    pub async fn resolve(&self, track: Track) -> Result<ResolvedTrack, ResolutionError> {
        let reference = track.reference.trim();
        if reference.is_empty() {
            return Err(ResolutionError::NotFound {
                reference: track.reference.clone(),
            });
        }

        let source = tokio::time::timeout(self.timeout, self.extractor.extract(reference))
            .await
            .map_err(|_| ResolutionError::Timeout {
                secs: self.timeout.as_secs(),
            })??;

        if let (Some(max), Some(duration)) = (self.max_duration, source.duration) {
            if duration > max {
                return Err(ResolutionError::Restricted {
                    reason: format!(
                        "{} is longer than the {} minute limit",
                        source.title,
                        max.as_secs() / 60
                    ),
                });
            }
        }

        debug!(
            "Resolved {} to {:?} ({})",
            track.reference, source.handle, source.title
        );

        Ok(ResolvedTrack::new(track, source))
    }
}

/// Plays files from the local filesystem. Accepts plain paths and `file://`
/// URLs.
pub struct LocalFileExtractor;

impl LocalFileExtractor {
    fn path_of(reference: &str) -> Option<PathBuf> {
        if let Some(path) = reference.strip_prefix("file://") {
            return Some(PathBuf::from(path));
        }
        if reference.contains("://") {
            return None;
        }

        let path = Path::new(reference);
        let looks_like_path = path.is_absolute()
            || reference.starts_with("./")
            || reference.starts_with("../")
            || path.exists();

        looks_like_path.then(|| path.to_path_buf())
    }

    /// Whether `reference` should be handled as a local file.
    pub fn claims(reference: &str) -> bool {
        Self::path_of(reference).is_some()
    }
}

#[async_trait]
impl Extractor for LocalFileExtractor {
    async fn extract(&self, reference: &str) -> Result<ResolvedSource, ResolutionError> {
        let path = Self::path_of(reference).ok_or_else(|| ResolutionError::Unsupported {
            reason: format!("{reference} is not a local file"),
        })?;

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|_| ResolutionError::NotFound {
                reference: reference.to_string(),
            })?;
        if !metadata.is_file() {
            return Err(ResolutionError::Unsupported {
                reason: format!("{} is not a regular file", path.display()),
            });
        }

        let title = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| reference.to_string());

        Ok(ResolvedSource {
            handle: StreamHandle::File(path),
            title,
            duration: None,
        })
    }
}

/// Routes local paths to [LocalFileExtractor] and everything else to a
/// remote extractor.
pub struct ChainExtractor {
    local: LocalFileExtractor,
    remote: Arc<dyn Extractor>,
}

impl ChainExtractor {
    pub fn new(remote: Arc<dyn Extractor>) -> Self {
        ChainExtractor {
            local: LocalFileExtractor,
            remote,
        }
    }
}

#[async_trait]
impl Extractor for ChainExtractor {
    async fn extract(&self, reference: &str) -> Result<ResolvedSource, ResolutionError> {
        if LocalFileExtractor::claims(reference) {
            self.local.extract(reference).await
        } else {
            self.remote.extract(reference).await
        }
    }
}
