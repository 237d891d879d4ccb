// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Retrieval of the certificates referenced by `x5u`, with an optional on-disk cache.

use std::{
    io::Write,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use tracing::instrument;

use crate::error::Error;

/// Retrieves certificates over HTTP(S) or from `file://` URLs.
///
/// If a cache directory is configured, certificates retrieved over the network are stored
/// there and reused until they are older than the configured expiry.
#[derive(Debug, Clone)]
pub(crate) struct CertFetcher {
    client: reqwest::Client,
    cache_dir: Option<PathBuf>,
    cache_expire: Duration,
}

impl CertFetcher {
    pub(crate) fn new(cache_dir: Option<PathBuf>, cache_expire: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("secsipid/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| Error::CertificateFetch {
                url: String::new(),
                reason: format!("unable to set up the HTTP client: {error}"),
            })?;
        Ok(Self {
            client,
            cache_dir,
            cache_expire,
        })
    }

    /// Retrieve the PEM document at `url`.
    #[instrument(skip(self), err)]
    pub(crate) async fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, Error> {
        if let Some(path) = url.strip_prefix("file://") {
            return tokio::fs::read(path).await.map_err(|error| Error::CertificateFetch {
                url: url.to_string(),
                reason: error.to_string(),
            });
        }
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(Error::UnsupportedHeader(format!(
                "unsupported certificate location '{url}'"
            )));
        }

        let cache_path = self.cache_dir.as_ref().map(|dir| dir.join(cache_file_name(url)));
        if let Some(cache_path) = &cache_path {
            if let Some(certificate) = self.cached(cache_path).await {
                tracing::debug!(path = ?cache_path, "Using cached certificate");
                return Ok(certificate);
            }
        }

        let certificate = self.download(url, timeout).await?;
        if let Some(cache_path) = cache_path {
            // A failure to cache doesn't prevent verification.
            if let Err(error) = store(cache_path.clone(), certificate.clone()).await {
                tracing::warn!(path = ?cache_path, %error, "Failed to cache certificate");
            }
        }

        Ok(certificate)
    }

    async fn download(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, Error> {
        let fetch_error = |reason: String| Error::CertificateFetch {
            url: url.to_string(),
            reason,
        };
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|error| fetch_error(error.to_string()))?;
        if !response.status().is_success() {
            return Err(fetch_error(format!("server replied {}", response.status())));
        }
        let body = response
            .bytes()
            .await
            .map_err(|error| fetch_error(error.to_string()))?;
        tracing::info!(url, bytes = body.len(), "Retrieved certificate");

        Ok(body.to_vec())
    }

    // Returns the cached certificate if it exists and has not expired.
    async fn cached(&self, path: &Path) -> Option<Vec<u8>> {
        let metadata = tokio::fs::metadata(path).await.ok()?;
        let age = SystemTime::now()
            .duration_since(metadata.modified().ok()?)
            .unwrap_or_default();
        if age >= self.cache_expire {
            tracing::debug!(?path, ?age, "Cached certificate has expired");
            return None;
        }
        tokio::fs::read(path).await.ok()
    }
}

// Concurrent writers each use their own temporary file; the rename is atomic.
async fn store(path: PathBuf, certificate: Vec<u8>) -> Result<(), Error> {
    let span = tracing::Span::current();
    tokio::task::spawn_blocking(move || {
        let _enter = span.enter();
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut file = tempfile::Builder::new().prefix(".cert").tempfile_in(dir)?;
        file.write_all(&certificate)?;
        file.persist(&path).map_err(|error| error.error)?;
        tracing::debug!(?path, "Stored certificate in the cache");
        Ok(())
    })
    .await
    .map_err(|error| Error::Io(std::io::Error::other(error)))?
}

/// The file name used to cache the certificate at `url`.
fn cache_file_name(url: &str) -> String {
    let location = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    location
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn cache_names_are_flat() {
        assert_eq!(
            cache_file_name("https://certs.example.org/stir/cert01.pem"),
            "certs.example.org_stir_cert01.pem"
        );
        assert_eq!(
            cache_file_name("http://127.0.0.1:8080/a?b=c"),
            "127.0.0.1_8080_a_b_c"
        );
    }

    #[tokio::test]
    async fn reads_file_urls() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("cert.pem");
        std::fs::write(&path, b"certificate")?;

        let fetcher = CertFetcher::new(None, Duration::from_secs(3600))?;
        let url = format!("file://{}", path.display());
        assert_eq!(fetcher.fetch(&url, Duration::from_secs(1)).await?, b"certificate");
        Ok(())
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn serves_fresh_cache_entries() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let url = "https://certs.invalid/cert.pem";
        std::fs::write(dir.path().join(cache_file_name(url)), b"cached")?;

        let fetcher = CertFetcher::new(Some(dir.path().to_owned()), Duration::from_secs(3600))?;
        assert_eq!(fetcher.fetch(url, Duration::from_secs(1)).await?, b"cached");
        assert!(logs_contain("Using cached certificate"));
        Ok(())
    }

    #[tokio::test]
    async fn ignores_expired_cache_entries() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let url = "http://127.0.0.1:9/cert.pem";
        std::fs::write(dir.path().join(cache_file_name(url)), b"cached")?;

        let fetcher = CertFetcher::new(Some(dir.path().to_owned()), Duration::ZERO)?;
        let result = fetcher.fetch(url, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::CertificateFetch { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn rejects_unknown_schemes() -> anyhow::Result<()> {
        let fetcher = CertFetcher::new(None, Duration::from_secs(1))?;
        let result = fetcher.fetch("ftp://example.org/cert.pem", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::UnsupportedHeader(_))));
        Ok(())
    }

    #[tokio::test]
    async fn stores_atomically() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("cert.pem");
        store(path.clone(), b"first".to_vec()).await?;
        store(path.clone(), b"second".to_vec()).await?;
        assert_eq!(std::fs::read(&path)?, b"second");
        assert_eq!(std::fs::read_dir(dir.path().join("nested"))?.count(), 1);
        Ok(())
    }
}
