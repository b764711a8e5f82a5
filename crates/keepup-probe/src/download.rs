//! HTTP(S) download probe.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::error::ProbeError;
use crate::types::{DownloadProbe, DownloadRequest, DownloadResult};

const DEFAULT_FILE_NAME: &str = "index.html";

pub struct HttpDownloadProbe {
    client: reqwest::Client,
}

impl HttpDownloadProbe {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {e}");
                reqwest::Client::new()
            });
        Self { client }
    }
}

#[async_trait]
impl DownloadProbe for HttpDownloadProbe {
    async fn download(&self, request: DownloadRequest) -> DownloadResult {
        let url = match Url::parse(&request.url) {
            Ok(url) => url,
            Err(e) => {
                return DownloadResult {
                    error: Some(e.into()),
                    ..Default::default()
                };
            }
        };
        if !matches!(url.scheme(), "http" | "https") {
            return DownloadResult {
                error: Some(ProbeError::UnsupportedScheme(url.scheme().to_string())),
                ..Default::default()
            };
        }

        let start = Instant::now();
        let response = tokio::select! {
            _ = request.stop.cancelled() => return DownloadResult::default(),
            _ = request.invalidated.cancelled() => return DownloadResult::default(),
            response = self.client.get(url.clone()).send() => response,
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                return DownloadResult {
                    error: Some(e.into()),
                    ..Default::default()
                };
            }
        };

        let status = response.status();
        let mut result = DownloadResult {
            connected: true,
            http_code: Some(status.as_u16()),
            http_message: status.canonical_reason().map(String::from),
            ..Default::default()
        };
        if !status.is_success() {
            result.elapsed = Some(start.elapsed());
            return result;
        }

        if let Err(e) = tokio::fs::create_dir_all(&request.destination).await {
            result.error = Some(e.into());
            return result;
        }
        let path = unique_file_path(&request.destination, &file_name_for(&url));
        let file = match tokio::fs::File::create(&path).await {
            Ok(file) => file,
            Err(e) => {
                result.error = Some(e.into());
                return result;
            }
        };
        result.file = Some(path.clone());

        match transfer(response, file, &request).await {
            Ok(completed) => result.succeeded = completed,
            Err(e) => result.error = Some(e),
        }
        result.elapsed = Some(start.elapsed());
        tracing::debug!(
            url = %request.url,
            file = %path.display(),
            succeeded = result.succeeded,
            "Download finished"
        );
        result
    }
}

/// Stream the body into `file`. Returns false when interrupted by a token.
async fn transfer(
    response: reqwest::Response,
    mut file: tokio::fs::File,
    request: &DownloadRequest,
) -> Result<bool, ProbeError> {
    let mut stream = response.bytes_stream();
    let completed = loop {
        let next = tokio::select! {
            _ = request.stop.cancelled() => break false,
            _ = request.invalidated.cancelled() => break false,
            next = stream.next() => next,
        };
        match next {
            Some(chunk) => file.write_all(&chunk?).await?,
            None => break true,
        }
    };
    file.flush().await?;
    Ok(completed)
}

/// Last non-empty path segment of the URL.
fn file_name_for(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(String::from)
        .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string())
}

/// `dir/name`, or `dir/stem_N.ext` for the first free `N` when taken.
fn unique_file_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().to_string());
    (1..)
        .map(|n| match &ext {
            Some(ext) => dir.join(format!("{stem}_{n}.{ext}")),
            None => dir.join(format!("{stem}_{n}")),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
