//! HTTP download helpers for manifests and weight shards.

use crate::constants::model;
use crate::error::{Error, Result};
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Build the HTTP client used for all model downloads.
pub fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(model::CONNECT_TIMEOUT_SECS))
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Internal {
            message: format!("Failed to create HTTP client: {e}"),
        })
}

async fn get(client: &Client, url: &str) -> Result<reqwest::Response> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| download_error(url, e))?;

    if !response.status().is_success() {
        return Err(Error::DownloadFailed {
            url: url.to_string(),
            source: format!("HTTP {}", response.status()).into(),
        });
    }

    Ok(response)
}

fn download_error(url: &str, e: impl std::error::Error + Send + Sync + 'static) -> Error {
    Error::DownloadFailed {
        url: url.to_string(),
        source: Box::new(e),
    }
}

/// Fetch a whole resource into memory.
pub async fn fetch_bytes(client: &Client, url: &str) -> Result<Vec<u8>> {
    let response = get(client, url).await?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| download_error(url, e))?;
    Ok(bytes.to_vec())
}

/// Check that a URL answers a HEAD request successfully.
pub async fn probe(client: &Client, url: &str) -> bool {
    client
        .head(url)
        .send()
        .await
        .is_ok_and(|r| r.status().is_success())
}

/// Path of the in-progress download next to `dest`.
///
/// The name carries the process id so two writers never share a file.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.{}", model::PARTIAL_SUFFIX, std::process::id()));
    dest.with_file_name(name)
}

/// Stream a download to `dest`.
///
/// Bytes land in a per-process `.part` file first and are renamed into place only after
/// the stream completes, so `dest` is either absent or whole.
pub async fn download_file(
    client: &Client,
    url: &str,
    dest: &Path,
    show_progress: bool,
) -> Result<()> {
    let response = get(client, url).await?;
    let total_size = response.content_length().unwrap_or(0);

    let pb = if show_progress {
        progress_bar(total_size, dest)?
    } else {
        ProgressBar::hidden()
    };

    let partial = partial_path(dest);
    let mut file = File::create(&partial).await?;
    let mut stream = response.bytes_stream();
    let mut downloaded = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(download_error(url, e));
            }
        };

        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        pb.set_position(downloaded);
    }

    file.flush().await?;
    drop(file);
    tokio::fs::rename(&partial, dest).await?;

    pb.finish_with_message("Download complete");
    Ok(())
}

fn progress_bar(total_size: u64, dest: &Path) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total_size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg}\n{bar:40.cyan/blue} {percent}% ({bytes}/{total_bytes})")
            .map_err(|e| Error::Internal {
                message: format!("Failed to create progress bar: {e}"),
            })?
            .progress_chars("█▓▒░ "),
    );
    pb.set_message(format!(
        "Downloading {}...",
        dest.file_name().map_or_else(
            || std::borrow::Cow::Borrowed("file"),
            |n| n.to_string_lossy()
        )
    ));
    Ok(pb)
}

/// Lower-case hex SHA-256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Compare bytes against an expected checksum, if one is listed.
pub fn verify_checksum(path: &Path, bytes: &[u8], expected: Option<&str>) -> Result<()> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let actual = sha256_hex(bytes);
    if actual == expected {
        Ok(())
    } else {
        Err(Error::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        })
    }
}
