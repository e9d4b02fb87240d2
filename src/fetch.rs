// src/fetch.rs

use anyhow::{Context, Result};
use reqwest::Client;
use std::{path::PathBuf, time::Duration};
use tokio::{fs, time::Instant};
use tracing::info;
use url::Url;

use crate::process::{load_csv, normalize_columns, RawTable};

/// Where the raw CSV comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Http(Url),
    File(PathBuf),
}

impl Source {
    /// `http(s)://` strings are URLs, `file://` URLs and anything else are paths.
    pub fn parse(s: &str) -> Result<Self> {
        match Url::parse(s) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(Source::Http(url)),
            Ok(url) if url.scheme() == "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| anyhow::anyhow!("invalid file URL {}", s))?;
                Ok(Source::File(path))
            }
            _ => Ok(Source::File(PathBuf::from(s))),
        }
    }
}

/// Download the given URL and return its body.
pub async fn download_bytes(client: &Client, url: &Url) -> Result<Vec<u8>> {
    let resp = client
        .get(url.clone())
        .send()
        .await
        .with_context(|| format!("GET {}", url))?
        .error_for_status()?;
    let bytes = resp
        .bytes()
        .await
        .with_context(|| format!("reading body from {}", url))?;
    Ok(bytes.to_vec())
}

/// Read the source CSV untouched apart from column normalization.
pub async fn read_source(source: &str, timeout_secs: u64) -> Result<RawTable> {
    let start = Instant::now();
    let bytes = match Source::parse(source)? {
        Source::Http(url) => {
            let client = Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .context("building HTTP client")?;
            download_bytes(&client, &url).await?
        }
        Source::File(path) => fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?,
    };

    let table = tokio::task::spawn_blocking(move || load_csv(bytes.as_slice()))
        .await?
        .with_context(|| format!("parsing CSV from {}", source))?;
    let table = normalize_columns(table);

    let preview: Vec<&str> = table.headers.iter().take(10).map(String::as_str).collect();
    info!(
        rows = table.num_rows(),
        columns = ?preview,
        elapsed = ?start.elapsed(),
        "read source"
    );
    Ok(table)
}
