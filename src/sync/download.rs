//! Downloading source images for migration.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, REFERER};
use reqwest::Client;
use tracing::debug;

use crate::browser::random_user_agent;

#[derive(Debug, Clone)]
pub struct FetchedAsset {
    pub bytes: Vec<u8>,
    /// Content type reported by the server, if any.
    pub content_type: Option<String>,
}

#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str, referer: Option<&str>) -> Result<FetchedAsset>;
}

/// Plain HTTP fetcher that looks like the browser that rendered the page.
#[derive(Debug, Clone)]
pub struct HttpAssetFetcher {
    client: Client,
}

impl HttpAssetFetcher {
    pub fn new(timeout: Duration, proxy: Option<&str>) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(random_user_agent())
            .timeout(timeout)
            .gzip(true)
            .brotli(true);
        if let Some(proxy) = proxy {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy).with_context(|| format!("Invalid proxy {}", proxy))?,
            );
        }
        let client = builder.build().context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch(&self, url: &str, referer: Option<&str>) -> Result<FetchedAsset> {
        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, "image/avif,image/webp,image/apng,image/*,*/*;q=0.8");
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("GET {}", url))?;
        let status = response.status();
        if !status.is_success() {
            bail!("GET {} returned {}", url, status);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Reading body of {}", url))?;
        if bytes.is_empty() {
            bail!("GET {} returned an empty body", url);
        }

        Ok(FetchedAsset {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

/// Image type detected from the downloaded bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageKind {
    pub content_type: &'static str,
    pub extension: &'static str,
}

/// Identify a downloaded image by its magic bytes. Anything else, such as
/// an HTML block page served with a 200, is rejected.
pub fn sniff_image(url: &str, asset: &FetchedAsset) -> Result<ImageKind> {
    let kind = match infer::get(&asset.bytes) {
        Some(kind) if kind.matcher_type() == infer::MatcherType::Image => kind,
        Some(kind) => bail!("{} returned {}, not an image", url, kind.mime_type()),
        None => bail!(
            "{} returned an unrecognized body ({})",
            url,
            asset.content_type.as_deref().unwrap_or("no content type")
        ),
    };

    if let Some(claimed) = claimed_type(url, asset.content_type.as_deref()) {
        if claimed != kind.mime_type() {
            debug!("{} claims {} but contains {}", url, claimed, kind.mime_type());
        }
    }

    Ok(ImageKind {
        content_type: kind.mime_type(),
        extension: kind.extension(),
    })
}

/// Type the server reported, else the one implied by the URL's extension.
fn claimed_type(url: &str, reported: Option<&str>) -> Option<String> {
    reported
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .filter(|ct| !ct.is_empty())
        .or_else(|| {
            let path = url.split(['?', '#']).next().unwrap_or(url);
            mime_guess::from_path(path).first_raw().map(str::to_string)
        })
}
