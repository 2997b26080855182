//! Last-resort favicon download for web shortcuts.

use std::sync::OnceLock;

use image::DynamicImage;
use tracing::debug;
use url::Url;

use crate::config::ResolverConfig;
use crate::error::{IconError, Result};

/// Fetches the site icon for a web page URL.
pub trait FaviconSource: Send + Sync {
    fn fetch(&self, page_url: &str) -> Result<DynamicImage>;
}

/// Host of an `http`/`https` URL. Every other scheme is refused so no
/// request is ever made for it.
pub fn web_host(page_url: &str) -> Result<String> {
    let url = Url::parse(page_url.trim())
        .map_err(|e| IconError::unsupported(format!("{page_url}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(IconError::unsupported(format!(
            "favicons are only fetched for web urls, not {}",
            url.scheme()
        )));
    }
    url.host_str()
        .filter(|h| !h.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| IconError::unsupported(format!("{page_url} has no host")))
}

/// Queries a favicon-by-domain service over HTTP.
pub struct HttpFavicons {
    service: String,
    size: u32,
    timeout: std::time::Duration,
    client: OnceLock<reqwest::blocking::Client>,
}

impl HttpFavicons {
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            service: config.favicon_service.clone(),
            size: config.favicon_size,
            timeout: config.favicon_timeout,
            client: OnceLock::new(),
        }
    }

    /// Service URL that returns the icon of `page_url`'s site.
    pub fn request_url(&self, page_url: &str) -> Result<Url> {
        let host = web_host(page_url)?;
        Url::parse_with_params(
            &self.service,
            [("domain", host), ("sz", self.size.to_string())],
        )
        .map_err(|e| IconError::unsupported(format!("favicon service {}: {e}", self.service)))
    }

    fn client(&self) -> Result<&reqwest::blocking::Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .user_agent(format!("desktop-icons/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(self.client.get_or_init(|| client))
    }
}

impl FaviconSource for HttpFavicons {
    fn fetch(&self, page_url: &str) -> Result<DynamicImage> {
        let request = self.request_url(page_url)?;
        debug!(url = %request, "fetching favicon");
        let response = self.client()?.get(request).send()?.error_for_status()?;
        let bytes = response.bytes()?;
        Ok(image::load_from_memory(&bytes)?)
    }
}
