use std::time::Duration;

/// Edge length of every resolved icon, in pixels.
pub const DEFAULT_ICON_SIZE: u32 = 256;

const DEFAULT_FAVICON_SERVICE: &str = "https://www.google.com/s2/favicons";

/// Tunables shared by the resolver and its dispatcher.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Square edge length of the canonical raster.
    pub icon_size: u32,
    /// Upper bound for the whole favicon request.
    pub favicon_timeout: Duration,
    /// Favicon-by-domain endpoint, queried with `domain` and `sz`.
    pub favicon_service: String,
    /// Requested favicon edge length.
    pub favicon_size: u32,
    /// Name of the dispatcher's worker thread.
    pub worker_name: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            icon_size: DEFAULT_ICON_SIZE,
            favicon_timeout: Duration::from_secs(4),
            favicon_service: DEFAULT_FAVICON_SERVICE.to_owned(),
            favicon_size: 64,
            worker_name: "icon-worker".to_owned(),
        }
    }
}

impl ResolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn icon_size(mut self, size: u32) -> Self {
        self.icon_size = size.max(1);
        self
    }

    pub fn favicon_timeout(mut self, timeout: Duration) -> Self {
        self.favicon_timeout = timeout;
        self
    }

    pub fn favicon_service(mut self, endpoint: impl Into<String>) -> Self {
        self.favicon_service = endpoint.into();
        self
    }

    pub fn favicon_size(mut self, size: u32) -> Self {
        self.favicon_size = size;
        self
    }

    pub fn worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }
}
