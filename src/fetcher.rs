use std::time::{Duration, Instant};

use reqwest::{Client, Proxy, Url};
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::{Result, ScrapeError};

const USER_AGENT: &str = concat!("catalog_scraper/", env!("CARGO_PKG_VERSION"));

/// HTTP GET with a fixed number of attempts and a fixed delay between them.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    proxied: bool,
    retry_count: u32,
    retry_delay: Duration,
}

impl Fetcher {
    pub fn new(settings: &Settings, proxy: Option<&str>) -> Result<Self> {
        if settings.retry_count < 1 {
            return Err(ScrapeError::Validation(
                "retry count must be at least 1".into(),
            ));
        }

        let mut builder = Client::builder()
            .timeout(settings.timeout)
            .user_agent(USER_AGENT);
        if let Some(proxy) = proxy {
            let proxy = Proxy::all(proxy)
                .map_err(|e| ScrapeError::Validation(format!("invalid proxy {proxy:?}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| ScrapeError::Validation(format!("cannot build http client: {e}")))?;

        Ok(Self {
            client,
            proxied: proxy.is_some(),
            retry_count: settings.retry_count,
            retry_delay: settings.retry_delay,
        })
    }

    /// Fetch `url` and return the response body.
    pub async fn fetch(&self, url: &str) -> Result<String> {
        let mut attempt = 1;
        loop {
            info!("Scraping page: {} (attempt {}/{})", url, attempt, self.retry_count);
            let start = Instant::now();

            match self.fetch_once(url).await {
                Ok(body) => {
                    info!(
                        "Fetched {} ({} bytes in {}ms)",
                        url,
                        body.len(),
                        start.elapsed().as_millis()
                    );
                    return Ok(body);
                }
                Err(e) if attempt >= self.retry_count => {
                    return Err(self.terminal_error(url, attempt, e));
                }
                Err(e) => {
                    warn!(
                        "Fetching {} failed (attempt {}/{}): {}; retrying in {:.1}s",
                        url,
                        attempt,
                        self.retry_count,
                        e,
                        self.retry_delay.as_secs_f64()
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> reqwest::Result<String> {
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }

    fn terminal_error(&self, url: &str, attempts: u32, source: reqwest::Error) -> ScrapeError {
        if self.proxied && source.is_connect() {
            ScrapeError::Proxy {
                url: url.to_string(),
                source,
            }
        } else {
            ScrapeError::Fetch {
                url: url.to_string(),
                attempts,
                source,
            }
        }
    }
}

/// `base` with `page=<page>` added to its query string.
pub fn page_url(base: &str, page: u32) -> Result<String> {
    let mut url = Url::parse(base)
        .map_err(|e| ScrapeError::Validation(format!("invalid catalog url {base:?}: {e}")))?;
    url.query_pairs_mut().append_pair("page", &page.to_string());
    Ok(url.into())
}
