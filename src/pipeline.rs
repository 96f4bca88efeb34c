use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::cache::Cache;
use crate::config::Settings;
use crate::error::{Result, ScrapeError};
use crate::fetcher::{page_url, Fetcher};
use crate::parser::{Extractor, Page};
use crate::product::Product;
use crate::report::{summarize, Notifier};

/// Inputs of one run. Missing values fall back to [`Settings`].
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub pages: Option<i64>,
    pub proxy: Option<String>,
}

/// Everything one run observed.
#[derive(Debug, Clone)]
pub struct ScrapeSession {
    pub page_depth: u32,
    pub proxy: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Ordered by page, then by position on the page.
    pub scraped: Vec<Product>,
    /// Records the cache reported as new or re-priced.
    pub updated: Vec<Product>,
    /// Set when the end-of-run export succeeded.
    pub exported: Option<PathBuf>,
}

struct PageOutcome {
    page: u32,
    scraped: Vec<Product>,
    updated: Vec<Product>,
}

/// Fetch → extract → diff over pages `1..=depth`, one task per page.
pub struct Pipeline {
    settings: Settings,
    extractor: Arc<dyn Extractor>,
    cache: Arc<Cache>,
    notifier: Arc<dyn Notifier>,
}

impl Pipeline {
    pub fn new(
        settings: Settings,
        extractor: Arc<dyn Extractor>,
        cache: Arc<Cache>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            settings,
            extractor,
            cache,
            notifier,
        }
    }

    #[cfg(test)]
    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    fn validate(&self, req: RunRequest) -> Result<(u32, Option<String>)> {
        self.settings.validate()?;

        let pages = req.pages.unwrap_or(self.settings.page_depth);
        if pages < 1 {
            return Err(ScrapeError::Validation(format!(
                "page depth must be a positive integer, got {pages}"
            )));
        }
        let depth = u32::try_from(pages)
            .ok()
            .filter(|d| *d <= self.settings.max_page_depth)
            .ok_or_else(|| {
                ScrapeError::Validation(format!(
                    "page depth {pages} is above the limit of {}",
                    self.settings.max_page_depth
                ))
            })?;

        let proxy = req
            .proxy
            .filter(|p| !p.trim().is_empty())
            .or_else(|| self.settings.proxy.clone());
        Ok((depth, proxy))
    }

    pub async fn run(&self, req: RunRequest) -> Result<ScrapeSession> {
        info!("Started scraping with pages: {:?} and proxy: {:?}", req.pages, req.proxy);
        let (depth, proxy) = self.validate(req)?;
        let fetcher = Fetcher::new(&self.settings, proxy.as_deref())?;
        let urls = (1..=depth)
            .map(|page| page_url(&self.settings.url, page).map(|url| (page, url)))
            .collect::<Result<Vec<_>>>()?;

        let started_at = Utc::now();
        self.cache.clear().await?;

        let pb = if self.settings.show_progress {
            ProgressBar::new(depth as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} pages ({per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );

        let mut tasks = JoinSet::new();
        for (page, url) in urls {
            let fetcher = fetcher.clone();
            let extractor = Arc::clone(&self.extractor);
            let cache = Arc::clone(&self.cache);
            tasks.spawn(async move {
                scrape_page(&fetcher, extractor.as_ref(), &cache, page, &url).await
            });
        }

        let mut outcomes = Vec::with_capacity(depth as usize);
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(|e| {
                let reason = if e.is_panic() { "panicked" } else { "was cancelled" };
                ScrapeError::TaskFailed(format!("a page task {reason}"))
            });
            match result.and_then(|r| r) {
                Ok(outcome) => {
                    pb.inc(1);
                    outcomes.push(outcome);
                }
                Err(e) => {
                    pb.abandon();
                    error!("Scraping failed: {}", e);
                    // No page task may outlive its run and write into the next one.
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    return Err(e);
                }
            }
        }
        pb.finish_and_clear();
        outcomes.sort_by_key(|o| o.page);

        let mut session = ScrapeSession {
            page_depth: depth,
            proxy,
            started_at,
            scraped: Vec::new(),
            updated: Vec::new(),
            exported: None,
        };
        for outcome in outcomes {
            session.scraped.extend(outcome.scraped);
            session.updated.extend(outcome.updated);
        }
        info!(
            "Scraped {} products over {} pages ({} new or updated, {} cached)",
            session.scraped.len(),
            depth,
            session.updated.len(),
            self.cache.len().await?
        );

        let path = self.settings.export_path();
        match self
            .cache
            .export_all(&path, &self.settings.export_fields)
            .await
        {
            Ok(_) => session.exported = Some(path),
            Err(e) => error!("Export to {} failed: {}", path.display(), e),
        }

        let report = summarize(&session);
        match serde_json::to_string(&report) {
            Ok(json) => self
                .notifier
                .notify(&format!("The following data was scraped:\n {json}")),
            Err(e) => warn!("Could not render report: {}", e),
        }

        Ok(session)
    }
}

async fn scrape_page(
    fetcher: &Fetcher,
    extractor: &dyn Extractor,
    cache: &Cache,
    number: u32,
    url: &str,
) -> Result<PageOutcome> {
    let body = fetcher.fetch(url).await?;

    // The parsed document is not Send; it must be gone before the next await.
    let scraped = {
        let page = Page::parse(number, url, &body);
        extractor.extract(&page)?
    };

    let mut updated = Vec::new();
    for product in &scraped {
        let (changed, _) = cache.upsert(product).await?;
        if changed {
            updated.push(product.clone());
        }
    }

    info!(
        "Page {}: {} products, {} new or updated",
        number,
        scraped.len(),
        updated.len()
    );
    Ok(PageOutcome {
        page: number,
        scraped,
        updated,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use serde::Deserialize;

    use super::*;
    use crate::fetcher::tests::serve;
    use crate::parser::{ProductExtractor, Selectors};
    use crate::store::MemoryStore;

    #[derive(Deserialize)]
    struct PageParam {
        page: u32,
    }

    #[derive(Clone)]
    struct Shop {
        hits: Arc<AtomicU32>,
        /// Page that answers 500, if any.
        broken: Option<u32>,
    }

    /// Page `n` lists `n` products, titled `P<n>-<i>`.
    fn listing(page: u32) -> String {
        let blocks: String = (1..=page)
            .map(|i| {
                let price = 10 * page + i;
                format!(
                    r#"<div class="product-inner clearfix">
                         <img class="attachment-woocommerce_thumbnail" src="/img/{page}-{i}.png">
                         <div class="addtocart-buynow-btn"><a data-title="P{page}-{i}">Buy Now</a></div>
                         <span class="woocommerce-Price-amount amount">₹{price}.00</span>
                       </div>"#
                )
            })
            .collect();
        format!("<html><body>{blocks}</body></html>")
    }

    async fn shop(broken: Option<u32>) -> (SocketAddr, Shop) {
        let state = Shop {
            hits: Arc::new(AtomicU32::new(0)),
            broken,
        };
        let router = Router::new()
            .route(
                "/shop/",
                get(|State(shop): State<Shop>, Query(q): Query<PageParam>| async move {
                    shop.hits.fetch_add(1, Ordering::SeqCst);
                    if shop.broken == Some(q.page) {
                        return (StatusCode::INTERNAL_SERVER_ERROR, String::new());
                    }
                    (StatusCode::OK, listing(q.page))
                }),
            )
            .with_state(state.clone());
        (serve(router).await, state)
    }

    type Timed = Arc<HashMap<u32, (u64, &'static str)>>;

    /// Page `n` answers one product titled `title` after `ms` milliseconds;
    /// pages not listed answer 500 at once.
    async fn timed_shop(pages: &[(u32, u64, &'static str)]) -> SocketAddr {
        let pages: Timed = Arc::new(pages.iter().map(|&(p, ms, t)| (p, (ms, t))).collect());
        let router = Router::new()
            .route(
                "/shop/",
                get(|State(pages): State<Timed>, Query(q): Query<PageParam>| async move {
                    let Some(&(ms, title)) = pages.get(&q.page) else {
                        return (StatusCode::INTERNAL_SERVER_ERROR, String::new());
                    };
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    let body = format!(
                        r#"<html><body><div class="product-inner">
                             <div class="addtocart-buynow-btn"><a data-title="{title}">Buy Now</a></div>
                             <span class="woocommerce-Price-amount">1.00</span>
                           </div></body></html>"#
                    );
                    (StatusCode::OK, body)
                }),
            )
            .with_state(pages);
        serve(router).await
    }

    struct Panicking;

    impl Extractor for Panicking {
        fn extract(&self, _page: &Page) -> Result<Vec<Product>> {
            panic!("extractor blew up")
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl Notifier for Recorder {
        fn notify(&self, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    fn pipeline(addr: SocketAddr, export_dir: &std::path::Path) -> (Pipeline, Arc<Recorder>) {
        let settings = Settings {
            url: format!("http://{addr}/shop/"),
            retry_count: 2,
            retry_delay: Duration::from_millis(10),
            timeout: Duration::from_secs(5),
            export_dir: export_dir.to_path_buf(),
            ..Default::default()
        };
        let extractor = Arc::new(ProductExtractor::new(&Selectors::default()).unwrap());
        let cache = Arc::new(Cache::new(Box::new(MemoryStore::new())));
        let recorder = Arc::new(Recorder::default());
        let notifier: Arc<dyn Notifier> = recorder.clone();
        (Pipeline::new(settings, extractor, cache, notifier), recorder)
    }

    fn run_request(pages: i64) -> RunRequest {
        RunRequest {
            pages: Some(pages),
            proxy: None,
        }
    }

    #[tokio::test]
    async fn fans_out_one_task_per_page() {
        let (addr, shop) = shop(None).await;
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, recorder) = pipeline(addr, dir.path());

        let session = pipeline.run(run_request(4)).await.unwrap();

        assert_eq!(shop.hits.load(Ordering::SeqCst), 4);
        // 1 + 2 + 3 + 4 products, none lost or duplicated
        assert_eq!(session.scraped.len(), 10);
        assert_eq!(session.updated.len(), 10);
        assert_eq!(session.scraped[0].title, "P1-1");
        assert_eq!(session.scraped[9].title, "P4-4");
        assert_eq!(pipeline.cache().len().await.unwrap(), 10);
        assert_eq!(recorder.0.lock().unwrap().len(), 1);

        let exported = session.exported.expect("export path");
        let csv = std::fs::read_to_string(exported).unwrap();
        assert_eq!(csv.lines().next(), Some("title, price, image_path"));
        assert_eq!(csv.lines().count(), 11);
    }

    #[tokio::test]
    async fn updated_is_subset_of_scraped() {
        let (addr, _) = shop(None).await;
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(addr, dir.path());

        let session = pipeline.run(run_request(3)).await.unwrap();
        assert!(session
            .updated
            .iter()
            .all(|u| session.scraped.iter().any(|s| s.title == u.title)));
    }

    #[tokio::test]
    async fn each_run_starts_from_an_empty_cache() {
        let (addr, _) = shop(None).await;
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(addr, dir.path());

        let first = pipeline.run(run_request(2)).await.unwrap();
        assert_eq!(first.updated.len(), 3);
        let second = pipeline.run(run_request(2)).await.unwrap();
        assert_eq!(second.updated.len(), 3);
        assert_eq!(pipeline.cache().len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn invalid_depth_sends_no_request() {
        let (addr, shop) = shop(None).await;
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(addr, dir.path());

        for pages in [0, -3] {
            let err = pipeline.run(run_request(pages)).await.unwrap_err();
            assert!(matches!(err, ScrapeError::Validation(_)));
        }
        assert_eq!(shop.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_proxy_sends_no_request() {
        let (addr, shop) = shop(None).await;
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(addr, dir.path());

        let err = pipeline
            .run(RunRequest {
                pages: Some(1),
                proxy: Some("::not a proxy::".into()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Validation(_)));
        assert_eq!(shop.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn one_failing_page_fails_the_run() {
        let (addr, shop) = shop(Some(2)).await;
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, recorder) = pipeline(addr, dir.path());

        let err = pipeline.run(run_request(3)).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Fetch { attempts: 2, .. }), "{err}");
        assert!(shop.hits.load(Ordering::SeqCst) >= 2);
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn export_failure_keeps_session() {
        let (addr, _) = shop(None).await;
        let dir = tempfile::tempdir().unwrap();
        let (mut pipeline, _) = pipeline(addr, dir.path());
        pipeline.settings.export_fields = vec!["title".into(), "sku".into()];

        let session = pipeline.run(run_request(1)).await.unwrap();
        assert_eq!(session.scraped.len(), 1);
        assert!(session.exported.is_none());
    }

    #[tokio::test]
    async fn depth_above_limit_sends_no_request() {
        let (addr, shop) = shop(None).await;
        let dir = tempfile::tempdir().unwrap();
        let (mut pipeline, _) = pipeline(addr, dir.path());
        pipeline.settings.max_page_depth = 3;

        for pages in [4, 4_000_000_000] {
            let err = pipeline.run(run_request(pages)).await.unwrap_err();
            assert!(matches!(err, ScrapeError::Validation(_)), "{err}");
        }
        assert_eq!(shop.hits.load(Ordering::SeqCst), 0);
        assert!(pipeline.run(run_request(3)).await.is_ok());
    }

    #[tokio::test]
    async fn failed_run_leaves_no_task_behind() {
        // page 1 fails at once while page 2 is still in flight
        let failing = timed_shop(&[(2, 300, "STALE")]).await;
        let fresh = timed_shop(&[(1, 600, "FRESH")]).await;
        let dir = tempfile::tempdir().unwrap();
        let (first, _) = pipeline(failing, dir.path());
        let (mut second, _) = pipeline(fresh, dir.path());
        second.cache = Arc::clone(first.cache());

        assert!(first.run(run_request(2)).await.is_err());
        let session = second.run(run_request(1)).await.unwrap();

        assert_eq!(session.scraped.len(), 1);
        assert_eq!(second.cache().len().await.unwrap(), 1);
        let csv = std::fs::read_to_string(session.exported.unwrap()).unwrap();
        assert_eq!(
            csv.lines().collect::<Vec<_>>(),
            ["title, price, image_path", "FRESH, 1.00, "]
        );
    }

    #[tokio::test]
    async fn panicking_page_task_is_task_failure() {
        let (addr, _) = shop(None).await;
        let dir = tempfile::tempdir().unwrap();
        let (mut pipeline, recorder) = pipeline(addr, dir.path());
        pipeline.extractor = Arc::new(Panicking);

        let err = pipeline.run(run_request(2)).await.unwrap_err();
        assert!(matches!(err, ScrapeError::TaskFailed(_)), "{err}");
        assert!(err.to_string().contains("panicked"));
        assert!(recorder.0.lock().unwrap().is_empty());
    }
}
