//! OData `$top`/`$skip` pagination.
//!
//! A `Pager` walks pages forward until a page comes back shorter than its
//! `$top`. `PaginatedResult` wraps a page source with two independent caches:
//! the fetched pages and the flattened records.

use async_trait::async_trait;
use tracing::debug;

use tass_core::constants::odata;
use tass_core::error::{TassError, TassResult};
use tass_core::json::Value;

use crate::options::Params;
use crate::response::ResponseEnvelope;

/// Page size and skip settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationConfig {
    /// Records requested per page unless the caller sent `$top`.
    pub top: usize,
    /// Amount `$skip` advances after each page.
    pub offset: usize,
    /// First `$skip` unless the caller sent one.
    pub skip: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            top: odata::PAGE_SIZE,
            offset: odata::PAGE_OFFSET,
            skip: odata::INITIAL_SKIP,
        }
    }
}

/// Fetches one page given its full query parameters.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, params: Params) -> TassResult<ResponseEnvelope>;
}

/// One fetched page.
#[derive(Debug)]
pub struct Page {
    pub response: ResponseEnvelope,
    /// `$skip` used for this page.
    pub offset: usize,
    /// `$top` used for this page.
    pub top: usize,
    /// Zero-based page index.
    pub page_num: usize,
}

impl Page {
    /// Records on this page.
    pub fn data(&self) -> &[Value] {
        self.response.records()
    }
}

/// Forward-only page cursor.
pub struct Pager<'a> {
    source: &'a dyn PageSource,
    base_params: Params,
    offset: usize,
    current_skip: usize,
    top: usize,
    page_num: usize,
    finished: bool,
}

impl<'a> Pager<'a> {
    /// Start a walk. `$top` and `$skip` in `base_params` override the configured ones.
    ///
    /// `$skip` advances by the configured offset after every full page, whatever
    /// `$top` is. A zero `$top` is rejected since every page would be empty and full.
    pub fn new(source: &'a dyn PageSource, base_params: Params, config: PaginationConfig) -> TassResult<Self> {
        let top = param_or(&base_params, odata::TOP, config.top)?;
        if top == 0 {
            return Err(TassError::InvalidRequest(format!("'{}' must be greater than zero", odata::TOP)));
        }
        let skip = param_or(&base_params, odata::SKIP, config.skip)?;
        Ok(Self {
            source,
            base_params,
            offset: config.offset,
            current_skip: skip,
            top,
            page_num: 0,
            finished: false,
        })
    }

    /// Fetch the next page, or `None` once a short page has been seen.
    pub async fn next_page(&mut self) -> TassResult<Option<Page>> {
        if self.finished {
            return Ok(None);
        }

        let mut params = self.base_params.clone();
        params.insert(odata::TOP.to_string(), self.top.to_string());
        params.insert(odata::SKIP.to_string(), self.current_skip.to_string());

        debug!("fetching page {} ($skip={}, $top={})", self.page_num, self.current_skip, self.top);
        let response = self.source.fetch_page(params).await?;

        let page = Page {
            offset: self.current_skip,
            top: self.top,
            page_num: self.page_num,
            response,
        };

        if page.response.has_more() {
            self.current_skip += self.offset;
            self.page_num += 1;
        } else {
            self.finished = true;
        }
        Ok(Some(page))
    }
}

fn param_or(params: &Params, name: &str, default: usize) -> TassResult<usize> {
    match params.get(name) {
        Some(value) => value.trim().parse().map_err(|_| {
            TassError::InvalidRequest(format!("'{name}' must be a non-negative integer, got '{value}'"))
        }),
        None => Ok(default),
    }
}

/// Lazily fetched, cached pagination result.
pub struct PaginatedResult {
    source: Box<dyn PageSource>,
    base_params: Params,
    config: PaginationConfig,
    pages: Option<Vec<Page>>,
    data: Option<Vec<Value>>,
}

impl PaginatedResult {
    /// Wrap a page source. Nothing is fetched until pages or data are requested.
    pub fn new(source: Box<dyn PageSource>, base_params: Params, config: PaginationConfig) -> Self {
        Self {
            source,
            base_params,
            config,
            pages: None,
            data: None,
        }
    }

    /// A fresh cursor over the source, independent of the caches.
    pub fn pager(&self) -> TassResult<Pager<'_>> {
        Pager::new(self.source.as_ref(), self.base_params.clone(), self.config)
    }

    /// All pages, fetched on first call and replayed from cache afterwards.
    pub async fn pages(&mut self) -> TassResult<&[Page]> {
        if self.pages.is_none() {
            let mut pager = self.pager()?;
            let mut pages = Vec::new();
            while let Some(page) = pager.next_page().await? {
                pages.push(page);
            }
            debug!("pagination finished after {} page(s)", pages.len());
            self.pages = Some(pages);
        }
        Ok(self.pages.as_deref().unwrap_or_default())
    }

    /// Records across all pages, in page order.
    pub async fn results(&mut self) -> TassResult<impl Iterator<Item = &Value> + '_> {
        Ok(self.pages().await?.iter().flat_map(|page| page.data().iter()))
    }

    /// All records as one sequence, cached separately from the pages.
    pub async fn data(&mut self) -> TassResult<&[Value]> {
        if self.data.is_none() {
            let records: Vec<Value> = self.results().await?.cloned().collect();
            self.data = Some(records);
        }
        Ok(self.data.as_deref().unwrap_or_default())
    }

    /// Pages fetched so far, without fetching.
    pub fn cached_pages(&self) -> Option<&[Page]> {
        self.pages.as_deref()
    }

    /// Drop both caches; the next access fetches everything again.
    pub fn refresh(&mut self) {
        self.pages = None;
        self.data = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
    use reqwest::Url;

    /// Serves `total` numbered records, honoring `$top`/`$skip`.
    struct FakeSource {
        total: usize,
        calls: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<Params>>>,
    }

    impl FakeSource {
        fn new(total: usize) -> Self {
            Self {
                total,
                calls: Arc::new(AtomicUsize::new(0)),
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl PageSource for FakeSource {
        async fn fetch_page(&self, params: Params) -> TassResult<ResponseEnvelope> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(params.clone());

            let top: usize = params["$top"].parse().unwrap();
            let skip: usize = params["$skip"].parse().unwrap();
            let records: Vec<usize> = (skip..self.total.min(skip + top)).collect();

            let mut url = Url::parse("http://fake/items").unwrap();
            url.query_pairs_mut().extend_pairs(params.iter());
            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            Ok(ResponseEnvelope::from_parts(
                200,
                url.clone(),
                url,
                headers,
                serde_json::to_vec(&records).unwrap(),
                BTreeSet::new(),
            ))
        }
    }

    #[tokio::test]
    async fn test_pages_and_data() {
        let source = FakeSource::new(237);
        let calls = source.calls.clone();
        let mut result = PaginatedResult::new(Box::new(source), Params::new(), PaginationConfig::default());

        let pages = result.pages().await.unwrap();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages.iter().map(|p| p.data().len()).collect::<Vec<_>>(), vec![100, 100, 37]);
        assert_eq!(pages.iter().map(|p| p.offset).collect::<Vec<_>>(), vec![0, 100, 200]);
        assert_eq!(pages[2].page_num, 2);
        assert_eq!(pages[0].top, 100);

        let data = result.data().await.unwrap();
        assert_eq!(data.len(), 237);
        assert_eq!(data[236], Value::from(236u64));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_short_first_page() {
        let mut result = PaginatedResult::new(Box::new(FakeSource::new(40)), Params::new(), PaginationConfig::default());
        assert_eq!(result.pages().await.unwrap().len(), 1);
        assert_eq!(result.data().await.unwrap().len(), 40);
    }

    #[tokio::test]
    async fn test_exact_multiple_needs_trailing_empty_page() {
        let mut result = PaginatedResult::new(Box::new(FakeSource::new(200)), Params::new(), PaginationConfig::default());
        let pages = result.pages().await.unwrap();
        assert_eq!(pages.len(), 3);
        assert!(pages[2].data().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_refetches() {
        let source = FakeSource::new(150);
        let calls = source.calls.clone();
        let mut result = PaginatedResult::new(Box::new(source), Params::new(), PaginationConfig::default());

        result.data().await.unwrap();
        result.data().await.unwrap();
        assert_eq!(result.results().await.unwrap().count(), 150);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        result.refresh();
        assert!(result.cached_pages().is_none());
        assert_eq!(result.data().await.unwrap().len(), 150);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_other_params_are_kept_on_every_page() {
        let source = FakeSource::new(120);
        let seen = source.seen.clone();
        let mut params = Params::new();
        params.insert("$filter".into(), "dol eq null".into());
        let mut result = PaginatedResult::new(Box::new(source), params, PaginationConfig::default());
        result.pages().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|p| p["$filter"] == "dol eq null"));
        assert_eq!(seen[1]["$skip"], "100");
    }

    #[tokio::test]
    async fn test_caller_top_and_skip_are_initial_values() {
        let source = FakeSource::new(30);
        let mut params = Params::new();
        params.insert("$top".into(), "10".into());
        params.insert("$skip".into(), "5".into());
        let config = PaginationConfig { offset: 10, ..PaginationConfig::default() };
        let mut result = PaginatedResult::new(Box::new(source), params, config);

        let offsets: Vec<usize> = result.pages().await.unwrap().iter().map(|p| p.offset).collect();
        assert_eq!(offsets, vec![5, 15, 25]);
    }

    #[tokio::test]
    async fn test_invalid_top_is_rejected() {
        let mut params = Params::new();
        params.insert("$top".into(), "many".into());
        let mut result = PaginatedResult::new(Box::new(FakeSource::new(1)), params, PaginationConfig::default());
        assert!(matches!(result.pages().await, Err(TassError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_zero_top_is_rejected_before_fetching() {
        let source = FakeSource::new(5);
        let calls = source.calls.clone();
        let mut params = Params::new();
        params.insert("$top".into(), "0".into());
        let mut result = PaginatedResult::new(Box::new(source), params, PaginationConfig::default());

        assert!(matches!(result.pages().await, Err(TassError::InvalidRequest(_))));
        assert!(matches!(result.pager(), Err(TassError::InvalidRequest(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let config = PaginationConfig { top: 0, ..PaginationConfig::default() };
        let mut result = PaginatedResult::new(Box::new(FakeSource::new(5)), Params::new(), config);
        assert!(result.data().await.is_err());
    }

    #[tokio::test]
    async fn test_small_top_skips_ahead_by_offset() {
        let source = FakeSource::new(250);
        let seen = source.seen.clone();
        let mut params = Params::new();
        params.insert("$top".into(), "10".into());
        let mut result = PaginatedResult::new(Box::new(source), params, PaginationConfig::default());

        let data = result.data().await.unwrap();
        // records 10-99 and 110-199 are never requested
        assert_eq!(data.len(), 30);
        assert_eq!(data[10], Value::from(100u64));
        assert_eq!(data[20], Value::from(200u64));

        let seen = seen.lock().unwrap();
        let skips: Vec<&str> = seen.iter().map(|p| p["$skip"].as_str()).collect();
        assert_eq!(skips, vec!["0", "100", "200", "300"]);
        assert!(seen.iter().all(|p| p["$top"] == "10"));
    }

    #[tokio::test]
    async fn test_large_top_overlaps_by_offset() {
        let source = FakeSource::new(300);
        let calls = source.calls.clone();
        let mut params = Params::new();
        params.insert("$top".into(), "150".into());
        let mut result = PaginatedResult::new(Box::new(source), params, PaginationConfig::default());

        let pages = result.pages().await.unwrap();
        assert_eq!(pages.iter().map(|p| p.offset).collect::<Vec<_>>(), vec![0, 100, 200]);
        assert_eq!(pages.iter().map(|p| p.data().len()).collect::<Vec<_>>(), vec![150, 150, 100]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // overlapping windows repeat records 100-149 and 200-249
        let data = result.data().await.unwrap();
        assert_eq!(data.len(), 400);
        assert_eq!(data[150], Value::from(100u64));
    }
}
