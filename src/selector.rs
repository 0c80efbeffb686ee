//! Resource Selector
//!
//! Turns a query into a lazy, cursor-paginated sequence of candidate items.
//! At most one page is buffered; the sequence can be restarted from a stored
//! cursor, which is what checkpointed runs rely on.

use crate::error::{BulkError, RemoteError};
use crate::retry::RetryPolicy;
use crate::transport::{PageRequest, Transport};
use crate::types::{CandidateItem, Query};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ResourceSelector {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    query: Query,
    cql: String,
    /// Cursor the buffered page was fetched with.
    page_cursor: Option<String>,
    /// Cursor of the page after the buffered one.
    next_cursor: Option<String>,
    buffer: VecDeque<CandidateItem>,
    /// No pages remain after the buffered one.
    last_page: bool,
    started: bool,
    pages_fetched: u64,
}

impl ResourceSelector {
    /// Build a selector starting at the beginning of the sequence. The query
    /// is validated before any page is fetched.
    pub fn new(
        transport: Arc<dyn Transport>,
        retry: RetryPolicy,
        query: Query,
    ) -> Result<Self, BulkError> {
        query.validate()?;
        let cql = query.effective_cql();
        Ok(Self {
            transport,
            retry,
            query,
            cql,
            page_cursor: None,
            next_cursor: None,
            buffer: VecDeque::new(),
            last_page: false,
            started: false,
            pages_fetched: 0,
        })
    }

    /// Build a selector that resumes at `cursor` (`None` = from the start).
    pub fn resume_from(
        transport: Arc<dyn Transport>,
        retry: RetryPolicy,
        query: Query,
        cursor: Option<String>,
    ) -> Result<Self, BulkError> {
        let mut selector = Self::new(transport, retry, query)?;
        selector.next_cursor = cursor;
        Ok(selector)
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched
    }

    /// True once every item has been yielded.
    pub fn is_exhausted(&self) -> bool {
        self.started && self.buffer.is_empty() && self.last_page
    }

    /// Cursor from which a restarted selector yields the first item not yet
    /// consumed. Items of a partially consumed page are re-yielded; callers
    /// skip them by id.
    pub fn resume_cursor(&self) -> Option<String> {
        if self.buffer.is_empty() {
            self.next_cursor.clone()
        } else {
            self.page_cursor.clone()
        }
    }

    /// Next candidate, fetching a page when the buffer runs dry. `Ok(None)`
    /// marks the end of the sequence; fetch failures that survive the retry
    /// policy are returned as errors.
    pub async fn next_item(&mut self) -> Result<Option<CandidateItem>, RemoteError> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }
            if self.started && self.last_page {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    /// Up to `max` items; fewer only at the end of the sequence.
    pub async fn next_batch(&mut self, max: usize) -> Result<Vec<CandidateItem>, RemoteError> {
        let mut batch = Vec::with_capacity(max);
        while batch.len() < max {
            match self.next_item().await? {
                Some(item) => batch.push(item),
                None => break,
            }
        }
        Ok(batch)
    }

    async fn fetch_page(&mut self) -> Result<(), RemoteError> {
        let request = PageRequest {
            cql: self.cql.clone(),
            cursor: self.next_cursor.clone(),
            limit: self.query.page_size(),
        };
        let transport = Arc::clone(&self.transport);
        let page = self
            .retry
            .execute(|| {
                let transport = Arc::clone(&transport);
                let request = request.clone();
                async move { transport.search(&request).await }
            })
            .await?;

        self.started = true;
        self.pages_fetched += 1;
        debug!(
            page = self.pages_fetched,
            items = page.items.len(),
            has_next = page.next_cursor.is_some(),
            "page_fetched"
        );

        let stalled = page.next_cursor.is_some() && page.next_cursor == request.cursor;
        if stalled {
            warn!(cursor = ?request.cursor, "search returned its own cursor; ending sequence");
        }
        self.page_cursor = request.cursor;
        self.last_page = page.next_cursor.is_none() || stalled;
        self.next_cursor = if self.last_page { None } else { page.next_cursor };
        self.buffer = page.items.into();
        Ok(())
    }
}
