//! Boundary to the catalog: page extraction and search listing

use std::time::Duration;

use listharvest_core::{FetchError, fetch_text};

use crate::record::{Candidate, RawRecord};
use crate::state::QueryDescriptor;

/// What one extraction produced
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Found(RawRecord),
    /// No listing behind this candidate (gap in the id space, removed listing)
    NotFound,
}

/// Fetches and parses catalog pages. Shared by all workers.
pub trait PageExtractor: Send + Sync {
    fn extract(&self, candidate: &Candidate) -> Result<Extraction, FetchError>;

    /// Listing references on one page (1-based) of a search; empty = past the end
    fn search(&self, query: &QueryDescriptor, page: u32) -> Result<Vec<String>, FetchError>;
}

/// Site-specific URLs and markup parsing for [`HttpExtractor`]
pub trait PageParser: Send + Sync {
    fn listing_url(&self, candidate: &Candidate) -> String;

    fn search_url(&self, query: &QueryDescriptor, page: u32) -> String;

    /// Parse a listing page. `Ok(None)` for a page without a listing;
    /// `Err(FetchError::Mismatch)` when the markup is not understood.
    fn parse_listing(
        &self,
        candidate: &Candidate,
        body: &str,
    ) -> Result<Option<RawRecord>, FetchError>;

    fn parse_search(&self, body: &str) -> Result<Vec<String>, FetchError>;
}

/// [`PageExtractor`] over the shared HTTP client
pub struct HttpExtractor<P> {
    parser: P,
    timeout: Duration,
}

impl<P: PageParser> HttpExtractor<P> {
    pub fn new(parser: P, timeout: Duration) -> Self {
        Self { parser, timeout }
    }
}

impl<P: PageParser> PageExtractor for HttpExtractor<P> {
    fn extract(&self, candidate: &Candidate) -> Result<Extraction, FetchError> {
        let url = self.parser.listing_url(candidate);
        let body = match fetch_text(&url, self.timeout) {
            Ok(body) => body,
            Err(FetchError::Http {
                status: Some(404 | 410),
                ..
            }) => return Ok(Extraction::NotFound),
            Err(e) => return Err(e),
        };
        Ok(match self.parser.parse_listing(candidate, &body)? {
            Some(record) => Extraction::Found(record),
            None => Extraction::NotFound,
        })
    }

    fn search(&self, query: &QueryDescriptor, page: u32) -> Result<Vec<String>, FetchError> {
        let url = self.parser.search_url(query, page);
        let body = fetch_text(&url, self.timeout)?;
        self.parser.parse_search(&body)
    }
}
