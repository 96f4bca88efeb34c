pub mod listing;

use scraper::Html;

use crate::error::Result;
use crate::product::Product;

pub use listing::{ProductExtractor, Selectors};

/// A fetched listing page, parsed. `Html` is not `Send`, so a `Page` must be
/// consumed before the task awaits again.
pub struct Page {
    pub number: u32,
    pub url: String,
    pub doc: Html,
}

impl Page {
    pub fn parse(number: u32, url: &str, body: &str) -> Self {
        Self {
            number,
            url: url.to_string(),
            doc: Html::parse_document(body),
        }
    }
}

/// Site-specific strategy turning a parsed page into product records.
pub trait Extractor: Send + Sync {
    fn extract(&self, page: &Page) -> Result<Vec<Product>>;
}
