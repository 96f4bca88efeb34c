use scraper::{ElementRef, Selector};
use tracing::{debug, info};

use super::{Extractor, Page};
use crate::error::{Result, ScrapeError};
use crate::product::Product;

/// CSS selectors for a WooCommerce product listing.
#[derive(Debug, Clone)]
pub struct Selectors {
    pub block: String,
    pub buy_now: String,
    pub title: String,
    pub image: String,
    pub price: String,
    pub description: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            block: "div.product-inner".into(),
            buy_now: ".addtocart-buynow-btn a".into(),
            title: ".woo-loop-product__title".into(),
            image: ".attachment-woocommerce_thumbnail".into(),
            price: ".woocommerce-Price-amount".into(),
            description: ".woocommerce-product-details__short-description".into(),
        }
    }
}

struct Compiled {
    block: Selector,
    buy_now: Selector,
    title: Selector,
    image: Selector,
    price: Selector,
    description: Selector,
}

pub struct ProductExtractor {
    sel: Compiled,
}

impl ProductExtractor {
    pub fn new(selectors: &Selectors) -> Result<Self> {
        let parse = |s: &str| {
            Selector::parse(s)
                .map_err(|e| ScrapeError::Validation(format!("bad selector {s:?}: {e}")))
        };
        Ok(Self {
            sel: Compiled {
                block: parse(&selectors.block)?,
                buy_now: parse(&selectors.buy_now)?,
                title: parse(&selectors.title)?,
                image: parse(&selectors.image)?,
                price: parse(&selectors.price)?,
                description: parse(&selectors.description)?,
            },
        })
    }

    fn read_block(&self, block: ElementRef<'_>) -> Option<Product> {
        let title = block
            .select(&self.sel.buy_now)
            .find_map(|a| a.value().attr("data-title"))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .or_else(|| {
                block
                    .select(&self.sel.title)
                    .next()
                    .map(text_of)
                    .filter(|t| !t.is_empty())
            })?;

        let image = block
            .select(&self.sel.image)
            .next()
            .and_then(|img| {
                let v = img.value();
                v.attr("src")
                    .filter(|s| !s.starts_with("data:"))
                    .or_else(|| v.attr("data-lazy-src"))
                    .or_else(|| v.attr("data-src"))
            })
            .unwrap_or_default();

        let raw_price = block
            .select(&self.sel.price)
            .next()
            .map(text_of)
            .unwrap_or_default();

        let description = block
            .select(&self.sel.description)
            .next()
            .map(text_of)
            .unwrap_or_default();

        Some(Product::new(title, &raw_price, image).with_description(description))
    }
}

impl Extractor for ProductExtractor {
    fn extract(&self, page: &Page) -> Result<Vec<Product>> {
        let blocks: Vec<_> = page.doc.select(&self.sel.block).collect();
        info!(
            "Extracting data from {} products on page {} ({})",
            blocks.len(),
            page.number,
            page.url
        );

        let mut products = Vec::with_capacity(blocks.len());
        for (i, block) in blocks.into_iter().enumerate() {
            let product = self.read_block(block).ok_or_else(|| ScrapeError::Extract {
                page: page.number,
                reason: format!("product block {} has no title", i + 1),
            })?;
            debug!(title = %product.title, price = %product.price, "extracted");
            products.push(product);
        }
        Ok(products)
    }
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::PRICE_NOT_AVAILABLE;

    fn extract(html: &str) -> Result<Vec<Product>> {
        let page = Page::parse(1, "http://shop.test/?page=1", html);
        ProductExtractor::new(&Selectors::default())?.extract(&page)
    }

    fn fixture() -> String {
        std::fs::read_to_string("tests/fixtures/shop_page.html").unwrap()
    }

    #[test]
    fn fixture_page_in_document_order() {
        let products = extract(&fixture()).unwrap();
        assert_eq!(products.len(), 3);
        let titles: Vec<&str> = products.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(
            titles,
            ["3M ESPE Filtek Z350 XT", "Dentsply Sirona Prime&Bond", "GC Fuji IX GP"]
        );
    }

    #[test]
    fn fixture_fields() {
        let products = extract(&fixture()).unwrap();
        let first = &products[0];
        // "₹ 1,250.00": the first token stops at the comma
        assert_eq!(first.price, "1");
        assert_eq!(
            first.image_path,
            "https://dentalstall.com/wp-content/uploads/2021/11/filtek-300x300.jpg"
        );
        assert_eq!(first.description, "Universal restorative, 4g syringe.");
        // lazy-loaded thumbnail
        assert_eq!(
            products[1].image_path,
            "https://dentalstall.com/wp-content/uploads/2021/11/primebond-300x300.jpg"
        );
    }

    #[test]
    fn missing_price_is_sentinel() {
        let products = extract(&fixture()).unwrap();
        assert_eq!(products[2].price, PRICE_NOT_AVAILABLE);
        assert!(products[2].description.is_empty());
    }

    #[test]
    fn title_falls_back_to_heading() {
        let html = r#"
            <div class="product-inner clearfix">
              <h2 class="woo-loop-product__title"><a href="/p/x">  Mouth   Mirror </a></h2>
              <span class="woocommerce-Price-amount amount"><bdi>₹45.00</bdi></span>
            </div>"#;
        let products = extract(html).unwrap();
        assert_eq!(products[0].title, "Mouth Mirror");
        assert_eq!(products[0].price, "45.00");
        assert_eq!(products[0].image_path, "");
    }

    #[test]
    fn no_blocks_is_empty_not_error() {
        assert!(extract("<html><body><p>Nothing here</p></body></html>")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn block_without_title_is_error() {
        let html = r#"<div class="product-inner"><span class="woocommerce-Price-amount">10</span></div>"#;
        let err = extract(html).unwrap_err();
        assert!(matches!(err, ScrapeError::Extract { page: 1, .. }));
    }

    #[test]
    fn bad_selector_rejected() {
        let selectors = Selectors {
            block: "div[".into(),
            ..Default::default()
        };
        assert!(ProductExtractor::new(&selectors).is_err());
    }
}
