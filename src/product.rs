use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const PRICE_NOT_AVAILABLE: &str = "Price not available";

static PRICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-+]?\d*\.\d+|\d+").unwrap());

/// One product as listed on a catalog page. `title` is its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub image_path: String,
    pub title: String,
    pub price: String,
    #[serde(default)]
    pub description: String,
}

impl Product {
    pub fn new(title: impl Into<String>, raw_price: &str, image_path: impl Into<String>) -> Self {
        Self {
            image_path: image_path.into(),
            title: title.into(),
            price: extract_price(raw_price),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// First float- or integer-shaped token of a raw price text, or the
/// "not available" sentinel. The text is matched as is, so a grouping comma
/// ends the token: `1,234.50` gives `1`.
pub fn extract_price(raw: &str) -> String {
    PRICE_RE
        .find(raw)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| PRICE_NOT_AVAILABLE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_decimal() {
        assert_eq!(extract_price("₹1250.00"), "1250.00");
    }

    #[test]
    fn grouping_comma_ends_the_token() {
        assert_eq!(extract_price("$1,234.50 USD"), "1");
        assert_eq!(extract_price("1,234,567"), "1");
    }

    #[test]
    fn integer_price() {
        assert_eq!(extract_price("Rs. 499 only"), "499");
    }

    #[test]
    fn first_token_wins() {
        assert_eq!(extract_price("was 20.00 now 15.00"), "20.00");
    }

    #[test]
    fn leading_dot_and_sign() {
        assert_eq!(extract_price("-.5 off"), "-.5");
    }

    #[test]
    fn no_number_gives_sentinel() {
        assert_eq!(extract_price("Contact us"), PRICE_NOT_AVAILABLE);
        assert_eq!(extract_price(""), PRICE_NOT_AVAILABLE);
    }

    #[test]
    fn description_defaults_when_missing_in_json() {
        let p: Product =
            serde_json::from_str(r#"{"image_path":"a.png","title":"Widget","price":"10.00"}"#)
                .unwrap();
        assert_eq!(p.title, "Widget");
        assert!(p.description.is_empty());
    }
}
