use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, ScrapeError};

pub const DEFAULT_URL: &str = "https://dentalstall.com/shop/";
pub const DEFAULT_STORE: &str = "redis://127.0.0.1:6379/0";

/// Runtime settings shared by the fetcher, the pipeline and the exporter.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Listing URL; the page number is appended as `?page=<n>`.
    pub url: String,
    /// Pages fetched when a run does not ask for a depth.
    pub page_depth: i64,
    /// Largest depth a run may ask for.
    pub max_page_depth: u32,
    /// Proxy used when a run does not bring its own.
    pub proxy: Option<String>,
    /// Total attempts per page, first one included.
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    pub export_dir: PathBuf,
    /// The CSV lands in `<export_dir>/export_<export_name>.csv`.
    pub export_name: String,
    pub export_fields: Vec<String>,
    pub show_progress: bool,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.retry_count < 1 {
            return Err(ScrapeError::Validation(
                "retry count must be at least 1".into(),
            ));
        }
        if self.max_page_depth < 1 {
            return Err(ScrapeError::Validation(
                "max page depth must be at least 1".into(),
            ));
        }
        if reqwest::Url::parse(&self.url).is_err() {
            return Err(ScrapeError::Validation(format!(
                "catalog url is not a valid url: {}",
                self.url
            )));
        }
        if self.export_fields.is_empty() {
            return Err(ScrapeError::Validation(
                "at least one export field is required".into(),
            ));
        }
        Ok(())
    }

    pub fn export_path(&self) -> PathBuf {
        self.export_dir.join(format!("export_{}.csv", self.export_name))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            page_depth: 1,
            max_page_depth: 500,
            proxy: None,
            retry_count: 3,
            retry_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(30),
            export_dir: PathBuf::from("."),
            export_name: "products".to_string(),
            export_fields: vec!["title".into(), "price".into(), "image_path".into()],
            show_progress: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn zero_retries_rejected() {
        let s = Settings {
            retry_count: 0,
            ..Default::default()
        };
        assert!(matches!(s.validate(), Err(ScrapeError::Validation(_))));
    }

    #[test]
    fn zero_max_depth_rejected() {
        let s = Settings {
            max_page_depth: 0,
            ..Default::default()
        };
        assert!(matches!(s.validate(), Err(ScrapeError::Validation(_))));
    }

    #[test]
    fn export_path_uses_name() {
        let s = Settings {
            export_dir: PathBuf::from("out"),
            export_name: "shop".into(),
            ..Default::default()
        };
        assert_eq!(s.export_path(), PathBuf::from("out/export_shop.csv"));
    }
}
