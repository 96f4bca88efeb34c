use serde::{Deserialize, Serialize};
use tracing::info;

use crate::pipeline::ScrapeSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Total {
    pub total: usize,
}

/// Counts for one session. Record payloads are left out on purpose so the
/// API response stays small.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub scraped: Total,
    pub updated: Total,
}

pub fn summarize(session: &ScrapeSession) -> Report {
    Report {
        scraped: Total {
            total: session.scraped.len(),
        },
        updated: Total {
            total: session.updated.len(),
        },
    }
}

impl From<&ScrapeSession> for Report {
    fn from(session: &ScrapeSession) -> Self {
        summarize(session)
    }
}

/// Where end-of-session messages go.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, message: &str) {
        info!("{}", message);
    }
}
