//!
//! src/errors.rs
//!
//! Defines enums and methods of error conversion
//! for errors the chart crawler uses. Only a handful of kinds abort a run,
//! the rest degrade the run to a smaller result set.
//!

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlerError {
    #[error("config error: {0}")]
    Config(String),
    #[error("connection failure: {0}")]
    Connection(String),
    #[error("http status {status}: {context}")]
    Http { status: u16, context: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("db error: {0}")]
    Db(String),
    #[error("lookup exhausted for track: {0}")]
    LookupExhausted(String),
    #[error("partial enrichment for {track}: missing {missing:?}")]
    PartialEnrichment { track: String, missing: Vec<String> },
    #[error("comparison unavailable: no previous snapshot")]
    ComparisonUnavailable,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error)
}

impl CrawlerError {
    /// Whether the error abandons the current run. Everything else is
    /// logged at the point it happens and the run carries on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CrawlerError::Config(_) | CrawlerError::Connection(_) | CrawlerError::Io(_)
        )
    }
}

impl From<reqwest::Error> for CrawlerError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => CrawlerError::Http {
                status: status.as_u16(),
                context: e.to_string()
            },
            None if e.is_decode() => CrawlerError::Parse(e.to_string()),
            None => CrawlerError::Connection(e.to_string())
        }
    }
}

impl From<serde_json::Error> for CrawlerError {
    fn from(e: serde_json::Error) -> Self { CrawlerError::Parse(e.to_string()) }
}

impl From<sqlx::Error> for CrawlerError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Tls(_) => CrawlerError::Connection(e.to_string()),
            _ => CrawlerError::Db(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_class_errors_are_fatal() {
        assert!(CrawlerError::Connection("db down".into()).is_fatal());
        assert!(CrawlerError::Config("SPOTIFY_CLIENT_ID was not set".into()).is_fatal());

        assert!(!CrawlerError::LookupExhausted("Some Song".into()).is_fatal());
        assert!(!CrawlerError::ComparisonUnavailable.is_fatal());
        assert!(!CrawlerError::PartialEnrichment {
            track: "Some Song".into(),
            missing: vec!["tempo".into()]
        }.is_fatal());
        assert!(!CrawlerError::Http { status: 404, context: "x".into() }.is_fatal());
        assert!(!CrawlerError::Db("UNIQUE constraint failed".into()).is_fatal());
    }

    #[test]
    fn pool_timeouts_are_connection_failures() {
        let err: CrawlerError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, CrawlerError::Connection(_)));

        let err: CrawlerError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, CrawlerError::Db(_)));
    }
}
