//! Repository configuration.

use serde::{Deserialize, Serialize};

/// Post listing configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Collection holding post documents.
    pub collection: String,

    /// Page size for `fetch_page` when the caller gives none.
    /// Default: 5
    pub default_page_size: usize,

    /// Result bound for realtime subscriptions when the caller gives none.
    /// Default: 20
    pub realtime_page_size: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            collection: "posts".to_string(),
            default_page_size: 5,
            realtime_page_size: 20,
        }
    }
}

impl FeedConfig {
    /// Parse from JSON; absent keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FeedConfig::default();
        assert_eq!(config.collection, "posts");
        assert_eq!(config.default_page_size, 5);
        assert_eq!(config.realtime_page_size, 20);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = FeedConfig::from_json(r#"{ "collection": "articles" }"#).unwrap();
        assert_eq!(config.collection, "articles");
        assert_eq!(config.default_page_size, 5);
        assert_eq!(config.realtime_page_size, 20);
    }

    #[test]
    fn test_invalid_json() {
        assert!(FeedConfig::from_json(r#"{ "default_page_size": "five" }"#).is_err());
    }
}
