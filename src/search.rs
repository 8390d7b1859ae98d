// Symbol Search Aggregator - fans a query out to every provider with a
// credential, tolerates per-provider failure, dedupes and caches results

use crate::core::config::{FeedConfig, ProviderConfig, ProviderCredentials};
use crate::core::types::SymbolMatch;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct CacheEntry {
    results: Vec<SymbolMatch>,
    fetched_at: Instant,
}

/// Query fan-out with a TTL cache keyed by the normalized query. Entries are
/// immutable once written, so a racing duplicate fetch is harmless.
pub struct SymbolSearch {
    client: reqwest::Client,
    config: ProviderConfig,
    ttl: Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl SymbolSearch {
    pub fn new(config: &FeedConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.providers.request_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            config: config.providers.clone(),
            ttl: Duration::from_secs(config.search_cache_ttl_secs),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Search all credentialed providers for `query`. Individual provider
    /// failures degrade to partial results; no credentials at all returns an
    /// empty set rather than an error.
    pub async fn search(
        &self,
        query: &str,
        credentials: &ProviderCredentials,
    ) -> Vec<SymbolMatch> {
        let normalized = query.trim().to_uppercase();
        if normalized.is_empty() {
            return Vec::new();
        }

        if let Some(results) = self.cache_get(&normalized) {
            debug!(query = %normalized, "Search cache hit");
            return results;
        }

        // One request per credentialed provider, concurrently
        let (finnhub, alpha_vantage, twelve_data) = tokio::join!(
            self.query_finnhub(&normalized, credentials.finnhub_api_key.as_deref()),
            self.query_alpha_vantage(&normalized, credentials.alpha_vantage_api_key.as_deref()),
            self.query_twelve_data(&normalized, credentials.twelve_data_api_key.as_deref()),
        );

        if finnhub.is_none() && alpha_vantage.is_none() && twelve_data.is_none() {
            debug!(query = %normalized, "No search credentials configured");
            return Vec::new();
        }

        // Dedupe by symbol, first seen wins, providers in fixed order
        let mut seen: HashSet<String> = HashSet::new();
        let mut merged: Vec<SymbolMatch> = Vec::new();
        for batch in [finnhub, alpha_vantage, twelve_data].into_iter().flatten() {
            for item in batch {
                if seen.insert(item.symbol.clone()) {
                    merged.push(item);
                }
            }
        }

        self.cache_put(normalized, merged.clone());
        merged
    }

    fn cache_get(&self, normalized: &str) -> Option<Vec<SymbolMatch>> {
        let cache = self.cache.lock();
        let entry = cache.get(normalized)?;
        if entry.fetched_at.elapsed() < self.ttl {
            Some(entry.results.clone())
        } else {
            None
        }
    }

    fn cache_put(&self, normalized: String, results: Vec<SymbolMatch>) {
        self.cache.lock().insert(
            normalized,
            CacheEntry { results, fetched_at: Instant::now() },
        );
    }

    async fn query_finnhub(&self, query: &str, api_key: Option<&str>) -> Option<Vec<SymbolMatch>> {
        let api_key = api_key?;
        let url = format!("{}/search", self.config.finnhub_rest_url);
        let response = self
            .client
            .get(&url)
            .query(&[("q", query), ("token", api_key)])
            .send()
            .await;
        Some(handle_response("finnhub", response, parse_finnhub_search).await)
    }

    async fn query_alpha_vantage(
        &self,
        query: &str,
        api_key: Option<&str>,
    ) -> Option<Vec<SymbolMatch>> {
        let api_key = api_key?;
        let response = self
            .client
            .get(&self.config.alpha_vantage_url)
            .query(&[
                ("function", "SYMBOL_SEARCH"),
                ("keywords", query),
                ("apikey", api_key),
            ])
            .send()
            .await;
        Some(handle_response("alpha_vantage", response, parse_alpha_vantage_search).await)
    }

    async fn query_twelve_data(
        &self,
        query: &str,
        api_key: Option<&str>,
    ) -> Option<Vec<SymbolMatch>> {
        let api_key = api_key?;
        let url = format!("{}/symbol_search", self.config.twelve_data_rest_url);
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", query), ("apikey", api_key)])
            .send()
            .await;
        Some(handle_response("twelve_data", response, parse_twelve_data_search).await)
    }
}

/// Resolve one provider response, degrading any failure to an empty batch.
async fn handle_response(
    provider: &str,
    response: Result<reqwest::Response, reqwest::Error>,
    parse: fn(&Value) -> Vec<SymbolMatch>,
) -> Vec<SymbolMatch> {
    match response {
        Ok(response) => match response.json::<Value>().await {
            Ok(body) => parse(&body),
            Err(e) => {
                warn!(provider = provider, error = %e, "Search response was not JSON");
                Vec::new()
            }
        },
        Err(e) => {
            warn!(provider = provider, error = %e, "Search request failed");
            Vec::new()
        }
    }
}

fn parse_finnhub_search(body: &Value) -> Vec<SymbolMatch> {
    body.get("result")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let symbol = item.get("symbol")?.as_str()?;
                    let description = item
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    Some(SymbolMatch {
                        symbol: symbol.to_string(),
                        description: description.to_string(),
                        source: "finnhub".to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_alpha_vantage_search(body: &Value) -> Vec<SymbolMatch> {
    body.get("bestMatches")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let symbol = item.get("1. symbol")?.as_str()?;
                    let description =
                        item.get("2. name").and_then(Value::as_str).unwrap_or_default();
                    Some(SymbolMatch {
                        symbol: symbol.to_string(),
                        description: description.to_string(),
                        source: "alpha_vantage".to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_twelve_data_search(body: &Value) -> Vec<SymbolMatch> {
    body.get("data")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let symbol = item.get("symbol")?.as_str()?;
                    let description = item
                        .get("instrument_name")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    Some(SymbolMatch {
                        symbol: symbol.to_string(),
                        description: description.to_string(),
                        source: "twelve_data".to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::FeedConfig;

    #[test]
    fn test_parse_finnhub_result() {
        let body: Value = serde_json::from_str(
            r#"{"count":2,"result":[
                {"symbol":"AAPL","description":"APPLE INC","displaySymbol":"AAPL","type":"Common Stock"},
                {"symbol":"AAPL.SW","description":"APPLE INC","displaySymbol":"AAPL.SW","type":"Common Stock"}
            ]}"#,
        )
        .unwrap();
        let results = parse_finnhub_search(&body);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].symbol, "AAPL");
        assert_eq!(results[0].source, "finnhub");
    }

    #[test]
    fn test_parse_alpha_vantage_best_matches() {
        let body: Value = serde_json::from_str(
            r#"{"bestMatches":[{"1. symbol":"AAPL","2. name":"Apple Inc","4. region":"United States"}]}"#,
        )
        .unwrap();
        let results = parse_alpha_vantage_search(&body);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].description, "Apple Inc");
        assert_eq!(results[0].source, "alpha_vantage");
    }

    #[test]
    fn test_parse_twelve_data_results() {
        let body: Value = serde_json::from_str(
            r#"{"data":[{"symbol":"AAPL","instrument_name":"Apple Inc","exchange":"NASDAQ"}]}"#,
        )
        .unwrap();
        let results = parse_twelve_data_search(&body);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, "twelve_data");
    }

    #[test]
    fn test_parse_tolerates_malformed_bodies() {
        let empty: Value = serde_json::from_str("{}").unwrap();
        assert!(parse_finnhub_search(&empty).is_empty());
        assert!(parse_alpha_vantage_search(&empty).is_empty());
        assert!(parse_twelve_data_search(&empty).is_empty());
    }

    #[tokio::test]
    async fn test_no_credentials_returns_empty() {
        let search = SymbolSearch::new(&FeedConfig::default());
        let results = search.search("AAPL", &ProviderCredentials::default()).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_blank_query_short_circuits() {
        let search = SymbolSearch::new(&FeedConfig::default());
        let results = search.search("   ", &ProviderCredentials::default()).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_cache_hit_is_served_before_fanout() {
        let search = SymbolSearch::new(&FeedConfig::default());
        let cached = vec![SymbolMatch {
            symbol: "AAPL".to_string(),
            description: "Apple Inc".to_string(),
            source: "finnhub".to_string(),
        }];
        search.cache_put("AAPL".to_string(), cached.clone());

        // Normalization maps the raw query onto the cached key; no
        // credentials are needed on a cache hit
        let results = search.search("  aapl ", &ProviderCredentials::default()).await;
        assert_eq!(results, cached);
    }

    #[tokio::test]
    async fn test_expired_cache_entry_is_ignored() {
        let mut config = FeedConfig::default();
        config.search_cache_ttl_secs = 0;
        let search = SymbolSearch::new(&config);
        search.cache_put(
            "AAPL".to_string(),
            vec![SymbolMatch {
                symbol: "AAPL".to_string(),
                description: "Apple Inc".to_string(),
                source: "finnhub".to_string(),
            }],
        );
        // TTL of zero expires immediately; with no credentials the fan-out
        // yields nothing
        let results = search.search("AAPL", &ProviderCredentials::default()).await;
        assert!(results.is_empty());
    }
}
