//! Market directory client: paginated, retried fetch of active events.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use super::types::{EventRecord, GammaEvent};
use crate::config::Config;
use crate::error::MarketError;
use crate::metrics;

/// Source of active market definitions.
#[async_trait]
pub trait MarketDirectory: Send + Sync {
    /// Every active, open event with its markets.
    ///
    /// Failures are logged and yield an empty list for this cycle.
    async fn list_active_events(&self) -> Vec<EventRecord>;
}

/// Gamma API directory client.
#[derive(Debug, Clone)]
pub struct GammaDirectory {
    http: reqwest::Client,
    base_url: String,
    page_size: u32,
    max_pages: u32,
    max_retries: u32,
    retry_delay: Duration,
}

impl GammaDirectory {
    /// Build a client from configuration.
    pub fn from_config(config: &Config) -> Result<Self, MarketError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(4)
            .build()?;

        Ok(Self {
            http,
            base_url: config.polymarket_gamma_url.trim_end_matches('/').to_string(),
            page_size: config.directory_page_size.max(1),
            max_pages: config.directory_max_pages.max(1),
            max_retries: config.max_retries,
            retry_delay: Duration::from_secs(config.retry_delay_seconds),
        })
    }

    /// Point the client at another base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Directory base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn events_url(&self) -> String {
        format!("{}/events", self.base_url)
    }

    /// Fetch one page of raw events. Records are decoded by the caller so a
    /// single bad one cannot fail the page.
    #[instrument(skip(self))]
    async fn fetch_page(&self, offset: u32) -> Result<Vec<Value>, MarketError> {
        let start = Instant::now();
        let response = self
            .http
            .get(self.events_url())
            .query(&[
                ("active", "true".to_string()),
                ("closed", "false".to_string()),
                ("limit", self.page_size.to_string()),
                ("offset", offset.to_string()),
            ])
            .send()
            .await?;
        metrics::record_http_latency(start, "events");

        let status = response.status();
        if !status.is_success() {
            return Err(MarketError::BadStatus {
                status: status.as_u16(),
            });
        }

        response
            .json::<Vec<Value>>()
            .await
            .map_err(|e| MarketError::ParseError(format!("events page at offset {offset}: {e}")))
    }

    /// Fetch one page, retrying with a fixed delay.
    ///
    /// Only transport and status failures are retried. A body that is not an
    /// event array will not improve on a second read.
    async fn fetch_page_with_retry(&self, offset: u32) -> Result<Vec<Value>, MarketError> {
        let attempts = self.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.fetch_page(offset).await {
                Ok(events) => return Ok(events),
                Err(e @ MarketError::ParseError(_)) => {
                    warn!(offset, error = %e, "Directory page undecodable");
                    return Err(e);
                }
                Err(e) => {
                    warn!(attempt, attempts, offset, error = %e, "Directory request failed");
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        Err(MarketError::DirectoryFetchFailed {
            url: self.events_url(),
            reason: last_error,
        })
    }

    /// Fetch every page of active events and normalise them.
    pub async fn fetch_events(&self) -> Result<Vec<EventRecord>, MarketError> {
        let mut events = Vec::new();

        for page in 0..self.max_pages {
            let offset = page * self.page_size;
            let batch = self.fetch_page_with_retry(offset).await?;
            let count = batch.len();
            let decoded = decode_events(batch, offset);
            debug!(page, offset, count, decoded = decoded.len(), "Fetched directory page");

            events.extend(decoded.into_iter().map(EventRecord::from));

            if count < self.page_size as usize {
                break;
            }
        }

        info!(events = events.len(), "Fetched market directory");
        Ok(events)
    }
}

/// Decode each event on its own, logging and dropping the ones that fail.
fn decode_events(raw: Vec<Value>, offset: u32) -> Vec<GammaEvent> {
    raw.into_iter()
        .enumerate()
        .filter_map(|(index, value)| {
            let title = value
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or("<untitled>")
                .to_string();
            match serde_json::from_value::<GammaEvent>(value) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(offset, index, title = %title, error = %e, "Skipping malformed event");
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl MarketDirectory for GammaDirectory {
    async fn list_active_events(&self) -> Vec<EventRecord> {
        match self.fetch_events().await {
            Ok(events) => events,
            Err(e) => {
                error!(error = %e, "Market directory unavailable, skipping this cycle");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn directory(server: &MockServer, page_size: u32) -> GammaDirectory {
        let mut config = test_config();
        config.directory_page_size = page_size;
        config.directory_max_pages = 3;
        config.max_retries = 2;
        GammaDirectory::from_config(&config)
            .unwrap()
            .with_base_url(server.uri())
            .with_retry_delay(Duration::from_millis(10))
    }

    fn event(title: &str) -> serde_json::Value {
        json!({
            "title": title,
            "endDate": "2026-03-01T00:00:00Z",
            "markets": [{
                "question": "BTC above 100k?",
                "conditionId": "0x1",
                "clobTokenIds": "[\"1\", \"2\"]",
                "outcomes": "[\"Yes\", \"No\"]",
                "active": true,
                "closed": false
            }]
        })
    }

    #[tokio::test]
    async fn paginates_until_short_page() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/events"))
            .and(query_param("offset", "0"))
            .and(query_param("active", "true"))
            .and(query_param("closed", "false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([event("a"), event("b")])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .and(query_param("offset", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([event("c")])))
            .mount(&server)
            .await;

        let events = directory(&server, 2).fetch_events().await.unwrap();

        let titles: Vec<_> = events.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "b", "c"]);
        assert_eq!(events[0].markets[0].tokens.as_slice(), ["1", "2"]);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([event("a")])))
            .mount(&server)
            .await;

        let events = directory(&server, 10).fetch_events().await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn malformed_records_are_skipped_not_fatal() {
        let server = MockServer::start().await;

        let mut bad_market = event("bad market");
        bad_market["markets"][0]["active"] = json!("true");
        let mut bad_event = event("bad event");
        bad_event["active"] = json!("yes");

        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                event("good"),
                bad_market,
                bad_event,
                {"title": "null markets", "markets": null}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let events = directory(&server, 10).list_active_events().await;

        let titles: Vec<_> = events.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["good", "bad market", "null markets"]);
        assert_eq!(events[0].markets.len(), 1);
        assert!(events[1].markets.is_empty());
    }

    #[tokio::test]
    async fn skipped_events_still_count_toward_full_page() {
        let server = MockServer::start().await;

        let mut bad_event = event("b");
        bad_event["closed"] = json!("no");
        Mock::given(method("GET"))
            .and(path("/events"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([event("a"), bad_event])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .and(query_param("offset", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([event("c")])))
            .mount(&server)
            .await;

        let events = directory(&server, 2).fetch_events().await.unwrap();
        let titles: Vec<_> = events.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn non_array_body_is_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "maintenance"})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = directory(&server, 10);
        assert!(matches!(dir.fetch_events().await, Err(MarketError::ParseError(_))));
    }

    #[tokio::test]
    async fn exhausted_retries_yield_empty_cycle() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(500))
            .expect(6)
            .mount(&server)
            .await;

        let dir = directory(&server, 10);
        assert!(matches!(
            dir.fetch_events().await,
            Err(MarketError::DirectoryFetchFailed { .. })
        ));
        assert!(dir.list_active_events().await.is_empty());
    }
}
