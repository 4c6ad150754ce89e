//! Supabase Symbol Lookup Adapter
//!
//! Reads provider codes from a PostgREST table keyed by canonical ticker:
//!
//! ```text
//! GET {url}/rest/v1/{table}?select=short_name&symbol=eq.{ticker}&limit=1
//! apikey: {service_key}
//! Authorization: Bearer {service_key}
//! ```

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::application::ports::{LookupError, SymbolLookupPort};
use crate::infrastructure::config::{Secret, SupabaseSettings};

#[derive(Debug, Deserialize)]
struct MappingRow {
    #[serde(default)]
    short_name: Option<String>,
}

/// Symbol lookup backed by a Supabase table.
#[derive(Debug, Clone)]
pub struct SupabaseSymbolLookup {
    client: Client,
    endpoint: String,
    service_key: Secret,
}

impl SupabaseSymbolLookup {
    /// Create a lookup client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: &SupabaseSettings) -> Result<Self, LookupError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| LookupError::Transport {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/rest/v1/{}",
                settings.url.trim_end_matches('/'),
                settings.table
            ),
            service_key: settings.service_key.clone(),
        })
    }
}

#[async_trait]
impl SymbolLookupPort for SupabaseSymbolLookup {
    #[tracing::instrument(skip(self), level = "debug")]
    async fn lookup(&self, canonical_ticker: &str) -> Result<Option<String>, LookupError> {
        let symbol_filter = format!("eq.{canonical_ticker}");
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("select", "short_name"),
                ("symbol", symbol_filter.as_str()),
                ("limit", "1"),
            ])
            .header("apikey", self.service_key.expose())
            .bearer_auth(self.service_key.expose())
            .send()
            .await
            .map_err(|e| LookupError::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Symbol lookup failed");
            return Err(LookupError::Status {
                status: status.as_u16(),
            });
        }

        let rows: Vec<MappingRow> =
            response
                .json()
                .await
                .map_err(|e| LookupError::InvalidResponse {
                    message: e.to_string(),
                })?;

        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.short_name)
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn lookup_for(server: &MockServer) -> SupabaseSymbolLookup {
        SupabaseSymbolLookup::new(&SupabaseSettings {
            url: server.uri(),
            service_key: Secret::new("service-key".to_string()),
            table: "nse_master_list".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn returns_short_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/nse_master_list"))
            .and(query_param("select", "short_name"))
            .and(query_param("symbol", "eq.RELIANCE"))
            .and(query_param("limit", "1"))
            .and(header("apikey", "service-key"))
            .and(header("authorization", "Bearer service-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"short_name": "RELIND"}])))
            .expect(1)
            .mount(&server)
            .await;

        let code = lookup_for(&server).lookup("RELIANCE").await.unwrap();
        assert_eq!(code.as_deref(), Some("RELIND"));
    }

    #[tokio::test]
    async fn empty_result_is_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        assert_eq!(lookup_for(&server).lookup("UNKNOWN").await.unwrap(), None);
    }

    #[tokio::test]
    async fn blank_short_name_is_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"short_name": "   "}])),
            )
            .mount(&server)
            .await;

        assert_eq!(lookup_for(&server).lookup("TCS").await.unwrap(), None);
    }

    #[tokio::test]
    async fn null_short_name_is_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"short_name": null}])))
            .mount(&server)
            .await;

        assert_eq!(lookup_for(&server).lookup("TCS").await.unwrap(), None);
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = lookup_for(&server).lookup("TCS").await.unwrap_err();
        assert!(matches!(err, LookupError::Status { status: 503 }));
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = lookup_for(&server).lookup("TCS").await.unwrap_err();
        assert!(matches!(err, LookupError::InvalidResponse { .. }));
    }
}
