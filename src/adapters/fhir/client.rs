//! HTTP implementation of [`FhirStore`]
//!
//! Reads, searches and history requests are retried with exponential backoff on
//! connection failures, timeouts and 5xx responses. Transactions are never
//! retried.

use super::models::{Bundle, HistoryEntry, SearchResult};
use super::FhirStore;
use crate::config::{basic_authorization, bearer_authorization, FhirServerConfig, SecretString};
use crate::domain::{AddressBookError, FhirError, Resource, ResourceKind, Result};
use crate::log_retry_attempt;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, ClientBuilder, RequestBuilder, Response, StatusCode};
use secrecy::ExposeSecret;
use serde_json::Value;
use std::time::Duration;

const FHIR_JSON: &str = "application/fhir+json";

/// FHIR REST client
///
/// # Example
///
/// ```no_run
/// use addressbook_sync::adapters::fhir::{FhirClient, FhirStore};
/// use addressbook_sync::config::FhirServerConfig;
/// use addressbook_sync::domain::ResourceKind;
///
/// # async fn example() -> addressbook_sync::domain::Result<()> {
/// let client = FhirClient::new(&FhirServerConfig::for_url("https://ad.example.org/fhir"))?;
/// let organization = client.read(ResourceKind::Organization, "123").await?;
/// println!("{:?}", organization.name());
/// # Ok(())
/// # }
/// ```
pub struct FhirClient {
    base_url: String,
    client: Client,
    authorization: Option<SecretString>,
    config: FhirServerConfig,
}

impl FhirClient {
    /// Builds a client for one server
    ///
    /// # Errors
    ///
    /// Returns [`AddressBookError::Configuration`] if the base URL is invalid or
    /// the HTTP client cannot be built.
    pub fn new(config: &FhirServerConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        url::Url::parse(&base_url).map_err(|e| {
            AddressBookError::Configuration(format!("Invalid FHIR base URL '{base_url}': {e}"))
        })?;

        let mut client_builder = ClientBuilder::new()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(30));

        if !config.tls_verify {
            tracing::warn!(base_url = %base_url, "TLS certificate verification disabled");
            client_builder = client_builder.danger_accept_invalid_certs(true);
        }

        let client = client_builder.build().map_err(|e| {
            AddressBookError::Configuration(format!("Failed to build HTTP client: {e}"))
        })?;

        let authorization = match config.auth_type.as_str() {
            "basic" => match (&config.username, &config.password) {
                (Some(username), Some(password)) => Some(basic_authorization(username, password)),
                _ => None,
            },
            "bearer" => config.token.as_ref().map(bearer_authorization),
            _ => None,
        };

        Ok(Self {
            base_url,
            client,
            authorization,
            config: config.clone(),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(ACCEPT, FHIR_JSON);
        match &self.authorization {
            Some(value) => {
                let header: &str = value.expose_secret().as_ref();
                request.header(AUTHORIZATION, header)
            }
            None => request,
        }
    }

    /// Retry a request with exponential backoff
    async fn retry_request<F, T, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let retry = &self.config.retry;
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    attempt += 1;
                    let transient = matches!(&e, AddressBookError::Fhir(fhir) if fhir.is_transient());
                    if !transient || attempt >= retry.max_retries {
                        return Err(e);
                    }

                    let delay_ms = (retry.initial_delay_ms as f64
                        * retry.backoff_multiplier.powf((attempt - 1) as f64))
                        as u64;
                    let delay_ms = delay_ms.min(retry.max_delay_ms);

                    log_retry_attempt!(attempt, retry.max_retries, delay_ms, e);

                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }

    /// One GET returning a JSON body
    async fn get_json(&self, url: &str, query: &[(String, String)]) -> Result<Value> {
        self.retry_request(|| async {
            let request = self.authorize(self.client.get(url).query(query));
            let response = request.send().await.map_err(transport_error)?;
            read_json(response, url).await
        })
        .await
    }

    /// Follows a bundle's `next` links up to `max_pages`, collecting each page
    async fn get_pages(&self, url: &str, query: Vec<(String, String)>) -> Result<Vec<Bundle>> {
        let first = Bundle::from_json(self.get_json(url, &query).await?)
            .map_err(|e| FhirError::InvalidResponse(format!("{url}: {e}")))?;

        let mut next = first.next_link().map(str::to_string);
        let mut pages = vec![first];

        while let Some(next_url) = next.take() {
            if pages.len() >= self.config.max_pages {
                tracing::warn!(
                    url = %url,
                    max_pages = self.config.max_pages,
                    "Page limit reached, remaining results ignored"
                );
                break;
            }
            let page = Bundle::from_json(self.get_json(&next_url, &[]).await?)
                .map_err(|e| FhirError::InvalidResponse(format!("{next_url}: {e}")))?;
            next = page.next_link().map(str::to_string);
            pages.push(page);
        }

        Ok(pages)
    }

    fn count_param(&self) -> (String, String) {
        ("_count".to_string(), self.config.page_size.to_string())
    }
}

#[async_trait]
impl FhirStore for FhirClient {
    async fn read(&self, kind: ResourceKind, id: &str) -> Result<Resource> {
        let url = format!("{}/{}/{}", self.base_url, kind, id);
        tracing::debug!(url = %url, "Reading resource");
        let value = self.get_json(&url, &[]).await?;
        Resource::from_json(value)
            .map_err(|e| FhirError::InvalidResponse(format!("{url}: {e}")).into())
    }

    async fn search(&self, kind: ResourceKind, params: &[(&str, String)]) -> Result<SearchResult> {
        let url = format!("{}/{}", self.base_url, kind);
        let mut query: Vec<(String, String)> = params
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        if !params.iter().any(|(name, _)| *name == "_count") {
            query.push(self.count_param());
        }

        tracing::debug!(url = %url, params = ?params, "Searching");

        let mut result = SearchResult::default();
        for page in self.get_pages(&url, query).await? {
            result.extend_from_page(&page);
        }
        Ok(result)
    }

    async fn history(
        &self,
        kind: ResourceKind,
        id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<HistoryEntry>> {
        let url = match id {
            Some(id) => format!("{}/{}/{}/_history", self.base_url, kind, id),
            None => format!("{}/{}/_history", self.base_url, kind),
        };
        let mut query = vec![self.count_param()];
        if let Some(since) = since {
            query.push((
                "_since".to_string(),
                since.to_rfc3339_opts(SecondsFormat::Millis, true),
            ));
        }

        tracing::debug!(url = %url, since = ?since, "Reading history");

        let entries = self
            .get_pages(&url, query)
            .await?
            .iter()
            .flat_map(|page| page.entry.iter())
            .filter_map(HistoryEntry::from_entry)
            .collect();
        Ok(entries)
    }

    async fn transaction(&self, bundle: &Bundle) -> Result<Bundle> {
        tracing::debug!(
            url = %self.base_url,
            entries = bundle.entry.len(),
            "Submitting transaction"
        );

        let request = self
            .authorize(self.client.post(&self.base_url))
            .header(CONTENT_TYPE, FHIR_JSON)
            .json(bundle);
        let response = request.send().await.map_err(transport_error)?;
        let value = read_json(response, &self.base_url).await?;

        Bundle::from_json(value).map_err(|e| {
            FhirError::InvalidResponse(format!("Transaction response: {e}")).into()
        })
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn transport_error(err: reqwest::Error) -> AddressBookError {
    if err.is_timeout() {
        FhirError::Timeout(err.to_string()).into()
    } else {
        FhirError::ConnectionFailed(err.to_string()).into()
    }
}

/// Maps a status code and response body to a [`FhirError`]
fn status_error(status: StatusCode, url: &str, body: String) -> FhirError {
    match status {
        StatusCode::NOT_FOUND => FhirError::NotFound(url.to_string()),
        StatusCode::GONE => FhirError::Gone(url.to_string()),
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
            FhirError::Conflict(format!("{url}: {body}"))
        }
        s if s.is_server_error() => FhirError::ServerError {
            status: s.as_u16(),
            message: body,
        },
        s => FhirError::ClientError {
            status: s.as_u16(),
            message: body,
        },
    }
}

async fn read_json(response: Response, url: &str) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(status, url, body).into());
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !content_type.contains("json") {
        return Err(FhirError::InvalidResponse(format!(
            "{url}: unexpected content type '{content_type}'"
        ))
        .into());
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| FhirError::InvalidResponse(format!("{url}: {e}")).into())
}
