//! Zoho Books API client
//!
//! Uses the OAuth refresh-token grant. The access token is cached until
//! shortly before it expires; a 401 from the API forces one refresh and a
//! single retry of the request.

use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::ZohoConfig;
use crate::error::{AppError, AppResult};

/// Page size requested from the contacts endpoint (Zoho maximum)
pub const CONTACTS_PER_PAGE: u32 = 200;

/// Upper bound on pages followed in one listing (100k contacts)
pub const MAX_CONTACT_PAGES: u32 = 500;

/// Refresh this long before the advertised expiry
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + EXPIRY_MARGIN < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
}

/// Contact as returned by `GET /contacts`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZohoContact {
    pub contact_id: String,
    pub contact_name: String,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub mobile: Option<String>,
    #[serde(default)]
    pub gst_no: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub contact_type: Option<String>,
}

impl ZohoContact {
    /// Only active customer contacts become lab customers
    pub fn is_importable(&self) -> bool {
        let active = self.status.as_deref().map_or(true, |s| s == "active");
        let customer = self
            .contact_type
            .as_deref()
            .map_or(true, |t| t == "customer");
        active && customer
    }

    /// Display name: company name when present, else contact name
    pub fn display_name(&self) -> &str {
        self.company_name
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(&self.contact_name)
    }

    pub fn best_phone(&self) -> Option<&str> {
        self.phone
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .or_else(|| self.mobile.as_deref().filter(|p| !p.trim().is_empty()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageContext {
    pub page: u32,
    #[serde(default)]
    pub has_more_page: bool,
}

/// One page of the contacts listing
#[derive(Debug, Clone, Deserialize)]
pub struct ContactsPage {
    #[serde(default)]
    pub contacts: Vec<ZohoContact>,
    pub page_context: PageContext,
}

/// Zoho Books client
pub struct ZohoClient {
    client: Client,
    config: ZohoConfig,
    token: RwLock<Option<CachedToken>>,
    max_pages: u32,
}

impl ZohoClient {
    pub fn new(config: ZohoConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            token: RwLock::new(None),
            max_pages: MAX_CONTACT_PAGES,
        }
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// A usable access token. `stale` names a token the API just rejected;
    /// it is refreshed unless another request already replaced it.
    async fn access_token(&self, stale: Option<&str>) -> AppResult<String> {
        if stale.is_none() {
            if let Some(cached) = self.token.read().await.as_ref() {
                if cached.is_fresh() {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let mut guard = self.token.write().await;
        if let Some(cached) = guard.as_ref() {
            let rejected = stale == Some(cached.access_token.as_str());
            if cached.is_fresh() && !rejected {
                return Ok(cached.access_token.clone());
            }
        }

        let fresh = self.refresh_access_token().await?;
        let token = fresh.access_token.clone();
        *guard = Some(fresh);
        Ok(token)
    }

    async fn refresh_access_token(&self) -> AppResult<CachedToken> {
        let url = format!(
            "{}/oauth/v2/token",
            self.config.accounts_url.trim_end_matches('/')
        );
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", self.config.refresh_token.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        tracing::debug!("refreshing Zoho access token");

        let response = self
            .client
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("Zoho token request failed: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService(format!(
                "Zoho token refresh failed: {}",
                error_text
            )));
        }

        let body: TokenResponse = response.json().await.map_err(|e| {
            AppError::ExternalService(format!("Failed to parse Zoho token response: {}", e))
        })?;

        // Zoho reports grant errors with a 200 status
        match (body.access_token, body.error) {
            (Some(access_token), None) => Ok(CachedToken {
                access_token,
                expires_at: Instant::now() + Duration::from_secs(body.expires_in.unwrap_or(3600)),
            }),
            (_, Some(error)) => Err(AppError::ExternalService(format!(
                "Zoho token refresh failed: {}",
                error
            ))),
            (None, None) => Err(AppError::ExternalService(
                "Zoho token response carried no access token".to_string(),
            )),
        }
    }

    /// GET a Books endpoint, retrying once with a refreshed token on 401
    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> AppResult<T> {
        let url = format!("{}{}", self.config.api_base.trim_end_matches('/'), path);
        let mut token = self.access_token(None).await?;
        let mut retried = false;

        loop {
            let response = self
                .client
                .get(&url)
                .header(
                    reqwest::header::AUTHORIZATION,
                    format!("Zoho-oauthtoken {}", token),
                )
                .query(&[("organization_id", self.config.organization_id.as_str())])
                .query(query)
                .send()
                .await
                .map_err(|e| AppError::ExternalService(format!("Zoho request failed: {}", e)))?;

            if response.status() == StatusCode::UNAUTHORIZED && !retried {
                tracing::warn!(%path, "Zoho rejected access token; refreshing and retrying");
                token = self.access_token(Some(&token)).await?;
                retried = true;
                continue;
            }

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(AppError::ExternalService(format!(
                    "Zoho API error: {} - {}",
                    status, body
                )));
            }

            return response.json::<T>().await.map_err(|e| {
                AppError::ExternalService(format!("Failed to parse Zoho response: {}", e))
            });
        }
    }

    /// One page of contacts (1-based)
    pub async fn list_contacts_page(&self, page: u32) -> AppResult<ContactsPage> {
        self.get_json(
            "/contacts",
            &[
                ("page", page.to_string()),
                ("per_page", CONTACTS_PER_PAGE.to_string()),
            ],
        )
        .await
    }

    /// Every contact, following `has_more_page`. A listing that is still
    /// not exhausted after `max_pages` pages fails instead of looping.
    pub async fn fetch_all_contacts(&self) -> AppResult<Vec<ZohoContact>> {
        let mut contacts = Vec::new();
        for page in 1..=self.max_pages {
            let result = self.list_contacts_page(page).await?;
            tracing::debug!(page, count = result.contacts.len(), "fetched Zoho contacts page");
            contacts.extend(result.contacts);
            if !result.page_context.has_more_page {
                return Ok(contacts);
            }
        }
        tracing::warn!(max_pages = self.max_pages, "Zoho contact listing did not end");
        Err(AppError::ExternalService(format!(
            "Zoho contact listing exceeded {} pages",
            self.max_pages
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Query, State},
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use std::collections::HashMap;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[derive(Default)]
    struct MockZoho {
        token_calls: AtomicUsize,
        contact_calls: AtomicUsize,
        // Every page claims another one follows
        endless: bool,
    }

    async fn token(State(mock): State<Arc<MockZoho>>) -> Json<serde_json::Value> {
        let n = mock.token_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Json(serde_json::json!({ "access_token": format!("token-{}", n), "expires_in": 3600 }))
    }

    async fn contacts(
        State(mock): State<Arc<MockZoho>>,
        headers: HeaderMap,
        Query(query): Query<HashMap<String, String>>,
    ) -> Result<Json<serde_json::Value>, StatusCode> {
        mock.contact_calls.fetch_add(1, Ordering::SeqCst);
        // The first issued token is treated as revoked
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if auth == "Zoho-oauthtoken token-1" {
            return Err(StatusCode::UNAUTHORIZED);
        }
        assert_eq!(query.get("per_page").map(String::as_str), Some("200"));
        let page: u32 = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
        Ok(Json(serde_json::json!({
            "code": 0,
            "contacts": [{ "contact_id": format!("c{}", page), "contact_name": "Acme Fuels" }],
            "page_context": { "page": page, "per_page": 200, "has_more_page": mock.endless || page < 2 }
        })))
    }

    async fn spawn_mock(endless: bool) -> (String, Arc<MockZoho>) {
        let mock = Arc::new(MockZoho {
            endless,
            ..Default::default()
        });
        let app = Router::new()
            .route("/oauth/v2/token", post(token))
            .route("/books/v3/contacts", get(contacts))
            .with_state(mock.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), mock)
    }

    fn config(base: &str) -> ZohoConfig {
        ZohoConfig {
            accounts_url: base.to_string(),
            api_base: format!("{}/books/v3", base),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            refresh_token: "refresh".to_string(),
            organization_id: "org".to_string(),
        }
    }

    #[tokio::test]
    async fn test_retries_once_after_unauthorized_and_paginates() {
        let (base, mock) = spawn_mock(false).await;
        let client = ZohoClient::new(config(&base));

        let contacts = client.fetch_all_contacts().await.unwrap();

        assert_eq!(
            contacts.iter().map(|c| c.contact_id.as_str()).collect::<Vec<_>>(),
            vec!["c1", "c2"]
        );
        // token-1 rejected once, token-2 used for both pages
        assert_eq!(mock.token_calls.load(Ordering::SeqCst), 2);
        assert_eq!(mock.contact_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_listing_stops_at_page_limit() {
        let (base, mock) = spawn_mock(true).await;
        let client = ZohoClient::new(config(&base)).with_max_pages(3);

        let err = client.fetch_all_contacts().await.unwrap_err();

        assert!(matches!(err, AppError::ExternalService(ref m) if m.contains("3 pages")));
        // one rejected call, then pages 1 to 3
        assert_eq!(mock.contact_calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_contact_mapping_helpers() {
        let contact = ZohoContact {
            contact_id: "1".into(),
            contact_name: "R. Sharma".into(),
            company_name: Some("Sharma Petroleum".into()),
            email: None,
            phone: Some(" ".into()),
            mobile: Some("+91 98200 00000".into()),
            gst_no: None,
            status: Some("active".into()),
            contact_type: Some("customer".into()),
        };
        assert_eq!(contact.display_name(), "Sharma Petroleum");
        assert_eq!(contact.best_phone(), Some("+91 98200 00000"));
        assert!(contact.is_importable());

        let vendor = ZohoContact {
            contact_type: Some("vendor".into()),
            ..contact
        };
        assert!(!vendor.is_importable());
    }
}
