//! HTTP billing service client.
//!
//! - `GET {base}/balance?group={group}` returns `{"amount": f64, "identity": str}`
//! - `POST {base}/consume` with `{"group", "identity", "amount", "app_name"}`

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{BillingError, BillingResult};
use crate::service::{BillingService, GroupBalance};

#[derive(Debug, Serialize)]
struct ConsumeRequest<'a> {
    group: &'a str,
    identity: &'a str,
    amount: f64,
    app_name: &'a str,
}

/// Billing service reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpBillingService {
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
}

impl HttpBillingService {
    /// Create a client for the service at `base_url`
    ///
    /// # Errors
    /// Fails on an invalid URL or when the HTTP client cannot be built.
    pub fn new(base_url: &str, api_key: Option<SecretString>, timeout: Duration) -> BillingResult<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }

    async fn check(response: Response) -> BillingResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(BillingError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl BillingService for HttpBillingService {
    async fn get_balance(&self, group: &str) -> BillingResult<GroupBalance> {
        let url = self.base_url.join("balance")?;
        let response = self
            .authorize(self.client.get(url).query(&[("group", group)]))
            .send()
            .await?;
        let balance: GroupBalance = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| BillingError::Decode(e.to_string()))?;
        debug!(group = %group, amount = balance.amount, "Fetched group balance");
        Ok(balance)
    }

    async fn consume(
        &self,
        group: &str,
        identity: &str,
        amount: f64,
        app_name: &str,
    ) -> BillingResult<()> {
        let url = self.base_url.join("consume")?;
        let body = ConsumeRequest {
            group,
            identity,
            amount,
            app_name,
        };
        let response = self
            .authorize(self.client.post(url).json(&body))
            .send()
            .await?;
        Self::check(response).await?;
        debug!(group = %group, amount, "Debited group balance");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
