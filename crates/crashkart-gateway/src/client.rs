//! HTTP client for the payment gateway REST API.
//!
//! Wraps `reqwest` with basic-auth credentials, fixed-delay retries and
//! typed response deserialization.

use std::time::Duration;

use reqwest::{Client, Method, Url};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;

use crate::error::GatewayError;
use crate::retry::retry_fixed;
use crate::types::{CreateOrderBody, GatewayOrder, PaymentEntity};

/// Connection settings for [`GatewayClient`].
#[derive(Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub key_id: String,
    pub key_secret: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("key_id", &self.key_id)
            .field("key_secret", &"[REDACTED]")
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .finish()
    }
}

impl GatewayConfig {
    /// Build from application config.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::MissingCredentials`] when the key id or key
    /// secret is unset.
    pub fn from_app_config(config: &crashkart_core::AppConfig) -> Result<Self, GatewayError> {
        let (Some(key_id), Some(key_secret)) = (
            config.gateway_key_id.clone(),
            config.gateway_key_secret.clone(),
        ) else {
            return Err(GatewayError::MissingCredentials);
        };
        Ok(Self {
            base_url: config.gateway_base_url.clone(),
            key_id,
            key_secret,
            timeout_secs: config.gateway_timeout_secs,
            max_retries: config.gateway_max_retries,
            retry_delay_ms: config.gateway_retry_delay_ms,
        })
    }
}

/// Client for the gateway's orders and payments endpoints.
///
/// Use [`GatewayClient::new`] with a [`GatewayConfig`]; tests point
/// `base_url` at a wiremock server.
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    base_url: Url,
    key_id: String,
    key_secret: String,
    max_retries: u32,
    retry_delay_ms: u64,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("base_url", &self.base_url.as_str())
            .field("key_id", &self.key_id)
            .field("key_secret", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl GatewayClient {
    /// # Errors
    ///
    /// Returns [`GatewayError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed, or [`GatewayError::InvalidBaseUrl`].
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("crashkart/0.1")
            .build()?;

        // Exactly one trailing slash so `join` appends instead of replacing
        // the last path segment.
        let normalised = format!("{}/", config.base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalised).map_err(|e| GatewayError::InvalidBaseUrl {
            url: config.base_url.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            client,
            base_url,
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
        })
    }

    /// The secret used to sign checkout callbacks.
    #[must_use]
    pub fn key_secret(&self) -> &str {
        &self.key_secret
    }

    /// Create a gateway order for `amount` (major units) in `currency`.
    ///
    /// `receipt` should be the shop's own order reference.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::InvalidAmount`] if `amount` is negative or too large.
    /// - [`GatewayError::Status`] for non-2xx responses after retries.
    /// - [`GatewayError::Http`] on network failure after retries.
    /// - [`GatewayError::Deserialize`] if the response shape is unexpected.
    pub async fn create_order(
        &self,
        amount: Decimal,
        currency: &str,
        receipt: &str,
        notes: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<GatewayOrder, GatewayError> {
        let minor = crashkart_core::money::to_minor_units(amount)
            .filter(|m| *m > 0)
            .ok_or(GatewayError::InvalidAmount(amount))?;
        let body = CreateOrderBody {
            amount: minor,
            currency,
            receipt,
            notes,
        };
        let body = serde_json::to_value(&body).map_err(|e| GatewayError::Deserialize {
            context: "create order body".to_owned(),
            source: e,
        })?;

        let order: GatewayOrder = self.send(Method::POST, "orders", Some(&body)).await?;
        tracing::info!(gateway_order_id = %order.id, receipt, amount = minor, "gateway order created");
        Ok(order)
    }

    /// Fetch a payment by id.
    ///
    /// # Errors
    ///
    /// Same as [`GatewayClient::create_order`], minus the amount check.
    pub async fn fetch_payment(&self, payment_id: &str) -> Result<PaymentEntity, GatewayError> {
        self.send(Method::GET, &format!("payments/{payment_id}"), None)
            .await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, GatewayError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| GatewayError::InvalidBaseUrl {
                url: format!("{}{path}", self.base_url),
                reason: e.to_string(),
            })?;

        let text = retry_fixed(self.max_retries, self.retry_delay_ms, || {
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .basic_auth(&self.key_id, Some(&self.key_secret));
            if let Some(body) = body {
                request = request.json(body);
            }
            async move {
                let response = request.send().await?;
                let status = response.status();
                let text = response.text().await?;
                if status.is_success() {
                    Ok(text)
                } else {
                    Err(GatewayError::Status {
                        status: status.as_u16(),
                        body: text,
                    })
                }
            }
        })
        .await?;

        serde_json::from_str(&text).map_err(|e| GatewayError::Deserialize {
            context: format!("{method} {path}"),
            source: e,
        })
    }
}
