use std::time::Duration;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{error, warn};
use crate::config::Config;

const JSON_API: &str = "application/vnd.api+json";
const CHECKOUT_RETRY_LIMIT: usize = 3;

/// Issues hosted payment links for accepted requests.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_link(
        &self,
        email: &str,
        amount: f64,
        request_id: i64,
    ) -> anyhow::Result<String>;
}

/// Checkout client for a JSON:API hosted-checkout provider (Lemon Squeezy).
pub struct CheckoutClient {
    http_client: reqwest::Client,
    api_url: String,
    api_key: String,
    store_id: String,
    variant_id: String,
}

impl CheckoutClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build checkout http client")?;

        Ok(Self {
            http_client,
            api_url: config.payment_api_url.trim_end_matches('/').to_string(),
            api_key: config.payment_api_key.clone(),
            store_id: config.payment_store_id.clone(),
            variant_id: config.payment_variant_id.clone(),
        })
    }

    fn checkout_body(
        &self,
        email: &str,
        amount: f64,
        request_id: i64,
        now: OffsetDateTime,
    ) -> anyhow::Result<Value> {
        let expires_at = (now + time::Duration::days(1)).format(&Rfc3339)?;

        Ok(json!({
            "data": {
                "type": "checkouts",
                "attributes": {
                    "custom_price": amount_in_cents(amount),
                    "checkout_data": {
                        "email": email,
                        "custom": {
                            "request_id": request_id.to_string()
                        }
                    },
                    "expires_at": expires_at
                },
                "relationships": {
                    "store": {
                        "data": { "type": "stores", "id": self.store_id }
                    },
                    "variant": {
                        "data": { "type": "variants", "id": self.variant_id }
                    }
                }
            }
        }))
    }
}

#[async_trait]
impl PaymentGateway for CheckoutClient {
    async fn create_payment_link(
        &self,
        email: &str,
        amount: f64,
        request_id: i64,
    ) -> anyhow::Result<String> {
        let url = format!("{}/v1/checkouts", self.api_url);
        let body = self.checkout_body(email, amount, request_id, OffsetDateTime::now_utc())?;

        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            let res = self.http_client
                .post(&url)
                .bearer_auth(&self.api_key)
                .header(ACCEPT, JSON_API)
                .header(CONTENT_TYPE, JSON_API)
                .json(&body)
                .send()
                .await;

            match res {
                Ok(response) => break response,
                Err(e) if attempt < CHECKOUT_RETRY_LIMIT && is_retryable(&e) => {
                    warn!("Checkout request for request: {} failed due to: {}, retrying in 3s", request_id, e);
                    tokio::time::sleep(tokio::time::Duration::from_secs(3)).await;
                }
                Err(e) => return Err(anyhow!(e).context(format!("Checkout request failed: URL={}", url))),
            }
        };

        let status = response.status();
        let content = response.text().await.unwrap_or_default();
        if !status.is_success() {
            error!(
                "Checkout request failed: URL={}, Data={}, Status Code={}, Content={}",
                url, body, status, content
            );
            return Err(anyhow!("Checkout provider answered with status {}", status));
        }

        extract_checkout_url(&content)
    }
}

/// Only failures where the request never reached the provider. A timed out
/// POST may already have created a checkout.
fn is_retryable(e: &reqwest::Error) -> bool {
    e.is_connect()
}

fn amount_in_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

fn extract_checkout_url(content: &str) -> anyhow::Result<String> {
    let payload: Value = serde_json::from_str(content)
        .context("Checkout provider returned a non-JSON body")?;

    payload
        .pointer("/data/attributes/url")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Checkout response did not contain data.attributes.url"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn client() -> CheckoutClient {
        CheckoutClient {
            http_client: reqwest::Client::new(),
            api_url: "https://checkout.test".to_string(),
            api_key: "secret".to_string(),
            store_id: "94304".to_string(),
            variant_id: "420304".to_string(),
        }
    }

    #[test]
    fn body_carries_price_in_cents_and_request_correlation() {
        let body = client()
            .checkout_body("ana@cargo.dz", 19.99, 42, datetime!(2024-06-14 10:00 UTC))
            .unwrap();

        assert_eq!(body.pointer("/data/type"), Some(&json!("checkouts")));
        assert_eq!(body.pointer("/data/attributes/custom_price"), Some(&json!(1999)));
        assert_eq!(body.pointer("/data/attributes/checkout_data/custom/request_id"), Some(&json!("42")));
        assert_eq!(body.pointer("/data/attributes/expires_at"), Some(&json!("2024-06-15T10:00:00Z")));
        assert_eq!(body.pointer("/data/relationships/store/data/id"), Some(&json!("94304")));
        assert_eq!(body.pointer("/data/relationships/variant/data/id"), Some(&json!("420304")));
    }

    #[test]
    fn extracts_url_from_checkout_response() {
        let content = r#"{"data":{"type":"checkouts","attributes":{"url":"https://pay.test/c/abc"}}}"#;
        assert_eq!(extract_checkout_url(content).unwrap(), "https://pay.test/c/abc");
    }

    #[tokio::test]
    async fn only_connection_failures_are_retried() {
        let refused = reqwest::Client::new()
            .post("http://127.0.0.1:1/v1/checkouts")
            .send()
            .await
            .unwrap_err();
        assert!(is_retryable(&refused));

        // Accepts the connection and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let timed_out = reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap()
            .post(format!("http://{}/v1/checkouts", addr))
            .send()
            .await
            .unwrap_err();
        assert!(timed_out.is_timeout());
        assert!(!is_retryable(&timed_out));
    }

    #[test]
    fn missing_url_is_an_error() {
        assert!(extract_checkout_url(r#"{"data":{"attributes":{}}}"#).is_err());
        assert!(extract_checkout_url("<html>").is_err());
    }
}
