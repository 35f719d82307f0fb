//! Hosted-checkout gateway client.
//!
//! The bridge in [`crate::services::payments`] only talks to the
//! [`PaymentGateway`] trait; [`SslCommerzGateway`] is the production
//! implementation against the SSLCommerz v4 API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::config::PaymentGatewayConfig;
use crate::errors::ServiceError;

/// Everything the gateway needs to open a hosted checkout session.
#[derive(Debug, Clone)]
pub struct InitRequest {
    pub tran_id: String,
    pub total_amount: Decimal,
    pub currency: String,
    pub success_url: String,
    pub fail_url: String,
    pub cancel_url: String,
    pub ipn_url: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub customer_address: String,
    pub product_name: String,
    pub item_count: usize,
    /// Opaque pass-through fields echoed back on every callback
    pub value_a: String,
    pub value_b: String,
    pub value_c: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitSession {
    pub gateway_url: String,
    pub session_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub status: String,
    pub tran_id: Option<String>,
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn init(&self, request: &InitRequest) -> Result<InitSession, ServiceError>;
    async fn validate(&self, val_id: &str) -> Result<ValidationOutcome, ServiceError>;
}

#[derive(Debug, Deserialize)]
struct InitApiResponse {
    status: Option<String>,
    failedreason: Option<String>,
    sessionkey: Option<String>,
    #[serde(rename = "GatewayPageURL")]
    gateway_page_url: Option<String>,
}

pub struct SslCommerzGateway {
    client: Client,
    config: PaymentGatewayConfig,
}

impl SslCommerzGateway {
    pub fn new(config: PaymentGatewayConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("gateway client: {}", e)))?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: PaymentGatewayConfig, client: Client) -> Self {
        Self { client, config }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url().trim_end_matches('/'), path)
    }
}

#[async_trait]
impl PaymentGateway for SslCommerzGateway {
    #[instrument(skip_all, fields(tran_id = %request.tran_id))]
    async fn init(&self, request: &InitRequest) -> Result<InitSession, ServiceError> {
        let amount = request.total_amount.round_dp(2).to_string();
        let item_count = request.item_count.to_string();
        let form: Vec<(&str, &str)> = vec![
            ("store_id", self.config.store_id.as_str()),
            ("store_passwd", self.config.store_password.as_str()),
            ("total_amount", amount.as_str()),
            ("currency", request.currency.as_str()),
            ("tran_id", request.tran_id.as_str()),
            ("success_url", request.success_url.as_str()),
            ("fail_url", request.fail_url.as_str()),
            ("cancel_url", request.cancel_url.as_str()),
            ("ipn_url", request.ipn_url.as_str()),
            ("shipping_method", "NO"),
            ("product_name", request.product_name.as_str()),
            ("product_category", "Electronics"),
            ("product_profile", "general"),
            ("num_of_item", item_count.as_str()),
            ("cus_name", request.customer_name.as_str()),
            ("cus_email", request.customer_email.as_str()),
            ("cus_add1", request.customer_address.as_str()),
            ("cus_city", "Dhaka"),
            ("cus_country", "Bangladesh"),
            ("cus_phone", request.customer_phone.as_str()),
            ("value_a", request.value_a.as_str()),
            ("value_b", request.value_b.as_str()),
            ("value_c", request.value_c.as_str()),
        ];

        let response = self
            .client
            .post(self.endpoint("/gwprocess/v4/api.php"))
            .form(&form)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("gateway init: {}", e)))?;

        let body: InitApiResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("gateway init body: {}", e)))?;

        match (body.status.as_deref(), body.gateway_page_url) {
            (Some("SUCCESS"), Some(url)) if !url.is_empty() => {
                debug!("gateway session opened");
                Ok(InitSession {
                    gateway_url: url,
                    session_key: body.sessionkey,
                })
            }
            (status, _) => {
                let reason = body
                    .failedreason
                    .unwrap_or_else(|| "no redirect URL returned".to_string());
                warn!(status = ?status, %reason, "gateway refused session");
                Err(ServiceError::ExternalServiceError(format!(
                    "Payment gateway error: {}",
                    reason
                )))
            }
        }
    }

    #[instrument(skip(self))]
    async fn validate(&self, val_id: &str) -> Result<ValidationOutcome, ServiceError> {
        let response = self
            .client
            .get(self.endpoint("/validator/api/validationserverAPI.php"))
            .query(&[
                ("val_id", val_id),
                ("store_id", self.config.store_id.as_str()),
                ("store_passwd", self.config.store_password.as_str()),
                ("format", "json"),
            ])
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("gateway validate: {}", e)))?;

        let raw: serde_json::Value = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("gateway validate body: {}", e))
        })?;

        let status = raw
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let tran_id = raw
            .get("tran_id")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Ok(ValidationOutcome {
            valid: matches!(status.as_str(), "VALID" | "VALIDATED"),
            status,
            tran_id,
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(base: &str) -> SslCommerzGateway {
        SslCommerzGateway::new(PaymentGatewayConfig {
            store_id: "testbox".into(),
            store_password: "qwerty".into(),
            sandbox_base_url: base.into(),
            ..Default::default()
        })
        .unwrap()
    }

    fn request() -> InitRequest {
        InitRequest {
            tran_id: "TXN-1-ABCDEFGH".into(),
            total_amount: dec!(1500),
            currency: "BDT".into(),
            success_url: "http://api/payment/success".into(),
            fail_url: "http://api/payment/fail".into(),
            cancel_url: "http://api/payment/cancel".into(),
            ipn_url: "http://api/payment/ipn".into(),
            customer_name: "Rahim".into(),
            customer_email: "rahim@example.com".into(),
            customer_phone: "01700000000".into(),
            customer_address: "Dhanmondi".into(),
            product_name: "Phone".into(),
            item_count: 1,
            value_a: "user".into(),
            value_b: "TXN-1-ABCDEFGH".into(),
            value_c: "{}".into(),
        }
    }

    #[tokio::test]
    async fn init_returns_gateway_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gwprocess/v4/api.php"))
            .and(body_string_contains("tran_id=TXN-1-ABCDEFGH"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "SUCCESS",
                "sessionkey": "abc",
                "GatewayPageURL": "https://sandbox.example/pay/abc"
            })))
            .mount(&server)
            .await;

        let session = gateway(&server.uri()).init(&request()).await.unwrap();
        assert_eq!(session.gateway_url, "https://sandbox.example/pay/abc");
        assert_eq!(session.session_key.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn init_without_url_is_external_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gwprocess/v4/api.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "FAILED",
                "failedreason": "Store Credential Error"
            })))
            .mount(&server)
            .await;

        let err = gateway(&server.uri()).init(&request()).await.unwrap_err();
        assert!(matches!(err, ServiceError::ExternalServiceError(msg) if msg.contains("Credential")));
    }

    #[tokio::test]
    async fn validate_accepts_valid_and_validated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/validator/api/validationserverAPI.php"))
            .and(query_param("val_id", "v-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "VALIDATED", "tran_id": "TXN-1-ABCDEFGH"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/validator/api/validationserverAPI.php"))
            .and(query_param("val_id", "v-2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "INVALID_TRANSACTION"})),
            )
            .mount(&server)
            .await;

        let gw = gateway(&server.uri());
        let ok = gw.validate("v-1").await.unwrap();
        assert!(ok.valid);
        assert_eq!(ok.tran_id.as_deref(), Some("TXN-1-ABCDEFGH"));

        let bad = gw.validate("v-2").await.unwrap();
        assert!(!bad.valid);
        assert_eq!(bad.status, "INVALID_TRANSACTION");
    }
}
