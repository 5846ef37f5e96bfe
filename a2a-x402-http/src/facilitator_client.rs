//! A [`Facilitator`] implementation that talks to a _remote_ facilitator
//! over HTTP.
//!
//! The [`FacilitatorClient`] posts JSON to the `./verify` and `./settle`
//! endpoints relative to a configured base URL. Each request is bounded
//! by a deadline: the smaller of the client-level timeout and the
//! requirement's own validity window. A request that exceeds the deadline
//! surfaces as [`FacilitatorError::Timeout`]; every other failure
//! (unreachable host, unexpected status, undecodable body) surfaces as a
//! retriable [`FacilitatorError::Transport`].

use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use reqwest::Client;
use serde::Serialize;
use url::Url;

use a2a_x402::facilitator::{Facilitator, FacilitatorError};
use a2a_x402::proto::{
    PaymentPayload, PaymentRequirements, SettleResponse, VerifyResponse, X402_VERSION,
};

/// Errors that can occur while interacting with a remote facilitator.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorClientError {
    /// URL parse error.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// Human-readable context.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// HTTP transport error.
    #[error("HTTP error: {context}: {source}")]
    Http {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// JSON deserialization error.
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// Unexpected HTTP status code.
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        /// Human-readable context.
        context: &'static str,
        /// The HTTP status code.
        status: StatusCode,
        /// The response body.
        body: String,
    },
    /// Failed to read response body.
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
}

impl FacilitatorClientError {
    /// Splits this error by retry semantics for the orchestration layer.
    fn into_facilitator_error(self, deadline: Duration) -> FacilitatorError {
        match self {
            Self::Http { ref source, .. } if source.is_timeout() => {
                FacilitatorError::Timeout(deadline)
            }
            other => FacilitatorError::transport(other),
        }
    }
}

/// Wire shape of a facilitator verify/settle request.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FacilitatorRequest<'a> {
    x402_version: u32,
    payment_payload: &'a PaymentPayload,
    payment_requirements: &'a PaymentRequirements,
}

/// A client for communicating with a remote x402 facilitator.
///
/// Handles the `/verify` and `/settle` endpoints via JSON HTTP.
#[derive(Clone, Debug)]
pub struct FacilitatorClient {
    /// Base URL of the facilitator (e.g. `https://facilitator.example/`)
    base_url: Url,
    /// Full URL to `POST /verify` requests
    verify_url: Url,
    /// Full URL to `POST /settle` requests
    settle_url: Url,
    /// Shared reqwest HTTP client
    client: Client,
    /// Optional custom headers sent with each request
    headers: HeaderMap,
    /// Client-level cap on any single request
    timeout: Duration,
}

impl FacilitatorClient {
    /// Default cap on a single verify/settle request.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

    /// Constructs a new [`FacilitatorClient`] from a base URL.
    ///
    /// This sets up the `./verify` and `./settle` endpoint URLs relative
    /// to the base.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] if URL construction fails.
    pub fn try_new(base_url: Url) -> Result<Self, FacilitatorClientError> {
        let verify_url =
            base_url
                .join("./verify")
                .map_err(|e| FacilitatorClientError::UrlParse {
                    context: "Failed to construct ./verify URL",
                    source: e,
                })?;
        let settle_url =
            base_url
                .join("./settle")
                .map_err(|e| FacilitatorClientError::UrlParse {
                    context: "Failed to construct ./settle URL",
                    source: e,
                })?;
        Ok(Self {
            client: Client::new(),
            base_url,
            verify_url,
            settle_url,
            headers: HeaderMap::new(),
            timeout: Self::DEFAULT_TIMEOUT,
        })
    }

    /// Returns the base URL used by this client.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the computed `./verify` URL relative to [`Self::base_url`].
    #[must_use]
    pub const fn verify_url(&self) -> &Url {
        &self.verify_url
    }

    /// Returns the computed `./settle` URL relative to [`Self::base_url`].
    #[must_use]
    pub const fn settle_url(&self) -> &Url {
        &self.settle_url
    }

    /// Returns any custom headers configured on the client.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the client-level request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Attaches custom headers to all future requests.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Caps every future request at the given timeout.
    ///
    /// The effective per-request deadline is the smaller of this value
    /// and the requirement's `maxTimeoutSeconds`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sends a `POST /verify` request to the facilitator.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] if the HTTP request fails.
    pub async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, FacilitatorClientError> {
        self.post_json(&self.verify_url, "POST /verify", payload, requirements)
            .await
    }

    /// Sends a `POST /settle` request to the facilitator.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] if the HTTP request fails.
    pub async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, FacilitatorClientError> {
        self.post_json(&self.settle_url, "POST /settle", payload, requirements)
            .await
    }

    /// The deadline applied to one call for the given requirement.
    fn deadline(&self, requirements: &PaymentRequirements) -> Duration {
        self.timeout
            .min(Duration::from_secs(requirements.max_timeout_seconds))
    }

    /// Generic POST helper handling JSON serialization, error mapping,
    /// and deadline application.
    ///
    /// `context` is a human-readable identifier used in tracing and error
    /// messages (e.g. `"POST /verify"`).
    async fn post_json<R>(
        &self,
        url: &Url,
        context: &'static str,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<R, FacilitatorClientError>
    where
        R: serde::de::DeserializeOwned,
    {
        let body = FacilitatorRequest {
            x402_version: X402_VERSION,
            payment_payload: payload,
            payment_requirements: requirements,
        };
        let mut req = self
            .client
            .post(url.clone())
            .json(&body)
            .timeout(self.deadline(requirements));
        for (key, value) in &self.headers {
            req = req.header(key, value);
        }
        let http_response = req
            .send()
            .await
            .map_err(|e| FacilitatorClientError::Http { context, source: e })?;

        let result = if http_response.status() == StatusCode::OK {
            http_response
                .json::<R>()
                .await
                .map_err(|e| FacilitatorClientError::JsonDeserialization { context, source: e })
        } else {
            let status = http_response.status();
            let body = http_response
                .text()
                .await
                .map_err(|e| FacilitatorClientError::ResponseBodyRead { context, source: e })?;
            Err(FacilitatorClientError::HttpStatus {
                context,
                status,
                body,
            })
        };

        if let Err(err) = &result {
            tracing::warn!(%err, context, "request to facilitator failed");
        }

        result
    }
}

#[async_trait]
impl Facilitator for FacilitatorClient {
    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, FacilitatorError> {
        let deadline = self.deadline(requirements);
        Self::verify(self, payload, requirements)
            .await
            .map_err(|e| e.into_facilitator_error(deadline))
    }

    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, FacilitatorError> {
        let deadline = self.deadline(requirements);
        Self::settle(self, payload, requirements)
            .await
            .map_err(|e| e.into_facilitator_error(deadline))
    }
}

/// Converts a string URL into a [`FacilitatorClient`], normalizing to a
/// single trailing slash so endpoint joins stay under the base path.
impl TryFrom<&str> for FacilitatorClient {
    type Error = FacilitatorClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut normalized = value.trim_end_matches('/').to_string();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| FacilitatorClientError::UrlParse {
            context: "Failed to parse base url",
            source: e,
        })?;
        Self::try_new(url)
    }
}

/// Converts a String URL into a [`FacilitatorClient`].
impl TryFrom<String> for FacilitatorClient {
    type Error = FacilitatorClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn requirements() -> PaymentRequirements {
        PaymentRequirements {
            scheme: "exact".into(),
            network: "base".into(),
            asset: "0xUSDC".into(),
            pay_to: "0xMerchant".into(),
            max_amount: "1000000".into(),
            resource: None,
            description: None,
            max_timeout_seconds: 600,
            extra: json!({}),
        }
    }

    fn payload() -> PaymentPayload {
        PaymentPayload {
            x402_version: 1,
            scheme: "exact".into(),
            network: "base".into(),
            payload: json!({"signature": "0x00"}),
        }
    }

    fn client_for(server: &MockServer) -> FacilitatorClient {
        FacilitatorClient::try_new(server.uri().parse::<Url>().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn verify_posts_payload_and_requirements() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .and(body_partial_json(json!({
                "x402Version": 1,
                "paymentPayload": {"scheme": "exact", "network": "base"},
                "paymentRequirements": {"payTo": "0xMerchant"}
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"isValid": true, "payer": "0xPayer"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let response = client.verify(&payload(), &requirements()).await.unwrap();
        assert!(response.is_valid());
    }

    #[tokio::test]
    async fn settle_decodes_success_and_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/settle"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "transaction": "0xabc",
                "network": "base"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let response = client.settle(&payload(), &requirements()).await.unwrap();
        assert!(response.is_success());

        server.reset().await;
        Mock::given(method("POST"))
            .and(path("/settle"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "errorReason": "insufficient funds",
                "network": "base"
            })))
            .mount(&server)
            .await;

        let response = client.settle(&payload(), &requirements()).await.unwrap();
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn unexpected_status_is_an_error_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .verify(&payload(), &requirements())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FacilitatorClientError::HttpStatus { status, ref body, .. }
                if status == StatusCode::SERVICE_UNAVAILABLE && body == "maintenance"
        ));

        // Through the trait this is a retriable transport failure.
        let err = Facilitator::verify(&client, &payload(), &requirements())
            .await
            .unwrap_err();
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn slow_facilitator_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"isValid": true}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).with_timeout(Duration::from_millis(50));
        let err = Facilitator::verify(&client, &payload(), &requirements())
            .await
            .unwrap_err();
        assert!(matches!(err, FacilitatorError::Timeout(_)));
        assert!(!err.is_retriable());
    }

    #[tokio::test]
    async fn requirement_window_caps_the_deadline() {
        let server = MockServer::start().await;
        let client = client_for(&server);

        let mut short = requirements();
        short.max_timeout_seconds = 30;
        assert_eq!(client.deadline(&short), Duration::from_secs(30));

        let long = requirements();
        let capped = client.with_timeout(Duration::from_secs(10));
        assert_eq!(capped.deadline(&long), Duration::from_secs(10));
    }

    #[test]
    fn base_url_is_normalized_for_joining() {
        let client = FacilitatorClient::try_from("https://facilitator.example/api").unwrap();
        assert_eq!(client.verify_url().as_str(), "https://facilitator.example/api/verify");
        assert_eq!(client.settle_url().as_str(), "https://facilitator.example/api/settle");

        let client = FacilitatorClient::try_from("https://facilitator.example/api///").unwrap();
        assert_eq!(client.settle_url().as_str(), "https://facilitator.example/api/settle");

        assert!(FacilitatorClient::try_from("not a url").is_err());
    }
}
