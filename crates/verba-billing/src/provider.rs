//! Payment-provider client.
//!
//! Remote calls are best-effort; access correctness never depends on
//! one succeeding. Failures are captured as data and logged by the
//! caller.

use std::future::Future;
use std::time::Duration;

use verba_types::SubscriptionId;

use crate::{BillingError, Result};

/// What to ask the provider for when opening a checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    /// Provider-side price id of the chosen plan.
    pub price_id: String,
    pub customer_email: String,
    /// Local instance id, echoed back in webhook metadata as the
    /// correlation id.
    pub subscription_ref: SubscriptionId,
    /// Days before billing starts, for chained renewals whose paid
    /// window opens in the future. Zero starts immediately.
    pub deferred_start_days: u32,
    pub success_url: String,
    pub cancel_url: String,
}

/// An open checkout session the user is redirected to.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub session_id: String,
    pub url: String,
}

/// Provider-side view of a checkout session, used by the client-polled
/// confirmation fallback when the webhook has not arrived yet.
#[derive(Debug, Clone)]
pub struct RemoteSession {
    pub subscription_ref: Option<SubscriptionId>,
    pub external_subscription_id: Option<String>,
    pub external_customer_id: Option<String>,
    pub paid: bool,
}

/// Result of a best-effort upstream cancel attempt, recorded rather
/// than raised: the local transition proceeds either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCancelOutcome {
    Cancelled,
    /// No provider subscription was bound to the instance.
    Skipped,
    /// The call failed or timed out; needs manual follow-up.
    Failed(String),
}

pub trait PaymentProvider {
    fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> impl Future<Output = Result<CheckoutSession>> + Send;

    fn fetch_checkout_session(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<RemoteSession>> + Send;

    fn cancel_subscription(
        &self,
        external_subscription_id: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// HTTP client against the provider's REST API.
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpProvider {
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BillingError::Provider(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }
}

#[derive(serde::Deserialize)]
struct SessionResponse {
    id: String,
    url: String,
}

impl PaymentProvider for HttpProvider {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        let mut form = vec![
            ("mode".to_string(), "subscription".to_string()),
            ("line_items[0][price]".to_string(), request.price_id.clone()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("customer_email".to_string(), request.customer_email.clone()),
            (
                "metadata[subscription_ref]".to_string(),
                request.subscription_ref.to_string(),
            ),
            (
                "subscription_data[metadata][subscription_ref]".to_string(),
                request.subscription_ref.to_string(),
            ),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
        ];
        if request.deferred_start_days > 0 {
            form.push((
                "subscription_data[trial_period_days]".to_string(),
                request.deferred_start_days.to_string(),
            ));
        }

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.base_url))
            .bearer_auth(&self.api_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| BillingError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BillingError::Provider(format!(
                "checkout session creation returned {}",
                response.status()
            )));
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| BillingError::Provider(e.to_string()))?;
        Ok(CheckoutSession {
            session_id: session.id,
            url: session.url,
        })
    }

    async fn fetch_checkout_session(&self, session_id: &str) -> Result<RemoteSession> {
        #[derive(serde::Deserialize, Default)]
        #[serde(default)]
        struct SessionDetail {
            payment_status: String,
            subscription: Option<String>,
            customer: Option<String>,
            metadata: SessionMetadata,
        }
        #[derive(serde::Deserialize, Default)]
        #[serde(default)]
        struct SessionMetadata {
            subscription_ref: Option<String>,
        }

        let response = self
            .client
            .get(format!("{}/v1/checkout/sessions/{session_id}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| BillingError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BillingError::Provider(format!(
                "checkout session fetch returned {}",
                response.status()
            )));
        }

        let detail: SessionDetail = response
            .json()
            .await
            .map_err(|e| BillingError::Provider(e.to_string()))?;
        Ok(RemoteSession {
            subscription_ref: detail
                .metadata
                .subscription_ref
                .as_deref()
                .and_then(|s| s.parse().ok()),
            external_subscription_id: detail.subscription,
            external_customer_id: detail.customer,
            paid: detail.payment_status == "paid",
        })
    }

    async fn cancel_subscription(&self, external_subscription_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!(
                "{}/v1/subscriptions/{external_subscription_id}",
                self.base_url
            ))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| BillingError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BillingError::Provider(format!(
                "subscription cancel returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
