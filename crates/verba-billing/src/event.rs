//! Provider lifecycle events.
//!
//! The provider's payloads are loosely-shaped JSON; here they are
//! narrowed into a closed union. Kinds we do not handle map to
//! [`ProviderEvent::Unknown`], which the caller logs and acknowledges
//! without action.

use serde::Deserialize;
use verba_types::SubscriptionId;

use crate::{BillingError, Result};

/// A recognized payment-provider lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// Checkout finished; the correlation id carried through checkout
    /// metadata points at the local instance to activate.
    CheckoutCompleted {
        session_id: String,
        subscription_ref: SubscriptionId,
        external_subscription_id: String,
        external_customer_id: Option<String>,
    },
    /// Recurring renewal invoice settled. The invoice id is the
    /// dedupe key for at-least-once redeliveries.
    InvoicePaid {
        external_subscription_id: String,
        invoice_id: Option<String>,
        period_end: Option<u64>,
    },
    /// Renewal failed. Handled as a logged no-op.
    InvoicePaymentFailed {
        external_subscription_id: String,
    },
    /// Subscription ended upstream.
    SubscriptionDeleted {
        external_subscription_id: String,
        period_end: Option<u64>,
    },
    /// Recognized envelope, unhandled kind.
    Unknown { kind: String },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    data: EventData,
}

#[derive(Deserialize)]
struct EventData {
    object: EventObject,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct EventObject {
    id: Option<String>,
    subscription: Option<String>,
    customer: Option<String>,
    period_end: Option<u64>,
    current_period_end: Option<u64>,
    metadata: Metadata,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Metadata {
    subscription_ref: Option<String>,
}

impl ProviderEvent {
    /// Parse a verified webhook body. Malformed JSON or a handled kind
    /// missing its required fields is an error; an unhandled kind is
    /// `Unknown`, not an error.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(body)
            .map_err(|e| BillingError::MalformedEvent(e.to_string()))?;
        let object = envelope.data.object;

        match envelope.kind.as_str() {
            "checkout.session.completed" => {
                let subscription_ref = object
                    .metadata
                    .subscription_ref
                    .as_deref()
                    .and_then(|s| s.parse::<SubscriptionId>().ok())
                    .ok_or_else(|| {
                        BillingError::MalformedEvent(
                            "checkout event without subscription_ref metadata".into(),
                        )
                    })?;
                Ok(ProviderEvent::CheckoutCompleted {
                    session_id: object.id.unwrap_or_default(),
                    subscription_ref,
                    external_subscription_id: object.subscription.ok_or_else(|| {
                        BillingError::MalformedEvent("checkout event without subscription id".into())
                    })?,
                    external_customer_id: object.customer,
                })
            }
            "invoice.paid" | "invoice.payment_succeeded" => Ok(ProviderEvent::InvoicePaid {
                external_subscription_id: object.subscription.ok_or_else(|| {
                    BillingError::MalformedEvent("invoice event without subscription id".into())
                })?,
                invoice_id: object.id,
                period_end: object.period_end,
            }),
            "invoice.payment_failed" => Ok(ProviderEvent::InvoicePaymentFailed {
                external_subscription_id: object.subscription.ok_or_else(|| {
                    BillingError::MalformedEvent("invoice event without subscription id".into())
                })?,
            }),
            "customer.subscription.deleted" => Ok(ProviderEvent::SubscriptionDeleted {
                external_subscription_id: object.id.ok_or_else(|| {
                    BillingError::MalformedEvent("deletion event without subscription id".into())
                })?,
                period_end: object.current_period_end,
            }),
            kind => Ok(ProviderEvent::Unknown {
                kind: kind.to_string(),
            }),
        }
    }
}
