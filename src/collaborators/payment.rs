//! Payment processor webhook payloads.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Settlement status reported by the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEventStatus {
    Completed,
    Failed,
    Expired,
    /// Any status this service does not act on.
    #[serde(other)]
    Other,
}

/// A checkout-session event delivered by the processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    /// Checkout session id previously attached to the account.
    pub session_id: String,
    pub status: PaymentEventStatus,
    /// Amount settled, in major currency units.
    pub amount: Decimal,
    /// Processor payment reference. Falls back to the session id.
    #[serde(default)]
    pub reference: Option<String>,
}

impl PaymentEvent {
    /// The reference to store on the account once paid.
    pub fn reference(&self) -> &str {
        self.reference.as_deref().unwrap_or(&self.session_id)
    }
}

/// What a payment event did to the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// This event moved the account to paid.
    Credited,
    /// The account was already paid; nothing changed.
    AlreadyPaid,
    /// The event's status is not acted on.
    Ignored,
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn parses_completed_event_with_string_amount() {
        let event: PaymentEvent = serde_json::from_str(
            r#"{"session_id":"cs_1","status":"completed","amount":"49.99","reference":"pi_1"}"#,
        )
        .unwrap();
        assert_eq!(event.status, PaymentEventStatus::Completed);
        assert_eq!(event.amount, dec!(49.99));
        assert_eq!(event.reference(), "pi_1");
    }

    #[test]
    fn unknown_status_is_other_and_reference_defaults_to_session() {
        let event: PaymentEvent = serde_json::from_str(
            r#"{"session_id":"cs_2","status":"requires_action","amount":"10.00"}"#,
        )
        .unwrap();
        assert_eq!(event.status, PaymentEventStatus::Other);
        assert_eq!(event.reference(), "cs_2");
    }
}
