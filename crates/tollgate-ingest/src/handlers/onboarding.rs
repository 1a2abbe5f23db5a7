//! Free trial onboarding.

use std::sync::Arc;

use chrono::Duration;
use serde_json::{json, Value};
use tollgate_core::Datastore;
use tracing::info;

use super::{require_object, require_str, str_field, CUSTOMERS, FOLLOW_UPS};
use crate::{
    error::HandlerError,
    notifier::{normalize_phone, Notifier},
    registry::{DispatchContext, EventHandler},
};

/// Length of a free trial.
pub const TRIAL_DAYS: i64 = 3;
/// Calls included in a free trial.
pub const TRIAL_CALLS: u32 = 25;

/// `trial_started`: creates the trial customer, schedules follow-ups, and
/// sends the welcome message.
///
/// A phone number that already has a customer record is left alone; nothing
/// is rescheduled and no second welcome is sent.
#[derive(Debug, Clone)]
pub struct TrialStartedHandler {
    store: Arc<dyn Datastore>,
    notifier: Arc<dyn Notifier>,
}

impl TrialStartedHandler {
    /// Creates the handler.
    pub fn new(store: Arc<dyn Datastore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }
}

#[async_trait::async_trait]
impl EventHandler for TrialStartedHandler {
    async fn handle(&self, ctx: &DispatchContext, payload: &Value) -> Result<(), HandlerError> {
        let trial = require_object(payload, "trial_data")?;
        let raw_phone = require_str(trial, "phone_number", "trial_data.phone_number")?;
        let business_name = require_str(trial, "business_name", "trial_data.business_name")?;
        let phone = normalize_phone(raw_phone)?;

        let start = ctx.received_at;
        let end = start + Duration::days(TRIAL_DAYS);
        let customer = json!({
            "phone_number": phone,
            "business_name": business_name,
            "business_type": str_field(trial, "business_type"),
            "contact_name": str_field(trial, "contact_name"),
            "sender": ctx.key.sender,
            "subscription_status": "trial",
            "plan_type": "trial",
            "subscription_start": start,
            "subscription_end": end,
            "trial_calls_remaining": TRIAL_CALLS,
            "onboarding_stage": "trial_setup",
            "created_at": start,
        });

        if !self.store.insert_if_absent(CUSTOMERS, &phone, customer).await?.is_inserted() {
            info!(phone = %phone, "trial already active for customer");
            return Ok(());
        }

        let follow_ups = [
            ("trial_check_in", start + Duration::days(1)),
            ("trial_expiry_reminder", start + Duration::days(TRIAL_DAYS - 1)),
        ];
        for (kind, due) in follow_ups {
            let follow_up = json!({
                "phone_number": phone,
                "follow_up_type": kind,
                "scheduled_for": due,
                "status": "pending",
                "agent": "lexi",
            });
            self.store.insert_if_absent(FOLLOW_UPS, &format!("{phone}:{kind}"), follow_up).await?;
        }

        let message = format!(
            "Welcome to your {TRIAL_DAYS}-day free trial, {business_name}! \
             You have {TRIAL_CALLS} calls to try. Reply here any time for help."
        );
        self.notifier.send(&format!("whatsapp:+{phone}"), &message).await?;

        info!(phone = %phone, business_name, "trial started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use tokio::sync::Mutex;
    use tollgate_core::{EventKey, EventType, MemoryDatastore};

    use super::*;
    use crate::error::NotifyError;

    #[derive(Debug, Default)]
    struct Outbox(Mutex<Vec<String>>);

    #[async_trait::async_trait]
    impl Notifier for Outbox {
        async fn send(&self, destination: &str, _message: &str) -> Result<(), NotifyError> {
            self.0.lock().await.push(destination.to_string());
            Ok(())
        }
    }

    fn ctx() -> DispatchContext {
        DispatchContext {
            key: EventKey::new("lexi", "evt_trial"),
            event_type: EventType::TrialStarted,
            received_at: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        }
    }

    fn payload() -> Value {
        json!({
            "event_id": "evt_trial",
            "event_type": "trial_started",
            "trial_data": {
                "phone_number": "+234 801 234 5678",
                "business_name": "Mama Put Kitchen",
                "business_type": "restaurant"
            }
        })
    }

    #[tokio::test]
    async fn trial_creates_customer_and_follow_ups() {
        let store = MemoryDatastore::new();
        let outbox = Arc::new(Outbox::default());
        let handler = TrialStartedHandler::new(Arc::new(store.clone()), outbox.clone());

        handler.handle(&ctx(), &payload()).await.unwrap();

        let customer = store.get(CUSTOMERS, "2348012345678").await.unwrap().unwrap();
        assert_eq!(customer["subscription_status"], "trial");
        assert_eq!(customer["trial_calls_remaining"], TRIAL_CALLS);
        assert_eq!(customer["onboarding_stage"], "trial_setup");
        assert_eq!(customer["subscription_end"], json!(ctx().received_at + Duration::days(3)));

        let check_in =
            store.get(FOLLOW_UPS, "2348012345678:trial_check_in").await.unwrap().unwrap();
        assert_eq!(check_in["status"], "pending");
        assert_eq!(check_in["scheduled_for"], json!(ctx().received_at + Duration::days(1)));
        let reminder =
            store.get(FOLLOW_UPS, "2348012345678:trial_expiry_reminder").await.unwrap().unwrap();
        assert_eq!(reminder["scheduled_for"], json!(ctx().received_at + Duration::days(2)));
        assert_eq!(store.count(FOLLOW_UPS).await, 2);

        assert_eq!(*outbox.0.lock().await, vec!["whatsapp:+2348012345678".to_string()]);
    }

    #[tokio::test]
    async fn existing_customer_gets_no_second_trial() {
        let store = MemoryDatastore::new();
        let outbox = Arc::new(Outbox::default());
        let handler = TrialStartedHandler::new(Arc::new(store.clone()), outbox.clone());

        handler.handle(&ctx(), &payload()).await.unwrap();
        handler.handle(&ctx(), &payload()).await.unwrap();

        assert_eq!(store.count(CUSTOMERS).await, 1);
        assert_eq!(outbox.0.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn business_name_is_required() {
        let handler =
            TrialStartedHandler::new(Arc::new(MemoryDatastore::new()), Arc::new(Outbox::default()));

        let err = handler
            .handle(&ctx(), &json!({"trial_data": {"phone_number": "2348012345678"}}))
            .await
            .unwrap_err();

        assert!(
            matches!(err, HandlerError::MissingField(field) if field == "trial_data.business_name")
        );
    }

    #[tokio::test]
    async fn unusable_phone_number_fails() {
        let handler =
            TrialStartedHandler::new(Arc::new(MemoryDatastore::new()), Arc::new(Outbox::default()));

        let err = handler
            .handle(
                &ctx(),
                &json!({"trial_data": {"phone_number": "call me", "business_name": "Shop"}}),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, HandlerError::Notify(NotifyError::InvalidDestination(_))));
    }
}
