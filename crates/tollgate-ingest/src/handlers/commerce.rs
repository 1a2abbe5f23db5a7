//! Order, appointment, complaint, and calculation handlers.

use std::sync::Arc;

use serde_json::{json, Value};
use tollgate_core::Datastore;
use tracing::{debug, info};

use super::{
    require_object, require_str, str_field, APPOINTMENTS, COMPLAINTS, FINANCIAL_CALCULATIONS,
    ORDERS,
};
use crate::{
    error::HandlerError,
    notifier::Notifier,
    registry::{DispatchContext, EventHandler},
};

/// Copies `data` and stamps the shared fields every stored record carries.
fn stamped(data: &Value, ctx: &DispatchContext, payload: &Value, extra: Value) -> Value {
    let mut record = data.clone();
    if let (Value::Object(fields), Value::Object(extra)) = (&mut record, extra) {
        fields.insert("conversation_id".into(), json!(str_field(payload, "conversation_id")));
        fields.insert("sender".into(), json!(ctx.key.sender));
        fields.insert("source_event_id".into(), json!(ctx.key.event_id));
        fields.extend(extra);
    }
    record
}

/// `financial_calculation_completed`: stores the calculation.
#[derive(Debug, Clone)]
pub struct FinancialCalculationHandler {
    store: Arc<dyn Datastore>,
}

impl FinancialCalculationHandler {
    /// Creates the handler.
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl EventHandler for FinancialCalculationHandler {
    async fn handle(&self, ctx: &DispatchContext, payload: &Value) -> Result<(), HandlerError> {
        let calculation_type = require_str(payload, "calculation_type", "calculation_type")?;

        let record = json!({
            "conversation_id": str_field(payload, "conversation_id"),
            "sender": ctx.key.sender,
            "calculation_type": calculation_type,
            "input_parameters": payload.get("input_parameters").cloned().unwrap_or(Value::Null),
            "result": payload.get("result").cloned().unwrap_or(Value::Null),
            "calculated_at": ctx.received_at,
        });

        self.store.insert_if_absent(FINANCIAL_CALCULATIONS, &ctx.key.storage_key(), record).await?;
        debug!(calculation_type, "financial calculation stored");
        Ok(())
    }
}

/// `order_processed`: stores a `confirmed` order and texts the customer.
#[derive(Debug, Clone)]
pub struct OrderProcessedHandler {
    store: Arc<dyn Datastore>,
    notifier: Arc<dyn Notifier>,
}

impl OrderProcessedHandler {
    /// Creates the handler.
    pub fn new(store: Arc<dyn Datastore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }
}

#[async_trait::async_trait]
impl EventHandler for OrderProcessedHandler {
    async fn handle(&self, ctx: &DispatchContext, payload: &Value) -> Result<(), HandlerError> {
        let order = require_object(payload, "order_data")?;
        let order_id = require_str(order, "order_id", "order_data.order_id")?;

        let record = stamped(
            order,
            ctx,
            payload,
            json!({"status": "confirmed", "confirmed_at": ctx.received_at}),
        );
        let outcome = self.store.insert_if_absent(ORDERS, order_id, record).await?;
        if !outcome.is_inserted() {
            info!(order_id, "order already confirmed, skipping notification");
            return Ok(());
        }

        if let Some(phone) = str_field(order, "customer_phone") {
            let message = format!(
                "Your order {order_id} has been confirmed. Thank you for shopping with us!"
            );
            self.notifier.send(phone, &message).await?;
        }

        info!(order_id, "order processed");
        Ok(())
    }
}

/// `appointment_scheduled`: stores the appointment and notifies the customer.
#[derive(Debug, Clone)]
pub struct AppointmentScheduledHandler {
    store: Arc<dyn Datastore>,
    notifier: Arc<dyn Notifier>,
}

impl AppointmentScheduledHandler {
    /// Creates the handler.
    pub fn new(store: Arc<dyn Datastore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }
}

#[async_trait::async_trait]
impl EventHandler for AppointmentScheduledHandler {
    async fn handle(&self, ctx: &DispatchContext, payload: &Value) -> Result<(), HandlerError> {
        let appointment = require_object(payload, "appointment_data")?;
        let key = str_field(appointment, "appointment_id")
            .map_or_else(|| ctx.key.storage_key(), str::to_string);

        let record = stamped(
            appointment,
            ctx,
            payload,
            json!({"status": "scheduled", "booked_at": ctx.received_at}),
        );
        let outcome = self.store.insert_if_absent(APPOINTMENTS, &key, record).await?;
        if !outcome.is_inserted() {
            return Ok(());
        }

        if let Some(phone) = str_field(appointment, "customer_phone") {
            let when = str_field(appointment, "scheduled_for")
                .map(|at| format!(" for {at}"))
                .unwrap_or_default();
            let message = format!("Your appointment{when} is confirmed. Reply here to reschedule.");
            self.notifier.send(phone, &message).await?;
        }

        Ok(())
    }
}

/// `customer_complaint_logged`: opens a complaint.
#[derive(Debug, Clone)]
pub struct CustomerComplaintHandler {
    store: Arc<dyn Datastore>,
}

impl CustomerComplaintHandler {
    /// Creates the handler.
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl EventHandler for CustomerComplaintHandler {
    async fn handle(&self, ctx: &DispatchContext, payload: &Value) -> Result<(), HandlerError> {
        let complaint = require_object(payload, "complaint_data")?;
        let key = str_field(complaint, "complaint_id")
            .map_or_else(|| ctx.key.storage_key(), str::to_string);

        let record =
            stamped(complaint, ctx, payload, json!({"status": "open", "logged_at": ctx.received_at}));
        self.store.insert_if_absent(COMPLAINTS, &key, record).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tokio::sync::Mutex;
    use tollgate_core::{EventKey, EventType, MemoryDatastore};

    use super::*;
    use crate::error::NotifyError;

    #[derive(Debug, Default)]
    struct Outbox {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Notifier for Outbox {
        async fn send(&self, destination: &str, message: &str) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Transport("connection refused".into()));
            }
            self.sent.lock().await.push((destination.to_string(), message.to_string()));
            Ok(())
        }
    }

    fn ctx(event_type: EventType, event_id: &str) -> DispatchContext {
        DispatchContext {
            key: EventKey::new("lexi", event_id),
            event_type,
            received_at: Utc::now(),
        }
    }

    fn order_payload() -> Value {
        json!({
            "event_id": "evt_order",
            "event_type": "order_processed",
            "conversation_id": "conv_7",
            "order_data": {
                "order_id": "ord_1",
                "items": [{"sku": "jollof", "qty": 2}],
                "total_amount": 5400,
                "currency": "NGN",
                "customer_phone": "+2348012345678"
            }
        })
    }

    #[tokio::test]
    async fn order_is_confirmed_once_and_customer_notified_once() {
        let store = MemoryDatastore::new();
        let outbox = Arc::new(Outbox::default());
        let handler = OrderProcessedHandler::new(Arc::new(store.clone()), outbox.clone());
        let ctx = ctx(EventType::OrderProcessed, "evt_order");

        handler.handle(&ctx, &order_payload()).await.unwrap();
        handler.handle(&ctx, &order_payload()).await.unwrap();

        let order = store.get(ORDERS, "ord_1").await.unwrap().unwrap();
        assert_eq!(order["status"], "confirmed");
        assert_eq!(order["conversation_id"], "conv_7");
        assert_eq!(order["total_amount"], 5400);

        let sent = outbox.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "+2348012345678");
        assert!(sent[0].1.contains("ord_1"));
    }

    #[tokio::test]
    async fn order_notification_failure_is_a_handler_error() {
        let store = MemoryDatastore::new();
        let outbox = Arc::new(Outbox { fail: true, ..Outbox::default() });
        let handler = OrderProcessedHandler::new(Arc::new(store.clone()), outbox);

        let err = handler
            .handle(&ctx(EventType::OrderProcessed, "evt_order"), &order_payload())
            .await
            .unwrap_err();

        assert!(matches!(err, HandlerError::Notify(_)));
        assert!(store.get(ORDERS, "ord_1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn order_without_id_is_rejected_by_handler() {
        let handler =
            OrderProcessedHandler::new(Arc::new(MemoryDatastore::new()), Arc::new(Outbox::default()));

        let err = handler
            .handle(&ctx(EventType::OrderProcessed, "e"), &json!({"order_data": {"items": []}}))
            .await
            .unwrap_err();

        assert!(matches!(err, HandlerError::MissingField(field) if field == "order_data.order_id"));
    }

    #[tokio::test]
    async fn appointment_falls_back_to_event_key() {
        let store = MemoryDatastore::new();
        let outbox = Arc::new(Outbox::default());
        let handler = AppointmentScheduledHandler::new(Arc::new(store.clone()), outbox.clone());

        handler
            .handle(
                &ctx(EventType::AppointmentScheduled, "evt_appt"),
                &json!({"appointment_data": {"scheduled_for": "2024-06-01T10:00:00Z", "customer_phone": "2348000000000"}}),
            )
            .await
            .unwrap();

        let record = store.get(APPOINTMENTS, "lexi:evt_appt").await.unwrap().unwrap();
        assert_eq!(record["status"], "scheduled");
        assert!(outbox.sent.lock().await[0].1.contains("2024-06-01T10:00:00Z"));
    }

    #[tokio::test]
    async fn complaint_opens_with_status() {
        let store = MemoryDatastore::new();
        let handler = CustomerComplaintHandler::new(Arc::new(store.clone()));

        handler
            .handle(
                &ctx(EventType::CustomerComplaintLogged, "evt_c"),
                &json!({"complaint_data": {"complaint_id": "cmp_1", "category": "delivery"}}),
            )
            .await
            .unwrap();

        let record = store.get(COMPLAINTS, "cmp_1").await.unwrap().unwrap();
        assert_eq!(record["status"], "open");
        assert_eq!(record["category"], "delivery");
    }

    #[tokio::test]
    async fn calculation_requires_type() {
        let store = MemoryDatastore::new();
        let handler = FinancialCalculationHandler::new(Arc::new(store.clone()));
        let ctx = ctx(EventType::FinancialCalculationCompleted, "evt_f");

        assert!(handler.handle(&ctx, &json!({"result": 1})).await.is_err());

        handler
            .handle(&ctx, &json!({"calculation_type": "loan_repayment", "result": {"monthly": 12000}}))
            .await
            .unwrap();
        let record = store.get(FINANCIAL_CALCULATIONS, "lexi:evt_f").await.unwrap().unwrap();
        assert_eq!(record["result"]["monthly"], 12000);
    }
}
