//! Notification interface: a single `Emit(event)` operation with a
//! closed set of event variants, plus the webhook HMAC-SHA-256 signing
//! contract for when a webhook sink is configured.
//!
//! Delivery adapters (Slack/Teams/email/webhook transport) are explicit
//! external collaborators, out of scope here. What's in scope is
//! the event shape, the `Emit` trait sinks implement, and the signature
//! format a webhook sink must produce.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_proto::{CampaignId, PhaseId};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

/// The closed set of events the campaign engine and scheduler emit, per the
/// table in spec §6. Every variant carries a UTC timestamp.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Event {
    TaskPendingApproval { timestamp: DateTime<Utc>, task_id: CampaignId, task_type: String, environment: String, risk_level: String, summary: String },
    TaskApproved { timestamp: DateTime<Utc>, task_id: CampaignId, user_id: String, reason: Option<String> },
    TaskRejected { timestamp: DateTime<Utc>, task_id: CampaignId, user_id: String, reason: Option<String> },
    ExecutionStarted { timestamp: DateTime<Utc>, task_id: CampaignId, total_phases: u32 },
    ExecutionCompleted { timestamp: DateTime<Utc>, task_id: CampaignId, status: String },
    ExecutionFailed { timestamp: DateTime<Utc>, task_id: CampaignId, status: String, error: String },
    PhaseStarted { timestamp: DateTime<Utc>, task_id: CampaignId, phase_id: PhaseId, name: String },
    PhaseCompleted { timestamp: DateTime<Utc>, task_id: CampaignId, phase_id: PhaseId, name: String, status: String },
    PhaseFailed { timestamp: DateTime<Utc>, task_id: CampaignId, phase_id: PhaseId, name: String, error: String },
    CampaignStarted { timestamp: DateTime<Utc>, campaign_id: CampaignId, campaign_name: String, org_id: uuid::Uuid, message: String },
    CampaignCompleted { timestamp: DateTime<Utc>, campaign_id: CampaignId, campaign_name: String, org_id: uuid::Uuid, message: String },
    CampaignFailed { timestamp: DateTime<Utc>, campaign_id: CampaignId, campaign_name: String, org_id: uuid::Uuid, message: String },
    Rollback { timestamp: DateTime<Utc>, campaign_id: CampaignId, campaign_name: String, org_id: uuid::Uuid, message: String },
}

impl Event {
    /// The `X-QL-Event` header value for a webhook sink.
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::TaskPendingApproval { .. } => "taskPendingApproval",
            Event::TaskApproved { .. } => "taskApproved",
            Event::TaskRejected { .. } => "taskRejected",
            Event::ExecutionStarted { .. } => "executionStarted",
            Event::ExecutionCompleted { .. } => "executionCompleted",
            Event::ExecutionFailed { .. } => "executionFailed",
            Event::PhaseStarted { .. } => "phaseStarted",
            Event::PhaseCompleted { .. } => "phaseCompleted",
            Event::PhaseFailed { .. } => "phaseFailed",
            Event::CampaignStarted { .. } => "campaignStarted",
            Event::CampaignCompleted { .. } => "campaignCompleted",
            Event::CampaignFailed { .. } => "campaignFailed",
            Event::Rollback { .. } => "rollback",
        }
    }
}

/// A notification sink. Delivery is at-least-once; idempotent handling is
/// the sink's own responsibility (spec §6). A sink's `emit` must never be
/// allowed to fail the operation that triggered it — callers use
/// [`NotifyDispatcher`] rather than calling a sink directly from a hot path.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn emit(&self, event: &Event) -> Result<(), String>;
}

/// Default sink: logs the event via `tracing` and does nothing else. Always
/// present so `Emit` has a well-defined result even with no external sink
/// configured.
pub struct LoggingSink;

#[async_trait]
impl NotificationSink for LoggingSink {
    async fn emit(&self, event: &Event) -> Result<(), String> {
        info!(event_type = event.event_type(), "notification emitted");
        Ok(())
    }
}

/// Fans an event out to every configured sink, continuing past individual
/// sink failures.
pub struct BroadcastSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl BroadcastSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl NotificationSink for BroadcastSink {
    async fn emit(&self, event: &Event) -> Result<(), String> {
        let mut last_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.emit(event).await {
                warn!(error = %e, event_type = event.event_type(), "notification sink failed");
                last_err = Some(e);
            }
        }
        match last_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

/// Wraps a sink so emit failures are logged and counted rather than
/// propagated — per spec §7, "notification failures never fail the
/// triggering operation."
pub struct NotifyDispatcher {
    sink: Arc<dyn NotificationSink>,
    failures: AtomicU64,
}

impl NotifyDispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink, failures: AtomicU64::new(0) }
    }

    pub async fn emit(&self, event: Event) {
        if let Err(e) = self.sink.emit(&event).await {
            self.failures.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, event_type = event.event_type(), "notification emit failed, triggering operation unaffected");
        }
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Computes the HMAC-SHA-256 signature a webhook sink transmits as
/// `X-QL-Signature: sha256=<hex>` over the JSON-serialized payload (spec §6).
pub fn sign_webhook_payload(secret: &str, json_payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(json_payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_matches_spec_vocabulary() {
        let ev = Event::CampaignCompleted {
            timestamp: Utc::now(),
            campaign_id: uuid::Uuid::new_v4(),
            campaign_name: "rollout".into(),
            org_id: uuid::Uuid::new_v4(),
            message: "done".into(),
        };
        assert_eq!(ev.event_type(), "campaignCompleted");
    }

    #[test]
    fn webhook_signature_is_deterministic_and_keyed() {
        let payload = b"{\"event\":\"campaignCompleted\"}";
        let sig1 = sign_webhook_payload("secret-a", payload);
        let sig2 = sign_webhook_payload("secret-a", payload);
        let sig3 = sign_webhook_payload("secret-b", payload);
        assert_eq!(sig1, sig2);
        assert_ne!(sig1, sig3);
        assert!(sig1.starts_with("sha256="));
    }

    #[tokio::test]
    async fn dispatcher_counts_sink_failures_without_propagating() {
        struct AlwaysFails;
        #[async_trait]
        impl NotificationSink for AlwaysFails {
            async fn emit(&self, _event: &Event) -> Result<(), String> {
                Err("delivery unavailable".into())
            }
        }
        let dispatcher = NotifyDispatcher::new(Arc::new(AlwaysFails));
        dispatcher
            .emit(Event::TaskApproved { timestamp: Utc::now(), task_id: uuid::Uuid::new_v4(), user_id: "u1".into(), reason: None })
            .await;
        assert_eq!(dispatcher.failure_count(), 1);
    }

    #[tokio::test]
    async fn broadcast_continues_past_individual_failures() {
        struct Fails;
        #[async_trait]
        impl NotificationSink for Fails {
            async fn emit(&self, _event: &Event) -> Result<(), String> {
                Err("nope".into())
            }
        }
        let broadcast = BroadcastSink::new(vec![Arc::new(Fails), Arc::new(LoggingSink)]);
        // Overall result reflects the last failure, but LoggingSink still ran —
        // demonstrated by not panicking / hanging on the first error.
        let _ = broadcast
            .emit(&Event::CampaignStarted {
                timestamp: Utc::now(),
                campaign_id: uuid::Uuid::new_v4(),
                campaign_name: "x".into(),
                org_id: uuid::Uuid::new_v4(),
                message: "starting".into(),
            })
            .await;
    }
}
