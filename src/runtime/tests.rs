use std::sync::Arc;

use serde_json::json;

use crate::config::{AuthorizationPolicy, ReconcileConfig};
use crate::domain::{AuthorizationRequest, CompletionData, PendingState};
use crate::engine::logic::{self, PUMP_FILLING, PUMP_IDLE};
use crate::engine::{PumpState, PumpStatus};
use crate::error::PtsError;
use crate::persistence::MemorySink;
use crate::pts::codec::ResponseEnvelope;
use crate::pts::command::PresetType;
use crate::pts::mock_client::{error_packet, ok_packet, MockPtsClient};
use crate::runtime::{build_hub, Forecourt, ForecourtEvent, StationHub};

// =========================================================================
// Helpers
// =========================================================================

fn hub() -> (Arc<StationHub>, Arc<MemorySink>) {
    hub_with(AuthorizationPolicy::Reject)
}

fn hub_with(policy: AuthorizationPolicy) -> (Arc<StationHub>, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::default());
    let config = ReconcileConfig {
        policy,
        ..ReconcileConfig::default()
    };
    (build_hub(sink.clone(), config), sink)
}

fn status(pump: u32, state: PumpState, volume: Option<f64>) -> PumpStatus {
    let mut s = PumpStatus::new(pump, state);
    s.volume = volume;
    s.amount = volume.map(|v| v * 2.0);
    s
}

fn request(pump: u32) -> AuthorizationRequest {
    AuthorizationRequest {
        employee_id: 11,
        station_id: 3,
        pump_number: pump,
        nozzle_number: 1,
        preset_type: PresetType::Amount,
        preset_dose: Some(50.0),
        price: Some(2.0),
    }
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<ForecourtEvent>) -> Vec<ForecourtEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

// =========================================================================
// Hub
// =========================================================================

#[test]
fn first_report_emits_only_status_update() {
    let (hub, _) = hub();
    let mut rx = hub.events().subscribe();

    let t = hub.apply_pump_status(status(1, PumpState::Idle, None));
    assert!(t.changed);
    assert_eq!(t.entered, None);

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], ForecourtEvent::StatusUpdate { pump_number: 1, .. }));
}

#[test]
fn class_change_follows_status_update() {
    let (hub, _) = hub();
    hub.apply_pump_status(status(2, PumpState::Idle, None));
    let mut rx = hub.events().subscribe();

    let t = hub.apply_pump_status(status(2, PumpState::Filling, Some(1.0)));
    assert_eq!(t.entered, Some(PumpState::Filling));

    // same class, new values: no class event
    let t = hub.apply_pump_status(status(2, PumpState::Filling, Some(2.0)));
    assert!(t.changed);
    assert_eq!(t.entered, None);

    let events = drain(&mut rx);
    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], ForecourtEvent::StatusUpdate { .. }));
    assert_eq!(events[1], ForecourtEvent::PumpFilling { pump_number: 2 });
    assert!(matches!(events[2], ForecourtEvent::StatusUpdate { .. }));
}

#[test]
fn delivering_reports_feed_the_reconciler() {
    let (hub, _) = hub();
    hub.reconciler().create_pending_transaction(request(4)).unwrap();

    hub.apply_pump_status(status(4, PumpState::Filling, Some(3.5)));
    let pending = hub.reconciler().pending_transaction(4).unwrap();
    assert_eq!(pending.volume, 3.5);
    assert_eq!(pending.amount, 7.0);
    assert_eq!(pending.status, PendingState::InProgress);

    // idle reports carry last-transaction values and must not touch it
    hub.apply_pump_status(status(4, PumpState::Idle, Some(99.0)));
    assert_eq!(hub.reconciler().pending_transaction(4).unwrap().volume, 3.5);
}

#[test]
fn transaction_report_emits_update_and_observes() {
    let (hub, _) = hub();
    hub.reconciler().create_pending_transaction(request(6)).unwrap();
    let mut rx = hub.events().subscribe();

    let data = json!({"Pump": 6, "Transaction": 77, "Volume": 10.0, "Amount": 20.0});
    let report = logic::transaction_report(Some(&data), None).unwrap();
    hub.apply_transaction_report(&report, data.clone());

    let pending = hub.reconciler().pending_transaction(6).unwrap();
    assert_eq!(pending.pts_transaction_id, Some(77));
    assert_eq!(pending.volume, 10.0);

    let events = drain(&mut rx);
    assert_eq!(
        events,
        vec![ForecourtEvent::TransactionUpdate {
            pump_number: 6,
            transaction_number: Some(77),
            data,
        }]
    );
}

#[test]
fn events_serialize_with_event_tag() {
    let ev = ForecourtEvent::TransactionComplete {
        pump_number: 3,
        transaction_number: Some(9),
    };
    let v = serde_json::to_value(&ev).unwrap();
    assert_eq!(v, json!({"event": "transactionComplete", "pumpNumber": 3, "transactionNumber": 9}));
}

#[test]
fn emit_without_subscribers_is_harmless() {
    let (hub, _) = hub();
    hub.apply_pump_status(status(1, PumpState::Offline, None));
    assert_eq!(hub.store().pump(1).unwrap().status, PumpState::Offline);
}

// =========================================================================
// Facade
// =========================================================================

#[tokio::test]
async fn authorize_sends_command_and_keeps_reservation() {
    let (hub, _) = hub();
    let client = Arc::new(MockPtsClient::new(|env| {
        Ok(ResponseEnvelope::new(vec![ok_packet(1, &env.packets[0].kind, json!({}))]))
    }));
    let forecourt = Forecourt::new(client.clone(), hub.clone());

    let pending = forecourt.authorize_pump(request(5), Some("op".into())).await.unwrap();
    assert_eq!(pending.pump_number, 5);
    assert_eq!(forecourt.hub().reconciler().pending_transactions().len(), 1);

    let sent = client.requests.lock()[0].clone();
    assert_eq!(sent.packets[0].kind, "PumpAuthorize");
    let data = sent.packets[0].data.as_ref().unwrap();
    assert_eq!(data["Pump"], 5);
    assert_eq!(data["Type"], "Amount");
    assert_eq!(data["Dose"], 50.0);
    assert_eq!(data["User"], "op");
}

#[tokio::test]
async fn failed_authorize_releases_reservation() {
    let (hub, _) = hub();
    let client = Arc::new(MockPtsClient::new(|_| {
        Ok(ResponseEnvelope::new(vec![error_packet(1, "PumpAuthorize", "pump busy")]))
    }));
    let forecourt = Forecourt::new(client, hub);

    let err = forecourt.authorize_pump(request(5), None).await.unwrap_err();
    assert!(matches!(err, PtsError::Protocol { .. }));
    assert!(forecourt.hub().reconciler().pending_transactions().is_empty());
}

#[tokio::test]
async fn failed_supersede_restores_the_previous_reservation() {
    let (hub, _) = hub_with(AuthorizationPolicy::Supersede);
    let client = Arc::new(MockPtsClient::new(|_| {
        Ok(ResponseEnvelope::new(vec![error_packet(1, "PumpAuthorize", "pump busy")]))
    }));
    let forecourt = Forecourt::new(client, hub.clone());
    hub.reconciler().create_pending_transaction(request(4)).unwrap();
    hub.reconciler().observe(4, Some(6.0), Some(12.0), Some(70));

    let mut other = request(4);
    other.employee_id = 99;
    let err = forecourt.authorize_pump(other, None).await.unwrap_err();
    assert!(matches!(err, PtsError::Protocol { .. }));

    let pending = hub.reconciler().pending_transactions();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].employee_id, 11, "original entry put back");
    assert_eq!(pending[0].volume, 6.0);
    assert_eq!(pending[0].pts_transaction_id, Some(70));
    assert_eq!(pending[0].status, PendingState::InProgress);
}

#[tokio::test]
async fn successful_supersede_replaces_the_reservation() {
    let (hub, _) = hub_with(AuthorizationPolicy::Supersede);
    let client = Arc::new(MockPtsClient::new(|_| {
        Ok(ResponseEnvelope::new(vec![ok_packet(1, "PumpAuthorize", json!({}))]))
    }));
    let forecourt = Forecourt::new(client, hub.clone());
    hub.reconciler().create_pending_transaction(request(4)).unwrap();

    let mut other = request(4);
    other.employee_id = 99;
    forecourt.authorize_pump(other, None).await.unwrap();
    assert_eq!(hub.reconciler().pending_transaction(4).unwrap().employee_id, 99);
}

#[tokio::test]
async fn authorize_conflict_never_reaches_device() {
    let (hub, _) = hub();
    let client = Arc::new(MockPtsClient::new(|_| Ok(ResponseEnvelope::new(vec![]))));
    let forecourt = Forecourt::new(client.clone(), hub);
    forecourt.hub().reconciler().create_pending_transaction(request(2)).unwrap();

    let err = forecourt.authorize_pump(request(2), None).await.unwrap_err();
    assert!(matches!(err, PtsError::Conflict { pump: 2 }));
    assert_eq!(client.request_count(), 0);
    assert_eq!(forecourt.hub().reconciler().pending_transactions().len(), 1, "original reservation kept");
}

#[tokio::test]
async fn not_configured_command_maps_to_dedicated_error() {
    let (hub, _) = hub();
    let client = Arc::new(MockPtsClient::new(|_| {
        Ok(ResponseEnvelope::new(vec![error_packet(
            1,
            "PumpGetTotals",
            "JSONPTS_ERROR_NOT_FOUND",
        )]))
    }));
    let forecourt = Forecourt::new(client, hub);

    let err = forecourt.pump_totals(9, 1).await.unwrap_err();
    assert!(matches!(err, PtsError::NotConfigured { ref command } if command == "PumpGetTotals"));
}

#[tokio::test]
async fn on_demand_status_updates_store() {
    let (hub, _) = hub();
    let client = Arc::new(MockPtsClient::new(|_| {
        Ok(ResponseEnvelope::new(vec![ok_packet(
            1,
            PUMP_FILLING,
            json!({"Nozzle": 2, "Volume": 4.0, "Amount": 8.0, "Price": 2.0}),
        )]))
    }));
    let forecourt = Forecourt::new(client, hub);

    let s = forecourt.pump_status(3).await.unwrap();
    assert_eq!(s.pump_number, 3, "pump taken from the request");
    assert_eq!(s.nozzle, Some(2));
    assert_eq!(forecourt.pump_statuses()[&3], s);
}

#[tokio::test]
async fn prices_are_read_from_payload() {
    let (hub, _) = hub();
    let client = Arc::new(MockPtsClient::new(|_| {
        Ok(ResponseEnvelope::new(vec![ok_packet(
            1,
            "PumpPrices",
            json!({"Pump": 1, "Prices": [1.59, 1.69]}),
        )]))
    }));
    let forecourt = Forecourt::new(client, hub);
    assert_eq!(forecourt.pump_prices(1).await.unwrap(), vec![1.59, 1.69]);
}

#[tokio::test]
async fn complete_through_hub_persists_once() {
    let (hub, sink) = hub();
    let client = Arc::new(MockPtsClient::new(|_| {
        Ok(ResponseEnvelope::new(vec![ok_packet(1, PUMP_IDLE, json!({}))]))
    }));
    let forecourt = Forecourt::new(client, hub);
    forecourt.hub().reconciler().create_pending_transaction(request(8)).unwrap();

    let done = forecourt
        .hub()
        .reconciler()
        .complete_transaction(
            8,
            CompletionData {
                volume: Some(25.0),
                amount: Some(50.0),
                ..CompletionData::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(done.record.volume, 25.0);
    assert_eq!(sink.records.lock().len(), 1);
    assert!(forecourt.hub().reconciler().cancel_transaction(8).is_err());
}
