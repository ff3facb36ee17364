use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::config::{PollerConfig, PushConfig, ReconcileConfig};
use crate::domain::AuthorizationRequest;
use crate::engine::logic::PUMP_FILLING;
use crate::engine::PumpState;
use crate::error::PtsError;
use crate::persistence::MemorySink;
use crate::polling::Poller;
use crate::pts::codec::ResponseEnvelope;
use crate::pts::command::PresetType;
use crate::pts::mock_client::{ok_packet, MockPtsClient};
use crate::push::{Disposition, HmacVerifier, PushIngestor, PushVerifier};
use crate::runtime::{build_hub, ForecourtEvent, StationHub};

// =========================================================================
// Helpers
// =========================================================================

fn hub() -> Arc<StationHub> {
    build_hub(Arc::new(MemorySink::default()), ReconcileConfig::default())
}

fn body(packets: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&json!({"Protocol": "jsonPTS", "Packets": packets})).unwrap()
}

// =========================================================================
// Routing
// =========================================================================

#[test]
fn routes_known_types_into_the_store() {
    let hub = hub();
    let ingestor = PushIngestor::new(hub.clone());

    let raw = body(json!([
        {"Id": 1, "Type": "PumpFillingStatus", "Data": {"Pump": 2, "Nozzle": 1, "Volume": 3.0, "Amount": 6.0}},
        {"Id": 2, "Type": "UploadTankMeasurement", "Data": {"Probe": 1, "ProductVolume": 5000.0, "Temperature": 12.0}},
        {"Id": 3, "Type": "PumpOfflineStatus", "Data": {"Pump": 4}},
    ]));
    let report = ingestor.ingest_raw(&raw, None).unwrap();

    assert_eq!(report.processed(), 3);
    assert_eq!(hub.store().pump(2).unwrap().status, PumpState::Filling);
    assert_eq!(hub.store().pump(4).unwrap().status, PumpState::Offline);
    assert_eq!(hub.store().tank(1).unwrap().volume, Some(5000.0));
}

#[test]
fn unknown_types_are_accepted_but_unprocessed() {
    let hub = hub();
    let ingestor = PushIngestor::new(hub.clone());

    let raw = body(json!([
        {"Id": 1, "Type": "UploadAlertRecord", "Data": {"Code": 7}},
        {"Id": 2, "Type": "PumpIdleStatus", "Data": {"Pump": 1}},
    ]));
    let report = ingestor.ingest_raw(&raw, None).unwrap();

    assert_eq!(report.processed(), 1);
    assert_eq!(report.unprocessed(), 1);
    assert_eq!(report.failed(), 0);
    assert_eq!(report.entries[0].disposition, Disposition::Unprocessed);
}

#[test]
fn packets_without_device_number_fail_individually() {
    let ingestor = PushIngestor::new(hub());
    let raw = body(json!([
        {"Id": 1, "Type": "PumpIdleStatus", "Data": {}},
        {"Id": 2, "Type": "PumpIdleStatus", "Data": {"Pump": 3}},
    ]));
    let report = ingestor.ingest_raw(&raw, None).unwrap();
    assert_eq!(report.failed(), 1);
    assert_eq!(report.processed(), 1);
}

#[test]
fn uploaded_transaction_updates_pending_and_emits() {
    let hub = hub();
    hub.reconciler()
        .create_pending_transaction(AuthorizationRequest {
            employee_id: 1,
            station_id: 1,
            pump_number: 5,
            nozzle_number: 1,
            preset_type: PresetType::FullTank,
            preset_dose: None,
            price: None,
        })
        .unwrap();
    let mut rx = hub.events().subscribe();
    let ingestor = PushIngestor::new(hub.clone());

    let raw = body(json!([
        {"Id": 1, "Type": "UploadPumpTransaction", "Data": {"Pump": 5, "Transaction": 900, "Volume": 40.0, "Amount": 64.0}},
    ]));
    ingestor.ingest_raw(&raw, None).unwrap();

    let pending = hub.reconciler().pending_transaction(5).unwrap();
    assert_eq!(pending.volume, 40.0);
    assert_eq!(pending.pts_transaction_id, Some(900));
    assert!(matches!(
        rx.try_recv().unwrap(),
        ForecourtEvent::TransactionUpdate { pump_number: 5, transaction_number: Some(900), .. }
    ));
}

#[test]
fn malformed_body_is_a_protocol_error() {
    let ingestor = PushIngestor::new(hub());
    let err = ingestor.ingest_raw(br#"{"Protocol":"jsonPTS"}"#, None).unwrap_err();
    assert!(matches!(err, PtsError::Protocol { .. }));
}

#[test]
fn malformed_packet_does_not_block_its_siblings() {
    let hub = hub();
    let ingestor = PushIngestor::new(hub.clone());
    let raw = body(json!([
        {"Id": 1, "Type": "PumpIdleStatus", "Data": {"Pump": 1}},
        {"Id": "2", "Type": "PumpIdleStatus", "Data": {"Pump": 2}},
    ]));
    let report = ingestor.ingest_raw(&raw, None).unwrap();

    assert_eq!(report.processed(), 1);
    assert!(hub.store().pump(1).is_some());
    assert!(hub.store().pump(2).is_none());
}

#[test]
fn ack_mirrors_each_packet() {
    let ingestor = PushIngestor::new(hub());
    let raw = body(json!([
        {"Id": 1, "Type": "PumpIdleStatus", "Data": {"Pump": 1}},
        {"Id": 2, "Type": "SomethingNew"},
        {"Id": 3, "Type": "ProbeMeasurements", "Data": {}},
    ]));
    let ack = ingestor.ingest_raw(&raw, None).unwrap().ack_envelope();

    let v = serde_json::to_value(&ack).unwrap();
    assert_eq!(v["Protocol"], "jsonPTS");
    assert_eq!(v["Packets"][0], json!({"Id": 1, "Type": "PumpIdleStatus", "Error": false, "Message": "OK"}));
    assert_eq!(v["Packets"][1]["Error"], false);
    assert_eq!(v["Packets"][2]["Error"], true);
    assert_eq!(v["Packets"][2]["Message"], "missing probe number");
}

// =========================================================================
// Signatures
// =========================================================================

const EMPTY_PUSH: &[u8] = br#"{"Protocol":"jsonPTS","Packets":[]}"#;
const EMPTY_PUSH_SIG: &str = "dc7b512c5ddff533a0c9910c2dc25ee55131058f69fef670ae69a7ee6e8c9d35";

#[test]
fn hmac_matches_known_vector() {
    let verifier = HmacVerifier::new("secret").unwrap();
    assert_eq!(verifier.sign(EMPTY_PUSH), EMPTY_PUSH_SIG);
    assert!(verifier.verify(EMPTY_PUSH, EMPTY_PUSH_SIG));
    assert!(verifier.verify(EMPTY_PUSH, &EMPTY_PUSH_SIG.to_uppercase()));
    assert!(!verifier.verify(EMPTY_PUSH, "not-hex"));
    assert!(!verifier.verify(b"{}", EMPTY_PUSH_SIG));
}

#[test]
fn signed_ingestor_rejects_missing_or_bad_signatures() {
    let config = PushConfig {
        secret: Some("secret".into()),
    };
    let ingestor = PushIngestor::from_config(hub(), &config).unwrap();

    assert!(matches!(ingestor.ingest_raw(EMPTY_PUSH, None), Err(PtsError::Signature(_))));
    let mut tampered = EMPTY_PUSH_SIG.to_string();
    tampered.replace_range(0..2, "00");
    assert!(matches!(
        ingestor.ingest_raw(EMPTY_PUSH, Some(&tampered)),
        Err(PtsError::Signature(_))
    ));
    assert!(ingestor.ingest_raw(EMPTY_PUSH, Some(EMPTY_PUSH_SIG)).is_ok());
}

#[test]
fn closures_work_as_verifiers() {
    let ingestor = PushIngestor::new(hub())
        .with_verifier(Arc::new(|_: &[u8], sig: &str| sig == "let-me-in"));
    assert!(ingestor.ingest_raw(EMPTY_PUSH, Some("let-me-in")).is_ok());
    assert!(ingestor.ingest_raw(EMPTY_PUSH, Some("nope")).is_err());
}

// =========================================================================
// Poll/push parity
// =========================================================================

#[tokio::test]
async fn push_and_poll_converge_on_the_same_state() {
    let data = json!({"Pump": 3, "Nozzle": 2, "Transaction": 12, "Volume": 7.5, "Amount": 15.0, "Price": 2.0});

    let polled = hub();
    let reply = data.clone();
    let client = Arc::new(MockPtsClient::new(move |_| {
        Ok(ResponseEnvelope::new(vec![ok_packet(1, PUMP_FILLING, reply.clone())]))
    }));
    let poller = Poller::new(
        client,
        polled.clone(),
        PollerConfig {
            interval: Duration::from_secs(1),
            tank_interval: Duration::from_secs(5),
            pumps: vec![3],
            probes: vec![],
        },
    );
    poller.poll_cycle(1).await.unwrap();

    let pushed = hub();
    let raw = body(json!([{"Id": 1, "Type": PUMP_FILLING, "Data": data}]));
    PushIngestor::new(pushed.clone()).ingest_raw(&raw, None).unwrap();

    assert_eq!(polled.store().pumps(), pushed.store().pumps());
}
