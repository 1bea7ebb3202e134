//! Contract Resolution Integration Tests
//!
//! Lookups over the scripted gateway: exactly one candidate resolves, zero
//! or several are filed as errors, sink failures are surfaced.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::timeout;

use tws_session_proxy::application::session::{
    AMBIGUOUS_CODE, NOT_SENT_CODE, SINK_FAILED_CODE, UNRESOLVED_CODE,
};
use tws_session_proxy::{
    ContractDescription, ContractResolutionWorkflow, ContractSink, ContractSpec, GatewayEndpoint,
    GatewayEvent, GatewayRequest, RequestId, Resolution, ScriptedGateway, SecurityType,
    SessionConfig, SessionError, SessionOutcome, SessionProxy, SinkError, StopReason,
};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct RecordingSink {
    resolved: Mutex<Vec<(ContractSpec, ContractDescription)>>,
    refuse_symbol: Option<&'static str>,
}

impl ContractSink for RecordingSink {
    fn on_resolved(
        &self,
        target: &ContractSpec,
        description: &ContractDescription,
    ) -> Result<(), SinkError> {
        if self.refuse_symbol == Some(target.symbol.as_str()) {
            return Err(SinkError::new("unique constraint violated"));
        }
        self.resolved
            .lock()
            .push((target.clone(), description.clone()));
        Ok(())
    }
}

fn candidate(con_id: i64, symbol: &str, primary: &str) -> ContractDescription {
    ContractDescription {
        con_id,
        symbol: symbol.to_string(),
        sec_type: SecurityType::Stk,
        last_trade_date: String::new(),
        strike: None,
        right: String::new(),
        exchange: "SMART".to_string(),
        primary_exchange: primary.to_string(),
        currency: "USD".to_string(),
        local_symbol: symbol.to_string(),
        market_name: symbol.to_string(),
        trading_class: symbol.to_string(),
        min_tick: None,
        long_name: String::new(),
    }
}

/// `MISSING` has no candidates, `DUAL` has two, everything else one.
fn gateway() -> ScriptedGateway {
    ScriptedGateway::new().with_responder(|request| {
        let GatewayRequest::ContractDetails { id, contract } = request else {
            return Vec::new();
        };
        let candidates = match contract.symbol.as_str() {
            "MISSING" => Vec::new(),
            "DUAL" => vec![
                candidate(11, "DUAL", "NYSE"),
                candidate(12, "DUAL", "ARCA"),
            ],
            symbol => vec![candidate(100 + id.value(), symbol, "NASDAQ")],
        };
        candidates
            .into_iter()
            .map(|description| GatewayEvent::ContractDetails { id: *id, description })
            .chain(std::iter::once(GatewayEvent::ContractDetailsEnd(*id)))
            .collect()
    })
}

fn config() -> SessionConfig {
    SessionConfig::new(GatewayEndpoint::default())
        .with_pacing_delay(Duration::ZERO)
        .with_timeout(Duration::from_secs(10))
}

fn specs(symbols: &[&str]) -> Vec<ContractSpec> {
    symbols.iter().map(|s| ContractSpec::stock(*s)).collect()
}

async fn resolve(
    targets: Vec<ContractSpec>,
    sink: Arc<RecordingSink>,
) -> (SessionProxy<ContractResolutionWorkflow>, SessionOutcome) {
    let workflow = ContractResolutionWorkflow::new(targets, sink);
    let proxy = SessionProxy::new(workflow, Arc::new(gateway()), config());
    proxy.activate().await.unwrap();
    let outcome = timeout(WAIT, proxy.wait_for_completion())
        .await
        .expect("session did not finish")
        .unwrap();
    (proxy, outcome)
}

// =============================================================================
// Single Candidate
// =============================================================================

#[tokio::test]
async fn test_single_candidate_is_persisted_once() {
    let sink = Arc::new(RecordingSink::default());
    let (proxy, outcome) = resolve(specs(&["MSFT"]), Arc::clone(&sink)).await;

    assert_eq!(outcome.stop_reason, StopReason::Idle);
    assert!(outcome.is_clean());

    let resolved = sink.resolved.lock();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].0.symbol, "MSFT");
    assert_eq!(resolved[0].1.con_id, 101);
    assert_eq!(resolved[0].1.to_spec().con_id, Some(101));

    proxy.with_book(|book| {
        assert!(matches!(
            book.resolution(RequestId::new(1)),
            Some(Resolution::Resolved(d)) if d.con_id == 101
        ));
    });
}

#[tokio::test]
async fn test_batch_resolves_in_request_order() {
    let sink = Arc::new(RecordingSink::default());
    let (proxy, outcome) = resolve(specs(&["AAPL", "MSFT", "IBM"]), Arc::clone(&sink)).await;

    assert!(outcome.is_clean());
    assert_eq!(sink.resolved.lock().len(), 3);

    let symbols: Vec<String> = proxy.with_book(|book| {
        book.resolutions()
            .map(|(target, _)| target.symbol.clone())
            .collect()
    });
    assert_eq!(symbols, vec!["AAPL", "MSFT", "IBM"]);
}

// =============================================================================
// Zero or Several Candidates
// =============================================================================

#[tokio::test]
async fn test_missing_contract_is_filed_as_unresolved() {
    let sink = Arc::new(RecordingSink::default());
    let (proxy, outcome) = resolve(specs(&["AAPL", "MISSING"]), Arc::clone(&sink)).await;

    assert_eq!(outcome.stop_reason, StopReason::Idle);
    assert!(outcome.outstanding.is_empty());
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].request_id, Some(RequestId::new(2)));
    assert_eq!(outcome.errors[0].code, UNRESOLVED_CODE);

    assert_eq!(sink.resolved.lock().len(), 1);
    proxy.with_book(|book| {
        assert_eq!(
            book.resolution(RequestId::new(2)),
            Some(&Resolution::Unresolved)
        );
    });
}

#[tokio::test]
async fn test_ambiguous_contract_keeps_every_candidate() {
    let sink = Arc::new(RecordingSink::default());
    let (proxy, outcome) = resolve(specs(&["DUAL"]), Arc::clone(&sink)).await;

    assert_eq!(outcome.stop_reason, StopReason::Idle);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].code, AMBIGUOUS_CODE);
    assert!(sink.resolved.lock().is_empty());

    proxy.with_book(|book| match book.resolution(RequestId::new(1)) {
        Some(Resolution::Ambiguous { candidates }) => {
            let ids: Vec<i64> = candidates.iter().map(|c| c.con_id).collect();
            assert_eq!(ids, vec![11, 12]);
        }
        other => panic!("expected ambiguous resolution, got {other:?}"),
    });
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_sink_failure_is_filed_against_lookup() {
    let sink = Arc::new(RecordingSink {
        refuse_symbol: Some("IBM"),
        ..RecordingSink::default()
    });
    let (proxy, outcome) = resolve(specs(&["AAPL", "IBM"]), Arc::clone(&sink)).await;

    assert_eq!(outcome.stop_reason, StopReason::Idle);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].code, SINK_FAILED_CODE);
    assert!(outcome.errors[0].message.contains("unique constraint"));

    proxy.with_book(|book| {
        assert!(matches!(
            book.resolution(RequestId::new(2)),
            Some(Resolution::SinkFailed(_))
        ));
    });
}

#[tokio::test]
async fn test_invalid_target_is_skipped_and_reported() {
    let sink = Arc::new(RecordingSink::default());
    let (proxy, outcome) = resolve(specs(&["AAPL", " ", "MSFT"]), Arc::clone(&sink)).await;

    assert_eq!(outcome.stop_reason, StopReason::Idle);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].request_id, Some(RequestId::new(2)));
    assert_eq!(outcome.errors[0].code, NOT_SENT_CODE);

    assert_eq!(sink.resolved.lock().len(), 2);
    proxy.with_book(|book| {
        assert_eq!(book.requested_count(), 2);
        assert!(book.target(RequestId::new(2)).is_none());
    });
}

#[tokio::test]
async fn test_end_for_unrequested_lookup_faults_session() {
    let gateway = Arc::new(ScriptedGateway::new());
    let workflow =
        ContractResolutionWorkflow::new(specs(&["AAPL"]), Arc::new(RecordingSink::default()));
    let proxy = SessionProxy::new(workflow, Arc::clone(&gateway) as _, config());
    proxy.activate().await.unwrap();

    timeout(WAIT, async {
        while gateway.sent().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    gateway
        .inject(GatewayEvent::ContractDetailsEnd(RequestId::new(77)))
        .unwrap();

    let result = timeout(WAIT, proxy.wait_for_completion()).await.unwrap();
    assert!(matches!(result, Err(SessionError::Fault(_))));
}
