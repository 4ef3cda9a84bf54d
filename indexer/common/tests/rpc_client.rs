use std::time::Duration;

use assert_matches::assert_matches;
use escrow_core::{decode_event, Address, EventKind, LedgerEvent, TxHash};
use escrow_indexer_common::{
    client::{JsonRpcLedgerClient, LedgerClient, RetryingLedgerClient},
    IndexerError,
};
use exponential_backoff::Backoff;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{body_partial_json, method},
    Mock, MockServer, ResponseTemplate,
};

fn rpc_result(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": result,
    }))
}

#[tokio::test]
async fn test_head_height() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "ledger_headHeight" })))
        .respond_with(rpc_result(json!(42)))
        .mount(&server)
        .await;

    let client = JsonRpcLedgerClient::new(server.uri()).unwrap();
    assert_eq!(client.head().await.unwrap(), 42);
}

#[tokio::test]
async fn test_get_events_sends_filter() {
    let server = MockServer::start().await;
    let contract = Address::from_low_u64_be(0xe5c0);
    let backer = Address::from_low_u64_be(2);

    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "ledger_getEvents",
            "params": [{
                "address": contract.as_str(),
                "fromBlock": 10,
                "toBlock": 20,
                "events": ["PledgeMade"],
            }],
        })))
        .respond_with(rpc_result(json!([{
            "blockNumber": 12,
            "transactionHash": TxHash::from_low_u64_be(3).as_str(),
            "logIndex": 0,
            "event": "PledgeMade",
            "args": {
                "projectId": 0,
                "backer": backer.as_str(),
                "amount": "100000000000000000",
            },
        }])))
        .expect(1)
        .mount(&server)
        .await;

    let client = JsonRpcLedgerClient::new(server.uri()).unwrap();
    let events = client
        .events(&contract, 10, 20, &[EventKind::PledgeMade])
        .await
        .unwrap();
    assert_eq!(events.len(), 1);

    let envelope = decode_event(&events[0]).unwrap();
    assert_eq!(envelope.block_number, 12);
    assert_matches!(envelope.event, LedgerEvent::PledgeMade(pledge) if pledge.backer == backer);
}

#[tokio::test]
async fn test_rpc_error_is_fetch_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32000, "message": "node is syncing" },
        })))
        .mount(&server)
        .await;

    let client = JsonRpcLedgerClient::new(server.uri()).unwrap();
    let err = client.head().await.unwrap_err();
    assert_matches!(err.current_context(), IndexerError::Fetch);
}

#[tokio::test]
async fn test_retry_gives_up_with_fetch_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let backoff = Backoff::new(2, Duration::from_millis(10), Some(Duration::from_millis(20)));
    let inner = JsonRpcLedgerClient::new(server.uri()).unwrap();
    let client = RetryingLedgerClient::new(inner, backoff);

    let err = client.head(&CancellationToken::new()).await.unwrap_err();
    assert_matches!(err.current_context(), IndexerError::Fetch);

    let requests = server.received_requests().await.unwrap();
    assert!(requests.len() > 1);
}

#[tokio::test]
async fn test_retry_recovers_after_transient_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(rpc_result(json!(7)))
        .mount(&server)
        .await;

    let backoff = Backoff::new(3, Duration::from_millis(10), Some(Duration::from_millis(20)));
    let inner = JsonRpcLedgerClient::new(server.uri()).unwrap();
    let client = RetryingLedgerClient::new(inner, backoff);

    let head = client.head(&CancellationToken::new()).await.unwrap();
    assert_eq!(head, Some(7));
}

#[tokio::test]
async fn test_retry_stops_when_cancelled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let backoff = Backoff::new(5, Duration::from_secs(10), None);
    let inner = JsonRpcLedgerClient::new(server.uri()).unwrap();
    let client = RetryingLedgerClient::new(inner, backoff);

    let ct = CancellationToken::new();
    ct.cancel();
    let head = client.head(&ct).await.unwrap();
    assert_eq!(head, None);
}
