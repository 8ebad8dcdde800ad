use serde_json::json;
use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

use super::support::{mock_rpc, rpc_settings, MockRpc};
use crate::rpc_client::{RpcClient, RpcClientError, RpcRequest};

#[tokio::test]
async fn batch_results_align_with_request_order() {
    // the mock endpoint reverses its response array, so this only passes if
    // responses are matched back by id
    let server = mock_rpc(|method, params| match method {
        "echo" => Ok(params[0].clone()),
        _ => Err((-32601, "no such method".into())),
    })
    .await;
    let client = RpcClient::new(&rpc_settings(&server)).unwrap();

    let requests = (0..10)
        .map(|i| RpcRequest::new("echo", json!([i])))
        .collect();
    let response = client.batch(requests).await.unwrap();

    assert!(response.bytes_received > 0);
    assert_eq!(response.results.len(), 10);
    for (i, result) in response.results.iter().enumerate() {
        assert_eq!(result.as_ref().unwrap(), &json!(i));
    }
}

#[tokio::test]
async fn sub_request_errors_surface_without_failing_the_batch() {
    let server = mock_rpc(|method, _| match method {
        "good" => Ok(json!("ok")),
        _ => Err((-32000, "boom".into())),
    })
    .await;
    let client = RpcClient::new(&rpc_settings(&server)).unwrap();

    let response = client
        .batch(vec![
            RpcRequest::new("good", json!([])),
            RpcRequest::new("bad", json!([])),
            RpcRequest::new("good", json!([])),
        ])
        .await
        .unwrap();

    assert_eq!(response.results[0].as_ref().unwrap(), &json!("ok"));
    assert!(matches!(
        response.results[1],
        Err(RpcClientError::Rpc { code: -32000, .. })
    ));
    assert_eq!(response.results[2].as_ref().unwrap(), &json!("ok"));
}

#[tokio::test]
async fn transient_http_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(MockRpc {
            handler: Box::new(|_, _| Ok(json!("recovered"))),
            max_subrequests: None,
        })
        .mount(&server)
        .await;

    let client = RpcClient::new(&rpc_settings(&server)).unwrap();
    let result = client.call("anything", json!([])).await.unwrap();
    assert_eq!(result, json!("recovered"));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn rpc_error_objects_are_not_retried() {
    let server = mock_rpc(|_, _| Err((-32000, "permanent".into()))).await;
    let client = RpcClient::new(&rpc_settings(&server)).unwrap();

    let err = client.call("anything", json!([])).await.unwrap_err();
    assert!(matches!(err, RpcClientError::Rpc { code: -32000, .. }));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn batches_split_into_posts_of_request_batch_size() {
    let server = mock_rpc(|method, params| match method {
        "echo" => Ok(params[0].clone()),
        _ => Err((-32601, "no such method".into())),
    })
    .await;
    let mut settings = rpc_settings(&server);
    settings.request_batch_size = 2;
    let client = RpcClient::new(&settings).unwrap();

    let requests = (0..5)
        .map(|i| RpcRequest::new("echo", json!([i])))
        .collect();
    let response = client.batch(requests).await.unwrap();

    for (i, result) in response.results.iter().enumerate() {
        assert_eq!(result.as_ref().unwrap(), &json!(i));
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn empty_batch_is_a_no_op() {
    let server = mock_rpc(|_, _| Ok(json!(null))).await;
    let client = RpcClient::new(&rpc_settings(&server)).unwrap();

    let response = client.batch(vec![]).await.unwrap();
    assert!(response.results.is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
}
