use indexmap::IndexMap;
use rawreq::http::{OutgoingRequest, ReqwestTransport, Transport, TransportError};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(method: &str, url: String) -> OutgoingRequest {
    OutgoingRequest {
        method: method.to_string(),
        url,
        ..OutgoingRequest::default()
    }
}

#[tokio::test]
async fn test_send_collects_status_headers_and_body() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-request-id", "r-1")
                .set_body_string("[1,2,3]"),
        )
        .mount(&mock_server)
        .await;

    let transport = ReqwestTransport::new().unwrap();
    let response = transport
        .send(&request("GET", format!("{}/items", mock_server.uri())), None)
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.status_text, "OK");
    assert_eq!(response.body, "[1,2,3]");
    assert_eq!(response.size, 7);
    assert_eq!(response.headers["x-request-id"], "r-1");
}

#[tokio::test]
async fn test_send_with_headers_and_body() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users"))
        .and(header("Content-Type", "application/json"))
        .and(body_string(r#"{"name":"ada"}"#))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut headers = IndexMap::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    let outgoing = OutgoingRequest {
        headers,
        body: Some(r#"{"name":"ada"}"#.to_string()),
        ..request("POST", format!("{}/users", mock_server.uri()))
    };

    let response = ReqwestTransport::new()
        .unwrap()
        .send(&outgoing, Some("create-1"))
        .await
        .unwrap();
    assert_eq!(response.status, 201);
    assert_eq!(response.status_text, "Created");
}

#[tokio::test]
async fn test_error_status_is_a_response() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
        .mount(&mock_server)
        .await;

    let response = ReqwestTransport::new()
        .unwrap()
        .send(&request("GET", format!("{}/nope", mock_server.uri())), None)
        .await
        .unwrap();
    assert_eq!(response.status, 404);
    assert_eq!(response.body, "missing");
}

#[tokio::test]
async fn test_per_request_timeout() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&mock_server)
        .await;

    let outgoing = OutgoingRequest {
        timeout: Some(Duration::from_millis(200)),
        ..request("GET", format!("{}/slow", mock_server.uri()))
    };
    let err = ReqwestTransport::new()
        .unwrap()
        .send(&outgoing, None)
        .await
        .unwrap_err();

    match err {
        TransportError::Failed { status_text, .. } => {
            assert_eq!(status_text.as_deref(), Some("Timeout"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_url_fails_without_sending() {
    let err = ReqwestTransport::new()
        .unwrap()
        .send(&request("GET", "   ".to_string()), None)
        .await
        .unwrap_err();
    assert!(!err.is_cancelled());
}

#[tokio::test]
async fn test_cancel_in_flight_request() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&mock_server)
        .await;

    let transport = Arc::new(ReqwestTransport::new().unwrap());
    let in_flight = {
        let transport = Arc::clone(&transport);
        let outgoing = request("GET", format!("{}/slow", mock_server.uri()));
        tokio::spawn(async move { transport.send(&outgoing, Some("slow-1")).await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    transport.cancel_request("slow-1");

    let result = tokio::time::timeout(Duration::from_secs(5), in_flight)
        .await
        .expect("cancelled request should finish promptly")
        .unwrap();
    assert_eq!(result.unwrap_err(), TransportError::Cancelled);
}
