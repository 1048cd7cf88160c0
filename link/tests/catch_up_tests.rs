use serde_json::{json, Value as JsonValue};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use courier_link::{CatchUpClient, LinkError};

/// One canned answer: HTTP status, body, and how long to hold it back.
type Reply = (u16, String, Duration);

/// Minimal HTTP/1.1 pull endpoint. `respond` sees the request index and the
/// decoded JSON body; every body is recorded.
async fn spawn_pull_server<F>(respond: F) -> (String, Arc<Mutex<Vec<JsonValue>>>)
where
    F: Fn(usize, &JsonValue) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&requests);
    let respond = Arc::new(respond);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let seen = Arc::clone(&seen);
            let respond = Arc::clone(&respond);
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let header_end = loop {
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                };
                let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
                let content_length = headers
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                while buf.len() < header_end + content_length {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let body: JsonValue =
                    serde_json::from_slice(&buf[header_end..header_end + content_length])
                        .unwrap_or(JsonValue::Null);

                let (code, reply, delay) = {
                    let mut seen = seen.lock().unwrap();
                    let reply = respond(seen.len(), &body);
                    seen.push(body);
                    reply
                };
                tokio::time::sleep(delay).await;
                let response = format!(
                    "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    code,
                    reply.len(),
                    reply
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{}/", addr), requests)
}

fn ok_page(items: JsonValue, page_token: Option<&str>, has_more: bool) -> Reply {
    let body = json!({
        "code": 1000,
        "message": "ok",
        "data": {"items": items, "page_token": page_token, "has_more": has_more}
    });
    (200, body.to_string(), Duration::ZERO)
}

#[tokio::test]
async fn test_fetch_all_follows_page_tokens() {
    let (base, requests) = spawn_pull_server(|_, body| match body["page_token"].as_str() {
        None => ok_page(json!([1, 2]), Some("p2"), true),
        Some("p2") => ok_page(json!([3]), Some("p3"), true),
        Some(_) => ok_page(json!([4]), None, false),
    })
    .await;
    let client = CatchUpClient::new(base).unwrap();

    let items = client.fetch_all(2).await.unwrap();
    assert_eq!(items, vec![json!(1), json!(2), json!(3), json!(4)]);

    let requests = requests.lock().unwrap();
    let tokens: Vec<_> = requests.iter().map(|r| r["page_token"].as_str()).collect();
    assert_eq!(tokens, vec![None, Some("p2"), Some("p3")]);
    assert!(requests.iter().all(|r| r["limit"] == json!(2)));
}

#[tokio::test]
async fn test_fetch_all_stops_on_repeated_token() {
    let (base, requests) =
        spawn_pull_server(|_, _| ok_page(json!(["again"]), Some("same"), true)).await;
    let client = CatchUpClient::new(base).unwrap();

    let items = client.fetch_all(10).await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(requests.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_fetch_all_stops_when_more_but_no_token() {
    let (base, requests) = spawn_pull_server(|_, _| ok_page(json!(["x"]), None, true)).await;
    let client = CatchUpClient::new(base).unwrap();

    assert_eq!(client.fetch_all(10).await.unwrap().len(), 1);
    assert_eq!(requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_envelope_error_code_rejects() {
    let (base, _) = spawn_pull_server(|_, _| {
        let body = json!({"code": 3103, "message": "session expired"});
        (200, body.to_string(), Duration::ZERO)
    })
    .await;
    let client = CatchUpClient::new(base).unwrap();

    let err = client.fetch_page(None, 10).await.unwrap_err();
    assert!(matches!(
        err,
        LinkError::Rejected { code: 3103, ref message } if message == "session expired"
    ));
}

#[tokio::test]
async fn test_http_error_is_not_retried() {
    let (base, requests) =
        spawn_pull_server(|_, _| (503, "overloaded".to_string(), Duration::ZERO)).await;
    let client = CatchUpClient::new(base).unwrap();

    let err = client.fetch_page(Some("p1"), 10).await.unwrap_err();
    assert!(matches!(err, LinkError::ServerError { status_code: 503, .. }));
    assert_eq!(requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_timeout_is_retried() {
    let (base, requests) = spawn_pull_server(|index, _| {
        let (code, body, _) = ok_page(json!(["late"]), None, false);
        let delay = if index == 0 { Duration::from_secs(2) } else { Duration::ZERO };
        (code, body, delay)
    })
    .await;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_millis(300))
        .build()
        .unwrap();
    let client = CatchUpClient::with_client(base, http);

    let page = client.fetch_page(None, 10).await.unwrap();
    assert_eq!(page.items, vec![json!("late")]);
    assert!(!page.has_more);
    assert_eq!(requests.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_unreachable_server_gives_up_after_retries() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = CatchUpClient::new(format!("http://{}", addr)).unwrap();

    let err = client.fetch_page(None, 10).await.unwrap_err();
    assert!(!matches!(err, LinkError::Rejected { .. } | LinkError::ServerError { .. }));
}
