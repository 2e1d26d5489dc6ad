use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cce_enrich::EnrichConfig;
use cce_providers::{HttpSearchProvider, ProviderError, SearchProvider};
use cce_storage::HttpFetcher;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Answers every request with the same status and body, counting connections.
async fn canned_server(status_line: &'static str, body: &'static str) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });
    (addr, hits)
}

fn live_provider(addr: SocketAddr) -> HttpSearchProvider {
    let base_url = format!("http://{addr}/search.json");
    let config = EnrichConfig::from_lookup(|key| match key {
        "CCE_PROVIDER_API_KEY" => Some("test-key".to_string()),
        "CCE_PROVIDER_BASE_URL" => Some(base_url.clone()),
        "CCE_HTTP_TIMEOUT_SECS" => Some("5".to_string()),
        _ => None,
    });
    let fetcher = HttpFetcher::new(config.http_client_config()).unwrap();
    HttpSearchProvider::new(config.provider_config().unwrap(), fetcher)
}

#[tokio::test]
async fn quota_refusal_costs_exactly_one_request() {
    let (addr, hits) = canned_server(
        "429 Too Many Requests",
        r#"{"error":"Your searches for the month are used up: plan limit exceeded."}"#,
    )
    .await;
    let provider = live_provider(addr);

    let err = provider.search("409871", "30303").await.unwrap_err();
    assert!(matches!(err, ProviderError::QuotaExhausted(_)), "{err:?}");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transient_server_error_is_not_retried() {
    let (addr, hits) = canned_server("503 Service Unavailable", "upstream busy").await;
    let provider = live_provider(addr);

    assert!(provider.search("409871", "30303").await.is_err());
    assert!(provider.detail(204_279_858, "30303").await.is_err());
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}
