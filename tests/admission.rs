//! End-to-end admission tests over the HTTP router with an in-memory store.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderValue, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use turnstile::clock::{Clock, ManualClock, SystemClock};
use turnstile::config::LimitSettings;
use turnstile::http::{router, IDENTITY_HEADER, REJECTION_MESSAGE, REQUEST_COUNT_HEADER};
use turnstile::ratelimit::{AdmissionControl, LimiterSelector, API_KEY_HEADER};
use turnstile::store::MemoryStore;

const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5));

fn settings(max_requests: u64, window_seconds: u64, block_seconds: u64) -> LimitSettings {
    let vars = [
        ("MAX_REQUESTS", max_requests.to_string()),
        ("WINDOW_SECONDS", window_seconds.to_string()),
        ("BLOCK_SECONDS", block_seconds.to_string()),
    ];
    LimitSettings::from_lookup(|name| {
        vars.iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.clone())
    })
    .unwrap()
}

fn app(settings: &LimitSettings, clock: Arc<dyn Clock>) -> Router {
    let admission: Arc<dyn AdmissionControl> = Arc::new(LimiterSelector::token_then_ip(
        settings,
        Arc::new(MemoryStore::new()),
        clock,
    ));
    router(admission)
}

fn request(token: Option<&str>) -> Request<Body> {
    let mut request = Request::builder().uri("/").body(Body::empty()).unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::new(CLIENT, 51000)));
    if let Some(token) = token {
        request
            .headers_mut()
            .insert(API_KEY_HEADER, HeaderValue::from_str(token).unwrap());
    }
    request
}

async fn send(app: &Router, token: Option<&str>) -> (StatusCode, String, String) {
    let response = app.clone().oneshot(request(token)).await.unwrap();
    let status = response.status();
    let identity = response.headers()[IDENTITY_HEADER]
        .to_str()
        .unwrap()
        .to_string();
    let count = response.headers()[REQUEST_COUNT_HEADER]
        .to_str()
        .unwrap()
        .to_string();
    (status, identity, count)
}

#[tokio::test]
async fn test_eleventh_request_from_same_ip_is_rejected() {
    let clock = ManualClock::new(1_700_000_000_000);
    let app = app(&settings(10, 10, 10), Arc::new(clock.clone()));

    for expected in 1..=10 {
        let (status, identity, count) = send(&app, None).await;
        assert_eq!(status, StatusCode::OK, "request {} should pass", expected);
        assert_eq!(identity, "IP_203.0.113.5");
        assert_eq!(count, expected.to_string());
        clock.advance(Duration::from_millis(1));
    }

    let response = app.clone().oneshot(request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[REQUEST_COUNT_HEADER], "10");
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], REJECTION_MESSAGE.as_bytes());
}

#[tokio::test]
async fn test_token_and_ip_budgets_are_independent() {
    let clock = ManualClock::new(1_700_000_000_000);
    let app = app(&settings(10, 2, 3), Arc::new(clock));

    for token in [Some("SomeToken"), None, Some("AnotherToken")] {
        for _ in 0..10 {
            let (status, _, _) = send(&app, token).await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, identity, count) = send(&app, token).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(count, "10");
        match token {
            Some(token) => assert_eq!(identity, format!("TOKEN_{token}")),
            None => assert_eq!(identity, "IP_203.0.113.5"),
        }
    }
}

#[tokio::test]
async fn test_admitted_again_only_after_block_period() {
    let block = Duration::from_secs(3);
    let app = app(&settings(10, 2, 3), Arc::new(SystemClock::new()));

    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(send(&app, None).await.0, StatusCode::OK);
    }
    assert_eq!(send(&app, None).await.0, StatusCode::TOO_MANY_REQUESTS);
    let blocked_at = Instant::now();

    loop {
        if send(&app, None).await.0 == StatusCode::OK {
            break;
        }
        assert!(
            blocked_at.elapsed() < block * 2,
            "identity still blocked long after the block period"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let gap = blocked_at.elapsed();
    assert!(
        gap >= block - Duration::from_millis(50),
        "unblocked after {:?}, expected at least {:?}",
        gap,
        block
    );
}
