//! Integration tests for the fetch pipeline.
//!
//! These tests drive the fetcher, result map, redirect scheme and cacher
//! against mock HTTP servers and inspect what reached the repository.

use std::sync::Arc;
use std::time::Duration;

use preserver_core::archive::ArchiveTypes;
use preserver_core::au::{ArchivalUnit, AuConfig, RuleAction, UnitType};
use preserver_core::fetch::{
    CacheExceptionKind, ClientSettings, FetchOptions, FetchResult, FetchState, HttpClient,
    HttpResultMap, RedirectScheme, RetryPolicy, UrlFetcher, fetch_with_retry,
};
use preserver_core::repository::MemoryRepository;
use preserver_core::tree::{
    PROPERTY_CONTENT_URL, PROPERTY_FETCH_TIME, PROPERTY_NODE_URL, PROPERTY_ORIG_URL,
    PROPERTY_REDIRECTED_TO,
};
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_policy(retry_count: u32) -> RetryPolicy {
    RetryPolicy {
        retry_count,
        retry_delay: Duration::from_millis(10),
        network_retry_count: retry_count,
        network_retry_delay: Duration::from_millis(10),
    }
}

/// Unit covering everything on the mock server.
fn unit_for(server: &MockServer, scheme: RedirectScheme) -> Arc<ArchivalUnit> {
    unit_with_config(
        AuConfig::new("journal", format!("{}/", server.uri())),
        scheme,
        fast_policy(2),
    )
}

fn unit_with_config(
    config: AuConfig,
    scheme: RedirectScheme,
    policy: RetryPolicy,
) -> Arc<ArchivalUnit> {
    let unit_type = UnitType::new("journal")
        .with_redirect_scheme(scheme)
        .with_result_map(HttpResultMap::new(policy));
    Arc::new(
        ArchivalUnit::new(
            config,
            Arc::new(unit_type),
            Arc::new(MemoryRepository::new()),
            Arc::new(ArchiveTypes::default()),
        )
        .expect("unit should be valid"),
    )
}

fn client() -> HttpClient {
    HttpClient::new(&ClientSettings::default()).expect("client should build")
}

fn fetcher(unit: &Arc<ArchivalUnit>, url: &str) -> UrlFetcher {
    UrlFetcher::new(Arc::clone(unit), client(), url, FetchOptions::default())
}

#[tokio::test]
async fn test_fetch_200_stores_one_version() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/html")
                .set_body_bytes(b"hello".to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let unit = unit_for(&server, RedirectScheme::FOLLOW_IN_SPEC);
    let url = format!("{}/a.html", server.uri());
    let mut fetcher = fetcher(&unit, &url);

    let result = fetcher.fetch().await;
    assert_eq!(result.unwrap(), FetchResult::Fetched);
    assert_eq!(fetcher.state(), FetchState::Success);

    let leaf = unit.cached_url(&url).unwrap();
    assert!(leaf.has_content());
    assert_eq!(leaf.version(), Some(1));
    assert_eq!(leaf.read_content().unwrap(), b"hello");
    assert_eq!(leaf.content_type(), Some("text/html"));
    let props = leaf.properties();
    assert_eq!(props.get(PROPERTY_NODE_URL), Some(&url));
    assert_eq!(props.get(PROPERTY_CONTENT_URL), Some(&url));
    assert_eq!(props.get(PROPERTY_ORIG_URL), Some(&url));
    assert!(props.contains_key(PROPERTY_FETCH_TIME));
}

#[tokio::test]
async fn test_fetch_503_retries_then_fails_without_storing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let unit = unit_for(&server, RedirectScheme::FOLLOW_IN_SPEC);
    let url = format!("{}/busy", server.uri());
    let mut fetcher = fetcher(&unit, &url);

    let (e, attempts) = fetch_with_retry(&mut fetcher).await.unwrap_err();
    assert_eq!(e.kind(), CacheExceptionKind::RetrySameUrl);
    assert_eq!(e.status(), Some(503));
    assert!(e.is_retryable());
    assert_eq!(attempts, 3);
    assert_eq!(fetcher.state(), FetchState::Failed);
    assert!(!unit.cached_url(&url).unwrap().has_content());
}

#[tokio::test]
async fn test_fetch_retry_recovers_after_transient_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
        .mount(&server)
        .await;

    let unit = unit_for(&server, RedirectScheme::FOLLOW_IN_SPEC);
    let url = format!("{}/flaky", server.uri());
    let mut fetcher = fetcher(&unit, &url);

    assert_eq!(fetch_with_retry(&mut fetcher).await.unwrap(), FetchResult::Fetched);
    assert_eq!(unit.cached_url(&url).unwrap().read_content().unwrap(), b"ok");
}

#[tokio::test]
async fn test_fetch_404_is_not_found_and_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let unit = unit_for(&server, RedirectScheme::FOLLOW_IN_SPEC);
    let url = format!("{}/gone", server.uri());
    let mut fetcher = fetcher(&unit, &url);

    let (e, attempts) = fetch_with_retry(&mut fetcher).await.unwrap_err();
    assert_eq!(e.kind(), CacheExceptionKind::NotFound);
    assert!(e.is_fail());
    assert!(!e.is_fatal());
    assert_eq!(attempts, 1);
}

#[tokio::test]
async fn test_redirect_stores_under_origin_only() {
    let server = MockServer::start().await;
    let target = format!("{}/new.html", server.uri());
    Mock::given(method("GET"))
        .and(path("/old.html"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new.html"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new.html"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"moved".to_vec()))
        .mount(&server)
        .await;

    let unit = unit_for(&server, RedirectScheme::FOLLOW_IN_SPEC);
    let origin = format!("{}/old.html", server.uri());
    let mut fetcher = fetcher(&unit, &origin);

    assert_eq!(fetcher.fetch().await.unwrap(), FetchResult::Fetched);
    assert_eq!(fetcher.redirect_chain(), [target.clone()]);

    let leaf = unit.cached_url(&origin).unwrap();
    assert_eq!(leaf.read_content().unwrap(), b"moved");
    assert_eq!(leaf.properties().get(PROPERTY_CONTENT_URL), Some(&target));
    assert_eq!(leaf.properties().get(PROPERTY_REDIRECTED_TO), Some(&target));
    assert!(!unit.cached_url(&target).unwrap().has_content());
}

#[tokio::test]
async fn test_redirect_store_all_stores_every_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/b"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(307).insert_header("Location", "/c"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/c"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"final".to_vec()))
        .mount(&server)
        .await;

    let unit = unit_for(&server, RedirectScheme::FOLLOW_IN_SPEC.storing_all());
    let base = server.uri();
    let (a, b, c) = (format!("{base}/a"), format!("{base}/b"), format!("{base}/c"));
    let mut fetcher = fetcher(&unit, &a);

    assert_eq!(fetcher.fetch().await.unwrap(), FetchResult::Fetched);
    for name in [&a, &b, &c] {
        let leaf = unit.cached_url(name).unwrap();
        assert_eq!(leaf.read_content().unwrap(), b"final", "content under {name}");
        assert_eq!(leaf.properties().get(PROPERTY_CONTENT_URL), Some(&c));
        assert_eq!(leaf.properties().get(PROPERTY_ORIG_URL), Some(&a));
    }
    assert_eq!(unit.cached_url(&a).unwrap().properties().get(PROPERTY_REDIRECTED_TO), Some(&b));
    assert_eq!(unit.cached_url(&b).unwrap().properties().get(PROPERTY_REDIRECTED_TO), Some(&c));
    assert_eq!(unit.cached_url(&c).unwrap().properties().get(PROPERTY_REDIRECTED_TO), None);
}

#[tokio::test]
async fn test_redirect_outside_crawl_rules_not_followed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/in/a"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/out/b"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/out/b"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"elsewhere".to_vec()))
        .expect(0)
        .mount(&server)
        .await;

    let base = server.uri();
    let config = AuConfig::new("journal", format!("{base}/"))
        .with_rule(RuleAction::Include, format!("^{}/in/", regex::escape(&base)));
    let unit = unit_with_config(config, RedirectScheme::FOLLOW_IN_SPEC, fast_policy(0));
    let url = format!("{base}/in/a");
    let mut fetcher = fetcher(&unit, &url);

    let e = fetcher.fetch().await.unwrap_err();
    assert_eq!(e.kind(), CacheExceptionKind::RedirectOutsideCrawlSpec);
    assert_eq!(e.new_url(), Some(format!("{base}/out/b").as_str()));
    assert!(!e.is_fail());
    assert_eq!(fetcher.state(), FetchState::Redirected);
    assert!(!unit.cached_url(&url).unwrap().has_content());
}

#[tokio::test]
async fn test_redirect_not_followed_when_scheme_forbids() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/b"))
        .mount(&server)
        .await;

    let unit = unit_for(&server, RedirectScheme::DONT_FOLLOW);
    let url = format!("{}/a", server.uri());
    let mut fetcher = fetcher(&unit, &url);

    let e = fetcher.fetch().await.unwrap_err();
    assert_eq!(e.kind(), CacheExceptionKind::RetryNewUrlTemporary);
    assert_eq!(e.new_url(), Some(format!("{}/b", server.uri()).as_str()));
    assert_eq!(fetcher.state(), FetchState::Redirected);
}

#[tokio::test]
async fn test_redirect_loop_raises_last_new_url_exception() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/pong"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pong"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/ping"))
        .mount(&server)
        .await;

    let unit = unit_for(&server, RedirectScheme::FOLLOW);
    let url = format!("{}/ping", server.uri());
    let options = FetchOptions {
        max_redirects: 3,
        ..FetchOptions::default()
    };
    let mut fetcher = UrlFetcher::new(Arc::clone(&unit), client(), url.as_str(), options);

    let e = fetcher.fetch().await.unwrap_err();
    // the fourth hop exceeds the limit; its own redirect outcome is raised
    assert_eq!(e.kind(), CacheExceptionKind::RetryNewUrlTemporary);
    assert_eq!(e.status(), Some(302));
    assert_eq!(e.new_url(), Some(format!("{}/ping", server.uri()).as_str()));
    assert!(!e.is_fail());
    assert!(!e.is_fatal());
    assert_eq!(fetcher.state(), FetchState::Redirected);
    assert!(!unit.cached_url(&url).unwrap().has_content());
}

#[tokio::test]
async fn test_directory_redirect_followed_without_chain_entry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dir"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/dir/"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/dir/"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"index".to_vec()))
        .mount(&server)
        .await;

    let unit = unit_for(&server, RedirectScheme::DONT_FOLLOW);
    let url = format!("{}/dir", server.uri());
    let mut fetcher = fetcher(&unit, &url);

    assert_eq!(fetcher.fetch().await.unwrap(), FetchResult::Fetched);
    assert!(fetcher.redirect_chain().is_empty());
    let leaf = unit.cached_url(&url).unwrap();
    assert_eq!(leaf.read_content().unwrap(), b"index");
    assert_eq!(
        leaf.properties().get(PROPERTY_CONTENT_URL),
        Some(&format!("{}/dir/", server.uri()))
    );
}

#[tokio::test]
async fn test_conditional_refetch_not_modified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .and(header_exists("If-Modified-Since"))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Last-Modified", "Sun, 06 Nov 1994 08:49:37 GMT")
                .set_body_bytes(b"v1".to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let unit = unit_for(&server, RedirectScheme::FOLLOW_IN_SPEC);
    let url = format!("{}/page", server.uri());

    let mut first = fetcher(&unit, &url);
    assert_eq!(first.fetch().await.unwrap(), FetchResult::Fetched);

    let mut second = fetcher(&unit, &url);
    assert_eq!(second.fetch().await.unwrap(), FetchResult::FetchedNotModified);
    assert_eq!(unit.cached_url(&url).unwrap().version(), Some(1));
}

#[tokio::test]
async fn test_refetch_creates_new_version_and_old_leaf_keeps_reading() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"one".to_vec()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"two".to_vec()))
        .mount(&server)
        .await;

    let unit = unit_for(&server, RedirectScheme::FOLLOW_IN_SPEC);
    let url = format!("{}/v", server.uri());

    fetcher(&unit, &url).fetch().await.unwrap();
    let old = unit.cached_url(&url).unwrap();
    fetcher(&unit, &url).fetch().await.unwrap();
    let new = unit.cached_url(&url).unwrap();

    assert_eq!(old.version(), Some(1));
    assert_eq!(new.version(), Some(2));
    assert_eq!(old.read_content().unwrap(), b"one");
    assert_eq!(new.read_content().unwrap(), b"two");
}

#[tokio::test]
async fn test_fetcher_reuse_requires_reset() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/once"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()))
        .mount(&server)
        .await;

    let unit = unit_for(&server, RedirectScheme::FOLLOW_IN_SPEC);
    let url = format!("{}/once", server.uri());
    let mut fetcher = fetcher(&unit, &url);
    fetcher.fetch().await.unwrap();

    let e = fetcher.fetch().await.unwrap_err();
    assert_eq!(e.kind(), CacheExceptionKind::FetcherInUse);

    fetcher.reset();
    assert_eq!(fetcher.state(), FetchState::Unopened);
    assert_eq!(fetcher.fetch().await.unwrap(), FetchResult::Fetched);
}

#[tokio::test]
async fn test_unreachable_host_is_retryable_network() {
    let unit = unit_with_config(
        AuConfig::new("journal", "http://127.0.0.1:9/"),
        RedirectScheme::FOLLOW_IN_SPEC,
        fast_policy(1),
    );
    let mut fetcher = fetcher(&unit, "http://127.0.0.1:9/a");

    let e = fetcher.fetch().await.unwrap_err();
    assert_eq!(e.kind(), CacheExceptionKind::RetryableNetwork);
    assert!(e.is_retryable());
}
