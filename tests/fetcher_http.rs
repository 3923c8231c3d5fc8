//! Fetcher behavior against a local HTTP fixture.
//!
//! Covers the retry policy (what retries, what fails fast), validation
//! (content type, decodability, body size), and the deadline.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use artmatch::fetcher::ImageFetcher;
use artmatch::{Config, FetchErrorKind};
use common::{solid_png, FixtureServer, Route};

fn fast_fetcher(config: &Config) -> ImageFetcher {
    ImageFetcher::new(config).backoff_base(Duration::from_millis(1))
}

#[test]
fn fetch_decodes_valid_png() {
    let server = FixtureServer::start(HashMap::from([(
        "/art.png".to_string(),
        Route::Png(solid_png(10, 20, 30)),
    )]));

    let fetcher = fast_fetcher(&Config::default());
    let image = fetcher.fetch(&server.url("/art.png")).unwrap();

    assert_eq!(image.dimensions(), (8, 8));
    assert_eq!(image.get_pixel(0, 0).0, [10, 20, 30]);
    assert_eq!(server.request_count("/art.png"), 1);
}

#[test]
fn not_found_fails_without_retry() {
    let server = FixtureServer::start(HashMap::from([(
        "/gone.png".to_string(),
        Route::Status(404),
    )]));

    let fetcher = fast_fetcher(&Config::default());
    let err = fetcher.fetch(&server.url("/gone.png")).unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::Http(404));
    assert_eq!(server.request_count("/gone.png"), 1, "4xx must not retry");
}

#[test]
fn server_errors_retry_three_times() {
    let server = FixtureServer::start(HashMap::from([(
        "/flaky.png".to_string(),
        Route::Status(503),
    )]));

    let fetcher = fast_fetcher(&Config::default());
    let err = fetcher.fetch(&server.url("/flaky.png")).unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::Http(503));
    assert_eq!(server.request_count("/flaky.png"), 3);
}

#[test]
fn throttling_status_is_retried() {
    let server = FixtureServer::start(HashMap::from([(
        "/busy.png".to_string(),
        Route::Status(429),
    )]));

    let fetcher = fast_fetcher(&Config::default());
    let err = fetcher.fetch(&server.url("/busy.png")).unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::Http(429));
    assert_eq!(server.request_count("/busy.png"), 3);
}

#[test]
fn non_image_content_type_rejected() {
    let server = FixtureServer::start(HashMap::from([(
        "/page".to_string(),
        Route::Html(b"<html>not art</html>".to_vec()),
    )]));

    let fetcher = fast_fetcher(&Config::default());
    let err = fetcher.fetch(&server.url("/page")).unwrap_err();

    assert!(matches!(err.kind, FetchErrorKind::UnsupportedContentType(_)));
    assert_eq!(server.request_count("/page"), 1);
}

#[test]
fn undecodable_body_is_invalid_image() {
    let server = FixtureServer::start(HashMap::from([(
        "/broken.png".to_string(),
        Route::GarbagePng,
    )]));

    let fetcher = fast_fetcher(&Config::default());
    let err = fetcher.fetch(&server.url("/broken.png")).unwrap_err();

    assert!(matches!(err.kind, FetchErrorKind::InvalidImage(_)));
    assert_eq!(server.request_count("/broken.png"), 1);
}

#[test]
fn oversized_body_rejected() {
    let server = FixtureServer::start(HashMap::from([(
        "/huge.png".to_string(),
        Route::Png(solid_png(1, 2, 3)),
    )]));

    let config = Config {
        max_image_bytes: 16, // far below any real PNG
        ..Default::default()
    };
    let fetcher = fast_fetcher(&config);
    let err = fetcher.fetch(&server.url("/huge.png")).unwrap_err();

    assert!(matches!(err.kind, FetchErrorKind::TooLarge(_)));
    assert_eq!(server.request_count("/huge.png"), 1);
}

#[test]
fn slow_server_hits_deadline() {
    let server = FixtureServer::start(HashMap::from([(
        "/slow.png".to_string(),
        Route::SlowPng(solid_png(1, 2, 3), Duration::from_millis(2500)),
    )]));

    let config = Config {
        image_download_timeout: Duration::from_secs(1),
        ..Default::default()
    };
    let fetcher = fast_fetcher(&config);
    let err = fetcher.fetch(&server.url("/slow.png")).unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::Timeout);
    assert!(err.elapsed >= Duration::from_secs(1));
}

#[test]
fn error_carries_url_and_elapsed() {
    let server = FixtureServer::start(HashMap::from([(
        "/gone.png".to_string(),
        Route::Status(404),
    )]));

    let url = server.url("/gone.png");
    let fetcher = fast_fetcher(&Config::default());
    let err = fetcher.fetch(&url).unwrap_err();

    assert_eq!(err.url, url);
    assert!(err.elapsed > Duration::ZERO);
}
