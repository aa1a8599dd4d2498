// Browser origin policy for the HTTP/WS surface.
//
// The map client is served from a different origin than this service,
// so credentialed cross-origin requests need an explicit allow list.
// `WAYPOINT_SERVER_CORS_ORIGINS` holds that list (comma-separated, or
// `*` to allow anything); unset falls back to the localhost origins
// used in development.

use std::time::Duration;

use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

const ORIGINS_ENV: &str = "WAYPOINT_SERVER_CORS_ORIGINS";

/// Origins admitted when the env var is unset.
const DEV_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://127.0.0.1:3000"];

pub fn cors_layer() -> CorsLayer {
    build_layer(std::env::var(ORIGINS_ENV).ok().as_deref())
}

fn build_layer(raw: Option<&str>) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            CONTENT_TYPE,
            ACCEPT,
            AUTHORIZATION,
            HeaderName::from_static("x-requested-with"),
            HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([HeaderName::from_static("x-request-id")])
        .max_age(Duration::from_secs(3600));

    match raw {
        // Wildcard responses are not allowed to carry credentials.
        Some("*") => layer.allow_origin(AllowOrigin::any()),
        Some(list) => layer.allow_origin(parse_list(list)).allow_credentials(true),
        None => layer.allow_origin(parse_list(&DEV_ORIGINS.join(","))).allow_credentials(true),
    }
}

fn parse_list(raw: &str) -> Vec<HeaderValue> {
    let mut origins = Vec::new();
    for piece in raw.split(',') {
        let origin = piece.trim();
        if origin.is_empty() {
            continue;
        }
        if let Ok(value) = HeaderValue::from_str(origin) {
            origins.push(value);
        }
    }
    origins
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, routing::get, Router};
    use tower::ServiceExt;

    fn app(origins: Option<&str>) -> Router {
        Router::new().route("/probe", get(|| async { "ok" })).layer(build_layer(origins))
    }

    async fn preflight(app: Router, origin: &str) -> axum::http::Response<Body> {
        app.oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/probe")
                .header("origin", origin)
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .expect("preflight request should build"),
        )
        .await
        .expect("preflight should produce a response")
    }

    #[test]
    fn list_parsing_skips_blank_entries() {
        let origins = parse_list(" https://map.example.lt ,, https://staging.example.lt ,");
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[0], "https://map.example.lt");
    }

    #[tokio::test]
    async fn dev_defaults_admit_localhost_with_credentials() {
        let response = preflight(app(None), "http://localhost:3000").await;
        assert_eq!(
            response.headers().get("access-control-allow-origin").expect("origin header"),
            "http://localhost:3000"
        );
        assert_eq!(
            response.headers().get("access-control-allow-credentials").expect("credentials"),
            "true"
        );
    }

    #[tokio::test]
    async fn unlisted_origin_gets_no_cors_headers() {
        let response = preflight(app(None), "https://elsewhere.example.com").await;
        assert!(response.headers().get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn configured_list_replaces_the_defaults() {
        let response =
            preflight(app(Some("https://map.example.lt")), "http://localhost:3000").await;
        assert!(response.headers().get("access-control-allow-origin").is_none());

        let response = preflight(app(Some("https://map.example.lt")), "https://map.example.lt").await;
        assert_eq!(
            response.headers().get("access-control-allow-origin").expect("origin header"),
            "https://map.example.lt"
        );
    }

    #[tokio::test]
    async fn wildcard_drops_credentials() {
        let response = preflight(app(Some("*")), "https://anywhere.example.com").await;
        assert_eq!(
            response.headers().get("access-control-allow-origin").expect("origin header"),
            "*"
        );
        assert!(response.headers().get("access-control-allow-credentials").is_none());
    }
}
