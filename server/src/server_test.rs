#[cfg(test)]
mod tests {
    use crate::config::{AssetManifest, CacheVersion, WorkerConfig};
    use crate::http::{RequestMode, ResponseDescriptor, ResponseType};
    use crate::lifecycle::WorkerHost;
    use crate::response_cache::memory::MemoryResponseStore;
    use crate::response_cache::{RequestKey, ResponseStore};
    use crate::server::{STATUS_PATH, classify, create_app, target_url};
    use crate::testing::MockNetwork;
    use crate::worker::OfflineCacheWorker;
    use crate::{AppState, ProxyState};
    use axum::body::Body;
    use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, Uri, header};
    use std::sync::Arc;
    use tower::ServiceExt;
    use url::Url;

    const UPSTREAM: &str = "http://upstream.test";

    fn upstream(path: &str) -> String {
        Url::parse(UPSTREAM).unwrap().join(path).unwrap().to_string()
    }

    /// An upstream serving the shell and one script, with the proxy already active
    async fn create_test_state() -> (AppState, MemoryResponseStore, Arc<MockNetwork>) {
        let store = MemoryResponseStore::new();
        store.open("old-version").await.unwrap();

        let network = Arc::new(MockNetwork::new());
        network.respond(
            &upstream("/index.html"),
            ResponseDescriptor::new(StatusCode::OK, "<html>shell</html>").with_header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/html"),
            ),
        );
        network.respond(&upstream("/main.js"), ResponseDescriptor::new(StatusCode::OK, "main()"));

        let config = WorkerConfig::new(Url::parse(UPSTREAM).unwrap())
            .with_cache_version(CacheVersion::new("app-cache-v1").unwrap())
            .with_manifest(AssetManifest::new(["index.html", "main.js"]));
        let worker = OfflineCacheWorker::new(
            Arc::new(config),
            Arc::new(store.clone()),
            network.clone(),
        );
        let host = WorkerHost::new(Arc::new(worker));
        host.start().await.unwrap();

        let state = Arc::new(ProxyState::new(host, Url::parse(UPSTREAM).unwrap()));
        (state, store, network)
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_offline_navigation_serves_shell() {
        let (state, _store, network) = create_test_state().await;
        network.go_offline();

        let request = Request::builder()
            .uri("/settings/radio")
            .header("sec-fetch-mode", "navigate")
            .body(Body::empty())
            .unwrap();
        let response = create_app(state).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "text/html");
        assert_eq!(body_text(response).await, "<html>shell</html>");
    }

    #[tokio::test]
    async fn test_precached_script_served_without_network() {
        let (state, _store, network) = create_test_state().await;
        let calls_after_install = network.calls().len();

        let request = Request::builder()
            .uri("/main.js")
            .header(header::ACCEPT, "*/*")
            .body(Body::empty())
            .unwrap();
        let response = create_app(state).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "main()");
        assert_eq!(network.calls().len(), calls_after_install);
    }

    #[tokio::test]
    async fn test_unreachable_asset_is_bad_gateway() {
        let (state, _store, _network) = create_test_state().await;

        let request = Request::builder()
            .uri("/missing.png")
            .header(header::ACCEPT, "image/*")
            .body(Body::empty())
            .unwrap();
        let response = create_app(state).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_cross_origin_response_passes_through_uncached() {
        let (state, store, network) = create_test_state().await;
        network.respond(
            "https://cdn.example/lib.js",
            ResponseDescriptor::new(StatusCode::OK, "lib()").with_type(ResponseType::Opaque),
        );

        let request = Request::builder()
            .uri("https://cdn.example/lib.js")
            .body(Body::empty())
            .unwrap();
        let response = create_app(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(body_text(response).await, "lib()");

        state.host.drain().await;
        let key = RequestKey::get(&Url::parse("https://cdn.example/lib.js").unwrap());
        assert!(store.lookup("app-cache-v1", &key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hop_by_hop_headers_are_not_forwarded() {
        let (state, _store, network) = create_test_state().await;
        network.respond(
            &upstream("/api/ping"),
            ResponseDescriptor::new(StatusCode::OK, "pong")
                .with_header(header::CONNECTION, HeaderValue::from_static("close"))
                .with_header(header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        );

        let request = Request::builder()
            .uri("/api/ping")
            .body(Body::empty())
            .unwrap();
        let response = create_app(state).oneshot(request).await.unwrap();

        assert!(response.headers().get(header::CONNECTION).is_none());
        assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-store");
    }

    #[tokio::test]
    async fn test_status_reports_current_partition() {
        let (state, _store, _network) = create_test_state().await;

        let request = Request::builder()
            .uri(STATUS_PATH)
            .body(Body::empty())
            .unwrap();
        let response = create_app(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let report: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(report["state"], "active");
        assert_eq!(report["cache_version"], "app-cache-v1");

        // The stale partition is gone after activation
        let partitions = report["partitions"].as_array().unwrap();
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0]["name"], "app-cache-v1");
        assert_eq!(partitions[0]["entries"], 2);
        assert_eq!(partitions[0]["current"], true);
    }

    #[test]
    fn test_classify_uses_fetch_metadata() {
        let mut headers = HeaderMap::new();
        headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
        assert_eq!(classify(&Method::GET, &headers), RequestMode::Navigate);

        headers.insert("sec-fetch-mode", HeaderValue::from_static("no-cors"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/html"));
        assert_eq!(classify(&Method::GET, &headers), RequestMode::Subresource);
    }

    #[test]
    fn test_classify_without_fetch_metadata() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/html,*/*;q=0.8"));
        assert_eq!(classify(&Method::GET, &headers), RequestMode::Navigate);
        assert_eq!(classify(&Method::POST, &headers), RequestMode::Subresource);

        headers.insert("sec-fetch-dest", HeaderValue::from_static("iframe"));
        assert_eq!(classify(&Method::GET, &headers), RequestMode::Subresource);

        let plain = HeaderMap::new();
        assert_eq!(classify(&Method::GET, &plain), RequestMode::Subresource);
    }

    #[test]
    fn test_target_url() {
        let upstream = Url::parse(UPSTREAM).unwrap();

        let origin_form: Uri = "/app/index.html?v=2".parse().unwrap();
        assert_eq!(
            target_url(&upstream, &origin_form).unwrap().as_str(),
            "http://upstream.test/app/index.html?v=2"
        );

        let absolute_form: Uri = "https://cdn.example/lib.js".parse().unwrap();
        assert_eq!(
            target_url(&upstream, &absolute_form).unwrap().as_str(),
            "https://cdn.example/lib.js"
        );

        // A doubled slash is a path on the upstream, not another host
        let doubled: Uri = "//evil.example/steal?x=1".parse().unwrap();
        let mapped = target_url(&upstream, &doubled).unwrap();
        assert_eq!(mapped.host_str(), Some("upstream.test"));
        assert_eq!(mapped.path(), "//evil.example/steal");
        assert_eq!(mapped.query(), Some("x=1"));
    }

    #[tokio::test]
    async fn test_doubled_slash_path_stays_on_upstream() {
        let (state, _store, network) = create_test_state().await;
        network.respond(
            "http://upstream.test//evil.example/steal",
            ResponseDescriptor::new(StatusCode::OK, "local"),
        );
        network.respond(
            "http://evil.example/steal",
            ResponseDescriptor::new(StatusCode::OK, "stolen"),
        );

        let request = Request::builder()
            .uri("//evil.example/steal")
            .body(Body::empty())
            .unwrap();
        let response = create_app(state).oneshot(request).await.unwrap();

        assert_eq!(body_text(response).await, "local");
        assert_eq!(network.calls_to("http://evil.example/steal"), 0);
    }

    #[tokio::test]
    async fn test_conditional_headers_are_not_forwarded() {
        let (state, _store, network) = create_test_state().await;
        network.respond(
            &upstream("/about"),
            ResponseDescriptor::new(StatusCode::OK, "<html>about</html>"),
        );

        let request = Request::builder()
            .uri("/about")
            .header("sec-fetch-mode", "navigate")
            .header(header::IF_NONE_MATCH, "\"abc\"")
            .header(header::IF_MODIFIED_SINCE, "Wed, 21 Oct 2015 07:28:00 GMT")
            .body(Body::empty())
            .unwrap();
        let response = create_app(state).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "<html>about</html>");

        let forwarded = network.requests_to(&upstream("/about"));
        assert_eq!(forwarded.len(), 1);
        assert!(forwarded[0].headers.get(header::IF_NONE_MATCH).is_none());
        assert!(forwarded[0].headers.get(header::IF_MODIFIED_SINCE).is_none());
    }

    #[tokio::test]
    async fn test_head_keeps_upstream_content_length() {
        let (state, _store, network) = create_test_state().await;
        network.respond(
            &upstream("/video.mp4"),
            ResponseDescriptor::new(StatusCode::OK, "")
                .with_header(header::CONTENT_LENGTH, HeaderValue::from_static("1048576")),
        );

        let request = Request::builder()
            .method(Method::HEAD)
            .uri("/video.mp4")
            .body(Body::empty())
            .unwrap();
        let response = create_app(state).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::CONTENT_LENGTH).unwrap(), "1048576");
    }

    #[tokio::test]
    async fn test_connection_listed_headers_are_dropped() {
        let (state, _store, network) = create_test_state().await;
        network.respond(
            &upstream("/api/ping"),
            ResponseDescriptor::new(StatusCode::OK, "pong")
                .with_header(header::CONNECTION, HeaderValue::from_static("close, X-Upstream-Trace"))
                .with_header(
                    HeaderName::from_static("x-upstream-trace"),
                    HeaderValue::from_static("abc123"),
                )
                .with_header(header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        );

        let request = Request::builder()
            .uri("/api/ping")
            .header(header::CONNECTION, "x-client-hop")
            .header("x-client-hop", "1")
            .header("x-request-id", "42")
            .body(Body::empty())
            .unwrap();
        let response = create_app(state).oneshot(request).await.unwrap();

        assert!(response.headers().get("x-upstream-trace").is_none());
        assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-store");

        let forwarded = network.requests_to(&upstream("/api/ping"));
        assert!(forwarded[0].headers.get("x-client-hop").is_none());
        assert_eq!(forwarded[0].headers.get("x-request-id").unwrap(), "42");
    }
}
