use crate::AppState;
use crate::http::{RequestDescriptor, RequestMode, ResponseDescriptor};
use crate::lifecycle::WorkerState;
use axum::{
    Json, Router,
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};
use url::Url;

/// Read-only introspection endpoint; everything else is intercepted
pub const STATUS_PATH: &str = "/__shellcache/status";

const MAX_REQUEST_BODY: usize = 16 * 1024 * 1024; // 16MB

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const CONDITIONAL: &[&str] = &[
    "if-none-match",
    "if-modified-since",
    "if-match",
    "if-unmodified-since",
    "if-range",
];

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route(STATUS_PATH, get(handle_status))
        .fallback(handle_intercept)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_intercept(State(state): State<AppState>, request: Request) -> Response {
    let descriptor = match to_descriptor(&state.upstream, request).await {
        Ok(descriptor) => descriptor,
        Err(rejection) => return rejection,
    };
    debug!(
        "Intercepted {} {} ({:?})",
        descriptor.method, descriptor.url, descriptor.mode
    );

    let url = descriptor.url.clone();
    let method = descriptor.method.clone();
    match state.host.dispatch_fetch(descriptor).await {
        Ok(response) => into_response(&method, response),
        Err(e) => {
            warn!("No response for {}: {}", url, e);
            (StatusCode::BAD_GATEWAY, format!("Failed to fetch {}: {}", url, e)).into_response()
        }
    }
}

#[derive(Debug, Serialize)]
struct PartitionStatus {
    name: String,
    entries: usize,
    current: bool,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    state: WorkerState,
    cache_version: String,
    partitions: Vec<PartitionStatus>,
}

async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    let worker = state.host.worker();
    let current = worker.config().cache_version().as_str();
    let store = worker.store();

    let names = match store.partitions().await {
        Ok(names) => names,
        Err(e) => {
            error!("Failed to list partitions: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read response store")
                .into_response();
        }
    };

    let mut partitions = Vec::with_capacity(names.len());
    for name in names {
        let entries = match store.keys(&name).await {
            Ok(keys) => keys.len(),
            Err(e) => {
                warn!("Failed to count entries in {}: {}", name, e);
                0
            }
        };
        partitions.push(PartitionStatus {
            current: name == current,
            name,
            entries,
        });
    }

    Json(StatusReport {
        state: state.host.state(),
        cache_version: current.to_string(),
        partitions,
    })
    .into_response()
}

/// Turn an inbound request into the descriptor the worker sees
pub(crate) async fn to_descriptor(
    upstream: &Url,
    request: Request,
) -> Result<RequestDescriptor, Response> {
    let (parts, body) = request.into_parts();

    let url = target_url(upstream, &parts.uri).map_err(|e| {
        (StatusCode::BAD_REQUEST, format!("Invalid request target: {}", e)).into_response()
    })?;
    let mode = classify(&parts.method, &parts.headers);

    let body = axum::body::to_bytes(body, MAX_REQUEST_BODY)
        .await
        .map_err(|e| {
            (StatusCode::PAYLOAD_TOO_LARGE, format!("Failed to read body: {}", e)).into_response()
        })?;

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    // The worker answers plain requests; a 304 would have no body to serve
    for name in CONDITIONAL {
        headers.remove(*name);
    }

    Ok(RequestDescriptor {
        method: parts.method,
        url,
        headers,
        body,
        mode,
    })
}

/// Origin-form targets are mapped onto the upstream; absolute-form targets are kept
pub(crate) fn target_url(upstream: &Url, uri: &Uri) -> Result<Url, url::ParseError> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Url::parse(&uri.to_string());
    }
    // Set the path rather than joining it, so `//host/x` stays on the upstream
    let mut url = upstream.clone();
    url.set_path(uri.path());
    url.set_query(uri.query());
    Ok(url)
}

/// Decide whether a request is a top-level document load
pub(crate) fn classify(method: &Method, headers: &HeaderMap) -> RequestMode {
    let value = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if let Some(mode) = value("sec-fetch-mode") {
        return if mode.eq_ignore_ascii_case("navigate") {
            RequestMode::Navigate
        } else {
            RequestMode::Subresource
        };
    }

    // No fetch metadata: fall back to what the request asks for
    let wants_html = headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("text/html"));
    let is_document = value("sec-fetch-dest").is_none_or(|dest| dest == "document");

    if method == Method::GET && wants_html && is_document {
        RequestMode::Navigate
    } else {
        RequestMode::Subresource
    }
}

/// Remove the fixed hop-by-hop set and any header the `connection` header lists
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

fn into_response(method: &Method, response: ResponseDescriptor) -> Response {
    let mut headers = response.headers;
    strip_hop_by_hop(&mut headers);
    // A HEAD body is empty, so only the upstream knows the real length
    if method != Method::HEAD {
        headers.remove(header::CONTENT_LENGTH);
    }

    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = response.status;
    *out.headers_mut() = headers;
    out
}
