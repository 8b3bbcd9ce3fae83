use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use super::https::redirect_to_https;
use super::state::AppState;
use crate::registry::RenderNodeEntry;

/// Error text returned by the allocation query when nothing is free
pub const NO_SERVERS_AVAILABLE: &str = "No signalling servers available";

/// Seconds the retry page counts down before reloading
pub const RETRY_COUNTDOWN_SECS: u32 = 10;

/// Body of `GET /signallingserver`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignallingServerResponse {
    /// `address:port` of the allocated node, empty when none was free
    #[serde(rename = "signallingServer")]
    pub signalling_server: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SignallingServerResponse {
    pub fn allocated(node: &RenderNodeEntry) -> Self {
        Self {
            signalling_server: node.endpoint(),
            error: None,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            signalling_server: String::new(),
            error: Some(NO_SERVERS_AVAILABLE.to_string()),
        }
    }
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

/// Registry status endpoint
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.registry.read().await;
    let now = Utc::now();

    Json(RegistryStatus {
        nodes: registry.len(),
        ready_nodes: registry.values().filter(|e| e.ready).count(),
        available_nodes: state.selector.count_available(&registry, now),
    })
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStatus {
    pub nodes: usize,
    pub ready_nodes: usize,
    pub available_nodes: usize,
}

/// Allocation query: JSON with the chosen node, or an error payload
pub async fn signalling_server(State(state): State<AppState>) -> Json<SignallingServerResponse> {
    match state.allocate().await {
        Some(node) => {
            info!("Returning {}", node.endpoint());
            Json(SignallingServerResponse::allocated(&node))
        }
        None => Json(SignallingServerResponse::unavailable()),
    }
}

/// Redirect the browser to an idle render node
pub async fn redirect_root(State(state): State<AppState>) -> Response {
    redirect_or_retry(&state, None).await
}

/// Redirect to a custom page hosted by an idle render node
///
/// Filenames that cannot be written back into a URL path verbatim are
/// refused before any node is allocated.
pub async fn redirect_custom_html(
    State(state): State<AppState>,
    Path(html_filename): Path<String>,
) -> Response {
    if !is_valid_html_filename(&html_filename) {
        warn!("Rejected custom_html filename {:?}", html_filename);
        return (StatusCode::BAD_REQUEST, "Invalid file name").into_response();
    }
    let subpath = format!("custom_html/{}", html_filename);
    redirect_or_retry(&state, Some(&subpath)).await
}

async fn redirect_or_retry(state: &AppState, subpath: Option<&str>) -> Response {
    match state.allocate().await {
        Some(node) => {
            info!("Redirect to {}", node.endpoint());
            let location = redirect_location(&node, subpath);
            (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
        }
        None => retry_page(state.node_count().await).into_response(),
    }
}

/// ASCII letters, digits, `-`, `_` and `.`; no `..`
pub fn is_valid_html_filename(name: &str) -> bool {
    !name.is_empty()
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// `http://address:port/` plus an optional sub-path
pub fn redirect_location(node: &RenderNodeEntry, subpath: Option<&str>) -> String {
    format!("http://{}/{}", node.endpoint(), subpath.unwrap_or(""))
}

/// Page shown when every node is taken; counts down, then reloads.
pub fn retry_page(node_count: usize) -> Html<String> {
    Html(format!(
        r#"All {node_count} render nodes are in use. Retrying in <span id="countdown">{RETRY_COUNTDOWN_SECS}</span> seconds.
<script>
    var countdown = document.getElementById("countdown").textContent;
    setInterval(function() {{
        countdown--;
        if (countdown == 0) {{
            window.location.reload(1);
        }} else {{
            document.getElementById("countdown").textContent = countdown;
        }}
    }}, 1000);
</script>"#
    ))
}

/// Create the Axum router
pub fn create_router(state: AppState) -> Router {
    let config = state.config.clone();

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/status", get(status));

    if config.enable_rest_api {
        router = router.route(
            "/signallingserver",
            get(signalling_server).layer(CorsLayer::permissive()),
        );
    }

    if config.enable_redirection_links {
        router = router
            .route("/", get(redirect_root))
            .route("/custom_html/{html_filename}", get(redirect_custom_html));
    }

    let router = router
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.use_https {
        router.layer(middleware::from_fn_with_state(
            config.https_port,
            redirect_to_https,
        ))
    } else {
        router
    }
}
