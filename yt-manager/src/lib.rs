pub mod auth_flow;
pub mod port;

use axum::{
    http::StatusCode,
    response::Html,
    routing::{get, post},
    extract::State,
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;
use url::Url;
use yt_manager_core::facade::Facade;

use auth_flow::{LoopbackAuthFlow, CALLBACK_PATH, REDIRECT_PATH};

#[derive(Clone)]
pub struct AppState {
    pub facade: Facade,
    pub auth_flow: Arc<LoopbackAuthFlow>,
}

impl AppState {
    /// Wire the loopback flow into the facade's `authorize` command.
    pub fn new(facade: Facade, auth_flow: Arc<LoopbackAuthFlow>) -> Self {
        Self {
            facade: facade.with_auth_flow(auth_flow.clone()),
            auth_flow,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/port", get(port::port_ws))
        .route("/health", get(|| async { "OK" }))
        .route(CALLBACK_PATH, get(oauth_callback))
        .route(REDIRECT_PATH, post(oauth_redirect))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// The token arrives in the fragment, which browsers never send to a server,
// so the page posts its own address back.
const CALLBACK_PAGE: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Authorization</title></head>
<body>
<p id="status">Completing authorization...</p>
<script>
fetch("/oauth/redirect", { method: "POST", body: window.location.href })
  .then(function (r) {
    document.getElementById("status").textContent = r.ok
      ? "Authorization complete. You can close this window."
      : "No authorization was in progress.";
  });
</script>
</body>
</html>
"#;

async fn oauth_callback() -> Html<&'static str> {
    Html(CALLBACK_PAGE)
}

async fn oauth_redirect(State(state): State<AppState>, body: String) -> StatusCode {
    let redirect = match Url::parse(body.trim()) {
        Ok(url) => url,
        Err(e) => {
            warn!(error = %e, "malformed redirect posted");
            return StatusCode::BAD_REQUEST;
        }
    };
    if state.auth_flow.complete(redirect) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::CONFLICT
    }
}
