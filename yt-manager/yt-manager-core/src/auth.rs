//! OAuth2 implicit-grant bridge: builds the authorization URL, hands it to a
//! platform web-auth-flow and describes the redirect it comes back with.

use async_trait::async_trait;
use oauth2::{basic::BasicClient, AuthUrl, ClientId, CsrfToken, RedirectUrl, ResponseType, Scope};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_CLIENT_ID: &str =
    "1022327474530-ij2unslv94d4hjcrdh4toijljd17kt4g.apps.googleusercontent.com";
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/youtube.readonly";
pub const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const STATE_PASSTHROUGH: &str = "state_parameter_passthrough";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthConfig {
    pub client_id: String,
    pub scope: String,
    pub auth_url: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthFlowError {
    #[error("authorization requires user interaction")]
    InteractionRequired,
    #[error("authorization flow was cancelled")]
    Cancelled,
    #[error("authorization was denied: {0}")]
    Denied(String),
    #[error("invalid authorization url: {0}")]
    InvalidUrl(String),
    #[error("authorization flow failed: {0}")]
    Platform(String),
}

/// Platform capability that runs an interactive (or silent) browser
/// authentication flow and returns the final redirect.
#[async_trait]
pub trait WebAuthFlow: Send + Sync {
    /// Redirect URI the identity provider must send the browser back to.
    fn redirect_url(&self) -> Url;

    async fn launch(&self, url: Url, interactive: bool) -> Result<Url, AuthFlowError>;
}

/// Parsed form of the redirect the flow returned, including the decoded
/// fragment parameters (`access_token`, `token_type`, `expires_in`, ...).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedirectDescriptor {
    pub href: String,
    pub protocol: String,
    pub host: String,
    pub hostname: String,
    pub port: String,
    pub pathname: String,
    pub search: String,
    pub hash: String,
    pub params: BTreeMap<String, String>,
}

impl RedirectDescriptor {
    pub fn from_url(url: &Url) -> Self {
        let hostname = url.host_str().unwrap_or_default().to_string();
        let port = url.port().map(|p| p.to_string()).unwrap_or_default();
        let host = if port.is_empty() {
            hostname.clone()
        } else {
            format!("{hostname}:{port}")
        };
        let params = url
            .fragment()
            .map(|fragment| {
                url::form_urlencoded::parse(fragment.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();
        Self {
            href: url.to_string(),
            protocol: format!("{}:", url.scheme()),
            host,
            hostname,
            port,
            pathname: url.path().to_string(),
            search: url.query().map(|q| format!("?{q}")).unwrap_or_default(),
            hash: url.fragment().map(|f| format!("#{f}")).unwrap_or_default(),
            params,
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        self.params.get("access_token").map(String::as_str)
    }
}

pub struct Authorizer {
    config: AuthConfig,
    flow: Arc<dyn WebAuthFlow>,
}

impl Authorizer {
    pub fn new(config: AuthConfig, flow: Arc<dyn WebAuthFlow>) -> Self {
        Self { config, flow }
    }

    /// Implicit-grant authorization URL for the configured client.
    pub fn authorization_url(&self) -> Result<Url, AuthFlowError> {
        let auth_url = AuthUrl::new(self.config.auth_url.clone())
            .map_err(|e| AuthFlowError::InvalidUrl(e.to_string()))?;
        let client = BasicClient::new(ClientId::new(self.config.client_id.clone()), None, auth_url, None)
            .set_redirect_uri(RedirectUrl::from_url(self.flow.redirect_url()));
        let (url, _state) = client
            .authorize_url(|| CsrfToken::new(STATE_PASSTHROUGH.to_string()))
            .set_response_type(&ResponseType::new("token".to_string()))
            .add_scope(Scope::new(self.config.scope.clone()))
            .add_extra_param("include_granted_scopes", "true")
            .url();
        Ok(url)
    }

    /// Run the flow once and describe the redirect it produced.
    pub async fn authorize(&self, interactive: bool) -> Result<RedirectDescriptor, AuthFlowError> {
        let url = self.authorization_url()?;
        debug!(interactive, "launching web auth flow");
        let redirect = self.flow.launch(url, interactive).await.map_err(|e| {
            warn!(error = %e, "web auth flow failed");
            e
        })?;
        let descriptor = RedirectDescriptor::from_url(&redirect);
        let error = descriptor.params.get("error").cloned().or_else(|| {
            redirect
                .query_pairs()
                .find(|(k, _)| k == "error")
                .map(|(_, v)| v.into_owned())
        });
        if let Some(error) = error {
            warn!(%error, "identity provider refused authorization");
            return Err(AuthFlowError::Denied(error));
        }
        Ok(descriptor)
    }
}
