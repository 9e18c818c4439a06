//! Web auth flow for a desktop browser: the authorization URL is opened in
//! the system browser and the provider redirects back to this server, whose
//! callback page posts the full redirect (fragment included) to
//! `/oauth/redirect`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use url::Url;
use yt_manager_core::auth::{AuthFlowError, WebAuthFlow};

pub const CALLBACK_PATH: &str = "/oauth/callback";
pub const REDIRECT_PATH: &str = "/oauth/redirect";

type Pending = oneshot::Sender<Result<Url, AuthFlowError>>;

pub struct LoopbackAuthFlow {
    redirect: Url,
    pending: Mutex<Option<(u64, Pending)>>,
    launches: AtomicU64,
    opener: fn(&str) -> io::Result<()>,
}

impl LoopbackAuthFlow {
    pub fn new(addr: SocketAddr) -> Result<Self, AuthFlowError> {
        let redirect = Url::parse(&format!("http://{addr}{CALLBACK_PATH}"))
            .map_err(|e| AuthFlowError::InvalidUrl(e.to_string()))?;
        Ok(Self {
            redirect,
            pending: Mutex::new(None),
            launches: AtomicU64::new(0),
            opener: |url| open::that(url),
        })
    }

    /// Replace the browser launcher.
    pub fn with_opener(mut self, opener: fn(&str) -> io::Result<()>) -> Self {
        self.opener = opener;
        self
    }

    /// Hand the redirect the browser landed on to the waiting flow.
    /// Returns false when no flow is waiting.
    pub fn complete(&self, redirect: Url) -> bool {
        match self.pending.lock().take() {
            Some((_, tx)) => tx.send(Ok(redirect)).is_ok(),
            None => {
                debug!("redirect received with no flow in progress");
                false
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}

#[async_trait]
impl WebAuthFlow for LoopbackAuthFlow {
    fn redirect_url(&self) -> Url {
        self.redirect.clone()
    }

    async fn launch(&self, url: Url, interactive: bool) -> Result<Url, AuthFlowError> {
        // A browser round trip is always visible to the user.
        if !interactive {
            return Err(AuthFlowError::InteractionRequired);
        }
        let (tx, rx) = oneshot::channel();
        let launch = self.launches.fetch_add(1, Ordering::Relaxed);
        if let Some((_, previous)) = self.pending.lock().replace((launch, tx)) {
            let _ = previous.send(Err(AuthFlowError::Cancelled));
        }
        info!("opening browser for authorization");
        if let Err(e) = (self.opener)(url.as_str()) {
            warn!(error = %e, "could not open browser");
            let mut pending = self.pending.lock();
            if matches!(*pending, Some((id, _)) if id == launch) {
                pending.take();
            }
            return Err(AuthFlowError::Platform(e.to_string()));
        }
        rx.await.unwrap_or(Err(AuthFlowError::Cancelled))
    }
}
