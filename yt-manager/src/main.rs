//! Local server backing the YouTube manager UI.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use yt_manager::{auth_flow::LoopbackAuthFlow, router, AppState};
use yt_manager_core::{auth::AuthConfig, config::Config, facade::Facade};

#[derive(Parser)]
#[command(name = "yt-manager")]
#[command(about = "Video and playlist store with search and YouTube authorization")]
struct Cli {
    /// Directory holding the documents
    #[arg(long, env = "YTM_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Directory of the search index; kept in memory when omitted
    #[arg(long, env = "YTM_INDEX_DIR")]
    index_dir: Option<PathBuf>,

    /// Listen address
    #[arg(short, long, env = "YTM_LISTEN", default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// OAuth client id
    #[arg(long, env = "YTM_CLIENT_ID", default_value = yt_manager_core::auth::DEFAULT_CLIENT_ID)]
    client_id: String,

    /// OAuth scope requested
    #[arg(long, env = "YTM_SCOPE", default_value = yt_manager_core::auth::DEFAULT_SCOPE)]
    scope: String,

    /// Maximum number of search hits
    #[arg(long, env = "YTM_SEARCH_LIMIT", default_value_t = yt_manager_core::config::DEFAULT_SEARCH_LIMIT)]
    search_limit: usize,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            data_dir: self.data_dir.clone(),
            index_dir: self.index_dir.clone(),
            search_limit: self.search_limit,
            auth: AuthConfig {
                client_id: self.client_id.clone(),
                scope: self.scope.clone(),
                ..AuthConfig::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    // The redirect URI depends on the bound port.
    let listener = TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("binding {}", cli.listen))?;
    let addr = listener.local_addr()?;
    let auth_flow = Arc::new(LoopbackAuthFlow::new(addr)?);

    let facade = Facade::open(cli.config())?;
    let app = router(AppState::new(facade, auth_flow));

    info!(%addr, "listening");
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
