//! Control-plane listeners
//! The same router serves on a TCP socket and on a local unix socket.
//! Unix-socket serving follows the incoming-stream pattern so both
//! listeners share one hyper stack.

use axum::Router;
use hyper::server::accept;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::constants::control_plane::SOCKET_SEARCH_PATHS;

/// Serve the control plane on TCP until cancelled
pub async fn serve_tcp(
    router: Router,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> Result<(), hyper::Error> {
    info!(addr = %addr, "Control plane listening on TCP");
    axum::Server::bind(&addr)
        .serve(router.into_make_service())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

/// First socket path whose directory exists and is writable
pub fn pick_socket_path() -> Option<PathBuf> {
    for candidate in SOCKET_SEARCH_PATHS {
        let path = Path::new(candidate);
        if let Some(parent) = path.parent() {
            if parent.is_dir()
                && !parent
                    .metadata()
                    .map(|m| m.permissions().readonly())
                    .unwrap_or(true)
            {
                return Some(path.to_path_buf());
            }
        }
    }
    None
}

/// Serve the control plane on a unix socket until cancelled. A stale
/// socket file from a previous run is replaced.
pub async fn serve_unix(
    router: Router,
    socket_path: &Path,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if socket_path.exists() {
        info!(path = %socket_path.display(), "Removing stale socket file");
        std::fs::remove_file(socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    // Owner and group may drive the manager, nobody else
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(0o660);
        std::fs::set_permissions(socket_path, permissions)?;
    }

    info!(path = %socket_path.display(), "Control plane listening on unix socket");

    let incoming = accept::from_stream(UnixListenerStream::new(listener));
    let result = hyper::Server::builder(incoming)
        .serve(router.into_make_service())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await;

    if socket_path.exists() {
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(path = %socket_path.display(), error = %e, "Socket cleanup failed");
        }
    }
    result.map_err(Into::into)
}
