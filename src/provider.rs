//! Helpers for implementing provider plugins.
//!
//! A provider implements [`CsiDriverProvider`] and serves it with [`serve`]
//! on `<socket_dir>/<name>.sock`, where the driver's
//! [`PluginClientBuilder`](crate::client::PluginClientBuilder) will find it.

use std::future::Future;
use std::io;
use std::path::{Component, Path, PathBuf};

use tokio::net::UnixListener;
use tonic::transport::Server;
use tracing::{debug, info};

use crate::error::Result;
use crate::v1alpha1::csi_driver_provider_server::{CsiDriverProvider, CsiDriverProviderServer};

/// Socket a provider named `provider` listens on inside `dir`.
pub fn socket_path(dir: &Path, provider: &str) -> PathBuf {
    dir.join(format!("{provider}.sock"))
}

/// Append a single file name to `base`.
///
/// Used when building paths under a mount target so a name received from
/// elsewhere cannot escape it. Anything that is not exactly one normal path
/// component is rejected.
pub fn join_paths(base: &Path, filename: &str) -> io::Result<PathBuf> {
    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == filename => Ok(base.join(filename)),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid path: {filename:?}"),
        )),
    }
}

/// Serve `provider` on the unix socket at `path` until `shutdown` resolves.
///
/// A leftover socket file from a previous run is removed before binding.
pub async fn serve<P, F>(path: &Path, provider: P, shutdown: F) -> Result<()>
where
    P: CsiDriverProvider,
    F: Future<Output = ()> + Send,
{
    match std::fs::remove_file(path) {
        Ok(()) => debug!("removed stale provider socket {:?}", path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let listener = UnixListener::bind(path)?;
    info!("provider listening on {:?}", path);

    let incoming = async_stream::stream! {
        loop {
            yield listener.accept().await.map(|(stream, _)| stream);
        }
    };

    Server::builder()
        .add_service(CsiDriverProviderServer::new(provider))
        .serve_with_incoming_shutdown(incoming, shutdown)
        .await?;

    debug!("provider on {:?} shut down", path);
    Ok(())
}
