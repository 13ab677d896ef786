//! Mount transactions against a provider plugin
//!
//! One call to [`MountOrchestrator::mount_content`] is one mount generation:
//! send the request, check the response, write any payloads, then remove
//! artifacts of objects the provider no longer reports.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use prost::Message;
use tracing::{debug, info, warn};

use crate::client::MountClient;
use crate::error::{ProviderError, Result};
use crate::fileutil::{LocalFiles, PayloadError, PayloadWriter, StaleRemover};
use crate::v1alpha1::{MountRequest, ObjectVersion};

/// Object id -> version, as reported by a provider.
pub type ObjectVersions = HashMap<String, String>;

/// Responses above this size may not fit size-limited downstream syncs.
pub const LARGE_RESPONSE_BYTES: usize = 1024 * 1024;

/// Parameters of a single mount call
#[derive(Clone, Default)]
pub struct MountParams {
    /// Serialized volume attributes
    pub attributes: String,
    /// Serialized secrets; never logged
    pub secrets: String,
    /// Absolute path payloads are written under
    pub target_path: PathBuf,
    /// File mode as a decimal string
    pub permission: String,
    /// Upper bound for the RPC, including retries
    pub timeout: Option<Duration>,
}

impl std::fmt::Debug for MountParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountParams")
            .field("attributes", &self.attributes)
            .field("secrets", &"<redacted>")
            .field("target_path", &self.target_path)
            .field("permission", &self.permission)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Result of a successful mount
#[derive(Debug)]
pub struct MountOutcome {
    /// New authoritative versions, to be persisted by the caller
    pub object_versions: ObjectVersions,
    /// Number of payload files written
    pub files_written: usize,
    /// Objects from the previous generation that are no longer mounted
    pub stale_objects: Vec<String>,
    /// Failure while removing stale artifacts. The mount itself succeeded;
    /// files of retired objects may remain under the target.
    pub cleanup_error: Option<PayloadError>,
}

/// Runs mount transactions, applying results through the given collaborators.
pub struct MountOrchestrator {
    writer: Arc<dyn PayloadWriter>,
    remover: Arc<dyn StaleRemover>,
}

impl Default for MountOrchestrator {
    fn default() -> Self {
        Self::new(Arc::new(LocalFiles), Arc::new(LocalFiles))
    }
}

impl MountOrchestrator {
    pub fn new(writer: Arc<dyn PayloadWriter>, remover: Arc<dyn StaleRemover>) -> Self {
        Self { writer, remover }
    }

    /// Mount content from a provider into `params.target_path`.
    ///
    /// `previous` is the version map returned by the last mount of the same
    /// volume (empty on first mount). On success the new map is returned for
    /// the caller to persist. Failures are classified by [`ProviderError`]:
    /// a provider-reported error carries the provider's code, transport
    /// failures and protocol violations never write anything, and a file
    /// write failure means the RPC succeeded but its result was not applied.
    ///
    /// A response with no object versions is rejected, while an explicitly
    /// empty list is accepted and retires every previous object. Only
    /// in-process clients can make that distinction: protobuf does not encode
    /// an empty repeated field, so an empty list received over the wire
    /// arrives as absent and fails with
    /// [`ProviderError::MissingObjectVersions`].
    pub async fn mount_content<C>(
        &self,
        client: &C,
        params: &MountParams,
        previous: &ObjectVersions,
    ) -> Result<MountOutcome>
    where
        C: MountClient + ?Sized,
    {
        let request = MountRequest {
            attributes: params.attributes.clone(),
            secrets: params.secrets.clone(),
            target_path: params.target_path.to_string_lossy().into_owned(),
            permission: params.permission.clone(),
            current_object_version: to_wire(previous),
        };

        let call = client.mount(request);
        let response = match params.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(tonic::Status::deadline_exceeded(format!(
                    "mount did not complete within {:?}",
                    limit
                ))),
            },
            None => call.await,
        }?;

        if let Some(code) = response.error_code() {
            return Err(ProviderError::Provider(code.to_string()));
        }

        let Some(versions) = response.object_version.as_deref() else {
            return Err(ProviderError::MissingObjectVersions);
        };
        let object_versions = from_wire(versions);

        let size = response.encoded_len();
        if size > LARGE_RESPONSE_BYTES {
            warn!(size, "mount response above 1MiB, secret sync may fail");
        }

        let files = &response.files;
        if files.is_empty() {
            // Providers that predate file payloads write to the target
            // themselves and return only object versions.
            debug!("mount response has no files");
        } else {
            debug!("writing {} mount response file(s)", files.len());
            self.writer
                .validate(files)
                .map_err(ProviderError::FileWrite)?;
            self.writer
                .write(&params.target_path, files)
                .map_err(ProviderError::FileWrite)?;
        }

        // Object ids are not file paths, so this cannot tell an unchanged
        // file apart from an object that never had one; the remover gets
        // every retired id and decides what exists on disk.
        let stale = stale_objects(previous, &object_versions);
        let cleanup_error = match self.remover.remove(&params.target_path, &stale) {
            Ok(()) => None,
            Err(e) => {
                warn!(
                    "failed to clean up stale objects under {:?}: {}",
                    params.target_path, e
                );
                Some(e)
            }
        };

        info!(
            path = ?params.target_path,
            objects = object_versions.len(),
            files = files.len(),
            stale = stale.len(),
            "mounted provider content"
        );

        Ok(MountOutcome {
            object_versions,
            files_written: files.len(),
            stale_objects: stale,
            cleanup_error,
        })
    }
}

/// Ids present in `previous` but absent from `current`, sorted.
pub fn stale_objects(previous: &ObjectVersions, current: &ObjectVersions) -> Vec<String> {
    let mut stale: Vec<String> = previous
        .keys()
        .filter(|id| !current.contains_key(*id))
        .cloned()
        .collect();
    stale.sort();
    stale
}

fn to_wire(versions: &ObjectVersions) -> Vec<ObjectVersion> {
    versions
        .iter()
        .map(|(id, version)| ObjectVersion {
            id: id.clone(),
            version: version.clone(),
        })
        .collect()
}

/// Later duplicates of an id win.
fn from_wire(versions: &[ObjectVersion]) -> ObjectVersions {
    versions
        .iter()
        .map(|v| (v.id.clone(), v.version.clone()))
        .collect()
}
