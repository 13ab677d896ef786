//! secrets-provider-client: talk to out-of-process secrets provider plugins
//!
//! Provider plugins run as separate processes and serve a small gRPC API on
//! a unix socket per provider. This crate is the driver side of that
//! contract, plus helpers for writing providers.
//!
//! # Architecture
//!
//! - **Client cache**: [`PluginClientBuilder`] keeps one connection per
//!   provider, created on first use and shared by every caller.
//! - **Mount orchestrator**: [`MountOrchestrator`] runs one mount
//!   transaction: call the provider, check the response, write payload
//!   files, and retire objects that disappeared since the last mount.
//! - **File collaborators**: [`fileutil`] holds the traits the orchestrator
//!   writes and removes files through, with a local filesystem default.
//! - **Provider helpers**: [`provider`] serves a `CsiDriverProvider`
//!   implementation on its socket.
//!
//! # Example
//!
//! ```no_run
//! use secrets_provider_client::config::RetryPolicy;
//! use secrets_provider_client::mount::{MountOrchestrator, MountParams, ObjectVersions};
//! use secrets_provider_client::PluginClientBuilder;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let clients = PluginClientBuilder::new(
//!     "/var/run/secrets-store-csi-providers",
//!     RetryPolicy::default(),
//! );
//! let client = clients.get("vault").await?;
//!
//! let params = MountParams {
//!     target_path: "/mnt/secrets".into(),
//!     permission: "420".to_string(),
//!     ..Default::default()
//! };
//! let outcome = MountOrchestrator::default()
//!     .mount_content(&client, &params, &ObjectVersions::new())
//!     .await?;
//! println!("{:?}", outcome.object_versions);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod fileutil;
pub mod mount;
pub mod provider;
pub mod v1alpha1;

pub use client::{MountClient, PluginClientBuilder, ProviderClient};
pub use error::{ProviderError, Result};
pub use mount::{MountOrchestrator, MountOutcome, MountParams, ObjectVersions};
