//! Lane synchronization against the remote lane registry.
//!
//! [`LaneSyncCoordinator`] confirms or creates a lane remotely through a
//! [`LaneRegistry`], then mirrors it into the local [`termgate_store`].
//! [`RegistryClient`] is the HTTP implementation of the registry contract.

mod client;
mod coordinator;
mod error;
pub mod validate;

pub use client::{
    ApiEnvelope, DEFAULT_API_URL, LaneRegistration, LaneRegistry, RegistryClient, RemoteLane,
};
pub use coordinator::{LaneSyncCoordinator, SyncReport};
pub use error::{Error, Result};
