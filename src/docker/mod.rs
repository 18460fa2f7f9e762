//! Docker container discovery
//!
//! Watches the local Docker daemon for container lifecycle events and
//! translates containers carrying devproxy labels into route registry
//! entries. Two pieces: [`client`] wraps `bollard` behind the handful of
//! calls the synchronizer actually needs, and [`labels`] turns a container's
//! label map into a typed [`labels::ParsedLabels`].

mod client;
mod labels;
mod synchronizer;

pub use client::{ContainerEvent, ContainerObservation, DockerClient, NetworkAttachment};
pub use labels::{LabelError, ParsedLabels};
pub use synchronizer::Synchronizer;
