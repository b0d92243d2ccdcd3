//! Publishing seam for clipcast.
//!
//! This crate defines the vocabulary shared between the upload scheduler and
//! the platform-specific uploaders: which platform a clip targets, the opaque
//! clip reference, and the publish metadata that rides along with it. It also
//! provides [`CommandPublisher`], the shipped [`Publisher`] implementation
//! that delegates the actual upload to a configured external command.

mod command;
mod publisher;
mod types;

pub use command::CommandPublisher;
pub use publisher::{PublishError, Publisher};
pub use types::{ClipRef, Platform, PublishMetadata};
