//! Storage provider bridging S3 semantics onto a remote folder/file API (§4.7).

pub mod client;
pub mod fake;
pub mod provider;

pub use client::{RemoteByteStream, RemoteClient, RemoteFileEntry, RemoteFileStat};
pub use fake::FakeRemoteClient;
pub use provider::{MigrationReport, RemoteProvider};
