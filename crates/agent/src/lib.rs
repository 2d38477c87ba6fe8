//! # Sandfinder Agent Library
//!
//! The agent is a remote file-access façade. A controlling process sends
//! framed requests over a message channel; the agent lists directories,
//! parses property lists, returns the head of files and streams whole files
//! back as chunked transfer events. The controller never touches the
//! filesystem directly.
//!
//! ## Architecture
//!
//! ```text
//! controller ──frames──▶ transport ──▶ router ──▶ files::{browser, plist, reader}
//!                            ▲                └──▶ files::transfer ──┐
//!                            └──── writer task ◀── channel ◀────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use agent::files::{LocalFilesystem, PathResolver};
//! use agent::transport::Server;
//! use agent::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let server = Server::new(
//!         Arc::new(LocalFilesystem),
//!         PathResolver::new(config.roots.bundle.clone()),
//!         config.transfer.clone(),
//!     );
//!
//!     // Serve a single controller over stdio until it closes its side
//!     server.serve(tokio::io::stdin(), tokio::io::stdout()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`files`]: Path resolution, listing, reads and streaming export
//! - [`channel`]: Outbound message queue
//! - [`router`]: Request dispatch
//! - [`transport`]: Framed connections over stdio or a Unix socket

pub mod channel;
pub mod config;
pub mod files;
pub mod router;
pub mod transport;

pub use protocol;

pub use channel::{outbound, ChannelError, ChannelSender, MessageChannel};
pub use config::Config;
pub use files::{
    BoundedReader, DirectoryBrowser, ExportError, ExportStarted, FilesystemProvider,
    LocalFilesystem, ParseError, PathResolver, ReadError, ResolveError, SessionRegistry,
    SessionState, StreamingExporter,
};
pub use router::{Reply, Router, RouterError, RouterResult};
pub use transport::{ConnectionStats, Server, TransportError};
