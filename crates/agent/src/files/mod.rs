//! File access components.
//!
//! - [`resolver`]: root alias plus relative path to absolute path
//! - [`browser`]: lenient directory listing
//! - [`plist`]: property lists parsed to a generic tree
//! - [`reader`]: bounded single-shot reads
//! - [`transfer`]: chunked streaming export with push events
//! - [`registry`]: live export sessions
//!
//! All filesystem access goes through a [`FilesystemProvider`].

pub mod browser;
pub mod plist;
pub mod provider;
pub mod reader;
pub mod registry;
pub mod resolver;
pub mod transfer;

pub use browser::DirectoryBrowser;
pub use plist::{read_plist, ParseError, PlistFailure};
pub use provider::{FilesystemProvider, LocalFilesystem};
pub use reader::{BoundedReader, ReadError};
pub use registry::{SessionId, SessionRecord, SessionRegistry, SessionState};
pub use resolver::{PathResolver, ResolveError};
pub use transfer::{ExportError, ExportStarted, StreamingExporter};
