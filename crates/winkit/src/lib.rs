//! # winkit
//!
//! Pure Rust library for reading and changing Windows host configuration.
//!
//! This crate provides:
//! - Typed records for registry values, firewall rules, services, local
//!   accounts, environment variables, path ACLs, packages and startup entries
//! - A [`Backend`](backend::Backend) trait with a PowerShell implementation
//!   for real hosts and an in-memory one for tests and simulation
//! - Error categories that tell transient host failures from permanent ones
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use winkit::backend::{Backend, ListFilter, default_backend};
//! use winkit::{Record, RecordKind};
//!
//! let host = default_backend().expect("PowerShell not available");
//!
//! // Read one variable
//! let filter = ListFilter::ids(["user:EDITOR"]);
//! for record in host.list(RecordKind::EnvironmentVariable, &filter).unwrap() {
//!     println!("{}: {:?}", record.id(), record.to_attributes());
//! }
//!
//! // Write it back
//! let attrs = serde_json::json!({"value": "vim"});
//! let record = Record::from_attributes(
//!     RecordKind::EnvironmentVariable,
//!     "user:EDITOR",
//!     attrs.as_object().unwrap(),
//! )
//! .unwrap();
//! host.put(&record, Duration::from_secs(60)).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod types;

pub use backend::memory::{FaultKind, HostState, MemoryBackend};
pub use backend::powershell::PowerShellBackend;
pub use backend::{Backend, ListFilter, MANAGED_FIREWALL_GROUP, Opaque};
pub use error::{Error, ErrorCategory, Result};
pub use types::{Record, RecordKind};
