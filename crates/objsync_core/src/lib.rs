//! # objsync Core
//!
//! Local half of remote-object synchronization.
//!
//! - [`FieldOperation`]: deferred field mutations and the rules for merging
//!   a new mutation into a pending one
//! - [`ObjectState`]: immutable snapshots of an object's server data,
//!   derived by applying operation sets
//! - [`RemoteObject`]: an object handle that queues edits and tracks the
//!   save lifecycle
//! - [`InstallationService`]: the persisted per-installation id
//!
//! ## Example
//!
//! ```rust
//! use objsync_core::{FieldOperation, RemoteObject};
//! use serde_json::json;
//!
//! let mut obj = RemoteObject::new("GameScore");
//! obj.set("player", "ana").unwrap();
//! obj.delete("tags").unwrap();
//! obj.add("tags", ["a", "b"]).unwrap();
//!
//! assert_eq!(
//!     obj.current_operations()["tags"],
//!     FieldOperation::Set(json!(["a", "b"])),
//! );
//! assert_eq!(obj.get("player"), Some(&json!("ana")));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod installation;
mod object;
mod operation;
mod state;
pub mod value;

pub use error::{CoreError, CoreResult};
pub use installation::{InstallationRecord, InstallationService, INSTALLATION_ID_KEY};
pub use object::{PendingSave, RemoteObject};
pub use operation::{Applied, FieldOperation, OperationSet};
pub use state::{ApplyOutcome, FieldFailure, MutableState, ObjectState};
