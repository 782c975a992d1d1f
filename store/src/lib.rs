//! Versioned in-memory object database for the Cascade chain controller.
//!
//! State lives in typed tables ([`table::Table`]) keyed by a monotonically
//! assigned primary id plus one unique secondary key per type. All mutation
//! is tracked by nestable undo sessions so a failed block or transaction can
//! be rolled back to a byte-identical prior state:
//!
//! - [`Store::start_undo_session`] opens a session (one undo frame per
//!   table).
//! - [`Session::push`] keeps the frame in history so it survives the
//!   session value; [`Session::squash`] merges it into the frame below;
//!   [`Session::undo`] reverts it.
//! - [`Store::commit`] irrevocably discards frames at or below a revision
//!   once the blocks they belong to are irreversible.
//!
//! [`ObjectDb`] wraps a store in a process-wide read/write lock: every
//! mutating chain operation runs under the write half for its full
//! duration, readers share the read half.

pub mod database;
pub mod error;
pub mod table;

pub use database::{ObjectDb, Session, Store};
pub use error::StoreError;
pub use table::{StateObject, Table};
