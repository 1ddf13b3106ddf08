//! Character modification engine.
//!
//! Three layers:
//!
//! - **Diff language** ([`diff`]): a restricted element-based format for
//!   describing document changes, with hostile-input neutralization and a
//!   path denylist.
//! - **Updater** ([`updater`]): applies a parsed diff to a copy of the
//!   document, dispatching on the document schema and validating the
//!   result.
//! - **Service** ([`service`]): wraps the updater with versioning,
//!   snapshots, rollback, rate limiting, locking, and persistence for one
//!   agent.
//!
//! A submitted payload flows through `parse_diff` →
//! [`ModificationService::apply_diff`] → [`updater::apply_diff`], and the
//! outcome reports exactly how far it got.

pub mod diff;
pub mod error;
pub mod path;
pub mod service;
pub mod updater;

pub use diff::{parse_diff, serialize_diff, CharacterDiff, DiffOperation, OpKind, ValueType};
pub use error::{CharacterError, CharacterResult, DiffError, OpError, UpdateError};
pub use path::{top_level_field, DocPath, Seg};
pub use service::{
    ApplyOutcome, CharacterModification, CharacterSnapshot, ModificationConfig,
    ModificationService,
};
pub use updater::{apply_diff, diff_documents};
