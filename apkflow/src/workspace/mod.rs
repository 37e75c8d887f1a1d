//! Persistent per-package analysis state.
//!
//! Layout of one workspace:
//!
//! ```text
//! <root>/<package>[@<device>]/
//!     ledger.json      stage -> status/artifact/timestamp, plus history
//!     .lock            advisory lock held during runs and cleans
//!     <stage>/         artifacts of one stage
//! ```

mod key;
mod ledger;
mod lock;
mod store;

pub use key::WorkspaceKey;
pub use ledger::{
    LedgerEntry, LedgerEvent, LedgerLoad, StageLedger, LEDGER_FILE, LEDGER_SCHEMA_VERSION,
};
pub use lock::{WorkspaceLock, LOCK_FILE};
pub use store::{CleanReport, LedgerSnapshot, Workspace, WorkspaceStore};
