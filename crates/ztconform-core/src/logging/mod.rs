//! JSONL run logs.
//!
//! When a logs directory is configured, every tracing event of a session is
//! appended to a per-session JSONL file next to a small metadata record for
//! the run:
//!
//! ```text
//! logs/
//! ├── raw/
//! │   └── 2026-10-18_7f3kq2.jsonl   # one object per event
//! └── runs/
//!     └── 7f3kq2.json               # target version, mode, bundle
//! ```
//!
//! ```bash
//! # Every failed step of a run
//! jq 'select(.level == "warn" and .fields.step != null)' logs/raw/*_7f3kq2.jsonl
//! ```

pub mod entry;
pub mod layer;
pub mod writer;

pub use entry::{JsonLogEntry, RunMetadata};
pub use layer::JsonlLayer;
pub use writer::{read_session_entries, write_run_metadata, SessionLogWriter};
