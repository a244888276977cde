//! Result reporting: the per-strategy SQLite artifact and the printed summaries.

pub mod store;
pub mod summary;

pub use store::{artifact_path, ReportStore, StoredItemRow, StoredSummary};
pub use summary::{render_comparison, render_summary};
