//! tribeindex-query — the feed/discussion query engine.
//!
//! ```text
//! QueryEngine
//!     ├── cursor      (keyset pagination boundaries)
//!     ├── follows     (lazy follow-graph refresh)
//!     └── thread      (iterative thread repair via the node)
//! ```
//!
//! The engine is the only sanctioned read path into the content graph; the
//! REST layer is a thin translation over these calls.

pub mod cursor;
pub mod engine;
pub mod follows;
pub mod thread;

pub use cursor::{cursor_from_args, PageCursor};
pub use engine::{FollowCounts, PostView, QueryEngine, StateInfo, VoteSelector, VoteView};
pub use follows::ensure_follows_fresh;
pub use thread::fetch_and_save_thread;
