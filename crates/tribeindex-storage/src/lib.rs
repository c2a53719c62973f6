//! tribeindex-storage — the SQLite-backed content graph store.
//!
//! ```text
//! GraphStore (pool)
//!     ├── begin_block() → BlockWriter  (one transaction per block)
//!     ├── read accessors              (processors + query engine)
//!     └── feed queries                (keyset-paginated discussion views)
//! ```

pub mod entities;
pub mod feeds;
mod queries;
pub mod store;
pub mod writer;

pub use entities::{
    AccountPatch, AccountRow, FeedPost, FollowRow, Post, PostMetadata, PostMetadataUpsert,
    PostUpsert, ReblogRow, TokenConfigRow, VoteRow,
};
pub use feeds::{ScoreOrder, TagCount};
pub use store::GraphStore;
pub use writer::BlockWriter;
