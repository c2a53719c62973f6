//! Keyset pagination cursors.
//!
//! A page boundary is the `(start_author, start_permlink)` of the last post
//! of the previous page. Re-issuing the same query with that cursor skips
//! all rows up to and including the boundary post, so pagination stays
//! stable when new rows are inserted ahead of the cursor.

use serde::{Deserialize, Serialize};

use tribeindex_core::error::IndexError;
use tribeindex_core::types::construct_authorperm;

/// A resolved page boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    pub author: String,
    pub permlink: String,
}

impl PageCursor {
    pub fn authorperm(&self) -> String {
        construct_authorperm(&self.author, &self.permlink)
    }
}

/// Validate the optional cursor pair: both parts must be supplied together
/// or not at all.
pub fn cursor_from_args(
    start_author: Option<&str>,
    start_permlink: Option<&str>,
) -> Result<Option<PageCursor>, IndexError> {
    match (start_author, start_permlink) {
        (Some(author), Some(permlink)) => Ok(Some(PageCursor {
            author: author.to_string(),
            permlink: permlink.to_string(),
        })),
        (None, None) => Ok(None),
        _ => Err(IndexError::InvalidCursor),
    }
}
