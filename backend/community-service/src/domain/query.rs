/// Post query condition
///
/// Describes one sort intent for `PostRepository::query_posts`.
use serde::{Deserialize, Serialize};

use super::models::{Category, TIME_CREATED, TOTAL_COMMENT, VOTE_DIFFERENCE};
use crate::store::Direction;

/// Maximum number of values in one `array-contains-any` filter
pub const CATEGORY_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostQuery {
    pub most_commented: bool,
    pub most_voted: bool,
    pub newest: bool,
    pub oldest: bool,
}

impl PostQuery {
    pub fn most_commented() -> Self {
        Self {
            most_commented: true,
            ..Self::default()
        }
    }

    pub fn most_voted() -> Self {
        Self {
            most_voted: true,
            ..Self::default()
        }
    }

    pub fn newest() -> Self {
        Self {
            newest: true,
            ..Self::default()
        }
    }

    pub fn oldest() -> Self {
        Self {
            oldest: true,
            ..Self::default()
        }
    }

    /// Field and direction to order by, `None` when no flag is set
    ///
    /// Flags are applied in the order most-commented, most-voted, newest,
    /// oldest and each replaces the previous ordering, so the last set flag
    /// wins.
    pub fn ordering(&self) -> Option<(&'static str, Direction)> {
        let mut ordering = None;
        if self.most_commented {
            ordering = Some((TOTAL_COMMENT, Direction::Descending));
        }
        if self.most_voted {
            ordering = Some((VOTE_DIFFERENCE, Direction::Descending));
        }
        if self.newest {
            ordering = Some((TIME_CREATED, Direction::Descending));
        }
        if self.oldest {
            ordering = Some((TIME_CREATED, Direction::Ascending));
        }
        ordering
    }
}

/// Split category ids into consecutive batches of at most `CATEGORY_BATCH_SIZE`
pub fn category_batches(categories: &[Category]) -> Vec<Vec<String>> {
    categories
        .chunks(CATEGORY_BATCH_SIZE)
        .map(|chunk| chunk.iter().map(|c| c.category_id.clone()).collect())
        .collect()
}
