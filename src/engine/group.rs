//! Grouped result merging
//!
//! Folds per-window bucket lists for one concept into a single list. Buckets
//! are identified by their hash id; the first occurrence of a bucket seeds it
//! verbatim and later occurrences are combined with the reducer. Output keeps
//! first-seen order.

use super::traits::Reducer;
use crate::types::GroupResult;
use std::collections::HashMap;

/// Merges grouped window results with a reducer
pub struct GroupMerger<'a> {
    reducer: &'a dyn Reducer,
}

impl<'a> GroupMerger<'a> {
    /// Create a merger around a reducer
    pub fn new(reducer: &'a dyn Reducer) -> Self {
        Self { reducer }
    }

    /// Merge window results in window order
    pub fn merge<I>(&self, windows: I) -> Vec<GroupResult>
    where
        I: IntoIterator<Item = Vec<GroupResult>>,
    {
        let mut merged: Vec<GroupResult> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for bucket in windows.into_iter().flatten() {
            match positions.get(&bucket.hash_id) {
                Some(&i) => {
                    let existing = std::mem::take(&mut merged[i].value);
                    merged[i].value = self.reducer.reduce(existing, bucket.value);
                },
                None => {
                    positions.insert(bucket.hash_id.clone(), merged.len());
                    merged.push(bucket);
                },
            }
        }

        merged
    }
}
