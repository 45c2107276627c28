//! K-way merge of per-author timelines.

use std::collections::BinaryHeap;

use crate::domain::entities::PublicationRecord;
use crate::domain::types::TimelineKey;

/// One merge candidate. Cache-sourced entries carry only their key until
/// hydration; store-sourced entries arrive with their record.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FeedEntry {
    pub key: TimelineKey,
    pub record: Option<PublicationRecord>,
}

impl FeedEntry {
    pub fn cached(key: TimelineKey) -> Self {
        Self { key, record: None }
    }

    pub fn stored(record: PublicationRecord) -> Self {
        Self {
            key: record.timeline_key(),
            record: Some(record),
        }
    }
}

/// Merge timelines into one newest-first sequence of at most `take` entries,
/// keeping the first occurrence of each publication id.
///
/// An id always carries the same key, so repeats pop off the heap back to
/// back and comparing against the last merged entry is enough.
pub(crate) fn merge_timelines(sources: Vec<Vec<FeedEntry>>, take: usize) -> Vec<FeedEntry> {
    let mut cursors: Vec<std::vec::IntoIter<FeedEntry>> = sources
        .into_iter()
        .map(|mut source| {
            source.sort_unstable_by(|a, b| b.key.cmp(&a.key));
            source.into_iter()
        })
        .collect();
    let mut heads: Vec<Option<FeedEntry>> = cursors.iter_mut().map(Iterator::next).collect();

    let mut heap: BinaryHeap<(TimelineKey, usize)> = heads
        .iter()
        .enumerate()
        .filter_map(|(index, head)| head.as_ref().map(|entry| (entry.key, index)))
        .collect();

    let mut merged = Vec::with_capacity(take);
    while merged.len() < take {
        let Some((_, index)) = heap.pop() else {
            break;
        };
        let Some(entry) = heads[index].take() else {
            continue;
        };
        if let Some(next) = cursors[index].next() {
            heap.push((next.key, index));
            heads[index] = Some(next);
        }
        if merged.last().is_none_or(|last: &FeedEntry| last.key != entry.key) {
            merged.push(entry);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;
    use time::Duration;

    use super::*;
    use crate::domain::types::PublicationId;

    fn entry(offset_secs: i64, id: i64) -> FeedEntry {
        FeedEntry::cached(TimelineKey::new(
            datetime!(2024-01-01 00:00:00 UTC) + Duration::seconds(offset_secs),
            PublicationId(id),
        ))
    }

    fn ids(entries: &[FeedEntry]) -> Vec<i64> {
        entries.iter().map(|entry| entry.key.id.get()).collect()
    }

    #[test]
    fn interleaves_by_descending_time() {
        let merged = merge_timelines(
            vec![
                vec![entry(50, 5), entry(30, 3), entry(10, 1)],
                vec![entry(40, 4), entry(20, 2)],
            ],
            10,
        );
        assert_eq!(ids(&merged), vec![5, 4, 3, 2, 1]);
    }

    #[test]
    fn equal_times_break_ties_by_id() {
        let merged = merge_timelines(vec![vec![entry(0, 7)], vec![entry(0, 9)]], 10);
        assert_eq!(ids(&merged), vec![9, 7]);
    }

    #[test]
    fn repeated_ids_appear_once() {
        let merged = merge_timelines(
            vec![vec![entry(20, 2), entry(10, 1)], vec![entry(20, 2)]],
            10,
        );
        assert_eq!(ids(&merged), vec![2, 1]);
    }

    #[test]
    fn repeats_from_many_sources_collapse_between_other_entries() {
        let merged = merge_timelines(
            vec![
                vec![entry(30, 3), entry(20, 2)],
                vec![entry(25, 5)],
                vec![entry(20, 2), entry(10, 1)],
                vec![entry(20, 2)],
            ],
            10,
        );
        assert_eq!(ids(&merged), vec![3, 5, 2, 1]);
    }

    #[test]
    fn stops_at_take() {
        let merged = merge_timelines(
            vec![vec![entry(3, 3), entry(2, 2), entry(1, 1)]],
            2,
        );
        assert_eq!(ids(&merged), vec![3, 2]);
    }

    #[test]
    fn unsorted_sources_are_ordered_first() {
        let merged = merge_timelines(vec![vec![entry(1, 1), entry(3, 3), entry(2, 2)]], 3);
        assert_eq!(ids(&merged), vec![3, 2, 1]);
    }

    #[test]
    fn empty_sources_merge_to_nothing() {
        assert!(merge_timelines(vec![Vec::new(), Vec::new()], 5).is_empty());
    }
}
