use crate::error::StoreError;
use async_trait::async_trait;
use duels_protocol::model::{Difficulty, TagId, UserId};
use std::{
    collections::BTreeSet,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub user_id: UserId,
    pub difficulties: BTreeSet<Difficulty>,
    pub tags: BTreeSet<TagId>,
    pub joined_at: Instant,
    pub force_match: bool,
}

impl QueueEntry {
    pub fn new(
        user_id: UserId,
        difficulties: impl IntoIterator<Item = Difficulty>,
        tags: impl IntoIterator<Item = TagId>,
        force_match: bool,
        joined_at: Instant,
    ) -> Self {
        Self {
            user_id,
            difficulties: difficulties.into_iter().collect(),
            tags: tags.into_iter().collect(),
            joined_at,
            force_match,
        }
    }

    fn force_ready(&self, now: Instant, force_wait: Duration) -> bool {
        self.force_match && now.saturating_duration_since(self.joined_at) >= force_wait
    }
}

/// Two entries already removed from the queue, earlier joiner first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedPair {
    pub first: QueueEntry,
    pub second: QueueEntry,
}

impl MatchedPair {
    /// Shared preferences, or the union of both when they share nothing.
    pub fn problem_filter(&self) -> (Vec<Difficulty>, Vec<TagId>) {
        (
            overlap_or_union(&self.first.difficulties, &self.second.difficulties),
            overlap_or_union(&self.first.tags, &self.second.tags),
        )
    }

    pub fn into_entries(self) -> [QueueEntry; 2] {
        [self.first, self.second]
    }
}

fn overlap_or_union<T: Ord + Copy>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> Vec<T> {
    let overlap: Vec<T> = a.intersection(b).copied().collect();
    if overlap.is_empty() {
        a.union(b).copied().collect()
    } else {
        overlap
    }
}

pub fn should_match(a: &QueueEntry, b: &QueueEntry, now: Instant, force_wait: Duration) -> bool {
    if a.user_id == b.user_id {
        return false;
    }

    if !a.tags.is_disjoint(&b.tags) {
        return true;
    }

    a.force_ready(now, force_wait) || b.force_ready(now, force_wait)
}

/// Index pairs to match, scanning in join order. Each index appears at most once.
pub fn plan_matches(
    entries: &[QueueEntry],
    now: Instant,
    force_wait: Duration,
) -> Vec<(usize, usize)> {
    let mut taken = vec![false; entries.len()];
    let mut pairs = Vec::new();

    for i in 0..entries.len() {
        if taken[i] {
            continue;
        }
        let partner = (i + 1..entries.len())
            .find(|&j| !taken[j] && should_match(&entries[i], &entries[j], now, force_wait));
        if let Some(j) = partner {
            taken[i] = true;
            taken[j] = true;
            pairs.push((i, j));
        }
    }

    pairs
}

/// The shared waiting pool.
#[async_trait]
pub trait Matchmaking: Send + Sync {
    /// Adds the entry, replacing any entry the same user already has.
    async fn add_player(&self, entry: QueueEntry) -> Result<(), StoreError>;

    async fn leave_queue(&self, user_id: UserId) -> Result<bool, StoreError>;

    async fn contains(&self, user_id: UserId) -> Result<bool, StoreError>;

    /// Plans one sweep and removes every matched entry in the same step.
    async fn take_matches(
        &self,
        now: Instant,
        force_wait: Duration,
    ) -> Result<Vec<MatchedPair>, StoreError>;

    /// Puts entries back at their original join position.
    async fn requeue(&self, entries: Vec<QueueEntry>) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MatchQueue {
    entries: Mutex<Vec<QueueEntry>>,
}

impl MatchQueue {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

fn insert_ordered(entries: &mut Vec<QueueEntry>, entry: QueueEntry) {
    entries.retain(|existing| existing.user_id != entry.user_id);
    let position = entries.partition_point(|existing| existing.joined_at <= entry.joined_at);
    entries.insert(position, entry);
}

#[async_trait]
impl Matchmaking for MatchQueue {
    async fn add_player(&self, entry: QueueEntry) -> Result<(), StoreError> {
        insert_ordered(&mut *self.entries.lock().await, entry);
        Ok(())
    }

    async fn leave_queue(&self, user_id: UserId) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|entry| entry.user_id != user_id);
        Ok(entries.len() != before)
    }

    async fn contains(&self, user_id: UserId) -> Result<bool, StoreError> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .any(|entry| entry.user_id == user_id))
    }

    async fn take_matches(
        &self,
        now: Instant,
        force_wait: Duration,
    ) -> Result<Vec<MatchedPair>, StoreError> {
        let mut entries = self.entries.lock().await;
        let pairs = plan_matches(&entries, now, force_wait);
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        let mut slots: Vec<Option<QueueEntry>> = entries.drain(..).map(Some).collect();
        let matched = pairs
            .into_iter()
            .filter_map(|(i, j)| {
                Some(MatchedPair {
                    first: slots[i].take()?,
                    second: slots[j].take()?,
                })
            })
            .collect();
        entries.extend(slots.into_iter().flatten());

        Ok(matched)
    }

    async fn requeue(&self, returned: Vec<QueueEntry>) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        for entry in returned {
            // A fresh enter_queue from the same user takes precedence.
            if entries.iter().any(|existing| existing.user_id == entry.user_id) {
                continue;
            }
            insert_ordered(&mut entries, entry);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_secs(1);

    fn entry(user_id: UserId, tags: &[TagId], force_match: bool, joined_at: Instant) -> QueueEntry {
        QueueEntry::new(
            user_id,
            [Difficulty::Easy],
            tags.iter().copied(),
            force_match,
            joined_at,
        )
    }

    #[test]
    fn overlapping_tags_match_immediately() {
        let t0 = Instant::now();
        let a = entry(1, &[1, 2], false, t0);
        let b = entry(2, &[2, 3], false, t0);
        assert!(should_match(&a, &b, t0, WAIT));
    }

    #[test]
    fn disjoint_tags_wait_for_force_bound() {
        let t0 = Instant::now();
        let a = entry(1, &[4], true, t0);
        let b = entry(2, &[5], true, t0);

        assert!(!should_match(&a, &b, t0 + Duration::from_millis(999), WAIT));
        assert!(should_match(&a, &b, t0 + WAIT, WAIT));
    }

    #[test]
    fn one_forced_player_is_enough() {
        let t0 = Instant::now();
        let patient = entry(1, &[4], false, t0);
        let forced = entry(2, &[5], true, t0);
        assert!(should_match(&patient, &forced, t0 + WAIT, WAIT));
        assert!(!should_match(
            &patient,
            &entry(3, &[5], false, t0),
            t0 + WAIT * 10,
            WAIT
        ));
    }

    #[test]
    fn empty_tag_sets_never_overlap() {
        let t0 = Instant::now();
        assert!(!should_match(&entry(1, &[], false, t0), &entry(2, &[], false, t0), t0, WAIT));
    }

    #[test]
    fn plan_prefers_earlier_joiners_and_never_reuses_entries() {
        let t0 = Instant::now();
        let entries = vec![
            entry(1, &[1], false, t0),
            entry(2, &[9], false, t0 + Duration::from_millis(1)),
            entry(3, &[1, 9], false, t0 + Duration::from_millis(2)),
            entry(4, &[9], false, t0 + Duration::from_millis(3)),
        ];

        let pairs = plan_matches(&entries, t0 + Duration::from_millis(10), WAIT);
        assert_eq!(pairs, vec![(0, 2), (1, 3)]);
    }

    #[tokio::test]
    async fn take_matches_removes_matched_entries_atomically() {
        let queue = MatchQueue::new();
        let t0 = Instant::now();
        queue.add_player(entry(1, &[1, 2], false, t0)).await.expect("add");
        queue
            .add_player(entry(2, &[7], false, t0 + Duration::from_millis(1)))
            .await
            .expect("add");
        queue
            .add_player(entry(3, &[2, 3], false, t0 + Duration::from_millis(2)))
            .await
            .expect("add");

        let matched = queue.take_matches(t0, WAIT).await.expect("sweep");
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].first.user_id, 1);
        assert_eq!(matched[0].second.user_id, 3);

        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.contains(2).await, Ok(true));
        assert_eq!(queue.contains(1).await, Ok(false));
    }

    #[tokio::test]
    async fn forced_pair_matches_only_after_wait_bound() {
        let queue = MatchQueue::new();
        let t0 = Instant::now();
        queue.add_player(entry(1, &[4], true, t0)).await.expect("add");
        queue.add_player(entry(2, &[5], true, t0)).await.expect("add");

        assert!(queue.take_matches(t0, WAIT).await.expect("sweep").is_empty());
        let matched = queue.take_matches(t0 + WAIT, WAIT).await.expect("sweep");
        assert_eq!(matched.len(), 1);
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn re_entering_replaces_previous_entry() {
        let queue = MatchQueue::new();
        let t0 = Instant::now();
        queue.add_player(entry(1, &[1], false, t0)).await.expect("add");
        queue
            .add_player(entry(1, &[2], false, t0 + Duration::from_millis(5)))
            .await
            .expect("re-add");

        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.leave_queue(1).await, Ok(true));
        assert_eq!(queue.leave_queue(1).await, Ok(false));
    }

    #[tokio::test]
    async fn requeue_restores_join_order() {
        let queue = MatchQueue::new();
        let t0 = Instant::now();
        queue.add_player(entry(1, &[1], false, t0)).await.expect("add");
        queue.add_player(entry(2, &[1], false, t0)).await.expect("add");
        queue
            .add_player(entry(3, &[8], false, t0 + Duration::from_millis(1)))
            .await
            .expect("add");

        let matched = queue.take_matches(t0, WAIT).await.expect("sweep");
        let pair = matched.into_iter().next().expect("one pair");
        queue.requeue(pair.into_entries().to_vec()).await.expect("requeue");

        let order: Vec<UserId> = queue
            .entries
            .lock()
            .await
            .iter()
            .map(|entry| entry.user_id)
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn problem_filter_falls_back_to_union() {
        let t0 = Instant::now();
        let pair = MatchedPair {
            first: entry(1, &[4], true, t0),
            second: entry(2, &[5], true, t0),
        };
        let (difficulties, tags) = pair.problem_filter();
        assert_eq!(difficulties, vec![Difficulty::Easy]);
        assert_eq!(tags, vec![4, 5]);
    }
}
