//! Stampede-safe invalidation.
//!
//! Instead of deleting a batch of entries at once, which would make every one of
//! them regenerate on the same request, the batch is scheduled to expire across a
//! window. Rows stay in place; a later prune finds and removes them.

use std::sync::Arc;

use tracing::debug;

use crate::application::repos::{EntriesWriteRepo, ExpiryChange, RepoError};
use crate::domain::entities::CacheEntryRecord;

use super::clock::Clock;

/// Linearly spread expiries for `ids` over `[now, now + period]`.
///
/// For sorted ids with `n = count - 1` and `id_end = max(ids)`, each id expires at
/// `floor(now + period - (id_end - id) / n * period)`, clamped to `now`. Larger ids
/// expire later and `id_end` lands exactly on `now + period`. A single id expires at
/// `now`.
pub fn spread_expiries(ids: &[i64], now: i64, period: i64) -> Vec<ExpiryChange> {
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    match sorted.as_slice() {
        [] => Vec::new(),
        [id] => vec![ExpiryChange {
            id: *id,
            expire: now,
        }],
        [.., id_end] => {
            let id_end = *id_end;
            let n = i128::try_from(sorted.len() - 1).unwrap_or(i128::MAX);
            let period = i128::from(period.max(0));
            sorted
                .iter()
                .map(|&id| {
                    // floor(a - x) == a - ceil(x) for the non-negative offset x.
                    let distance = i128::from(id_end - id) * period;
                    let offset = (distance + n - 1) / n;
                    let expire = i128::from(now) + period - offset;
                    ExpiryChange {
                        id,
                        expire: i64::try_from(expire.max(i128::from(now))).unwrap_or(now),
                    }
                })
                .collect()
        }
    }
}

pub struct StampedeInvalidator {
    repo: Arc<dyn EntriesWriteRepo>,
    clock: Arc<dyn Clock>,
}

impl StampedeInvalidator {
    pub fn new(repo: Arc<dyn EntriesWriteRepo>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// Schedule `entries` to expire across the next `period` seconds.
    ///
    /// An entry that already expires sooner than its computed slot keeps its expiry.
    /// Returns the number of rows whose expiry changed.
    pub async fn soft_delete(
        &self,
        entries: &[CacheEntryRecord],
        period: i64,
    ) -> Result<u64, RepoError> {
        let now = self.clock.now();
        let ids: Vec<i64> = entries.iter().map(|entry| entry.id).collect();

        let changes: Vec<ExpiryChange> = spread_expiries(&ids, now, period)
            .into_iter()
            .filter(|change| {
                entries
                    .iter()
                    .find(|entry| entry.id == change.id)
                    .is_none_or(|entry| entry.never_expires() || entry.expire > change.expire)
            })
            .collect();

        if changes.is_empty() {
            return Ok(0);
        }

        let updated = self.repo.set_expiries(&changes).await?;
        debug!(
            requested = entries.len(),
            updated,
            period,
            "Entries scheduled for staggered expiry"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: i64 = 1_700_000_000;

    #[test]
    fn three_ids_spread_across_window() {
        let changes = spread_expiries(&[3, 1, 2], T, 100);
        let expiries: Vec<_> = changes.iter().map(|c| (c.id, c.expire)).collect();
        assert_eq!(expiries, vec![(1, T), (2, T + 50), (3, T + 100)]);
    }

    #[test]
    fn spread_is_strictly_increasing_and_bounded() {
        let ids: Vec<i64> = (10..20).collect();
        let changes = spread_expiries(&ids, T, 90);

        for pair in changes.windows(2) {
            assert!(pair[0].expire < pair[1].expire);
        }
        assert!(changes.iter().all(|c| c.expire >= T && c.expire <= T + 90));
        assert_eq!(changes.last().map(|c| c.expire), Some(T + 90));
    }

    #[test]
    fn fractional_offsets_round_down() {
        // id 2 sits a third of the way in: T + 100 - 66.67 floors to T + 33.
        let changes = spread_expiries(&[1, 2, 3, 4], T, 100);
        assert_eq!(changes[1].expire, T + 33);
        assert_eq!(changes[2].expire, T + 66);
    }

    #[test]
    fn single_id_expires_now() {
        let changes = spread_expiries(&[9], T, 100);
        assert_eq!(changes, vec![ExpiryChange { id: 9, expire: T }]);
    }

    #[test]
    fn sparse_ids_never_expire_before_now() {
        let changes = spread_expiries(&[1, 100], T, 10);
        assert_eq!(changes[0].expire, T);
        assert_eq!(changes[1].expire, T + 10);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(spread_expiries(&[], T, 100).is_empty());
    }
}
