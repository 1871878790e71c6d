use std::collections::HashSet;

use crate::{
    checker::{CheckTask, CheckerError},
    domain::{DomainBudget, RecordId},
    store::{HistoryStore, RECORD_PAGE_SIZE, RecordSource, UrlDueFilter},
};

/// Split `batch_size` slots across pools proportionally to their sizes
///
/// Largest-remainder rounding; every non-empty pool gets at least one slot while the batch
/// has enough slots, and no pool gets more slots than it has candidates.
pub fn apportion(batch_size: usize, pools: &[u64]) -> Vec<usize> {
    let total: u64 = pools.iter().sum();
    if total == 0 {
        return vec![0; pools.len()];
    }
    if total <= batch_size as u64 {
        return pools.iter().map(|&n| n as usize).collect();
    }

    let batch = batch_size as u64;
    let mut shares: Vec<usize> = pools.iter().map(|&n| (batch * n / total) as usize).collect();

    // fractional parts, as numerators over `total`
    let mut by_remainder: Vec<usize> = (0..pools.len()).collect();
    by_remainder.sort_by_key(|&i| std::cmp::Reverse((batch * pools[i]) % total));

    let mut left = batch_size - shares.iter().sum::<usize>();
    for &i in &by_remainder {
        if left == 0 {
            break;
        }
        if (batch * pools[i]) % total > 0 {
            shares[i] += 1;
            left -= 1;
        }
    }

    for i in 0..pools.len() {
        if pools[i] == 0 || shares[i] > 0 {
            continue;
        }
        let donor = (0..pools.len())
            .filter(|&j| shares[j] > 1)
            .max_by_key(|&j| shares[j]);
        if let Some(donor) = donor {
            shares[donor] -= 1;
            shares[i] = 1;
        }
    }

    shares
}

/// Fills one scheduling batch while keeping every domain within its per-pass cap
pub(crate) struct BatchPlanner<'a> {
    store: &'a dyn HistoryStore,
    records: &'a dyn RecordSource,
    budget: DomainBudget,
    selected: HashSet<RecordId>,
    tasks: Vec<CheckTask>,
}

impl<'a> BatchPlanner<'a> {
    pub fn new(
        store: &'a dyn HistoryStore,
        records: &'a dyn RecordSource,
        per_domain_cap: usize,
    ) -> Self {
        Self {
            store,
            records,
            budget: DomainBudget::new(per_domain_cap),
            selected: HashSet::new(),
            tasks: Vec::new(),
        }
    }

    pub fn into_tasks(self) -> Vec<CheckTask> {
        self.tasks
    }

    /// Admit a whole record if all of its URLs fit in the domain budget
    async fn try_record(&mut self, record_id: RecordId) -> Result<bool, CheckerError> {
        if self.selected.contains(&record_id) {
            return Ok(false);
        }

        let urls: Vec<String> = self
            .records
            .record_fields(record_id)
            .await?
            .unwrap_or_default()
            .iter()
            .flat_map(|field| field.urls())
            .collect();

        if !self.budget.try_take(&urls) {
            tracing::debug!(record_id, "record skipped, domain budget exhausted");
            return Ok(false);
        }

        self.selected.insert(record_id);
        self.tasks.push(CheckTask::record(record_id));
        Ok(true)
    }

    /// Take up to `quota` never-checked records in ascending id order
    pub async fn take_never_checked(&mut self, quota: usize) -> Result<usize, CheckerError> {
        let mut taken = 0;
        let mut after = None;

        while taken < quota {
            let page = self
                .store
                .never_checked_records(after, RECORD_PAGE_SIZE)
                .await?;

            for &record_id in &page {
                if taken == quota {
                    break;
                }
                if self.try_record(record_id).await? {
                    taken += 1;
                }
            }

            if page.len() < RECORD_PAGE_SIZE {
                break;
            }
            after = page.last().copied();
        }

        Ok(taken)
    }

    /// Take up to `quota` records last checked before `before`, oldest first
    pub async fn take_records_due(
        &mut self,
        before: time::OffsetDateTime,
        quota: usize,
    ) -> Result<usize, CheckerError> {
        let mut taken = 0;
        let mut offset = 0;

        while taken < quota {
            let page = self
                .store
                .records_due(before, offset, RECORD_PAGE_SIZE)
                .await?;

            for &record_id in &page {
                if taken == quota {
                    break;
                }
                if self.try_record(record_id).await? {
                    taken += 1;
                }
            }

            if page.len() < RECORD_PAGE_SIZE {
                break;
            }
            offset += page.len();
        }

        Ok(taken)
    }

    /// Take up to `quota` failing URLs due for a recheck, oldest first
    pub async fn take_urls_due(
        &mut self,
        filter: &UrlDueFilter,
        quota: usize,
    ) -> Result<usize, CheckerError> {
        let mut taken = 0;
        let mut offset = 0;

        while taken < quota {
            let page = self
                .store
                .urls_due(filter, offset, RECORD_PAGE_SIZE)
                .await?;
            let page_len = page.len();

            for key in page {
                if taken == quota {
                    break;
                }
                // the record check covers this URL
                if self.selected.contains(&key.record_id) {
                    continue;
                }
                if !self.budget.try_take(&[&key.url]) {
                    tracing::debug!(url = %key.url, "url skipped, domain budget exhausted");
                    continue;
                }
                self.tasks.push(CheckTask::Url(key));
                taken += 1;
            }

            if page_len < RECORD_PAGE_SIZE {
                break;
            }
            offset += page_len;
        }

        Ok(taken)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn small_pools_are_taken_whole() {
        assert_eq!(apportion(10, &[3, 2, 4]), vec![3, 2, 4]);
        assert_eq!(apportion(10, &[0, 0, 0]), vec![0, 0, 0]);
        assert_eq!(apportion(10, &[0, 10, 0]), vec![0, 10, 0]);
    }

    #[test]
    fn proportional_split() {
        assert_eq!(apportion(10, &[30, 10, 0]), vec![8, 2, 0]);
        assert_eq!(apportion(10, &[50, 50, 100]), vec![3, 2, 5]);
    }

    #[test]
    fn every_non_empty_pool_is_represented() {
        let shares = apportion(10, &[1000, 1, 0]);
        assert_eq!(shares, vec![9, 1, 0]);

        let shares = apportion(5, &[1, 1000, 1]);
        assert_eq!(shares, vec![1, 3, 1]);
    }

    #[test]
    fn shares_fill_the_batch_exactly() {
        for pools in [[7u64, 13, 29], [1, 1, 1], [100, 3, 0], [2, 2, 2]] {
            let shares = apportion(4, &pools);
            assert_eq!(shares.iter().sum::<usize>(), 4.min(pools.iter().sum::<u64>() as usize));
            for (share, pool) in shares.iter().zip(pools) {
                assert!(*share as u64 <= pool);
            }
        }
    }
}
