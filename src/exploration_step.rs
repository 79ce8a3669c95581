use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use collector::Collector;
use counters::Counters;
use dataset::{Dataset, VIEW_SUPPORT_RATE};
use selector::{Rejection, Selector, SelectorChain};

// A step's dataset is deferred until the step is actually explored:
// counting candidate extensions only needs the parent's dataset, so a
// child rejected straight away never pays for projection.
enum DatasetSlot {
    Ready(Arc<Dataset>),
    View {
        parent: Arc<Dataset>,
        extension: usize,
    },
    Materialize {
        parent: Arc<Dataset>,
        extension: usize,
        renaming: Vec<i32>,
    },
}

// The recursion unit: a closed pattern under construction, its counters,
// its (lazily instantiated) dataset and an iterator over untried
// extensions. next() is the sole mutator and is safe to call from a thief
// thread concurrently with the owner: the candidate cursor is atomic and
// everything else is immutable or behind its own lock.
pub struct ExplorationStep {
    pub counters: Counters,
    // Renamed id (in the parent's space) this step extended with.
    pub core_item: Option<usize>,
    dataset: Mutex<DatasetSlot>,
    stealable: AtomicBool,
    cursor: AtomicUsize,
    selectors: SelectorChain,
    // Diagnostics only: failed extension -> its actual first parent.
    failed_first_parents: Mutex<HashMap<usize, usize>>,
    lcm_compress: bool,
}

impl ExplorationStep {
    pub fn root(counters: Counters, dataset: Dataset, lcm_compress: bool) -> ExplorationStep {
        ExplorationStep {
            counters: counters,
            core_item: None,
            dataset: Mutex::new(DatasetSlot::Ready(Arc::new(dataset))),
            stealable: AtomicBool::new(true),
            cursor: AtomicUsize::new(0),
            selectors: SelectorChain::new(),
            failed_first_parents: Mutex::new(HashMap::new()),
            lcm_compress: lcm_compress,
        }
    }

    // Two-pass load: count + rename, then rewrite the database.
    pub fn from_transactions(
        min_support: u32,
        transactions: &[Vec<u32>],
        lcm_compress: bool,
    ) -> ExplorationStep {
        let (counters, renaming) = Counters::initial(min_support, transactions);
        let dataset = Dataset::initial(&counters, &renaming, transactions);
        ExplorationStep::root(counters, dataset, lcm_compress)
    }

    // Selectors must be wired before mining starts; the chain is copied
    // into every descendant.
    pub fn append_selector(&mut self, selector: Box<dyn Selector>) {
        self.selectors.append(selector);
    }

    pub fn pattern(&self) -> &[u32] {
        &self.counters.pattern
    }

    pub fn selector_rejection_counts(&self) -> Vec<(&'static str, u64)> {
        self.selectors.rejection_counts()
    }

    // Thieves must not pick a step whose dataset is still deferred:
    // instantiating it requires the owner's projection context.
    pub fn is_stealable(&self) -> bool {
        self.stealable.load(Ordering::Acquire)
    }

    fn dataset(&self) -> Arc<Dataset> {
        let mut slot = self.dataset.lock().unwrap();
        let built = match *slot {
            DatasetSlot::Ready(ref dataset) => return dataset.clone(),
            DatasetSlot::View {
                ref parent,
                extension,
            } => Arc::new(Dataset::view(parent, extension, &self.counters)),
            DatasetSlot::Materialize {
                ref parent,
                extension,
                ref renaming,
            } => Arc::new(Dataset::materialize(
                parent,
                extension,
                &self.counters,
                renaming,
                self.lcm_compress,
            )),
        };
        *slot = DatasetSlot::Ready(built.clone());
        self.stealable.store(true, Ordering::Release);
        built
    }

    fn next_candidate(&self) -> Option<usize> {
        loop {
            let candidate = self.cursor.fetch_add(1, Ordering::Relaxed);
            if candidate >= self.counters.max_candidate {
                return None;
            }
            // Erased items keep their slot but are logically absent.
            if self.counters.support(candidate) > 0 {
                return Some(candidate);
            }
        }
    }

    fn record_failed_first_parent(&self, extension: usize, actual: usize) {
        self.failed_first_parents
            .lock()
            .unwrap()
            .insert(extension, actual);
    }

    pub fn failed_first_parents_count(&self) -> usize {
        self.failed_first_parents.lock().unwrap().len()
    }

    // Advances the exploration by one candidate: test, count, report, and
    // either produce a child step or move on. Returns None once the
    // candidate iterator is exhausted.
    pub fn next(&self, collector: &Collector) -> Option<ExplorationStep> {
        let dataset = self.dataset();
        loop {
            let candidate = match self.next_candidate() {
                Some(candidate) => candidate,
                None => return None,
            };

            match self.selectors.select(candidate, self, &dataset, collector) {
                Ok(()) => {}
                Err(Rejection::WrongFirstParent(actual)) => {
                    self.record_failed_first_parent(candidate, actual);
                    continue;
                }
                Err(Rejection::Filtered) => continue,
            }

            let mut child_counters = Counters::count_projection(
                self.counters.min_support,
                &dataset,
                candidate,
                &self.counters,
            );

            // A closure item above the extension means another branch
            // generates this closed pattern; not an error, just a reject.
            if let Some(actual) = child_counters.wrong_first_parent(candidate) {
                self.record_failed_first_parent(candidate, actual);
                continue;
            }

            // Patterns are reported at construction time, not leaf time.
            collector.collect(child_counters.transactions_count, &child_counters.pattern);

            if let Some(top_k) = collector.top_k() {
                child_counters.raise_minimum_support(top_k);
            }
            if !child_counters.has_candidates() {
                continue;
            }

            let support_rate = child_counters.distinct_transactions_count as f64
                / dataset.stored_transactions_count() as f64;
            let slot = if !dataset.long_transactions_mode() && support_rate >= VIEW_SUPPORT_RATE {
                DatasetSlot::View {
                    parent: dataset.clone(),
                    extension: candidate,
                }
            } else {
                let renaming = child_counters.compress_renaming(true);
                DatasetSlot::Materialize {
                    parent: dataset.clone(),
                    extension: candidate,
                    renaming: renaming,
                }
            };

            return Some(ExplorationStep {
                counters: child_counters,
                core_item: Some(candidate),
                dataset: Mutex::new(slot),
                stealable: AtomicBool::new(false),
                cursor: AtomicUsize::new(0),
                selectors: self.selectors.copy(),
                failed_first_parents: Mutex::new(HashMap::new()),
                lcm_compress: self.lcm_compress,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ExplorationStep;
    use collector::{Collector, VecCollector};
    use selector::{FirstParentTest, Selector};
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    type PatternSet = HashMap<Vec<u32>, u32>;

    // Depth-first drive of a root step, the way a single worker would.
    pub fn mine_sequential(root: ExplorationStep, collector: &Collector) {
        if !root.pattern().is_empty()
            && root.counters.transactions_count >= root.counters.min_support
        {
            collector.collect(root.counters.transactions_count, root.pattern());
        }
        let mut stack: Vec<ExplorationStep> = vec![root];
        loop {
            let child = match stack.last() {
                Some(top) => top.next(collector),
                None => break,
            };
            match child {
                Some(child) => stack.push(child),
                None => {
                    stack.pop();
                }
            }
        }
    }

    fn mine_to_set(transactions: &[Vec<u32>], min_support: u32, lcm_compress: bool) -> PatternSet {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let collector = Collector::Flat(Box::new(VecCollector::new(sink.clone())));
        let mut root = ExplorationStep::from_transactions(min_support, transactions, lcm_compress);
        root.append_selector(Box::new(FirstParentTest::new()));
        mine_sequential(root, &collector);

        let mut patterns = PatternSet::new();
        for (support, mut pattern) in sink.lock().unwrap().drain(..) {
            pattern.sort_unstable();
            let duplicate = patterns.insert(pattern, support);
            assert!(duplicate.is_none(), "duplicate closed pattern reported");
        }
        patterns
    }

    // Reference implementation: enumerate every itemset and keep the
    // frequent ones no superset matches in support.
    fn brute_force_closed(transactions: &[Vec<u32>], min_support: u32) -> PatternSet {
        let mut items: Vec<u32> = Vec::new();
        for transaction in transactions {
            for &item in transaction {
                if !items.contains(&item) {
                    items.push(item);
                }
            }
        }
        items.sort_unstable();
        assert!(items.len() <= 16);

        let support_of = |subset: &[u32]| -> u32 {
            transactions
                .iter()
                .filter(|t| subset.iter().all(|item| t.contains(item)))
                .count() as u32
        };

        let mut closed = PatternSet::new();
        for mask in 1u32..(1 << items.len()) {
            let subset: Vec<u32> = (0..items.len())
                .filter(|&i| mask & (1 << i) != 0)
                .map(|i| items[i])
                .collect();
            let support = support_of(&subset);
            if support < min_support {
                continue;
            }
            let is_closed = items.iter().all(|item| {
                if subset.contains(item) {
                    return true;
                }
                let mut superset = subset.clone();
                superset.push(*item);
                support_of(&superset) < support
            });
            if is_closed {
                closed.insert(subset, support);
            }
        }
        closed
    }

    #[test]
    fn test_known_closed_patterns() {
        let transactions = vec![vec![1, 2, 3], vec![1, 2], vec![1, 2, 4], vec![2, 3]];
        let patterns = mine_to_set(&transactions, 2, false);

        let mut expected = PatternSet::new();
        expected.insert(vec![2], 4);
        expected.insert(vec![1, 2], 3);
        expected.insert(vec![2, 3], 2);
        assert_eq!(patterns, expected);
    }

    #[test]
    fn test_matches_brute_force() {
        // Census-style database, small enough for the exhaustive check.
        let transactions = vec![
            vec![1, 2, 3],
            vec![4, 2, 3],
            vec![1, 2, 5],
            vec![6, 7, 3],
            vec![4, 7, 5],
            vec![6, 2, 3],
            vec![6, 2, 3],
            vec![1, 2, 5],
            vec![1, 2, 3],
            vec![1, 2, 5],
            vec![1, 2, 5],
        ];
        for min_support in 1..5 {
            let mined = mine_to_set(&transactions, min_support, false);
            let expected = brute_force_closed(&transactions, min_support);
            assert_eq!(mined, expected, "minsup {}", min_support);
        }
    }

    #[test]
    fn test_database_reduction_is_lossless() {
        let transactions = vec![
            vec![1, 2, 3],
            vec![4, 2, 3],
            vec![1, 2, 5],
            vec![6, 7, 3],
            vec![4, 7, 5],
            vec![6, 2, 3],
            vec![6, 2, 3],
            vec![1, 2, 5],
            vec![1, 2, 3],
        ];
        for min_support in 1..4 {
            let plain = mine_to_set(&transactions, min_support, false);
            let compressed = mine_to_set(&transactions, min_support, true);
            assert_eq!(plain, compressed, "minsup {}", min_support);
        }
    }

    #[test]
    fn test_wrong_first_parent_is_recorded_not_fatal() {
        // Item 1's occurrences are included in item 2's, so extending
        // with the more frequent renamed id first must be rejected and
        // attributed to the other branch.
        let transactions = vec![vec![1, 2], vec![1, 2], vec![3]];
        let sink = Arc::new(Mutex::new(Vec::new()));
        let collector = Collector::Flat(Box::new(VecCollector::new(sink.clone())));
        let mut root = ExplorationStep::from_transactions(1, &transactions, false);
        let test = FirstParentTest::new();
        // Chain copies share the rejection counter; keep a probe.
        let probe = test.box_clone();
        root.append_selector(Box::new(test));

        mine_sequential(root, &collector);
        assert_eq!(probe.rejections(), 1);

        let mut patterns: HashSet<Vec<u32>> = HashSet::new();
        for (_, mut pattern) in sink.lock().unwrap().drain(..) {
            pattern.sort_unstable();
            assert!(patterns.insert(pattern));
        }
        let expected: HashSet<Vec<u32>> =
            [vec![1, 2], vec![3]].iter().cloned().collect();
        assert_eq!(patterns, expected);
    }

    #[test]
    fn test_high_support_rate_projection_shares_parent_storage() {
        // Items 1, 2, 3 rename to 0, 1, 2. Only renamed item 2 spawns a
        // child; its projection retains 3 of 5 stored transactions, well
        // above the view threshold.
        let transactions = vec![
            vec![1, 2, 3],
            vec![1, 2, 3],
            vec![1, 2],
            vec![1],
            vec![3],
        ];
        let sink = Arc::new(Mutex::new(Vec::new()));
        let collector = Collector::Flat(Box::new(VecCollector::new(sink)));
        let mut root = ExplorationStep::from_transactions(2, &transactions, false);
        root.append_selector(Box::new(FirstParentTest::new()));

        let child = root.next(&collector).expect("renamed item 2 spawns a child");
        assert_eq!(child.core_item, Some(2));
        // A view keeps the parent's renamed space: shared reverse map,
        // candidate bound at the extension.
        assert!(Arc::ptr_eq(
            &root.counters.reverse_renaming,
            &child.counters.reverse_renaming
        ));
        assert_eq!(child.counters.max_candidate, 2);
    }

    #[test]
    fn test_long_transactions_parent_materializes_children() {
        // Same shape as the view test, with the second and third items
        // blown up into 2500-item blocks so the stored transactions
        // average 3000 items: the root dataset runs in long-transactions
        // mode and must materialize despite the 0.6 support rate.
        let first = 1u32;
        let second_block: Vec<u32> = (10..2510).collect();
        let third_block: Vec<u32> = (2510..5010).collect();
        let mut all = vec![first];
        all.extend_from_slice(&second_block);
        all.extend_from_slice(&third_block);
        let mut first_and_second = vec![first];
        first_and_second.extend_from_slice(&second_block);
        let transactions = vec![
            all.clone(),
            all,
            first_and_second,
            vec![first],
            third_block,
        ];
        let sink = Arc::new(Mutex::new(Vec::new()));
        let collector = Collector::Flat(Box::new(VecCollector::new(sink)));
        let mut root = ExplorationStep::from_transactions(2, &transactions, false);
        root.append_selector(Box::new(FirstParentTest::new()));

        // The only child comes from the last renamed item of the third
        // block; everything else is rejected or closes without candidates.
        let child = root.next(&collector).expect("one candidate spawns a child");
        assert_eq!(child.core_item, Some(5000));
        // Materialized: compacted renaming (2501 surviving candidates:
        // the first item plus the second block), fresh reverse map,
        // closure folded away.
        assert!(child.counters.closure.is_empty());
        assert_eq!(child.counters.max_candidate, 2501);
        assert!(!Arc::ptr_eq(
            &root.counters.reverse_renaming,
            &child.counters.reverse_renaming
        ));
    }

    #[test]
    fn test_anti_monotone_supports() {
        let transactions = vec![
            vec![1, 2, 3, 4],
            vec![1, 2, 3],
            vec![1, 2],
            vec![2, 3, 4],
            vec![1, 3, 4],
        ];
        let sink = Arc::new(Mutex::new(Vec::new()));
        let collector = Collector::Flat(Box::new(VecCollector::new(sink)));
        let root = ExplorationStep::from_transactions(2, &transactions, false);

        let mut stack: Vec<ExplorationStep> = vec![root];
        loop {
            let child = match stack.last() {
                Some(top) => top.next(&collector),
                None => break,
            };
            match child {
                Some(child) => {
                    let parent_count = stack.last().unwrap().counters.transactions_count;
                    assert!(child.counters.transactions_count <= parent_count);
                    assert!(child.counters.transactions_count >= 2);
                    stack.push(child);
                }
                None => {
                    stack.pop();
                }
            }
        }
    }
}
