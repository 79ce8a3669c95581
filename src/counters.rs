use rayon::prelude::*;
use std::cmp::min;
use std::collections::HashMap;
use std::sync::Arc;

use collector::PerItemTopKCollector;
use dataset::Dataset;

// Item-space size beyond which projection counting switches from a flat
// array to a hash map.
pub const SPARSE_COUNTS_THRESHOLD: usize = 1 << 16;

// Per-item support counts in the renamed item space. Dense for the common
// case (small, compacted spaces); sparse for projections counted in a huge
// inherited space.
enum SupportCounts {
    Dense(Vec<u32>),
    Sparse(HashMap<usize, u32>),
}

impl SupportCounts {
    fn with_space(space: usize) -> SupportCounts {
        if space > SPARSE_COUNTS_THRESHOLD {
            SupportCounts::Sparse(HashMap::new())
        } else {
            SupportCounts::Dense(vec![0; space])
        }
    }

    fn get(&self, item: usize) -> u32 {
        match *self {
            SupportCounts::Dense(ref counts) => counts[item],
            SupportCounts::Sparse(ref counts) => *counts.get(&item).unwrap_or(&0),
        }
    }

    fn add(&mut self, item: usize, weight: u32) {
        match *self {
            SupportCounts::Dense(ref mut counts) => counts[item] += weight,
            SupportCounts::Sparse(ref mut counts) => {
                *counts.entry(item).or_insert(0) += weight;
            }
        }
    }

    fn erase(&mut self, item: usize) {
        match *self {
            SupportCounts::Dense(ref mut counts) => counts[item] = 0,
            SupportCounts::Sparse(ref mut counts) => {
                counts.remove(&item);
            }
        }
    }

    // Items with a non-zero count, in ascending order.
    fn nonzero_items(&self) -> Vec<usize> {
        match *self {
            SupportCounts::Dense(ref counts) => (0..counts.len())
                .filter(|&i| counts[i] > 0)
                .collect(),
            SupportCounts::Sparse(ref counts) => {
                let mut items: Vec<usize> =
                    counts.iter().filter(|&(_, &c)| c > 0).map(|(&i, _)| i).collect();
                items.sort_unstable();
                items
            }
        }
    }
}

// Single-pass item statistics for one recursion step. Immutable once the
// owning ExplorationStep is published to the scheduler.
//
// Invariant: for every surviving item i,
//   min_support <= support(i) < transactions_count;
// items at 100% support were folded into `pattern`, items below the
// threshold were erased.
pub struct Counters {
    pub min_support: u32,
    // Weighted and unweighted transaction totals counted in this step.
    pub transactions_count: u32,
    pub distinct_transactions_count: u32,
    supports: SupportCounts,
    distinct_supports: SupportCounts,
    // Renamed ids found at 100% support by this projection. Empty for the
    // initial pass, whose closure goes straight into `pattern`, and
    // cleared by renaming compaction.
    pub closure: Vec<usize>,
    // The closed pattern under construction, in original item-ID space.
    pub pattern: Vec<u32>,
    pub nb_frequents: usize,
    // Highest renamed id with a non-zero support; 0 when nb_frequents == 0.
    pub max_frequent: usize,
    // Candidate extensions are the renamed ids below this bound.
    pub max_candidate: usize,
    // Renamed id -> original item ID.
    pub reverse_renaming: Arc<Vec<u32>>,
}

impl Counters {
    // First pass over the raw database. Items present in every transaction
    // form the root pattern's closure; surviving items are renamed to
    // 0..nb_frequents by descending support (ties by ascending original
    // ID), so renamed item 0 is the globally most frequent one. Returns
    // the original-ID -> renamed-ID map (-1 for dropped items) used to
    // rewrite the initial dataset.
    pub fn initial(min_support: u32, transactions: &[Vec<u32>]) -> (Counters, Vec<i32>) {
        let item_counts: HashMap<u32, u32> = transactions
            .par_iter()
            .fold(HashMap::new, |mut counts, transaction| {
                for &item in transaction.iter() {
                    *counts.entry(item).or_insert(0) += 1;
                }
                counts
            })
            .reduce(HashMap::new, |mut counts, partial| {
                for (item, count) in partial {
                    *counts.entry(item).or_insert(0) += count;
                }
                counts
            });

        let transactions_count = transactions.len() as u32;
        let max_item = item_counts.keys().cloned().max().unwrap_or(0) as usize;
        let mut renaming = vec![-1i32; max_item + 1];

        let mut pattern: Vec<u32> = Vec::new();
        let mut frequent: Vec<(u32, u32)> = Vec::new();
        for (&item, &count) in item_counts.iter() {
            if count == transactions_count {
                pattern.push(item);
            } else if count >= min_support {
                frequent.push((item, count));
            }
        }
        pattern.sort_unstable();
        frequent.sort_by(|&(item_a, count_a), &(item_b, count_b)| {
            count_b.cmp(&count_a).then(item_a.cmp(&item_b))
        });

        let mut supports = vec![0u32; frequent.len()];
        let mut reverse_renaming = vec![0u32; frequent.len()];
        for (rank, &(item, count)) in frequent.iter().enumerate() {
            renaming[item as usize] = rank as i32;
            reverse_renaming[rank] = item;
            supports[rank] = count;
        }

        let nb_frequents = frequent.len();
        let counters = Counters {
            min_support: min_support,
            transactions_count: transactions_count,
            distinct_transactions_count: transactions_count,
            // All weights are 1 at load time.
            supports: SupportCounts::Dense(supports.clone()),
            distinct_supports: SupportCounts::Dense(supports),
            closure: Vec::new(),
            pattern: pattern,
            nb_frequents: nb_frequents,
            max_frequent: nb_frequents.saturating_sub(1),
            max_candidate: nb_frequents,
            reverse_renaming: Arc::new(reverse_renaming),
        };
        (counters, renaming)
    }

    // Projection on `extension`: recount supports over the transactions
    // containing it, extract this step's closure, erase infrequent items,
    // and extend the parent's pattern. The result lives in the parent's
    // renamed space until compress_renaming is applied.
    pub fn count_projection(
        min_support: u32,
        dataset: &Dataset,
        extension: usize,
        parent: &Counters,
    ) -> Counters {
        let space = parent.max_frequent + 1;
        let mut supports = SupportCounts::with_space(space);
        let mut distinct_supports = SupportCounts::with_space(space);
        let mut transactions_count = 0u32;
        let mut distinct_transactions_count = 0u32;

        for (weight, items) in dataset.occurrences(extension) {
            transactions_count += weight;
            distinct_transactions_count += 1;
            for item in items {
                let item = item as usize;
                if item == extension {
                    continue;
                }
                // A view shares its parent's raw storage, so transactions
                // may still carry ids above this step's space; those items
                // were erased (support 0 at the parent) and stay out.
                if item >= space {
                    continue;
                }
                supports.add(item, weight);
                distinct_supports.add(item, 1);
            }
        }
        for &ignored in dataset.ignored_items() {
            supports.erase(ignored as usize);
            distinct_supports.erase(ignored as usize);
        }

        let mut closure: Vec<usize> = Vec::new();
        let mut nb_frequents = 0;
        let mut max_frequent = 0;
        for item in supports.nonzero_items() {
            let support = supports.get(item);
            if support == transactions_count {
                closure.push(item);
                supports.erase(item);
                distinct_supports.erase(item);
            } else if support < min_support {
                supports.erase(item);
                distinct_supports.erase(item);
            } else {
                nb_frequents += 1;
                max_frequent = item;
            }
        }

        let mut pattern = parent.pattern.clone();
        pattern.push(parent.reverse_renaming[extension]);
        for &item in closure.iter() {
            pattern.push(parent.reverse_renaming[item]);
        }

        Counters {
            min_support: min_support,
            transactions_count: transactions_count,
            distinct_transactions_count: distinct_transactions_count,
            supports: supports,
            distinct_supports: distinct_supports,
            closure: closure,
            pattern: pattern,
            nb_frequents: nb_frequents,
            max_frequent: max_frequent,
            max_candidate: extension,
            reverse_renaming: parent.reverse_renaming.clone(),
        }
    }

    pub fn support(&self, item: usize) -> u32 {
        self.supports.get(item)
    }

    pub fn distinct_support(&self, item: usize) -> u32 {
        self.distinct_supports.get(item)
    }

    // Surviving items in ascending renamed order.
    pub fn frequent_items(&self) -> Vec<usize> {
        self.supports.nonzero_items()
    }

    pub fn has_candidates(&self) -> bool {
        (0..self.max_candidate).any(|item| self.supports.get(item) > 0)
    }

    // The closure item proving `extension` is not a first parent, if any.
    // Closure ids are ascending, so checking the last one is enough.
    pub fn wrong_first_parent(&self, extension: usize) -> Option<usize> {
        match self.closure.last() {
            Some(&item) if item > extension => Some(item),
            _ => None,
        }
    }

    // Rewrites the surviving-item space into a dense 0..nb_frequents
    // range: candidates first (re-sorted by descending support when
    // `sort_candidates` is set, which improves the first-parent test's
    // early exit rate), then the remaining items in their old order.
    // Returns the old-id -> new-id map (-1 for erased items); the caller
    // must rewrite the about-to-be-built dataset with the same map.
    pub fn compress_renaming(&mut self, sort_candidates: bool) -> Vec<i32> {
        let space = if self.nb_frequents == 0 {
            0
        } else {
            self.max_frequent + 1
        };
        let mut renaming = vec![-1i32; space];

        let survivors = self.supports.nonzero_items();
        let mut candidates: Vec<usize> = Vec::new();
        let mut detectors: Vec<usize> = Vec::new();
        for item in survivors {
            if item < self.max_candidate {
                candidates.push(item);
            } else {
                detectors.push(item);
            }
        }
        if sort_candidates {
            let supports = &self.supports;
            candidates.sort_by(|&a, &b| {
                supports.get(b).cmp(&supports.get(a)).then(a.cmp(&b))
            });
        }

        let total = candidates.len() + detectors.len();
        let mut new_supports = vec![0u32; total];
        let mut new_distinct = vec![0u32; total];
        let mut new_reverse = Vec::with_capacity(total);
        for (new_id, &old_id) in candidates.iter().chain(detectors.iter()).enumerate() {
            renaming[old_id] = new_id as i32;
            new_supports[new_id] = self.supports.get(old_id);
            new_distinct[new_id] = self.distinct_supports.get(old_id);
            new_reverse.push(self.reverse_renaming[old_id]);
        }

        self.supports = SupportCounts::Dense(new_supports);
        self.distinct_supports = SupportCounts::Dense(new_distinct);
        self.max_candidate = candidates.len();
        self.nb_frequents = total;
        self.max_frequent = total.saturating_sub(1);
        self.reverse_renaming = Arc::new(new_reverse);
        // Closure ids belong to the old space; their translation is
        // already folded into `pattern`.
        self.closure.clear();
        renaming
    }

    // Epsilon raising: adopt the smallest top-K rejection bound over the
    // pattern's items and the remaining candidates, when it exceeds this
    // step's threshold, then erase every item falling below it. Returns
    // whether anything was pruned.
    pub fn raise_minimum_support(&mut self, collector: &PerItemTopKCollector) -> bool {
        let mut bound = u32::max_value();
        for &item in self.pattern.iter() {
            bound = min(bound, collector.bound_of(item));
        }
        for item in 0..self.max_candidate {
            if self.supports.get(item) > 0 {
                bound = min(bound, collector.bound_of(self.reverse_renaming[item]));
            }
        }
        if bound == u32::max_value() || bound <= self.min_support {
            return false;
        }

        self.min_support = bound;
        let mut nb_frequents = 0;
        let mut max_frequent = 0;
        for item in self.supports.nonzero_items() {
            if self.supports.get(item) < bound {
                self.supports.erase(item);
                self.distinct_supports.erase(item);
            } else {
                nb_frequents += 1;
                max_frequent = item;
            }
        }
        self.nb_frequents = nb_frequents;
        self.max_frequent = if nb_frequents == 0 { 0 } else { max_frequent };
        true
    }
}
