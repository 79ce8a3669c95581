use std::sync::Arc;

use counters::Counters;

// Average stored transaction length beyond which a dataset switches to
// long-transactions mode: the first-parent test runs predictively and the
// dataset never spawns views.
pub const LONG_TRANSACTIONS_THRESHOLD: usize = 2000;

// Minimum share of the parent's stored transactions a projection must
// retain for a view to be cheaper than materializing.
pub const VIEW_SUPPORT_RATE: f64 = 0.15;

// Concatenated transaction bodies. The encoding is picked from the item
// range actually stored; the logical contract (sorted item ids plus a
// weight per transaction) is identical across encodings.
enum Bodies {
    U16(Vec<u16>),
    U32(Vec<u32>),
    // LEB128 over item deltas, first item absolute.
    VInt(Vec<u8>),
}

pub struct TransactionsList {
    bodies: Bodies,
    // Per transaction: (start, end) into the bodies buffer.
    ranges: Vec<(u32, u32)>,
    weights: Vec<u32>,
}

fn write_vint(bytes: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            bytes.push(byte);
            return;
        }
        bytes.push(byte | 0x80);
    }
}

impl TransactionsList {
    fn encode(transactions: &[(Vec<u32>, u32)], max_item: u32, long_mode: bool) -> TransactionsList {
        let mut ranges = Vec::with_capacity(transactions.len());
        let mut weights = Vec::with_capacity(transactions.len());

        let bodies = if max_item <= u16::max_value() as u32 {
            let mut items: Vec<u16> = Vec::new();
            for &(ref transaction, weight) in transactions.iter() {
                let start = items.len() as u32;
                for &item in transaction.iter() {
                    items.push(item as u16);
                }
                ranges.push((start, items.len() as u32));
                weights.push(weight);
            }
            Bodies::U16(items)
        } else if long_mode {
            // Long transactions get scanned a lot; keep them flat.
            let mut items: Vec<u32> = Vec::new();
            for &(ref transaction, weight) in transactions.iter() {
                let start = items.len() as u32;
                items.extend_from_slice(transaction);
                ranges.push((start, items.len() as u32));
                weights.push(weight);
            }
            Bodies::U32(items)
        } else {
            let mut bytes: Vec<u8> = Vec::new();
            for &(ref transaction, weight) in transactions.iter() {
                let start = bytes.len() as u32;
                let mut previous = 0u32;
                for (position, &item) in transaction.iter().enumerate() {
                    if position == 0 {
                        write_vint(&mut bytes, item);
                    } else {
                        write_vint(&mut bytes, item - previous);
                    }
                    previous = item;
                }
                ranges.push((start, bytes.len() as u32));
                weights.push(weight);
            }
            Bodies::VInt(bytes)
        };

        TransactionsList {
            bodies: bodies,
            ranges: ranges,
            weights: weights,
        }
    }

    pub fn weight(&self, tid: usize) -> u32 {
        self.weights[tid]
    }

    pub fn items(&self, tid: usize) -> TransactionItems {
        let (start, end) = self.ranges[tid];
        let (start, end) = (start as usize, end as usize);
        match self.bodies {
            Bodies::U16(ref items) => TransactionItems::U16(items[start..end].iter()),
            Bodies::U32(ref items) => TransactionItems::U32(items[start..end].iter()),
            Bodies::VInt(ref bytes) => TransactionItems::VInt {
                bytes: &bytes[start..end],
                position: 0,
                previous: 0,
                first: true,
            },
        }
    }
}

pub enum TransactionItems<'a> {
    U16(::std::slice::Iter<'a, u16>),
    U32(::std::slice::Iter<'a, u32>),
    VInt {
        bytes: &'a [u8],
        position: usize,
        previous: u32,
        first: bool,
    },
}

impl<'a> Iterator for TransactionItems<'a> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        match *self {
            TransactionItems::U16(ref mut iter) => iter.next().map(|&item| item as u32),
            TransactionItems::U32(ref mut iter) => iter.next().cloned(),
            TransactionItems::VInt {
                bytes,
                ref mut position,
                ref mut previous,
                ref mut first,
            } => {
                if *position >= bytes.len() {
                    return None;
                }
                let mut value = 0u32;
                let mut shift = 0;
                loop {
                    let byte = bytes[*position];
                    *position += 1;
                    value |= ((byte & 0x7f) as u32) << shift;
                    if byte & 0x80 == 0 {
                        break;
                    }
                    shift += 7;
                }
                let item = if *first { value } else { *previous + value };
                *first = false;
                *previous = item;
                Some(item)
            }
        }
    }
}

// Per-item occurrence lists, concatenated: tids(i) is the sorted list of
// indices of stored transactions containing item i.
pub struct TidList {
    positions: Vec<u32>,
    bounds: Vec<(u32, u32)>,
}

impl TidList {
    fn builder(counts: Vec<u32>) -> TidListBuilder {
        let mut bounds = Vec::with_capacity(counts.len());
        let mut cursors = Vec::with_capacity(counts.len());
        let mut offset = 0u32;
        for &count in counts.iter() {
            bounds.push((offset, offset + count));
            cursors.push(offset);
            offset += count;
        }
        TidListBuilder {
            positions: vec![0; offset as usize],
            bounds: bounds,
            cursors: cursors,
        }
    }

    pub fn tids(&self, item: usize) -> &[u32] {
        if item >= self.bounds.len() {
            return &[];
        }
        let (start, end) = self.bounds[item];
        &self.positions[start as usize..end as usize]
    }
}

struct TidListBuilder {
    positions: Vec<u32>,
    bounds: Vec<(u32, u32)>,
    cursors: Vec<u32>,
}

impl TidListBuilder {
    // Transactions must be pushed in ascending tid order so each item's
    // list comes out sorted.
    fn push(&mut self, item: usize, tid: u32) {
        let cursor = self.cursors[item];
        self.positions[cursor as usize] = tid;
        self.cursors[item] = cursor + 1;
    }

    fn build(self) -> TidList {
        TidList {
            positions: self.positions,
            bounds: self.bounds,
        }
    }
}

// Merge-scan intersection of two sorted tid lists.
pub fn sorted_intersection(a: &[u32], b: &[u32]) -> Vec<u32> {
    let mut result = Vec::new();
    let mut ap = 0;
    let mut bp = 0;
    while ap < a.len() && bp < b.len() {
        if a[ap] < b[bp] {
            ap += 1;
        } else if b[bp] < a[ap] {
            bp += 1;
        } else {
            result.push(a[ap]);
            ap += 1;
            bp += 1;
        }
    }
    result
}

// Merge-scan inclusion test: is every tid of `a` present in `b`?
pub fn is_tid_subset(a: &[u32], b: &[u32]) -> bool {
    if a.len() > b.len() {
        return false;
    }
    let mut bp = 0;
    for &tid in a.iter() {
        while bp < b.len() && b[bp] < tid {
            bp += 1;
        }
        if bp == b.len() || b[bp] != tid {
            return false;
        }
        bp += 1;
    }
    true
}

// One recursion step's transaction store. Either materialized (owns a
// freshly rewritten TransactionsList) or a view (shares the parent's list
// through the Arc and only owns intersected tid-lists). Read-only once
// built; the Arc keeps a view's backing storage alive for as long as any
// descendant needs it.
pub struct Dataset {
    transactions: Arc<TransactionsList>,
    tidlist: TidList,
    // Renamed ids to skip when counting over shared storage: ancestor
    // extensions and closure items a view could not rewrite away.
    ignored: Vec<u32>,
    stored_transactions_count: usize,
    long_transactions_mode: bool,
}

impl Dataset {
    // Root dataset: rewrite every transaction through the initial
    // renaming, dropping filtered-out items and empty leftovers.
    pub fn initial(counters: &Counters, renaming: &[i32], transactions: &[Vec<u32>]) -> Dataset {
        let mut rewritten: Vec<(Vec<u32>, u32)> = Vec::new();
        for transaction in transactions.iter() {
            let mut items: Vec<u32> = Vec::with_capacity(transaction.len());
            for &item in transaction.iter() {
                let renamed = match renaming.get(item as usize) {
                    Some(&r) => r,
                    None => -1,
                };
                if renamed >= 0 {
                    items.push(renamed as u32);
                }
            }
            if items.is_empty() {
                continue;
            }
            items.sort_unstable();
            rewritten.push((items, 1));
        }
        Dataset::from_rewritten(rewritten, counters.nb_frequents, Vec::new())
    }

    // Materialized projection: copy, rename and re-sort the extension's
    // supporting transactions. `renaming` comes from the child counters'
    // compaction, so erased items and the extension itself map to -1.
    // In strict LCM mode the copied transactions then go through the
    // database-reduction merge.
    pub fn materialize(
        parent: &Dataset,
        extension: usize,
        counters: &Counters,
        renaming: &[i32],
        lcm_compress: bool,
    ) -> Dataset {
        let mut rewritten: Vec<(Vec<u32>, u32)> =
            Vec::with_capacity(counters.distinct_transactions_count as usize);
        for (weight, items) in parent.occurrences(extension) {
            let mut transaction: Vec<u32> = Vec::new();
            for item in items {
                let renamed = match renaming.get(item as usize) {
                    Some(&r) => r,
                    None => -1,
                };
                if renamed >= 0 {
                    transaction.push(renamed as u32);
                }
            }
            if transaction.is_empty() {
                continue;
            }
            transaction.sort_unstable();
            rewritten.push((transaction, weight));
        }

        if lcm_compress {
            compress_merge(&mut rewritten, counters.max_candidate as u32);
        }

        Dataset::from_rewritten(rewritten, counters.nb_frequents, Vec::new())
    }

    // View projection: share the parent's storage and intersect its
    // occurrence lists with the extension's. Kept in the parent's renamed
    // space, so the skip-list accumulates.
    pub fn view(parent: &Dataset, extension: usize, counters: &Counters) -> Dataset {
        let space = if counters.nb_frequents == 0 {
            0
        } else {
            counters.max_frequent + 1
        };
        let mut counts = vec![0u32; space];
        let surviving = counters.frequent_items();
        for &item in surviving.iter() {
            counts[item] = counters.distinct_support(item);
        }

        let mut builder = TidList::builder(counts);
        {
            let extension_tids = parent.tids(extension);
            for &item in surviving.iter() {
                for tid in sorted_intersection(parent.tids(item), extension_tids) {
                    builder.push(item, tid);
                }
            }
        }

        let mut ignored = parent.ignored.clone();
        ignored.push(extension as u32);
        for &item in counters.closure.iter() {
            ignored.push(item as u32);
        }

        Dataset {
            transactions: parent.transactions.clone(),
            tidlist: builder.build(),
            ignored: ignored,
            stored_transactions_count: counters.distinct_transactions_count as usize,
            long_transactions_mode: parent.long_transactions_mode,
        }
    }

    fn from_rewritten(
        transactions: Vec<(Vec<u32>, u32)>,
        space: usize,
        ignored: Vec<u32>,
    ) -> Dataset {
        let mut counts = vec![0u32; space];
        let mut total_items = 0usize;
        let mut max_item = 0u32;
        for &(ref transaction, _) in transactions.iter() {
            total_items += transaction.len();
            for &item in transaction.iter() {
                counts[item as usize] += 1;
                if item > max_item {
                    max_item = item;
                }
            }
        }
        let stored = transactions.len();
        let long_mode = stored > 0 && total_items / stored > LONG_TRANSACTIONS_THRESHOLD;

        let mut builder = TidList::builder(counts);
        for (tid, &(ref transaction, _)) in transactions.iter().enumerate() {
            for &item in transaction.iter() {
                builder.push(item as usize, tid as u32);
            }
        }

        Dataset {
            transactions: Arc::new(TransactionsList::encode(&transactions, max_item, long_mode)),
            tidlist: builder.build(),
            ignored: ignored,
            stored_transactions_count: stored,
            long_transactions_mode: long_mode,
        }
    }

    // Occurrence delivery: every stored transaction containing `item`,
    // as (weight, items) pairs.
    pub fn occurrences(&self, item: usize) -> Occurrences {
        Occurrences {
            transactions: &*self.transactions,
            tids: self.tids(item),
            position: 0,
        }
    }

    pub fn tids(&self, item: usize) -> &[u32] {
        self.tidlist.tids(item)
    }

    pub fn ignored_items(&self) -> &[u32] {
        &self.ignored
    }

    pub fn stored_transactions_count(&self) -> usize {
        self.stored_transactions_count
    }

    pub fn long_transactions_mode(&self) -> bool {
        self.long_transactions_mode
    }
}

pub struct Occurrences<'a> {
    transactions: &'a TransactionsList,
    tids: &'a [u32],
    position: usize,
}

impl<'a> Iterator for Occurrences<'a> {
    type Item = (u32, TransactionItems<'a>);

    fn next(&mut self) -> Option<(u32, TransactionItems<'a>)> {
        if self.position >= self.tids.len() {
            return None;
        }
        let tid = self.tids[self.position] as usize;
        self.position += 1;
        Some((self.transactions.weight(tid), self.transactions.items(tid)))
    }
}

fn split_candidates(items: &[u32], bound: u32) -> usize {
    let mut split = 0;
    while split < items.len() && items[split] < bound {
        split += 1;
    }
    split
}

// LCM database reduction: transactions agreeing on their candidate items
// (ids below `bound`) are merged into one, keeping that part verbatim and
// intersecting the rest, weights summed. Candidate supports stay exact
// because the merged part is identical; the intersected items are only
// ever asked "are you in every transaction here", which intersection
// preserves.
fn compress_merge(transactions: &mut Vec<(Vec<u32>, u32)>, bound: u32) {
    transactions.sort_by(|&(ref a, _), &(ref b, _)| {
        let a_part = &a[..split_candidates(a, bound)];
        let b_part = &b[..split_candidates(b, bound)];
        a_part.cmp(b_part).then(a.cmp(b))
    });

    let mut merged: Vec<(Vec<u32>, u32)> = Vec::new();
    for (items, weight) in transactions.drain(..) {
        let split = split_candidates(&items, bound);
        let mergeable = match merged.last() {
            Some(&(ref last, _)) => {
                let last_split = split_candidates(last, bound);
                last[..last_split] == items[..split]
            }
            None => false,
        };
        if mergeable {
            let &mut (ref mut last, ref mut last_weight) = merged.last_mut().unwrap();
            let last_split = split_candidates(last, bound);
            let mut kept: Vec<u32> = last[..last_split].to_vec();
            kept.extend(sorted_intersection(&last[last_split..], &items[split..]));
            *last = kept;
            *last_weight += weight;
        } else {
            merged.push((items, weight));
        }
    }
    *transactions = merged;
}

#[cfg(test)]
mod tests {
    use super::*;
    use counters::Counters;

    fn example() -> (Counters, Dataset) {
        let transactions = vec![vec![1, 2, 3], vec![1, 2], vec![1, 2, 4], vec![2, 3]];
        let (counters, renaming) = Counters::initial(2, &transactions);
        let dataset = Dataset::initial(&counters, &renaming, &transactions);
        (counters, dataset)
    }

    #[test]
    fn test_initial_tidlists() {
        let (_, dataset) = example();
        // Renamed space: 0 = item 1 (support 3), 1 = item 3 (support 2).
        // Stored transactions: [0 1], [0], [0], [1].
        assert_eq!(dataset.stored_transactions_count(), 4);
        assert_eq!(dataset.tids(0), &[0, 1, 2]);
        assert_eq!(dataset.tids(1), &[0, 3]);
    }

    #[test]
    fn test_occurrence_delivery() {
        let (_, dataset) = example();
        let mut total_weight = 0;
        let mut seen: Vec<Vec<u32>> = Vec::new();
        for (weight, items) in dataset.occurrences(1) {
            total_weight += weight;
            seen.push(items.collect());
        }
        assert_eq!(total_weight, 2);
        assert_eq!(seen, vec![vec![0, 1], vec![1]]);
    }

    #[test]
    fn test_view_intersects_parent_tids() {
        let (counters, dataset) = example();
        // Project with minsup 1 so renamed item 0 (support 1 among the
        // extension's transactions) survives into the view.
        let projected = Counters::count_projection(1, &dataset, 1, &counters);
        let view = Dataset::view(&dataset, 1, &projected);

        // Transactions containing renamed item 1: tids 0 and 3; of those,
        // only tid 0 also has renamed item 0.
        assert_eq!(view.tids(0), &[0]);
        assert_eq!(view.stored_transactions_count(), 2);
        assert!(view.ignored_items().contains(&1));
    }

    #[test]
    fn test_varint_bodies_round_trip() {
        // Force the varint encoding with an item beyond u16 range.
        let big = 1 << 17;
        let transactions: Vec<(Vec<u32>, u32)> = vec![
            (vec![0, 5, big, big + 130], 3),
            (vec![big], 1),
        ];
        let list = TransactionsList::encode(&transactions, big + 130, false);
        let decoded: Vec<u32> = list.items(0).collect();
        assert_eq!(decoded, vec![0, 5, big, big + 130]);
        let decoded: Vec<u32> = list.items(1).collect();
        assert_eq!(decoded, vec![big]);
        assert_eq!(list.weight(0), 3);
    }

    #[test]
    fn test_long_transactions_mode_detection() {
        let items: Vec<u32> = (0..2500).collect();
        let dataset =
            Dataset::from_rewritten(vec![(items.clone(), 1), (items, 2)], 2500, Vec::new());
        assert!(dataset.long_transactions_mode());

        let short: Vec<u32> = (0..10).collect();
        let dataset = Dataset::from_rewritten(vec![(short, 1)], 10, Vec::new());
        assert!(!dataset.long_transactions_mode());
    }

    #[test]
    fn test_u32_bodies_round_trip() {
        // Long mode plus an item beyond u16 range selects flat u32 bodies.
        let big = u16::max_value() as u32 + 10;
        let transactions: Vec<(Vec<u32>, u32)> =
            vec![(vec![3, big, big + 7], 2), (vec![big + 7], 1)];
        let list = TransactionsList::encode(&transactions, big + 7, true);
        match list.bodies {
            Bodies::U32(_) => {}
            _ => panic!("expected u32 bodies"),
        }
        let decoded: Vec<u32> = list.items(0).collect();
        assert_eq!(decoded, vec![3, big, big + 7]);
        let decoded: Vec<u32> = list.items(1).collect();
        assert_eq!(decoded, vec![big + 7]);
        assert_eq!(list.weight(0), 2);
        assert_eq!(list.weight(1), 1);
    }

    #[test]
    fn test_subset_and_intersection() {
        assert!(is_tid_subset(&[1, 4], &[0, 1, 2, 4, 9]));
        assert!(!is_tid_subset(&[1, 3], &[0, 1, 2, 4]));
        assert!(is_tid_subset(&[], &[5]));
        assert_eq!(sorted_intersection(&[1, 3, 5, 7], &[2, 3, 4, 7]), vec![3, 7]);
    }

    #[test]
    fn test_compress_merge_keeps_candidates_exact() {
        // Candidate bound 2: transactions sharing the same items below 2
        // merge; their detector parts intersect.
        let mut transactions = vec![
            (vec![0, 1, 3, 4], 1),
            (vec![0, 1, 3], 2),
            (vec![0, 2, 3], 1),
        ];
        compress_merge(&mut transactions, 2);
        transactions.sort();
        assert_eq!(
            transactions,
            vec![(vec![0, 1, 3], 3), (vec![0, 2, 3], 1)]
        );
    }
}
