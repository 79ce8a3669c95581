use itertools::Itertools;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[cfg(test)]
use std::sync::Arc;

// Terminal sink for discovered patterns. `collect` is called once per
// closed pattern, from many worker threads at once.
pub trait PatternsCollector: Send + Sync {
    fn collect(&self, support: u32, pattern: &[u32]);

    // Flushes and returns the number of collected patterns.
    fn close(self: Box<Self>) -> usize;

    fn average_pattern_length(&self) -> usize;
}

pub struct FileCollector {
    output: Mutex<BufWriter<File>>,
    collected: AtomicUsize,
    collected_length: AtomicUsize,
}

impl FileCollector {
    pub fn create(path: &str) -> Result<FileCollector, String> {
        let file = match File::create(path) {
            Ok(file) => file,
            Err(e) => return Err(format!("Cannot create {}: {}", path, e)),
        };
        Ok(FileCollector {
            output: Mutex::new(BufWriter::new(file)),
            collected: AtomicUsize::new(0),
            collected_length: AtomicUsize::new(0),
        })
    }
}

impl PatternsCollector for FileCollector {
    fn collect(&self, support: u32, pattern: &[u32]) {
        self.collected.fetch_add(1, Ordering::Relaxed);
        self.collected_length
            .fetch_add(pattern.len(), Ordering::Relaxed);
        let mut output = self.output.lock().unwrap();
        writeln!(
            output,
            "{}\t{}",
            support,
            pattern.iter().sorted().join(" ")
        ).expect("Failed writing pattern");
    }

    fn close(self: Box<Self>) -> usize {
        self.output
            .lock()
            .unwrap()
            .flush()
            .expect("Failed flushing patterns");
        self.collected.load(Ordering::Relaxed)
    }

    fn average_pattern_length(&self) -> usize {
        let collected = self.collected.load(Ordering::Relaxed);
        if collected == 0 {
            0
        } else {
            self.collected_length.load(Ordering::Relaxed) / collected
        }
    }
}

pub struct StdOutCollector {
    output: io::Stdout,
    collected: AtomicUsize,
    collected_length: AtomicUsize,
}

impl StdOutCollector {
    pub fn new() -> StdOutCollector {
        StdOutCollector {
            output: io::stdout(),
            collected: AtomicUsize::new(0),
            collected_length: AtomicUsize::new(0),
        }
    }
}

impl PatternsCollector for StdOutCollector {
    fn collect(&self, support: u32, pattern: &[u32]) {
        self.collected.fetch_add(1, Ordering::Relaxed);
        self.collected_length
            .fetch_add(pattern.len(), Ordering::Relaxed);
        let mut output = self.output.lock();
        writeln!(
            output,
            "{}\t{}",
            support,
            pattern.iter().sorted().join(" ")
        ).expect("Failed writing pattern");
    }

    fn close(self: Box<Self>) -> usize {
        self.output.lock().flush().expect("Failed flushing stdout");
        self.collected.load(Ordering::Relaxed)
    }

    fn average_pattern_length(&self) -> usize {
        let collected = self.collected.load(Ordering::Relaxed);
        if collected == 0 {
            0
        } else {
            self.collected_length.load(Ordering::Relaxed) / collected
        }
    }
}

struct TopEntry {
    support: u32,
    // Stored sorted so the tie-break order is well defined.
    pattern: Vec<u32>,
}

// Is `entry` worse than the incoming (support, pattern)? Total order:
// higher support wins, ties go to the lexicographically smaller pattern.
// Fixing this order makes the kept set a pure function of the discovered
// patterns, independent of arrival order and thread count.
fn worse_than(entry: &TopEntry, support: u32, pattern: &[u32]) -> bool {
    entry.support < support || (entry.support == support && &entry.pattern[..] > pattern)
}

// For every tracked item, the K best-supported closed patterns containing
// it, each array sorted worst-first. This is the only mutable structure
// shared across exploration branches, hence one lock per item.
pub struct PerItemTopKCollector {
    k: usize,
    min_support: u32,
    tops: HashMap<u32, Mutex<Vec<TopEntry>>>,
    decorated: Box<dyn PatternsCollector>,
    collected: AtomicUsize,
    collected_length: AtomicUsize,
}

impl PerItemTopKCollector {
    pub fn new(
        k: usize,
        min_support: u32,
        tracked_items: &[u32],
        decorated: Box<dyn PatternsCollector>,
    ) -> PerItemTopKCollector {
        let mut tops = HashMap::with_capacity(tracked_items.len());
        for &item in tracked_items.iter() {
            tops.insert(item, Mutex::new(Vec::with_capacity(k)));
        }
        PerItemTopKCollector {
            k: k,
            min_support: min_support,
            tops: tops,
            decorated: decorated,
            collected: AtomicUsize::new(0),
            collected_length: AtomicUsize::new(0),
        }
    }

    pub fn collect(&self, support: u32, pattern: &[u32]) {
        self.collected.fetch_add(1, Ordering::Relaxed);
        self.collected_length
            .fetch_add(pattern.len(), Ordering::Relaxed);
        let mut sorted = pattern.to_vec();
        sorted.sort_unstable();
        for &item in sorted.iter() {
            if let Some(entries) = self.tops.get(&item) {
                self.insert(&mut entries.lock().unwrap(), support, &sorted);
            }
        }
    }

    fn insert(&self, entries: &mut Vec<TopEntry>, support: u32, pattern: &[u32]) {
        if entries.len() == self.k {
            if !worse_than(&entries[0], support, pattern) {
                return;
            }
            entries.remove(0);
        }
        let position = entries
            .iter()
            .take_while(|entry| worse_than(entry, support, pattern))
            .count();
        entries.insert(
            position,
            TopEntry {
                support: support,
                pattern: pattern.to_vec(),
            },
        );
    }

    // The support a new pattern containing `item` must beat to be kept:
    // nothing can be rejected until K candidates are known. Non-decreasing
    // over time for any fixed item. Untracked items never receive any
    // pattern, so their bound is unreachable.
    pub fn bound_of(&self, item: u32) -> u32 {
        match self.tops.get(&item) {
            Some(entries) => {
                let entries = entries.lock().unwrap();
                if entries.len() < self.k {
                    self.min_support
                } else {
                    entries[0].support
                }
            }
            None => u32::max_value(),
        }
    }

    // Emits each kept pattern once through the decorated collector,
    // best-supported first, and closes it.
    pub fn close(self) -> usize {
        let mut kept: Vec<(u32, Vec<u32>)> = Vec::new();
        for (_, entries) in self.tops.into_iter() {
            for entry in entries.into_inner().unwrap().into_iter() {
                kept.push((entry.support, entry.pattern));
            }
        }
        kept.par_sort_unstable_by(|&(support_a, ref a), &(support_b, ref b)| {
            support_b.cmp(&support_a).then(a.cmp(b))
        });
        kept.dedup();
        for &(support, ref pattern) in kept.iter() {
            self.decorated.collect(support, pattern);
        }
        self.decorated.close()
    }

    pub fn average_pattern_length(&self) -> usize {
        let collected = self.collected.load(Ordering::Relaxed);
        if collected == 0 {
            0
        } else {
            self.collected_length.load(Ordering::Relaxed) / collected
        }
    }
}

// Dispatch between plain closed-itemset mining and top-K mode; the miner
// core only sees this surface.
pub enum Collector {
    Flat(Box<dyn PatternsCollector>),
    TopK(PerItemTopKCollector),
}

impl Collector {
    pub fn collect(&self, support: u32, pattern: &[u32]) {
        match *self {
            Collector::Flat(ref collector) => collector.collect(support, pattern),
            Collector::TopK(ref collector) => collector.collect(support, pattern),
        }
    }

    pub fn top_k(&self) -> Option<&PerItemTopKCollector> {
        match *self {
            Collector::Flat(_) => None,
            Collector::TopK(ref collector) => Some(collector),
        }
    }

    pub fn average_pattern_length(&self) -> usize {
        match *self {
            Collector::Flat(ref collector) => collector.average_pattern_length(),
            Collector::TopK(ref collector) => collector.average_pattern_length(),
        }
    }

    pub fn close(self) -> usize {
        match self {
            Collector::Flat(collector) => collector.close(),
            Collector::TopK(collector) => collector.close(),
        }
    }
}

// Gathers patterns in memory; the tests' stand-in for the file writers.
#[cfg(test)]
pub struct VecCollector {
    sink: Arc<Mutex<Vec<(u32, Vec<u32>)>>>,
}

#[cfg(test)]
impl VecCollector {
    pub fn new(sink: Arc<Mutex<Vec<(u32, Vec<u32>)>>>) -> VecCollector {
        VecCollector { sink: sink }
    }
}

#[cfg(test)]
impl PatternsCollector for VecCollector {
    fn collect(&self, support: u32, pattern: &[u32]) {
        self.sink.lock().unwrap().push((support, pattern.to_vec()));
    }

    fn close(self: Box<Self>) -> usize {
        self.sink.lock().unwrap().len()
    }

    fn average_pattern_length(&self) -> usize {
        let sink = self.sink.lock().unwrap();
        if sink.is_empty() {
            0
        } else {
            sink.iter().map(|&(_, ref p)| p.len()).sum::<usize>() / sink.len()
        }
    }
}
