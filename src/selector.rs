use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use collector::Collector;
use dataset::{is_tid_subset, Dataset};
use exploration_step::ExplorationStep;

// Expected, frequent rejection outcomes; not errors.
pub enum Rejection {
    // A filter decided the extension cannot contribute anything.
    Filtered,
    // The extension's closure would be generated first from this larger
    // item; retrying is pointless, the other branch will get there.
    WrongFirstParent(usize),
}

// A pruning predicate evaluated before committing to extend a pattern.
// Selectors are stateless apart from their shared rejection counter, so
// sibling branches can carry independent chain copies without cross-talk.
pub trait Selector: Send + Sync {
    fn allow_exploration(
        &self,
        extension: usize,
        step: &ExplorationStep,
        dataset: &Dataset,
        collector: &Collector,
    ) -> Result<(), Rejection>;

    fn box_clone(&self) -> Box<dyn Selector>;

    fn name(&self) -> &'static str;

    fn rejections(&self) -> u64;
}

// Short-circuit chain, copied (not shared) across sibling branches.
pub struct SelectorChain {
    selectors: Vec<Box<dyn Selector>>,
}

impl SelectorChain {
    pub fn new() -> SelectorChain {
        SelectorChain {
            selectors: Vec::new(),
        }
    }

    pub fn append(&mut self, selector: Box<dyn Selector>) {
        self.selectors.push(selector);
    }

    pub fn select(
        &self,
        extension: usize,
        step: &ExplorationStep,
        dataset: &Dataset,
        collector: &Collector,
    ) -> Result<(), Rejection> {
        for selector in self.selectors.iter() {
            selector.allow_exploration(extension, step, dataset, collector)?;
        }
        Ok(())
    }

    pub fn copy(&self) -> SelectorChain {
        SelectorChain {
            selectors: self.selectors.iter().map(|s| s.box_clone()).collect(),
        }
    }

    pub fn rejection_counts(&self) -> Vec<(&'static str, u64)> {
        self.selectors
            .iter()
            .map(|s| (s.name(), s.rejections()))
            .collect()
    }
}

// The LCM prefix-preservation test, run predictively (before counting the
// candidate's projection): extension e is not a first parent if its
// occurrence list is included in that of some item j > e, since j would
// then sit at 100% support in e's projection. The post-counting closure
// check in ExplorationStep::next agrees with this by construction; this
// test just fails faster.
pub struct FirstParentTest {
    rejections: Arc<AtomicU64>,
}

impl FirstParentTest {
    pub fn new() -> FirstParentTest {
        FirstParentTest {
            rejections: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Selector for FirstParentTest {
    fn allow_exploration(
        &self,
        extension: usize,
        step: &ExplorationStep,
        dataset: &Dataset,
        _collector: &Collector,
    ) -> Result<(), Rejection> {
        let extension_support = step.counters.support(extension);
        let extension_tids = dataset.tids(extension);
        for detector in extension + 1..step.counters.max_frequent + 1 {
            // Inclusion requires at least as much support; cheap pre-filter.
            if step.counters.support(detector) < extension_support {
                continue;
            }
            if is_tid_subset(extension_tids, dataset.tids(detector)) {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                return Err(Rejection::WrongFirstParent(detector));
            }
        }
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn Selector> {
        Box::new(FirstParentTest {
            rejections: self.rejections.clone(),
        })
    }

    fn name(&self) -> &'static str {
        "first-parent test"
    }

    fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }
}

// Top-K bound test: reject an extension when every item a pattern from
// its subtree could contain already holds K patterns better than the
// extension's support. Wired in through this extension point only; the
// core knows nothing else about top-K mining.
pub struct TopKBoundTest {
    rejections: Arc<AtomicU64>,
}

impl TopKBoundTest {
    pub fn new() -> TopKBoundTest {
        TopKBoundTest {
            rejections: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Selector for TopKBoundTest {
    fn allow_exploration(
        &self,
        extension: usize,
        step: &ExplorationStep,
        _dataset: &Dataset,
        collector: &Collector,
    ) -> Result<(), Rejection> {
        let top_k = match collector.top_k() {
            Some(top_k) => top_k,
            None => return Ok(()),
        };
        let support = step.counters.support(extension);

        // Patterns discovered below this extension can only contain the
        // current pattern's items, the extension, and smaller candidates.
        for &item in step.counters.pattern.iter() {
            if top_k.bound_of(item) <= support {
                return Ok(());
            }
        }
        for candidate in 0..extension + 1 {
            if step.counters.support(candidate) == 0 {
                continue;
            }
            let original = step.counters.reverse_renaming[candidate];
            if top_k.bound_of(original) <= support {
                return Ok(());
            }
        }

        self.rejections.fetch_add(1, Ordering::Relaxed);
        Err(Rejection::Filtered)
    }

    fn box_clone(&self) -> Box<dyn Selector> {
        Box::new(TopKBoundTest {
            rejections: self.rejections.clone(),
        })
    }

    fn name(&self) -> &'static str {
        "top-k bound test"
    }

    fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }
}
