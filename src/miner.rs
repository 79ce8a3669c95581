use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use collector::Collector;
use exploration_step::ExplorationStep;

pub struct MiningStats {
    pub steal_count: u64,
}

struct Shared {
    // One deque per worker. Only the owner pushes or pops; thieves take
    // read locks and clone Arcs, so a stolen step keeps living in the
    // victim's stack until its owner finds it exhausted.
    stacks: Vec<RwLock<Vec<Arc<ExplorationStep>>>>,
    // Workers holding a step (possibly about to push a child). Quiescence
    // is "no stack has a step and nobody is working".
    working: AtomicUsize,
    stop: AtomicBool,
    steal_count: AtomicU64,
    collector: Arc<Collector>,
}

// A worker that unwinds must not leave the others spinning forever on a
// stack that will never drain.
struct StopOnPanic<'a> {
    stop: &'a AtomicBool,
}

impl<'a> Drop for StopOnPanic<'a> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.stop.store(true, Ordering::SeqCst);
        }
    }
}

// Stolen steps come from the bottom of a victim's stack: those are the
// shallowest patterns, hence the largest unexplored subtrees. Deferred
// datasets are skipped, their instantiation needs the owner's first call.
fn steal(shared: &Shared, me: usize) -> Option<Arc<ExplorationStep>> {
    for offset in 1..shared.stacks.len() {
        let victim = (me + offset) % shared.stacks.len();
        let stack = shared.stacks[victim].read().unwrap();
        for step in stack.iter() {
            if step.is_stealable() {
                return Some(step.clone());
            }
        }
    }
    None
}

fn quiescent(shared: &Shared) -> bool {
    if shared.working.load(Ordering::SeqCst) != 0 {
        return false;
    }
    for stack in shared.stacks.iter() {
        if !stack.read().unwrap().is_empty() {
            return false;
        }
    }
    // Stacks only gain steps from a working thread, so this re-check
    // pins down that none appeared while we were scanning.
    shared.working.load(Ordering::SeqCst) == 0
}

fn work(shared: &Shared, me: usize) {
    let _guard = StopOnPanic { stop: &shared.stop };
    loop {
        if shared.stop.load(Ordering::Relaxed) {
            return;
        }

        shared.working.fetch_add(1, Ordering::SeqCst);

        let own = shared.stacks[me].read().unwrap().last().cloned();
        if let Some(step) = own {
            match step.next(&shared.collector) {
                Some(child) => {
                    shared.stacks[me].write().unwrap().push(Arc::new(child));
                }
                None => {
                    // Exhausted. Nobody else pops this stack, so the top
                    // is still the step we just drained.
                    shared.stacks[me].write().unwrap().pop();
                }
            }
            shared.working.fetch_sub(1, Ordering::SeqCst);
            continue;
        }

        if let Some(stolen) = steal(shared, me) {
            shared.steal_count.fetch_add(1, Ordering::Relaxed);
            if let Some(child) = stolen.next(&shared.collector) {
                shared.stacks[me].write().unwrap().push(Arc::new(child));
            }
            shared.working.fetch_sub(1, Ordering::SeqCst);
            continue;
        }

        shared.working.fetch_sub(1, Ordering::SeqCst);
        if quiescent(shared) {
            return;
        }
        thread::yield_now();
    }
}

pub struct Miner {
    threads: usize,
}

impl Miner {
    pub fn new(threads: usize) -> Miner {
        assert!(threads > 0);
        Miner { threads: threads }
    }

    // Drains the exploration tree rooted at `root` into the collector.
    // The caller keeps its Arcs, so per-run statistics (selector
    // rejections, collected counts) stay reachable after mining.
    pub fn mine(
        &self,
        root: Arc<ExplorationStep>,
        collector: &Arc<Collector>,
    ) -> Result<MiningStats, String> {
        // The empty pattern is never closed once an item reaches 100%
        // support; its closure is reported here, before any extension.
        // When the whole database falls short of the threshold even the
        // root closure stays below minimum support and nothing is emitted.
        if !root.pattern().is_empty()
            && root.counters.transactions_count >= root.counters.min_support
        {
            collector.collect(root.counters.transactions_count, root.pattern());
        }

        let shared = Arc::new(Shared {
            stacks: (0..self.threads).map(|_| RwLock::new(Vec::new())).collect(),
            working: AtomicUsize::new(0),
            stop: AtomicBool::new(false),
            steal_count: AtomicU64::new(0),
            collector: collector.clone(),
        });
        shared.stacks[0].write().unwrap().push(root);

        let mut handles = Vec::with_capacity(self.threads);
        for id in 0..self.threads {
            let shared = shared.clone();
            handles.push(thread::spawn(move || work(&shared, id)));
        }
        let mut failed = false;
        for handle in handles {
            failed |= handle.join().is_err();
        }
        if failed {
            return Err("a mining thread panicked".to_owned());
        }
        Ok(MiningStats {
            steal_count: shared.steal_count.load(Ordering::Relaxed),
        })
    }
}
