extern crate argparse;
extern crate itertools;
extern crate rayon;
#[cfg(test)]
extern crate rand;

mod collector;
mod command_line_args;
mod counters;
mod dataset;
mod exploration_step;
mod miner;
mod selector;
mod transaction_reader;

use collector::Collector;
use collector::FileCollector;
use collector::PatternsCollector;
use collector::PerItemTopKCollector;
use collector::StdOutCollector;
use command_line_args::Arguments;
use command_line_args::parse_args_or_exit;
use exploration_step::ExplorationStep;
use miner::Miner;
use selector::FirstParentTest;
use selector::TopKBoundTest;
use std::error::Error;
use std::process;
use std::sync::Arc;
use std::time::Instant;
use transaction_reader::TransactionReader;

fn mine(args: &Arguments) -> Result<(), Box<dyn Error>> {
    println!("Mining data set: {}", args.input_file_path);
    let start = Instant::now();

    println!("Loading transactions...");
    let timer = Instant::now();
    let transactions = TransactionReader::read_all(&args.input_file_path)?;
    println!(
        "Loaded {} transactions in {} seconds.",
        transactions.len(),
        timer.elapsed().as_secs()
    );

    // First pass counts supports and renames the surviving items by
    // decreasing frequency; second pass rewrites the database into the
    // renamed space.
    println!("Counting item frequencies and rewriting the database...");
    let timer = Instant::now();
    // Transaction merging only pays off when whole subtrees survive, which
    // top-K pruning defeats; keep it for plain closed-itemset runs.
    let lcm_compress = args.lcm_compress && args.k == 0;
    let mut root =
        ExplorationStep::from_transactions(args.min_support, &transactions, lcm_compress);
    println!(
        "Kept {} frequent items in {} seconds.",
        root.counters.nb_frequents,
        timer.elapsed().as_secs()
    );
    drop(transactions);

    let output: Box<dyn PatternsCollector> = if args.output_patterns_path == "-" {
        Box::new(StdOutCollector::new())
    } else {
        Box::new(FileCollector::create(&args.output_patterns_path)?)
    };

    root.append_selector(Box::new(FirstParentTest::new()));
    let collector = if args.k > 0 {
        println!("Keeping the {} best patterns per item.", args.k);
        let mut tracked: Vec<u32> = root.counters.reverse_renaming.to_vec();
        tracked.extend_from_slice(&root.counters.pattern);
        root.append_selector(Box::new(TopKBoundTest::new()));
        Collector::TopK(PerItemTopKCollector::new(
            args.k,
            args.min_support,
            &tracked,
            output,
        ))
    } else {
        Collector::Flat(output)
    };

    let threads = if args.threads == 0 {
        rayon::current_num_threads()
    } else {
        args.threads
    };
    println!("Mining closed patterns with {} threads...", threads);
    let timer = Instant::now();
    let root = Arc::new(root);
    let collector = Arc::new(collector);
    let stats = Miner::new(threads).mine(root.clone(), &collector)?;
    println!(
        "Exploration took {} seconds, {} steps were stolen.",
        timer.elapsed().as_secs(),
        stats.steal_count
    );
    for (name, rejections) in root.selector_rejection_counts() {
        println!("{}: {} rejections.", name, rejections);
    }
    println!(
        "Wrong first parents at the root: {}.",
        root.failed_first_parents_count()
    );
    println!(
        "Average pattern length: {}.",
        collector.average_pattern_length()
    );

    let timer = Instant::now();
    let collector = match Arc::try_unwrap(collector) {
        Ok(collector) => collector,
        Err(_) => return Err("collector still shared after mining".into()),
    };
    let collected = collector.close();
    println!(
        "Wrote {} patterns in {} seconds.",
        collected,
        timer.elapsed().as_secs()
    );

    println!("Total runtime: {} seconds", start.elapsed().as_secs());

    Ok(())
}

fn main() {
    let arguments = parse_args_or_exit();

    if let Err(err) = mine(&arguments) {
        println!("Error: {}", err);
        process::exit(1);
    }
}
