use std::env;
use std::process;
use std::io;

use argparse::{ArgumentParser, Store};

pub struct Arguments {
    pub input_file_path: String,
    pub output_patterns_path: String,
    pub min_support: u32,
    pub k: usize,
    pub threads: usize,
    pub lcm_compress: bool,
}

pub fn parse_args_or_exit() -> Arguments {
    let mut args: Arguments = Arguments {
        input_file_path: String::new(),
        output_patterns_path: "-".to_owned(),
        min_support: 0,
        k: 0,
        threads: 0,
        lcm_compress: true,
    };

    let mut no_compress = false;
    {
        let mut parser = ArgumentParser::new();
        parser.set_description("LCM closed frequent itemset miner.");

        parser
            .refer(&mut args.input_file_path)
            .add_option(
                &["--input"],
                Store,
                "Input dataset; one transaction per line, \
                 space-separated integer item IDs.",
            )
            .metavar("file_path")
            .required();

        parser
            .refer(&mut args.output_patterns_path)
            .add_option(
                &["--output"],
                Store,
                "File path in which to store output patterns, or '-' for \
                 stdout. Format: support <TAB> space-separated items.",
            )
            .metavar("file_path");

        parser
            .refer(&mut args.min_support)
            .add_option(
                &["--min-support"],
                Store,
                "Minimum absolute support threshold, at least 1.",
            )
            .metavar("count")
            .required();

        parser
            .refer(&mut args.k)
            .add_option(
                &["--k"],
                Store,
                "Keep only the K best-supported patterns per item; \
                 0 mines all closed patterns.",
            )
            .metavar("count");

        parser
            .refer(&mut args.threads)
            .add_option(
                &["--threads"],
                Store,
                "Number of mining threads; 0 uses all cores.",
            )
            .metavar("count");

        parser
            .refer(&mut no_compress)
            .add_option(
                &["--no-compression"],
                argparse::StoreTrue,
                "Disable transaction merging during database reduction.",
            );

        if env::args().count() == 1 {
            parser.print_help("Usage:", &mut io::stderr()).unwrap();
            process::exit(1);
        }

        match parser.parse_args() {
            Ok(()) => {}
            Err(err) => {
                process::exit(err);
            }
        }
    }

    if args.min_support < 1 {
        eprintln!("Minimum support threshold must be at least 1");
        process::exit(1);
    }

    args.lcm_compress = !no_compress;
    args
}
