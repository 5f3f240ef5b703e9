use clap::{Parser, ValueEnum};
use itertools::Itertools as _;
use ramlog_core::{Configuration, demo};
use std::io::{self, Write as _};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Demo {
    Successor,
    Join,
    TransitiveClosure,
    Unsatisfiable,
    ShortestPath,
    Primes,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Phase {
    /// Hoisted RAM.
    Ram,
    /// Lowered program with its index layout.
    Executable,
    /// Facts of every relation after evaluation.
    Solution,
}

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Bundled program to compile.
    demo: Demo,

    /// Size of the generated input, for demos that take one.
    #[arg(short, long, default_value_t = 10)]
    size: i64,

    /// What to print.
    #[arg(short, long, value_enum, default_value_t = Phase::Solution)]
    phase: Phase,

    /// Keep every test in the innermost loop.
    #[arg(long)]
    no_hoisting: bool,

    /// Log every intermediate program.
    #[arg(long)]
    dump: bool,

    /// Log verbosity, repeat for more.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> io::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(if cli.dump { level.max(tracing::Level::INFO) } else { level })
        .with_writer(io::stderr)
        .init();

    let (program, facts) = match cli.demo {
        Demo::Successor => demo::successor(),
        Demo::Join => demo::join(),
        Demo::TransitiveClosure => demo::transitive_closure(cli.size),
        Demo::Unsatisfiable => demo::unsatisfiable(),
        Demo::ShortestPath => demo::shortest_path(),
        Demo::Primes => demo::primes(cli.size),
    };
    let config = Configuration {
        hoisting: !cli.no_hoisting,
        dump_phases: cli.dump,
    };

    let output = match cli.phase {
        Phase::Ram => ramlog_core::compile_ram(&config, &program, facts)
            .stmt
            .to_string(),
        Phase::Executable => ramlog_core::compile_with(&config, &program, facts).dbg_summary(),
        Phase::Solution => {
            let solution =
                ramlog_core::run(&config, &ramlog_core::compile_with(&config, &program, facts));
            solution
                .relations
                .iter()
                .map(|(rel, facts)| {
                    let rows = facts
                        .iter()
                        .map(|row| format!("    ({})", row.iter().join(", ")))
                        .join("\n");
                    format!("{rel}: {} facts\n{rows}", facts.len())
                })
                .join("\n")
        }
    };
    writeln!(io::stdout().lock(), "{output}")
}
