use std::process;

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use cmdprobe::display;
use cmdprobe::types::shell_escape_single_quote;
use cmdprobe::{Benchmark, BenchmarkResultSet, Settings};

#[derive(Parser)]
#[command(
    name = "cmdprobe",
    version,
    about = "Benchmark the CPU, memory and disk usage of a command",
    after_help = "Options must come before the command. Quote the command if it \
                  contains shell syntax, e.g.: cmdprobe -i 5 \"sh -c 'sleep 1'\"\n\n\
                  Without a print option, statistics are printed for more than one \
                  iteration and the first iteration otherwise."
)]
struct Cli {
    /// Command to benchmark
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,

    /// Number of times to run the command
    #[arg(short, long, default_value_t = 1)]
    iterations: usize,

    /// Print mean, stdev, min and max of each resource over all iterations
    #[arg(short = 's', long)]
    statistics: bool,

    /// Print averages of each resource over all iterations
    #[arg(short = 'a', long)]
    averages: bool,

    /// Print the list of values of each resource over all iterations
    #[arg(short = 'v', long)]
    values: bool,

    /// Print the first iteration's results
    #[arg(short = 'f', long)]
    first_iteration: bool,

    /// Print every iteration's results
    #[arg(short = 'A', long)]
    all_iterations: bool,

    /// Print every iteration as JSON instead
    #[arg(long)]
    json: bool,

    /// Do not wrap the command in the accounting utility
    #[arg(long)]
    no_accounting: bool,

    /// Pause between samples, in milliseconds
    #[arg(long, value_name = "MS")]
    sampling_interval: Option<u64>,

    /// trace, debug, info, warn or error
    #[arg(long)]
    log_level: Option<String>,
}

/// One argument is taken as a full command line; several are quoted so they
/// reach the command unchanged.
fn command_line(args: &[String]) -> String {
    match args {
        [single] => single.clone(),
        _ => args
            .iter()
            .map(|a| shell_escape_single_quote(a))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

fn init_logging(level: &str) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load()?;
    if let Some(level) = &cli.log_level {
        settings.log_level = level.clone();
    }
    init_logging(&settings.log_level)?;

    if cli.no_accounting {
        settings.use_accounting_utility = false;
    }
    if let Some(ms) = cli.sampling_interval {
        settings.sampling_interval_ms = Some(ms);
    }

    let command = command_line(&cli.command);
    let bench = Benchmark::new(settings);

    eprintln!("Benchmarking started..");
    let mut results = BenchmarkResultSet::default();
    for result in bench.iter(&command, cli.iterations)? {
        let result = result?;
        eprintln!(
            "Last runtime: {} seconds",
            display::format_number(result.process.execution_time)
        );
        results.push(result);
    }
    eprintln!("Benchmarking done.");

    if cli.json {
        println!("{}", display::format_json(&results));
        return Ok(());
    }

    let any_selected = cli.statistics
        || cli.averages
        || cli.values
        || cli.first_iteration
        || cli.all_iterations;
    let (statistics, first_iteration) = if any_selected {
        (cli.statistics, cli.first_iteration)
    } else {
        (cli.iterations > 1, cli.iterations <= 1)
    };

    let mut output = String::new();
    if statistics {
        output.push_str(&display::format_statistics(&results.get_statistics()));
    }
    if cli.averages
        && let Some(averages) = results.get_averages()
    {
        output.push_str(&display::format_averages(&averages));
    }
    if cli.values {
        output.push_str(&display::format_values(&results.get_values_per_attribute()));
    }
    if first_iteration && let Some(first) = results.get_first_iteration() {
        output.push_str(&display::format_result(first, "First Iteration"));
    }
    if cli.all_iterations {
        output.push_str(&display::format_all_iterations(&results));
    }

    print!("{}", output);
    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{}", err);
        process::exit(1);
    }
}
