// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod trace;

use anyhow::Context;
use clap::{command, value_parser, Arg, ArgAction, ArgMatches, Command};
use libdd_call_tree::{
    reconstruct_threads, FrameFilter, ReconstructionConfig, ThreadReconstruction, Window,
};
use std::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

pub use trace::*;

fn init_logging(log_level: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("could not parse log level '{log_level}'"))?;
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;
    debug!("Logging subsystem enabled");
    Ok(())
}

/// `Some(true)` for `--x`, `Some(false)` for `--no-x`, `None` if neither is given.
fn flag_override(matches: &ArgMatches, on: &str, off: &str) -> Option<bool> {
    if matches.get_flag(off) {
        Some(false)
    } else if matches.get_flag(on) {
        Some(true)
    } else {
        None
    }
}

/// Starts from the config file, if any, and lets command line flags win. Each
/// filter has a `--no-` flag to turn off what the file enabled.
fn load_config(matches: &ArgMatches) -> anyhow::Result<ReconstructionConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => {
            let source = std::fs::read(path)
                .with_context(|| format!("could not read config file '{path}'"))?;
            serde_json::from_slice(&source)
                .with_context(|| format!("could not parse config file '{path}'"))?
        }
        None => ReconstructionConfig::default(),
    };

    let filter = FrameFilter::new(
        flag_override(matches, "filter-code-types", "no-filter-code-types")
            .unwrap_or(config.filter.filter_code_types),
        flag_override(matches, "filter-urls", "no-filter-urls")
            .unwrap_or(config.filter.filter_urls),
    );
    config = config.with_filter(filter);
    if let Some(&interval) = matches.get_one::<i64>("sampling-interval") {
        config = config.with_sampling_interval(interval);
    }
    if let Some(categories) = matches.get_many::<String>("boundary-category") {
        config = config.with_boundary_categories(categories.cloned());
    }
    config.validate()?;
    Ok(config)
}

fn window_of(
    thread: &ThreadReconstruction,
    begin: Option<i64>,
    end: Option<i64>,
) -> anyhow::Result<Option<Window>> {
    let span = thread.span();
    let begin = begin.or(span.map(|(begin, _)| begin));
    let end = end.or(span.map(|(_, end)| end));
    match (begin, end) {
        (Some(begin), Some(end)) if begin == end => Ok(None),
        (Some(begin), Some(end)) => Ok(Some(Window::new(begin, end)?)),
        _ => Ok(None),
    }
}

fn print_thread(
    thread: &ThreadReconstruction,
    window: Option<Window>,
    min_self_percent: f64,
    print_calls: bool,
) {
    let stats = &thread.stats;
    println!(
        "Thread {}: {} nodes, {} samples ({} dropped), {} boundaries, {} root calls.",
        thread.key,
        stats.nodes,
        stats.samples,
        stats.dropped_samples,
        stats.boundaries,
        stats.root_calls
    );

    if print_calls {
        for entry in thread.flame_chart().entries {
            let name = thread
                .tree
                .frame(entry.frame)
                .map_or("(unknown)", |frame| frame.function_name.as_str());
            let indent = "  ".repeat(entry.depth);
            println!(
                "{indent}{name} @{} +{} (self {})",
                entry.start, entry.duration, entry.self_duration
            );
        }
    }

    let Some(window) = window else {
        println!("No calls to aggregate.");
        return;
    };
    println!(
        "Hot functions in [{}, {}), self >= {min_self_percent}%:",
        window.begin(),
        window.end()
    );
    for function in thread.hot_functions(window, min_self_percent) {
        let (name, url, line) = match thread.tree.frame(function.frame) {
            Some(frame) => (
                frame.function_name.as_str(),
                frame.url.as_str(),
                frame.line_number,
            ),
            None => ("(unknown)", "", -1),
        };
        println!(
            "{:>6.2}%\t{:>6.2}%\t{} calls\t{name} ({url}:{line})",
            function.self_percent,
            function.duration_percent,
            function.calls.len()
        );
    }
    println!();
}

fn cli() -> Command {
    command!()
        .arg(
            Arg::new("input")
                .short('i')
                .help("the Chrome trace to reconstruct calls from")
                .required(true),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("a JSON reconstruction config, overridden by the flags below")
                .required(false),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .help("a tracing env filter, e.g. 'debug' or 'libdd_call_tree=trace'")
                .default_value("info"),
        )
        .arg(
            Arg::new("filter-code-types")
                .long("filter-code-types")
                .action(ArgAction::SetTrue)
                .help("only keep JS frames"),
        )
        .arg(
            Arg::new("filter-urls")
                .long("filter-urls")
                .action(ArgAction::SetTrue)
                .help("drop frames of browser internals and extensions"),
        )
        .arg(
            Arg::new("no-filter-code-types")
                .long("no-filter-code-types")
                .action(ArgAction::SetTrue)
                .conflicts_with("filter-code-types")
                .help("keep every code type, even if the config filters them"),
        )
        .arg(
            Arg::new("no-filter-urls")
                .long("no-filter-urls")
                .action(ArgAction::SetTrue)
                .conflicts_with("filter-urls")
                .help("keep every URL, even if the config filters them"),
        )
        .arg(
            Arg::new("sampling-interval")
                .long("sampling-interval")
                .value_parser(value_parser!(i64))
                .help("largest gap between two samples of one call"),
        )
        .arg(
            Arg::new("boundary-category")
                .long("boundary-category")
                .action(ArgAction::Append)
                .help("trace category whose events split calls, may be repeated"),
        )
        .arg(
            Arg::new("min-self-percent")
                .long("min-self-percent")
                .value_parser(value_parser!(f64))
                .default_value("1.0")
                .help("hide functions with less self time than this"),
        )
        .arg(
            Arg::new("window-begin")
                .long("window-begin")
                .value_parser(value_parser!(i64))
                .help("start of the aggregation window, defaults to the first call"),
        )
        .arg(
            Arg::new("window-end")
                .long("window-end")
                .value_parser(value_parser!(i64))
                .help("end of the aggregation window, defaults to the last call"),
        )
        .arg(
            Arg::new("print-calls")
                .long("print-calls")
                .action(ArgAction::SetTrue)
                .help("print every reconstructed call as a flame chart row"),
        )
}

fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    let log_level = matches
        .get_one::<String>("log-level")
        .map_or("info", String::as_str);
    init_logging(log_level)?;

    let config = load_config(&matches)?;
    debug!(?config, "loaded configuration");

    let input = matches
        .get_one::<String>("input")
        .context("missing input")?;
    let source = {
        info!("Reading in trace from file '{input}'");
        std::fs::read(input).with_context(|| format!("could not read '{input}'"))?
    };
    let trace: TraceFile = serde_json::from_slice(&source)
        .with_context(|| format!("'{input}' is not a Chrome trace"))?;

    let inputs = demultiplex(trace.into_events());
    info!("Found {} threads", inputs.len());

    let before = Instant::now();
    let threads = reconstruct_threads(&inputs, &config)?;
    info!(
        "Reconstructing {} profiled threads took {} ms",
        threads.len(),
        before.elapsed().as_millis()
    );

    let begin = matches.get_one::<i64>("window-begin").copied();
    let end = matches.get_one::<i64>("window-end").copied();
    let min_self_percent = matches
        .get_one::<f64>("min-self-percent")
        .copied()
        .unwrap_or(1.0);
    let print_calls = matches.get_flag("print-calls");
    for thread in &threads {
        let window = window_of(thread, begin, end)?;
        print_thread(thread, window, min_self_percent, print_calls);
    }

    Ok(())
}
