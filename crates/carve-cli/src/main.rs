//! `carve` — stream-ingest stdIN into a UnixFSv1 DAG.
//!
//! Reads bytes (or size-prefixed substreams) from stdIN, builds the
//! content-addressed DAG and writes the configured emitters to stdOUT /
//! stdERR. See `--help` for the emitter and algorithm options.

mod opts;
mod report;
mod rusage;

use std::io::{IsTerminal, Write};

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use carve_engine::{Emitters, IngestError, Pipeline};
use opts::{Cli, Target, assign_emitters};
use rusage::RusageProbe;

fn writer_for(target: Target) -> Box<dyn Write + Send> {
    match target {
        Target::Stdout => Box::new(std::io::stdout()),
        Target::Stderr => Box::new(std::io::stderr()),
    }
}

fn is_tty(target: Target) -> bool {
    match target {
        Target::Stdout => std::io::stdout().is_terminal(),
        Target::Stderr => std::io::stderr().is_terminal(),
    }
}

fn bail_config(errs: &[String]) -> ! {
    eprintln!("\nFatal error parsing arguments:\n\t{}", errs.join("\n\t"));
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // logs go to stderr; stdout may carry CAR or JSONL data
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let argv_initial: Vec<String> = std::env::args().skip(1).collect();

    let mut errs = Vec::new();
    let cfg = match cli.build_config() {
        Ok(cfg) => Some(cfg),
        Err(mut config_errs) => {
            errs.append(&mut config_errs);
            None
        }
    };
    let assignment = match assign_emitters(&cli.emit_stdout, &cli.emit_stderr) {
        Ok(assignment) => Some(assignment),
        Err(mut emitter_errs) => {
            errs.append(&mut emitter_errs);
            None
        }
    };
    if let Some(assignment) = &assignment
        && let Some(target) = assignment.car_v1_stream
        && is_tty(target)
    {
        errs.push("output of .car streams to a TTY is not supported".into());
    }
    if !errs.is_empty() {
        bail_config(&errs);
    }
    let (Some(cfg), Some(assignment)) = (cfg, assignment) else {
        unreachable!("construction failures were reported above");
    };

    let emitters = Emitters {
        roots_jsonl: assignment.roots_jsonl.map(writer_for),
        stats_jsonl: assignment.stats_jsonl.map(writer_for),
        car_v1_stream: assignment.car_v1_stream.map(writer_for),
    };

    let mut pipeline = match Pipeline::new(cfg, emitters) {
        Ok(pipeline) => pipeline.with_probe(Box::new(RusageProbe)),
        Err(IngestError::Config(config_errs)) => bail_config(&config_errs),
        Err(other) => return Err(other.into()),
    };
    pipeline.set_page_size(rusage::page_size());
    let argv_expanded = cli.argv_expanded(pipeline.config());
    pipeline.set_argv(argv_initial, argv_expanded);

    if std::io::stdin().is_terminal() {
        eprint!(
            "------\n\
             You seem to be feeding data straight from a terminal, an odd choice...\n\
             Nevertheless will proceed to read until EOF ( Ctrl+D )\n\
             ------\n"
        );
    }

    if let Err(err) = pipeline.process_reader(tokio::io::stdin(), None).await {
        error!(%err, "ingestion aborted");
        eprintln!("unexpected error processing stdIN: {err}");
        std::process::exit(1);
    }

    pipeline.output_summary()?;

    if let Some(target) = assignment.stats_text {
        let text = report::render_stats_text(
            &pipeline.summary(),
            &pipeline.dedup_totals(),
            pipeline.config().collector == "none",
            pipeline.config().multipart_stream,
        );
        writer_for(target).write_all(text.as_bytes())?;
    }

    Ok(())
}
