use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use clap::Parser;
use js_instrument::{instrument_source, RunOutcome, Sandbox, SandboxOptions, TraceSink};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "vartrace",
    about = "Instrument a JavaScript program and trace every name binding while it runs"
)]
struct Args {
    /// Program to instrument and execute
    input: PathBuf,
    /// Where the instrumented program text is written
    #[arg(long, default_value = "instrumented.js")]
    out: PathBuf,
    /// Append-only observation stream, one JSON record per line
    #[arg(long, default_value = "observations.jsonl")]
    trace: PathBuf,
    /// Wall-clock execution ceiling in milliseconds
    #[arg(long, default_value_t = 60_000)]
    timeout_ms: u64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    if !args.input.exists() {
        eprintln!("error: input file not found: {}", args.input.display());
        return ExitCode::from(2);
    }

    match run(&args) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<ExitCode> {
    let source = fs::read_to_string(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let instrumented = instrument_source(&source)?;
    fs::write(&args.out, &instrumented)
        .with_context(|| format!("writing {}", args.out.display()))?;
    println!("wrote {}", args.out.display());

    let echo = std::env::var("REPORT_CONSOLE").map(|value| value == "1").unwrap_or(false);
    let mut sink = TraceSink::to_path(&args.trace, echo)
        .with_context(|| format!("opening {}", args.trace.display()))?;
    let options = SandboxOptions {
        timeout_ms: args.timeout_ms,
        ..SandboxOptions::default()
    };
    let outcome = Sandbox::new(options).run(&instrumented, &mut sink);

    let code = match &outcome {
        RunOutcome::Completed { .. } => ExitCode::SUCCESS,
        RunOutcome::Failed { error, .. } => {
            eprintln!("execution error: {error}");
            ExitCode::FAILURE
        }
        RunOutcome::TimedOut { timeout_ms, .. } => {
            eprintln!("execution exceeded the {timeout_ms}ms ceiling");
            ExitCode::FAILURE
        }
    };
    println!(
        "{} observation(s) appended to {}",
        sink.written(),
        args.trace.display()
    );
    Ok(code)
}
