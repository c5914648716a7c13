mod cli;
mod dirs;
mod driver;

use std::io::{self, IsTerminal};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser};
use gekko_engine::{
    EventSink, FetchLedger, FetchSettings, LogSink, Orchestrator, OrchestratorConfig,
    ReqwestFetcher,
};
use gekko_logging::{gekko_debug, gekko_error, LogOptions};

use cli::{urls_from_reader, Cli};
use dirs::AppDirs;
use driver::DriverOptions;

/// `EX_NOINPUT` from sysexits.h.
const EXIT_NO_INPUT: u8 = 66;

fn main() -> ExitCode {
    let mut args = Cli::parse();

    if args.urls.is_empty() {
        let stdin = io::stdin();
        if stdin.is_terminal() {
            let _ = Cli::command().print_help();
            return ExitCode::from(EXIT_NO_INPUT);
        }
        match urls_from_reader(stdin.lock()) {
            Ok(urls) => args.urls = urls,
            Err(err) => {
                eprintln!("gekko: failed to read urls from stdin: {err}");
                return ExitCode::from(EXIT_NO_INPUT);
            }
        }
    }

    let dirs = match prepare(&args) {
        Ok(dirs) => dirs,
        Err(err) => {
            eprintln!("gekko: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(args, &dirs) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            gekko_error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn prepare(args: &Cli) -> Result<AppDirs> {
    let dirs = AppDirs::resolve(args.data_dir.as_deref())?;
    dirs.create()
        .with_context(|| format!("cannot create application directories {dirs:?}"))?;
    gekko_logging::initialize(&LogOptions::terminal(args.verbose).with_file(dirs.log_file()))
        .map_err(|err| anyhow!("cannot initialize logging: {err}"))?;
    Ok(dirs)
}

fn run(args: Cli, dirs: &AppDirs) -> Result<()> {
    gekko_debug!("Using data directory {:?}", dirs.data_dir);
    let sink: Arc<dyn EventSink> = Arc::new(LogSink);

    let mut ledger = FetchLedger::open_in(&dirs.data_dir)
        .context("cannot open fetch ledger")?
        .with_sink(sink.clone());

    let fetcher = ReqwestFetcher::new(FetchSettings::default()).context("cannot build http client")?;
    let orchestrator = Orchestrator::new(
        OrchestratorConfig {
            concurrency: args.threads,
            batch_deadline: args.deadline,
        },
        Arc::new(fetcher),
    )
    .context("cannot start fetch workers")?
    .with_sink(sink);

    let options = DriverOptions {
        output_root: args.output_path,
        report_metadata: args.metadata,
    };
    let outcome = driver::run_batch(&orchestrator, &mut ledger, args.urls, &options);

    orchestrator.shutdown();
    ledger.close().context("cannot close fetch ledger")?;
    outcome.map(|_| ())
}
