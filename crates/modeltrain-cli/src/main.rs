//! modeltrain: stage, run and collect a remote model training job

use clap::Parser;
use modeltrain::signal_channel;
use modeltrain_cli::{Cli, CliError, execute, init_tracing, spawn_signal_forwarders};
use std::process::ExitCode;

fn report(err: &CliError) -> ExitCode {
    eprintln!("{}", err);
    err.exit_code().into()
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // help and version requests are not failures
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    let invocation = match cli.invocation() {
        Ok(Some(invocation)) => invocation,
        Ok(None) => {
            let _ = <Cli as clap::CommandFactory>::command().print_help();
            return ExitCode::SUCCESS;
        }
        Err(e) => return report(&e),
    };

    init_tracing();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => return report(&CliError::from(e)),
    };

    let result = runtime.block_on(async {
        let (sender, mut signals) = signal_channel();
        spawn_signal_forwarders(sender);
        execute(invocation, &mut signals).await
    });
    // the stdin reader may still be blocked on a read
    runtime.shutdown_background();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(&e),
    }
}
