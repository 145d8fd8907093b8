use ndfront::{Frontend, Shutdown};
use tracing::{error, info};

use crate::cmd::RunArgs;
use crate::exit::{frontend_error, CliResult, SUCCESS};
use crate::logging::LogHandle;

pub fn run(args: RunArgs, log: Option<LogHandle>) -> CliResult<i32> {
    let config = args.to_config();
    let mut frontend = Frontend::bootstrap(&config).map_err(|err| {
        error!(error = %err, "frontend setup failed");
        frontend_error("frontend setup failed", err)
    })?;
    if let Some(log) = log {
        frontend = frontend.with_verbosity(move |verbose| log.set_verbose(verbose));
    }

    match frontend.run() {
        Ok(Shutdown::Signal) => info!("stopped by signal"),
        Ok(Shutdown::LinkClosed(link)) => info!(link, "stopped after link closed"),
        Err(err) => {
            error!(error = %err, "fatal");
            return Err(frontend_error("frontend failed", err));
        }
    }
    Ok(SUCCESS)
}
