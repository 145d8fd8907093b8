mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "ndfront", version, about = "IPv6 router discovery frontend")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn effective_level(&self) -> LogLevel {
        if self.verbose {
            self.log_level.verbose()
        } else {
            self.log_level
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let log = init_logging(cli.log_format, cli.effective_level());

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format, log);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn run_defaults_match_daemon_layout() {
        let cli = Cli::try_parse_from(["ndfront", "run"]).expect("run should parse");
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let config = args.to_config();
        assert_eq!(config.parent_fd, 3);
        assert!(config.chroot);
        assert_eq!(config.sysctl_root, Path::new("/proc/sys/net/ipv6/conf"));
    }

    #[test]
    fn run_options_reach_config() {
        let cli = Cli::try_parse_from([
            "ndfront",
            "run",
            "--socket",
            "/tmp/nd.sock",
            "--parent-fd",
            "7",
            "--user",
            "_slaacd",
            "--no-chroot",
        ])
        .expect("run args should parse");
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let config = args.to_config();
        assert_eq!(config.socket_path, Path::new("/tmp/nd.sock"));
        assert_eq!(config.parent_fd, 7);
        assert_eq!(config.user.as_deref(), Some("_slaacd"));
        assert!(!config.chroot);
    }

    #[test]
    fn verbose_flag_raises_level() {
        let cli = Cli::try_parse_from(["ndfront", "-v", "version"]).expect("should parse");
        assert_eq!(cli.effective_level(), LogLevel::Debug);

        let cli = Cli::try_parse_from(["ndfront", "--log-level", "trace", "-v", "version"])
            .expect("should parse");
        assert_eq!(cli.effective_level(), LogLevel::Trace);
    }

    #[test]
    fn parses_interfaces_with_format() {
        let cli = Cli::try_parse_from(["ndfront", "interfaces", "--format", "json"])
            .expect("interfaces args should parse");
        assert!(matches!(cli.command, Command::Interfaces(_)));
        assert_eq!(cli.format, Some(OutputFormat::Json));
    }

    #[test]
    fn rejects_non_numeric_parent_fd() {
        let err = Cli::try_parse_from(["ndfront", "run", "--parent-fd", "three"])
            .expect_err("bad fd should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
