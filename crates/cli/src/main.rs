mod cmd;

use anyhow::Result;
use argp::FromArgs;
use tracing_subscriber::{EnvFilter, filter::LevelFilter};
use typed_path::Utf8NativePathBuf;

#[derive(FromArgs, PartialEq, Debug)]
/// Offline tools for CI failure analysis.
struct TopLevel {
    #[argp(subcommand)]
    command: SubCommand,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argp(subcommand)]
enum SubCommand {
    Analyze(cmd::analyze::Args),
    Predict(cmd::predict::Args),
}

// For argp::FromArgs
pub fn native_path(value: &str) -> Result<Utf8NativePathBuf, String> {
    Ok(Utf8NativePathBuf::from(value))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder().with_default_directive(LevelFilter::WARN.into()).from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: TopLevel = argp::parse_args_or_exit(argp::DEFAULT);
    match args.command {
        SubCommand::Analyze(args) => cmd::analyze::run(args),
        SubCommand::Predict(args) => cmd::predict::run(args),
    }
}
