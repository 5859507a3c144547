use anyhow::{Context, Result};
use argp::FromArgs;
use ci_insight_analysis::{Analyzer, MAX_LOG_CHARS, OpenAiAnalyzer};
use ci_insight_core::config::Config;
use typed_path::Utf8NativePathBuf;

use crate::native_path;

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// Analyze a saved job log and print the conclusion and suggestion as JSON.
#[argp(subcommand, name = "analyze")]
pub struct Args {
    #[argp(positional, from_str_fn(native_path))]
    /// job log file
    log: Utf8NativePathBuf,
    #[argp(option, short = 'c', from_str_fn(native_path))]
    /// config file (default: $CI_INSIGHT_CONFIG or config.yml)
    config: Option<Utf8NativePathBuf>,
}

pub fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => Config::from_path(path.with_platform_encoding())?,
        None => Config::load()?,
    };
    let log = std::fs::read_to_string(args.log.with_platform_encoding())
        .with_context(|| format!("Failed to read {}", args.log))?;
    if log.chars().count() > MAX_LOG_CHARS {
        tracing::warn!("{} is longer than {MAX_LOG_CHARS} characters, truncating", args.log);
    }
    let analyzer = OpenAiAnalyzer::new(&config.openai, &config.http)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;
    let result = runtime
        .block_on(analyzer.analyze(&log))
        .with_context(|| format!("Failed to analyze {}", args.log))?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
