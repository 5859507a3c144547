use anyhow::Result;
use argp::FromArgs;
use ci_insight_analysis::risk::{RiskFeatures, RiskModel};

#[derive(FromArgs, PartialEq, Debug)]
/// Estimate the failure risk of a pull request from its size.
#[argp(subcommand, name = "predict")]
pub struct Args {
    #[argp(option, default = "0.0")]
    /// lines added by the pull request
    lines_added: f64,
    #[argp(option, default = "0.0")]
    /// files changed by the pull request
    files_changed: f64,
}

pub fn run(args: Args) -> Result<()> {
    let prediction = RiskModel::default()
        .predict(RiskFeatures { lines_added: args.lines_added, files_changed: args.files_changed });
    println!("{}", serde_json::to_string(&prediction)?);
    Ok(())
}
