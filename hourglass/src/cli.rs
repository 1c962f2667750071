use std::path::PathBuf;

use clap::Parser;

/// Fires vault deposits from many wallets at a target block timestamp.
#[derive(Parser, Debug, Clone)]
#[command(name = "hourglass", author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "HOURGLASS_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Target block timestamp (unix seconds)
    #[arg(long, env = "HOURGLASS_TARGET_TIMESTAMP", value_name = "N")]
    pub target_timestamp: Option<i64>,

    /// Accepted distance from the target, in seconds
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    pub tolerance: Option<i64>,

    /// Primary RPC endpoint
    #[arg(long, env = "HOURGLASS_RPC", value_name = "URL")]
    pub rpc: Option<String>,

    /// Secondary RPC endpoint used after the primary fails
    #[arg(long, env = "HOURGLASS_BACKUP_RPC", value_name = "URL")]
    pub backup_rpc: Option<String>,

    /// Start monitoring without asking for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Deposit even if the target has already passed
    #[arg(long)]
    pub proceed_late: bool,

    /// Do not send approvals; only wallets already approved take part
    #[arg(long)]
    pub skip_approve: bool,

    /// Run the checks and exit without monitoring
    #[arg(long)]
    pub check_only: bool,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,

    /// Verbose console logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only errors on the console
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Prompts are only shown on an interactive, non-JSON run.
    pub fn interactive(&self) -> bool {
        !self.yes && !self.json
    }
}
