//! Console rendering of run events, wallet tables and the final report.

use std::borrow::Cow;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Local, Utc};
use colored::*;
use dispatch_engine::{
    ActorRegistry, EventSink, MonitorState, Outcome, RunEvent, RunReport, TargetWindow, VaultState,
};
use evm_upstream::format_amount;
use tabled::{Table, Tabled, settings::Style};

/// Renders [`RunEvent`]s to stdout as they arrive.
pub struct ConsoleReporter {
    decimals: u8,
    symbol: String,
    last_countdown: AtomicU64,
}

impl ConsoleReporter {
    pub fn new(decimals: u8, symbol: impl Into<String>) -> Self {
        Self {
            decimals,
            symbol: symbol.into(),
            last_countdown: AtomicU64::new(u64::MAX),
        }
    }

    fn amount(&self, amount: u128) -> String {
        format!("{} {}", format_amount(amount, self.decimals), self.symbol)
    }

    pub fn header(&self, title: &str) {
        let border = "=".repeat(60);
        println!("\n{}", border.blue().bold());
        println!("  {}", title.blue().bold());
        println!("{}\n", border.blue().bold());
    }

    pub fn banner(&self, window: &TargetWindow, amount: u128, wallets: usize) {
        println!("{}", "Hourglass vault deposit".cyan().bold());
        println!(
            "{} {} ({})",
            "Target:".yellow(),
            window.target(),
            describe_timestamp(window.target())
        );
        println!("{} +/-{}s", "Tolerance:".yellow(), window.tolerance());
        println!(
            "{} {} x {} wallets",
            "Deposit:".yellow(),
            self.amount(amount),
            wallets
        );
    }

    /// Wallet status table after the preparation phase.
    pub fn wallet_table(&self, registry: &ActorRegistry, amount: u128) {
        #[derive(Tabled)]
        struct WalletRow<'a> {
            #[tabled(rename = "Wallet")]
            wallet: usize,
            #[tabled(rename = "Address")]
            address: Cow<'a, str>,
            #[tabled(rename = "Balance")]
            balance: String,
            #[tabled(rename = "Allowance")]
            allowance: String,
            #[tabled(rename = "Approved")]
            approved: &'static str,
            #[tabled(rename = "Ready")]
            ready: &'static str,
        }

        let unknown = || "?".to_string();
        let rows: Vec<WalletRow> = registry
            .iter()
            .map(|(actor, status)| WalletRow {
                wallet: actor.position + 1,
                address: Cow::Borrowed(actor.id.as_str()),
                balance: status.ready_balance.map(|b| self.amount(b)).unwrap_or_else(unknown),
                allowance: status.allowance.map(|a| self.amount(a)).unwrap_or_else(unknown),
                approved: if status.authorized { "yes" } else { "no" },
                ready: if status.is_ready(amount) { "yes" } else { "no" },
            })
            .collect();
        println!("{}", Table::new(rows).with(Style::modern()));
    }

    /// Final summary: totals, then successes and failures.
    pub fn report(&self, report: &RunReport) {
        self.header("Run summary");
        if let Some(ms) = report.elapsed_ms {
            println!("{} {:.2}s", "Elapsed:".yellow(), ms as f64 / 1000.0);
        }
        println!("{} {}", "Wallets:".yellow(), report.total);
        println!(
            "{} {}",
            "Succeeded:".yellow(),
            report.succeeded.to_string().green().bold()
        );
        println!(
            "{} {}",
            "Failed:".yellow(),
            if report.failed > 0 {
                report.failed.to_string().red().bold()
            } else {
                report.failed.to_string().normal()
            }
        );
        if report.pending > 0 {
            println!("{} {}", "Not dispatched:".yellow(), report.pending);
        }
        println!(
            "{} {}",
            "Total deposited:".yellow(),
            self.amount(report.total_moved).cyan()
        );

        #[derive(Tabled)]
        struct OutcomeRow {
            #[tabled(rename = "Wallet")]
            wallet: usize,
            #[tabled(rename = "Address")]
            address: String,
            #[tabled(rename = "Outcome")]
            outcome: &'static str,
            #[tabled(rename = "Transaction / error")]
            detail: String,
        }

        let rows: Vec<OutcomeRow> = report
            .actors
            .iter()
            .map(|a| OutcomeRow {
                wallet: a.position + 1,
                address: a.id.short(),
                outcome: match a.outcome {
                    Outcome::Succeeded => "succeeded",
                    Outcome::Failed => "failed",
                    Outcome::Pending => "pending",
                },
                detail: match (&a.handle, &a.detail) {
                    (Some(handle), _) if a.outcome == Outcome::Succeeded => handle.to_string(),
                    (_, Some(detail)) => detail.clone(),
                    _ => String::new(),
                },
            })
            .collect();
        println!("\n{}", Table::new(rows).with(Style::modern()));
    }

    fn vault(&self, state: &VaultState, warnings: &[String]) {
        println!("  Mode: {}", state.mode.to_string().cyan());
        println!(
            "  Per-wallet limit: {}",
            self.amount(state.max_deposit_per_actor)
        );
        println!("  Total assets: {}", self.amount(state.total_assets));
        println!("  Capacity: {}", self.amount(state.max_total_assets));
        println!("  Deposits open: {}", describe_timestamp(state.deposit_start));
        println!("  Deposits close: {}", describe_timestamp(state.deposit_end));
        for warning in warnings {
            println!("  {} {}", "warning:".yellow().bold(), warning.yellow());
        }
    }

    fn end_countdown_line(&self) {
        if self.last_countdown.swap(u64::MAX, Ordering::Relaxed) != u64::MAX {
            println!();
        }
    }
}

impl EventSink for ConsoleReporter {
    fn emit(&self, event: RunEvent) {
        if !matches!(event, RunEvent::Countdown { .. }) {
            self.end_countdown_line();
        }

        match &event {
            RunEvent::ActorInspected {
                position,
                actor,
                balance,
                allowance,
                sufficient,
                error,
            } => match (error, balance) {
                (Some(error), _) => println!(
                    "  {} {}: {}",
                    format!("[wallet {}]", position + 1).red(),
                    actor.short(),
                    error.red()
                ),
                (None, Some(balance)) => println!(
                    "  [wallet {}] {}: balance {} {}, allowance {}",
                    position + 1,
                    actor.short(),
                    self.amount(*balance),
                    if *sufficient {
                        "ok".green()
                    } else {
                        "insufficient".red()
                    },
                    self.amount(allowance.unwrap_or_default())
                ),
                (None, None) => {}
            },
            RunEvent::ActorAuthorized {
                position,
                succeeded,
                handle,
                error,
                ..
            } => {
                if *succeeded {
                    println!(
                        "  {} approval confirmed {}",
                        format!("[wallet {}]", position + 1).green(),
                        handle.as_ref().map(|h| h.to_string()).unwrap_or_default()
                    );
                } else {
                    println!(
                        "  {} approval failed: {}",
                        format!("[wallet {}]", position + 1).red(),
                        error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
            RunEvent::VaultInspected { state, warnings } => self.vault(state, warnings),
            RunEvent::VaultUnavailable { error } => {
                println!("  {} {}", "vault state unavailable:".red(), error)
            }
            RunEvent::StateChanged { to, .. } => {
                if *to == MonitorState::Aborted {
                    println!("{}", "Monitoring stopped.".yellow());
                }
            }
            RunEvent::Heartbeat {
                block,
                timestamp,
                remaining,
            } => println!(
                "waiting... block {} ({}), {} to target",
                block,
                describe_timestamp(*timestamp),
                describe_duration(*remaining)
            ),
            RunEvent::CountdownStarted { .. } => {
                println!("{}", "Countdown started!".yellow().bold())
            }
            RunEvent::Countdown { remaining } => {
                if self.last_countdown.swap(*remaining, Ordering::Relaxed) != *remaining {
                    print!("\r  {}s remaining... ", remaining);
                    let _ = std::io::stdout().flush();
                }
            }
            RunEvent::PollFailed { upstream, error } => {
                println!("{} {}: {}", "poll failed on".red(), upstream, error)
            }
            RunEvent::FailedOver { from, to } => println!(
                "{} {} -> {}",
                "switched upstream:".yellow().bold(),
                from,
                to
            ),
            RunEvent::Triggered {
                block,
                timestamp,
                offset,
            } => {
                println!("{}", "Target reached!".green().bold());
                println!("  Block: {}", block);
                println!("  Block time: {}", describe_timestamp(*timestamp));
                println!("  Offset: {:+}s", offset);
            }
            RunEvent::DeadlineMissed { late_by, .. } => println!(
                "{}",
                format!("Target passed {}s ago.", late_by).yellow().bold()
            ),
            RunEvent::DeadlineOverride { proceed } => {
                if *proceed {
                    println!("{}", "Depositing after the target.".yellow());
                }
            }
            RunEvent::AttemptFailed { .. } => println!("  {}", event.description().yellow()),
            RunEvent::ActorSettled {
                position,
                succeeded,
                handle,
                detail,
                ..
            } => {
                let label = format!("[wallet {}]", position + 1);
                if *succeeded {
                    println!(
                        "  {} deposit succeeded {} ({})",
                        label.green().bold(),
                        handle.as_ref().map(|h| h.to_string()).unwrap_or_default(),
                        detail
                    );
                } else {
                    println!("  {} deposit failed: {}", label.red().bold(), detail);
                }
            }
            RunEvent::Summary(report) => self.report(report),
        }
    }
}

/// `1762437600` -> `2025-11-06 14:00:00 UTC / 2025-11-06 23:00:00 +09:00`.
pub fn describe_timestamp(ts: u64) -> String {
    match DateTime::<Utc>::from_timestamp(ts as i64, 0) {
        Some(utc) => format!(
            "{} / {}",
            utc.format("%Y-%m-%d %H:%M:%S UTC"),
            utc.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S %:z")
        ),
        None => ts.to_string(),
    }
}

/// `3725` -> `1h 2m 5s`.
pub fn describe_duration(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {}m {}s", h, m, s)
    } else if m > 0 {
        format!("{}m {}s", m, s)
    } else {
        format!("{}s", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_duration() {
        assert_eq!(describe_duration(3725), "1h 2m 5s");
        assert_eq!(describe_duration(65), "1m 5s");
        assert_eq!(describe_duration(9), "9s");
        assert_eq!(describe_duration(0), "0s");
    }

    #[test]
    fn test_describe_timestamp() {
        assert!(describe_timestamp(1_762_437_600).starts_with("2025-11-06 14:00:00 UTC"));
    }

    #[test]
    fn test_reporter_amounts() {
        let reporter = ConsoleReporter::new(6, "USDC");
        assert_eq!(reporter.amount(2_500_500_000), "2500.5 USDC");
    }
}
