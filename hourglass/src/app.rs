//! One deposit run, from connecting to the final report.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use colored::*;
use dispatch_engine::{
    ActorRegistry, BlockSample, ClockMonitor, Connection, Coordinator, DeadlineDecider,
    DeadlinePolicy, Dispatcher, EventSink, ExitStatus, MonitorState, NullSink, Preparer, RunEvent,
    RunOutcome, RunReport, RunState, UpstreamSelector,
};
use evm_upstream::EvmConnection;
use inquire::Confirm;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::Args;
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::output::{ConsoleReporter, describe_duration};

/// Process exit codes.
pub mod exit_code {
    pub const ALL_SUCCEEDED: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const PARTIAL: i32 = 2;
    pub const ABORTED: i32 = 3;
}

pub fn exit_code_for(outcome: &RunOutcome, report: &RunReport) -> i32 {
    match outcome {
        RunOutcome::Aborted(_) => exit_code::ABORTED,
        RunOutcome::Dispatched { .. } => match report.exit_status() {
            ExitStatus::AllSucceeded => exit_code::ALL_SUCCEEDED,
            ExitStatus::Partial => exit_code::PARTIAL,
            ExitStatus::NoneSucceeded => exit_code::FAILURE,
        },
    }
}

/// Asks the operator on the terminal whether to deposit after the target.
struct PromptDecider;

#[async_trait]
impl DeadlineDecider for PromptDecider {
    async fn proceed_after_deadline(&self, sample: BlockSample, late_by: u64) -> bool {
        let message = format!(
            "Target passed {} ago (block {}). Deposit anyway?",
            describe_duration(late_by),
            sample.number
        );
        let answer =
            tokio::task::spawn_blocking(move || Confirm::new(&message).with_default(false).prompt())
                .await;
        match answer {
            Ok(Ok(proceed)) => proceed,
            Ok(Err(e)) => {
                warn!("Deadline prompt failed: {}", e);
                false
            }
            Err(e) => {
                warn!("Deadline prompt task failed: {}", e);
                false
            }
        }
    }
}

fn deadline_policy(args: &Args) -> DeadlinePolicy {
    if args.proceed_late {
        DeadlinePolicy::Proceed
    } else if args.interactive() {
        DeadlinePolicy::Ask(Arc::new(PromptDecider))
    } else {
        DeadlinePolicy::Abort
    }
}

async fn confirm(message: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || Confirm::new(&message).with_default(true).prompt())
        .await
        .map_err(|e| Error::Other(e.to_string()))?
        .map_err(Error::from)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterruptAction {
    StopMonitoring,
    Exit,
}

/// Ctrl-C state for one run.
///
/// The first press while the monitor is polling stops it gracefully. A
/// second press, or any press once the monitor has handed over to dispatch,
/// ends the process: in-flight deposits cannot be recalled, only abandoned.
struct Interrupts {
    cancel: CancellationToken,
    monitoring_over: AtomicBool,
}

impl Interrupts {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            monitoring_over: AtomicBool::new(false),
        }
    }

    fn on_interrupt(&self) -> InterruptAction {
        if self.cancel.is_cancelled() || self.monitoring_over.load(Ordering::SeqCst) {
            return InterruptAction::Exit;
        }
        self.cancel.cancel();
        InterruptAction::StopMonitoring
    }

    fn listen(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                    return;
                }
                match self.on_interrupt() {
                    InterruptAction::StopMonitoring => {
                        warn!("Interrupted, stopping. Press Ctrl-C again to exit immediately")
                    }
                    InterruptAction::Exit => {
                        error!("Interrupted, exiting. Transactions already sent may still land");
                        std::process::exit(exit_code::ABORTED);
                    }
                }
            }
        });
    }
}

/// Forwards events, noting when the monitor stops polling.
struct InterruptAwareSink {
    inner: Arc<dyn EventSink>,
    interrupts: Arc<Interrupts>,
}

impl EventSink for InterruptAwareSink {
    fn emit(&self, event: RunEvent) {
        if let RunEvent::StateChanged {
            from: MonitorState::Polling,
            ..
        } = &event
        {
            self.interrupts.monitoring_over.store(true, Ordering::SeqCst);
        }
        self.inner.emit(event);
    }
}

/// Run every phase and return the process exit code.
pub async fn execute(args: &Args, config: AppConfig) -> Result<i32> {
    let reporter = Arc::new(ConsoleReporter::new(
        config.token_decimals,
        config.token_symbol.clone(),
    ));
    let sink: Arc<dyn EventSink> = if args.json {
        Arc::new(NullSink)
    } else {
        reporter.clone()
    };
    let pretty = !args.json;

    let keys = Arc::new(config.keys.clone());
    let mut registry = ActorRegistry::from_source(keys.as_ref())?;

    if pretty {
        reporter.banner(&config.window, config.amount, registry.len());
        reporter.header("Connecting");
    }
    let primary = EvmConnection::connect(
        "primary",
        config.primary.clone(),
        keys.clone(),
        config.evm.clone(),
    );
    let handshake = primary.handshake().await?;
    if pretty {
        println!(
            "{} chain {}, block {}",
            "Primary RPC reachable:".green(),
            handshake.chain_id,
            handshake.block.number
        );
    }

    match primary.token_decimals().await {
        Ok(decimals) if decimals != config.token_decimals => {
            return Err(Error::config(format!(
                "token reports {} decimals but {} are configured",
                decimals, config.token_decimals
            )));
        }
        Ok(_) => {}
        Err(e) => warn!("Could not read token decimals: {}", e),
    }

    let secondary = config.secondary.clone().map(|url| {
        Arc::new(EvmConnection::connect("secondary", url, keys.clone(), config.evm.clone()))
            as Arc<dyn Connection>
    });
    if let Some(secondary) = &secondary {
        info!(upstream = %secondary.label(), "Secondary upstream configured");
    }
    let upstream = Arc::new(UpstreamSelector::new(Arc::new(primary), secondary));

    let preparer = Preparer::new(upstream.clone(), config.retry, sink.clone(), config.amount);

    if pretty {
        reporter.header("Checking balances");
    }
    let inspection = preparer.inspect(&mut registry).await;

    if !args.skip_approve && !args.check_only {
        if pretty {
            reporter.header("Approving");
        }
        preparer.authorize(&mut registry).await;
    }

    if pretty {
        reporter.header("Vault");
    }
    let vault = preparer.vault_state(&registry).await;

    if pretty {
        reporter.header("Wallets");
        reporter.wallet_table(&registry, config.amount);
    }

    let ready = registry.ready_count(config.amount);
    if args.check_only {
        if args.json {
            let wallets: Vec<_> = registry
                .iter()
                .map(|(actor, status)| {
                    json!({
                        "position": actor.position,
                        "id": actor.id,
                        "balance": status.ready_balance.map(|b| b.to_string()),
                        "allowance": status.allowance.map(|a| a.to_string()),
                        "ready": status.is_ready(config.amount),
                    })
                })
                .collect();
            let report = json!({
                "status": "checked",
                "ready": ready,
                "total": registry.len(),
                "unreadable": inspection.unreadable,
                "vault_warnings": vault.map(|v| v.warnings).unwrap_or_default(),
                "wallets": wallets,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!(
                "\n{} {}/{} wallets ready",
                "Check complete:".green().bold(),
                ready,
                registry.len()
            );
        }
        return Ok(if ready > 0 {
            exit_code::ALL_SUCCEEDED
        } else {
            exit_code::FAILURE
        });
    }

    preparer.ensure_ready(&registry)?;

    if args.interactive() {
        let message = format!(
            "Deposit {} from each of {} wallets at {}?",
            config.display_amount(config.amount),
            registry.len(),
            config.window.target()
        );
        if !confirm(message).await? {
            println!("{}", "Cancelled.".yellow());
            return Ok(exit_code::ABORTED);
        }
    }

    let cancel = CancellationToken::new();
    let interrupts = Arc::new(Interrupts::new(cancel.clone()));
    interrupts.clone().listen();
    let sink: Arc<dyn EventSink> = Arc::new(InterruptAwareSink {
        inner: sink,
        interrupts,
    });

    let monitor = ClockMonitor::new(
        config.window,
        config.poll.clone(),
        upstream.clone(),
        sink.clone(),
    );
    let dispatcher = Dispatcher::new(upstream.clone(), config.retry, sink.clone());
    let coordinator = Coordinator::new(monitor, dispatcher, sink, config.amount);

    if pretty {
        reporter.header("Monitoring");
    }
    let mut state = RunState::new(registry);
    let outcome = coordinator.run(&mut state, &deadline_policy(args), &cancel).await;
    cancel.cancel();

    let report = RunReport::from_state(&state, config.amount);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        total = report.total,
        "Run finished"
    );
    Ok(exit_code_for(&outcome, &report))
}
