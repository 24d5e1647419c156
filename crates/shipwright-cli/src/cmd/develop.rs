use crate::cmd::{cycle::describe, parse_cycle_id};
use crate::output::print_json;
use crate::wiring::{self, GlobalOpts};
use clap::Args;
use shipwright_core::cycle::{Cycle, CycleOptions};
use shipwright_core::events::CycleEvent;
use shipwright_core::orchestrator::Orchestrator;
use shipwright_core::types::{Phase, ServiceKind};
use std::path::Path;
use tokio::sync::broadcast::error::RecvError;

#[derive(Args)]
pub struct DevelopArgs {
    /// What the service should do, in plain language
    pub requirement: String,

    /// Service name (default: derived from the analysis)
    #[arg(long)]
    pub name: Option<String>,

    /// Target namespace (default: deploy.default_namespace)
    #[arg(long)]
    pub namespace: Option<String>,

    /// Verification-driven fix iterations before giving up
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Service kind: api, web, or fullstack
    #[arg(long)]
    pub kind: Option<ServiceKind>,
}

pub fn run(root: &Path, args: DevelopArgs, opts: GlobalOpts) -> anyhow::Result<()> {
    let options = CycleOptions {
        name: args.name,
        namespace: args.namespace,
        max_iterations: args.max_iterations,
        kind: args.kind,
    };
    let requirement = args.requirement;
    drive(root, opts, move |orch| async move {
        Ok(orch.develop(&requirement, options).await?)
    })
}

pub fn resume(root: &Path, raw_id: &str, opts: GlobalOpts) -> anyhow::Result<()> {
    let id = parse_cycle_id(raw_id)?;
    drive(root, opts, move |orch| async move { Ok(orch.resume_by_id(id).await?) })
}

/// Build the orchestrator, stream progress to stderr, cancel on Ctrl-C, and
/// report the final cycle.
fn drive<F, Fut>(root: &Path, opts: GlobalOpts, start: F) -> anyhow::Result<()>
where
    F: FnOnce(Orchestrator) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<Cycle>>,
{
    let config = wiring::load_config(root, opts.dry_run)?;
    let rt = wiring::runtime()?;
    let cycle = rt.block_on(async {
        let orch = wiring::orchestrator(root, &config).await?;

        let mut events = orch.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => progress(&event),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let canceller = orch.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupt: cancelling at the next phase boundary");
                canceller.cancel_all();
            }
        });

        start(orch).await
    })?;

    if opts.json {
        print_json(&cycle)?;
    } else {
        describe(&cycle);
    }
    if cycle.phase == Phase::Failed {
        let reason = cycle
            .error
            .as_ref()
            .map(|e| e.message.as_str())
            .unwrap_or("unknown reason");
        anyhow::bail!("cycle {} failed: {reason}", cycle.id);
    }
    Ok(())
}

fn progress(event: &CycleEvent) {
    match event {
        CycleEvent::PhaseChanged { from, to, .. } => eprintln!("  {from} -> {to}"),
        CycleEvent::IterationStarted {
            iteration,
            max_iterations,
            ..
        } => eprintln!("  iteration {iteration}/{max_iterations}"),
        CycleEvent::ErrorRecorded {
            phase,
            message,
            recoverable,
            ..
        } => {
            let kind = if *recoverable { "retrying" } else { "fatal" };
            eprintln!("  {phase} error ({kind}): {message}");
        }
        CycleEvent::CycleCompleted { cycle_id } => eprintln!("  cycle {cycle_id} completed"),
        CycleEvent::CycleFailed { cycle_id, reason } => {
            eprintln!("  cycle {cycle_id} failed: {reason}")
        }
    }
}
