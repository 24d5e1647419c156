//! One handler per active phase. Handlers record their results on the
//! cycle through `Lifecycle::update` before returning, so a phase's result
//! is always persisted ahead of the transition that follows it.

use super::background::spawn_best_effort;
use super::Inner;
use crate::collab::{CodeSpec, CycleSummary, DeployRequest, VerifyRequest};
use crate::cycle::GeneratedFile;
use crate::deployment::{DeploymentDescriptor, DeploymentStatus, ServiceRecord};
use crate::error::{Result, ShipwrightError};
use crate::failure;
use crate::lifecycle::Lifecycle;
use crate::paths;
use crate::types::Phase;
use chrono::Utc;
use std::future::Future;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Move to the phase's forward successor.
    Advance,
    /// Go back to `target` with a recoverable error.
    Escalate { target: Phase, reason: String },
    /// Terminate the cycle.
    Fail { reason: String },
}

pub(super) async fn run_phase(inner: &Inner, lc: &mut Lifecycle) -> Result<PhaseOutcome> {
    let phase = lc.phase();
    debug!(cycle = %lc.cycle().id, %phase, "running phase");
    match phase {
        Phase::Analyzing => analyze(inner, lc).await,
        Phase::Designing => design(inner, lc).await,
        Phase::Coding => code(inner, lc).await,
        Phase::Testing => test(inner, lc).await,
        Phase::Building => build(inner, lc).await,
        Phase::Deploying => deploy(inner, lc).await,
        Phase::Verifying => verify(inner, lc).await,
        Phase::Idle | Phase::Completed | Phase::Failed => Err(ShipwrightError::InvalidPhase(
            format!("no handler for phase '{phase}'"),
        )),
    }
}

async fn timed<T>(
    inner: &Inner,
    phase: Phase,
    operation: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    let limit = inner.settings.timeouts.for_phase(phase);
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ShipwrightError::Timeout {
            operation: operation.to_string(),
            seconds: limit.as_secs(),
        })?
}

// ---------------------------------------------------------------------------
// Analyzing / Designing
// ---------------------------------------------------------------------------

async fn analyze(inner: &Inner, lc: &mut Lifecycle) -> Result<PhaseOutcome> {
    let requirement = lc.cycle().requirement.clone();
    let resp = timed(
        inner,
        Phase::Analyzing,
        "analyze",
        inner.collab.ai.analyze(&requirement),
    )
    .await?;
    lc.update(|c| {
        c.analysis = Some(resp.value);
        if resp.continuity_token.is_some() {
            c.continuity_token = resp.continuity_token;
        }
    })
    .await?;
    Ok(PhaseOutcome::Advance)
}

async fn design(inner: &Inner, lc: &mut Lifecycle) -> Result<PhaseOutcome> {
    let cycle = lc.cycle();
    let analysis = cycle
        .analysis
        .clone()
        .ok_or_else(|| ShipwrightError::MissingPrerequisite {
            phase: Phase::Designing,
            what: "a requirement analysis".into(),
        })?;
    let requirement = cycle.requirement.clone();
    let token = cycle.continuity_token.clone();

    let resp = timed(
        inner,
        Phase::Designing,
        "design",
        inner
            .collab
            .ai
            .design(&requirement, &analysis, token.as_ref()),
    )
    .await?;

    if inner.settings.render_diagrams {
        if let Some(renderer) = inner.collab.diagrams.clone() {
            let id = lc.cycle().id;
            let architecture = resp.value.clone();
            spawn_best_effort("render-diagram", async move {
                renderer.render(id, &architecture).await
            });
        }
    }

    lc.update(|c| {
        c.architecture = Some(resp.value);
        if resp.continuity_token.is_some() {
            c.continuity_token = resp.continuity_token;
        }
    })
    .await?;
    Ok(PhaseOutcome::Advance)
}

// ---------------------------------------------------------------------------
// Coding
// ---------------------------------------------------------------------------

async fn code(inner: &Inner, lc: &mut Lifecycle) -> Result<PhaseOutcome> {
    let cycle = lc.cycle();
    if cycle.architecture.is_none() {
        return Err(ShipwrightError::MissingPrerequisite {
            phase: Phase::Coding,
            what: "an architecture".into(),
        });
    }

    let constraints = if cycle.error.is_some() {
        let ctx = failure::extract(cycle, &inner.settings.verification);
        info!(
            cycle = %cycle.id,
            category = %ctx.category,
            items = ctx.items.len(),
            "regenerating with failure context"
        );
        ctx.constraints()
    } else {
        Vec::new()
    };
    let spec = CodeSpec::from_cycle(cycle);
    let token = cycle.continuity_token.clone();

    let resp = timed(
        inner,
        Phase::Coding,
        "generate_code",
        inner
            .collab
            .ai
            .generate_code(&spec, &constraints, token.as_ref()),
    )
    .await?;
    if resp.continuity_token.is_some() {
        let new_token = resp.continuity_token.clone();
        lc.update(|c| c.continuity_token = new_token).await?;
    }

    let mut files = resp.value;
    if files.is_empty() {
        return Err(ShipwrightError::collaborator(
            "ai",
            "code generation returned no files",
        ));
    }

    let mut attempt = 0;
    loop {
        for f in &files {
            paths::validate_relative_path(&f.path)?;
        }
        let report = timed(
            inner,
            Phase::Coding,
            "validate",
            inner.collab.validator.validate(&files),
        )
        .await?;
        if report.valid {
            break;
        }
        if attempt >= inner.settings.fix_attempts {
            let summary = format!(
                "{} validation error(s) remain after {attempt} fix attempt(s)",
                report.errors.len()
            );
            lc.update(|c| {
                c.files = files;
                c.validation_errors = report.errors;
            })
            .await?;
            return Err(ShipwrightError::Validation(summary));
        }
        attempt += 1;
        debug!(attempt, errors = report.errors.len(), "fixing generated code");
        files = timed(
            inner,
            Phase::Coding,
            "fix",
            inner.collab.validator.fix(&files, &report.errors),
        )
        .await?;
    }

    let id = lc.cycle().id;
    inner.collab.store.save_files(id, &files).await?;
    lc.update(|c| {
        c.files = files;
        c.validation_errors.clear();
        c.tests = None;
        c.build = None;
    })
    .await?;
    Ok(PhaseOutcome::Advance)
}

// ---------------------------------------------------------------------------
// Testing / Building
// ---------------------------------------------------------------------------

fn require_files(lc: &Lifecycle, phase: Phase) -> Result<Vec<GeneratedFile>> {
    let files = lc.cycle().files.clone();
    if files.is_empty() {
        return Err(ShipwrightError::MissingPrerequisite {
            phase,
            what: "generated source files".into(),
        });
    }
    Ok(files)
}

fn merge_files(mut base: Vec<GeneratedFile>, extra: Vec<GeneratedFile>) -> Vec<GeneratedFile> {
    for file in extra {
        match base.iter_mut().find(|f| f.path == file.path) {
            Some(existing) => *existing = file,
            None => base.push(file),
        }
    }
    base
}

async fn test(inner: &Inner, lc: &mut Lifecycle) -> Result<PhaseOutcome> {
    let files = require_files(lc, Phase::Testing)?;
    let tests = timed(
        inner,
        Phase::Testing,
        "generate_tests",
        inner.collab.test_generator.generate(&files),
    )
    .await?;
    let all = merge_files(files, tests);
    let report = timed(
        inner,
        Phase::Testing,
        "run_tests",
        inner.collab.test_runner.run(&all),
    )
    .await?;

    let id = lc.cycle().id;
    inner.collab.store.save_files(id, &all).await?;
    let succeeded = report.succeeded();
    let summary = format!("{} passed, {} failed", report.passed, report.failed);
    lc.update(|c| {
        c.files = all;
        c.tests = Some(report);
    })
    .await?;

    if !succeeded {
        return Err(ShipwrightError::TestsFailed(summary));
    }
    Ok(PhaseOutcome::Advance)
}

async fn build(inner: &Inner, lc: &mut Lifecycle) -> Result<PhaseOutcome> {
    let files = require_files(lc, Phase::Building)?;
    let name = lc.cycle().service_name();
    let report = timed(
        inner,
        Phase::Building,
        "build",
        inner.collab.builder.build(&name, &files),
    )
    .await?;
    if report.image.trim().is_empty() {
        lc.update(|c| c.build = Some(report)).await?;
        return Err(ShipwrightError::collaborator(
            "builder",
            "build reported no image reference",
        ));
    }
    info!(cycle = %lc.cycle().id, image = %report.image, "image built");
    lc.update(|c| c.build = Some(report)).await?;
    Ok(PhaseOutcome::Advance)
}

// ---------------------------------------------------------------------------
// Deploying
// ---------------------------------------------------------------------------

async fn deploy(inner: &Inner, lc: &mut Lifecycle) -> Result<PhaseOutcome> {
    let cycle = lc.cycle();
    let build = cycle
        .build
        .clone()
        .ok_or_else(|| ShipwrightError::MissingPrerequisite {
            phase: Phase::Deploying,
            what: "a built image".into(),
        })?;
    let summary = CycleSummary {
        cycle_id: cycle.id,
        name: cycle.service_name(),
        requirement: cycle.requirement.clone(),
        kind: cycle.kind,
        image: build.image.clone(),
        file_paths: cycle.files.iter().map(|f| f.path.clone()).collect(),
        architecture: cycle.architecture.clone(),
    };
    let hints = timed(
        inner,
        Phase::Deploying,
        "manifest",
        inner.collab.manifests.generate(&summary),
    )
    .await?;

    let kind = match (cycle.options.kind, hints.kind) {
        (None, Some(hinted)) => hinted,
        _ => cycle.kind,
    };
    let descriptor = DeploymentDescriptor {
        name: summary.name.clone(),
        namespace: cycle.namespace.clone(),
        image: build.image,
        replicas: hints.replicas,
        port: hints.port,
        env: hints.env,
        persistence: hints.persistence,
        health_path: hints.health_path,
        scrape_metrics: None,
    };
    let request = DeployRequest {
        cycle_id: cycle.id,
        descriptor,
    };
    let record = timed(
        inner,
        Phase::Deploying,
        "deploy",
        inner.collab.engine.deploy(&request),
    )
    .await?;

    let status = record.status;
    let url = record
        .urls
        .as_ref()
        .map(|u| u.best().to_string())
        .unwrap_or_default();
    lc.update(|c| {
        c.kind = kind;
        c.deployment = Some(record);
    })
    .await?;

    if status == DeploymentStatus::Degraded {
        return Err(ShipwrightError::DeploymentUnhealthy(format!(
            "{} did not become healthy",
            summary.name
        )));
    }

    let service = ServiceRecord {
        id: Uuid::new_v4(),
        cycle_id: summary.cycle_id,
        name: summary.name,
        namespace: request.descriptor.namespace,
        kind,
        url,
        endpoints: hints.endpoints,
        created_at: Utc::now(),
    };
    inner.collab.directory.create(&service).await?;
    Ok(PhaseOutcome::Advance)
}

// ---------------------------------------------------------------------------
// Verifying
// ---------------------------------------------------------------------------

async fn verify(inner: &Inner, lc: &mut Lifecycle) -> Result<PhaseOutcome> {
    let cycle = lc.cycle();
    let deployment =
        cycle
            .deployment
            .clone()
            .ok_or_else(|| ShipwrightError::MissingPrerequisite {
                phase: Phase::Verifying,
                what: "a deployment".into(),
            })?;
    let endpoints = inner
        .collab
        .directory
        .get_by_cycle_id(cycle.id)
        .await?
        .map(|r| r.endpoints)
        .filter(|e| !e.is_empty());
    let request = VerifyRequest {
        cycle_id: cycle.id,
        deployment,
        requirement: cycle.requirement.clone(),
        kind: cycle.kind,
        endpoints,
    };
    let outcome = timed(
        inner,
        Phase::Verifying,
        "verify",
        inner.collab.engine.verify(&request),
    )
    .await?;

    let result = outcome.result;
    let success = result.success;
    let summary = result.summary();
    lc.update(|c| {
        c.verification = Some(result);
        if let (Some(d), Some(tail)) = (c.deployment.as_mut(), outcome.log_tail) {
            d.log_tail = Some(tail);
        }
    })
    .await?;

    if success {
        info!(cycle = %lc.cycle().id, %summary, "verification passed");
        commit_best_effort(inner, lc);
        return Ok(PhaseOutcome::Advance);
    }

    if lc.increment_iteration().await? {
        Ok(PhaseOutcome::Escalate {
            target: Phase::Coding,
            reason: format!("verification failed: {summary}"),
        })
    } else {
        Ok(PhaseOutcome::Fail {
            reason: format!(
                "verification failed after {} iteration(s): {summary}",
                lc.cycle().iterations
            ),
        })
    }
}

fn commit_best_effort(inner: &Inner, lc: &Lifecycle) {
    if !inner.settings.auto_commit {
        return;
    }
    let (Some(vcs), Some(root)) = (
        inner.collab.vcs.clone(),
        inner.settings.project_root.clone(),
    ) else {
        warn!("auto_commit is on but no version control or project root is configured");
        return;
    };
    let message = format!(
        "shipwright: {} ({})",
        lc.cycle().service_name(),
        lc.cycle().id
    );
    spawn_best_effort("auto-commit", async move {
        if let Some(hash) = vcs.commit(&root, &message).await? {
            info!(%hash, "committed cycle output");
        }
        Ok(())
    });
}
