use crate::cmd::parse_cycle_id;
use crate::output::{print_json, print_table, truncate};
use clap::Subcommand;
use shipwright_core::collab::{CycleStore, ServiceDirectory};
use shipwright_core::cycle::Cycle;
use shipwright_core::store::{YamlCycleStore, YamlServiceDirectory};
use std::path::Path;

#[derive(Subcommand)]
pub enum CycleSubcommand {
    /// List stored cycles, newest first
    List,

    /// Show one cycle in detail
    Show {
        /// Cycle id
        id: String,
    },

    /// List the generated files of a cycle
    Files {
        /// Cycle id
        id: String,
    },
}

pub fn run(root: &Path, subcmd: CycleSubcommand, json: bool) -> anyhow::Result<()> {
    let rt = crate::wiring::runtime()?;
    rt.block_on(async {
        match subcmd {
            CycleSubcommand::List => list(root, json).await,
            CycleSubcommand::Show { id } => show(root, &id, json).await,
            CycleSubcommand::Files { id } => files(root, &id, json).await,
        }
    })
}

async fn load(root: &Path, raw_id: &str) -> anyhow::Result<Cycle> {
    let id = parse_cycle_id(raw_id)?;
    YamlCycleStore::new(root)
        .get(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("cycle {id} not found"))
}

async fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let cycles = YamlCycleStore::new(root).list().await?;
    if json {
        let rows: Vec<serde_json::Value> = cycles
            .iter()
            .map(|c| {
                serde_json::json!({
                    "id": c.id,
                    "phase": c.phase,
                    "name": c.service_name(),
                    "requirement": c.requirement,
                    "iterations": c.iterations,
                    "updated_at": c.updated_at,
                })
            })
            .collect();
        return print_json(&rows);
    }
    if cycles.is_empty() {
        println!("No cycles.");
        return Ok(());
    }
    let rows = cycles
        .iter()
        .map(|c| {
            vec![
                c.id.to_string(),
                c.phase.to_string(),
                c.service_name(),
                format!("{}/{}", c.iterations, c.max_iterations),
                truncate(&c.requirement, 48),
            ]
        })
        .collect();
    print_table(&["ID", "PHASE", "SERVICE", "ITER", "REQUIREMENT"], rows);
    Ok(())
}

async fn show(root: &Path, raw_id: &str, json: bool) -> anyhow::Result<()> {
    let cycle = load(root, raw_id).await?;
    if json {
        return print_json(&cycle);
    }
    describe(&cycle);
    if let Some(service) = YamlServiceDirectory::new(root)
        .get_by_cycle_id(cycle.id)
        .await?
    {
        println!("Registered:  {} ({} endpoints)", service.url, service.endpoints.len());
    }
    Ok(())
}

async fn files(root: &Path, raw_id: &str, json: bool) -> anyhow::Result<()> {
    let id = parse_cycle_id(raw_id)?;
    let files = YamlCycleStore::new(root).load_files(id).await?;
    if json {
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        return print_json(&paths);
    }
    if files.is_empty() {
        println!("No generated files.");
        return Ok(());
    }
    let rows = files
        .iter()
        .map(|f| vec![f.path.clone(), f.content.lines().count().to_string()])
        .collect();
    print_table(&["PATH", "LINES"], rows);
    Ok(())
}

/// Human-readable cycle summary, shared with `develop` and `resume`.
pub(crate) fn describe(cycle: &Cycle) {
    println!("Cycle:       {}", cycle.id);
    println!("Phase:       {}", cycle.phase);
    println!("Service:     {} ({}, ns {})", cycle.service_name(), cycle.kind, cycle.namespace);
    println!("Iterations:  {}/{}", cycle.iterations, cycle.max_iterations);
    println!("Requirement: {}", truncate(&cycle.requirement, 72));
    if let Some(analysis) = &cycle.analysis {
        println!("Title:       {} ({})", analysis.title, analysis.complexity);
    }
    if !cycle.files.is_empty() {
        println!("Files:       {}", cycle.files.len());
    }
    if let Some(build) = &cycle.build {
        println!("Image:       {}", build.image);
    }
    if let Some(dep) = &cycle.deployment {
        println!("Deployment:  {}/{} {} ({})", dep.namespace, dep.name, dep.status, dep.action);
        if let Some(urls) = &dep.urls {
            println!("URL:         {}", urls.best());
        }
    }
    if let Some(v) = &cycle.verification {
        println!("Verified:    {}", v.summary());
        for check in v.failed_checks() {
            let note = check.details.note.as_deref().unwrap_or("");
            println!("  failed: {} {}", check.name, truncate(note, 60));
        }
    }
    if let Some(err) = &cycle.error {
        println!("Error:       [{}] {}", err.phase, truncate(&err.message, 72));
    }
}
