use crate::output::{print_json, print_table};
use crate::wiring::{self, GlobalOpts};
use clap::Subcommand;
use shipwright_core::config::Config;
use shipwright_deploy::{Engine, Mutation};
use std::path::Path;

#[derive(Subcommand)]
pub enum DeploySubcommand {
    /// Rollout and pod health of a deployment
    Status {
        name: String,
        #[arg(long)]
        namespace: Option<String>,
    },

    /// URLs of a deployment's service
    Service {
        name: String,
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Roll back to the previous revision
    Rollback {
        name: String,
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Restart all pods of a deployment
    Restart {
        name: String,
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Set the replica count
    Scale {
        name: String,
        /// Desired replicas
        #[arg(long)]
        replicas: i32,
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Tail logs of a deployment's first pod
    Logs {
        name: String,
        #[arg(long)]
        namespace: Option<String>,
        /// Lines to show (default: deploy.log_tail_lines)
        #[arg(long)]
        tail: Option<i64>,
    },
}

pub fn run(root: &Path, subcmd: DeploySubcommand, opts: GlobalOpts) -> anyhow::Result<()> {
    let config = wiring::load_config(root, opts.dry_run)?;
    let rt = wiring::runtime()?;
    rt.block_on(async {
        let engine = wiring::engine(&config).await?;
        let ns = |explicit: Option<String>| namespace(explicit, &config);
        match subcmd {
            DeploySubcommand::Status { name, namespace } => {
                status(&engine, &name, &ns(namespace), opts.json).await
            }
            DeploySubcommand::Service { name, namespace } => {
                let urls = engine.get_service_info(&name, &ns(namespace)).await?;
                if opts.json {
                    return print_json(&urls);
                }
                println!("cluster:  {}", urls.cluster);
                println!("node:     {}", urls.node.as_deref().unwrap_or("-"));
                println!("external: {}", urls.external.as_deref().unwrap_or("-"));
                Ok(())
            }
            DeploySubcommand::Rollback { name, namespace } => {
                let outcome = engine.rollback(&name, &ns(namespace)).await?;
                report("rolled back", &name, outcome, opts.json)
            }
            DeploySubcommand::Restart { name, namespace } => {
                let outcome = engine.restart(&name, &ns(namespace)).await?;
                report("restarted", &name, outcome, opts.json)
            }
            DeploySubcommand::Scale {
                name,
                replicas,
                namespace,
            } => {
                let outcome = engine.scale(&name, &ns(namespace), replicas).await?;
                report(&format!("scaled to {replicas}"), &name, outcome, opts.json)
            }
            DeploySubcommand::Logs {
                name,
                namespace,
                tail,
            } => {
                let logs = engine.fetch_logs(&name, &ns(namespace), tail).await?;
                match logs {
                    Some(text) if opts.json => print_json(&serde_json::json!({ "logs": text })),
                    Some(text) => {
                        print!("{text}");
                        Ok(())
                    }
                    None => anyhow::bail!("no pods found for '{name}'"),
                }
            }
        }
    })
}

fn namespace(explicit: Option<String>, config: &Config) -> String {
    explicit.unwrap_or_else(|| config.deploy.default_namespace.clone())
}

async fn status(engine: &Engine, name: &str, ns: &str, json: bool) -> anyhow::Result<()> {
    let report = engine.check_deployment_health(name, ns).await?;
    if json {
        return print_json(&report);
    }
    let state = if report.healthy { "healthy" } else { "unhealthy" };
    println!("{ns}/{name}: {state}, {}/{} replicas ready", report.ready, report.desired);
    if !report.issues.is_empty() {
        let rows = report
            .issues
            .iter()
            .map(|i| vec![i.pod.clone(), i.severity.to_string(), i.message.clone()])
            .collect();
        print_table(&["POD", "SEVERITY", "ISSUE"], rows);
    }
    Ok(())
}

fn report(done: &str, name: &str, outcome: Mutation<()>, json: bool) -> anyhow::Result<()> {
    let dry_run = outcome.is_dry_run();
    if json {
        return print_json(&serde_json::json!({ "name": name, "dry_run": dry_run }));
    }
    if dry_run {
        println!("dry run: {name} would be {done}");
    } else {
        println!("{name} {done}");
    }
    Ok(())
}
