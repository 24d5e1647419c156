use crate::cmd::parse_cycle_id;
use crate::output::{print_json, print_table, truncate};
use crate::wiring;
use anyhow::Context;
use clap::Args;
use shipwright_core::collab::{CycleStore, ServiceDirectory};
use shipwright_core::deployment::EndpointSpec;
use shipwright_core::store::{YamlCycleStore, YamlServiceDirectory};
use shipwright_core::types::ServiceKind;
use shipwright_deploy::verify::{Verifier, VerifyTarget};
use std::path::Path;

#[derive(Args)]
pub struct VerifyArgs {
    /// Base URL of the running service
    #[arg(long, required_unless_present = "cycle")]
    pub url: Option<String>,

    /// Take URL, kind, requirement and endpoints from a stored cycle
    #[arg(long)]
    pub cycle: Option<String>,

    /// Requirement text used to infer endpoints
    #[arg(long)]
    pub requirement: Option<String>,

    /// Service kind: api, web, or fullstack
    #[arg(long)]
    pub kind: Option<ServiceKind>,

    /// Health endpoint path (default: verification.health_path)
    #[arg(long)]
    pub health_path: Option<String>,

    /// Endpoint to check, as "METHOD /path"; repeatable
    #[arg(long = "endpoint", value_name = "METHOD PATH")]
    pub endpoints: Vec<String>,
}

pub fn run(root: &Path, args: VerifyArgs, json: bool) -> anyhow::Result<()> {
    let config = wiring::load_config(root, false)?;
    let rt = wiring::runtime()?;
    let result = rt.block_on(async {
        let target = target(root, args, &config.verification.health_path).await?;
        let verifier = Verifier::new(config.verification.clone())?;
        anyhow::Ok(verifier.verify(&target).await)
    })?;

    if json {
        print_json(&result)?;
    } else {
        let rows = result
            .checks
            .iter()
            .map(|c| {
                vec![
                    if c.passed { "pass" } else { "FAIL" }.to_string(),
                    c.name.clone(),
                    c.details.status.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
                    format!("{:.2}", c.confidence),
                    truncate(c.details.note.as_deref().unwrap_or(""), 56),
                ]
            })
            .collect();
        print_table(&["", "CHECK", "STATUS", "CONF", "NOTE"], rows);
        println!();
        println!("{}", result.summary());
    }

    if !result.success {
        anyhow::bail!("verification failed: {}", result.summary());
    }
    Ok(())
}

async fn target(root: &Path, args: VerifyArgs, default_health: &str) -> anyhow::Result<VerifyTarget> {
    let mut endpoints = args
        .endpoints
        .iter()
        .map(|raw| parse_endpoint(raw))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let mut url = args.url;
    let mut kind = args.kind;
    let mut requirement = args.requirement;
    let mut health_path = args.health_path;

    if let Some(raw) = &args.cycle {
        let id = parse_cycle_id(raw)?;
        let cycle = YamlCycleStore::new(root)
            .get(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("cycle {id} not found"))?;
        if let Some(dep) = &cycle.deployment {
            url = url.or_else(|| dep.urls.as_ref().map(|u| u.best().to_string()));
            health_path = health_path.or_else(|| Some(dep.health_path.clone()));
        }
        kind = kind.or(Some(cycle.kind));
        requirement = requirement.or(Some(cycle.requirement));
        if endpoints.is_empty() {
            if let Some(service) = YamlServiceDirectory::new(root).get_by_cycle_id(id).await? {
                endpoints = service.endpoints;
            }
        }
    }

    let url = url.context("no URL given and the cycle has no deployment URL")?;
    Ok(VerifyTarget {
        health_path: health_path.unwrap_or_else(|| default_health.to_string()),
        requirement: requirement.unwrap_or_default(),
        endpoints: (!endpoints.is_empty()).then_some(endpoints),
        ..VerifyTarget::new(url, kind.unwrap_or_default())
    })
}

fn parse_endpoint(raw: &str) -> anyhow::Result<EndpointSpec> {
    let (method, path) = raw
        .trim()
        .split_once(char::is_whitespace)
        .with_context(|| format!("endpoint '{raw}' must look like 'GET /api/items'"))?;
    let path = path.trim();
    if !path.starts_with('/') {
        anyhow::bail!("endpoint path '{path}' must start with '/'");
    }
    Ok(EndpointSpec::new(method, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_method_and_path() {
        let ep = parse_endpoint("post /api/items").unwrap();
        assert_eq!(ep.method, "POST");
        assert_eq!(ep.path, "/api/items");
    }

    #[test]
    fn rejects_malformed_endpoints() {
        assert!(parse_endpoint("/api/items").is_err());
        assert!(parse_endpoint("GET api/items").is_err());
    }
}
