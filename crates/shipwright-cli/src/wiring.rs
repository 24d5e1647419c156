//! Assembly of the orchestrator and deployment engine from `.shipwright/config.yaml`.

use anyhow::Context;
use shipwright_core::collab::git::GitCommitter;
use shipwright_core::collab::tool::ToolCollaborators;
use shipwright_core::collab::{Collaborators, DiagramRenderer, VersionControl};
use shipwright_core::config::Config;
use shipwright_core::orchestrator::{Orchestrator, OrchestratorSettings};
use shipwright_core::store::{YamlCycleStore, YamlServiceDirectory};
use shipwright_deploy::cluster::KubeCluster;
use shipwright_deploy::{ClusterDeploymentEngine, Engine};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Flags shared by every command that may touch the cluster.
#[derive(Debug, Clone, Copy)]
pub struct GlobalOpts {
    pub json: bool,
    pub dry_run: bool,
}

pub fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Runtime::new()?)
}

/// Load the config, folding in the `--dry-run` override.
pub fn load_config(root: &Path, dry_run: bool) -> anyhow::Result<Config> {
    let mut config = Config::load(root).context("failed to load .shipwright/config.yaml")?;
    if dry_run {
        config.deploy.dry_run = true;
    }
    Ok(config)
}

pub async fn engine(config: &Config) -> anyhow::Result<Arc<Engine>> {
    let cluster = KubeCluster::connect()
        .await
        .context("failed to connect to the cluster")?;
    let engine = Engine::from_config(Arc::new(cluster), &config.deploy, &config.verification)?;
    if engine.guardrails().is_dry_run() {
        info!("dry run: cluster mutations are recorded, not applied");
    }
    Ok(Arc::new(engine))
}

pub async fn orchestrator(root: &Path, config: &Config) -> anyhow::Result<Orchestrator> {
    let tools = Arc::new(ToolCollaborators::from_config(
        root,
        &config.collaborators,
        &config.orchestrator.phase_timeouts,
    )?);
    let engine = engine(config).await?;

    let vcs: Option<Arc<dyn VersionControl>> =
        if config.orchestrator.auto_commit && GitCommitter::available() {
            Some(Arc::new(GitCommitter::default()) as Arc<dyn VersionControl>)
        } else {
            None
        };
    let diagrams: Option<Arc<dyn DiagramRenderer>> =
        if config.orchestrator.render_diagrams && tools.has_diagram_renderer() {
            Some(tools.clone() as Arc<dyn DiagramRenderer>)
        } else {
            None
        };
    debug!(
        auto_commit = vcs.is_some(),
        diagrams = diagrams.is_some(),
        "collaborators ready"
    );

    let collab = Collaborators {
        ai: tools.clone(),
        validator: tools.clone(),
        test_generator: tools.clone(),
        test_runner: tools.clone(),
        builder: tools.clone(),
        manifests: tools,
        store: Arc::new(YamlCycleStore::new(root)),
        directory: Arc::new(YamlServiceDirectory::new(root)),
        engine: Arc::new(ClusterDeploymentEngine::new(engine)),
        vcs,
        diagrams,
    };
    let settings = OrchestratorSettings::from_config(config, Some(root.to_path_buf()));
    Ok(Orchestrator::new(collab, settings))
}
