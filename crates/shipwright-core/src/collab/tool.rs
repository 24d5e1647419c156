//! External-command collaborators.
//!
//! Every generation, validation, test, build, manifest and diagram step can
//! be delegated to a command that speaks a JSON stdin/stdout protocol.
//!
//! # Protocol
//! - Invocation: `<argv...> <operation>`, with `SHIPWRIGHT_ROOT` set and the
//!   project root as working directory.
//! - stdin: the request as one JSON document.
//! - stdout: the response as one JSON document.
//! - Non-zero exit is a failure; stderr and stdout excerpts are reported.
//!
//! Each call runs under a timeout. The child is spawned with
//! `kill_on_drop(true)`, so an elapsed timeout (or a dropped caller future)
//! kills the process.

use crate::collab::{
    AiCapability, AiResponse, CodeSpec, CodeValidator, CycleSummary, DeploymentHints,
    DiagramRenderer, ImageBuilder, ManifestGenerator, TestGenerator, TestRunner,
    ValidationReport,
};
use crate::config::{CollaboratorRole, CollaboratorsConfig, PhaseTimeouts};
use crate::cycle::{
    Architecture, BuildReport, ContinuityToken, CycleId, GeneratedFile, RequirementAnalysis,
    TestReport,
};
use crate::error::{Result, ShipwrightError};
use crate::io::atomic_write;
use crate::paths;
use crate::types::Phase;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

const EXCERPT_CHARS: usize = 500;

// ---------------------------------------------------------------------------
// ToolRunner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ToolRunner {
    name: String,
    argv: Vec<String>,
    root: PathBuf,
    timeout: Duration,
}

impl ToolRunner {
    pub fn new(
        name: impl Into<String>,
        argv: Vec<String>,
        root: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Self> {
        let name = name.into();
        let Some(program) = argv.first() else {
            return Err(ShipwrightError::Configuration(format!(
                "collaborator '{name}' has an empty command"
            )));
        };
        if which::which(program).is_err() && !Path::new(program).exists() {
            return Err(ShipwrightError::Configuration(format!(
                "collaborator '{name}': command '{program}' not found on PATH"
            )));
        }
        Ok(Self {
            name,
            argv,
            root: root.into(),
            timeout,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `operation` with `request` on stdin and parse stdout as `Resp`.
    pub async fn call<Req, Resp>(&self, operation: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let input = serde_json::to_vec(request)?;
        let stdout = tokio::time::timeout(self.timeout, self.spawn(operation, &input))
            .await
            .map_err(|_| ShipwrightError::Timeout {
                operation: format!("{} {operation}", self.name),
                seconds: self.timeout.as_secs(),
            })??;
        serde_json::from_slice(&stdout).map_err(|e| {
            ShipwrightError::collaborator(
                &self.name,
                format!(
                    "{operation}: unparseable response ({e}): {}",
                    excerpt(&String::from_utf8_lossy(&stdout))
                ),
            )
        })
    }

    async fn spawn(&self, operation: &str, input: &[u8]) -> Result<Vec<u8>> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| ShipwrightError::collaborator(&self.name, "empty command"))?;
        debug!(tool = %self.name, %operation, "invoking collaborator");

        let mut child = Command::new(program)
            .args(args)
            .arg(operation)
            .env("SHIPWRIGHT_ROOT", &self.root)
            .current_dir(&self.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ShipwrightError::collaborator(&self.name, format!("spawn failed: {e}")))?;

        // Feed stdin while draining stdout and stderr, so neither side can
        // stall on a full pipe.
        let stdin = child.stdin.take();
        let feed = async move {
            match stdin {
                Some(mut stdin) => stdin.write_all(input).await,
                None => Ok(()),
            }
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() {
                stdout
            } else {
                stderr
            };
            return Err(ShipwrightError::collaborator(
                &self.name,
                format!("{operation} exited with {}: {}", output.status, excerpt(&detail)),
            ));
        }
        match fed {
            // The tool answered without reading all of its input.
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
            Err(e) => {
                return Err(ShipwrightError::collaborator(
                    &self.name,
                    format!("failed to write stdin: {e}"),
                ))
            }
            Ok(()) => {}
        }
        Ok(output.stdout)
    }
}

fn excerpt(text: &str) -> String {
    text.trim().chars().take(EXCERPT_CHARS).collect()
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    requirement: &'a str,
}

#[derive(Serialize)]
struct DesignRequest<'a> {
    requirement: &'a str,
    analysis: &'a RequirementAnalysis,
    #[serde(skip_serializing_if = "Option::is_none")]
    continuity_token: Option<&'a ContinuityToken>,
}

#[derive(Serialize)]
struct GenerateCodeRequest<'a> {
    spec: &'a CodeSpec,
    constraints: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    continuity_token: Option<&'a ContinuityToken>,
}

#[derive(Serialize)]
struct FilesRequest<'a> {
    files: &'a [GeneratedFile],
}

#[derive(Serialize)]
struct FixRequest<'a> {
    files: &'a [GeneratedFile],
    errors: &'a [String],
}

#[derive(Serialize)]
struct BuildRequest<'a> {
    name: &'a str,
    files: &'a [GeneratedFile],
}

#[derive(Serialize)]
struct DiagramRequest<'a> {
    cycle_id: CycleId,
    architecture: &'a Architecture,
}

#[derive(Deserialize)]
struct FilesResponse {
    files: Vec<GeneratedFile>,
}

#[derive(Deserialize)]
struct DiagramResponse {
    diagram: String,
}

// ---------------------------------------------------------------------------
// ToolCollaborators
// ---------------------------------------------------------------------------

/// All tool-backed collaborators built from `collaborators:` in the config.
#[derive(Debug, Clone)]
pub struct ToolCollaborators {
    root: PathBuf,
    ai: ToolRunner,
    validator: ToolRunner,
    tests: ToolRunner,
    builder: ToolRunner,
    manifest: ToolRunner,
    diagram: Option<ToolRunner>,
}

impl ToolCollaborators {
    pub fn from_config(
        root: &Path,
        config: &CollaboratorsConfig,
        timeouts: &PhaseTimeouts,
    ) -> Result<Self> {
        let runner = |role: CollaboratorRole, timeout: Duration| -> Result<ToolRunner> {
            let argv = config.argv_for(role).ok_or_else(|| {
                ShipwrightError::Configuration(format!(
                    "no command configured for collaborator '{}'",
                    role.as_str()
                ))
            })?;
            ToolRunner::new(role.as_str(), argv.to_vec(), root, timeout)
        };
        let ai_timeout = [Phase::Analyzing, Phase::Designing, Phase::Coding]
            .into_iter()
            .map(|p| timeouts.for_phase(p))
            .max()
            .unwrap_or(Duration::from_secs(600));

        Ok(Self {
            root: root.to_path_buf(),
            ai: runner(CollaboratorRole::Ai, ai_timeout)?,
            validator: runner(CollaboratorRole::Validator, timeouts.for_phase(Phase::Coding))?,
            tests: runner(CollaboratorRole::Tests, timeouts.for_phase(Phase::Testing))?,
            builder: runner(CollaboratorRole::Builder, timeouts.for_phase(Phase::Building))?,
            manifest: runner(CollaboratorRole::Manifest, timeouts.for_phase(Phase::Deploying))?,
            diagram: match config.argv_for(CollaboratorRole::Diagram) {
                Some(_) => Some(runner(
                    CollaboratorRole::Diagram,
                    timeouts.for_phase(Phase::Designing),
                )?),
                None => None,
            },
        })
    }

    pub fn has_diagram_renderer(&self) -> bool {
        self.diagram.is_some()
    }
}

#[async_trait]
impl AiCapability for ToolCollaborators {
    async fn analyze(&self, requirement: &str) -> Result<AiResponse<RequirementAnalysis>> {
        self.ai.call("analyze", &AnalyzeRequest { requirement }).await
    }

    async fn design(
        &self,
        requirement: &str,
        analysis: &RequirementAnalysis,
        token: Option<&ContinuityToken>,
    ) -> Result<AiResponse<Architecture>> {
        let req = DesignRequest {
            requirement,
            analysis,
            continuity_token: token,
        };
        self.ai.call("design", &req).await
    }

    async fn generate_code(
        &self,
        spec: &CodeSpec,
        constraints: &[String],
        token: Option<&ContinuityToken>,
    ) -> Result<AiResponse<Vec<GeneratedFile>>> {
        let req = GenerateCodeRequest {
            spec,
            constraints,
            continuity_token: token,
        };
        self.ai.call("generate-code", &req).await
    }
}

#[async_trait]
impl CodeValidator for ToolCollaborators {
    async fn validate(&self, files: &[GeneratedFile]) -> Result<ValidationReport> {
        self.validator.call("validate", &FilesRequest { files }).await
    }

    async fn fix(&self, files: &[GeneratedFile], errors: &[String]) -> Result<Vec<GeneratedFile>> {
        let resp: FilesResponse = self.validator.call("fix", &FixRequest { files, errors }).await?;
        Ok(resp.files)
    }
}

#[async_trait]
impl TestGenerator for ToolCollaborators {
    async fn generate(&self, files: &[GeneratedFile]) -> Result<Vec<GeneratedFile>> {
        let resp: FilesResponse = self
            .tests
            .call("generate-tests", &FilesRequest { files })
            .await?;
        Ok(resp.files)
    }
}

#[async_trait]
impl TestRunner for ToolCollaborators {
    async fn run(&self, files: &[GeneratedFile]) -> Result<TestReport> {
        self.tests.call("run-tests", &FilesRequest { files }).await
    }
}

#[async_trait]
impl ImageBuilder for ToolCollaborators {
    async fn build(&self, name: &str, files: &[GeneratedFile]) -> Result<BuildReport> {
        self.builder.call("build", &BuildRequest { name, files }).await
    }
}

#[async_trait]
impl ManifestGenerator for ToolCollaborators {
    async fn generate(&self, summary: &CycleSummary) -> Result<DeploymentHints> {
        self.manifest.call("manifest", summary).await
    }
}

#[async_trait]
impl DiagramRenderer for ToolCollaborators {
    async fn render(&self, cycle_id: CycleId, architecture: &Architecture) -> Result<()> {
        let Some(runner) = &self.diagram else {
            return Ok(());
        };
        let resp: DiagramResponse = runner
            .call(
                "render-diagram",
                &DiagramRequest {
                    cycle_id,
                    architecture,
                },
            )
            .await?;
        atomic_write(
            &paths::cycle_diagram_path(&self.root, cycle_id),
            resp.diagram.as_bytes(),
        )
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn sh(script: &str, root: &Path, timeout: Duration) -> ToolRunner {
        ToolRunner::new(
            "test-tool",
            vec!["sh".into(), "-c".into(), script.into(), "tool".into()],
            root,
            timeout,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn parses_stdout_json() {
        let dir = TempDir::new().unwrap();
        let runner = sh(
            r#"cat >/dev/null; echo '{"value":{"title":"Todo API","complexity":"low"},"continuity_token":"t1"}'"#,
            dir.path(),
            Duration::from_secs(10),
        );
        let resp: AiResponse<RequirementAnalysis> = runner
            .call("analyze", &AnalyzeRequest { requirement: "todo" })
            .await
            .unwrap();
        assert_eq!(resp.value.title, "Todo API");
        assert_eq!(resp.continuity_token.unwrap().as_str(), "t1");
    }

    #[tokio::test]
    async fn operation_is_passed_as_last_argument() {
        let dir = TempDir::new().unwrap();
        let runner = sh(
            r#"cat >/dev/null; printf '{"valid":true,"errors":["%s"]}' "$1""#,
            dir.path(),
            Duration::from_secs(10),
        );
        let report: ValidationReport = runner
            .call("validate", &FilesRequest { files: &[] })
            .await
            .unwrap();
        assert_eq!(report.errors, vec!["validate".to_string()]);
    }

    #[tokio::test]
    async fn large_request_with_chatty_tool_completes() {
        let dir = TempDir::new().unwrap();
        let runner = sh(
            r#"head -c 200000 /dev/zero >&2; cat >/dev/null; echo '{"valid":true,"errors":[]}'"#,
            dir.path(),
            Duration::from_secs(10),
        );
        let files = vec![GeneratedFile {
            path: "src/data.js".into(),
            content: "x".repeat(300_000),
        }];
        let report: ValidationReport = runner
            .call("validate", &FilesRequest { files: &files })
            .await
            .unwrap();
        assert!(report.valid);
    }

    #[tokio::test]
    async fn nonzero_exit_reports_stderr() {
        let dir = TempDir::new().unwrap();
        let runner = sh(
            "cat >/dev/null; echo 'docker daemon unreachable' >&2; exit 3",
            dir.path(),
            Duration::from_secs(10),
        );
        let err = runner
            .call::<_, BuildReport>("build", &BuildRequest { name: "x", files: &[] })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Collaborator);
        assert!(err.to_string().contains("docker daemon unreachable"));
    }

    #[tokio::test]
    async fn timeout_kills_the_tool() {
        let dir = TempDir::new().unwrap();
        let runner = sh("sleep 30", dir.path(), Duration::from_millis(200));
        let err = runner
            .call::<_, TestReport>("run-tests", &FilesRequest { files: &[] })
            .await
            .unwrap_err();
        assert!(matches!(err, ShipwrightError::Timeout { .. }));
    }

    #[test]
    fn missing_program_is_configuration_error() {
        let err = ToolRunner::new(
            "ai",
            vec!["definitely-not-a-real-binary-xyz".into()],
            "/tmp",
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn from_config_requires_core_roles() {
        let dir = TempDir::new().unwrap();
        let mut cfg = CollaboratorsConfig::default();
        assert!(ToolCollaborators::from_config(dir.path(), &cfg, &PhaseTimeouts::default()).is_err());
        cfg.default = Some(vec!["sh".into()]);
        let tools =
            ToolCollaborators::from_config(dir.path(), &cfg, &PhaseTimeouts::default()).unwrap();
        assert!(tools.has_diagram_renderer());
    }
}
