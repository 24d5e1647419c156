use super::*;
use crate::collab::{
    AiCapability, AiResponse, CodeSpec, CodeValidator, CycleStore, CycleSummary, DeployRequest,
    DeploymentEngine, DeploymentHints, ImageBuilder, ManifestGenerator, ServiceDirectory,
    TestGenerator, TestRunner, ValidationReport, VerifyRequest,
};
use crate::cycle::{
    Architecture, BuildReport, ContinuityToken, GeneratedFile, RequirementAnalysis, TestReport,
};
use crate::deployment::{
    DeployAction, DeploymentRecord, DeploymentStatus, EndpointSpec, ServiceUrls,
};
use crate::store::{MemoryCycleStore, MemoryServiceDirectory};
use crate::verification::{
    CheckDetails, CheckType, VerificationCheck, VerificationOutcome, VerificationResult,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Semaphore as Gate;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
struct World {
    /// Verification verdicts in order; `true` once exhausted.
    verdicts: Mutex<VecDeque<bool>>,
    /// Analysis fails with a transient error this many times first.
    analyze_failures: AtomicU32,
    /// When set, analysis blocks until a permit is added.
    gate: Option<Arc<Gate>>,
    deploy_error: Mutex<Option<ShipwrightError>>,
    code_calls: AtomicU32,
    verify_calls: AtomicU32,
    constraints: Mutex<Vec<Vec<String>>>,
    tokens_seen: Mutex<Vec<Option<String>>>,
}

#[async_trait]
impl AiCapability for World {
    async fn analyze(&self, requirement: &str) -> crate::Result<AiResponse<RequirementAnalysis>> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate open").forget();
        }
        if self
            .analyze_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ShipwrightError::TransientInfra("ai unavailable".into()));
        }
        Ok(AiResponse {
            value: RequirementAnalysis {
                title: format!("Product API {}", requirement.len()),
                complexity: "low".into(),
                capabilities: vec!["crud".into()],
            },
            continuity_token: Some(ContinuityToken::new("tok-1")),
        })
    }

    async fn design(
        &self,
        _requirement: &str,
        _analysis: &RequirementAnalysis,
        token: Option<&ContinuityToken>,
    ) -> crate::Result<AiResponse<Architecture>> {
        self.tokens_seen
            .lock()
            .unwrap()
            .push(token.map(|t| t.as_str().to_string()));
        Ok(AiResponse::new(Architecture {
            overview: "single express service".into(),
            components: vec![],
            data_flows: vec![],
        }))
    }

    async fn generate_code(
        &self,
        _spec: &CodeSpec,
        constraints: &[String],
        _token: Option<&ContinuityToken>,
    ) -> crate::Result<AiResponse<Vec<GeneratedFile>>> {
        self.code_calls.fetch_add(1, Ordering::SeqCst);
        self.constraints.lock().unwrap().push(constraints.to_vec());
        Ok(AiResponse::new(vec![GeneratedFile {
            path: "src/index.ts".into(),
            content: "app.listen(3000)".into(),
        }]))
    }
}

#[async_trait]
impl CodeValidator for World {
    async fn validate(&self, _files: &[GeneratedFile]) -> crate::Result<ValidationReport> {
        Ok(ValidationReport {
            valid: true,
            errors: vec![],
        })
    }

    async fn fix(
        &self,
        files: &[GeneratedFile],
        _errors: &[String],
    ) -> crate::Result<Vec<GeneratedFile>> {
        Ok(files.to_vec())
    }
}

#[async_trait]
impl TestGenerator for World {
    async fn generate(&self, _files: &[GeneratedFile]) -> crate::Result<Vec<GeneratedFile>> {
        Ok(vec![GeneratedFile {
            path: "test/index.test.ts".into(),
            content: "it('works')".into(),
        }])
    }
}

#[async_trait]
impl TestRunner for World {
    async fn run(&self, files: &[GeneratedFile]) -> crate::Result<TestReport> {
        Ok(TestReport {
            passed: files.len() as u32,
            failed: 0,
            output: String::new(),
        })
    }
}

#[async_trait]
impl ImageBuilder for World {
    async fn build(&self, name: &str, _files: &[GeneratedFile]) -> crate::Result<BuildReport> {
        Ok(BuildReport {
            image: format!("registry.local/{name}:1"),
            log: String::new(),
        })
    }
}

#[async_trait]
impl ManifestGenerator for World {
    async fn generate(&self, _summary: &CycleSummary) -> crate::Result<DeploymentHints> {
        Ok(DeploymentHints {
            endpoints: vec![EndpointSpec::new("GET", "/api/products")],
            ..Default::default()
        })
    }
}

#[async_trait]
impl DeploymentEngine for World {
    async fn deploy(&self, request: &DeployRequest) -> crate::Result<DeploymentRecord> {
        if let Some(e) = self.deploy_error.lock().unwrap().take() {
            return Err(e);
        }
        let d = &request.descriptor;
        Ok(DeploymentRecord {
            name: d.name.clone(),
            namespace: d.namespace.clone(),
            image: d.image.clone(),
            replicas: d.replicas,
            port: d.port,
            status: DeploymentStatus::Running,
            action: DeployAction::Created,
            urls: Some(ServiceUrls {
                cluster: format!("http://{}.{}.svc.cluster.local:80", d.name, d.namespace),
                node: Some("http://10.0.0.5:30080".into()),
                external: None,
            }),
            health_path: d.health_path.clone(),
            log_tail: None,
            deployed_at: chrono::Utc::now(),
        })
    }

    async fn verify(&self, request: &VerifyRequest) -> crate::Result<VerificationOutcome> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        assert!(request.endpoints.is_some(), "directory endpoints are forwarded");
        let passed = self.verdicts.lock().unwrap().pop_front().unwrap_or(true);
        let check = VerificationCheck {
            check_type: CheckType::Endpoint,
            name: "GET /api/products".into(),
            passed,
            confidence: 0.95,
            duration_ms: 1,
            details: CheckDetails {
                status: Some(if passed { 200 } else { 500 }),
                body_excerpt: Some(if passed { "[]" } else { "internal error" }.into()),
                ..Default::default()
            },
        };
        Ok(VerificationOutcome {
            result: VerificationResult::from_checks(vec![check], 0.9, 1),
            log_tail: (!passed).then(|| "TypeError: cannot read properties of undefined".into()),
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    orch: Orchestrator,
    world: Arc<World>,
    store: Arc<MemoryCycleStore>,
    directory: Arc<MemoryServiceDirectory>,
}

fn harness(world: World, max_concurrent: usize, max_iterations: u32) -> Harness {
    let world = Arc::new(world);
    let store = Arc::new(MemoryCycleStore::default());
    let directory = Arc::new(MemoryServiceDirectory::default());
    let collab = Collaborators {
        ai: world.clone(),
        validator: world.clone(),
        test_generator: world.clone(),
        test_runner: world.clone(),
        builder: world.clone(),
        manifests: world.clone(),
        store: store.clone(),
        directory: directory.clone(),
        engine: world.clone(),
        vcs: None,
        diagrams: None,
    };
    let settings = OrchestratorSettings {
        max_concurrent_cycles: max_concurrent,
        max_iterations,
        ..Default::default()
    };
    Harness {
        orch: Orchestrator::new(collab, settings),
        world,
        store,
        directory,
    }
}

async fn wait_for_active(orch: &Orchestrator, n: usize) {
    for _ in 0..200 {
        if orch.active_cycles().len() == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {n} active cycles");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_path_completes_and_registers_service() {
    let h = harness(World::default(), 2, 3);
    let mut rx = h.orch.subscribe();
    let cycle = h
        .orch
        .develop("products api with prices", CycleOptions::default())
        .await
        .unwrap();

    assert_eq!(cycle.phase, Phase::Completed);
    assert_eq!(cycle.iterations, 0);
    assert!(cycle.error.is_none());
    assert_eq!(cycle.files.len(), 2);
    assert!(!h.orch.is_active(cycle.id));

    let service = h
        .directory
        .get_by_cycle_id(cycle.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(service.url, "http://10.0.0.5:30080");

    let mut visited = vec![];
    while let Ok(ev) = rx.try_recv() {
        if let CycleEvent::PhaseChanged { to, .. } = ev {
            visited.push(to);
        }
    }
    assert_eq!(
        visited,
        vec![
            Phase::Analyzing,
            Phase::Designing,
            Phase::Coding,
            Phase::Testing,
            Phase::Building,
            Phase::Deploying,
            Phase::Verifying,
            Phase::Completed
        ]
    );
    assert_eq!(
        h.world.tokens_seen.lock().unwrap().as_slice(),
        &[Some("tok-1".to_string())]
    );
}

#[tokio::test]
async fn verification_failure_regenerates_code_with_context() {
    let world = World {
        verdicts: Mutex::new(VecDeque::from([false, true])),
        ..Default::default()
    };
    let h = harness(world, 2, 3);
    let mut rx = h.orch.subscribe();
    let cycle = h
        .orch
        .develop("products api", CycleOptions::default())
        .await
        .unwrap();

    assert_eq!(cycle.phase, Phase::Completed);
    assert_eq!(cycle.iterations, 1);
    assert!(cycle.error.is_none());
    assert_eq!(h.world.code_calls.load(Ordering::SeqCst), 2);

    let constraints = h.world.constraints.lock().unwrap().clone();
    assert!(constraints[0].is_empty());
    assert!(constraints[1]
        .iter()
        .any(|c| c.starts_with("[VERIFICATION] GET /api/products: FAILED")));
    assert!(constraints[1].iter().any(|c| c.contains("TypeError")));

    let mut escalated = false;
    while let Ok(ev) = rx.try_recv() {
        if let CycleEvent::PhaseChanged { from, to, .. } = ev {
            if from == Phase::Verifying && to != Phase::Completed {
                assert_eq!(to, Phase::Coding);
                escalated = true;
            }
        }
    }
    assert!(escalated);
}

#[tokio::test]
async fn iteration_cap_fails_regardless_of_retry_policy() {
    let world = World {
        verdicts: Mutex::new(VecDeque::from([false; 10])),
        ..Default::default()
    };
    let h = harness(world, 2, 3);
    let cycle = h
        .orch
        .develop("products api", CycleOptions::default())
        .await
        .unwrap();

    assert_eq!(cycle.phase, Phase::Failed);
    assert_eq!(cycle.iterations, 3);
    assert_eq!(h.world.verify_calls.load(Ordering::SeqCst), 3);
    let err = cycle.error.as_ref().unwrap();
    assert!(!err.recoverable);
    assert_eq!(err.phase, Phase::Verifying);
    assert_eq!(cycle.retries_for(Phase::Verifying), 0);
}

#[tokio::test]
async fn cancel_fails_cycle_non_recoverably() {
    let gate = Arc::new(Gate::new(0));
    let world = World {
        gate: Some(gate.clone()),
        ..Default::default()
    };
    let h = harness(world, 2, 3);
    let orch = h.orch.clone();
    let task = tokio::spawn(async move {
        orch.develop("products api", CycleOptions::default())
            .await
    });

    wait_for_active(&h.orch, 1).await;
    let id = h.orch.active_cycles()[0].id;
    assert!(h.orch.cancel(id));
    gate.add_permits(1);

    let cycle = task.await.unwrap().unwrap();
    assert_eq!(cycle.phase, Phase::Failed);
    let err = cycle.error.unwrap();
    assert!(!err.recoverable);
    assert_eq!(err.message, "cancelled");
    assert!(!h.orch.is_active(id));
    assert!(!h.orch.cancel(id));

    let stored = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.phase, Phase::Failed);
}

#[tokio::test]
async fn third_cycle_is_rejected_while_two_run() {
    let gate = Arc::new(Gate::new(0));
    let world = World {
        gate: Some(gate.clone()),
        ..Default::default()
    };
    let h = harness(world, 2, 3);

    let mut tasks = Vec::new();
    for i in 0..2 {
        let orch = h.orch.clone();
        tasks.push(tokio::spawn(async move {
            orch.develop(&format!("service {i}"), CycleOptions::default())
                .await
        }));
    }
    wait_for_active(&h.orch, 2).await;

    let err = h
        .orch
        .develop("one too many", CycleOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ShipwrightError::Exhausted(_)));
    assert!(err.is_fatal());
    assert_eq!(h.store.list().await.unwrap().len(), 2);

    gate.add_permits(2);
    for t in tasks {
        assert_eq!(t.await.unwrap().unwrap().phase, Phase::Completed);
    }

    // Permits are released once cycles finish.
    gate.add_permits(1);
    let again = h
        .orch
        .develop("after the rush", CycleOptions::default())
        .await
        .unwrap();
    assert_eq!(again.phase, Phase::Completed);
}

#[tokio::test]
async fn transient_errors_retry_the_phase() {
    let world = World {
        analyze_failures: AtomicU32::new(1),
        ..Default::default()
    };
    let h = harness(world, 2, 3);
    let cycle = h
        .orch
        .develop("products api", CycleOptions::default())
        .await
        .unwrap();
    assert_eq!(cycle.phase, Phase::Completed);
    assert_eq!(cycle.retries_for(Phase::Analyzing), 1);
}

#[tokio::test]
async fn retry_budget_exhaustion_fails() {
    let world = World {
        analyze_failures: AtomicU32::new(5),
        ..Default::default()
    };
    let h = harness(world, 2, 3);
    let cycle = h
        .orch
        .develop("products api", CycleOptions::default())
        .await
        .unwrap();
    assert_eq!(cycle.phase, Phase::Failed);
    assert_eq!(cycle.retries_for(Phase::Analyzing), 2);
    assert!(!cycle.error.unwrap().recoverable);
}

#[tokio::test]
async fn configuration_errors_are_never_retried() {
    let world = World {
        deploy_error: Mutex::new(Some(ShipwrightError::Configuration(
            "namespace 'prod' is not allowed".into(),
        ))),
        ..Default::default()
    };
    let h = harness(world, 2, 3);
    let cycle = h
        .orch
        .develop("products api", CycleOptions::default())
        .await
        .unwrap();
    assert_eq!(cycle.phase, Phase::Failed);
    assert_eq!(cycle.retries_for(Phase::Deploying), 0);
    assert_eq!(h.world.code_calls.load(Ordering::SeqCst), 1);
    assert!(cycle.error.unwrap().message.contains("not allowed"));
}

#[tokio::test]
async fn resume_picks_up_persisted_phase() {
    let h = harness(World::default(), 2, 3);
    let mut cycle = Cycle::new("products api", CycleOptions::default(), "default", 3);
    cycle.phase = Phase::Testing;
    cycle.analysis = Some(RequirementAnalysis {
        title: "Products".into(),
        complexity: "low".into(),
        capabilities: vec![],
    });
    cycle.architecture = Some(Architecture {
        overview: "x".into(),
        components: vec![],
        data_flows: vec![],
    });
    let files = vec![GeneratedFile {
        path: "src/index.ts".into(),
        content: "x".into(),
    }];
    h.store.create(&cycle).await.unwrap();
    h.store.save_files(cycle.id, &files).await.unwrap();

    let done = h.orch.resume_by_id(cycle.id).await.unwrap();
    assert_eq!(done.phase, Phase::Completed);
    assert_eq!(h.world.code_calls.load(Ordering::SeqCst), 0);

    let err = h.orch.resume_by_id(cycle.id).await.unwrap_err();
    assert!(matches!(err, ShipwrightError::InvalidTransition { .. }));
    let missing = h.orch.resume_by_id(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(missing, ShipwrightError::CycleNotFound(_)));
}

#[tokio::test]
async fn empty_requirement_creates_nothing() {
    let h = harness(World::default(), 2, 3);
    assert!(h.orch.develop("   ", CycleOptions::default()).await.is_err());
    assert!(h.store.list().await.unwrap().is_empty());
}
