//! End-to-end rollout scenarios against the in-memory fleet.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use rollfleet_core::cancel::{cancel_pair, CancelHandle};
use rollfleet_core::config::RollConfig;
use rollfleet_core::memory::{
    InMemoryBlobStore, InMemoryConnector, InMemoryControlPlane, InMemoryFleet, InMemoryHost,
    LbEvent,
};
use rollfleet_core::{DrainAttributes, Instance, LoadBalancer, RemoteHost, APPS_TAG, ENVIRONMENT_TAG};
use rollfleet_orchestrator::{DeploySource, Orchestrator, OrchestratorError, Stage, StageError};
use rollfleet_recipe::{
    ArchiveRecipe, ConfigValidationError, DeployContext, Recipe, RecipeError, RecipeRegistry,
};
use rollfleet_release::ReleaseLayout;

const APP: &str = "demo";
const ENV: &str = "prd";

fn tags() -> HashMap<String, String> {
    let mut t = HashMap::new();
    t.insert(APPS_TAG.to_string(), APP.to_string());
    t.insert(ENVIRONMENT_TAG.to_string(), ENV.to_string());
    t
}

fn fast_config() -> RollConfig {
    let mut config = RollConfig::default();
    config.release.root = "/apps".to_string();
    config.timing.restore_poll_interval = "10ms".to_string();
    config.timing.restore_max_wait = "100ms".to_string();
    config.timing.drain_settle_delay = "10ms".to_string();
    config
}

struct TestFleet {
    control_plane: Arc<InMemoryControlPlane>,
    blobs: Arc<InMemoryBlobStore>,
    connector: Arc<InMemoryConnector>,
    orchestrator: Orchestrator,
}

/// A fleet of `instances` hosts at 10.0.0.{n}, optionally behind one
/// load balancer with draining disabled (so tests run in real time).
fn fleet(instances: usize, with_lb: bool, registry: RecipeRegistry) -> TestFleet {
    let mut discovery = InMemoryFleet::new();
    let connector = Arc::new(InMemoryConnector::new());
    for n in 1..=instances {
        let address = format!("10.0.0.{n}");
        discovery = discovery.with_instance(Instance::new(format!("i-{n}"), &address, tags()));
        connector.add_host(Arc::new(InMemoryHost::new(address)));
    }
    if with_lb {
        discovery = discovery.with_load_balancer(LoadBalancer {
            name: "lb-1".to_string(),
            tags: tags(),
            draining_enabled: false,
            draining_timeout_secs: 0,
        });
    }

    let control_plane = Arc::new(InMemoryControlPlane::new());
    control_plane.add_load_balancer(
        "lb-1",
        DrainAttributes {
            draining_enabled: false,
            timeout_secs: 0,
        },
    );
    let blobs = Arc::new(InMemoryBlobStore::new("artifacts"));

    let orchestrator = Orchestrator::new(
        Arc::new(discovery),
        control_plane.clone(),
        blobs.clone(),
        connector.clone(),
        registry,
        fast_config(),
    );

    TestFleet {
        control_plane,
        blobs,
        connector,
        orchestrator,
    }
}

fn archive_registry() -> RecipeRegistry {
    let mut registry = RecipeRegistry::new();
    registry.register(Arc::new(ArchiveRecipe::new(APP)));
    registry
}

fn deregister(instance: &str) -> LbEvent {
    LbEvent::Deregister {
        lb: "lb-1".to_string(),
        instance: instance.to_string(),
    }
}

fn register(instance: &str) -> LbEvent {
    LbEvent::Register {
        lb: "lb-1".to_string(),
        instance: instance.to_string(),
    }
}

/// Scriptable recipe recording the hosts it touched.
#[derive(Default)]
struct ScriptedRecipe {
    deployed: Mutex<Vec<String>>,
    restarted: Mutex<Vec<String>>,
    fail_on: Option<String>,
    reject_field: Option<String>,
    cancel_after_first: Option<CancelHandle>,
}

impl ScriptedRecipe {
    fn deployed(&self) -> Vec<String> {
        self.deployed.lock().unwrap().clone()
    }

    fn restarted(&self) -> Vec<String> {
        self.restarted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Recipe for ScriptedRecipe {
    fn name(&self) -> &str {
        APP
    }

    fn validate(&self, _config: &serde_json::Value) -> Result<(), ConfigValidationError> {
        match &self.reject_field {
            Some(field) => Err(ConfigValidationError::new(field.clone(), "rejected")),
            None => Ok(()),
        }
    }

    async fn deploy(&self, ctx: DeployContext<'_>) -> Result<(), RecipeError> {
        let address = ctx.host.address().to_string();
        if self.fail_on.as_deref() == Some(address.as_str()) {
            return Err(RecipeError::Other(format!("scripted failure on {address}")));
        }
        let mut deployed = self.deployed.lock().unwrap();
        deployed.push(address);
        if deployed.len() == 1 {
            if let Some(handle) = &self.cancel_after_first {
                handle.cancel();
            }
        }
        Ok(())
    }

    async fn restart(
        &self,
        host: &dyn RemoteHost,
        _layout: &ReleaseLayout,
    ) -> Result<(), RecipeError> {
        self.restarted.lock().unwrap().push(host.address().to_string());
        Ok(())
    }

    async fn version(
        &self,
        _host: &dyn RemoteHost,
        _layout: &ReleaseLayout,
    ) -> Result<String, RecipeError> {
        Ok("scripted".to_string())
    }
}

fn scripted_registry(recipe: ScriptedRecipe) -> (Arc<ScriptedRecipe>, RecipeRegistry) {
    let recipe = Arc::new(recipe);
    let mut registry = RecipeRegistry::new();
    registry.register(recipe.clone());
    (recipe, registry)
}

#[tokio::test]
async fn deploy_cycles_instances_one_at_a_time() {
    let f = fleet(3, true, archive_registry());
    f.blobs.put("demo/2024.30/build-77.tar.gz", b"release-77");

    let report = f
        .orchestrator
        .deploy(
            APP,
            ENV,
            DeploySource::Artifact("s3://artifacts/demo/2024.30/build-77.tar.gz".to_string()),
        )
        .await
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(report.outcomes.len(), 3);
    assert!(report.outcomes.iter().all(|o| o.stage == Stage::Done));

    // Strict interleaving: each instance restored before the next
    // leaves rotation.
    assert_eq!(
        f.control_plane.events(),
        vec![
            deregister("i-1"),
            register("i-1"),
            deregister("i-2"),
            register("i-2"),
            deregister("i-3"),
            register("i-3"),
        ]
    );

    // Every host got the artifact's payload into the live slot.
    for n in 1..=3 {
        let host = f.connector.host(&format!("10.0.0.{n}")).unwrap();
        assert_eq!(
            host.file_content("/apps/demo/releases/curr/payload").as_deref(),
            Some("release-77")
        );
        assert_eq!(
            host.link_target("/apps/demo/current").as_deref(),
            Some("/apps/demo/releases/curr")
        );
    }
}

#[tokio::test]
async fn deploy_failure_aborts_remaining_instances() {
    let (recipe, registry) = scripted_registry(ScriptedRecipe {
        fail_on: Some("10.0.0.2".to_string()),
        ..Default::default()
    });
    let f = fleet(3, true, registry);
    f.blobs.put("demo/2024.30/build-78.tar.gz", b"release-78");

    let err = f
        .orchestrator
        .deploy(
            APP,
            ENV,
            DeploySource::Artifact("s3://artifacts/demo/2024.30/build-78.tar.gz".to_string()),
        )
        .await
        .unwrap_err();

    match err {
        OrchestratorError::Instance {
            instance, stage, source, ..
        } => {
            assert_eq!(instance, "i-2");
            assert_eq!(stage, Stage::Mutating);
            assert!(matches!(source, StageError::Recipe(_)));
        }
        other => panic!("unexpected error: {other}"),
    }

    // i-1 completed, i-2 failed mid-mutation and was NOT restored,
    // i-3 was never started.
    assert_eq!(
        f.control_plane.events(),
        vec![deregister("i-1"), register("i-1"), deregister("i-2")]
    );
    assert_eq!(recipe.deployed(), vec!["10.0.0.1"]);
}

#[tokio::test]
async fn fleet_without_load_balancers_rolls_rudely() {
    let f = fleet(2, false, archive_registry());
    f.blobs.put("demo/2024.30/build-79.tar.gz", b"release-79");

    let report = f
        .orchestrator
        .deploy(
            APP,
            ENV,
            DeploySource::Artifact("s3://artifacts/demo/2024.30/build-79.tar.gz".to_string()),
        )
        .await
        .unwrap();

    assert!(report.succeeded());
    assert!(f.control_plane.events().is_empty());
    for n in 1..=2 {
        let host = f.connector.host(&format!("10.0.0.{n}")).unwrap();
        assert_eq!(
            host.file_content("/apps/demo/releases/curr/payload").as_deref(),
            Some("release-79")
        );
    }
}

#[tokio::test]
async fn restore_timeout_halts_the_rollout() {
    let (recipe, registry) = scripted_registry(ScriptedRecipe::default());
    let f = fleet(3, true, registry);
    f.control_plane.set_hold_out_of_service(true);
    f.blobs.put("demo/2024.30/build-80.tar.gz", b"release-80");

    let err = f
        .orchestrator
        .deploy(
            APP,
            ENV,
            DeploySource::Artifact("s3://artifacts/demo/2024.30/build-80.tar.gz".to_string()),
        )
        .await
        .unwrap_err();

    match err {
        OrchestratorError::Instance {
            instance, stage, ..
        } => {
            assert_eq!(instance, "i-1");
            assert_eq!(stage, Stage::Restoring);
        }
        other => panic!("unexpected error: {other}"),
    }

    // The rollout stopped at the first instance.
    assert_eq!(recipe.deployed(), vec!["10.0.0.1"]);
    assert_eq!(
        f.control_plane.events(),
        vec![deregister("i-1"), register("i-1")]
    );
}

#[tokio::test]
async fn conflicting_deploy_inputs_touch_nothing() {
    let f = fleet(2, true, archive_registry());

    let err = f
        .orchestrator
        .deploy_with(
            APP,
            ENV,
            Some("s3://artifacts/demo/x.tar.gz".to_string()),
            Some(serde_json::json!({"k": "v"})),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::ConflictingDeployInputs));
    assert!(f.control_plane.events().is_empty());
}

#[tokio::test]
async fn deploy_without_a_source_is_rejected() {
    let f = fleet(2, true, archive_registry());

    let err = f
        .orchestrator
        .deploy_with(APP, ENV, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::MissingDeploySource));
}

#[tokio::test]
async fn invalid_config_rejected_before_any_instance() {
    let (recipe, registry) = scripted_registry(ScriptedRecipe {
        reject_field: Some("port".to_string()),
        ..Default::default()
    });
    let f = fleet(2, true, registry);

    let err = f
        .orchestrator
        .deploy(APP, ENV, DeploySource::Config(serde_json::json!({"port": -1})))
        .await
        .unwrap_err();

    match err {
        OrchestratorError::InvalidConfig { app, source } => {
            assert_eq!(app, APP);
            assert_eq!(source.field, "port");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(recipe.deployed().is_empty());
    assert!(f.control_plane.events().is_empty());
}

#[tokio::test]
async fn missing_artifact_reference_fails_before_any_instance() {
    let f = fleet(2, true, archive_registry());

    let err = f
        .orchestrator
        .deploy(
            APP,
            ENV,
            DeploySource::Artifact("s3://artifacts/demo/absent.tar.gz".to_string()),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::ArtifactStaging { .. }));
    assert!(f.control_plane.events().is_empty());
}

#[tokio::test]
async fn cancellation_finishes_instance_in_flight_then_aborts() {
    let (handle, token) = cancel_pair();
    let (recipe, registry) = scripted_registry(ScriptedRecipe {
        cancel_after_first: Some(handle),
        ..Default::default()
    });

    let TestFleet {
        control_plane,
        blobs,
        connector: _,
        orchestrator,
    } = fleet(3, true, registry);
    let orchestrator = orchestrator.with_cancel(token);
    blobs.put("demo/2024.30/build-81.tar.gz", b"release-81");

    let err = orchestrator
        .deploy(
            APP,
            ENV,
            DeploySource::Artifact("s3://artifacts/demo/2024.30/build-81.tar.gz".to_string()),
        )
        .await
        .unwrap_err();

    match err {
        OrchestratorError::Cancelled { instance, .. } => assert_eq!(instance, "i-2"),
        other => panic!("unexpected error: {other}"),
    }

    // The in-flight instance was restored to rotation before the abort.
    assert_eq!(recipe.deployed(), vec!["10.0.0.1"]);
    assert_eq!(
        control_plane.events(),
        vec![deregister("i-1"), register("i-1")]
    );
}

#[tokio::test]
async fn restart_cycles_every_instance_without_artifacts() {
    let (recipe, registry) = scripted_registry(ScriptedRecipe::default());
    let f = fleet(3, true, registry);

    let report = f.orchestrator.restart(APP, ENV).await.unwrap();

    assert!(report.succeeded());
    assert_eq!(
        recipe.restarted(),
        vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]
    );
    assert_eq!(
        f.control_plane.events(),
        vec![
            deregister("i-1"),
            register("i-1"),
            deregister("i-2"),
            register("i-2"),
            deregister("i-3"),
            register("i-3"),
        ]
    );
}

#[tokio::test]
async fn unknown_app_is_rejected_before_discovery() {
    let f = fleet(1, true, RecipeRegistry::new());

    let err = f.orchestrator.restart(APP, ENV).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::RecipeNotFound(_)));
}

#[tokio::test]
async fn empty_environment_is_fatal() {
    let f = fleet(2, true, archive_registry());

    let err = f.orchestrator.restart(APP, "stg").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NoTargetInstances { .. }));
}

#[tokio::test]
async fn show_version_reports_every_instance() {
    let f = fleet(2, true, archive_registry());
    f.connector
        .host("10.0.0.1")
        .unwrap()
        .seed_file("/apps/demo/current/version.txt", "2024.30-build-77\n");

    let versions = f.orchestrator.show_version(APP, ENV).await.unwrap();

    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].0.id, "i-1");
    assert_eq!(versions[0].1, "2024.30-build-77");
    assert_eq!(versions[1].1, "(no version.txt)");
    // Read-only: no rotation changes.
    assert!(f.control_plane.events().is_empty());
}

#[tokio::test]
async fn list_artifacts_scopes_to_the_app() {
    let f = fleet(1, true, archive_registry());
    f.blobs.put("demo/2024.30/build-77.tar.gz", b"a");
    f.blobs.put("other/2024.30/build-1.tar.gz", b"b");

    let listed = f.orchestrator.list_artifacts(APP, 2).await.unwrap();
    assert_eq!(listed, vec!["s3://artifacts/demo/2024.30/build-77.tar.gz"]);
}
