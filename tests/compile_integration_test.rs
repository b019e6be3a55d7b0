use fleet_compiler::core::compiler::{compile_environments, CancellationToken};
use fleet_compiler::domain::finding::FindingKind;
use fleet_compiler::domain::ports::Publisher;
use fleet_compiler::{
    ArtifactKind, CompileError, CompileRequest, Compiler, DirectoryPublisher, SourceDocument,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const MASTER: &str = include_str!("../config/master.yaml");
const REGISTRY: &str = include_str!("../config/registry.yaml");
const PRODUCTION_OVERLAY: &str = include_str!("../config/overlays/production.yaml");

fn request(master: &str, registry: &str, environment: &str) -> CompileRequest {
    CompileRequest::new(
        SourceDocument::new("master.yaml", master),
        SourceDocument::new("registry.yaml", registry),
        environment,
    )
}

fn variables(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// 讀出目錄下所有檔案（相對路徑 -> 內容）
fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, files: &mut BTreeMap<String, Vec<u8>>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, files);
            } else {
                let relative = path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
                files.insert(relative, fs::read(&path).unwrap());
            }
        }
    }
    let mut files = BTreeMap::new();
    walk(root, root, &mut files);
    files
}

#[tokio::test]
async fn test_published_output_is_byte_identical_across_runs() {
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("first");
    let second = dir.path().join("second");

    for target in [&first, &second] {
        let mut compiler = Compiler::new(
            request(MASTER, REGISTRY, "production")
                .with_overlays(vec![SourceDocument::new(
                    "overlays/production.yaml",
                    PRODUCTION_OVERLAY,
                )])
                .with_variables(variables(&[("IMAGE_TAG", "3.0.0")])),
        );
        compiler
            .compile_to(&DirectoryPublisher::new(target).with_archive(true))
            .await
            .unwrap();
    }

    let first_files = snapshot(&first);
    assert!(first_files.contains_key("docker-compose.yml"));
    assert!(first_files.contains_key("registry.json"));
    assert!(first_files.contains_key("env/api_gateway.env"));
    assert!(first_files.contains_key("bundle.zip"));
    assert_eq!(first_files, snapshot(&second));
}

#[tokio::test]
async fn test_overlay_and_variables_reach_artifacts() {
    let mut compiler = Compiler::new(
        request(MASTER, REGISTRY, "production")
            .with_overlays(vec![SourceDocument::new(
                "overlays/production.yaml",
                PRODUCTION_OVERLAY,
            )])
            .with_variables(variables(&[("IMAGE_TAG", "3.0.0")]))
            .with_formats(vec![ArtifactKind::Compose]),
    );
    let output = compiler.compile().await.unwrap();
    assert_eq!(output.artifacts.len(), 1);

    let compose: serde_yaml::Value = serde_yaml::from_str(&output.artifacts[0].contents).unwrap();
    let api = &compose["services"]["api_gateway"];
    assert_eq!(api["image"].as_str(), Some("ghcr.io/acme/fleet-api_gateway:3.0.0"));
    assert_eq!(api["deploy"]["replicas"].as_u64(), Some(3));
}

#[tokio::test]
async fn test_default_is_used_when_variable_is_unset() {
    let mut compiler =
        Compiler::new(request(MASTER, REGISTRY, "staging").with_formats(vec![ArtifactKind::Compose]));
    let output = compiler.compile().await.unwrap();
    assert!(output.artifacts[0]
        .contents
        .contains("ghcr.io/acme/fleet-market_data:2.1.0"));
}

#[tokio::test]
async fn test_secret_values_never_appear_in_artifacts() {
    let leaked = "sk-live-do-not-print";
    let mut compiler = Compiler::new(request(MASTER, REGISTRY, "production").with_variables(
        variables(&[("OPENAI_API_KEY", leaked), ("DB_PASSWORD", leaked)]),
    ));
    let output = compiler.compile().await.unwrap();

    assert!(!output.artifacts.is_empty());
    for artifact in &output.artifacts {
        assert!(
            !artifact.contents.contains(leaked),
            "{} contains a secret value",
            artifact.display_path()
        );
    }
}

#[tokio::test]
async fn test_port_conflict_publishes_nothing() {
    let master = MASTER.replace("port: 8002", "port: 8001");
    let registry = REGISTRY.replace("port: 8002", "port: 8001");
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("out");

    let mut compiler = Compiler::new(request(&master, &registry, "production"));
    let result = compiler.compile_to(&DirectoryPublisher::new(&target)).await;

    match result {
        Err(CompileError::RegistryViolation { findings }) => {
            let conflict = findings
                .iter()
                .find(|f| f.kind == FindingKind::PortConflict)
                .unwrap();
            assert_eq!(conflict.services(), vec!["api_gateway", "market_data"]);
        }
        other => panic!("expected registry violation, got {:?}", other),
    }
    assert!(!target.exists());
}

#[tokio::test]
async fn test_all_findings_are_reported_together() {
    let master = MASTER
        .replace("dependencies: [market_data]", "dependencies: [order_router]")
        .replace("cache_db: 2", "cache_db: 1");
    let registry = REGISTRY.replace("cache_db: 2", "cache_db: 1");

    let mut compiler = Compiler::new(request(&master, &registry, "production"));
    let report = compiler.check().unwrap();
    let kinds: Vec<FindingKind> = report.findings.iter().map(|f| f.kind).collect();
    assert!(kinds.contains(&FindingKind::UnknownDependency));
    assert!(kinds.contains(&FindingKind::CacheNamespaceConflict));
    assert!(!report.is_clean());
}

#[tokio::test]
async fn test_overlay_cannot_add_services() {
    let overlay = "services:\n  core:\n    order_router:\n      port: 8003\n";
    let mut compiler = Compiler::new(
        request(MASTER, REGISTRY, "production")
            .with_overlays(vec![SourceDocument::new("overlays/extra.yaml", overlay)]),
    );
    let result = compiler.compile().await;
    assert!(matches!(result, Err(CompileError::ParseError { .. })));
}

#[tokio::test]
async fn test_unknown_environment_lists_known_ones() {
    let mut compiler = Compiler::new(request(MASTER, REGISTRY, "qa"));
    match compiler.compile().await {
        Err(CompileError::UnknownEnvironment { name, known }) => {
            assert_eq!(name, "qa");
            assert!(known.contains(&"production".to_string()));
        }
        other => panic!("expected unknown environment, got {:?}", other),
    }
}

#[tokio::test]
async fn test_environments_compile_to_separate_outputs() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let environments = vec!["development".to_string(), "production".to_string()];

    let outputs = compile_environments(
        &request(MASTER, REGISTRY, "development"),
        &environments,
        |environment| DirectoryPublisher::new(root.join(environment)),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0].environment, "development");
    let development = fs::read_to_string(root.join("development/docker-compose.yml")).unwrap();
    let production = fs::read_to_string(root.join("production/docker-compose.yml")).unwrap();
    assert!(development.contains(".env.secrets"));
    assert_ne!(development, production);
}

#[tokio::test]
async fn test_cancelled_compile_leaves_previous_output() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("out");
    let publisher = DirectoryPublisher::new(&target);
    publisher
        .publish(&[fleet_compiler::domain::artifact::Artifact::new("marker.txt", "previous")])
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut compiler =
        Compiler::new(request(MASTER, REGISTRY, "production")).with_cancellation(cancel);
    let result = compiler.compile_to(&publisher).await;

    assert!(matches!(result, Err(CompileError::Cancelled { .. })));
    assert_eq!(fs::read_to_string(target.join("marker.txt")).unwrap(), "previous");
}

#[tokio::test]
async fn test_path_like_service_name_writes_nothing() {
    let master = MASTER.replace("    market_data:\n      port: 8002", "    \"../../escaped\":\n      port: 8002");
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("nested/out");

    let mut compiler = Compiler::new(request(&master, REGISTRY, "production"));
    let result = compiler.compile_to(&DirectoryPublisher::new(&target)).await;

    assert!(matches!(result, Err(CompileError::ParseError { .. })));
    assert!(!target.exists());
    assert!(!dir.path().join("escaped.env").exists());
    assert!(!dir.path().join("nested/escaped.env").exists());
}
