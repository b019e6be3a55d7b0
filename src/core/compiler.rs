use crate::app::emitters::ArtifactKind;
use crate::core::loader::{load_definition, load_registry, merge_documents, secret_keys, SourceDocument};
use crate::core::resolver::resolve;
use crate::core::validator::validate;
use crate::domain::artifact::Artifact;
use crate::domain::finding::Finding;
use crate::domain::ports::Publisher;
use crate::domain::resolved::{Provenance, ResolvedModel};
use crate::utils::error::{CompileError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// 編譯流程的狀態
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileStage {
    Pending,
    Loading,
    Resolving,
    Validating,
    Emitting,
    Done,
    Failed(String),
}

impl fmt::Display for CompileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Loading => f.write_str("loading"),
            Self::Resolving => f.write_str("resolving"),
            Self::Validating => f.write_str("validating"),
            Self::Emitting => f.write_str("emitting"),
            Self::Done => f.write_str("done"),
            Self::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// 可在階段之間取消編譯的旗標，可跨任務共用
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// 單一環境的編譯輸入
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub master: SourceDocument,
    pub overlays: Vec<SourceDocument>,
    pub registry: SourceDocument,
    pub environment: String,
    pub variables: BTreeMap<String, String>,
    pub provenance: Option<Provenance>,
    pub formats: Vec<ArtifactKind>,
}

impl CompileRequest {
    pub fn new(
        master: SourceDocument,
        registry: SourceDocument,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            master,
            overlays: Vec::new(),
            registry,
            environment: environment.into(),
            variables: BTreeMap::new(),
            provenance: None,
            formats: ArtifactKind::ALL.to_vec(),
        }
    }

    pub fn with_overlays(mut self, overlays: Vec<SourceDocument>) -> Self {
        self.overlays = overlays;
        self
    }

    pub fn with_variables(mut self, variables: BTreeMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_provenance(mut self, provenance: Option<Provenance>) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn with_formats(mut self, formats: Vec<ArtifactKind>) -> Self {
        self.formats = formats;
        self
    }

    /// 移除宣告為機密的 env_key：編譯器從不讀取機密值。
    /// 文件無法解析時保持原樣，錯誤留給 Loading 階段回報
    pub fn without_secret_variables(mut self) -> Self {
        if let Ok(tree) = merge_documents(&self.master, &self.overlays) {
            let secrets = secret_keys(&tree);
            self.variables.retain(|key, _| !secrets.contains(key));
        }
        self
    }

    /// 同一份輸入，換成另一個環境
    pub fn for_environment(&self, environment: impl Into<String>) -> Self {
        let mut request = self.clone();
        request.environment = environment.into();
        request
    }
}

/// 只驗證不產生時的結果
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub environment: String,
    pub services: Vec<String>,
    pub findings: Vec<Finding>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

/// 在記憶體中完成的編譯結果
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub environment: String,
    pub services: Vec<String>,
    pub artifacts: Vec<Artifact>,
    pub duration: Duration,
}

/// 已發佈的編譯結果
#[derive(Debug, Clone, Serialize)]
pub struct PublishedOutput {
    pub environment: String,
    pub location: PathBuf,
    pub services: Vec<String>,
    pub artifacts: Vec<String>,
    pub duration_ms: u128,
}

/// 以 blocking 任務平行執行各產生器，全部完成後依路徑排序合併
pub async fn emit_all(model: Arc<ResolvedModel>, formats: &[ArtifactKind]) -> Result<Vec<Artifact>> {
    let mut kinds = formats.to_vec();
    kinds.sort();
    kinds.dedup();

    let mut tasks = JoinSet::new();
    for kind in kinds {
        let model = Arc::clone(&model);
        tasks.spawn_blocking(move || {
            let emitter = kind.emitter();
            let started = Instant::now();
            let result = emitter.emit(&model);
            (emitter.name(), started.elapsed(), result)
        });
    }

    let mut artifacts = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (name, elapsed, result) = joined.map_err(|e| CompileError::EmissionError {
            emitter: "orchestrator".to_string(),
            details: format!("emitter task did not complete: {}", e),
        })?;
        let produced = result.map_err(|e| match e {
            CompileError::EmissionError { .. } => e,
            other => CompileError::EmissionError {
                emitter: name.to_string(),
                details: other.to_string(),
            },
        })?;
        tracing::debug!(
            "📝 Emitter {} produced {} artifact(s) in {:?}",
            name,
            produced.len(),
            elapsed
        );
        artifacts.extend(produced);
    }

    artifacts.sort_by(|a, b| a.path.cmp(&b.path));
    if let Some(pair) = artifacts.windows(2).find(|pair| pair[0].path == pair[1].path) {
        return Err(CompileError::EmissionError {
            emitter: "orchestrator".to_string(),
            details: format!("artifact {} was produced twice", pair[0].display_path()),
        });
    }
    Ok(artifacts)
}

/// 編譯協調器：Loading → Resolving → Validating → Emitting → Done，
/// 任何階段失敗都會進入 Failed
pub struct Compiler {
    request: CompileRequest,
    cancel: CancellationToken,
    stage: CompileStage,
    history: Vec<CompileStage>,
    started: Instant,
}

impl Compiler {
    pub fn new(request: CompileRequest) -> Self {
        Self {
            request,
            cancel: CancellationToken::new(),
            stage: CompileStage::Pending,
            history: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn stage(&self) -> &CompileStage {
        &self.stage
    }

    pub fn history(&self) -> &[CompileStage] {
        &self.history
    }

    fn transition(&mut self, next: CompileStage) {
        tracing::info!(
            "🔄 [{}] {} → {}",
            self.request.environment,
            self.stage,
            next
        );
        self.stage = next.clone();
        self.history.push(next);
    }

    fn checkpoint(&mut self, upcoming: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            tracing::warn!("🛑 [{}] Cancelled before {}", self.request.environment, upcoming);
            self.transition(CompileStage::Failed(format!("cancelled before {}", upcoming)));
            return Err(CompileError::Cancelled {
                stage: upcoming.to_string(),
            });
        }
        Ok(())
    }

    fn enter(&mut self, next: CompileStage) -> Result<()> {
        self.checkpoint(&next.to_string())?;
        self.transition(next);
        Ok(())
    }

    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            tracing::error!("❌ [{}] {}", self.request.environment, e);
            self.transition(CompileStage::Failed(e.to_string()));
        }
        result
    }

    fn analyse(&mut self) -> Result<(ResolvedModel, Vec<Finding>)> {
        self.enter(CompileStage::Loading)?;
        let request = &self.request;
        let loaded = load_definition(&request.master, &request.overlays, &request.variables)
            .and_then(|definition| Ok((definition, load_registry(&request.registry)?)));
        let (definition, registry) = self.guard(loaded)?;
        tracing::debug!(
            "📥 Loaded {} with {} overlay(s)",
            self.request.master.name,
            self.request.overlays.len()
        );

        self.enter(CompileStage::Resolving)?;
        let mut model = self.guard(resolve(&definition, &self.request.environment))?;
        model.provenance = self.request.provenance.clone();
        tracing::debug!(
            "🧮 Resolved {} service(s), {} secret(s)",
            model.services.len(),
            model.secrets.len()
        );

        self.enter(CompileStage::Validating)?;
        let findings = self.guard(validate(&model, &registry))?;
        Ok((model, findings))
    }

    /// 只跑到驗證為止，回傳所有發現（不產生任何輸出）
    pub fn check(&mut self) -> Result<CheckReport> {
        let (model, findings) = self.analyse()?;
        self.enter(CompileStage::Done)?;
        if findings.is_empty() {
            tracing::info!("✅ [{}] Registry check passed", self.request.environment);
        } else {
            tracing::warn!(
                "⚠️ [{}] Registry check found {} problem(s)",
                self.request.environment,
                findings.len()
            );
        }
        Ok(CheckReport {
            environment: self.request.environment.clone(),
            services: model.services.keys().cloned().collect(),
            findings,
        })
    }

    async fn build(&mut self) -> Result<(Vec<String>, Vec<Artifact>)> {
        let (model, findings) = self.analyse()?;
        if !findings.is_empty() {
            let error = CompileError::RegistryViolation { findings };
            return self.guard(Err(error));
        }

        self.enter(CompileStage::Emitting)?;
        let services = model.services.keys().cloned().collect();
        let emitted = emit_all(Arc::new(model), &self.request.formats).await;
        let artifacts = self.guard(emitted)?;
        Ok((services, artifacts))
    }

    /// 完整編譯但不寫檔
    pub async fn compile(&mut self) -> Result<CompileOutput> {
        let (services, artifacts) = self.build().await?;
        self.enter(CompileStage::Done)?;
        Ok(CompileOutput {
            environment: self.request.environment.clone(),
            services,
            artifacts,
            duration: self.started.elapsed(),
        })
    }

    /// 完整編譯並交由 publisher 原子性地發佈；失敗或取消時不留下任何輸出
    pub async fn compile_to<P: Publisher + ?Sized>(&mut self, publisher: &P) -> Result<PublishedOutput> {
        let (services, artifacts) = self.build().await?;

        // 取消時丟棄已產生的內容，不發佈
        self.checkpoint("publishing")?;
        let published = publisher.publish(&artifacts).await;
        let location = self.guard(published)?;
        self.transition(CompileStage::Done);

        tracing::info!(
            "💾 [{}] Published {} artifact(s) to {}",
            self.request.environment,
            artifacts.len(),
            location.display()
        );
        Ok(PublishedOutput {
            environment: self.request.environment.clone(),
            location,
            services,
            artifacts: artifacts.iter().map(Artifact::display_path).collect(),
            duration_ms: self.started.elapsed().as_millis(),
        })
    }
}

/// 多個環境同時編譯，各自擁有模型與輸出位置；結果依環境名稱排序
pub async fn compile_environments<P, F>(
    request: &CompileRequest,
    environments: &[String],
    publisher_for: F,
    cancel: CancellationToken,
) -> Result<Vec<PublishedOutput>>
where
    P: Publisher + 'static,
    F: Fn(&str) -> P,
{
    let mut tasks = JoinSet::new();
    for environment in environments {
        let publisher = publisher_for(environment);
        let mut compiler =
            Compiler::new(request.for_environment(environment.clone())).with_cancellation(cancel.clone());
        tasks.spawn(async move { compiler.compile_to(&publisher).await });
    }

    let mut outputs = Vec::new();
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let result = joined.map_err(|e| CompileError::EmissionError {
            emitter: "orchestrator".to_string(),
            details: format!("compilation task did not complete: {}", e),
        })?;
        match result {
            Ok(output) => outputs.push(output),
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }
    outputs.sort_by(|a, b| a.environment.cmp(&b.environment));
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::finding::FindingKind;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const MASTER: &str = r#"
system:
  name: fleet
services:
  core:
    api:
      port: 8001
      cache_db: 1
      environment:
        TOKEN: "${API_TOKEN}"
      resources:
        cpu: "0.5"
        memory: 512Mi
    worker:
      dependencies: [api]
secrets:
  - name: api_token
    env_key: API_TOKEN
"#;

    const REGISTRY: &str = "services:\n  api: {port: 8001, cache_db: 1}\n  worker: {}\n";

    fn request(registry: &str) -> CompileRequest {
        CompileRequest::new(
            SourceDocument::new("master.yaml", MASTER),
            SourceDocument::new("registry.yaml", registry),
            "production",
        )
    }

    /// 記錄發佈內容的測試用 publisher
    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<Vec<Artifact>>>,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, artifacts: &[Artifact]) -> Result<PathBuf> {
            self.published.lock().unwrap().push(artifacts.to_vec());
            Ok(PathBuf::from("memory"))
        }
    }

    #[tokio::test]
    async fn test_compile_walks_every_stage() {
        let mut compiler = Compiler::new(request(REGISTRY));
        let output = compiler.compile().await.unwrap();
        assert_eq!(
            compiler.history(),
            &[
                CompileStage::Loading,
                CompileStage::Resolving,
                CompileStage::Validating,
                CompileStage::Emitting,
                CompileStage::Done
            ]
        );
        assert_eq!(output.services, vec!["api".to_string(), "worker".to_string()]);
        let paths: Vec<String> = output.artifacts.iter().map(Artifact::display_path).collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
        assert!(paths.contains(&"docker-compose.yml".to_string()));
        assert!(paths.contains(&"env/worker.env".to_string()));
    }

    #[test]
    fn test_declared_secret_keys_are_dropped_from_variables() {
        let mut variables = BTreeMap::new();
        variables.insert("API_TOKEN".to_string(), "live-token".to_string());
        variables.insert("IMAGE_TAG".to_string(), "1.0".to_string());

        let request = request(REGISTRY)
            .with_variables(variables)
            .without_secret_variables();
        assert!(!request.variables.contains_key("API_TOKEN"));
        assert_eq!(request.variables["IMAGE_TAG"], "1.0");
    }

    #[tokio::test]
    async fn test_compile_is_deterministic() {
        let first = Compiler::new(request(REGISTRY)).compile().await.unwrap();
        let second = Compiler::new(request(REGISTRY)).compile().await.unwrap();
        assert_eq!(first.artifacts, second.artifacts);
    }

    #[tokio::test]
    async fn test_findings_block_publishing() {
        let publisher = RecordingPublisher::default();
        let mut compiler = Compiler::new(request("services:\n  api: {port: 9000, cache_db: 1}\n"));
        match compiler.compile_to(&publisher).await {
            Err(CompileError::RegistryViolation { findings }) => {
                let kinds: Vec<FindingKind> = findings.iter().map(|f| f.kind).collect();
                assert_eq!(
                    kinds,
                    vec![FindingKind::MissingRegistryEntry, FindingKind::PortMismatch]
                );
            }
            other => panic!("expected RegistryViolation, got {:?}", other),
        }
        assert!(matches!(compiler.stage(), CompileStage::Failed(_)));
        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_check_returns_findings_without_emitting() {
        let mut compiler = Compiler::new(request("services:\n  api: {port: 8001, cache_db: 1}\n"));
        let report = compiler.check().unwrap();
        assert!(!report.is_clean());
        assert_eq!(report.findings[0].service, "worker");
        assert!(!compiler.history().contains(&CompileStage::Emitting));
        assert_eq!(compiler.stage(), &CompileStage::Done);
    }

    #[tokio::test]
    async fn test_cancelled_run_publishes_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let publisher = RecordingPublisher::default();
        let mut compiler = Compiler::new(request(REGISTRY)).with_cancellation(token);
        let result = compiler.compile_to(&publisher).await;
        assert!(matches!(result, Err(CompileError::Cancelled { .. })));
        assert!(publisher.published.lock().unwrap().is_empty());
        assert!(matches!(compiler.stage(), CompileStage::Failed(_)));
    }

    #[tokio::test]
    async fn test_unknown_environment_fails_in_resolving() {
        let mut compiler = Compiler::new(request(REGISTRY).for_environment("qa"));
        let result = compiler.compile().await;
        assert!(matches!(result, Err(CompileError::UnknownEnvironment { .. })));
        assert_eq!(
            &compiler.history()[..2],
            &[CompileStage::Loading, CompileStage::Resolving]
        );
    }

    #[tokio::test]
    async fn test_format_selection() {
        let mut compiler = Compiler::new(
            request(REGISTRY).with_formats(vec![ArtifactKind::Manifest, ArtifactKind::Manifest]),
        );
        let output = compiler.compile().await.unwrap();
        assert!(output
            .artifacts
            .iter()
            .all(|a| a.display_path().starts_with("k8s/")));
    }

    #[tokio::test]
    async fn test_several_environments_compile_concurrently() {
        let environments = vec!["staging".to_string(), "development".to_string()];
        let outputs = compile_environments(
            &request(REGISTRY),
            &environments,
            |_| RecordingPublisher::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        let names: Vec<&str> = outputs.iter().map(|o| o.environment.as_str()).collect();
        assert_eq!(names, vec!["development", "staging"]);
    }
}
