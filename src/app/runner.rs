use crate::adapters::{DirectoryPublisher, LocalStorage};
use crate::app::emitters::ArtifactKind;
use crate::config::{
    lookup_variables, CheckArgs, CompileArgs, InputArgs, K8sArgs, LegacyArgs, SchemaArgs,
};
use crate::core::compiler::{
    compile_environments, CancellationToken, CheckReport, CompileRequest, Compiler,
    PublishedOutput,
};
use crate::core::loader::read_document;
use crate::core::resolver::builtin_profiles;
use crate::domain::model::MasterDefinition;
use crate::domain::ports::Storage;
use crate::domain::resolved::Provenance;
use crate::utils::error::{CompileError, Result};
use std::path::Path;

/// 讀入 CLI 指定的所有輸入文件
pub async fn read_request<S: Storage>(
    storage: &S,
    input: &InputArgs,
    environment: &str,
) -> Result<CompileRequest> {
    let master = read_document(storage, &input.master).await?;
    let registry = read_document(storage, &input.registry).await?;
    let mut overlays = Vec::new();
    for overlay in &input.overlays {
        overlays.push(read_document(storage, overlay).await?);
    }
    Ok(CompileRequest::new(master, registry, environment)
        .with_overlays(overlays)
        .with_variables(input.variables()?)
        .without_secret_variables())
}

/// 單一環境直接寫到輸出目錄；多個環境各自寫到 `<output>/<env>`
pub async fn publish_environments(
    request: CompileRequest,
    environments: &[String],
    output: &Path,
    archive: bool,
    cancel: CancellationToken,
) -> Result<Vec<PublishedOutput>> {
    match environments {
        [] => Err(CompileError::MissingConfigError {
            field: "env".to_string(),
        }),
        [environment] => {
            let publisher = DirectoryPublisher::new(output).with_archive(archive);
            let mut compiler =
                Compiler::new(request.for_environment(environment.clone())).with_cancellation(cancel);
            Ok(vec![compiler.compile_to(&publisher).await?])
        }
        _ => {
            compile_environments(
                &request,
                environments,
                |environment| DirectoryPublisher::new(output.join(environment)).with_archive(archive),
                cancel,
            )
            .await
        }
    }
}

pub async fn run_compile(args: &CompileArgs, cancel: CancellationToken) -> Result<Vec<PublishedOutput>> {
    let storage = LocalStorage::new(".");
    let first = args.environments.first().cloned().unwrap_or_default();
    let request = read_request(&storage, &args.input, &first)
        .await?
        .with_formats(args.formats()?);
    publish_environments(
        request,
        &args.environments,
        Path::new(&args.output),
        args.archive,
        cancel,
    )
    .await
}

/// 只驗證；回傳每個環境的報告（含發現）
pub async fn run_check(args: &CheckArgs) -> Result<Vec<CheckReport>> {
    let storage = LocalStorage::new(".");
    let first = args.environments.first().cloned().unwrap_or_default();
    let request = read_request(&storage, &args.input, &first).await?;

    let mut reports = Vec::new();
    for environment in &args.environments {
        let mut compiler = Compiler::new(request.for_environment(environment.clone()));
        reports.push(compiler.check()?);
    }
    Ok(reports)
}

/// 舊版批次模式：所有內建環境，附上來源版本資訊
pub async fn run_legacy(args: &LegacyArgs, cancel: CancellationToken) -> Result<Vec<PublishedOutput>> {
    let storage = LocalStorage::new(".");
    let environments: Vec<String> = builtin_profiles().into_keys().collect();
    let provenance = Provenance {
        repository: args.repository.clone(),
        reference: args.reference.clone(),
        revision: args.revision.clone(),
    };
    tracing::info!(
        "📦 Legacy generation from {}@{} ({})",
        provenance.repository,
        provenance.reference,
        provenance.revision
    );

    let first = environments.first().cloned().unwrap_or_default();
    let request = read_request(&storage, &args.input, &first)
        .await?
        .with_provenance(Some(provenance));
    compile_environments(
        &request,
        &environments,
        |environment| DirectoryPublisher::new(Path::new(&args.output).join(environment)),
        cancel,
    )
    .await
}

/// 從輸入目錄只產生 manifests
pub async fn run_k8s(args: &K8sArgs, cancel: CancellationToken) -> Result<PublishedOutput> {
    let storage = LocalStorage::new(&args.input);
    let master = read_document(&storage, "master.yaml").await?;
    let registry = read_document(&storage, "registry.yaml").await?;

    let overlay_path = format!("overlays/{}.yaml", args.environment);
    let overlays = if storage.base_path().join(&overlay_path).is_file() {
        tracing::debug!("🧩 Using overlay {}", overlay_path);
        vec![read_document(&storage, &overlay_path).await?]
    } else {
        Vec::new()
    };

    let request = CompileRequest::new(master, registry, args.environment.clone())
        .with_overlays(overlays)
        .with_variables(lookup_variables(&args.sets)?)
        .without_secret_variables()
        .with_formats(vec![ArtifactKind::Manifest]);
    let mut compiler = Compiler::new(request).with_cancellation(cancel);
    compiler.compile_to(&DirectoryPublisher::new(&args.output)).await
}

/// 主定義的 JSON Schema
pub fn master_schema() -> Result<String> {
    let schema = schemars::schema_for!(MasterDefinition);
    Ok(serde_json::to_string_pretty(&schema)? + "\n")
}

pub async fn run_schema(args: &SchemaArgs) -> Result<Option<String>> {
    let schema = master_schema()?;
    match &args.output {
        Some(path) => {
            let storage = LocalStorage::new(".");
            storage.write_file(path, schema.as_bytes()).await?;
            Ok(None)
        }
        None => Ok(Some(schema)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_schema_describes_sections() {
        let schema: serde_json::Value = serde_json::from_str(&master_schema().unwrap()).unwrap();
        let properties = &schema["properties"];
        assert!(properties.get("system").is_some());
        assert!(properties.get("services").is_some());
        assert!(properties.get("secrets").is_some());
    }
}
