use crate::core::interpolate::Interpolator;
use crate::core::tree::Node;
use crate::domain::model::{MasterDefinition, Registry, ServiceDefinition};
use crate::domain::ports::Storage;
use crate::utils::error::{CompileError, Result, SourceLocation};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet};

/// 已讀入記憶體的輸入文件；載入器不自行讀檔
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub name: String,
    pub text: String,
}

impl SourceDocument {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// 透過 Storage 讀入文件，文件名稱即為路徑
pub async fn read_document<S: Storage>(storage: &S, path: &str) -> Result<SourceDocument> {
    let bytes = storage.read_file(path).await?;
    let text = String::from_utf8(bytes).map_err(|e| {
        CompileError::parse(
            SourceLocation::document(path),
            format!("document is not valid UTF-8: {}", e),
        )
    })?;
    Ok(SourceDocument::new(path, text))
}

fn yaml_error(document: &SourceDocument, error: serde_yaml::Error) -> CompileError {
    let mut location = SourceLocation::document(&document.name);
    if let Some(mark) = error.location() {
        location = location.at(mark.line(), mark.column());
    }
    CompileError::parse(location, error.to_string())
}

/// 解析單一文件為標記樹；空文件視為空 map
pub fn parse_document(document: &SourceDocument) -> Result<Node> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(&document.text).map_err(|e| yaml_error(document, e))?;
    if value.is_null() {
        return Ok(Node::default());
    }

    let node = Node::from_yaml(value)
        .map_err(|message| CompileError::parse(SourceLocation::document(&document.name), message))?;
    if node.as_map().is_none() {
        return Err(CompileError::parse(
            SourceLocation::document(&document.name),
            "top-level value must be a mapping",
        ));
    }
    Ok(node)
}

/// 覆寫層只能修改基底已有的服務，不可新增服務
fn check_overlay_services(base: &Node, overlay: &Node, document: &SourceDocument) -> Result<()> {
    let Some(groups) = overlay.get("services").and_then(Node::as_map) else {
        return Ok(());
    };

    for (role, group) in groups {
        let Some(group) = group.as_map() else { continue };
        for name in group.keys() {
            if base.get_path(&["services", role, name]).is_none() {
                return Err(CompileError::parse(
                    SourceLocation::document(&document.name)
                        .with_path(format!("services.{}.{}", role, name)),
                    format!(
                        "overlay introduces service '{}' which is not declared in the base definition",
                        name
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// 合併基底與所有覆寫層（依序套用）
pub fn merge_documents(base: &SourceDocument, overlays: &[SourceDocument]) -> Result<Node> {
    let mut tree = parse_document(base)?;

    for overlay in overlays {
        let overlay_tree = parse_document(overlay)?;
        check_overlay_services(&tree, &overlay_tree, overlay)?;
        tracing::debug!("🧩 Merging overlay {}", overlay.name);
        tree = tree.merge(overlay_tree);
    }

    Ok(tree)
}

/// 宣告為機密的 env_key；這些變數不會被查表
pub fn secret_keys(tree: &Node) -> BTreeSet<String> {
    match tree.get("secrets") {
        Some(Node::List(items)) => items
            .iter()
            .filter_map(|item| item.get("env_key").and_then(Node::as_str))
            .map(str::to_string)
            .collect(),
        _ => BTreeSet::new(),
    }
}

/// Kubernetes 物件名稱只允許小寫英數與 `-`
pub fn dns_label(name: &str) -> String {
    let label: String = name
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    label.trim_matches('-').to_string()
}

/// 服務名稱會成為輸出檔名與 Kubernetes 物件名稱：
/// 必須是安全的單一路徑片段，跨角色唯一，且 DNS 名稱不可互相碰撞
fn check_service_names(tree: &Node, location: &SourceLocation) -> Result<()> {
    let Some(groups) = tree.get("services").and_then(Node::as_map) else {
        return Ok(());
    };

    let pattern = regex::Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$")?;
    let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
    let mut labels: BTreeMap<String, &str> = BTreeMap::new();
    for (role, group) in groups {
        let Some(group) = group.as_map() else { continue };
        for name in group.keys() {
            let at = || {
                location
                    .clone()
                    .with_path(format!("services.{}.{}", role, name))
            };
            if !pattern.is_match(name) || name.contains("..") {
                return Err(CompileError::parse(
                    at(),
                    format!(
                        "service name '{}' must start with a letter or digit and contain only letters, digits, '_', '-' or '.'",
                        name
                    ),
                ));
            }
            if let Some(previous) = seen.insert(name, role) {
                return Err(CompileError::parse(
                    at(),
                    format!(
                        "service '{}' is declared under both '{}' and '{}'",
                        name, previous, role
                    ),
                ));
            }
            let label = dns_label(name);
            if let Some(other) = labels.insert(label.clone(), name) {
                return Err(CompileError::parse(
                    at(),
                    format!(
                        "services '{}' and '{}' both map to the object name '{}'",
                        other, name, label
                    ),
                ));
            }
        }
    }
    Ok(())
}

fn typed<T: DeserializeOwned>(node: &Node, location: SourceLocation) -> Result<T> {
    serde_json::from_value(node.to_json()).map_err(|e| CompileError::parse(location, e.to_string()))
}

/// 型別轉換失敗時，找出第一個出錯的服務以提供路徑
fn localize_error(tree: &Node, location: &SourceLocation, error: CompileError) -> CompileError {
    if let Some(groups) = tree.get("services").and_then(Node::as_map) {
        for (role, group) in groups {
            let Some(group) = group.as_map() else { continue };
            for (name, service) in group {
                let path = format!("services.{}.{}", role, name);
                if let Err(e) = typed::<ServiceDefinition>(service, location.clone().with_path(&path)) {
                    return e;
                }
            }
        }
    }
    error
}

/// 模型載入器：解析、合併、替換變數並轉為型別化的主定義
pub fn load_definition(
    base: &SourceDocument,
    overlays: &[SourceDocument],
    variables: &BTreeMap<String, String>,
) -> Result<MasterDefinition> {
    let mut tree = merge_documents(base, overlays)?;
    let location = if overlays.is_empty() {
        SourceLocation::document(&base.name)
    } else {
        SourceLocation::document(format!("{} (+{} overlay(s))", base.name, overlays.len()))
    };

    check_service_names(&tree, &location)?;

    let secrets = secret_keys(&tree);
    Interpolator::new(variables, &secrets)?.resolve_tree(&mut tree)?;

    if tree.get("system").is_none() {
        return Err(CompileError::parse(location, "missing required `system` section"));
    }

    typed::<MasterDefinition>(&tree, location.clone())
        .map_err(|e| localize_error(&tree, &location, e))
}

/// 讀取服務註冊表（不做變數替換）
pub fn load_registry(document: &SourceDocument) -> Result<Registry> {
    if document.text.trim().is_empty() {
        return Ok(Registry::default());
    }
    serde_yaml::from_str(&document.text).map_err(|e| yaml_error(document, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
system:
  name: fleet
  version: "1.0"
services:
  core:
    api:
      port: "${API_PORT:-8001}"
      dependencies: [cache]
      environment:
        LOG_FORMAT: json
        DATABASE_URL: "postgres://app:${DB_PASSWORD}@db/app"
      features:
        trading: true
  infrastructure:
    cache:
      port: 6379
secrets:
  - name: db_password
    env_key: DB_PASSWORD
"#;

    fn base() -> SourceDocument {
        SourceDocument::new("master.yaml", BASE)
    }

    #[test]
    fn test_load_with_defaults() {
        let definition = load_definition(&base(), &[], &BTreeMap::new()).unwrap();
        let services = definition.services_by_name();
        let (role, api) = services["api"];
        assert_eq!(role, "core");
        assert_eq!(api.port, Some(8001));
        assert_eq!(api.dependencies, vec!["cache".to_string()]);
        assert_eq!(
            api.environment["DATABASE_URL"],
            "postgres://app:${DB_PASSWORD}@db/app"
        );
    }

    #[test]
    fn test_lookup_value_is_used() {
        let variables: BTreeMap<String, String> =
            [("API_PORT".to_string(), "9100".to_string())].into_iter().collect();
        let definition = load_definition(&base(), &[], &variables).unwrap();
        assert_eq!(definition.services_by_name()["api"].1.port, Some(9100));
    }

    #[test]
    fn test_overlay_overrides_and_replaces_lists() {
        let overlay = SourceDocument::new(
            "production.yaml",
            "services:\n  core:\n    api:\n      dependencies: []\n      features:\n        paper: true\n",
        );
        let definition = load_definition(&base(), &[overlay], &BTreeMap::new()).unwrap();
        let api = definition.services_by_name()["api"].1.clone();
        assert!(api.dependencies.is_empty());
        assert_eq!(api.features.len(), 2);
        assert_eq!(api.port, Some(8001));
    }

    #[test]
    fn test_overlay_cannot_add_services() {
        let overlay = SourceDocument::new(
            "staging.yaml",
            "services:\n  core:\n    brand_new:\n      port: 9999\n",
        );
        match load_definition(&base(), &[overlay], &BTreeMap::new()) {
            Err(CompileError::ParseError { location, message }) => {
                assert_eq!(location.document, "staging.yaml");
                assert_eq!(location.path.as_deref(), Some("services.core.brand_new"));
                assert!(message.contains("brand_new"));
            }
            other => panic!("expected ParseError, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_yaml_reports_location() {
        let broken = SourceDocument::new("broken.yaml", "system:\n  name: [unterminated\n");
        match load_definition(&broken, &[], &BTreeMap::new()) {
            Err(CompileError::ParseError { location, .. }) => {
                assert_eq!(location.document, "broken.yaml");
                assert!(location.line.is_some());
            }
            other => panic!("expected ParseError, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_field_type_reports_service_path() {
        let doc = SourceDocument::new(
            "master.yaml",
            "system:\n  name: fleet\nservices:\n  core:\n    api:\n      port: not-a-port\n",
        );
        match load_definition(&doc, &[], &BTreeMap::new()) {
            Err(CompileError::ParseError { location, .. }) => {
                assert_eq!(location.path.as_deref(), Some("services.core.api"));
            }
            other => panic!("expected ParseError, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_service_across_roles() {
        let doc = SourceDocument::new(
            "master.yaml",
            "system:\n  name: fleet\nservices:\n  core:\n    api: {}\n  edge:\n    api: {}\n",
        );
        assert!(matches!(
            load_definition(&doc, &[], &BTreeMap::new()),
            Err(CompileError::ParseError { .. })
        ));
    }

    #[test]
    fn test_unsafe_service_names_are_rejected() {
        for name in ["\"../../escaped\"", "\"a/b\"", ".hidden", "\"x..y\""] {
            let doc = SourceDocument::new(
                "master.yaml",
                format!(
                    "system:\n  name: fleet\nservices:\n  core:\n    {}: {{port: 8001}}\n",
                    name
                ),
            );
            match load_definition(&doc, &[], &BTreeMap::new()) {
                Err(CompileError::ParseError { location, .. }) => {
                    let path = location.path.unwrap_or_default();
                    assert!(path.starts_with("services.core."), "{}", path);
                }
                other => panic!("expected ParseError for {}, got {:?}", name, other),
            }
        }
    }

    #[test]
    fn test_colliding_object_names_are_rejected() {
        let doc = SourceDocument::new(
            "master.yaml",
            "system:\n  name: fleet\nservices:\n  core:\n    api_gateway: {}\n  edge:\n    api-gateway: {}\n",
        );
        match load_definition(&doc, &[], &BTreeMap::new()) {
            Err(CompileError::ParseError { message, .. }) => {
                assert!(message.contains("api-gateway"));
                assert!(message.contains("api_gateway"));
            }
            other => panic!("expected ParseError, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_variable_path() {
        let doc = SourceDocument::new(
            "master.yaml",
            "system:\n  name: fleet\nservices:\n  core:\n    api:\n      image: \"${IMAGE}\"\n",
        );
        match load_definition(&doc, &[], &BTreeMap::new()) {
            Err(CompileError::MissingVariable { key, path }) => {
                assert_eq!(key, "IMAGE");
                assert_eq!(path, "services.core.api.image");
            }
            other => panic!("expected MissingVariable, got {:?}", other),
        }
    }

    #[test]
    fn test_registry_parsing() {
        let registry = load_registry(&SourceDocument::new(
            "registry.yaml",
            "services:\n  api:\n    port: 8001\n    redis_db: 1\n  cache:\n    port: 6379\n",
        ))
        .unwrap();
        assert_eq!(registry.services["api"].cache_db, Some(1));
        assert_eq!(registry.services["cache"].cache_db, None);
    }
}
