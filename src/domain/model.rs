use crate::domain::lenient;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 主定義文件：整個服務群的單一來源
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MasterDefinition {
    pub system: SystemConfig,
    #[serde(default)]
    pub docker: RuntimeConfig,
    /// 依角色分組的服務：`services.<role>.<name>`
    #[serde(default)]
    pub services: BTreeMap<String, BTreeMap<String, ServiceDefinition>>,
    #[serde(default)]
    pub kubernetes: OrchestratorConfig,
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentOverride>,
    #[serde(default, deserialize_with = "lenient::string_map")]
    pub environment_variables: BTreeMap<String, String>,
    #[serde(default)]
    pub secrets: Vec<SecretDeclaration>,
    #[serde(default)]
    pub secrets_backend: SecretsBackendConfig,
}

impl MasterDefinition {
    /// 攤平成 (角色, 名稱, 定義)，依名稱排序
    pub fn services_by_name(&self) -> BTreeMap<&str, (&str, &ServiceDefinition)> {
        self.services
            .iter()
            .flat_map(|(role, group)| {
                group
                    .iter()
                    .map(move |(name, def)| (name.as_str(), (role.as_str(), def)))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SystemConfig {
    pub name: String,
    #[serde(default, deserialize_with = "lenient::option_string")]
    pub version: Option<String>,
    pub domain: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RuntimeConfig {
    /// 映像檔倉庫前綴，例如 `ghcr.io/acme`
    pub registry: Option<String>,
    pub network: Option<String>,
    pub restart_policy: Option<String>,
    #[serde(default, deserialize_with = "lenient::option_string")]
    pub image_tag: Option<String>,
    pub cache: Option<CacheBackend>,
}

/// 共用快取後端（例如 Redis），服務以 `cache_db` 選擇分區
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheBackend {
    pub host: String,
    #[serde(default, deserialize_with = "lenient::option")]
    pub port: Option<u16>,
    #[serde(default)]
    pub scheme: Option<String>,
    /// 注入到服務環境中的 URL 變數名稱，預設 `REDIS_URL`
    pub url_env: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ServiceDefinition {
    pub container_name: Option<String>,
    #[serde(rename = "type")]
    pub runtime: Option<String>,
    pub image: Option<String>,
    #[serde(default, deserialize_with = "lenient::option")]
    pub port: Option<u16>,
    #[serde(default, alias = "depends_on")]
    pub dependencies: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_map")]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub resources: ResourceSpec,
    #[serde(default, alias = "redis_db", deserialize_with = "lenient::option")]
    pub cache_db: Option<u32>,
    #[serde(default, deserialize_with = "lenient::flag_map")]
    pub features: BTreeMap<String, bool>,
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ResourceSpec {
    #[serde(default, deserialize_with = "lenient::option_string")]
    pub cpu: Option<String>,
    #[serde(default, deserialize_with = "lenient::option_string")]
    pub memory: Option<String>,
    #[serde(default, deserialize_with = "lenient::option")]
    pub replicas: Option<u32>,
    pub requests: Option<ResourceRequests>,
    /// 各環境的覆寫值，不套用資源倍率
    #[serde(default)]
    pub overrides: BTreeMap<String, ResourceOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ResourceRequests {
    #[serde(default, deserialize_with = "lenient::option_string")]
    pub cpu: Option<String>,
    #[serde(default, deserialize_with = "lenient::option_string")]
    pub memory: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ResourceOverride {
    #[serde(default, deserialize_with = "lenient::option_string")]
    pub cpu: Option<String>,
    #[serde(default, deserialize_with = "lenient::option_string")]
    pub memory: Option<String>,
    #[serde(default, deserialize_with = "lenient::option")]
    pub replicas: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModuleConfig {
    #[serde(default = "default_true", deserialize_with = "lenient::value")]
    pub enabled: bool,
    #[serde(
        default,
        deserialize_with = "lenient::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub interval: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct OrchestratorConfig {
    pub namespace_prefix: Option<String>,
    pub image_pull_policy: Option<String>,
    /// 存放機密值的 Secret 物件名稱
    pub secret_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct EnvironmentOverride {
    #[serde(default, deserialize_with = "lenient::option")]
    pub debug: Option<bool>,
    pub log_level: Option<String>,
    #[serde(default, deserialize_with = "lenient::option")]
    pub resource_multiplier: Option<f64>,
    pub secret_source: Option<SecretSourceKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SecretSourceKind {
    Vault,
    EnvFile,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SecretDeclaration {
    pub name: String,
    pub env_key: String,
    /// 接收此機密的服務；引用 `${env_key}` 的服務也會自動接收
    #[serde(default)]
    pub services: Vec<String>,
    pub vault_path: Option<String>,
    pub env_file: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SecretsBackendConfig {
    pub vault: Option<VaultBackend>,
    pub env_file: Option<EnvFileBackend>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VaultBackend {
    pub mount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EnvFileBackend {
    pub path: String,
}

/// 服務註冊表：驗證用的權威清單，編譯器只讀不寫
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub services: BTreeMap<String, RegistryEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    #[serde(default, deserialize_with = "lenient::option")]
    pub port: Option<u16>,
    #[serde(default, alias = "redis_db", deserialize_with = "lenient::option")]
    pub cache_db: Option<u32>,
}
