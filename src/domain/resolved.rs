use crate::domain::model::{ModuleConfig, SecretDeclaration, SecretSourceKind};
use crate::domain::ports::SecretLocator;
use crate::domain::quantity::{CpuQuantity, MemoryQuantity};
use serde::Serialize;
use std::collections::BTreeMap;

/// 已合併、已套用環境、已替換變數的模型。建立後不再修改。
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub system: SystemInfo,
    pub environment: EnvironmentProfile,
    pub runtime: RuntimeSettings,
    pub orchestrator: OrchestratorSettings,
    pub secret_source: SecretSource,
    pub services: BTreeMap<String, ResolvedService>,
    /// 以 env_key 為鍵
    pub secrets: BTreeMap<String, ResolvedSecret>,
    pub provenance: Option<Provenance>,
}

impl ResolvedModel {
    pub fn namespace(&self) -> String {
        format!(
            "{}-{}",
            self.orchestrator.namespace_prefix, self.environment.name
        )
    }

    pub fn is_secret_key(&self, key: &str) -> bool {
        self.secrets.contains_key(key)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentProfile {
    pub name: String,
    pub debug: bool,
    pub log_level: String,
    pub resource_multiplier: f64,
    pub secret_source: SecretSourceKind,
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub registry: Option<String>,
    pub network: String,
    pub restart_policy: String,
    pub image_tag: String,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub namespace_prefix: String,
    pub image_pull_policy: String,
    pub secret_name: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedService {
    pub name: String,
    pub container_name: String,
    pub role: String,
    pub runtime: String,
    pub image: String,
    pub port: Option<u16>,
    pub dependencies: Vec<String>,
    pub environment: BTreeMap<String, EnvValue>,
    pub resources: ResolvedResources,
    pub cache_db: Option<u32>,
    pub features: BTreeMap<String, bool>,
    pub modules: BTreeMap<String, ModuleConfig>,
    /// 此服務接收的機密 env_key
    pub secrets: Vec<String>,
}

/// 環境變數值；`secret` 為真時 `value` 只含變數引用，不含實際機密
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvValue {
    pub value: String,
    pub secret: bool,
}

impl EnvValue {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secret: false,
        }
    }

    pub fn secret(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secret: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceQuantities {
    pub cpu: Option<CpuQuantity>,
    pub memory: Option<MemoryQuantity>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedResources {
    pub limits: ResourceQuantities,
    pub requests: ResourceQuantities,
    pub replicas: u32,
}

#[derive(Debug, Clone)]
pub struct ResolvedSecret {
    pub name: String,
    pub env_key: String,
    pub locator: String,
    /// 使用 env-file 來源時，執行期讀取的檔案
    pub env_file: Option<String>,
}

/// 機密來源：只產生定位字串，從不讀取實際值
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    VaultBacked { mount: String },
    EnvFileBacked { path: String },
}

impl SecretLocator for SecretSource {
    fn locator_for(&self, secret: &SecretDeclaration, environment: &str) -> String {
        match self {
            Self::VaultBacked { mount } => match &secret.vault_path {
                Some(path) => format!("vault:{}", path),
                None => format!("vault:{}/{}/{}", mount, environment, secret.name),
            },
            Self::EnvFileBacked { path } => {
                let file = secret.env_file.as_deref().unwrap_or(path);
                format!("env-file:{}#{}", file, secret.env_key)
            }
        }
    }
}

/// 產生來源的版本資訊（舊版批次產生模式使用）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Provenance {
    pub repository: String,
    #[serde(rename = "ref")]
    pub reference: String,
    pub revision: String,
}
