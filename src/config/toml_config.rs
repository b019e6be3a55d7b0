use crate::app::emitters::ArtifactKind;
use crate::core::compiler::CompileRequest;
use crate::core::loader::read_document;
use crate::domain::ports::Storage;
use crate::domain::resolved::Provenance;
use crate::utils::error::{CompileError, Result};
use crate::utils::validation::{
    validate_file_extensions, validate_non_empty_string, validate_path, validate_positive_number,
    validate_url, Validate,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const DEFAULT_PORT: u16 = 9000;
const DOCUMENT_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// 編譯執行檔（TOML）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    pub compiler: CompilerSection,
    pub server: Option<ServerSection>,
    pub provenance: Option<ProvenanceSection>,
    /// 提供給 `${VAR}` 查表的變數
    pub variables: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerSection {
    pub master: String,
    pub registry: String,
    pub overlays: Option<Vec<String>>,
    pub environments: Vec<String>,
    pub output_dir: String,
    pub formats: Option<Vec<String>>,
    pub archive: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceSection {
    pub repository: String,
    #[serde(rename = "ref")]
    pub reference: String,
    pub revision: String,
}

impl CompilerConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(CompileError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        // 處理環境變數替換
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| CompileError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${OUTPUT_ROOT})；未設定的保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}")?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        let compiler = &self.compiler;
        validate_path("compiler.master", &compiler.master)?;
        validate_path("compiler.registry", &compiler.registry)?;
        validate_path("compiler.output_dir", &compiler.output_dir)?;
        validate_file_extensions(
            "compiler.master",
            std::slice::from_ref(&compiler.master),
            &DOCUMENT_EXTENSIONS,
        )?;
        validate_file_extensions(
            "compiler.registry",
            std::slice::from_ref(&compiler.registry),
            &DOCUMENT_EXTENSIONS,
        )?;
        validate_file_extensions("compiler.overlays", self.overlays(), &DOCUMENT_EXTENSIONS)?;

        if compiler.environments.is_empty() {
            return Err(CompileError::MissingConfigError {
                field: "compiler.environments".to_string(),
            });
        }
        for environment in &compiler.environments {
            validate_non_empty_string("compiler.environments", environment)?;
        }

        self.formats()?;

        if let Some(port) = self.server.as_ref().and_then(|s| s.port) {
            validate_positive_number("server.port", port as usize, 1)?;
        }

        if let Some(provenance) = &self.provenance {
            validate_url("provenance.repository", &provenance.repository)?;
            validate_non_empty_string("provenance.ref", &provenance.reference)?;
            validate_non_empty_string("provenance.revision", &provenance.revision)?;
        }

        Ok(())
    }

    pub fn overlays(&self) -> &[String] {
        self.compiler.overlays.as_deref().unwrap_or(&[])
    }

    /// 選取的輸出格式；未指定時產生全部
    pub fn formats(&self) -> Result<Vec<ArtifactKind>> {
        let Some(names) = &self.compiler.formats else {
            return Ok(ArtifactKind::ALL.to_vec());
        };
        names
            .iter()
            .map(|name| {
                ArtifactKind::parse(name).ok_or_else(|| CompileError::InvalidConfigValueError {
                    field: "compiler.formats".to_string(),
                    value: name.clone(),
                    reason: format!(
                        "Unsupported format. Valid formats: {}",
                        ArtifactKind::ALL
                            .iter()
                            .map(ArtifactKind::as_str)
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                })
            })
            .collect()
    }

    pub fn archive(&self) -> bool {
        self.compiler.archive.unwrap_or(false)
    }

    pub fn variables(&self) -> BTreeMap<String, String> {
        self.variables.clone().unwrap_or_default()
    }

    pub fn provenance(&self) -> Option<Provenance> {
        self.provenance.as_ref().map(|p| Provenance {
            repository: p.repository.clone(),
            reference: p.reference.clone(),
            revision: p.revision.clone(),
        })
    }

    /// 伺服器監聽位址
    pub fn server_address(&self) -> String {
        let server = self.server.as_ref();
        format!(
            "{}:{}",
            server
                .and_then(|s| s.host.clone())
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            server.and_then(|s| s.port).unwrap_or(DEFAULT_PORT)
        )
    }

    /// 讀入所有輸入文件，組成第一個環境的編譯請求
    pub async fn request<S: Storage>(&self, storage: &S) -> Result<CompileRequest> {
        let master = read_document(storage, &self.compiler.master).await?;
        let registry = read_document(storage, &self.compiler.registry).await?;
        let mut overlays = Vec::new();
        for overlay in self.overlays() {
            overlays.push(read_document(storage, overlay).await?);
        }

        let environment = self
            .compiler
            .environments
            .first()
            .cloned()
            .ok_or_else(|| CompileError::MissingConfigError {
                field: "compiler.environments".to_string(),
            })?;

        // 程序環境變數在前，[variables] 覆寫
        let mut variables: BTreeMap<String, String> = std::env::vars().collect();
        variables.extend(self.variables());

        Ok(CompileRequest::new(master, registry, environment)
            .with_overlays(overlays)
            .with_variables(variables)
            .without_secret_variables()
            .with_provenance(self.provenance())
            .with_formats(self.formats()?))
    }
}

impl Validate for CompilerConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::LocalStorage;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const BASIC: &str = r#"
[compiler]
master = "config/master.yaml"
registry = "config/registry.yaml"
overlays = ["config/overlays/production.yaml"]
environments = ["production", "staging"]
output_dir = "./build"
formats = ["compose", "manifest"]
archive = true

[server]
port = 9100

[variables]
IMAGE_TAG = "2.4.0"
"#;

    #[test]
    fn test_parse_basic_toml_config() {
        let config = CompilerConfig::from_toml_str(BASIC).unwrap();

        assert_eq!(config.compiler.master, "config/master.yaml");
        assert_eq!(config.overlays().len(), 1);
        assert_eq!(
            config.formats().unwrap(),
            vec![ArtifactKind::Compose, ArtifactKind::Manifest]
        );
        assert!(config.archive());
        assert_eq!(config.variables()["IMAGE_TAG"], "2.4.0");
        assert_eq!(config.server_address(), "0.0.0.0:9100");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("FLEET_TEST_OUTPUT_ROOT", "/srv/fleet");

        let toml_content = r#"
[compiler]
master = "master.yaml"
registry = "registry.yaml"
environments = ["development"]
output_dir = "${FLEET_TEST_OUTPUT_ROOT}/out"
"#;

        let config = CompilerConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.compiler.output_dir, "/srv/fleet/out");
        assert_eq!(config.formats().unwrap().len(), ArtifactKind::ALL.len());

        std::env::remove_var("FLEET_TEST_OUTPUT_ROOT");
    }

    #[test]
    fn test_config_validation() {
        let unsupported_format = r#"
[compiler]
master = "master.yaml"
registry = "registry.yaml"
environments = ["production"]
output_dir = "./out"
formats = ["helm"]
"#;
        let config = CompilerConfig::from_toml_str(unsupported_format).unwrap();
        assert!(config.validate().is_err());

        let wrong_extension = r#"
[compiler]
master = "master.json"
registry = "registry.yaml"
environments = ["production"]
output_dir = "./out"
"#;
        let config = CompilerConfig::from_toml_str(wrong_extension).unwrap();
        assert!(matches!(
            config.validate(),
            Err(CompileError::InvalidConfigValueError { .. })
        ));

        let no_environments = r#"
[compiler]
master = "master.yaml"
registry = "registry.yaml"
environments = []
output_dir = "./out"
"#;
        let config = CompilerConfig::from_toml_str(no_environments).unwrap();
        assert!(matches!(
            config.validate(),
            Err(CompileError::MissingConfigError { .. })
        ));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(BASIC.as_bytes()).unwrap();

        let config = CompilerConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.compiler.environments, vec!["production", "staging"]);
    }

    #[test]
    fn test_server_address_defaults() {
        let config = CompilerConfig::from_toml_str(
            "[compiler]\nmaster = \"m.yaml\"\nregistry = \"r.yaml\"\nenvironments = [\"staging\"]\noutput_dir = \"out\"\n",
        )
        .unwrap();
        assert_eq!(config.server_address(), "0.0.0.0:9000");
    }

    #[tokio::test]
    async fn test_request_drops_secret_variables() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("master.yaml"),
            "system: {name: fleet}\nsecrets:\n  - name: db\n    env_key: FLEET_TEST_DB_PASSWORD\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("registry.yaml"), "services: {}\n").unwrap();

        let config = CompilerConfig::from_toml_str(
            "[compiler]\nmaster = \"master.yaml\"\nregistry = \"registry.yaml\"\nenvironments = [\"staging\"]\noutput_dir = \"out\"\n\n[variables]\nFLEET_TEST_DB_PASSWORD = \"hunter2\"\nIMAGE_TAG = \"1.2.3\"\n",
        )
        .unwrap();
        let request = config.request(&LocalStorage::new(dir.path())).await.unwrap();
        assert!(!request.variables.contains_key("FLEET_TEST_DB_PASSWORD"));
        assert_eq!(request.variables["IMAGE_TAG"], "1.2.3");
    }

    #[tokio::test]
    async fn test_request_reads_documents() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("master.yaml"), "system: {name: fleet}\n").unwrap();
        std::fs::write(dir.path().join("registry.yaml"), "services: {}\n").unwrap();

        let config = CompilerConfig::from_toml_str(
            "[compiler]\nmaster = \"master.yaml\"\nregistry = \"registry.yaml\"\nenvironments = [\"staging\"]\noutput_dir = \"out\"\n",
        )
        .unwrap();
        let request = config.request(&LocalStorage::new(dir.path())).await.unwrap();
        assert_eq!(request.environment, "staging");
        assert_eq!(request.master.name, "master.yaml");
        assert!(request.master.text.contains("fleet"));
    }
}
