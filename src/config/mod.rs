pub mod toml_config;

use crate::app::emitters::ArtifactKind;
use crate::utils::error::{CompileError, Result};
use crate::utils::validation::{
    validate_file_extensions, validate_non_empty_string, validate_path, validate_positive_number,
    validate_url, Validate,
};
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;

pub use toml_config::CompilerConfig;

const DOCUMENT_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

#[derive(Debug, Clone, Parser)]
#[command(name = "fleet-compiler")]
#[command(about = "Compile a fleet master definition into deployment artifacts", version)]
pub struct CliConfig {
    #[command(subcommand)]
    pub command: Command,

    #[arg(long, global = true, help = "Enable verbose output")]
    pub verbose: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// 編譯一個或多個環境並發佈產物
    Compile(CompileArgs),
    /// 只驗證註冊表，不產生任何輸出
    Check(CheckArgs),
    /// 舊版批次模式：產生所有內建環境並記錄來源版本
    Legacy(LegacyArgs),
    /// 從輸入目錄只產生 Kubernetes manifests
    K8s(K8sArgs),
    /// 啟動 HTTP 編譯服務
    Serve(ServeArgs),
    /// 輸出主定義的 JSON Schema
    Schema(SchemaArgs),
}

#[derive(Debug, Clone, Args)]
pub struct InputArgs {
    #[arg(long, default_value = "config/master.yaml")]
    pub master: String,

    #[arg(long, default_value = "config/registry.yaml")]
    pub registry: String,

    /// 依序套用的覆寫層
    #[arg(long = "overlay")]
    pub overlays: Vec<String>,

    /// 覆寫變數，格式 KEY=VALUE
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub sets: Vec<String>,
}

/// `--set KEY=VALUE` 解析
pub fn parse_overrides(sets: &[String]) -> Result<BTreeMap<String, String>> {
    sets.iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.to_string()))
            }
            _ => Err(CompileError::InvalidConfigValueError {
                field: "--set".to_string(),
                value: pair.clone(),
                reason: "Expected KEY=VALUE".to_string(),
            }),
        })
        .collect()
}

/// 變數查表：程序環境變數，再由 `--set` 覆寫
pub fn lookup_variables(sets: &[String]) -> Result<BTreeMap<String, String>> {
    let mut variables: BTreeMap<String, String> = std::env::vars().collect();
    variables.extend(parse_overrides(sets)?);
    Ok(variables)
}

impl InputArgs {
    pub fn overrides(&self) -> Result<BTreeMap<String, String>> {
        parse_overrides(&self.sets)
    }

    pub fn variables(&self) -> Result<BTreeMap<String, String>> {
        lookup_variables(&self.sets)
    }

    fn validate_inputs(&self) -> Result<()> {
        validate_path("master", &self.master)?;
        validate_path("registry", &self.registry)?;
        validate_file_extensions(
            "master",
            std::slice::from_ref(&self.master),
            &DOCUMENT_EXTENSIONS,
        )?;
        validate_file_extensions(
            "registry",
            std::slice::from_ref(&self.registry),
            &DOCUMENT_EXTENSIONS,
        )?;
        validate_file_extensions("overlay", &self.overlays, &DOCUMENT_EXTENSIONS)?;
        self.overrides()?;
        Ok(())
    }
}

fn validate_environments(environments: &[String]) -> Result<()> {
    if environments.is_empty() {
        return Err(CompileError::MissingConfigError {
            field: "env".to_string(),
        });
    }
    for environment in environments {
        validate_non_empty_string("env", environment)?;
    }
    Ok(())
}

#[derive(Debug, Clone, Args)]
pub struct CompileArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// 目標環境；多個環境以逗號分隔，各自輸出到 `<output>/<env>`
    #[arg(long = "env", value_delimiter = ',', required = true)]
    pub environments: Vec<String>,

    #[arg(long, default_value = "./build")]
    pub output: String,

    /// 輸出格式（compose, manifest, env, service-config, registry）
    #[arg(long, value_delimiter = ',')]
    pub formats: Vec<String>,

    #[arg(long, help = "Also write a zip bundle of the published artifacts")]
    pub archive: bool,
}

impl CompileArgs {
    pub fn formats(&self) -> Result<Vec<ArtifactKind>> {
        parse_formats(&self.formats)
    }
}

/// 解析格式名稱；空清單代表全部
pub fn parse_formats(names: &[String]) -> Result<Vec<ArtifactKind>> {
    if names.is_empty() {
        return Ok(ArtifactKind::ALL.to_vec());
    }
    names
        .iter()
        .map(|name| {
            ArtifactKind::parse(name).ok_or_else(|| CompileError::InvalidConfigValueError {
                field: "formats".to_string(),
                value: name.clone(),
                reason: "Unsupported format".to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Args)]
pub struct CheckArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[arg(long = "env", value_delimiter = ',', default_value = "production")]
    pub environments: Vec<String>,
}

#[derive(Debug, Clone, Args)]
pub struct LegacyArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// 來源倉庫網址
    #[arg(long)]
    pub repository: String,

    #[arg(long = "ref")]
    pub reference: String,

    #[arg(long)]
    pub revision: String,

    #[arg(long, default_value = "./build")]
    pub output: String,
}

#[derive(Debug, Clone, Args)]
pub struct K8sArgs {
    /// 含 master.yaml、registry.yaml 與選用 overlays/<env>.yaml 的目錄
    #[arg(long)]
    pub input: String,

    #[arg(long)]
    pub output: String,

    #[arg(long = "env", default_value = "production")]
    pub environment: String,

    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub sets: Vec<String>,
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, default_value_t = toml_config::DEFAULT_PORT)]
    pub port: u16,
}

#[derive(Debug, Clone, Args)]
pub struct SchemaArgs {
    /// 未指定時輸出到 stdout
    #[arg(long)]
    pub output: Option<String>,
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        match &self.command {
            Command::Compile(args) => {
                args.input.validate_inputs()?;
                validate_environments(&args.environments)?;
                validate_path("output", &args.output)?;
                args.formats()?;
            }
            Command::Check(args) => {
                args.input.validate_inputs()?;
                validate_environments(&args.environments)?;
            }
            Command::Legacy(args) => {
                args.input.validate_inputs()?;
                validate_url("repository", &args.repository)?;
                validate_non_empty_string("ref", &args.reference)?;
                validate_non_empty_string("revision", &args.revision)?;
                validate_path("output", &args.output)?;
            }
            Command::K8s(args) => {
                validate_path("input", &args.input)?;
                validate_path("output", &args.output)?;
                validate_non_empty_string("env", &args.environment)?;
                parse_overrides(&args.sets)?;
            }
            Command::Serve(args) => {
                validate_non_empty_string("host", &args.host)?;
                validate_positive_number("port", args.port as usize, 1)?;
            }
            Command::Schema(args) => {
                if let Some(output) = &args.output {
                    validate_path("output", output)?;
                }
            }
        }
        Ok(())
    }
}
