pub mod compose;
pub mod env_file;
pub mod manifest;
pub mod registry;
pub mod service_config;

use crate::domain::ports::Emitter;
use crate::domain::resolved::ResolvedModel;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use compose::ComposeEmitter;
pub use env_file::EnvFileEmitter;
pub use manifest::ManifestEmitter;
pub use registry::RegistryEmitter;
pub use service_config::ServiceConfigEmitter;

/// 可選的輸出格式；每種格式對應一個產生器
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    Compose,
    Manifest,
    Env,
    ServiceConfig,
    Registry,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 5] = [
        ArtifactKind::Compose,
        ArtifactKind::Manifest,
        ArtifactKind::Env,
        ArtifactKind::ServiceConfig,
        ArtifactKind::Registry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compose => "compose",
            Self::Manifest => "manifest",
            Self::Env => "env",
            Self::ServiceConfig => "service-config",
            Self::Registry => "registry",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name.trim().to_ascii_lowercase())
    }

    pub fn emitter(&self) -> Box<dyn Emitter> {
        match self {
            Self::Compose => Box::new(ComposeEmitter),
            Self::Manifest => Box::new(ManifestEmitter),
            Self::Env => Box::new(EnvFileEmitter),
            Self::ServiceConfig => Box::new(ServiceConfigEmitter),
            Self::Registry => Box::new(RegistryEmitter),
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 文字型產物開頭的註解；內容只取決於模型，不含時間戳
pub(crate) fn banner(model: &ResolvedModel) -> String {
    let mut banner = format!(
        "# Generated by fleet-compiler for {} {} ({}). Do not edit by hand.\n",
        model.system.name, model.system.version, model.environment.name
    );
    if let Some(provenance) = &model.provenance {
        banner.push_str(&format!(
            "# Source: {}@{} ({})\n",
            provenance.repository, provenance.reference, provenance.revision
        ));
    }
    banner
}

pub(crate) use crate::core::loader::dns_label;
