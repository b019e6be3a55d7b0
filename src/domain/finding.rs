use serde::Serialize;
use std::fmt;

/// 註冊表驗證結果的種類，排序即為回報順序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    PortConflict,
    CacheNamespaceConflict,
    UnknownDependency,
    DependencyCycle,
    MissingRegistryEntry,
    MissingServiceDefinition,
    PortMismatch,
    CacheNamespaceMismatch,
    LiteralSecret,
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PortConflict => "PortConflict",
            Self::CacheNamespaceConflict => "CacheNamespaceConflict",
            Self::UnknownDependency => "UnknownDependency",
            Self::DependencyCycle => "DependencyCycle",
            Self::MissingRegistryEntry => "MissingRegistryEntry",
            Self::MissingServiceDefinition => "MissingServiceDefinition",
            Self::PortMismatch => "PortMismatch",
            Self::CacheNamespaceMismatch => "CacheNamespaceMismatch",
            Self::LiteralSecret => "LiteralSecret",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 單一違規：種類、違規服務、衝突對象及說明
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub service: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<String>,
    pub detail: String,
}

impl Finding {
    pub fn new(kind: FindingKind, service: impl Into<String>) -> Self {
        Self {
            kind,
            service: service.into(),
            peers: Vec::new(),
            detail: String::new(),
        }
    }

    pub fn with_peers(mut self, peers: Vec<String>) -> Self {
        self.peers = peers;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    /// 所有牽涉的服務，違規服務在前
    pub fn services(&self) -> Vec<&str> {
        std::iter::once(self.service.as_str())
            .chain(self.peers.iter().map(String::as_str))
            .collect()
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.kind, self.services().join(", "))?;
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}
