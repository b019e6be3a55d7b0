use crate::domain::artifact::Artifact;
use crate::domain::ports::Emitter;
use crate::domain::resolved::{Provenance, ResolvedModel, SystemInfo};
use crate::utils::error::Result;
use serde::Serialize;

pub const REGISTRY_PATH: &str = "registry.json";
pub const PROVENANCE_PATH: &str = "provenance.json";

#[derive(Debug, Serialize)]
struct RegistryDocument<'a> {
    system: &'a SystemInfo,
    environment: &'a str,
    namespace: String,
    services: Vec<RegistryService<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provenance: Option<&'a Provenance>,
}

#[derive(Debug, Serialize)]
struct RegistryService<'a> {
    name: &'a str,
    role: &'a str,
    #[serde(rename = "type")]
    runtime: &'a str,
    container_name: &'a str,
    image: &'a str,
    port: Option<u16>,
    cache_db: Option<u32>,
    dependencies: &'a [String],
}

#[derive(Debug, Serialize)]
struct ProvenanceDocument<'a> {
    system: &'a str,
    environment: &'a str,
    #[serde(flatten)]
    provenance: &'a Provenance,
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)? + "\n")
}

/// 已解析的服務清單（JSON），供外部工具查詢埠號與快取分區
pub struct RegistryEmitter;

impl Emitter for RegistryEmitter {
    fn name(&self) -> &'static str {
        "registry"
    }

    fn emit(&self, model: &ResolvedModel) -> Result<Vec<Artifact>> {
        let document = RegistryDocument {
            system: &model.system,
            environment: &model.environment.name,
            namespace: model.namespace(),
            services: model
                .services
                .values()
                .map(|service| RegistryService {
                    name: &service.name,
                    role: &service.role,
                    runtime: &service.runtime,
                    container_name: &service.container_name,
                    image: &service.image,
                    port: service.port,
                    cache_db: service.cache_db,
                    dependencies: &service.dependencies,
                })
                .collect(),
            provenance: model.provenance.as_ref(),
        };

        let mut artifacts = vec![Artifact::new(REGISTRY_PATH, to_json(&document)?)];
        if let Some(provenance) = &model.provenance {
            artifacts.push(Artifact::new(
                PROVENANCE_PATH,
                to_json(&ProvenanceDocument {
                    system: &model.system.name,
                    environment: &model.environment.name,
                    provenance,
                })?,
            ));
        }
        Ok(artifacts)
    }
}
