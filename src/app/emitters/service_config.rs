use crate::app::emitters::banner;
use crate::domain::artifact::Artifact;
use crate::domain::model::ModuleConfig;
use crate::domain::ports::Emitter;
use crate::domain::resolved::{ResolvedModel, ResolvedService};
use crate::utils::error::Result;
use serde::Serialize;
use std::collections::BTreeMap;

pub const SERVICE_CONFIG_DIR: &str = "services";

#[derive(Debug, Serialize)]
struct ServiceConfigDocument<'a> {
    service: ServiceSection<'a>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    dependencies: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    features: BTreeMap<String, bool>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    modules: BTreeMap<String, ModuleConfig>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    secrets: BTreeMap<&'a str, &'a str>,
}

#[derive(Debug, Serialize)]
struct ServiceSection<'a> {
    name: &'a str,
    container_name: &'a str,
    role: &'a str,
    #[serde(rename = "type")]
    runtime: &'a str,
    image: &'a str,
    environment: &'a str,
    debug: bool,
    log_level: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_db: Option<u32>,
    replicas: u32,
}

fn document<'a>(model: &'a ResolvedModel, service: &'a ResolvedService) -> ServiceConfigDocument<'a> {
    ServiceConfigDocument {
        service: ServiceSection {
            name: &service.name,
            container_name: &service.container_name,
            role: &service.role,
            runtime: &service.runtime,
            image: &service.image,
            environment: &model.environment.name,
            debug: model.environment.debug,
            log_level: &model.environment.log_level,
            port: service.port,
            cache_db: service.cache_db,
            replicas: service.resources.replicas,
        },
        dependencies: service.dependencies.clone(),
        features: service.features.clone(),
        modules: service.modules.clone(),
        secrets: service
            .secrets
            .iter()
            .filter_map(|key| model.secrets.get(key))
            .map(|secret| (secret.env_key.as_str(), secret.locator.as_str()))
            .collect(),
    }
}

/// 每個服務的執行期設定檔（功能旗標、模組參數、機密定位）
pub struct ServiceConfigEmitter;

impl Emitter for ServiceConfigEmitter {
    fn name(&self) -> &'static str {
        "service-config"
    }

    fn emit(&self, model: &ResolvedModel) -> Result<Vec<Artifact>> {
        model
            .services
            .values()
            .map(|service| {
                let body = serde_yaml::to_string(&document(model, service))?;
                Ok(Artifact::new(
                    format!("{}/{}.yaml", SERVICE_CONFIG_DIR, service.name),
                    format!("{}{}", banner(model), body),
                ))
            })
            .collect()
    }
}
