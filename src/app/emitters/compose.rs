use crate::app::emitters::banner;
use crate::domain::artifact::Artifact;
use crate::domain::ports::Emitter;
use crate::domain::resolved::{EnvValue, ResolvedModel, ResolvedService, ResourceQuantities};
use crate::utils::error::Result;
use serde::Serialize;
use std::collections::BTreeMap;

pub const COMPOSE_PATH: &str = "docker-compose.yml";

#[derive(Debug, Serialize)]
struct ComposeDocument {
    name: String,
    services: BTreeMap<String, ComposeService>,
    networks: BTreeMap<String, ComposeNetwork>,
}

#[derive(Debug, Serialize)]
struct ComposeService {
    image: String,
    container_name: String,
    restart: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    env_file: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<String>,
    networks: Vec<String>,
    labels: BTreeMap<String, String>,
    deploy: ComposeDeploy,
}

#[derive(Debug, Serialize)]
struct ComposeDeploy {
    replicas: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    resources: Option<ComposeResources>,
}

#[derive(Debug, Serialize)]
struct ComposeResources {
    #[serde(skip_serializing_if = "Option::is_none")]
    limits: Option<ComposeLimits>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reservations: Option<ComposeLimits>,
}

#[derive(Debug, Serialize)]
struct ComposeLimits {
    #[serde(skip_serializing_if = "Option::is_none")]
    cpus: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory: Option<String>,
}

#[derive(Debug, Serialize)]
struct ComposeNetwork {
    driver: String,
}

fn limits(quantities: &ResourceQuantities) -> Option<ComposeLimits> {
    if quantities.cpu.is_none() && quantities.memory.is_none() {
        return None;
    }
    Some(ComposeLimits {
        cpus: quantities.cpu.map(|cpu| cpu.as_cores()),
        memory: quantities.memory.map(|memory| memory.as_docker()),
    })
}

/// Compose 會展開 `$`；非機密值需跳脫，機密值保留引用讓執行期展開
fn compose_value(model: &ResolvedModel, key: &str, value: &EnvValue) -> String {
    if model.is_secret_key(key) {
        format!("${{{}}}", key)
    } else if value.secret {
        value.value.clone()
    } else {
        value.value.replace('$', "$$")
    }
}

fn compose_service(model: &ResolvedModel, service: &ResolvedService) -> ComposeService {
    let environment = service
        .environment
        .iter()
        .map(|(key, value)| (key.clone(), compose_value(model, key, value)))
        .collect();

    let mut env_file: Vec<String> = service
        .secrets
        .iter()
        .filter_map(|key| model.secrets.get(key))
        .filter_map(|secret| secret.env_file.clone())
        .collect();
    env_file.sort();
    env_file.dedup();

    let labels = [
        ("fleet.environment", model.environment.name.clone()),
        ("fleet.role", service.role.clone()),
        ("fleet.system", model.system.name.clone()),
        ("fleet.type", service.runtime.clone()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    let resources = &service.resources;
    let limits_section = limits(&resources.limits);
    let reservations = limits(&resources.requests);
    let resources_section = if limits_section.is_none() && reservations.is_none() {
        None
    } else {
        Some(ComposeResources {
            limits: limits_section,
            reservations,
        })
    };

    ComposeService {
        image: service.image.clone(),
        container_name: service.container_name.clone(),
        restart: model.runtime.restart_policy.clone(),
        ports: service
            .port
            .map(|port| vec![format!("{}:{}", port, port)])
            .unwrap_or_default(),
        env_file,
        environment,
        depends_on: service.dependencies.clone(),
        networks: vec![model.runtime.network.clone()],
        labels,
        deploy: ComposeDeploy {
            replicas: resources.replicas,
            resources: resources_section,
        },
    }
}

/// 產生 docker-compose.yml
pub struct ComposeEmitter;

impl Emitter for ComposeEmitter {
    fn name(&self) -> &'static str {
        "compose"
    }

    fn emit(&self, model: &ResolvedModel) -> Result<Vec<Artifact>> {
        let document = ComposeDocument {
            name: format!("{}-{}", model.system.name, model.environment.name),
            services: model
                .services
                .values()
                .map(|service| (service.name.clone(), compose_service(model, service)))
                .collect(),
            networks: [(
                model.runtime.network.clone(),
                ComposeNetwork {
                    driver: "bridge".to_string(),
                },
            )]
            .into_iter()
            .collect(),
        };

        let body = serde_yaml::to_string(&document)?;
        Ok(vec![Artifact::new(
            COMPOSE_PATH,
            format!("{}{}", banner(model), body),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::emitters::fixtures;

    fn document(environment: &str) -> serde_yaml::Value {
        let artifacts = ComposeEmitter.emit(&fixtures::model(environment)).unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].display_path(), COMPOSE_PATH);
        serde_yaml::from_str(&artifacts[0].contents).unwrap()
    }

    #[test]
    fn test_compose_services_and_network() {
        let doc = document("production");
        let api = &doc["services"]["api_gateway"];
        assert_eq!(api["image"].as_str(), Some("ghcr.io/acme/fleet-api_gateway:2.1.0"));
        assert_eq!(api["container_name"].as_str(), Some("fleet_api_gateway"));
        assert_eq!(api["ports"][0].as_str(), Some("8001:8001"));
        assert_eq!(api["depends_on"][0].as_str(), Some("market_data"));
        assert_eq!(api["networks"][0].as_str(), Some("fleet-network"));
        assert_eq!(api["deploy"]["replicas"].as_u64(), Some(2));
        assert_eq!(
            api["deploy"]["resources"]["limits"]["memory"].as_str(),
            Some("1G")
        );
        assert_eq!(doc["networks"]["fleet-network"]["driver"].as_str(), Some("bridge"));
    }

    #[test]
    fn test_compose_keeps_secret_references() {
        let doc = document("production");
        let env = &doc["services"]["api_gateway"]["environment"];
        assert_eq!(env["DB_PASSWORD"].as_str(), Some("${DB_PASSWORD}"));
        assert_eq!(
            env["DATABASE_URL"].as_str(),
            Some("postgres://app:${DB_PASSWORD}@db:5432/app")
        );
        assert_eq!(env["REDIS_URL"].as_str(), Some("redis://redis:6379/1"));
        assert_eq!(env["ENVIRONMENT"].as_str(), Some("production"));
    }

    #[test]
    fn test_development_uses_env_file() {
        let doc = document("development");
        let market = &doc["services"]["market_data"];
        assert_eq!(market["env_file"][0].as_str(), Some(".env.secrets"));
        assert_eq!(market["environment"]["DEBUG"].as_str(), Some("true"));
        assert!(doc["services"]["api_gateway"]["env_file"].is_sequence());
    }
}
