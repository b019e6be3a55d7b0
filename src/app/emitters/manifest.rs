use crate::app::emitters::{banner, dns_label};
use crate::core::interpolate::ReferenceScanner;
use crate::domain::artifact::Artifact;
use crate::domain::ports::Emitter;
use crate::domain::resolved::{ResolvedModel, ResolvedService, ResourceQuantities};
use crate::utils::error::Result;
use serde::Serialize;
use std::collections::BTreeMap;

pub const MANIFEST_DIR: &str = "k8s";

#[derive(Debug, Serialize)]
struct ObjectMeta {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Object<S: Serialize> {
    api_version: &'static str,
    kind: &'static str,
    metadata: ObjectMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    spec: Option<S>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Serialize)]
struct Selector {
    #[serde(rename = "matchLabels")]
    match_labels: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct DeploymentSpec {
    replicas: u32,
    selector: Selector,
    template: PodTemplate,
}

#[derive(Debug, Serialize)]
struct PodTemplate {
    metadata: TemplateMeta,
    spec: PodSpec,
}

#[derive(Debug, Serialize)]
struct TemplateMeta {
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct PodSpec {
    containers: Vec<Container>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Container {
    name: String,
    image: String,
    image_pull_policy: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ports: Vec<ContainerPort>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    env: Vec<EnvVar>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    resources: BTreeMap<&'static str, BTreeMap<&'static str, String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContainerPort {
    container_port: u16,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvVar {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value_from: Option<EnvVarSource>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvVarSource {
    secret_key_ref: SecretKeyRef,
}

#[derive(Debug, Serialize)]
struct SecretKeyRef {
    name: String,
    key: String,
}

#[derive(Debug, Serialize)]
struct ServiceSpec {
    selector: BTreeMap<String, String>,
    ports: Vec<ServicePort>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServicePort {
    name: &'static str,
    port: u16,
    target_port: u16,
}

fn meta(model: &ResolvedModel, name: String, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name,
        namespace: Some(model.namespace()),
        labels,
    }
}

fn service_labels(model: &ResolvedModel, service: &ResolvedService) -> BTreeMap<String, String> {
    [
        ("app", dns_label(&service.name)),
        ("app.kubernetes.io/part-of", model.system.name.clone()),
        ("environment", model.environment.name.clone()),
        ("role", service.role.clone()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn quantities(quantities: &ResourceQuantities) -> BTreeMap<&'static str, String> {
    let mut section = BTreeMap::new();
    if let Some(cpu) = quantities.cpu {
        section.insert("cpu", cpu.to_string());
    }
    if let Some(memory) = quantities.memory {
        section.insert("memory", memory.to_string());
    }
    section
}

/// 機密走 secretKeyRef 放在最前面；其餘值中的 `${X}` 改寫為容器可展開的 `$(X)`
fn env_vars(
    model: &ResolvedModel,
    service: &ResolvedService,
    scanner: &ReferenceScanner,
) -> Vec<EnvVar> {
    let mut secret_refs = Vec::new();
    let mut values = Vec::new();

    for (key, value) in &service.environment {
        if model.is_secret_key(key) {
            secret_refs.push(EnvVar {
                name: key.clone(),
                value: None,
                value_from: Some(EnvVarSource {
                    secret_key_ref: SecretKeyRef {
                        name: model.orchestrator.secret_name.clone(),
                        key: key.clone(),
                    },
                }),
            });
        } else if value.secret {
            values.push(EnvVar {
                name: key.clone(),
                value: Some(scanner.to_dependent_form(&value.value)),
                value_from: None,
            });
        } else {
            values.push(EnvVar {
                name: key.clone(),
                value: Some(value.value.replace("$(", "$$(")),
                value_from: None,
            });
        }
    }

    secret_refs.extend(values);
    secret_refs
}

fn to_yaml_documents(documents: Vec<String>) -> String {
    documents.join("---\n")
}

fn namespace_artifact(model: &ResolvedModel) -> Result<Artifact> {
    let labels = [
        ("app.kubernetes.io/part-of", model.system.name.clone()),
        ("environment", model.environment.name.clone()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    let namespace: Object<()> = Object {
        api_version: "v1",
        kind: "Namespace",
        metadata: ObjectMeta {
            name: model.namespace(),
            namespace: None,
            labels,
        },
        spec: None,
        data: None,
    };
    Ok(Artifact::new(
        format!("{}/namespace.yaml", MANIFEST_DIR),
        format!("{}{}", banner(model), serde_yaml::to_string(&namespace)?),
    ))
}

fn service_artifact(
    model: &ResolvedModel,
    service: &ResolvedService,
    scanner: &ReferenceScanner,
) -> Result<Artifact> {
    let name = dns_label(&service.name);
    let labels = service_labels(model, service);
    let selector: BTreeMap<String, String> = [("app".to_string(), name.clone())].into_iter().collect();

    let mut resources = BTreeMap::new();
    let limits = quantities(&service.resources.limits);
    if !limits.is_empty() {
        resources.insert("limits", limits);
    }
    let requests = quantities(&service.resources.requests);
    if !requests.is_empty() {
        resources.insert("requests", requests);
    }

    let deployment = Object {
        api_version: "apps/v1",
        kind: "Deployment",
        metadata: meta(model, name.clone(), labels.clone()),
        spec: Some(DeploymentSpec {
            replicas: service.resources.replicas,
            selector: Selector {
                match_labels: selector.clone(),
            },
            template: PodTemplate {
                metadata: TemplateMeta { labels: labels.clone() },
                spec: PodSpec {
                    containers: vec![Container {
                        name: name.clone(),
                        image: service.image.clone(),
                        image_pull_policy: model.orchestrator.image_pull_policy.clone(),
                        ports: service
                            .port
                            .map(|port| vec![ContainerPort { container_port: port }])
                            .unwrap_or_default(),
                        env: env_vars(model, service, scanner),
                        resources,
                    }],
                },
            },
        }),
        data: None,
    };

    let mut documents = vec![serde_yaml::to_string(&deployment)?];
    if let Some(port) = service.port {
        let exposed = Object {
            api_version: "v1",
            kind: "Service",
            metadata: meta(model, name.clone(), labels),
            spec: Some(ServiceSpec {
                selector,
                ports: vec![ServicePort {
                    name: "http",
                    port,
                    target_port: port,
                }],
            }),
            data: None,
        };
        documents.push(serde_yaml::to_string(&exposed)?);
    }

    Ok(Artifact::new(
        format!("{}/{}.yaml", MANIFEST_DIR, service.name),
        format!("{}{}", banner(model), to_yaml_documents(documents)),
    ))
}

/// 機密定位表：每個 env_key 在執行期從哪裡取得
fn locator_artifact(model: &ResolvedModel) -> Result<Artifact> {
    let labels = [("app.kubernetes.io/part-of".to_string(), model.system.name.clone())]
        .into_iter()
        .collect();
    let config_map: Object<()> = Object {
        api_version: "v1",
        kind: "ConfigMap",
        metadata: meta(
            model,
            format!("{}-secret-locators", dns_label(&model.orchestrator.namespace_prefix)),
            labels,
        ),
        spec: None,
        data: Some(
            model
                .secrets
                .values()
                .map(|secret| (secret.env_key.clone(), secret.locator.clone()))
                .collect(),
        ),
    };
    Ok(Artifact::new(
        format!("{}/secret-locators.yaml", MANIFEST_DIR),
        format!("{}{}", banner(model), serde_yaml::to_string(&config_map)?),
    ))
}

/// 產生 Kubernetes manifests：namespace、每個服務一份、機密定位表
pub struct ManifestEmitter;

impl Emitter for ManifestEmitter {
    fn name(&self) -> &'static str {
        "manifest"
    }

    fn emit(&self, model: &ResolvedModel) -> Result<Vec<Artifact>> {
        let scanner = ReferenceScanner::new()?;
        let mut artifacts = vec![namespace_artifact(model)?];
        for service in model.services.values() {
            artifacts.push(service_artifact(model, service, &scanner)?);
        }
        if !model.secrets.is_empty() {
            artifacts.push(locator_artifact(model)?);
        }
        Ok(artifacts)
    }
}
