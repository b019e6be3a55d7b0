use crate::core::interpolate::ReferenceScanner;
use crate::domain::model::{
    MasterDefinition, ResourceSpec, SecretSourceKind, ServiceDefinition,
};
use crate::domain::ports::SecretLocator;
use crate::domain::quantity::{CpuQuantity, MemoryQuantity};
use crate::domain::resolved::{
    EnvValue, EnvironmentProfile, OrchestratorSettings, ResolvedModel, ResolvedResources,
    ResolvedSecret, ResolvedService, ResourceQuantities, RuntimeSettings, SecretSource,
    SystemInfo,
};
use crate::utils::error::{CompileError, Result, SourceLocation};
use crate::utils::validation::validate_range;
use std::collections::BTreeMap;

const RESOLVED_DOCUMENT: &str = "<resolved definition>";
const DEFAULT_ENV_FILE: &str = ".env.secrets";

/// 內建環境設定，可被主定義的 `environments` 逐鍵覆寫
pub fn builtin_profiles() -> BTreeMap<String, EnvironmentProfile> {
    [
        ("development", true, "DEBUG", 0.25, SecretSourceKind::EnvFile),
        ("staging", false, "INFO", 0.5, SecretSourceKind::Vault),
        ("production", false, "INFO", 1.0, SecretSourceKind::Vault),
    ]
    .into_iter()
    .map(|(name, debug, log_level, multiplier, source)| {
        (
            name.to_string(),
            EnvironmentProfile {
                name: name.to_string(),
                debug,
                log_level: log_level.to_string(),
                resource_multiplier: multiplier,
                secret_source: source,
            },
        )
    })
    .collect()
}

fn located(path: impl Into<String>, message: impl Into<String>) -> CompileError {
    CompileError::parse(
        SourceLocation::document(RESOLVED_DOCUMENT).with_path(path),
        message,
    )
}

/// 合併內建與宣告的環境設定
pub fn environment_profiles(
    definition: &MasterDefinition,
) -> Result<BTreeMap<String, EnvironmentProfile>> {
    let mut profiles = builtin_profiles();

    for (name, declared) in &definition.environments {
        let path = format!("environments.{}.resource_multiplier", name);
        let profile = match profiles.remove(name) {
            Some(mut profile) => {
                if let Some(debug) = declared.debug {
                    profile.debug = debug;
                }
                if let Some(level) = &declared.log_level {
                    profile.log_level = level.clone();
                }
                if let Some(multiplier) = declared.resource_multiplier {
                    profile.resource_multiplier = multiplier;
                }
                if let Some(source) = declared.secret_source {
                    profile.secret_source = source;
                }
                profile
            }
            None => EnvironmentProfile {
                name: name.clone(),
                debug: declared.debug.unwrap_or(false),
                log_level: declared.log_level.clone().unwrap_or_else(|| "INFO".to_string()),
                resource_multiplier: declared.resource_multiplier.ok_or_else(|| {
                    located(
                        path.clone(),
                        format!("custom environment '{}' must declare a resource_multiplier", name),
                    )
                })?,
                secret_source: declared.secret_source.unwrap_or(SecretSourceKind::Vault),
            },
        };

        validate_range(&path, profile.resource_multiplier, 0.01, 16.0)?;
        profiles.insert(name.clone(), profile);
    }

    Ok(profiles)
}

fn parse_cpu(text: &str, path: &str) -> Result<CpuQuantity> {
    CpuQuantity::parse(text).map_err(|message| located(path, message))
}

fn parse_memory(text: &str, path: &str) -> Result<MemoryQuantity> {
    MemoryQuantity::parse(text).map_err(|message| located(path, message))
}

/// 選取環境分支並套用倍率；環境覆寫值照原樣使用
fn resolve_resources(
    spec: &ResourceSpec,
    profile: &EnvironmentProfile,
    path: &str,
) -> Result<ResolvedResources> {
    let multiplier = profile.resource_multiplier;
    let branch = spec.overrides.get(&profile.name);
    let branch_path = format!("{}.overrides.{}", path, profile.name);

    let cpu = match branch.and_then(|b| b.cpu.as_deref()) {
        Some(text) => Some(parse_cpu(text, &format!("{}.cpu", branch_path))?),
        None => spec
            .cpu
            .as_deref()
            .map(|text| parse_cpu(text, &format!("{}.cpu", path)))
            .transpose()?
            .map(|cpu| cpu.scale(multiplier)),
    };
    let memory = match branch.and_then(|b| b.memory.as_deref()) {
        Some(text) => Some(parse_memory(text, &format!("{}.memory", branch_path))?),
        None => spec
            .memory
            .as_deref()
            .map(|text| parse_memory(text, &format!("{}.memory", path)))
            .transpose()?
            .map(|memory| memory.scale(multiplier)),
    };

    let requests = spec.requests.clone().unwrap_or_default();
    let request_cpu = requests
        .cpu
        .as_deref()
        .map(|text| parse_cpu(text, &format!("{}.requests.cpu", path)))
        .transpose()?
        .map(|cpu| cpu.scale(multiplier));
    let request_memory = requests
        .memory
        .as_deref()
        .map(|text| parse_memory(text, &format!("{}.requests.memory", path)))
        .transpose()?
        .map(|memory| memory.scale(multiplier));

    // requests 不可超過 limits
    let request_cpu = match (request_cpu, cpu) {
        (Some(request), Some(limit)) if request.millis() > limit.millis() => Some(limit),
        (None, limit) => limit,
        (request, _) => request,
    };
    let request_memory = match (request_memory, memory) {
        (Some(request), Some(limit)) if request.bytes() > limit.bytes() => Some(limit),
        (None, limit) => limit,
        (request, _) => request,
    };

    let replicas = branch
        .and_then(|b| b.replicas)
        .or(spec.replicas)
        .unwrap_or(1);

    Ok(ResolvedResources {
        limits: ResourceQuantities { cpu, memory },
        requests: ResourceQuantities {
            cpu: request_cpu,
            memory: request_memory,
        },
        replicas,
    })
}

fn secret_source(definition: &MasterDefinition, profile: &EnvironmentProfile) -> SecretSource {
    let backend = &definition.secrets_backend;
    match profile.secret_source {
        SecretSourceKind::Vault => SecretSource::VaultBacked {
            mount: backend
                .vault
                .as_ref()
                .map(|v| v.mount.trim_end_matches('/').to_string())
                .unwrap_or_else(|| format!("secret/data/{}", definition.system.name)),
        },
        SecretSourceKind::EnvFile => SecretSource::EnvFileBacked {
            path: backend
                .env_file
                .as_ref()
                .map(|f| f.path.clone())
                .unwrap_or_else(|| DEFAULT_ENV_FILE.to_string()),
        },
    }
}

/// 環境解析器的輸入設定（與環境無關的部分預先整理）
struct Context<'a> {
    definition: &'a MasterDefinition,
    profile: &'a EnvironmentProfile,
    runtime: &'a RuntimeSettings,
    secrets: &'a BTreeMap<String, ResolvedSecret>,
    scanner: ReferenceScanner,
}

impl Context<'_> {
    fn env_value(&self, key: &str, value: &str) -> EnvValue {
        let secret = self.secrets.contains_key(key) || !self.scanner.references(value).is_empty();
        EnvValue {
            value: value.to_string(),
            secret,
        }
    }

    fn resolve_service(
        &self,
        name: &str,
        role: &str,
        service: &ServiceDefinition,
    ) -> Result<ResolvedService> {
        let definition = self.definition;
        let profile = self.profile;
        let path = format!("services.{}.{}", role, name);

        let mut environment: BTreeMap<String, EnvValue> = BTreeMap::new();
        for (key, value) in definition
            .environment_variables
            .iter()
            .chain(service.environment.iter())
        {
            environment.insert(key.clone(), self.env_value(key, value));
        }

        // 明確列出此服務的機密，加上環境值中引用到的機密
        let mut attached: Vec<String> = self
            .definition
            .secrets
            .iter()
            .filter(|s| s.services.iter().any(|svc| svc == name))
            .map(|s| s.env_key.clone())
            .collect();
        for (key, value) in &environment {
            if self.secrets.contains_key(key) {
                attached.push(key.clone());
            }
            for reference in self.scanner.references(&value.value) {
                if self.secrets.contains_key(reference) {
                    attached.push(reference.to_string());
                }
            }
        }
        attached.sort();
        attached.dedup();
        for key in &attached {
            environment
                .entry(key.clone())
                .or_insert_with(|| EnvValue::secret(format!("${{{}}}", key)));
        }

        let mut injected = vec![
            ("SERVICE_NAME", name.to_string()),
            ("ENVIRONMENT", profile.name.clone()),
            ("DEBUG", profile.debug.to_string()),
            ("LOG_LEVEL", profile.log_level.clone()),
        ];
        if let Some(port) = service.port {
            injected.push(("SERVICE_PORT", port.to_string()));
        }
        let cache_url = match (&definition.docker.cache, service.cache_db) {
            (Some(cache), Some(db)) => Some((
                cache.url_env.clone().unwrap_or_else(|| "REDIS_URL".to_string()),
                format!(
                    "{}://{}:{}/{}",
                    cache.scheme.as_deref().unwrap_or("redis"),
                    cache.host,
                    cache.port.unwrap_or(6379),
                    db
                ),
            )),
            _ => None,
        };
        for (key, value) in injected
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .chain(cache_url)
        {
            if !environment.contains_key(&key) {
                let env_value = self.env_value(&key, &value);
                environment.insert(key, env_value);
            }
        }

        let image = match &service.image {
            Some(image) => image.clone(),
            None => {
                let repository = format!("{}-{}", definition.system.name, name);
                match &self.runtime.registry {
                    Some(registry) => format!(
                        "{}/{}:{}",
                        registry.trim_end_matches('/'),
                        repository,
                        self.runtime.image_tag
                    ),
                    None => format!("{}:{}", repository, self.runtime.image_tag),
                }
            }
        };

        Ok(ResolvedService {
            name: name.to_string(),
            container_name: service
                .container_name
                .clone()
                .unwrap_or_else(|| format!("{}_{}", definition.system.name, name)),
            role: role.to_string(),
            runtime: service.runtime.clone().unwrap_or_else(|| "generic".to_string()),
            image,
            port: service.port,
            dependencies: service.dependencies.clone(),
            environment,
            resources: resolve_resources(&service.resources, profile, &format!("{}.resources", path))?,
            cache_db: service.cache_db,
            features: service.features.clone(),
            modules: service.modules.clone(),
            secrets: attached,
        })
    }
}

/// 環境解析器：產生已套用環境、尚未驗證的模型
pub fn resolve(definition: &MasterDefinition, environment: &str) -> Result<ResolvedModel> {
    let profiles = environment_profiles(definition)?;
    let profile = profiles
        .get(environment)
        .cloned()
        .ok_or_else(|| CompileError::UnknownEnvironment {
            name: environment.to_string(),
            known: profiles.keys().cloned().collect(),
        })?;

    let services_by_name = definition.services_by_name();
    let source = secret_source(definition, &profile);

    let mut secrets = BTreeMap::new();
    for (index, declaration) in definition.secrets.iter().enumerate() {
        for target in &declaration.services {
            if !services_by_name.contains_key(target.as_str()) {
                return Err(located(
                    format!("secrets[{}].services", index),
                    format!(
                        "secret '{}' is assigned to unknown service '{}'",
                        declaration.name, target
                    ),
                ));
            }
        }
        let env_file = match &source {
            SecretSource::EnvFileBacked { path } => {
                Some(declaration.env_file.clone().unwrap_or_else(|| path.clone()))
            }
            SecretSource::VaultBacked { .. } => None,
        };
        let resolved = ResolvedSecret {
            name: declaration.name.clone(),
            env_key: declaration.env_key.clone(),
            locator: source.locator_for(declaration, &profile.name),
            env_file,
        };
        if secrets.insert(declaration.env_key.clone(), resolved).is_some() {
            return Err(located(
                format!("secrets[{}].env_key", index),
                format!("env_key '{}' is declared by more than one secret", declaration.env_key),
            ));
        }
    }

    let system_name = definition.system.name.clone();
    let docker = &definition.docker;
    let runtime = RuntimeSettings {
        registry: docker.registry.clone(),
        network: docker
            .network
            .clone()
            .unwrap_or_else(|| format!("{}-network", system_name)),
        restart_policy: docker
            .restart_policy
            .clone()
            .unwrap_or_else(|| "unless-stopped".to_string()),
        image_tag: docker.image_tag.clone().unwrap_or_else(|| "latest".to_string()),
    };
    let kubernetes = &definition.kubernetes;
    let orchestrator = OrchestratorSettings {
        namespace_prefix: kubernetes
            .namespace_prefix
            .clone()
            .unwrap_or_else(|| system_name.clone()),
        image_pull_policy: kubernetes
            .image_pull_policy
            .clone()
            .unwrap_or_else(|| "IfNotPresent".to_string()),
        secret_name: kubernetes
            .secret_name
            .clone()
            .unwrap_or_else(|| format!("{}-secrets", system_name)),
    };

    let context = Context {
        definition,
        profile: &profile,
        runtime: &runtime,
        secrets: &secrets,
        scanner: ReferenceScanner::new()?,
    };
    let mut services = BTreeMap::new();
    for (name, (role, service)) in &services_by_name {
        services.insert(
            name.to_string(),
            context.resolve_service(name, role, service)?,
        );
    }

    tracing::debug!(
        "🌍 Resolved {} service(s) for {} (multiplier {})",
        services.len(),
        profile.name,
        profile.resource_multiplier
    );

    Ok(ResolvedModel {
        system: SystemInfo {
            name: system_name,
            version: definition
                .system
                .version
                .clone()
                .unwrap_or_else(|| "0.0.0".to_string()),
            domain: definition.system.domain.clone(),
            description: definition.system.description.clone(),
        },
        environment: profile,
        runtime,
        orchestrator,
        secret_source: source,
        services,
        secrets,
        provenance: None,
    })
}
