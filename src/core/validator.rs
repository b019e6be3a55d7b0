use crate::core::interpolate::ReferenceScanner;
use crate::domain::finding::{Finding, FindingKind};
use crate::domain::model::Registry;
use crate::domain::resolved::{ResolvedModel, ResolvedService};
use crate::utils::error::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

/// 將共用同一個值的服務分組，每組產生一筆衝突
fn conflicts<K: Ord + Display>(
    kind: FindingKind,
    label: &str,
    assignments: impl Iterator<Item = (K, String)>,
) -> Vec<Finding> {
    let mut groups: BTreeMap<K, Vec<String>> = BTreeMap::new();
    for (key, service) in assignments {
        groups.entry(key).or_default().push(service);
    }

    groups
        .into_iter()
        .filter(|(_, services)| services.len() > 1)
        .map(|(key, mut services)| {
            services.sort();
            let first = services.remove(0);
            Finding::new(kind, first)
                .with_peers(services)
                .with_detail(format!("{} {} is assigned more than once", label, key))
        })
        .collect()
}

struct Tarjan<'a> {
    graph: &'a BTreeMap<String, ResolvedService>,
    next_index: usize,
    indices: BTreeMap<&'a str, usize>,
    lowlinks: BTreeMap<&'a str, usize>,
    stack: Vec<&'a str>,
    on_stack: BTreeSet<&'a str>,
    components: Vec<Vec<String>>,
}

impl<'a> Tarjan<'a> {
    fn new(graph: &'a BTreeMap<String, ResolvedService>) -> Self {
        Self {
            graph,
            next_index: 0,
            indices: BTreeMap::new(),
            lowlinks: BTreeMap::new(),
            stack: Vec::new(),
            on_stack: BTreeSet::new(),
            components: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<Vec<String>> {
        for name in self.graph.keys() {
            if !self.indices.contains_key(name.as_str()) {
                self.visit(name);
            }
        }
        self.components
    }

    fn visit(&mut self, node: &'a str) {
        self.indices.insert(node, self.next_index);
        self.lowlinks.insert(node, self.next_index);
        self.next_index += 1;
        self.stack.push(node);
        self.on_stack.insert(node);

        let graph = self.graph;
        let edges = graph
            .get(node)
            .map(|service| service.dependencies.as_slice())
            .unwrap_or_default();
        for dependency in edges {
            // 未知依賴另行回報
            let Some((target, _)) = graph.get_key_value(dependency.as_str()) else {
                continue;
            };
            let target = target.as_str();
            if !self.indices.contains_key(target) {
                self.visit(target);
                let low = self.lowlinks[node].min(self.lowlinks[target]);
                self.lowlinks.insert(node, low);
            } else if self.on_stack.contains(target) {
                let low = self.lowlinks[node].min(self.indices[target]);
                self.lowlinks.insert(node, low);
            }
        }

        if self.lowlinks[node] == self.indices[node] {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack.remove(member);
                component.push(member.to_string());
                if member == node {
                    break;
                }
            }
            let self_loop = graph
                .get(node)
                .map(|s| s.dependencies.iter().any(|d| d == node))
                .unwrap_or(false);
            if component.len() > 1 || self_loop {
                component.sort();
                self.components.push(component);
            }
        }
    }
}

/// 依賴循環（每個強連通分量一筆）
fn dependency_cycles(services: &BTreeMap<String, ResolvedService>) -> Vec<Finding> {
    Tarjan::new(services)
        .run()
        .into_iter()
        .map(|mut members| {
            let detail = format!("dependency cycle among {}", members.join(", "));
            let first = members.remove(0);
            Finding::new(FindingKind::DependencyCycle, first)
                .with_peers(members)
                .with_detail(detail)
        })
        .collect()
}

fn describe<T: Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "none".to_string())
}

/// 註冊表驗證器：檢查所有不變量並回傳完整的違規清單（不會在第一筆就停止）
pub fn validate(model: &ResolvedModel, registry: &Registry) -> Result<Vec<Finding>> {
    let services = &model.services;
    let mut findings = Vec::new();

    findings.extend(conflicts(
        FindingKind::PortConflict,
        "port",
        services
            .values()
            .filter_map(|s| s.port.map(|port| (port, s.name.clone()))),
    ));
    findings.extend(conflicts(
        FindingKind::CacheNamespaceConflict,
        "cache namespace",
        services
            .values()
            .filter_map(|s| s.cache_db.map(|db| (db, s.name.clone()))),
    ));

    for service in services.values() {
        for dependency in &service.dependencies {
            if !services.contains_key(dependency) {
                findings.push(
                    Finding::new(FindingKind::UnknownDependency, &service.name)
                        .with_peers(vec![dependency.clone()])
                        .with_detail(format!(
                            "depends on '{}' which is not a declared service",
                            dependency
                        )),
                );
            }
        }
    }
    findings.extend(dependency_cycles(services));

    for service in services.values() {
        let Some(entry) = registry.services.get(&service.name) else {
            findings.push(
                Finding::new(FindingKind::MissingRegistryEntry, &service.name)
                    .with_detail("service has no entry in the registry"),
            );
            continue;
        };
        if entry.port != service.port {
            findings.push(
                Finding::new(FindingKind::PortMismatch, &service.name).with_detail(format!(
                    "registry expects port {}, definition declares {}",
                    describe(entry.port),
                    describe(service.port)
                )),
            );
        }
        if entry.cache_db != service.cache_db {
            findings.push(
                Finding::new(FindingKind::CacheNamespaceMismatch, &service.name).with_detail(
                    format!(
                        "registry expects cache namespace {}, definition declares {}",
                        describe(entry.cache_db),
                        describe(service.cache_db)
                    ),
                ),
            );
        }
    }
    for name in registry.services.keys() {
        if !services.contains_key(name) {
            findings.push(
                Finding::new(FindingKind::MissingServiceDefinition, name)
                    .with_detail("registry entry has no service definition"),
            );
        }
    }

    let scanner = ReferenceScanner::new()?;
    for service in services.values() {
        for (key, value) in &service.environment {
            if model.is_secret_key(key)
                && !value.value.is_empty()
                && !scanner.is_pure_reference(&value.value)
            {
                findings.push(
                    Finding::new(FindingKind::LiteralSecret, &service.name)
                        .with_detail(format!("{} must be a variable reference, not a literal", key)),
                );
            }
        }
    }

    findings.sort();
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loader::{load_definition, load_registry, SourceDocument};
    use crate::core::resolver::resolve;

    fn run(master: &str, registry: &str) -> Vec<Finding> {
        let definition = load_definition(
            &SourceDocument::new("master.yaml", master),
            &[],
            &BTreeMap::new(),
        )
        .unwrap();
        let model = resolve(&definition, "production").unwrap();
        let registry = load_registry(&SourceDocument::new("registry.yaml", registry)).unwrap();
        validate(&model, &registry).unwrap()
    }

    #[test]
    fn test_clean_model_has_no_findings() {
        let findings = run(
            "system: {name: fleet}\nservices:\n  core:\n    api: {port: 8001, cache_db: 1, dependencies: [db]}\n    db: {port: 5432}\n",
            "services:\n  api: {port: 8001, cache_db: 1}\n  db: {port: 5432}\n",
        );
        assert!(findings.is_empty(), "{:?}", findings);
    }

    #[test]
    fn test_port_conflict_names_every_service_once() {
        let findings = run(
            "system: {name: fleet}\nservices:\n  core:\n    svc_a: {port: 8001}\n    svc_b: {port: 8001}\n    svc_c: {port: 8001}\n",
            "services:\n  svc_a: {port: 8001}\n  svc_b: {port: 8001}\n  svc_c: {port: 8001}\n",
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::PortConflict);
        assert_eq!(findings[0].services(), vec!["svc_a", "svc_b", "svc_c"]);
    }

    #[test]
    fn test_cache_namespace_conflict() {
        let findings = run(
            "system: {name: fleet}\nservices:\n  core:\n    a: {cache_db: 2}\n    b: {cache_db: 2}\n",
            "services:\n  a: {cache_db: 2}\n  b: {cache_db: 2}\n",
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::CacheNamespaceConflict);
        assert_eq!(findings[0].services(), vec!["a", "b"]);
    }

    #[test]
    fn test_unknown_dependency_and_cycle() {
        let findings = run(
            "system: {name: fleet}\nservices:\n  core:\n    a: {dependencies: [b, ghost]}\n    b: {dependencies: [a]}\n    c: {dependencies: [c]}\n",
            "services:\n  a: {}\n  b: {}\n  c: {}\n",
        );
        let kinds: Vec<FindingKind> = findings.iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![
                FindingKind::UnknownDependency,
                FindingKind::DependencyCycle,
                FindingKind::DependencyCycle
            ]
        );
        assert_eq!(findings[0].services(), vec!["a", "ghost"]);
        assert_eq!(findings[1].services(), vec!["a", "b"]);
        assert_eq!(findings[2].services(), vec!["c"]);
    }

    #[test]
    fn test_registry_drift_both_directions() {
        let findings = run(
            "system: {name: fleet}\nservices:\n  core:\n    api: {port: 8001, cache_db: 3}\n    svc_c: {port: 8100}\n",
            "services:\n  api: {port: 8002, cache_db: 1}\n  legacy: {port: 7000}\n",
        );
        let summary: Vec<(FindingKind, &str)> =
            findings.iter().map(|f| (f.kind, f.service.as_str())).collect();
        assert_eq!(
            summary,
            vec![
                (FindingKind::MissingRegistryEntry, "svc_c"),
                (FindingKind::MissingServiceDefinition, "legacy"),
                (FindingKind::PortMismatch, "api"),
                (FindingKind::CacheNamespaceMismatch, "api"),
            ]
        );
    }

    #[test]
    fn test_literal_secret_is_reported() {
        let findings = run(
            "system: {name: fleet}\nservices:\n  core:\n    api:\n      environment:\n        API_TOKEN: hard-coded\nsecrets:\n  - {name: token, env_key: API_TOKEN}\n",
            "services:\n  api: {}\n",
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::LiteralSecret);
        assert!(findings[0].detail.contains("API_TOKEN"));
    }
}
