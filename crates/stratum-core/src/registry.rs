//! Component registry
//!
//! The registry is the catalog of every component the orchestrator knows
//! about. Declaration order is kept and used as the tie-breaker when the
//! dependency resolver has several components ready at once.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::component::Component;
use crate::error::{CoreError, Result};

/// Catalog file layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub components: Vec<Component>,
}

/// Ordered, read-only set of components
#[derive(Debug, Clone, Default)]
pub struct ComponentRegistry {
    components: IndexMap<String, Component>,
}

impl ComponentRegistry {
    /// Build a registry, rejecting duplicate or malformed entries
    pub fn new(components: Vec<Component>) -> Result<Self> {
        let mut map = IndexMap::with_capacity(components.len());
        for component in components {
            component.validate()?;
            if map.contains_key(&component.name) {
                return Err(CoreError::DuplicateComponent {
                    name: component.name,
                });
            }
            map.insert(component.name.clone(), component);
        }
        Ok(Self { components: map })
    }

    /// Parse a catalog document (`components: [...]`)
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let catalog: Catalog = serde_yaml::from_str(yaml)?;
        Self::new(catalog.components)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// All components in declaration order
    pub fn list(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    /// Look up a component by name
    pub fn lookup(&self, name: &str) -> Result<&Component> {
        self.components
            .get(name)
            .ok_or_else(|| CoreError::ComponentNotFound {
                name: name.to_string(),
            })
    }

    pub fn get(&self, name: &str) -> Option<&Component> {
        self.components.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    /// Declaration index of a component
    pub fn position(&self, name: &str) -> Option<usize> {
        self.components.get_index_of(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.components.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_keeps_declaration_order() {
        let registry = ComponentRegistry::new(vec![
            Component::new("zeta", "ns", "charts/zeta"),
            Component::new("alpha", "ns", "charts/alpha"),
            Component::new("mid", "ns", "charts/mid"),
        ])
        .unwrap();

        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(registry.position("alpha"), Some(1));
    }

    #[test]
    fn test_lookup() {
        let registry =
            ComponentRegistry::new(vec![Component::new("ingress", "ingress", "charts/ingress")])
                .unwrap();

        assert_eq!(registry.lookup("ingress").unwrap().namespace, "ingress");
        assert!(matches!(
            registry.lookup("missing"),
            Err(CoreError::ComponentNotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_rejected() {
        let result = ComponentRegistry::new(vec![
            Component::new("dup", "a", "charts/dup"),
            Component::new("dup", "b", "charts/dup"),
        ]);

        assert!(matches!(result, Err(CoreError::DuplicateComponent { .. })));
    }

    #[test]
    fn test_from_yaml() {
        let registry = ComponentRegistry::from_yaml(
            r#"
components:
  - name: cert-manager
    namespace: cert-manager
    chart: charts/cert-manager
  - name: ingress
    namespace: ingress-nginx
    chart: charts/ingress-nginx
    dependencies: [cert-manager]
    values:
      controller:
        replicaCount: 2
"#,
        )
        .unwrap();

        assert_eq!(registry.len(), 2);
        let ingress = registry.lookup("ingress").unwrap();
        assert_eq!(ingress.dependencies, vec!["cert-manager"]);
        assert_eq!(ingress.values.get("controller.replicaCount").unwrap(), 2);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.yaml");
        std::fs::write(
            &path,
            "components:\n  - name: crds\n    namespace: system\n    chart: charts/crds\n",
        )
        .unwrap();

        let registry = ComponentRegistry::from_file(&path).unwrap();
        assert!(registry.contains("crds"));

        let missing = ComponentRegistry::from_file(dir.path().join("nope.yaml"));
        assert!(matches!(missing, Err(CoreError::Io(_))));
    }
}
