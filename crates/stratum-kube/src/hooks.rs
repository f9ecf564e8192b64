//! Per-component hooks
//!
//! Most components only need the defaults: enablement straight from the
//! configuration, no extra work around install/upgrade/uninstall, and readiness
//! from the workload probe. Components with special needs register their own
//! [`ComponentHooks`] in the [`HookTable`] under their name.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use stratum_core::{Component, EffectiveConfig, Values};

use crate::error::Result;
use crate::readiness::{Readiness, ReadinessProber};

/// What a hook gets to see
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub component: &'a Component,
    pub config: &'a EffectiveConfig,
    /// Resolved install namespace
    pub namespace: &'a str,
    /// Merged values, when the step computed them
    pub values: Option<&'a Values>,
}

#[async_trait]
pub trait ComponentHooks: Send + Sync {
    fn is_enabled(&self, component: &Component, config: &EffectiveConfig) -> bool {
        config.is_enabled(component)
    }

    async fn pre_install(&self, _ctx: &HookContext<'_>) -> Result<()> {
        Ok(())
    }

    async fn post_install(&self, _ctx: &HookContext<'_>) -> Result<()> {
        Ok(())
    }

    async fn pre_upgrade(&self, _ctx: &HookContext<'_>) -> Result<()> {
        Ok(())
    }

    async fn pre_uninstall(&self, _ctx: &HookContext<'_>) -> Result<()> {
        Ok(())
    }

    async fn is_ready(&self, ctx: &HookContext<'_>, prober: &ReadinessProber) -> Result<Readiness> {
        prober.probe(ctx.component, ctx.namespace).await
    }
}

/// Hooks used by every component without an entry
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

#[async_trait]
impl ComponentHooks for DefaultHooks {}

static DEFAULT_HOOKS: DefaultHooks = DefaultHooks;

/// Hook overrides keyed by component name
#[derive(Clone, Default)]
pub struct HookTable {
    entries: HashMap<String, Arc<dyn ComponentHooks>>,
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, component: impl Into<String>, hooks: Arc<dyn ComponentHooks>) -> Self {
        self.register(component, hooks);
        self
    }

    pub fn register(&mut self, component: impl Into<String>, hooks: Arc<dyn ComponentHooks>) {
        self.entries.insert(component.into(), hooks);
    }

    /// Hooks for a component, falling back to the defaults
    pub fn get(&self, component: &str) -> &dyn ComponentHooks {
        self.entries
            .get(component)
            .map(|hooks| hooks.as_ref())
            .unwrap_or(&DEFAULT_HOOKS)
    }

    pub fn has_override(&self, component: &str) -> bool {
        self.entries.contains_key(component)
    }
}

impl std::fmt::Debug for HookTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("HookTable").field("overrides", &names).finish()
    }
}
