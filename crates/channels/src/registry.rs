use {
    std::{
        collections::HashMap,
        sync::{Arc, RwLock},
    },
    tracing::{info, warn},
};

use crate::{
    error::{Error, Result},
    plugin::ChannelPlugin,
};

/// Immutable view of the registered plugin set. Cheap to clone; a reader
/// holding a snapshot is unaffected by later registrations or reloads.
pub type RegistrySnapshot = Arc<HashMap<String, Arc<dyn ChannelPlugin>>>;

/// Registry of all loaded channel plugins.
///
/// Read-mostly: lookups clone an `Arc` snapshot, writes build a fresh map
/// and swap it in whole, so concurrent readers never observe a partial
/// update.
pub struct ChannelRegistry {
    snapshot: RwLock<RegistrySnapshot>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Validate and register one plugin. A plugin that fails contract
    /// validation is rejected and the registry is left unchanged.
    pub fn register(&self, plugin: Arc<dyn ChannelPlugin>) -> Result<()> {
        validate_contract(plugin.as_ref())?;
        let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        let mut next = guard.as_ref().clone();
        info!(plugin_id = plugin.id(), "channel plugin registered");
        next.insert(plugin.id().to_string(), plugin);
        *guard = Arc::new(next);
        Ok(())
    }

    /// Replace the whole plugin set atomically.
    ///
    /// Bundles failing validation are excluded from the new snapshot and
    /// returned; valid plugins are unaffected by their siblings' rejection.
    pub fn reload(&self, plugins: Vec<Arc<dyn ChannelPlugin>>) -> Vec<Error> {
        let mut next: HashMap<String, Arc<dyn ChannelPlugin>> = HashMap::new();
        let mut rejected = Vec::new();

        for plugin in plugins {
            match validate_contract(plugin.as_ref()) {
                Ok(()) => {
                    let id = plugin.id().to_string();
                    if next.contains_key(&id) {
                        rejected.push(Error::contract_violation(&id, "duplicate plugin id"));
                        continue;
                    }
                    next.insert(id, plugin);
                },
                Err(e) => {
                    warn!(error = %e, "channel plugin rejected during reload");
                    rejected.push(e);
                },
            }
        }

        let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        info!(
            plugins = next.len(),
            rejected = rejected.len(),
            "channel registry reloaded"
        );
        *guard = Arc::new(next);
        rejected
    }

    /// Current snapshot; consistent for as long as the caller holds it.
    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        Arc::clone(&self.snapshot.read().unwrap_or_else(|e| e.into_inner()))
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn ChannelPlugin>> {
        self.snapshot().get(id).cloned()
    }

    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.snapshot().keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Check the mandatory adapter set and descriptor well-formedness.
fn validate_contract(plugin: &dyn ChannelPlugin) -> Result<()> {
    let id = plugin.id();
    if id.trim().is_empty() {
        return Err(Error::contract_violation("<unnamed>", "empty plugin id"));
    }
    if plugin.gateway().is_none() {
        return Err(Error::contract_violation(id, "missing gateway adapter"));
    }
    if plugin.messaging().is_none() {
        return Err(Error::contract_violation(id, "missing messaging adapter"));
    }
    if plugin.outbound().is_none() {
        return Err(Error::contract_violation(id, "missing outbound adapter"));
    }
    let caps = plugin.capabilities();
    if caps.max_text_length == 0 {
        return Err(Error::contract_violation(
            id,
            "capability descriptor has max_text_length = 0",
        ));
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::testutil::{MockPlugin, MockPluginSpec},
    };

    fn plugin(id: &str) -> Arc<dyn ChannelPlugin> {
        Arc::new(MockPlugin::new(MockPluginSpec::complete(id)))
    }

    #[test]
    fn register_accepts_complete_plugin() {
        let registry = ChannelRegistry::new();
        registry.register(plugin("telegram")).unwrap();
        assert_eq!(registry.list(), vec!["telegram"]);
    }

    #[test]
    fn register_rejects_missing_outbound() {
        let registry = ChannelRegistry::new();
        let spec = MockPluginSpec {
            outbound: false,
            ..MockPluginSpec::complete("broken")
        };
        let err = registry
            .register(Arc::new(MockPlugin::new(spec)))
            .unwrap_err();
        assert!(matches!(err, Error::ContractViolation { .. }));
        assert!(registry.list().is_empty());
    }

    #[test]
    fn register_rejects_zero_max_text_length() {
        let registry = ChannelRegistry::new();
        let mut spec = MockPluginSpec::complete("broken");
        spec.capabilities.max_text_length = 0;
        let err = registry
            .register(Arc::new(MockPlugin::new(spec)))
            .unwrap_err();
        assert!(err.to_string().contains("max_text_length"));
    }

    #[test]
    fn rejected_plugin_leaves_others_untouched() {
        let registry = ChannelRegistry::new();
        registry.register(plugin("slack")).unwrap();
        let spec = MockPluginSpec {
            messaging: false,
            ..MockPluginSpec::complete("broken")
        };
        assert!(registry.register(Arc::new(MockPlugin::new(spec))).is_err());
        assert_eq!(registry.list(), vec!["slack"]);
    }

    #[test]
    fn snapshot_is_isolated_from_later_reload() {
        let registry = ChannelRegistry::new();
        registry.register(plugin("telegram")).unwrap();
        let before = registry.snapshot();

        let rejected = registry.reload(vec![plugin("discord"), plugin("slack")]);
        assert!(rejected.is_empty());

        // The held snapshot still sees the old set.
        assert!(before.contains_key("telegram"));
        assert!(!before.contains_key("discord"));
        assert_eq!(registry.list(), vec!["discord", "slack"]);
    }

    #[test]
    fn reload_reports_duplicates_and_keeps_first() {
        let registry = ChannelRegistry::new();
        let rejected = registry.reload(vec![plugin("telegram"), plugin("telegram")]);
        assert_eq!(rejected.len(), 1);
        assert_eq!(registry.list(), vec!["telegram"]);
    }
}
