//! Capability tracking for optional dependency groups.
//!
//! Format processors and source handlers may depend on optional pieces:
//! cargo features pulling in parser crates, or external binaries like `git`.
//! The registry answers "is this group usable locally?" before the router
//! commits to a local attempt. Probes are side-effect-free (feature checks
//! and PATH scans only) and results are memoized for the process lifetime;
//! tests can clear the cache explicitly.

use std::collections::HashMap;
use std::sync::RwLock;

/// Availability report for one dependency group.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityEntry {
    /// True when every requirement of the group is present.
    pub available: bool,
    /// Requirements that are missing, in registration order.
    pub missing: Vec<String>,
    /// Human-readable instruction for enabling the group.
    pub install_hint: String,
}

struct GroupSpec {
    requirements: Vec<&'static str>,
    probe: fn() -> bool,
    install_hint: String,
}

/// Registry of dependency groups and their memoized availability.
#[derive(Default)]
pub struct CapabilityRegistry {
    groups: RwLock<HashMap<String, GroupSpec>>,
    cache: RwLock<HashMap<String, CapabilityEntry>>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in groups registered.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(
            "pdf",
            &["lopdf", "pdf-extract"],
            || cfg!(feature = "pdf"),
            "rebuild with the 'pdf' feature: cargo install attache --features pdf",
        );
        registry.register(
            "xlsx",
            &["calamine"],
            || cfg!(feature = "xlsx"),
            "rebuild with the 'xlsx' feature: cargo install attache --features xlsx",
        );
        registry.register("github", &["git"], git_on_path, "install git and ensure it is on PATH");
        registry
    }

    /// Register a dependency group with its availability probe.
    ///
    /// Registering an existing name replaces the prior spec and drops any
    /// cached result for it.
    pub fn register(
        &self,
        group: &str,
        requirements: &[&'static str],
        probe: fn() -> bool,
        install_hint: &str,
    ) {
        let spec = GroupSpec {
            requirements: requirements.to_vec(),
            probe,
            install_hint: install_hint.to_string(),
        };
        self.groups
            .write()
            .expect("capability groups lock poisoned")
            .insert(group.to_string(), spec);
        self.cache
            .write()
            .expect("capability cache lock poisoned")
            .remove(group);
    }

    /// Look up a group, probing and caching on first access.
    ///
    /// Unknown groups report as unavailable with an empty hint rather than
    /// erroring; [`CapabilityRegistry::known`] distinguishes the two cases.
    pub fn check(&self, group: &str) -> CapabilityEntry {
        if let Some(entry) = self
            .cache
            .read()
            .expect("capability cache lock poisoned")
            .get(group)
        {
            return entry.clone();
        }

        let entry = {
            let groups = self.groups.read().expect("capability groups lock poisoned");
            match groups.get(group) {
                Some(spec) => {
                    let available = (spec.probe)();
                    CapabilityEntry {
                        available,
                        missing: if available {
                            Vec::new()
                        } else {
                            spec.requirements.iter().map(ToString::to_string).collect()
                        },
                        install_hint: spec.install_hint.clone(),
                    }
                }
                None => CapabilityEntry {
                    available: false,
                    missing: Vec::new(),
                    install_hint: String::new(),
                },
            }
        };

        tracing::debug!(group, available = entry.available, "Capability probed");

        // Concurrent first checks may compute twice; the probe is idempotent
        // so last write wins.
        self.cache
            .write()
            .expect("capability cache lock poisoned")
            .insert(group.to_string(), entry.clone());
        entry
    }

    /// Whether the group has been registered.
    pub fn known(&self, group: &str) -> bool {
        self.groups
            .read()
            .expect("capability groups lock poisoned")
            .contains_key(group)
    }

    /// Probe every registered group. Introspection only, not on the hot path.
    pub fn check_all(&self) -> Vec<(String, CapabilityEntry)> {
        let names: Vec<String> = {
            let groups = self.groups.read().expect("capability groups lock poisoned");
            let mut names: Vec<String> = groups.keys().cloned().collect();
            names.sort();
            names
        };
        names
            .into_iter()
            .map(|name| {
                let entry = self.check(&name);
                (name, entry)
            })
            .collect()
    }

    /// Drop all memoized results. Test hook.
    pub fn clear_cache(&self) {
        self.cache
            .write()
            .expect("capability cache lock poisoned")
            .clear();
    }
}

/// Scan PATH for a `git` executable without spawning anything.
pub(crate) fn git_on_path() -> bool {
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| {
        let candidate = dir.join("git");
        candidate.is_file() || dir.join("git.exe").is_file()
    })
}
