//! Agent definitions and registry
//!
//! The registry resolves agent names to validated definitions. Built-in
//! agents are compiled in; project agents are discovered by scanning a
//! single well-known subdirectory of the project root and override
//! built-in agents of the same name. The registry is read-only while a
//! run is active, so concurrent runs may share one behind `Arc`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Subdirectory of a project root that may contain agent definitions
///
/// `load_project` reads nothing outside this directory.
pub const PROJECT_AGENTS_DIR: &str = ".codeflow/agents";

/// Where an agent definition came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentScope {
    /// Compiled into the binary
    #[default]
    BuiltIn,
    /// Discovered under the project's agent directory
    Project,
}

/// A named, resolvable unit of executable capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Unique identifier within its scope
    pub name: String,

    /// Declared capability, for listings and logging
    #[serde(default)]
    pub description: String,

    /// Free-form input contract (implementation-defined schema)
    #[serde(default)]
    pub input_contract: Option<String>,

    /// Free-form output contract (implementation-defined schema)
    #[serde(default)]
    pub output_contract: Option<String>,

    /// Per-invocation timeout in seconds; overrides the engine default
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Scope is assigned by the loader, never read from the file
    #[serde(skip)]
    pub scope: AgentScope,
}

impl AgentDefinition {
    /// Create a built-in agent definition
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_contract: None,
            output_contract: None,
            timeout_secs: None,
            scope: AgentScope::BuiltIn,
        }
    }

    /// Set the input contract
    pub fn with_input_contract(mut self, contract: impl Into<String>) -> Self {
        self.input_contract = Some(contract.into());
        self
    }

    /// Set the output contract
    pub fn with_output_contract(mut self, contract: impl Into<String>) -> Self {
        self.output_contract = Some(contract.into());
        self
    }

    /// Set the per-invocation timeout
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Tag the definition with a scope
    pub fn with_scope(mut self, scope: AgentScope) -> Self {
        self.scope = scope;
        self
    }
}

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate agent '{name}' in {scope:?} scope")]
    DuplicateAgent { name: String, scope: AgentScope },

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// Source of validated agent definitions
///
/// Implementations own the boundary of what they read. The directory
/// loader takes its allowed root as an explicit parameter and never
/// follows paths outside it.
pub trait AgentLoader {
    /// Load definitions, skipping (and logging) malformed entries
    fn load(&self) -> Result<Vec<AgentDefinition>, RegistryError>;
}

/// Loads `*.toml` agent definitions from a single directory
///
/// The scan is non-recursive and resolves symlinks: an entry whose real
/// path escapes the root is skipped. A missing root yields an empty load.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    root: PathBuf,
    scope: AgentScope,
}

impl DirectoryLoader {
    /// Create a loader bounded to `root`
    pub fn new(root: impl Into<PathBuf>, scope: AgentScope) -> Self {
        Self {
            root: root.into(),
            scope,
        }
    }

    /// The allowed root path
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl AgentLoader for DirectoryLoader {
    fn load(&self) -> Result<Vec<AgentDefinition>, RegistryError> {
        let mut definitions = Vec::new();

        if !self.root.exists() {
            return Ok(definitions);
        }

        let canonical_root = self
            .root
            .canonicalize()
            .map_err(|e| RegistryError::IoError(e.to_string()))?;

        let entries =
            std::fs::read_dir(&self.root).map_err(|e| RegistryError::IoError(e.to_string()))?;

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "toml") {
                continue;
            }

            // Symlinks pointing outside the allowed root are not followed
            let canonical = match path.canonicalize() {
                Ok(p) if p.starts_with(&canonical_root) => p,
                Ok(p) => {
                    tracing::warn!(
                        "Skipping {}: resolves outside agent directory ({})",
                        path.display(),
                        p.display()
                    );
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            if !canonical.is_file() {
                continue;
            }

            let content = match std::fs::read_to_string(&canonical) {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!("Failed to read agent definition {}: {}", path.display(), e);
                    continue;
                }
            };

            match toml::from_str::<AgentDefinition>(&content) {
                Ok(definition) => definitions.push(definition.with_scope(self.scope)),
                Err(e) => {
                    tracing::warn!("Malformed agent definition {}: {}", path.display(), e);
                }
            }
        }

        Ok(definitions)
    }
}

/// Registry of available agents
///
/// Lifecycle: `load_builtin`, then optionally `load_project`, then
/// read-only for the duration of any run.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    builtin: HashMap<String, AgentDefinition>,
    project: HashMap<String, AgentDefinition>,
}

impl AgentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with the built-in agents
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.load_builtin();
        registry
    }

    /// Register an agent under its (name, scope) key
    ///
    /// Fails with `DuplicateAgent` when the same name already exists in
    /// the same scope; the first registration is retained.
    pub fn register(&mut self, definition: AgentDefinition) -> Result<(), RegistryError> {
        let scoped = match definition.scope {
            AgentScope::BuiltIn => &mut self.builtin,
            AgentScope::Project => &mut self.project,
        };

        if scoped.contains_key(&definition.name) {
            return Err(RegistryError::DuplicateAgent {
                name: definition.name,
                scope: definition.scope,
            });
        }

        scoped.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// Resolve an agent by name
    ///
    /// Project-scoped agents override built-in agents of the same name.
    pub fn resolve(&self, name: &str) -> Result<&AgentDefinition, RegistryError> {
        self.project
            .get(name)
            .or_else(|| self.builtin.get(name))
            .ok_or_else(|| RegistryError::AgentNotFound(name.to_string()))
    }

    /// Check whether an agent resolves under either scope
    pub fn contains(&self, name: &str) -> bool {
        self.project.contains_key(name) || self.builtin.contains_key(name)
    }

    /// Populate the registry from the compiled-in agent set
    ///
    /// No filesystem or network access. Collisions with already-registered
    /// built-ins are logged and skipped.
    pub fn load_builtin(&mut self) {
        for definition in builtin_agents() {
            if let Err(e) = self.register(definition) {
                tracing::warn!("Skipping built-in agent: {}", e);
            }
        }
    }

    /// Discover project-scoped agents under `<project_path>/.codeflow/agents`
    ///
    /// Reads nothing outside that directory. Malformed definitions are
    /// skipped with a warning; duplicates keep the first registration.
    pub fn load_project(&mut self, project_path: &Path) -> Result<usize, RegistryError> {
        let loader = DirectoryLoader::new(
            project_path.join(PROJECT_AGENTS_DIR),
            AgentScope::Project,
        );
        self.load_from(&loader)
    }

    /// Populate from any loader implementation
    ///
    /// Returns the number of agents registered.
    pub fn load_from(&mut self, loader: &dyn AgentLoader) -> Result<usize, RegistryError> {
        let mut registered = 0;

        for definition in loader.load()? {
            let name = definition.name.clone();
            match self.register(definition) {
                Ok(()) => {
                    tracing::debug!("Registered agent '{}'", name);
                    registered += 1;
                }
                Err(e) => tracing::warn!("Skipping agent: {}", e),
            }
        }

        Ok(registered)
    }

    /// Iterate over all agents, project scope first
    pub fn iter(&self) -> impl Iterator<Item = &AgentDefinition> {
        self.project.values().chain(self.builtin.values())
    }

    /// List all resolvable agent names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .builtin
            .keys()
            .chain(self.project.keys())
            .map(|s| s.as_str())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

/// The compiled-in agent set
fn builtin_agents() -> Vec<AgentDefinition> {
    vec![
        AgentDefinition::new("planner", "Analyzes a task and produces an implementation plan")
            .with_output_contract("plan: markdown implementation plan"),
        AgentDefinition::new("implementer", "Applies code changes based on a plan")
            .with_input_contract("plan: markdown implementation plan")
            .with_output_contract("changes: summary of applied changes"),
        AgentDefinition::new("reviewer", "Reviews changes and reports findings")
            .with_input_contract("changes: summary of applied changes"),
        AgentDefinition::new("tester", "Runs verification and reports results")
            .with_input_contract("changes: summary of applied changes"),
        AgentDefinition::new("investigator", "Traces a reported problem to its cause"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_agents_registered() {
        let registry = AgentRegistry::with_builtin();

        assert!(registry.contains("planner"));
        assert!(registry.contains("implementer"));
        assert!(registry.contains("reviewer"));
        assert!(registry.contains("tester"));
        assert!(registry.contains("investigator"));
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let mut registry = AgentRegistry::new();

        registry
            .register(AgentDefinition::new("reviewer", "first"))
            .unwrap();
        let err = registry
            .register(AgentDefinition::new("reviewer", "second"))
            .unwrap_err();

        assert!(matches!(err, RegistryError::DuplicateAgent { .. }));
        assert_eq!(registry.resolve("reviewer").unwrap().description, "first");
    }

    #[test]
    fn test_project_overrides_builtin() {
        let mut registry = AgentRegistry::with_builtin();
        registry
            .register(
                AgentDefinition::new("planner", "project planner")
                    .with_scope(AgentScope::Project),
            )
            .unwrap();

        let resolved = registry.resolve("planner").unwrap();
        assert_eq!(resolved.scope, AgentScope::Project);
        assert_eq!(resolved.description, "project planner");
    }

    #[test]
    fn test_resolve_unknown_agent() {
        let registry = AgentRegistry::with_builtin();
        let err = registry.resolve("nonexistent").unwrap_err();
        assert!(matches!(err, RegistryError::AgentNotFound(_)));
    }

    #[test]
    fn test_load_project_reads_only_agent_directory() {
        let project = tempfile::tempdir().unwrap();
        let agents_dir = project.path().join(PROJECT_AGENTS_DIR);
        std::fs::create_dir_all(&agents_dir).unwrap();

        // Inside the boundary: a valid definition
        std::fs::write(
            agents_dir.join("deployer.toml"),
            "name = \"deployer\"\ndescription = \"Deploys the build\"\n",
        )
        .unwrap();

        // Outside the boundary: agent-shaped files that must never load
        std::fs::write(
            project.path().join("stray.toml"),
            "name = \"stray\"\ndescription = \"outside\"\n",
        )
        .unwrap();
        let src = project.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("secrets.toml"), "name = \"secrets\"\n").unwrap();

        let mut registry = AgentRegistry::new();
        let registered = registry.load_project(project.path()).unwrap();

        assert_eq!(registered, 1);
        assert!(registry.contains("deployer"));
        assert!(!registry.contains("stray"));
        assert!(!registry.contains("secrets"));
        assert_eq!(
            registry.resolve("deployer").unwrap().scope,
            AgentScope::Project
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_load_project_does_not_follow_escaping_symlinks() {
        let project = tempfile::tempdir().unwrap();
        let agents_dir = project.path().join(PROJECT_AGENTS_DIR);
        std::fs::create_dir_all(&agents_dir).unwrap();

        let outside = project.path().join("outside.toml");
        std::fs::write(&outside, "name = \"escaped\"\n").unwrap();
        std::os::unix::fs::symlink(&outside, agents_dir.join("link.toml")).unwrap();

        let mut registry = AgentRegistry::new();
        registry.load_project(project.path()).unwrap();

        assert!(!registry.contains("escaped"));
    }

    #[test]
    fn test_load_project_skips_malformed_definitions() {
        let project = tempfile::tempdir().unwrap();
        let agents_dir = project.path().join(PROJECT_AGENTS_DIR);
        std::fs::create_dir_all(&agents_dir).unwrap();

        std::fs::write(agents_dir.join("broken.toml"), "not valid toml =").unwrap();
        std::fs::write(
            agents_dir.join("good.toml"),
            "name = \"good\"\ndescription = \"ok\"\n",
        )
        .unwrap();

        let mut registry = AgentRegistry::new();
        let registered = registry.load_project(project.path()).unwrap();

        assert_eq!(registered, 1);
        assert!(registry.contains("good"));
    }

    #[test]
    fn test_load_project_missing_directory_is_empty() {
        let project = tempfile::tempdir().unwrap();

        let mut registry = AgentRegistry::new();
        let registered = registry.load_project(project.path()).unwrap();

        assert_eq!(registered, 0);
    }
}
