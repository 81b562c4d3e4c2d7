//! The resolved project model the engine consumes.
//!
//! Parsing project files into this model is the job of an external
//! collaborator; the engine only reads it. Every type here round-trips
//! through JSON so a model can be handed over as a file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::core::{Artifact, CommandSpec, TargetId, TargetRef};
use crate::errors::BuildGraphError;

/// One concrete unit of work inside a phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Short rule name, e.g. `CpHeader foo.h`.
    pub name: String,
    /// Registered tool providing the action; `None` runs the command as a process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// The command to run or to fingerprint.
    #[serde(default)]
    pub command: CommandSpec,
    /// Declared inputs.
    #[serde(default)]
    pub inputs: Vec<Artifact>,
    /// Declared outputs.
    #[serde(default)]
    pub outputs: Vec<Artifact>,
    /// Execution description used for reporting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Run with a cleared environment.
    #[serde(default)]
    pub sandboxed: bool,
    /// Whether the work participates in indexing preparation.
    #[serde(default)]
    pub affects_indexing: bool,
    /// Run on every build regardless of fingerprints.
    #[serde(default)]
    pub always_out_of_date: bool,
}

impl WorkItem {
    /// Creates a work item with a name and command.
    #[must_use]
    pub fn new(name: impl Into<String>, command: CommandSpec) -> Self {
        Self {
            name: name.into(),
            command,
            ..Self::default()
        }
    }

    /// Creates a gate: a no-op item used purely for sequencing.
    #[must_use]
    pub fn gate(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Uses a registered tool.
    #[must_use]
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    /// Adds an input.
    #[must_use]
    pub fn input(mut self, artifact: Artifact) -> Self {
        self.inputs.push(artifact);
        self
    }

    /// Adds an output.
    #[must_use]
    pub fn output(mut self, artifact: Artifact) -> Self {
        self.outputs.push(artifact);
        self
    }

    /// Sets the execution description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Marks the item as always out of date.
    #[must_use]
    pub fn always_out_of_date(mut self) -> Self {
        self.always_out_of_date = true;
        self
    }

    /// Returns true if this item is a gate.
    #[must_use]
    pub fn is_gate(&self) -> bool {
        self.tool.is_none() && self.command.is_empty()
    }
}

/// An ordered group of work items in a target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    /// Phase name, e.g. `Headers` or `Sources`.
    pub name: String,
    /// Work items, in declaration order.
    #[serde(default)]
    pub items: Vec<WorkItem>,
}

impl Phase {
    /// Creates an empty phase.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
        }
    }

    /// Adds a work item.
    #[must_use]
    pub fn item(mut self, item: WorkItem) -> Self {
        self.items.push(item);
        self
    }
}

/// A logical target: ordered phases plus explicit dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Target name, unique within its project.
    pub name: String,
    /// Phases, in execution order.
    #[serde(default)]
    pub phases: Vec<Phase>,
    /// Explicit target dependencies.
    #[serde(default)]
    pub dependencies: Vec<TargetRef>,
}

impl Target {
    /// Creates an empty target.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Adds a phase.
    #[must_use]
    pub fn phase(mut self, phase: Phase) -> Self {
        self.phases.push(phase);
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn depends_on(mut self, target: impl AsRef<str>) -> Self {
        self.dependencies.push(TargetRef::parse(target.as_ref()));
        self
    }
}

/// A project groups targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Project name.
    pub name: String,
    /// Targets, in declaration order.
    #[serde(default)]
    pub targets: Vec<Target>,
}

impl Project {
    /// Creates an empty project.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            targets: Vec::new(),
        }
    }

    /// Adds a target.
    #[must_use]
    pub fn target(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }
}

/// A workspace groups projects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    /// Workspace name, used as the build's human-readable name.
    pub name: String,
    /// Projects, in declaration order.
    #[serde(default)]
    pub projects: Vec<Project>,
}

impl Workspace {
    /// Creates an empty workspace.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            projects: Vec::new(),
        }
    }

    /// Adds a project.
    #[must_use]
    pub fn project(mut self, project: Project) -> Self {
        self.projects.push(project);
        self
    }

    /// Iterates targets with their identities, in declaration order.
    pub fn targets(&self) -> impl Iterator<Item = (TargetId, &Target)> {
        self.projects.iter().flat_map(|project| {
            project
                .targets
                .iter()
                .map(move |target| (TargetId::new(&project.name, &target.name), target))
        })
    }
}

/// The domain in which explicit target dependencies are honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyScope {
    /// Dependencies are honored across the whole workspace.
    #[default]
    Workspace,
    /// Only dependencies between targets of the same project are honored.
    Project,
}

impl DependencyScope {
    /// Returns true if an edge from `dependency` to `dependent` is honored.
    #[must_use]
    pub fn honors(&self, dependent: &TargetId, dependency: &TargetId) -> bool {
        match self {
            Self::Workspace => true,
            Self::Project => dependent.project == dependency.project,
        }
    }
}

impl fmt::Display for DependencyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workspace => write!(f, "workspace"),
            Self::Project => write!(f, "project"),
        }
    }
}

/// Everything needed to plan one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    /// The resolved workspace.
    pub workspace: Workspace,
    /// Dependency scope.
    #[serde(default)]
    pub scope: DependencyScope,
    /// Whether independent targets may build concurrently.
    #[serde(default = "default_parallelize_targets")]
    pub parallelize_targets: bool,
    /// Build settings; part of the build description signature.
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    /// Targets to build; empty builds everything.
    #[serde(default)]
    pub targets: Vec<TargetRef>,
}

fn default_parallelize_targets() -> bool {
    true
}

impl BuildRequest {
    /// Creates a request that builds every target in parallel.
    #[must_use]
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            scope: DependencyScope::default(),
            parallelize_targets: default_parallelize_targets(),
            settings: BTreeMap::new(),
            targets: Vec::new(),
        }
    }

    /// Sets the dependency scope.
    #[must_use]
    pub fn with_scope(mut self, scope: DependencyScope) -> Self {
        self.scope = scope;
        self
    }

    /// Enables or disables target parallelization.
    #[must_use]
    pub fn with_parallel_targets(mut self, enabled: bool) -> Self {
        self.parallelize_targets = enabled;
        self
    }

    /// Adds a build setting.
    #[must_use]
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Restricts the build to a target and its dependencies.
    #[must_use]
    pub fn with_target(mut self, target: impl AsRef<str>) -> Self {
        self.targets.push(TargetRef::parse(target.as_ref()));
        self
    }

    /// Loads a request from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, BuildGraphError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
