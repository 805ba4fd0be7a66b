// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Project configuration and dependency graph.
//!
//! A [`ProjectGraph`] is a validated set of [`ProjectConfig`]s. It answers the
//! two graph questions request preparation needs: which projects must be
//! rebuilt before a project ([`ProjectGraph::upstream_tree`]) and which
//! projects are triggered after it ([`ProjectGraph::downstream_tree`]).
//!
//! Trees are flat node lists with parent/child links. Walks return node
//! indices in visit order rather than taking callbacks.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::request::Owner;

/// How a triggered project picks the revision it builds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionHandling {
    /// Resolve the project's own latest revision independently.
    #[default]
    FixIndependently,
    /// Resolve the project's own latest revision at the moment the upstream
    /// revision is fixed.
    FixWithUpstream,
    /// Build exactly the upstream's revision.
    PropagateFromUpstream,
}

/// Trigger that builds a project after one of its dependencies built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentTriggerConfig {
    /// Copy the upstream build's status.
    #[serde(default)]
    pub propagate_status: bool,
    /// Copy the upstream build's version.
    #[serde(default)]
    pub propagate_version: bool,
    /// Revision selection for the triggered build.
    #[serde(default)]
    pub revision_handling: RevisionHandling,
}

fn default_transitive() -> bool {
    true
}

/// A dependency of one project on another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyConfig {
    /// The project depended upon.
    pub project: Owner,
    /// Whether the dependency's own dependencies are followed too.
    #[serde(default = "default_transitive")]
    pub transitive: bool,
}

/// Configuration of a single project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Unique project name.
    pub name: Owner,
    /// Concurrent builds allowed. Zero or negative means unlimited; unset
    /// falls back to the graph default.
    #[serde(default)]
    pub concurrent_builds: Option<i32>,
    /// Projects this one depends on.
    #[serde(default)]
    pub dependencies: Vec<DependencyConfig>,
    /// Set when this project is built after its dependencies build.
    #[serde(default)]
    pub dependent_trigger: Option<DependentTriggerConfig>,
}

impl ProjectConfig {
    /// A project with no dependencies and no trigger.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Owner::new(name),
            concurrent_builds: None,
            dependencies: Vec::new(),
            dependent_trigger: None,
        }
    }

    /// Set the concurrency limit.
    pub fn concurrent_builds(mut self, limit: i32) -> Self {
        self.concurrent_builds = Some(limit);
        self
    }

    /// Add a transitive dependency.
    pub fn depends_on(mut self, project: impl Into<String>) -> Self {
        self.dependencies.push(DependencyConfig {
            project: Owner::new(project),
            transitive: true,
        });
        self
    }

    /// Add a dependency whose own dependencies are not followed.
    pub fn depends_on_directly(mut self, project: impl Into<String>) -> Self {
        self.dependencies.push(DependencyConfig {
            project: Owner::new(project),
            transitive: false,
        });
        self
    }

    /// Build this project whenever a dependency builds.
    pub fn triggered_by_dependencies(mut self, trigger: DependentTriggerConfig) -> Self {
        self.dependent_trigger = Some(trigger);
        self
    }
}

/// A node of a [`ProjectTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    /// The project at this node.
    pub owner: Owner,
    /// Index of the parent node, `None` for the root.
    pub parent: Option<usize>,
    /// Indices of the child nodes, in configuration order.
    pub children: Vec<usize>,
}

/// A tree of projects rooted at index 0.
///
/// The same project may appear more than once; only its first occurrence
/// is expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectTree {
    nodes: Vec<TreeNode>,
}

impl ProjectTree {
    fn new(root: Owner) -> Self {
        Self {
            nodes: vec![TreeNode {
                owner: root,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    fn push(&mut self, owner: Owner, parent: usize) -> usize {
        let index = self.nodes.len();
        self.nodes.push(TreeNode {
            owner,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(index);
        index
    }

    /// The root project.
    pub fn root(&self) -> &Owner {
        &self.nodes[0].owner
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: a tree has at least its root.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The node at `index`.
    pub fn node(&self, index: usize) -> &TreeNode {
        &self.nodes[index]
    }

    /// The project at `index`.
    pub fn owner(&self, index: usize) -> &Owner {
        &self.nodes[index].owner
    }

    /// The parent project of `index`, `None` for the root.
    pub fn parent(&self, index: usize) -> Option<&Owner> {
        self.nodes[index].parent.map(|parent| self.owner(parent))
    }

    /// Child projects of `index`.
    pub fn children(&self, index: usize) -> impl Iterator<Item = &Owner> {
        self.nodes[index]
            .children
            .iter()
            .map(move |child| self.owner(*child))
    }

    /// Depth-first post-order: children before their parent, root last.
    pub fn depth_first(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(0, false)];
        while let Some((index, visited)) = stack.pop() {
            if visited {
                order.push(index);
                continue;
            }
            stack.push((index, true));
            for child in self.nodes[index].children.iter().rev() {
                stack.push((*child, false));
            }
        }
        order
    }

    /// Breadth-first order from the root.
    pub fn breadth_first(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut queue = VecDeque::from([0]);
        while let Some(index) = queue.pop_front() {
            order.push(index);
            queue.extend(self.nodes[index].children.iter().copied());
        }
        order
    }
}

/// A validated set of projects.
#[derive(Debug, Clone)]
pub struct ProjectGraph {
    projects: Vec<ProjectConfig>,
    index: HashMap<Owner, usize>,
    default_concurrent_builds: i32,
}

impl ProjectGraph {
    /// Validate `projects` and build the graph.
    ///
    /// Fails on duplicate names, dependencies on unknown projects,
    /// self-dependencies and dependency cycles.
    pub fn new(projects: Vec<ProjectConfig>, default_concurrent_builds: i32) -> Result<Self> {
        let mut index = HashMap::with_capacity(projects.len());
        for (position, project) in projects.iter().enumerate() {
            if index.insert(project.name.clone(), position).is_some() {
                return Err(Error::InvalidProject {
                    project: project.name.clone(),
                    reason: "duplicate project name".to_string(),
                });
            }
        }

        for project in &projects {
            for dependency in &project.dependencies {
                if dependency.project == project.name {
                    return Err(Error::InvalidProject {
                        project: project.name.clone(),
                        reason: "project depends on itself".to_string(),
                    });
                }
                if !index.contains_key(&dependency.project) {
                    return Err(Error::InvalidProject {
                        project: project.name.clone(),
                        reason: format!("unknown dependency '{}'", dependency.project),
                    });
                }
            }
        }

        let graph = Self {
            projects,
            index,
            default_concurrent_builds,
        };
        graph.check_cycles()?;

        debug!(projects = graph.projects.len(), "Project graph loaded");
        Ok(graph)
    }

    /// Parse a JSON array of project configurations.
    pub fn from_json(json: &str, default_concurrent_builds: i32) -> Result<Self> {
        let projects: Vec<ProjectConfig> = serde_json::from_str(json)?;
        Self::new(projects, default_concurrent_builds)
    }

    /// Load a JSON array of project configurations from a file.
    pub fn from_file(path: impl AsRef<Path>, default_concurrent_builds: i32) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json, default_concurrent_builds)
    }

    /// The configuration of `owner`.
    pub fn project(&self, owner: &Owner) -> Option<&ProjectConfig> {
        self.index.get(owner).map(|position| &self.projects[*position])
    }

    /// Whether `owner` is part of the graph.
    pub fn contains(&self, owner: &Owner) -> bool {
        self.index.contains_key(owner)
    }

    /// All projects in configuration order.
    pub fn projects(&self) -> &[ProjectConfig] {
        &self.projects
    }

    /// Concurrent builds allowed for `owner`.
    pub fn concurrent_builds(&self, owner: &Owner) -> i32 {
        self.project(owner)
            .and_then(|project| project.concurrent_builds)
            .unwrap_or(self.default_concurrent_builds)
    }

    /// The dependent trigger configured on `owner`.
    pub fn dependent_trigger(&self, owner: &Owner) -> Option<&DependentTriggerConfig> {
        self.project(owner)
            .and_then(|project| project.dependent_trigger.as_ref())
    }

    /// Projects that depend directly on `owner`, in configuration order.
    pub fn dependents(&self, owner: &Owner) -> impl Iterator<Item = &ProjectConfig> {
        self.projects.iter().filter(move |project| {
            project
                .dependencies
                .iter()
                .any(|dependency| &dependency.project == owner)
        })
    }

    /// Tree of the projects `owner` depends on.
    ///
    /// Dependencies reached through a non-transitive edge are not expanded.
    pub fn upstream_tree(&self, owner: &Owner) -> Result<ProjectTree> {
        let root = self.require(owner)?;
        let mut tree = ProjectTree::new(root.name.clone());
        let mut expanded = HashSet::from([root.name.clone()]);
        let mut stack = vec![0];

        while let Some(index) = stack.pop() {
            let project = self.require(tree.owner(index))?;
            let mut pushed = Vec::new();
            for dependency in &project.dependencies {
                let child = tree.push(dependency.project.clone(), index);
                if dependency.transitive && expanded.insert(dependency.project.clone()) {
                    pushed.push(child);
                }
            }
            stack.extend(pushed.into_iter().rev());
        }
        Ok(tree)
    }

    /// Tree of the projects triggered, directly or not, by a build of `owner`.
    ///
    /// Only dependents carrying a dependent trigger are included.
    pub fn downstream_tree(&self, owner: &Owner) -> Result<ProjectTree> {
        let root = self.require(owner)?;
        let mut tree = ProjectTree::new(root.name.clone());
        let mut expanded = HashSet::from([root.name.clone()]);
        let mut queue = VecDeque::from([0]);

        while let Some(index) = queue.pop_front() {
            let parent = tree.owner(index).clone();
            let dependents: Vec<Owner> = self
                .dependents(&parent)
                .filter(|project| project.dependent_trigger.is_some())
                .map(|project| project.name.clone())
                .collect();
            for dependent in dependents {
                let child = tree.push(dependent.clone(), index);
                if expanded.insert(dependent) {
                    queue.push_back(child);
                }
            }
        }
        Ok(tree)
    }

    fn require(&self, owner: &Owner) -> Result<&ProjectConfig> {
        self.project(owner)
            .ok_or_else(|| Error::UnknownProject(owner.clone()))
    }

    fn check_cycles(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        let mut marks = vec![Mark::New; self.projects.len()];
        for start in 0..self.projects.len() {
            if marks[start] != Mark::New {
                continue;
            }
            // (project, next dependency to visit)
            let mut path: Vec<(usize, usize)> = vec![(start, 0)];
            marks[start] = Mark::Active;

            while let Some((current, next)) = path.last_mut() {
                let project = &self.projects[*current];
                let Some(dependency) = project.dependencies.get(*next) else {
                    marks[*current] = Mark::Done;
                    path.pop();
                    continue;
                };
                *next += 1;
                let target = self.index[&dependency.project];
                match marks[target] {
                    Mark::Done => {}
                    Mark::New => {
                        marks[target] = Mark::Active;
                        path.push((target, 0));
                    }
                    Mark::Active => {
                        let from = path
                            .iter()
                            .position(|(position, _)| *position == target)
                            .unwrap_or(0);
                        let mut cycle: Vec<Owner> = path[from..]
                            .iter()
                            .map(|(position, _)| self.projects[*position].name.clone())
                            .collect();
                        cycle.push(self.projects[target].name.clone());
                        return Err(Error::DependencyCycle { path: cycle });
                    }
                }
            }
        }
        Ok(())
    }
}
