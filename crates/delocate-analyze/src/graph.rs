use std::path::{Path, PathBuf};

use indexmap::IndexMap;

/// One dependency relation: `depending` refers to `depended` by
/// `install_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    /// Canonical path of the library being depended on.
    pub depended: PathBuf,
    /// Canonical path of the binary holding the reference.
    pub depending: PathBuf,
    /// The install name as stored in the referencing load command.
    pub install_name: String,
}

/// The dependency relation over a tree of binaries.
///
/// Edges keep insertion order, so iteration over depended libraries is
/// deterministic for a given walk order. Keys are canonical paths of
/// existing files; anchored names never appear here, the resolver
/// replaced them before edges are inserted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    edges: Vec<DependencyEdge>,
}

impl DependencyGraph {
    /// Record that `depending` refers to `depended` by `install_name`,
    /// replacing the name on an existing edge for the same pair.
    pub fn insert(
        &mut self,
        depended: impl Into<PathBuf>,
        depending: impl Into<PathBuf>,
        install_name: impl Into<String>,
    ) {
        let depended = depended.into();
        let depending = depending.into();
        let install_name = install_name.into();
        if let Some(edge) = self
            .edges
            .iter_mut()
            .find(|edge| edge.depended == depended && edge.depending == depending)
        {
            edge.install_name = install_name;
        } else {
            self.edges.push(DependencyEdge {
                depended,
                depending,
                install_name,
            });
        }
    }

    pub fn edges(&self) -> impl Iterator<Item = &DependencyEdge> {
        self.edges.iter()
    }

    /// Depended libraries, deduplicated, in first-seen order.
    pub fn depended_paths(&self) -> Vec<&Path> {
        let mut paths = Vec::new();
        for edge in &self.edges {
            if !paths.contains(&edge.depended.as_path()) {
                paths.push(edge.depended.as_path());
            }
        }
        paths
    }

    /// The binaries referring to `depended`, with their install names.
    pub fn dependers_of<'graph>(
        &'graph self,
        depended: &'graph Path,
    ) -> impl Iterator<Item = (&'graph Path, &'graph str)> {
        self.edges
            .iter()
            .filter(move |edge| edge.depended == depended)
            .map(|edge| (edge.depending.as_path(), edge.install_name.as_str()))
    }

    pub fn contains_depended(&self, depended: &Path) -> bool {
        self.edges.iter().any(|edge| edge.depended == depended)
    }

    /// Number of distinct depended libraries.
    pub fn len(&self) -> usize {
        self.depended_paths().len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Rewrite every occurrence of `old` (as depended or depending
    /// path) to `new`. Used when a library is copied to its bundle
    /// destination.
    pub fn rename(&mut self, old: &Path, new: &Path) {
        for edge in &mut self.edges {
            if edge.depended == old {
                edge.depended = new.to_path_buf();
            }
            if edge.depending == old {
                edge.depending = new.to_path_buf();
            }
        }
    }

    /// The subgraph of edges whose depended library is in `keys`.
    pub fn subgraph<'key>(&self, keys: impl IntoIterator<Item = &'key Path>) -> Self {
        let keys: Vec<&Path> = keys.into_iter().collect();
        Self {
            edges: self
                .edges
                .iter()
                .filter(|edge| keys.contains(&edge.depended.as_path()))
                .cloned()
                .collect(),
        }
    }

    /// A copy of the graph with `prefix` stripped from the start of
    /// every path that carries it. Used to report wheel-relative paths.
    pub fn strip_prefix(&self, prefix: &Path) -> Self {
        let strip = |path: &Path| {
            path.strip_prefix(prefix)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| path.to_path_buf())
        };
        Self {
            edges: self
                .edges
                .iter()
                .map(|edge| DependencyEdge {
                    depended: strip(&edge.depended),
                    depending: strip(&edge.depending),
                    install_name: edge.install_name.clone(),
                })
                .collect(),
        }
    }

    /// The legacy nested-mapping view:
    /// `depended -> {depending -> install_name}`.
    pub fn nested(&self) -> IndexMap<&Path, IndexMap<&Path, &str>> {
        let mut nested: IndexMap<&Path, IndexMap<&Path, &str>> = IndexMap::new();
        for edge in &self.edges {
            nested
                .entry(edge.depended.as_path())
                .or_default()
                .insert(edge.depending.as_path(), edge.install_name.as_str());
        }
        nested
    }
}
