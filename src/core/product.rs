//! Products and the resolved product graph
//!
//! The graph is produced by an external manifest resolver and handed to
//! xcpack as JSON. Nothing here resolves versions; it only validates the graph
//! and computes a deterministic processing order.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::defaults;
use crate::error::ConfigError;

/// Kind of compilation unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    /// Swift library target
    Library,
    /// C/Objective-C target exposing a clang module
    ClangModule,
    /// Prebuilt bundle, copied instead of compiled
    Binary,
    /// Target whose only content is resources
    ResourceOnly,
}

impl fmt::Display for ProductKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Library => write!(f, "library"),
            Self::ClangModule => write!(f, "clang module"),
            Self::Binary => write!(f, "binary"),
            Self::ResourceOnly => write!(f, "resource-only"),
        }
    }
}

/// Identity of a product: owning package plus target name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductId {
    /// Owning package
    pub package: String,
    /// Target name
    pub target: String,
}

impl ProductId {
    /// Create a new product id
    pub fn new(package: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            target: target.into(),
        }
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.target)
    }
}

/// One compilation unit of the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Owning package
    pub package: String,

    /// Target name, unique within the graph
    pub target: String,

    /// Target kind
    pub kind: ProductKind,

    /// Package root directory
    pub root: PathBuf,

    /// Sources, relative to `root`. For binary products, the prebuilt bundle.
    pub sources: PathBuf,

    /// Public headers directory, relative to `root`
    #[serde(default)]
    pub public_headers: Option<PathBuf>,

    /// Resource files or directories, relative to `root`
    #[serde(default)]
    pub resources: Vec<PathBuf>,

    /// Target names this product depends on
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Product {
    /// Create a product with no headers, resources or dependencies
    pub fn new(
        package: impl Into<String>,
        target: impl Into<String>,
        kind: ProductKind,
        root: impl Into<PathBuf>,
        sources: impl Into<PathBuf>,
    ) -> Self {
        Self {
            package: package.into(),
            target: target.into(),
            kind,
            root: root.into(),
            sources: sources.into(),
            public_headers: None,
            resources: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    /// Set the public headers directory
    #[must_use]
    pub fn with_public_headers(mut self, dir: impl Into<PathBuf>) -> Self {
        self.public_headers = Some(dir.into());
        self
    }

    /// Add a resource path
    #[must_use]
    pub fn with_resource(mut self, path: impl Into<PathBuf>) -> Self {
        self.resources.push(path.into());
        self
    }

    /// Add a dependency
    #[must_use]
    pub fn with_dependency(mut self, target: impl Into<String>) -> Self {
        self.dependencies.push(target.into());
        self
    }

    /// Product identity
    pub fn id(&self) -> ProductId {
        ProductId::new(&self.package, &self.target)
    }

    /// Name used for the bundle and the per-platform framework
    pub fn display_name(&self) -> &str {
        &self.target
    }

    /// Absolute path of the sources
    pub fn source_path(&self) -> PathBuf {
        self.root.join(&self.sources)
    }

    /// Absolute path of the public headers, if any
    pub fn public_headers_path(&self) -> Option<PathBuf> {
        self.public_headers.as_ref().map(|p| self.root.join(p))
    }

    /// Absolute paths of the resources
    pub fn resource_paths(&self) -> Vec<PathBuf> {
        self.resources.iter().map(|p| self.root.join(p)).collect()
    }

    /// Name of the embedded resource sub-bundle
    pub fn resource_bundle_name(&self) -> String {
        format!(
            "{}_{}.{}",
            self.package,
            self.target,
            defaults::RESOURCE_BUNDLE_EXTENSION
        )
    }

    /// Whether a resource sub-bundle is embedded in every platform framework
    pub fn has_resources(&self) -> bool {
        !self.resources.is_empty()
    }

    /// Whether the product is compiled by the external toolchain
    pub fn is_compiled(&self) -> bool {
        match self.kind {
            ProductKind::Library | ProductKind::ClangModule | ProductKind::ResourceOnly => true,
            ProductKind::Binary => false,
        }
    }
}

/// Which products of the graph a run builds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// Build every product that does not belong to the root package
    PrepareDependencies,
    /// Build the root package's products, or only the named one
    CreatePackage {
        /// Restrict to this target
        product: Option<String>,
    },
}

/// Resolved product graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductGraph {
    /// Root package name
    pub root: String,

    /// All products
    pub products: Vec<Product>,
}

impl ProductGraph {
    /// Create a validated graph
    pub fn new(root: impl Into<String>, products: Vec<Product>) -> Result<Self, ConfigError> {
        let graph = Self {
            root: root.into(),
            products,
        };
        graph.validate()?;
        Ok(graph)
    }

    /// Parse and validate a graph from JSON
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let graph: Self = serde_json::from_str(content).map_err(|e| ConfigError::ParseError {
            what: "product graph".to_string(),
            error: e.to_string(),
        })?;
        graph.validate()?;
        Ok(graph)
    }

    /// Load a graph file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            what: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_json(&content)
    }

    /// Look up a product by target name
    pub fn product(&self, target: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.target == target)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for product in &self.products {
            if !seen.insert(product.target.as_str()) {
                return Err(ConfigError::DuplicateProduct {
                    target: product.target.clone(),
                });
            }
        }

        for product in &self.products {
            for dep in &product.dependencies {
                if !seen.contains(dep.as_str()) {
                    return Err(ConfigError::MissingDependency {
                        product: product.target.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        self.topological_order().map(|_| ())
    }

    /// Targets in dependency order (dependencies before dependents)
    ///
    /// Ties are broken by target name so the order is stable across runs.
    pub fn topological_order(&self) -> Result<Vec<String>, ConfigError> {
        let edges: BTreeMap<&str, Vec<&str>> = self
            .products
            .iter()
            .map(|p| {
                let mut deps: Vec<&str> = p.dependencies.iter().map(String::as_str).collect();
                deps.sort_unstable();
                (p.target.as_str(), deps)
            })
            .collect();

        let mut visited = BTreeSet::new();
        let mut in_progress = Vec::new();
        let mut result = Vec::new();

        for node in edges.keys() {
            visit(node, &edges, &mut visited, &mut in_progress, &mut result)?;
        }

        Ok(result)
    }

    /// Products in scope for a run mode, in dependency order
    pub fn select(&self, mode: &RunMode) -> Result<Vec<Product>, ConfigError> {
        let order = self.topological_order()?;
        let ordered = order.iter().filter_map(|target| self.product(target));

        let selected: Vec<Product> = match mode {
            RunMode::PrepareDependencies => ordered
                .filter(|p| p.package != self.root)
                .cloned()
                .collect(),
            RunMode::CreatePackage { product: None } => ordered
                .filter(|p| p.package == self.root)
                .cloned()
                .collect(),
            RunMode::CreatePackage {
                product: Some(name),
            } => {
                let product = self
                    .products
                    .iter()
                    .find(|p| p.package == self.root && &p.target == name)
                    .ok_or_else(|| ConfigError::ProductNotFound {
                        package: self.root.clone(),
                        product: name.clone(),
                    })?;
                vec![product.clone()]
            }
        };

        Ok(selected)
    }
}

fn visit<'a>(
    node: &'a str,
    edges: &BTreeMap<&'a str, Vec<&'a str>>,
    visited: &mut BTreeSet<&'a str>,
    in_progress: &mut Vec<&'a str>,
    result: &mut Vec<String>,
) -> Result<(), ConfigError> {
    if visited.contains(node) {
        return Ok(());
    }

    if let Some(pos) = in_progress.iter().position(|n| *n == node) {
        let mut cycle: Vec<String> = in_progress[pos..].iter().map(|s| (*s).to_string()).collect();
        cycle.push(node.to_string());
        return Err(ConfigError::CircularDependency { cycle });
    }

    in_progress.push(node);
    if let Some(deps) = edges.get(node) {
        for dep in deps {
            visit(dep, edges, visited, in_progress, result)?;
        }
    }
    in_progress.pop();

    visited.insert(node);
    result.push(node.to_string());
    Ok(())
}
