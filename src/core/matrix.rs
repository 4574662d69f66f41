//! Platform matrix resolution
//!
//! Expands global options plus per-product overrides into concrete
//! (platform, architecture set) build tasks. All configuration errors surface
//! here, before any compiler runs.

use std::collections::BTreeMap;
use std::fmt;

use crate::core::options::{BuildOptions, OptionsOverride};
use crate::core::platform::{ArchitectureSet, CapabilityTable, Platform, SdkVariant};
use crate::core::product::{Product, ProductId};
use crate::error::ConfigError;

/// One concrete build unit of a product
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlatformTask {
    /// Product being built
    pub product: ProductId,
    /// Target platform
    pub platform: Platform,
    /// Architectures and SDK
    pub architectures: ArchitectureSet,
}

impl PlatformTask {
    /// Library identifier, e.g. `ios-arm64_x86_64-simulator`
    ///
    /// Used as the per-platform sub-directory name inside a bundle.
    pub fn identifier(&self) -> String {
        let base = format!("{}-{}", self.platform, self.architectures.joined());
        match self.architectures.variant {
            SdkVariant::Device => base,
            SdkVariant::Simulator => format!("{base}-simulator"),
        }
    }

    /// Canonical ordering key
    pub fn sort_key(&self) -> (Platform, SdkVariant) {
        (self.platform, self.architectures.variant)
    }
}

impl fmt::Display for PlatformTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.product, self.identifier())
    }
}

/// Everything needed to build one product
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductPlan {
    /// The product
    pub product: Product,
    /// Options after override merge
    pub options: BuildOptions,
    /// Ordered platform tasks
    pub tasks: Vec<PlatformTask>,
}

/// Resolver for the platform matrix
#[derive(Debug, Clone)]
pub struct PlatformMatrix<'a> {
    table: &'a CapabilityTable,
    global: &'a BuildOptions,
    overrides: &'a BTreeMap<String, OptionsOverride>,
}

impl<'a> PlatformMatrix<'a> {
    /// Create a resolver
    pub fn new(
        table: &'a CapabilityTable,
        global: &'a BuildOptions,
        overrides: &'a BTreeMap<String, OptionsOverride>,
    ) -> Self {
        Self {
            table,
            global,
            overrides,
        }
    }

    /// Options for one product after applying its override
    pub fn options_for(&self, product: &Product) -> BuildOptions {
        match self.overrides.get(&product.target) {
            Some(over) => self.global.merged(over),
            None => self.global.clone(),
        }
    }

    /// Expand one product into its plan
    pub fn expand(&self, product: &Product) -> Result<ProductPlan, ConfigError> {
        let options = self.options_for(product);

        if options.platforms.is_empty() {
            return Err(ConfigError::NoPlatforms {
                product: product.id().to_string(),
            });
        }

        let mut tasks = Vec::new();
        for &platform in &options.platforms {
            let caps = self.table.get(platform)?;

            if options.library_evolution && !caps.supports_library_evolution {
                return Err(ConfigError::UnsupportedCapability {
                    product: product.id().to_string(),
                    platform: platform.to_string(),
                    capability: "library evolution".to_string(),
                });
            }

            tasks.push(PlatformTask {
                product: product.id(),
                platform,
                architectures: caps.device.clone(),
            });

            if options.simulator {
                match &caps.simulator {
                    Some(simulator) => tasks.push(PlatformTask {
                        product: product.id(),
                        platform,
                        architectures: simulator.clone(),
                    }),
                    None => tracing::debug!(
                        "{platform} has no simulator, building device only for {}",
                        product.id()
                    ),
                }
            }
        }

        tasks.sort_by_key(PlatformTask::sort_key);

        Ok(ProductPlan {
            product: product.clone(),
            options,
            tasks,
        })
    }

    /// Expand every product, failing on the first configuration error
    ///
    /// Overrides naming a product outside `products` are rejected, so a typo
    /// in a config file cannot silently fall back to global options.
    pub fn resolve(&self, products: &[Product]) -> Result<Vec<ProductPlan>, ConfigError> {
        self.check_overrides(products)?;
        products.iter().map(|p| self.expand(p)).collect()
    }

    /// Reject overrides naming a product outside `products`
    pub fn check_overrides(&self, products: &[Product]) -> Result<(), ConfigError> {
        for name in self.overrides.keys() {
            if !products.iter().any(|p| &p.target == name) {
                return Err(ConfigError::UnknownOverride {
                    product: name.clone(),
                });
            }
        }
        Ok(())
    }
}
