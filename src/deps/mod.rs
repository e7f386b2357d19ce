//! Dependency discovery: static import analysis and package resolution.

pub mod analyzer;
pub mod resolver;

pub use analyzer::{collect_imports, DependencyAnalyzer};
pub use resolver::{
    normalize_package_name, InstalledPackageCache, PackageResolver, CHECK_TIMEOUT,
    INSTALL_TIMEOUT,
};
