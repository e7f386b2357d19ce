//! Import-name to package resolution, installed-package cache and installs.
//!
//! The cache is a soft cache: a miss is confirmed with a direct import probe
//! before a module is reported missing. It is dropped whenever packages are
//! installed or the target interpreter changes.

use crate::config::tables::LookupTables;
use crate::error::ResolverError;
use crate::models::{Dependency, DependencyStatus};
use crate::system::interpreter::probe_import;
use crate::system::process::{base_command, command_line, run_captured, run_streaming};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Timeout for package queries and import probes.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for a single package install.
pub const INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

static NAME_SEPARATOR_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-_.]+").expect("Invalid package name separator regex"));

static PACKAGE_SPEC_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*(\[[A-Za-z0-9,._-]+\])?$")
        .expect("Invalid package spec regex")
});

/// Lower-cased, PEP 503 normalised package name.
pub fn normalize_package_name(name: &str) -> String {
    NAME_SEPARATOR_REGEX
        .replace_all(name.trim(), "-")
        .to_lowercase()
}

/// Set of installed distribution names for one interpreter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstalledPackageCache {
    names: HashSet<String>,
}

impl InstalledPackageCache {
    /// Parse `pip list --format=freeze` output.
    pub fn from_freeze(output: &str) -> Self {
        let names = output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('-'))
            .filter_map(|l| l.split("==").next())
            .filter_map(|l| l.split(" @ ").next())
            .map(normalize_package_name)
            .filter(|n| !n.is_empty())
            .collect();
        InstalledPackageCache { names }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&normalize_package_name(name))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Resolves modules to packages against one interpreter.
#[derive(Debug, Clone)]
pub struct PackageResolver {
    interpreter: PathBuf,
    tables: Arc<LookupTables>,
    query_timeout: Duration,
    install_timeout: Duration,
    index_url: Option<String>,
    cache: Option<InstalledPackageCache>,
}

impl PackageResolver {
    pub fn new(interpreter: impl Into<PathBuf>, tables: Arc<LookupTables>) -> Self {
        PackageResolver {
            interpreter: interpreter.into(),
            tables,
            query_timeout: CHECK_TIMEOUT,
            install_timeout: INSTALL_TIMEOUT,
            index_url: None,
            cache: None,
        }
    }

    pub fn with_timeouts(mut self, query: Duration, install: Duration) -> Self {
        self.query_timeout = query;
        self.install_timeout = install;
        self
    }

    pub fn with_index_url(mut self, index_url: Option<String>) -> Self {
        self.index_url = index_url.filter(|u| !u.trim().is_empty());
        self
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    /// Point the resolver at another interpreter. Always drops the cache.
    pub fn set_interpreter(&mut self, interpreter: impl Into<PathBuf>) {
        self.interpreter = interpreter.into();
        self.invalidate();
    }

    pub fn invalidate(&mut self) {
        if self.cache.take().is_some() {
            log::debug!("[Resolver] Installed package cache invalidated");
        }
    }

    /// Cache snapshot, if one is loaded.
    pub fn cache(&self) -> Option<&InstalledPackageCache> {
        self.cache.as_ref()
    }

    /// Take over a cache computed by a worker on a detached copy of this
    /// resolver. Ignored when the worker ran against another interpreter.
    pub fn adopt_cache(&mut self, interpreter: &Path, cache: Option<InstalledPackageCache>) {
        if interpreter == self.interpreter {
            if let Some(cache) = cache {
                self.cache = Some(cache);
            }
        }
    }

    /// Installable package name for an import name.
    pub fn package_for(&self, module: &str) -> String {
        self.tables.package_for(module)
    }

    /// Installed distributions, queried once and cached until invalidated.
    pub async fn list_installed(&mut self) -> Result<&InstalledPackageCache, ResolverError> {
        if self.cache.is_none() {
            let mut cmd = base_command(&self.interpreter);
            cmd.args(["-m", "pip", "list", "--format=freeze", "--disable-pip-version-check"]);
            let out = run_captured(cmd, self.query_timeout, "pip list").await?;
            if !out.success() {
                return Err(ResolverError::ProcessLaunch(format!(
                    "pip list exited with {:?}: {}",
                    out.code,
                    out.stderr.trim()
                )));
            }
            let cache = InstalledPackageCache::from_freeze(&out.stdout);
            log::debug!("[Resolver] Cached {} installed packages", cache.len());
            self.cache = Some(cache);
        }
        self.cache
            .as_ref()
            .ok_or_else(|| ResolverError::ProcessLaunch("package cache unavailable".to_string()))
    }

    /// Installed / missing / unknown status of one import.
    pub async fn is_installed(&mut self, module: &str) -> DependencyStatus {
        let package = self.package_for(module);

        match self.list_installed().await {
            Ok(cache) => {
                if cache.contains(&package) || cache.contains(module) {
                    return DependencyStatus::Installed;
                }
            }
            Err(e) => log::warn!("[Resolver] Could not list installed packages: {}", e),
        }

        match probe_import(&self.interpreter, module, self.query_timeout).await {
            Ok(true) => DependencyStatus::Installed,
            Ok(false) => DependencyStatus::Missing,
            Err(ResolverError::Timeout { .. }) => {
                log::warn!(
                    "[Resolver] Import check for {} timed out after {}s; treating as missing",
                    module,
                    self.query_timeout.as_secs()
                );
                DependencyStatus::Unknown
            }
            Err(e) => {
                log::warn!("[Resolver] Import check for {} failed: {}", module, e);
                DependencyStatus::Missing
            }
        }
    }

    /// Resolve each module in order.
    pub async fn resolve(&mut self, modules: &[String]) -> Vec<Dependency> {
        let mut out = Vec::with_capacity(modules.len());
        for module in modules {
            let status = self.is_installed(module).await;
            out.push(Dependency {
                module: module.clone(),
                package: self.package_for(module),
                status,
            });
        }
        out
    }

    /// `pip install` arguments for a package (mirror included).
    pub fn install_args(&self, package: &str) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            "pip".to_string(),
            "install".to_string(),
            "--disable-pip-version-check".to_string(),
        ];
        if let Some(ref url) = self.index_url {
            args.push("-i".to_string());
            args.push(url.clone());
        }
        args.push(package.to_string());
        args
    }

    /// Install the package providing `module`, streaming installer output.
    ///
    /// On success the cache is invalidated. On failure or timeout the cache is
    /// left as it was.
    pub async fn install<F>(&mut self, module: &str, mut on_line: F) -> Result<(), ResolverError>
    where
        F: FnMut(String),
    {
        let package = self.package_for(module);
        if !PACKAGE_SPEC_REGEX.is_match(&package) {
            return Err(ResolverError::InstallFailed {
                package,
                reason: "invalid package name".to_string(),
            });
        }

        let args = self.install_args(&package);
        on_line(format!("Run: {}", command_line(&self.interpreter, &args)));

        let mut cmd = base_command(&self.interpreter);
        cmd.args(&args);
        let label = format!("pip install {}", package);
        let code = run_streaming(cmd, self.install_timeout, &label, &mut on_line).await?;

        match code {
            Some(0) => {
                self.invalidate();
                Ok(())
            }
            Some(code) => Err(ResolverError::InstallFailed {
                package,
                reason: format!("pip exited with code {}", code),
            }),
            None => Err(ResolverError::InstallFailed {
                package,
                reason: "pip was terminated by a signal".to_string(),
            }),
        }
    }
}
