use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cli::ManifestsArgs;
use crate::config::load_config;
use crate::error::ProcedureError;
use crate::util::{now_utc_string, sha256_file, write_json_pretty};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyEntry {
    Package(String),
    Pip { pip: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentManifest {
    pub name: String,
    pub channels: Vec<String>,
    pub dependencies: Vec<DependencyEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageSpec {
    pub name: String,
    pub constraint: Option<String>,
}

impl EnvironmentManifest {
    pub fn packages(&self) -> Vec<&str> {
        self.dependencies
            .iter()
            .filter_map(|entry| match entry {
                DependencyEntry::Package(spec) => Some(spec.as_str()),
                DependencyEntry::Pip { .. } => None,
            })
            .collect()
    }

    pub fn pip_packages(&self) -> Vec<&str> {
        self.dependencies
            .iter()
            .flat_map(|entry| match entry {
                DependencyEntry::Pip { pip } => pip.iter().map(String::as_str).collect(),
                DependencyEntry::Package(_) => Vec::new(),
            })
            .collect()
    }

    pub fn unpinned_packages(&self) -> Vec<String> {
        self.packages()
            .into_iter()
            .chain(self.pip_packages())
            .filter_map(|spec| parse_package_spec(spec).ok())
            .filter(|spec| spec.constraint.is_none())
            .map(|spec| spec.name)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestCandidate {
    pub path: String,
    pub discoverable: bool,
    pub environment: Option<String>,
    pub sha256: Option<String>,
    pub unpinned_packages: Vec<String>,
    pub problem: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestInventory {
    pub manifest_version: u32,
    pub generated_at: String,
    pub source_directory: String,
    pub prefix: String,
    pub candidates: Vec<ManifestCandidate>,
}

pub fn run(args: ManifestsArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let prefix = &config.provision.manifest_prefix;

    let inventory = build_inventory(&args.dir, prefix)?;
    let discoverable = inventory
        .candidates
        .iter()
        .filter(|candidate| candidate.discoverable)
        .count();

    for candidate in &inventory.candidates {
        if candidate.discoverable {
            info!(
                path = %candidate.path,
                environment = %candidate.environment.clone().unwrap_or_default(),
                "discoverable manifest"
            );
            if !candidate.unpinned_packages.is_empty() {
                warn!(
                    path = %candidate.path,
                    packages = %candidate.unpinned_packages.join(", "),
                    "manifest has unpinned packages"
                );
            }
        } else {
            warn!(
                path = %candidate.path,
                problem = %candidate.problem.clone().unwrap_or_default(),
                "manifest will not be picked up"
            );
        }
    }

    if let Some(path) = &args.inventory_path {
        write_json_pretty(path, &inventory)?;
        info!(path = %path.display(), "wrote manifest inventory");
    }

    info!(
        total = inventory.candidates.len(),
        discoverable,
        "manifest scan completed"
    );
    Ok(())
}

pub fn build_inventory(dir: &Path, prefix: &str) -> Result<ManifestInventory> {
    let mut candidates = Vec::new();

    for path in discover_yaml_files(dir)? {
        let display = path.display().to_string();
        match load_manifest(&path, prefix) {
            Ok(manifest) => candidates.push(ManifestCandidate {
                path: display,
                discoverable: true,
                unpinned_packages: manifest.unpinned_packages(),
                environment: Some(manifest.name),
                sha256: Some(sha256_file(&path)?),
                problem: None,
            }),
            Err(err) => candidates.push(ManifestCandidate {
                path: display,
                discoverable: false,
                environment: None,
                sha256: None,
                unpinned_packages: Vec::new(),
                problem: Some(format!("{err:#}")),
            }),
        }
    }

    Ok(ManifestInventory {
        manifest_version: 1,
        generated_at: now_utc_string(),
        source_directory: dir.display().to_string(),
        prefix: prefix.to_string(),
        candidates,
    })
}

fn discover_yaml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    let entries = fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
        let path = entry.path();

        if !entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_file()
        {
            continue;
        }

        if has_yaml_extension(&path) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

fn has_yaml_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yml") || ext.eq_ignore_ascii_case("yaml"))
        .unwrap_or(false)
}

pub fn is_discoverable(path: &Path, prefix: &str) -> bool {
    let starts_with_prefix = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with(prefix) && name.len() > prefix.len())
        .unwrap_or(false);
    starts_with_prefix && has_yaml_extension(path)
}

pub fn load_manifest(path: &Path, prefix: &str) -> Result<EnvironmentManifest> {
    if !is_discoverable(path, prefix) {
        return Err(ProcedureError::Discovery {
            path: path.to_path_buf(),
            prefix: prefix.to_string(),
        }
        .into());
    }

    let raw = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let manifest: EnvironmentManifest = serde_yaml::from_str(&raw).map_err(|err| {
        ProcedureError::ManifestInvalid {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    })?;

    validate_manifest(&manifest).map_err(|reason| ProcedureError::ManifestInvalid {
        path: path.to_path_buf(),
        reason,
    })?;

    Ok(manifest)
}

fn validate_manifest(manifest: &EnvironmentManifest) -> std::result::Result<(), String> {
    let name_pattern = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").map_err(|err| err.to_string())?;
    if !name_pattern.is_match(manifest.name.trim()) {
        return Err(format!("invalid environment name '{}'", manifest.name));
    }
    if manifest.channels.iter().all(|channel| channel.trim().is_empty()) {
        return Err("channels must list at least one package source".to_string());
    }
    if manifest.dependencies.is_empty() {
        return Err("dependencies must not be empty".to_string());
    }

    let pip_lists = manifest
        .dependencies
        .iter()
        .filter(|entry| matches!(entry, DependencyEntry::Pip { .. }))
        .count();
    if pip_lists > 1 {
        return Err(format!("expected at most one pip sub-list, found {pip_lists}"));
    }

    for spec in manifest.packages().into_iter().chain(manifest.pip_packages()) {
        parse_package_spec(spec)?;
    }

    Ok(())
}

pub fn parse_package_spec(spec: &str) -> std::result::Result<PackageSpec, String> {
    let pattern = Regex::new(r"^([A-Za-z0-9_][A-Za-z0-9_.\-\[\]]*)\s*(.*)$")
        .map_err(|err| err.to_string())?;
    let trimmed = spec.trim();
    let captures = pattern
        .captures(trimmed)
        .ok_or_else(|| format!("invalid package spec '{spec}'"))?;

    let name = captures
        .get(1)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| format!("missing package name in '{spec}'"))?;
    let constraint = captures
        .get(2)
        .map(|m| m.as_str().trim().to_string())
        .filter(|value| !value.is_empty());

    Ok(PackageSpec { name, constraint })
}
