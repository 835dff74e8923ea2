use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{error, info, warn};

use crate::cli::{ProvisionArgs, ProvisionScope};
use crate::commands::manifests::load_manifest;
use crate::config::{ProvisionConfig, load_config};
use crate::error::ProcedureError;
use crate::model::ProvisionRecord;
use crate::runner::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
use crate::util::{now_utc_string, sha256_file, tail_lines, write_json_pretty};

const RESOLUTION_MARKERS: [&str; 5] = [
    "ResolvePackageNotFound",
    "PackagesNotFoundError",
    "UnsatisfiableError",
    "LibMambaUnsatisfiableError",
    "conflict",
];

const STORAGE_MARKERS: [&str; 3] = [
    "No space left on device",
    "Disk quota exceeded",
    "NoSpaceLeftError",
];

#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub manifest_path: PathBuf,
    pub scope: ProvisionScope,
    pub env_root: PathBuf,
    pub assume_yes: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProvisionFailure {
    DependencyResolution,
    StorageExhausted,
    Other,
}

pub fn run(args: ProvisionArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let env_root = resolve_env_root(&config.provision, &args.output_root);

    let request = ProvisionRequest {
        manifest_path: args.manifest,
        scope: args.scope,
        env_root,
        assume_yes: args.yes,
    };

    if !args.yes {
        info!("the package manager will ask for confirmation; pass --yes for batch use");
    }

    let record = provision_environment(&ProcessRunner, &config.provision, &request)?;
    info!(
        environment = %record.environment,
        scope = %record.scope,
        "environment provisioned"
    );
    Ok(())
}

pub fn resolve_env_root(config: &ProvisionConfig, output_root: &Path) -> PathBuf {
    config
        .env_root
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| output_root.join("envs"))
}

pub fn provision_environment(
    runner: &dyn CommandRunner,
    config: &ProvisionConfig,
    request: &ProvisionRequest,
) -> Result<ProvisionRecord> {
    let manifest = load_manifest(&request.manifest_path, &config.manifest_prefix)?;
    let manifest_sha256 = sha256_file(&request.manifest_path)?;
    let started_at = now_utc_string();

    let spec = build_provision_command(config, request, &manifest.name);
    info!(
        environment = %manifest.name,
        packages = manifest.packages().len(),
        pip_packages = manifest.pip_packages().len(),
        command = %spec.display(),
        "creating environment; first creation can take more than ten minutes"
    );

    let output = runner.run(&spec, None)?;

    let failure = (!output.success).then(|| classify_provision_failure(&output));
    let mut record = ProvisionRecord {
        manifest_version: 1,
        environment: manifest.name.clone(),
        manifest_path: request.manifest_path.display().to_string(),
        manifest_sha256,
        scope: request.scope.as_str().to_string(),
        command: spec.display(),
        status: (if failure.is_none() { "completed" } else { "failed" }).to_string(),
        started_at,
        finished_at: now_utc_string(),
        failure_reason: None,
    };

    let record_path = request
        .env_root
        .join(format!("{}.provision.json", manifest.name));

    let Some(failure) = failure else {
        write_json_pretty(&record_path, &record)?;
        return Ok(record);
    };

    let err: anyhow::Error = match failure {
        ProvisionFailure::DependencyResolution => ProcedureError::DependencyResolution {
            environment: manifest.name.clone(),
            stderr: output.stderr.trim_end().to_string(),
        }
        .into(),
        ProvisionFailure::StorageExhausted => ProcedureError::StorageExhausted {
            environment: manifest.name.clone(),
            location: request.env_root.display().to_string(),
        }
        .into(),
        ProvisionFailure::Other => anyhow::anyhow!(
            "{} exited with {:?} while creating '{}':\n{}",
            spec.program,
            output.exit_code,
            manifest.name,
            tail_lines(&output.stderr, 40)
        ),
    };

    record.failure_reason = Some(format!("{err:#}"));
    if failure == ProvisionFailure::StorageExhausted {
        warn!(path = %record_path.display(), "skipping provisioning record; storage is full");
    } else if let Err(write_err) = write_json_pretty(&record_path, &record) {
        error!(error = %write_err, "failed to write provisioning record");
    }

    Err(err)
}

fn build_provision_command(
    config: &ProvisionConfig,
    request: &ProvisionRequest,
    environment: &str,
) -> CommandSpec {
    let mut spec = CommandSpec::new(&config.package_manager)
        .arg("env")
        .arg("create")
        .arg("--file")
        .arg(request.manifest_path.display().to_string());

    spec = match request.scope {
        ProvisionScope::User => spec
            .arg("--prefix")
            .arg(request.env_root.join(environment).display().to_string()),
        ProvisionScope::Shared => spec.arg("--name").arg(environment),
    };

    if request.assume_yes {
        spec = spec.arg("--yes");
    }
    spec.interactive = !request.assume_yes;
    spec
}

fn classify_provision_failure(output: &CommandOutput) -> ProvisionFailure {
    let text = format!("{}\n{}", output.stderr, output.stdout);
    if STORAGE_MARKERS.iter().any(|marker| text.contains(marker)) {
        return ProvisionFailure::StorageExhausted;
    }
    if RESOLUTION_MARKERS.iter().any(|marker| text.contains(marker)) {
        return ProvisionFailure::DependencyResolution;
    }
    ProvisionFailure::Other
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::{ProvisionRequest, provision_environment};
    use crate::cli::ProvisionScope;
    use crate::config::ProvisionConfig;
    use crate::error::ProcedureError;
    use crate::runner::fake::{ScriptedRunner, failure, success};

    const MANIFEST: &str =
        "name: prt\nchannels: [conda-forge]\ndependencies:\n  - python=3.11\n  - pip: [pymultinest]\n";

    fn request(dir: &Path, file_name: &str, scope: ProvisionScope, yes: bool) -> ProvisionRequest {
        let manifest_path = dir.join(file_name);
        fs::write(&manifest_path, MANIFEST).expect("write manifest");
        ProvisionRequest {
            manifest_path,
            scope,
            env_root: dir.join("envs"),
            assume_yes: yes,
        }
    }

    #[test]
    fn user_scope_installs_under_env_root_and_records_success() {
        let dir = tempfile::tempdir().expect("tempdir");
        let request = request(dir.path(), "conda-prt.yml", ProvisionScope::User, true);
        let runner = ScriptedRunner::new(vec![success("done", 600.0)]);

        let record = provision_environment(&runner, &ProvisionConfig::default(), &request)
            .expect("provisioned");
        assert_eq!(record.environment, "prt");
        assert_eq!(record.status, "completed");

        let calls = runner.calls.borrow();
        let args = &calls[0].args;
        assert_eq!(calls[0].program, "conda");
        assert!(args.contains(&"--prefix".to_string()));
        assert!(args.contains(&"--yes".to_string()));
        assert!(!calls[0].interactive);
        assert!(dir.path().join("envs").join("prt.provision.json").exists());
    }

    #[test]
    fn interactive_shared_scope_uses_env_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let request = request(dir.path(), "conda-prt.yml", ProvisionScope::Shared, false);
        let runner = ScriptedRunner::new(vec![success("", 1.0)]);

        provision_environment(&runner, &ProvisionConfig::default(), &request).expect("ok");
        let calls = runner.calls.borrow();
        assert!(calls[0].interactive);
        assert!(calls[0].args.windows(2).any(|pair| pair == ["--name", "prt"]));
    }

    #[test]
    fn undiscoverable_manifest_never_reaches_package_manager() {
        let dir = tempfile::tempdir().expect("tempdir");
        let request = request(dir.path(), "environment.yml", ProvisionScope::User, true);
        let runner = ScriptedRunner::new(Vec::new());

        let err = provision_environment(&runner, &ProvisionConfig::default(), &request)
            .expect_err("discovery error");
        assert!(matches!(
            err.downcast_ref::<ProcedureError>(),
            Some(ProcedureError::Discovery { .. })
        ));
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn resolution_failure_surfaces_package_manager_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let request = request(dir.path(), "conda-prt.yml", ProvisionScope::User, true);
        let stderr = "ResolvePackageNotFound:\n  - petitRADTRANS=99";
        let runner = ScriptedRunner::new(vec![failure(stderr, 30.0)]);

        let err = provision_environment(&runner, &ProvisionConfig::default(), &request)
            .expect_err("resolution failure");
        match err.downcast_ref::<ProcedureError>() {
            Some(ProcedureError::DependencyResolution { stderr, .. }) => {
                assert!(stderr.contains("petitRADTRANS=99"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn long_resolution_report_is_kept_verbatim() {
        let dir = tempfile::tempdir().expect("tempdir");
        let request = request(dir.path(), "conda-prt.yml", ProvisionScope::User, true);
        let mut report = String::from("Could not solve for environment specs\n\n");
        for index in 0..60 {
            report.push_str(&format!("  - package-{index} requires libfoo >={index}\n"));
            if index % 10 == 9 {
                report.push('\n');
            }
        }
        report.push_str("ResolvePackageNotFound:\n  - petitRADTRANS=99\n");
        let runner = ScriptedRunner::new(vec![failure(&report, 30.0)]);

        let err = provision_environment(&runner, &ProvisionConfig::default(), &request)
            .expect_err("resolution failure");
        match err.downcast_ref::<ProcedureError>() {
            Some(ProcedureError::DependencyResolution { stderr, .. }) => {
                assert_eq!(stderr.as_str(), report.trim_end());
                assert!(stderr.starts_with("Could not solve for environment specs\n\n"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn storage_exhaustion_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let request = request(dir.path(), "conda-prt.yml", ProvisionScope::User, true);
        let runner = ScriptedRunner::new(vec![failure("OSError: [Errno 28] No space left on device", 5.0)]);

        let err = provision_environment(&runner, &ProvisionConfig::default(), &request)
            .expect_err("storage failure");
        assert!(matches!(
            err.downcast_ref::<ProcedureError>(),
            Some(ProcedureError::StorageExhausted { .. })
        ));
    }
}
