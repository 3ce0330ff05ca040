// Environment provisioner
//
// Prepares the interpreter and declared dependencies the producer runs under.
// Any failure aborts the run before the producer starts.

use crate::config::ProvisionConfig;
use crate::errors::ProvisionError;
use crate::models::Environment;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// Longest stderr excerpt carried into an error message
const MAX_ERROR_OUTPUT: usize = 2000;

/// Provisioner prepares the execution environment for a run
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(&self, workdir: &Path) -> Result<Environment, ProvisionError>;
}

/// Provisioner used when the producer needs nothing installed
#[derive(Debug, Clone, Default)]
pub struct NoopProvisioner;

#[async_trait]
impl Provisioner for NoopProvisioner {
    async fn provision(&self, _workdir: &Path) -> Result<Environment, ProvisionError> {
        debug!("Provisioning disabled, using the ambient environment");
        Ok(Environment::default())
    }
}

/// Build the provisioner the configuration asks for
pub fn from_config(config: &ProvisionConfig) -> Box<dyn Provisioner> {
    if config.enabled {
        Box::new(PythonProvisioner::new(config.clone()))
    } else {
        Box::new(NoopProvisioner)
    }
}

/// Parse a dependency manifest into its entries, preserving order.
///
/// Blank lines and `#` comments are dropped; duplicates are kept.
pub fn parse_manifest(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(strip_comment)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    match line.find(" #").or_else(|| line.find("\t#")) {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// Installer arguments for manifest entries; option lines are split into words
pub fn install_args(entries: &[String]) -> Vec<String> {
    entries
        .iter()
        .flat_map(|entry| {
            if entry.starts_with('-') {
                entry.split_whitespace().map(str::to_string).collect()
            } else {
                vec![entry.clone()]
            }
        })
        .collect()
}

/// True if the reported version satisfies the declared one.
///
/// `3.10` accepts `3.10`, `3.10.12` but not `3.100.1`.
pub fn version_satisfies(declared: &str, reported: &str) -> bool {
    let reported = reported
        .trim()
        .strip_prefix("Python ")
        .unwrap_or(reported.trim());
    reported == declared || reported.starts_with(&format!("{}.", declared))
}

/// Provisions a Python interpreter and installs the manifest with pip
pub struct PythonProvisioner {
    config: ProvisionConfig,
}

impl PythonProvisioner {
    pub fn new(config: ProvisionConfig) -> Self {
        Self { config }
    }

    async fn read_manifest(&self, workdir: &Path) -> Result<Vec<String>, ProvisionError> {
        let path = workdir.join(&self.config.manifest);
        let contents = tokio::fs::read_to_string(&path).await.map_err(|e| {
            ProvisionError::ManifestUnreadable {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(parse_manifest(&contents))
    }

    async fn check_version(&self, declared: &str, workdir: &Path) -> Result<(), ProvisionError> {
        let output = run(&self.config.interpreter, &["--version"], workdir)
            .await
            .map_err(|e| ProvisionError::InterpreterUnavailable {
                interpreter: self.config.interpreter.clone(),
                reason: e.to_string(),
            })?;

        // Older interpreters report their version on stderr
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reported = if stdout.trim().is_empty() {
            stderr.trim().to_string()
        } else {
            stdout.trim().to_string()
        };

        if !output.status.success() {
            return Err(ProvisionError::InterpreterUnavailable {
                interpreter: self.config.interpreter.clone(),
                reason: tail(&reported),
            });
        }

        if !version_satisfies(declared, &reported) {
            return Err(ProvisionError::VersionMismatch {
                declared: declared.to_string(),
                found: reported,
            });
        }

        info!(interpreter = %self.config.interpreter, version = %reported, "Interpreter version verified");
        Ok(())
    }

    /// Where the isolated environment goes. Never inside the working tree,
    /// since the publisher stages everything there.
    fn venv_location(
        &self,
        workdir: &Path,
    ) -> Result<(PathBuf, Option<Arc<TempDir>>), ProvisionError> {
        let Some(venv_dir) = &self.config.venv_dir else {
            let scratch = tempfile::Builder::new()
                .prefix("pipeline-env-")
                .tempdir()
                .map_err(|e| ProvisionError::EnvironmentCreationFailed(e.to_string()))?;
            return Ok((scratch.path().join("venv"), Some(Arc::new(scratch))));
        };

        let venv = std::env::temp_dir().join(venv_dir);
        if is_within(&venv, workdir) {
            return Err(ProvisionError::EnvironmentCreationFailed(format!(
                "{} is inside the working tree {}",
                venv.display(),
                workdir.display()
            )));
        }
        Ok((venv, None))
    }

    async fn create_venv(&self, venv: &Path, workdir: &Path) -> Result<(), ProvisionError> {
        let venv_arg = venv.display().to_string();
        let output = run(&self.config.interpreter, &["-m", "venv", &venv_arg], workdir)
            .await
            .map_err(|e| ProvisionError::EnvironmentCreationFailed(e.to_string()))?;

        if !output.status.success() {
            return Err(ProvisionError::EnvironmentCreationFailed(tail(
                &String::from_utf8_lossy(&output.stderr),
            )));
        }

        info!(venv = %venv.display(), "Isolated environment created");
        Ok(())
    }

    async fn install(
        &self,
        python: &Path,
        entries: &[String],
        workdir: &Path,
    ) -> Result<(), ProvisionError> {
        let mut args = vec![
            "-m".to_string(),
            "pip".to_string(),
            "install".to_string(),
            "--disable-pip-version-check".to_string(),
        ];
        args.extend(install_args(entries));
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        let program = python.display().to_string();
        let output = run(&program, &arg_refs, workdir)
            .await
            .map_err(|e| ProvisionError::InstallFailed(e.to_string()))?;

        if !output.status.success() {
            return Err(ProvisionError::InstallFailed(tail(
                &String::from_utf8_lossy(&output.stderr),
            )));
        }

        info!(packages = entries.len(), "Dependencies installed");
        Ok(())
    }
}

#[async_trait]
impl Provisioner for PythonProvisioner {
    #[instrument(skip(self), fields(manifest = %self.config.manifest.display()))]
    async fn provision(&self, workdir: &Path) -> Result<Environment, ProvisionError> {
        let entries = self.read_manifest(workdir).await?;
        debug!(entries = ?entries, "Dependency manifest read");

        if let Some(declared) = &self.config.interpreter_version {
            self.check_version(declared, workdir).await?;
        }

        let mut environment = Environment {
            packages: entries.clone(),
            interpreter: Some(PathBuf::from(&self.config.interpreter)),
            ..Default::default()
        };

        if self.config.isolated {
            let (venv, scratch) = self.venv_location(workdir)?;
            self.create_venv(&venv, workdir).await?;
            let bin_dir = venv_bin_dir(&venv);
            environment.interpreter = Some(bin_dir.join("python"));
            environment.bin_dir = Some(bin_dir);
            environment.root = Some(venv);
            environment.scratch = scratch;
        }

        if !entries.is_empty() {
            let python = environment
                .interpreter
                .clone()
                .unwrap_or_else(|| PathBuf::from(&self.config.interpreter));
            self.install(&python, &entries, workdir).await?;
        }

        Ok(environment)
    }
}

fn is_within(path: &Path, dir: &Path) -> bool {
    if path.starts_with(dir) {
        return true;
    }
    match (std::fs::canonicalize(dir), path.parent().map(std::fs::canonicalize)) {
        (Ok(dir), Some(Ok(parent))) => parent.starts_with(dir),
        _ => false,
    }
}

#[cfg(windows)]
fn venv_bin_dir(venv: &Path) -> PathBuf {
    venv.join("Scripts")
}

#[cfg(not(windows))]
fn venv_bin_dir(venv: &Path) -> PathBuf {
    venv.join("bin")
}

async fn run(program: &str, args: &[&str], cwd: &Path) -> std::io::Result<Output> {
    Command::new(program)
        .args(args)
        .current_dir(cwd)
        .kill_on_drop(true)
        .output()
        .await
}

fn tail(text: &str) -> String {
    let text = text.trim();
    if text.len() <= MAX_ERROR_OUTPUT {
        return text.to_string();
    }
    let mut start = text.len() - MAX_ERROR_OUTPUT;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest_keeps_order_and_duplicates() {
        let manifest = "requests==2.31.0\n\n# parsing\nbeautifulsoup4>=4.12 # html\nrequests==2.31.0\n";
        assert_eq!(
            parse_manifest(manifest),
            vec![
                "requests==2.31.0".to_string(),
                "beautifulsoup4>=4.12".to_string(),
                "requests==2.31.0".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_manifest_keeps_url_fragments() {
        let manifest = "pkg @ https://example.com/pkg.zip#sha256=abc\n";
        assert_eq!(
            parse_manifest(manifest),
            vec!["pkg @ https://example.com/pkg.zip#sha256=abc".to_string()]
        );
    }

    #[test]
    fn test_install_args_split_options() {
        let entries = vec![
            "--index-url https://mirror.example/simple".to_string(),
            "requests".to_string(),
        ];
        assert_eq!(
            install_args(&entries),
            vec![
                "--index-url".to_string(),
                "https://mirror.example/simple".to_string(),
                "requests".to_string(),
            ]
        );
    }

    #[test]
    fn test_version_satisfies() {
        assert!(version_satisfies("3.10", "Python 3.10.12"));
        assert!(version_satisfies("3.10", "3.10"));
        assert!(version_satisfies("3", "Python 3.11.0"));
        assert!(!version_satisfies("3.10", "Python 3.100.1"));
        assert!(!version_satisfies("3.10", "Python 3.9.18"));
    }

    #[test]
    fn test_tail_truncates_long_output() {
        let long = "x".repeat(MAX_ERROR_OUTPUT + 50);
        let t = tail(&long);
        assert!(t.starts_with("..."));
        assert_eq!(t.len(), MAX_ERROR_OUTPUT + 3);
    }

    #[tokio::test]
    async fn test_noop_provisioner() {
        let dir = tempfile::tempdir().unwrap();
        let env = NoopProvisioner.provision(dir.path()).await.unwrap();
        assert!(env.packages.is_empty());
        assert!(env.interpreter.is_none());
    }

    #[tokio::test]
    async fn test_missing_manifest_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = PythonProvisioner::new(ProvisionConfig {
            enabled: true,
            venv_dir: None,
            ..Default::default()
        });
        let result = provisioner.provision(dir.path()).await;
        assert!(matches!(
            result,
            Err(ProvisionError::ManifestUnreadable { .. })
        ));
    }

    #[cfg(unix)]
    mod with_fake_interpreter {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        /// Write an executable shell script standing in for python
        fn fake_python(dir: &Path, version: &str, pip_exit: i32) -> PathBuf {
            let script = format!(
                r#"#!/bin/sh
if [ "$1" = "--version" ]; then echo "Python {version}"; exit 0; fi
if [ "$1" = "-m" ] && [ "$2" = "venv" ]; then mkdir -p "$3/bin" && cp "$0" "$3/bin/python"; exit $?; fi
if [ "$1" = "-m" ] && [ "$2" = "pip" ]; then shift 4; echo "$@" > "$(dirname "$0")/installed.txt"; exit {pip_exit}; fi
exit 0
"#
            );
            let path = dir.join("fake-python");
            std::fs::write(&path, script).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn config(interpreter: &Path, version: Option<&str>, isolated: bool) -> ProvisionConfig {
            ProvisionConfig {
                enabled: true,
                interpreter: interpreter.display().to_string(),
                interpreter_version: version.map(str::to_string),
                manifest: PathBuf::from("requirements.txt"),
                isolated,
                venv_dir: None,
            }
        }

        fn tree_entries(dir: &Path) -> Vec<String> {
            let mut names: Vec<String> = std::fs::read_dir(dir)
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }

        #[tokio::test]
        async fn test_installs_manifest_in_order() {
            let tools = tempfile::tempdir().unwrap();
            let repo = tempfile::tempdir().unwrap();
            let python = fake_python(tools.path(), "3.11.4", 0);
            std::fs::write(repo.path().join("requirements.txt"), "requests\nbs4\n").unwrap();

            let provisioner = PythonProvisioner::new(config(&python, Some("3.11"), false));
            let env = provisioner.provision(repo.path()).await.unwrap();

            assert_eq!(env.packages, vec!["requests".to_string(), "bs4".to_string()]);
            let installed =
                std::fs::read_to_string(tools.path().join("installed.txt")).unwrap();
            assert_eq!(installed.trim(), "requests bs4");
        }

        #[tokio::test]
        async fn test_version_mismatch_is_fatal() {
            let tools = tempfile::tempdir().unwrap();
            let repo = tempfile::tempdir().unwrap();
            let python = fake_python(tools.path(), "3.9.18", 0);
            std::fs::write(repo.path().join("requirements.txt"), "requests\n").unwrap();

            let provisioner = PythonProvisioner::new(config(&python, Some("3.10"), false));
            let result = provisioner.provision(repo.path()).await;
            assert!(matches!(result, Err(ProvisionError::VersionMismatch { .. })));
            assert!(!tools.path().join("installed.txt").exists());
        }

        #[tokio::test]
        async fn test_install_failure_is_fatal() {
            let tools = tempfile::tempdir().unwrap();
            let repo = tempfile::tempdir().unwrap();
            let python = fake_python(tools.path(), "3.11.4", 1);
            std::fs::write(repo.path().join("requirements.txt"), "no-such-package\n").unwrap();

            let provisioner = PythonProvisioner::new(config(&python, None, false));
            let result = provisioner.provision(repo.path()).await;
            assert!(matches!(result, Err(ProvisionError::InstallFailed(_))));
        }

        #[tokio::test]
        async fn test_isolated_environment_is_used_for_install() {
            let tools = tempfile::tempdir().unwrap();
            let repo = tempfile::tempdir().unwrap();
            let python = fake_python(tools.path(), "3.11.4", 0);
            std::fs::write(repo.path().join("requirements.txt"), "requests\n").unwrap();

            let provisioner = PythonProvisioner::new(config(&python, None, true));
            let env = provisioner.provision(repo.path()).await.unwrap();

            let root = env.root.clone().unwrap();
            let bin_dir = venv_bin_dir(&root);
            assert_eq!(env.bin_dir.as_deref(), Some(bin_dir.as_path()));
            assert_eq!(env.interpreter, Some(bin_dir.join("python")));
            assert!(bin_dir.join("installed.txt").exists());
            assert!(!tools.path().join("installed.txt").exists());
        }

        #[tokio::test]
        async fn test_isolated_environment_leaves_working_tree_untouched() {
            let tools = tempfile::tempdir().unwrap();
            let repo = tempfile::tempdir().unwrap();
            let python = fake_python(tools.path(), "3.11.4", 0);
            std::fs::write(repo.path().join("requirements.txt"), "requests\n").unwrap();

            let provisioner = PythonProvisioner::new(config(&python, None, true));
            let env = provisioner.provision(repo.path()).await.unwrap();

            let root = env.root.clone().unwrap();
            assert!(!root.starts_with(repo.path()));
            assert_eq!(tree_entries(repo.path()), vec!["requirements.txt".to_string()]);

            // The run-scoped directory goes away with the environment
            assert!(root.exists());
            drop(env);
            assert!(!root.exists());
        }

        #[tokio::test]
        async fn test_fixed_location_inside_working_tree_is_rejected() {
            let tools = tempfile::tempdir().unwrap();
            let repo = tempfile::tempdir().unwrap();
            let python = fake_python(tools.path(), "3.11.4", 0);
            std::fs::write(repo.path().join("requirements.txt"), "requests\n").unwrap();

            let provisioner = PythonProvisioner::new(ProvisionConfig {
                venv_dir: Some(repo.path().join(".venv")),
                ..config(&python, None, true)
            });
            let result = provisioner.provision(repo.path()).await;

            assert!(matches!(
                result,
                Err(ProvisionError::EnvironmentCreationFailed(_))
            ));
            assert!(!repo.path().join(".venv").exists());
        }

        #[tokio::test]
        async fn test_empty_manifest_skips_install() {
            let tools = tempfile::tempdir().unwrap();
            let repo = tempfile::tempdir().unwrap();
            let python = fake_python(tools.path(), "3.11.4", 1);
            std::fs::write(repo.path().join("requirements.txt"), "# nothing yet\n").unwrap();

            let provisioner = PythonProvisioner::new(config(&python, None, false));
            let env = provisioner.provision(repo.path()).await.unwrap();
            assert!(env.packages.is_empty());
        }
    }
}
