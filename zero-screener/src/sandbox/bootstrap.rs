//! Interpreter bootstrap.
//!
//! Run once at startup: confirm the interpreter launches, then make sure
//! the analysis packages screeners expect are importable.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::{info, warn};
use zero_common::ExecutionConfig;

const PROBE_TIMEOUT: Duration = Duration::from_secs(15);
const INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

const FIND_SPEC: &str =
    "import importlib.util,sys; sys.exit(0 if importlib.util.find_spec(sys.argv[1]) else 1)";

/// What the bootstrap learned about the interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterInfo {
    pub version: String,
    /// Required packages still missing after any install attempt
    pub missing_packages: Vec<String>,
}

struct ProbeOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

async fn probe(interpreter: &str, args: &[&str], timeout: Duration) -> Result<ProbeOutput> {
    let child = Command::new(interpreter)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to launch interpreter '{}'", interpreter))?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .with_context(|| format!("'{} {}' timed out", interpreter, args.join(" ")))??;

    Ok(ProbeOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

async fn has_package(interpreter: &str, package: &str) -> bool {
    match probe(interpreter, &["-c", FIND_SPEC, package], PROBE_TIMEOUT).await {
        Ok(out) => out.success,
        Err(e) => {
            warn!(package, error = %e, "Package probe failed");
            false
        }
    }
}

async fn install(interpreter: &str, package: &str) {
    let args = [
        "-m",
        "pip",
        "install",
        "--quiet",
        "--disable-pip-version-check",
        package,
    ];
    match probe(interpreter, &args, INSTALL_TIMEOUT).await {
        Ok(out) if out.success => info!(package, "Installed package"),
        Ok(out) => warn!(
            package,
            stderr = %zero_common::util::tail_with_ellipsis(&out.stderr, 500),
            "Package install failed"
        ),
        Err(e) => warn!(package, error = %e, "Package install failed"),
    }
}

/// Verify the interpreter and its required packages.
///
/// An interpreter that cannot be launched is fatal. Missing packages are
/// not: screeners that avoid them still run.
pub async fn bootstrap(config: &ExecutionConfig) -> Result<InterpreterInfo> {
    let interpreter = config.interpreter.as_str();

    let version = probe(interpreter, &["--version"], PROBE_TIMEOUT).await?;
    if !version.success {
        bail!(
            "interpreter '{}' failed its version check: {}",
            interpreter,
            version.stderr
        );
    }
    // Older interpreters print the version on stderr
    let version = if version.stdout.is_empty() {
        version.stderr
    } else {
        version.stdout
    };
    info!(interpreter, version = %version, "Interpreter available");

    let mut missing_packages = Vec::new();
    for package in &config.required_packages {
        if has_package(interpreter, package).await {
            continue;
        }
        if config.auto_install {
            warn!(package = %package, "Required package missing, installing");
            install(interpreter, package).await;
            if has_package(interpreter, package).await {
                continue;
            }
        }
        warn!(package = %package, "Required package unavailable");
        missing_packages.push(package.clone());
    }

    Ok(InterpreterInfo {
        version,
        missing_packages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(interpreter: &str, packages: &[&str]) -> ExecutionConfig {
        ExecutionConfig {
            interpreter: interpreter.to_string(),
            required_packages: packages.iter().map(|p| p.to_string()).collect(),
            auto_install: false,
            ..ExecutionConfig::default()
        }
    }

    fn python() -> Option<&'static str> {
        ["python3", "python"].into_iter().find(|p| {
            std::process::Command::new(p)
                .arg("--version")
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
        })
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_fatal() {
        let err = bootstrap(&config("zero-screener-no-such-python", &[]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to launch"));
    }

    #[tokio::test]
    async fn test_reports_version_and_missing_packages() {
        let Some(py) = python() else {
            eprintln!("python not available, skipping");
            return;
        };
        let info = bootstrap(&config(py, &["json", "zero_screener_no_such_pkg"]))
            .await
            .unwrap();
        assert!(info.version.starts_with("Python"));
        assert_eq!(info.missing_packages, vec!["zero_screener_no_such_pkg"]);
    }
}
