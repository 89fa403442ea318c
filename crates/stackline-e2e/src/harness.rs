use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

static BUILD_STACKLINE: OnceLock<Result<(), String>> = OnceLock::new();

/// Variables cleared for every run so the host setup cannot leak in.
const ISOLATED_ENV: [&str; 7] = [
    "STACKLINE_VAULT_PASSWORD",
    "STACKLINE_VAULT_PASSWORD_FILE",
    "STACKLINE_LOG",
    "STACKLINE_EDITOR",
    "EDITOR",
    "AWS_PROFILE",
    "AWS_ENDPOINT_URL",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub command_line: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunResult {
    #[must_use]
    pub fn transcript(&self) -> String {
        format!(
            "$ {}\n[exit: {}]\n[stdout]\n{}[stderr]\n{}",
            self.command_line, self.exit_code, self.stdout, self.stderr
        )
    }
}

/// Run the `stackline` binary inside `workdir`.
///
/// `NO_PAGER=1` is always set and `HOME` points at `workdir`, so output is
/// deterministic and no host password file or AWS profile is picked up.
/// Instance metadata lookups are disabled.
///
/// # Errors
///
/// Returns an error if building or running the binary fails.
pub fn run_stackline(
    workdir: &Path,
    args: &[&str],
    env_overrides: &[(&str, &str)],
) -> Result<RunResult, String> {
    ensure_stackline_built()?;
    let bin = stackline_bin()?;

    let mut command = Command::new(bin);
    command.current_dir(workdir);
    for name in ISOLATED_ENV {
        command.env_remove(name);
    }
    command.env("NO_PAGER", "1");
    command.env("HOME", workdir);
    command.env("AWS_EC2_METADATA_DISABLED", "true");
    command.args(args);
    for (name, value) in env_overrides {
        command.env(name, value);
    }

    let output = command
        .output()
        .map_err(|error| format!("failed to run stackline: {error}"))?;

    let mut command_parts = vec!["stackline".to_string()];
    command_parts.extend(args.iter().map(|arg| (*arg).to_string()));

    Ok(RunResult {
        command_line: command_parts.join(" "),
        exit_code: output.status.code().unwrap_or(1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Write a text file, creating parent directories if needed.
///
/// # Errors
///
/// Returns an error if directories or file contents cannot be written.
pub fn write_file(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)
}

fn ensure_stackline_built() -> Result<(), String> {
    match BUILD_STACKLINE.get_or_init(|| {
        let status = Command::new("cargo")
            .arg("build")
            .arg("-q")
            .arg("-p")
            .arg("stackline")
            .status()
            .map_err(|error| format!("failed to build stackline binary: {error}"))?;

        if status.success() {
            Ok(())
        } else {
            Err(format!(
                "failed to build stackline binary: cargo exited with status {status}"
            ))
        }
    }) {
        Ok(()) => Ok(()),
        Err(error) => Err(error.clone()),
    }
}

fn stackline_bin() -> Result<PathBuf, String> {
    let mut path = std::env::current_exe()
        .map_err(|error| format!("failed to determine current executable: {error}"))?;
    if !path.pop() {
        return Err("failed to resolve test executable directory".to_string());
    }
    if path.ends_with("deps") {
        let _ = path.pop();
    }
    Ok(path.join(format!("stackline{}", std::env::consts::EXE_SUFFIX)))
}
