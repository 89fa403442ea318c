use std::fs;
use std::path::{Path, PathBuf};

use crate::CliError;

pub const PASSWORD_ENV: &str = "STACKLINE_VAULT_PASSWORD";
pub const PASSWORD_FILE_ENV: &str = "STACKLINE_VAULT_PASSWORD_FILE";
pub const DEFAULT_PASSWORD_FILE: &str = ".stackline_vault_password";

fn split(passwords: &str) -> Vec<String> {
    passwords
        .trim_end_matches(['\r', '\n'])
        .split(',')
        .filter(|password| !password.is_empty())
        .map(str::to_string)
        .collect()
}

fn read_file(path: &Path) -> Result<Vec<String>, CliError> {
    let content = fs::read_to_string(path).map_err(|source| CliError::PasswordFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(split(&content))
}

/// Vault passwords, first source wins: the flag, the flag's file, the
/// password variable, the password-file variable, then the default file in
/// the home directory. No source yields an empty list.
///
/// # Errors
///
/// Returns an error when a named password file cannot be read.
pub fn discover_passwords(
    flag: Option<&str>,
    file: Option<&Path>,
) -> Result<Vec<String>, CliError> {
    discover_with(
        flag,
        file,
        |name| std::env::var(name).ok(),
        dirs::home_dir(),
    )
}

fn discover_with(
    flag: Option<&str>,
    file: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
    home: Option<PathBuf>,
) -> Result<Vec<String>, CliError> {
    if let Some(passwords) = flag.filter(|value| !value.is_empty()) {
        return Ok(split(passwords));
    }
    if let Some(path) = file {
        return read_file(path);
    }
    if let Some(passwords) = env(PASSWORD_ENV).filter(|value| !value.is_empty()) {
        return Ok(split(&passwords));
    }
    if let Some(path) = env(PASSWORD_FILE_ENV).filter(|value| !value.is_empty()) {
        return read_file(Path::new(&path));
    }

    match home.map(|home| home.join(DEFAULT_PASSWORD_FILE)) {
        Some(path) if path.is_file() => read_file(&path),
        _ => Ok(Vec::new()),
    }
}
