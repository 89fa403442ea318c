use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::error::{VaultError, VaultFileError};
use crate::pool::{DEFAULT_WORKERS, TaskGroup};
use crate::vault;

fn read(path: &Path) -> Result<Vec<u8>, VaultFileError> {
    fs::read(path).map_err(|source| VaultFileError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn write(path: &Path, contents: &[u8]) -> Result<(), VaultFileError> {
    fs::write(path, contents).map_err(|source| VaultFileError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Encrypt every file in place with a single password.
///
/// # Errors
///
/// Returns an error unless exactly one password is given, or for the first
/// file that cannot be read, encrypted or written.
pub fn encrypt_files(paths: &[PathBuf], passwords: &[String]) -> Result<Vec<PathBuf>, VaultFileError> {
    let password = match passwords {
        [] => return Err(VaultFileError::NoPassword),
        [password] => password,
        _ => {
            return Err(VaultFileError::TooManyPasswords {
                count: passwords.len(),
            });
        }
    };

    let group = TaskGroup::new(DEFAULT_WORKERS)?;
    let mut done = group.run(paths.iter().cloned(), |path| {
        let plaintext = read(&path)?;
        let encrypted = vault::encrypt(&plaintext, password).map_err(|source| {
            VaultFileError::Codec {
                path: path.clone(),
                source,
            }
        })?;
        write(&path, &encrypted)?;
        info!(path = %path.display(), "encrypted");
        Ok::<_, VaultFileError>(path)
    })?;
    done.sort();
    Ok(done)
}

/// Decrypt every file in place, trying each password in order.
///
/// # Errors
///
/// Returns an error when no password is given, or for the first file that is
/// not encrypted or cannot be decrypted with any password.
pub fn decrypt_files(paths: &[PathBuf], passwords: &[String]) -> Result<Vec<PathBuf>, VaultFileError> {
    if passwords.is_empty() {
        return Err(VaultFileError::NoPassword);
    }

    let group = TaskGroup::new(DEFAULT_WORKERS)?;
    let mut done = group.run(paths.iter().cloned(), |path| {
        let encrypted = read(&path)?;
        if !vault::has_header(&encrypted) {
            return Err(VaultFileError::NotEncrypted { path });
        }

        let mut last_error = VaultError::ChecksumMismatch;
        for password in passwords {
            match vault::decrypt(password, &encrypted) {
                Ok(plaintext) => {
                    write(&path, &plaintext)?;
                    info!(path = %path.display(), "decrypted");
                    return Ok(path);
                }
                Err(error) => last_error = error,
            }
        }
        Err(VaultFileError::Codec {
            path,
            source: last_error,
        })
    })?;
    done.sort();
    Ok(done)
}

/// Editor environment variables, most specific first.
const EDITOR_VARIABLES: [&str; 2] = ["STACKLINE_EDITOR", "EDITOR"];
const DEFAULT_EDITOR: &str = "vi";

/// Decrypt `path` into a temporary buffer, let `launch` edit it, and encrypt
/// the result back with the password that opened the file.
///
/// Returns `false` when the buffer was left unchanged; the file is then not
/// rewritten.
///
/// # Errors
///
/// Returns an error when no password is given, the file is not encrypted or
/// cannot be decrypted, the buffer cannot be prepared, or `launch` fails.
pub fn edit_file(
    path: &Path,
    passwords: &[String],
    launch: impl FnOnce(&Path) -> Result<(), VaultFileError>,
) -> Result<bool, VaultFileError> {
    if passwords.is_empty() {
        return Err(VaultFileError::NoPassword);
    }
    let encrypted = read(path)?;
    if !vault::has_header(&encrypted) {
        return Err(VaultFileError::NotEncrypted {
            path: path.to_path_buf(),
        });
    }

    let mut opened = None;
    let mut last_error = VaultError::ChecksumMismatch;
    for password in passwords {
        match vault::decrypt(password, &encrypted) {
            Ok(plaintext) => {
                opened = Some((plaintext, password));
                break;
            }
            Err(error) => last_error = error,
        }
    }
    let Some((plaintext, password)) = opened else {
        return Err(VaultFileError::Codec {
            path: path.to_path_buf(),
            source: last_error,
        });
    };

    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|extension| format!(".{}", extension.to_string_lossy()))
        .unwrap_or_default();
    let mut buffer = tempfile::Builder::new()
        .prefix(&format!("{name}-edit-"))
        .suffix(&extension)
        .tempfile()
        .map_err(|source| VaultFileError::Buffer { source })?;
    buffer
        .write_all(&plaintext)
        .and_then(|()| buffer.flush())
        .map_err(|source| VaultFileError::Buffer { source })?;

    launch(buffer.path())?;

    let edited = read(buffer.path())?;
    if edited == plaintext {
        info!(path = %path.display(), "unchanged");
        return Ok(false);
    }
    let reencrypted = vault::encrypt(&edited, password).map_err(|source| VaultFileError::Codec {
        path: path.to_path_buf(),
        source,
    })?;
    write(path, &reencrypted)?;
    info!(path = %path.display(), "edited");
    Ok(true)
}

fn editor_command(lookup: impl Fn(&str) -> Option<String>) -> String {
    EDITOR_VARIABLES
        .iter()
        .filter_map(|name| lookup(name))
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_EDITOR.to_string())
}

/// Open `path` in the user's editor and wait for it to exit.
///
/// The editor comes from `STACKLINE_EDITOR`, then `EDITOR`, then `vi`, and
/// may carry arguments.
///
/// # Errors
///
/// Returns an error when the editor cannot be found or started, or exits
/// unsuccessfully.
pub fn launch_editor(path: &Path) -> Result<(), VaultFileError> {
    let editor = editor_command(|name| std::env::var(name).ok());
    let mut words = editor.split_whitespace();
    let program = words.next().unwrap_or(DEFAULT_EDITOR);
    let binary = which::which(program).map_err(|source| VaultFileError::EditorNotFound {
        editor: editor.clone(),
        source,
    })?;

    debug!(editor = %binary.display(), path = %path.display(), "launching editor");
    let status = Command::new(&binary)
        .args(words)
        .arg(path)
        .status()
        .map_err(|source| VaultFileError::Editor {
            editor: editor.clone(),
            source,
        })?;
    if status.success() {
        Ok(())
    } else {
        Err(VaultFileError::EditorFailed { editor, status })
    }
}
