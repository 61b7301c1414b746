//! Encrypted database backups.
//!
//! A backup pipes the engine's dump command straight into `gpg -e`, so the
//! plaintext never touches the disk. A restore pipes `gpg -d` into the
//! engine's restore command, and only runs against a database with no tables.

pub mod drivers;
pub mod encryption;
pub mod error;
pub mod process;

pub use drivers::{DatabaseDriver, DatabaseInfo, PreparedCommand, driver_for};
pub use encryption::Encryptor;
pub use error::BackupError;

use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing::{info, warn};

use process::{Supervised, check_for_command};

const DUMP_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);
const RESTORE_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);
/// gpg drains its input after the producer exits, so it only needs a short grace period.
const GPG_FINISH_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub fn make_backup_filename() -> String {
    format!("db_backup_{}.gpg", Utc::now().timestamp())
}

/// Strips a `file://` scheme. Anything that isn't a file URL is returned unchanged.
pub fn sanitise_path(path: &str) -> PathBuf {
    match url::Url::parse(path) {
        Ok(url) if url.scheme() == "file" => {
            let raw = url.path();
            let decoded = urlencoding::decode(raw)
                .map(|p| p.into_owned())
                .unwrap_or_else(|_| raw.to_string());
            let mut local = url.host_str().unwrap_or_default().to_string();
            local.push_str(&decoded);
            PathBuf::from(local)
        }
        _ => PathBuf::from(path),
    }
}

/// Dumps the database described by `info` into a new encrypted file in `dir`.
pub fn backup(
    info: &DatabaseInfo,
    recipients: &[String],
    dir: &Path,
    gpg_home: Option<PathBuf>,
) -> Result<PathBuf, BackupError> {
    let driver = driver_for(info)?;
    backup_with(
        driver.as_ref(),
        &Encryptor::new(gpg_home),
        recipients,
        dir,
        &make_backup_filename(),
    )
}

pub fn backup_with(
    driver: &dyn DatabaseDriver,
    encryptor: &Encryptor,
    recipients: &[String],
    dir: &Path,
    filename: &str,
) -> Result<PathBuf, BackupError> {
    if recipients.is_empty() {
        return Err(BackupError::NoRecipients);
    }
    let destination = dir.join(filename);

    let dump = driver.dump_command()?;
    check_for_command(&dump.program, "Dump command")?;
    check_for_command("gpg", "Encrypting something")?;

    match dump_into_gpg(&dump, encryptor, recipients, &destination) {
        Ok(()) => {
            info!(path = %destination.display(), "backup written");
            Ok(destination)
        }
        Err(e) => {
            if destination.exists() {
                if let Err(remove) = std::fs::remove_file(&destination) {
                    warn!(path = %destination.display(), error = %remove, "could not remove partial backup");
                }
            }
            Err(e)
        }
    }
}

fn dump_into_gpg(
    dump: &PreparedCommand,
    encryptor: &Encryptor,
    recipients: &[String],
    destination: &Path,
) -> Result<(), BackupError> {
    let mut dumper = Supervised::spawn(dump.command(), "Dump command", Stdio::null(), Stdio::piped())?;
    let plaintext = dumper
        .take_stdout()
        .ok_or_else(|| io::Error::other("dump command has no stdout"))?;

    let gpg = encryptor.encrypt(Stdio::from(plaintext), recipients, destination)?;
    dumper.finish(DUMP_TIMEOUT)?;
    gpg.finish(GPG_FINISH_TIMEOUT)
}

/// Restores `from` (a path or `file://` URL) into the database described by `info`.
pub fn restore(info: &DatabaseInfo, from: &str, gpg_home: Option<PathBuf>) -> Result<(), BackupError> {
    let driver = driver_for(info)?;
    restore_with(driver.as_ref(), &Encryptor::new(gpg_home), from)
}

pub fn restore_with(
    driver: &dyn DatabaseDriver,
    encryptor: &Encryptor,
    from: &str,
) -> Result<(), BackupError> {
    let location = sanitise_path(from);
    if !location.exists() {
        return Err(BackupError::BadBackupFile {
            path: location.to_string_lossy().into_owned(),
        });
    }

    if !driver.is_empty()? {
        return Err(BackupError::NonEmptyDatabase);
    }

    let restore = driver.restore_command()?;
    check_for_command(&restore.program, "Restore command")?;
    check_for_command("gpg", "Decrypting something")?;

    let mut gpg = encryptor.decrypt(&location)?;
    let plaintext = gpg
        .take_stdout()
        .ok_or_else(|| io::Error::other("gpg has no stdout"))?;
    let restorer = Supervised::spawn(
        restore.command(),
        "Restore command",
        Stdio::from(plaintext),
        Stdio::null(),
    )?;

    restorer.finish(RESTORE_TIMEOUT)?;
    gpg.finish(GPG_FINISH_TIMEOUT)?;
    info!(path = %location.display(), "database restored");
    Ok(())
}
