//! gpg invocations for encrypting dumps and decrypting backups.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use super::error::BackupError;
use super::process::Supervised;

/// How long gpg gets to reject its arguments (unknown recipients, bad homedir).
const START_CHECK: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default)]
pub struct Encryptor {
    gpg_home: Option<PathBuf>,
}

impl Encryptor {
    pub fn new(gpg_home: Option<PathBuf>) -> Self {
        Self { gpg_home }
    }

    pub fn encrypt_args(&self, recipients: &[String], destination: &Path) -> Vec<String> {
        let mut args = vec!["--trust-model".to_string(), "always".to_string()];
        for recipient in recipients {
            args.push("-r".into());
            args.push(recipient.clone());
        }
        args.push("--output".into());
        args.push(destination.to_string_lossy().into_owned());
        args.push("-e".into());
        self.push_homedir(&mut args);
        args
    }

    pub fn decrypt_args(&self, location: &Path) -> Vec<String> {
        let mut args = vec![
            "--trust-model".to_string(),
            "always".to_string(),
            "-d".to_string(),
            "--no-tty".to_string(),
        ];
        self.push_homedir(&mut args);
        args.push(location.to_string_lossy().into_owned());
        args
    }

    fn push_homedir(&self, args: &mut Vec<String>) {
        if let Some(home) = &self.gpg_home {
            args.push("--homedir".into());
            args.push(home.to_string_lossy().into_owned());
        }
    }

    /// Starts gpg writing ciphertext of `input` to `destination`.
    ///
    /// Fails fast with `GpgFailedToStart` when gpg exits with an error during
    /// its first half second.
    pub fn encrypt(
        &self,
        input: Stdio,
        recipients: &[String],
        destination: &Path,
    ) -> Result<Supervised, BackupError> {
        let mut command = Command::new("gpg");
        command.args(self.encrypt_args(recipients, destination));
        let mut process = Supervised::spawn(command, "Encrypting something", input, Stdio::null())?;

        if let Some(status) = process.wait_for(START_CHECK)? {
            if !status.success() {
                return Err(BackupError::GpgFailedToStart {
                    reason: format!("gpg exited with {status}"),
                });
            }
        }
        Ok(process)
    }

    /// Starts gpg decrypting `location`; plaintext is on the process's stdout.
    pub fn decrypt(&self, location: &Path) -> Result<Supervised, BackupError> {
        let mut command = Command::new("gpg");
        command.args(self.decrypt_args(location));
        Supervised::spawn(command, "Decrypting something", Stdio::null(), Stdio::piped())
    }
}
