//! Backup and restore failures.

fn describe_code(code: &Option<i32>) -> String {
    code.map(|c| c.to_string()).unwrap_or_else(|| "none".into())
}

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("it seems you need to install {command} for {desc}")]
    NoCommand { command: String, desc: String },

    #[error("{desc} failed (exit code {})", describe_code(.exit_code))]
    FailedToRun { desc: String, exit_code: Option<i32> },

    #[error("gpg didn't even start: {reason}")]
    GpgFailedToStart { reason: String },

    #[error("the backup file at '{path}' doesn't exist")]
    BadBackupFile { path: String },

    #[error("won't restore to a database that isn't empty")]
    NonEmptyDatabase,

    #[error("couldn't find driver for engine {engine}")]
    NoDbDriver { engine: String },

    #[error("there was no sqlite database at {path}")]
    NoDatabase { path: String },

    #[error("no gpg recipients configured")]
    NoRecipients,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&BackupError> for std::process::ExitCode {
    fn from(err: &BackupError) -> Self {
        let code: u8 = match err {
            BackupError::Io(_) => 1,
            BackupError::NoRecipients => 2,
            BackupError::NonEmptyDatabase | BackupError::BadBackupFile { .. } => 6,
            BackupError::NoCommand { .. }
            | BackupError::NoDbDriver { .. }
            | BackupError::NoDatabase { .. } => 7,
            BackupError::FailedToRun { .. } | BackupError::GpgFailedToStart { .. } => 8,
        };
        std::process::ExitCode::from(code)
    }
}
