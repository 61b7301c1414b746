//! Database drivers: how to dump, restore and inspect each engine.
//!
//! Every driver is a set of command templates filled from [`DatabaseInfo`].
//! An option whose filled value is empty is left off the command line, so an
//! unset host or port falls back to the client's own default.

use std::io::Write;
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::info;

use super::error::BackupError;
use super::process::run_capture;
use crate::domain::error::WalletError;
use crate::ports::config_port::ConfigPort;

const IS_EMPTY_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection details for the database being backed up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub engine: String,
    pub name: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: String,
}

impl DatabaseInfo {
    pub fn new(engine: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Reads the `[backup]` section. `engine` and `name` are required.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, WalletError> {
        let optional = |key: &str| config.get_string("backup", key).unwrap_or_default();
        Ok(Self {
            engine: config.require_string("backup", "engine")?,
            name: config.require_string("backup", "name")?,
            user: optional("user"),
            password: optional("password"),
            host: optional("host"),
            port: optional("port"),
        })
    }

    fn fill(&self, template: &str, password_file: &str) -> String {
        template
            .replace("{user}", &self.user)
            .replace("{password}", &self.password)
            .replace("{host}", &self.host)
            .replace("{port}", &self.port)
            .replace("{name}", &self.name)
            .replace("{PASSWORD_FILE}", password_file)
    }
}

#[derive(Debug, Clone, Copy)]
enum Arg {
    /// A flag and its value, both dropped when the value fills to empty.
    Opt(&'static str, &'static str),
    /// A bare value, dropped when it fills to empty.
    Value(&'static str),
    /// Always passed as is.
    Literal(&'static str),
}

struct CommandTemplate {
    program: &'static str,
    args: &'static [Arg],
}

struct PasswordOption {
    env: Option<(&'static str, &'static str)>,
    option: Option<Arg>,
    file_contents: &'static str,
}

/// A filled template ready to spawn. The password file, if any, lives as long as this does.
#[derive(Debug)]
pub struct PreparedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    password_file: Option<NamedTempFile>,
}

impl PreparedCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
            password_file: None,
        }
    }

    pub fn has_password_file(&self) -> bool {
        self.password_file.is_some()
    }

    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command
    }
}

pub trait DatabaseDriver: Send + Sync {
    fn dump_command(&self) -> Result<PreparedCommand, BackupError>;

    /// Command that reads a dump on stdin and loads it.
    fn restore_command(&self) -> Result<PreparedCommand, BackupError>;

    /// True when the database has no tables.
    fn is_empty(&self) -> Result<bool, BackupError>;
}

struct EngineProfile {
    aliases: &'static [&'static str],
    dump: CommandTemplate,
    restore: CommandTemplate,
    is_empty: CommandTemplate,
    password: Option<PasswordOption>,
    /// The database is a local file that must exist before it can be inspected.
    file_based: bool,
}

const POSTGRES: EngineProfile = EngineProfile {
    aliases: &[
        "psql",
        "postgres",
        "postgresql",
        "django.db.backends.postgresql",
        "django.db.backends.postgresql_psycopg2",
    ],
    dump: CommandTemplate {
        program: "pg_dump",
        args: &[
            Arg::Opt("-U", "{user}"),
            Arg::Opt("--host", "{host}"),
            Arg::Opt("--port", "{port}"),
            Arg::Value("{name}"),
        ],
    },
    restore: CommandTemplate {
        program: "psql",
        args: &[
            Arg::Opt("-U", "{user}"),
            Arg::Opt("--host", "{host}"),
            Arg::Opt("--port", "{port}"),
            Arg::Opt("-d", "{name}"),
        ],
    },
    is_empty: CommandTemplate {
        program: "psql",
        args: &[
            Arg::Opt("-U", "{user}"),
            Arg::Opt("--host", "{host}"),
            Arg::Opt("--port", "{port}"),
            Arg::Value("{name}"),
            Arg::Literal("-c"),
            Arg::Literal(
                "select count(*) from information_schema.tables where table_schema = 'public'",
            ),
            Arg::Literal("-t"),
            Arg::Literal("-A"),
        ],
    },
    password: Some(PasswordOption {
        env: Some(("PGPASSFILE", "{PASSWORD_FILE}")),
        option: None,
        file_contents: "localhost:*:*:{user}:{password}",
    }),
    file_based: false,
};

const MYSQL: EngineProfile = EngineProfile {
    aliases: &["mysql", "django.db.backends.mysql"],
    dump: CommandTemplate {
        program: "mysqldump",
        args: &[
            Arg::Opt("--user", "{user}"),
            Arg::Opt("--host", "{host}"),
            Arg::Opt("--port", "{port}"),
            Arg::Value("{name}"),
        ],
    },
    restore: CommandTemplate {
        program: "mysql",
        args: &[
            Arg::Opt("--user", "{user}"),
            Arg::Opt("--host", "{host}"),
            Arg::Opt("--port", "{port}"),
            Arg::Opt("-D", "{name}"),
        ],
    },
    is_empty: CommandTemplate {
        program: "mysql",
        args: &[
            Arg::Opt("--user", "{user}"),
            Arg::Opt("--host", "{host}"),
            Arg::Opt("--port", "{port}"),
            Arg::Opt("-D", "{name}"),
            Arg::Literal("-e"),
            Arg::Value("select count(*) from information_schema.tables where table_schema = '{name}'"),
            Arg::Literal("--batch"),
            Arg::Literal("-s"),
        ],
    },
    password: Some(PasswordOption {
        env: None,
        // mysql only honours --defaults-extra-file as its first argument.
        option: Some(Arg::Value("--defaults-extra-file={PASSWORD_FILE}")),
        file_contents: "[client]\nuser={user}\npassword={password}",
    }),
    file_based: false,
};

const SQLITE: EngineProfile = EngineProfile {
    aliases: &["sqlite3", "sqlite", "django.db.backends.sqlite3"],
    dump: CommandTemplate {
        program: "sqlite3",
        args: &[Arg::Value("{name}"), Arg::Literal(".dump")],
    },
    restore: CommandTemplate {
        program: "sqlite3",
        args: &[Arg::Value("{name}")],
    },
    is_empty: CommandTemplate {
        program: "sqlite3",
        args: &[
            Arg::Value("{name}"),
            Arg::Literal("select count(*) from sqlite_master where type='table'"),
        ],
    },
    password: None,
    file_based: true,
};

static DRIVERS: [&EngineProfile; 3] = [&POSTGRES, &MYSQL, &SQLITE];

/// A driver backed by command templates.
pub struct TemplateDriver {
    info: DatabaseInfo,
    profile: &'static EngineProfile,
}

impl TemplateDriver {
    fn prepare(&self, template: &CommandTemplate) -> Result<PreparedCommand, BackupError> {
        let mut args: Vec<Arg> = template.args.to_vec();
        let mut env = Vec::new();
        let mut password_file = None;
        let mut password_path = String::new();

        if let Some(password) = self.profile.password.as_ref().filter(|_| !self.info.password.is_empty()) {
            let mut file = NamedTempFile::new()?;
            file.write_all(self.info.fill(password.file_contents, "").as_bytes())?;
            file.flush()?;
            password_path = file.path().to_string_lossy().into_owned();
            password_file = Some(file);

            if let Some((key, value)) = password.env {
                env.push((key.to_string(), self.info.fill(value, &password_path)));
            }
            if let Some(option) = password.option {
                args.insert(0, option);
            }
        }

        let mut filled = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Arg::Opt(flag, value) => {
                    let value = self.info.fill(value, &password_path);
                    if !value.is_empty() {
                        filled.push(flag.to_string());
                        filled.push(value);
                    }
                }
                Arg::Value(value) => {
                    let value = self.info.fill(value, &password_path);
                    if !value.is_empty() {
                        filled.push(value);
                    }
                }
                Arg::Literal(value) => filled.push(value.to_string()),
            }
        }

        Ok(PreparedCommand {
            program: template.program.to_string(),
            args: filled,
            env,
            password_file,
        })
    }
}

impl DatabaseDriver for TemplateDriver {
    fn dump_command(&self) -> Result<PreparedCommand, BackupError> {
        self.prepare(&self.profile.dump)
    }

    fn restore_command(&self) -> Result<PreparedCommand, BackupError> {
        self.prepare(&self.profile.restore)
    }

    fn is_empty(&self) -> Result<bool, BackupError> {
        if self.profile.file_based && !Path::new(&self.info.name).exists() {
            return Err(BackupError::NoDatabase {
                path: self.info.name.clone(),
            });
        }

        let prepared = self.prepare(&self.profile.is_empty)?;
        let tables = run_capture(prepared.command(), "Find number of tables", IS_EMPTY_TIMEOUT)?;
        info!(tables = %tables, "counted tables in the database");
        Ok(tables == "0")
    }
}

/// Looks up the driver registered for `info.engine`.
pub fn driver_for(info: &DatabaseInfo) -> Result<Box<dyn DatabaseDriver>, BackupError> {
    let engine = info.engine.trim();
    DRIVERS
        .iter()
        .copied()
        .find(|profile| profile.aliases.contains(&engine))
        .map(|profile| {
            Box::new(TemplateDriver {
                info: info.clone(),
                profile,
            }) as Box<dyn DatabaseDriver>
        })
        .ok_or_else(|| BackupError::NoDbDriver {
            engine: info.engine.clone(),
        })
}
