use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Once,
};

use dirs::home_dir;

use crate::errors::Result;

const DEFAULT_DIR_NAME: &str = ".bank_ledger";
const HOME_ENV: &str = "BANK_LEDGER_HOME";
const ACCOUNTS_DIR: &str = "accounts";
const CONFIG_DIR: &str = "config";
const CONFIG_FILE: &str = "config.json";

static TRACING_INIT: Once = Once::new();

/// Initializes the global tracing subscriber with sensible defaults.
///
/// `RUST_LOG` directives are honoured; the crate itself logs at `info` unless
/// overridden. Output goes to stderr so stdout stays machine-readable.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{filter::LevelFilter, fmt, EnvFilter};

        let filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::WARN.into())
            .from_env_lossy()
            .add_directive(
                "bank_ledger=info"
                    .parse()
                    .unwrap_or_else(|_| LevelFilter::INFO.into()),
            );

        let _ = fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

/// Returns the application data directory, defaulting to `~/.bank_ledger`.
pub fn app_data_dir() -> PathBuf {
    if let Some(custom) = env::var_os(HOME_ENV) {
        return PathBuf::from(custom);
    }
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_DIR_NAME)
}

/// Creates `path` and any missing parents.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Resolves the on-disk layout beneath a data directory.
pub struct PathResolver;

impl PathResolver {
    pub fn base_dir() -> PathBuf {
        app_data_dir()
    }

    pub fn resolve_base(root: Option<PathBuf>) -> PathBuf {
        root.unwrap_or_else(Self::base_dir)
    }

    pub fn accounts_dir_in(base: &Path) -> PathBuf {
        base.join(ACCOUNTS_DIR)
    }

    pub fn config_dir_in(base: &Path) -> PathBuf {
        base.join(CONFIG_DIR)
    }

    pub fn config_file_in(base: &Path) -> PathBuf {
        Self::config_dir_in(base).join(CONFIG_FILE)
    }
}
