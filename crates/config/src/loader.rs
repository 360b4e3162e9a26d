use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::schema::ParleyConfig;

const CONFIG_FILENAME: &str = "parley.toml";

/// Load config from the given path.
pub fn load_config(path: &Path) -> anyhow::Result<ParleyConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
    Ok(cfg)
}

/// Discover and load config from standard locations, then apply `PARLEY_*`
/// environment overrides.
///
/// Search order:
/// 1. `./parley.toml` (project-local)
/// 2. `~/.config/parley/parley.toml` (user-global)
///
/// Returns defaults (plus overrides) when no file is found; a file that fails
/// to parse is logged and ignored rather than fatal.
pub fn discover_and_load() -> ParleyConfig {
    let mut cfg = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            match load_config(&path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(error = %e, "config file ignored");
                    ParleyConfig::default()
                }
            }
        }
        None => ParleyConfig::default(),
    };
    apply_overrides(&mut cfg, |key| std::env::var(key).ok());
    cfg
}

fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILENAME);
    if local.is_file() {
        return Some(local);
    }
    let global = dirs_next::config_dir()?.join("parley").join(CONFIG_FILENAME);
    global.is_file().then_some(global)
}

/// Apply environment-style overrides from `get`. Split out from the process
/// environment so it can be exercised hermetically.
pub fn apply_overrides(
    cfg: &mut ParleyConfig,
    get: impl Fn(&str) -> Option<String>,
) {
    if let Some(bind) = get("PARLEY_BIND") {
        cfg.gateway.bind = bind;
    }
    if let Some(port) = get("PARLEY_PORT") {
        match port.parse() {
            Ok(port) => cfg.gateway.port = port,
            Err(_) => warn!(%port, "ignoring unparseable PARLEY_PORT"),
        }
    }
    if let Some(path) = get("PARLEY_DB") {
        cfg.database.path = path.into();
    }
    if let Some(secret) = get("PARLEY_AUTH_SECRET") {
        cfg.auth.secret = secret;
    }
    if let Some(ttl) = get("PARLEY_TOKEN_TTL_SECS") {
        match ttl.parse() {
            Ok(ttl) => cfg.auth.token_ttl_secs = ttl,
            Err(_) => warn!(%ttl, "ignoring unparseable PARLEY_TOKEN_TTL_SECS"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_usable() {
        let cfg = ParleyConfig::default();
        assert_eq!(cfg.gateway.bind, "127.0.0.1");
        assert_eq!(cfg.gateway.port, 4455);
        assert!(cfg.auth.secret.is_empty());
    }

    #[test]
    fn partial_file_keeps_defaults_elsewhere() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[gateway]\nport = 9000\n\n[auth]\nsecret = \"hunter2\""
        )
        .unwrap();

        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.gateway.port, 9000);
        assert_eq!(cfg.gateway.bind, "127.0.0.1");
        assert_eq!(cfg.auth.secret, "hunter2");
        assert_eq!(cfg.database.path, PathBuf::from("parley.db"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "gateway = \"not a table\"").unwrap();
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn overrides_take_precedence() {
        let mut cfg = ParleyConfig::default();
        apply_overrides(&mut cfg, |key| match key {
            "PARLEY_PORT" => Some("7777".into()),
            "PARLEY_AUTH_SECRET" => Some("s3cret".into()),
            _ => None,
        });
        assert_eq!(cfg.gateway.port, 7777);
        assert_eq!(cfg.auth.secret, "s3cret");
        assert_eq!(cfg.gateway.bind, "127.0.0.1");
    }

    #[test]
    fn unparseable_override_is_ignored() {
        let mut cfg = ParleyConfig::default();
        apply_overrides(&mut cfg, |key| {
            (key == "PARLEY_PORT").then(|| "not-a-port".into())
        });
        assert_eq!(cfg.gateway.port, 4455);
    }
}
