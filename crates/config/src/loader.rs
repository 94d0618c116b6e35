use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::TrellisConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["trellis.toml", "trellis.yaml", "trellis.yml", "trellis.json"];

/// Load config from the given path (format chosen by extension).
pub fn load_config(path: &Path) -> anyhow::Result<TrellisConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<TrellisConfig> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    match ext {
        "toml" => toml::from_str(raw).map_err(|e| anyhow::anyhow!("parse {}: {e}", path.display())),
        "yaml" | "yml" => {
            serde_yaml::from_str(raw).map_err(|e| anyhow::anyhow!("parse {}: {e}", path.display()))
        },
        "json" => serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("parse {}: {e}", path.display())),
        other => Err(anyhow::anyhow!(
            "unsupported config extension '{other}' for {}",
            path.display()
        )),
    }
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./trellis.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/trellis/trellis.{toml,yaml,yml,json}` (user-global)
///
/// Returns `TrellisConfig::default()` if no config file is found.
#[must_use]
pub fn discover_and_load() -> TrellisConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    TrellisConfig::default()
}

fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    if let Some(dir) = config_dir() {
        for name in CONFIG_FILENAMES {
            let p = dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// User-global config directory (`~/.config/trellis/`).
#[must_use]
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "trellis").map(|d| d.config_dir().to_path_buf())
}
