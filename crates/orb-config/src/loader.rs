// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::CoreConfig;

/// Ordered list of config file locations searched from lowest to highest
/// priority. Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("/etc/openrobobrain/config.yaml"));
    paths.push(PathBuf::from("/etc/openrobobrain/config.yml"));

    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("openrobobrain/config.yaml"));
        paths.push(cfg.join("openrobobrain/config.yml"));
    }
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/openrobobrain/config.yaml"));
    }

    paths.push(PathBuf::from("./openrobobrain.yaml"));
    paths.push(PathBuf::from("./openrobobrain.yml"));

    paths
}

/// Load configuration by merging all discovered YAML files plus an optional
/// explicit override (e.g. a `--config` CLI flag), highest precedence last.
pub fn load(extra: Option<&Path>) -> anyhow::Result<CoreConfig> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    let config: CoreConfig = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty())
    {
        CoreConfig::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };
    Ok(config)
}

/// Deep-merge `src` into `dst`; mapping nodes merge key-by-key, anything else
/// (scalars, sequences) is replaced wholesale by `src`.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
