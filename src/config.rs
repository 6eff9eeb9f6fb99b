//! Configuration loading from unravel.toml.
//!
//! Flags on the command line always win; the config file only supplies
//! defaults. Search order mirrors the usual tool convention:
//! - `unravel.toml` next to the analyzed package
//! - `unravel.toml` in any parent directory (first hit wins)
//! - built-in defaults
//!
//! ## Example
//!
//! ```toml
//! godoc = "http://localhost:6060"
//! fuse = true
//! exclude = ["zz_generated.go"]
//! ```

use std::path::Path;

use serde::Deserialize;

/// Tool configuration, resolved from disk.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Source file for this config (for verbose display).
    pub source: Option<String>,

    /// Default base URL for godoc links in rendered graphs.
    pub godoc: Option<String>,

    /// Default for the `-fuse` flag.
    pub fuse: Option<bool>,

    /// File basenames excluded from analysis (on top of `_test.go`).
    pub exclude: Vec<String>,
}

/// Raw config as deserialized from TOML.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
struct RawConfig {
    godoc: Option<String>,
    fuse: Option<bool>,
    exclude: Option<Vec<String>>,
}

impl Config {
    /// Load configuration for the given package directory.
    pub fn load(directory: &Path) -> Self {
        let mut current = Some(directory.to_path_buf());
        while let Some(dir) = current {
            let candidate = dir.join("unravel.toml");
            if candidate.exists() {
                if let Some(config) = Self::load_toml(&candidate) {
                    return config;
                }
            }
            current = dir.parent().map(|p| p.to_path_buf());
        }
        Self::default()
    }

    fn load_toml(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        let raw: RawConfig = toml::from_str(&content).ok()?;
        Some(Self {
            source: Some(path.display().to_string()),
            godoc: raw.godoc,
            fuse: raw.fuse,
            exclude: raw.exclude.unwrap_or_default(),
        })
    }

    /// True if the given file basename is excluded from analysis.
    pub fn excludes(&self, base: &str) -> bool {
        self.exclude.iter().any(|e| e == base)
    }

    /// Format config for verbose display.
    pub fn display_summary(&self) -> String {
        match &self.source {
            Some(source) => format!("   Config: {}", source),
            None => "   Config: (defaults)".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_when_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path());
        assert!(config.source.is_none());
        assert!(config.godoc.is_none());
        assert!(!config.excludes("alg.go"));
    }

    #[test]
    fn loads_from_package_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("unravel.toml")).unwrap();
        writeln!(f, "godoc = \"http://example:6060\"").unwrap();
        writeln!(f, "fuse = true").unwrap();
        writeln!(f, "exclude = [\"gen.go\"]").unwrap();

        let config = Config::load(dir.path());
        assert_eq!(config.godoc.as_deref(), Some("http://example:6060"));
        assert_eq!(config.fuse, Some(true));
        assert!(config.excludes("gen.go"));
        assert!(!config.excludes("main.go"));
    }

    #[test]
    fn walks_up_to_parent() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("pkg");
        std::fs::create_dir(&pkg).unwrap();
        std::fs::write(dir.path().join("unravel.toml"), "fuse = true\n").unwrap();

        let config = Config::load(&pkg);
        assert_eq!(config.fuse, Some(true));
    }
}
