//! Optional project configuration, read from `tsumiki.toml`.
//!
//! Every key has a default matching the conventional layout, so a project
//! without the file builds just fine. Relative paths are resolved against the
//! project root.

use std::fs;
use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::adapter::scripts::ScriptStrategy;
use crate::adapter::styles::DEFAULT_BROWSERS;
use crate::error::ConfigurationError;

pub const CONFIG_FILE: &str = "tsumiki.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// The output root.
    pub output: Utf8PathBuf,
    /// Where optimized images are kept between runs.
    pub cache: Utf8PathBuf,
    /// How scripts are built.
    pub scripts: ScriptStrategy,
    /// Port of the dev server, any free port is used when unset.
    pub port: Option<u16>,
    /// Image compression effort, `0..=7`.
    pub compression_level: u8,
    /// Browserslist query the style sheets are prefixed for.
    pub browsers: String,
    pub sources: SourceLayout,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output: "build".into(),
            cache: ".cache".into(),
            scripts: ScriptStrategy::default(),
            port: None,
            compression_level: 7,
            browsers: DEFAULT_BROWSERS.to_string(),
            sources: SourceLayout::default(),
        }
    }
}

/// Source directory of each asset kind.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceLayout {
    /// Layouts and partials, pages live in `pages/` below it.
    pub templates: Utf8PathBuf,
    pub styles: Utf8PathBuf,
    pub scripts: Utf8PathBuf,
    /// Raster images, searched recursively.
    pub images: Utf8PathBuf,
    /// Vector icons that end up in the sprite sheet.
    pub icons: Utf8PathBuf,
    pub fonts: Utf8PathBuf,
    /// Files copied as they are into the output root.
    pub files: Utf8PathBuf,
}

impl Default for SourceLayout {
    fn default() -> Self {
        Self {
            templates: "src/templates".into(),
            styles: "src/scss".into(),
            scripts: "src/js".into(),
            images: "src/img".into(),
            icons: "src/img/svg".into(),
            fonts: "src/fonts".into(),
            files: "src".into(),
        }
    }
}

impl Config {
    /// Reads `tsumiki.toml` from `root`. A missing file means defaults.
    pub fn load(root: &Utf8Path) -> Result<Self, ConfigurationError> {
        let path = root.join(CONFIG_FILE);

        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("no {CONFIG_FILE}, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigurationError::ReadConfig(path, e)),
        };

        toml::from_str(&text).map_err(|e| ConfigurationError::ParseConfig(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    #[test]
    fn missing_file_means_defaults() {
        let (_dir, root) = tempdir();
        assert_eq!(Config::load(&root).unwrap(), Config::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let (_dir, root) = tempdir();
        let text = r#"
output = "dist"
scripts = "concat"
port = 8080

[sources]
templates = "src/pug"
"#;
        fs::write(root.join(CONFIG_FILE), text).unwrap();

        let config = Config::load(&root).unwrap();
        assert_eq!(config.output, "dist");
        assert_eq!(config.scripts, ScriptStrategy::Concat);
        assert_eq!(config.port, Some(8080));
        assert_eq!(config.sources.templates, "src/pug");
        assert_eq!(config.sources.styles, "src/scss");
        assert_eq!(config.cache, ".cache");
        assert_eq!(config.browsers, "> 0.1%");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let (_dir, root) = tempdir();
        fs::write(root.join(CONFIG_FILE), "outptu = \"dist\"").unwrap();

        let err = Config::load(&root).unwrap_err();
        assert!(matches!(err, ConfigurationError::ParseConfig(..)));
    }

    #[test]
    fn unknown_script_strategy_is_rejected() {
        let (_dir, root) = tempdir();
        fs::write(root.join(CONFIG_FILE), "scripts = \"webpack\"").unwrap();

        assert!(Config::load(&root).is_err());
    }
}
