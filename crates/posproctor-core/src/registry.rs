//! Target registry and the reload boundary.
//!
//! A [`TargetRegistry`] is a validated, immutable snapshot of the target
//! list. The orchestrator asks its [`TargetSource`] for a fresh snapshot
//! at the start of every cycle and never mid-cycle, so one cycle always
//! sees one consistent list.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::types::Target;

/// Validated list of targets, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetRegistry {
    targets: Vec<Target>,
}

impl TargetRegistry {
    /// Validate and wrap a target list.
    ///
    /// Rejects rows with an empty address, display name or group, and
    /// rows sharing an (address, display name) pair.
    pub fn new(targets: Vec<Target>) -> ConfigResult<Self> {
        let mut seen = HashSet::new();
        for (index, t) in targets.iter().enumerate() {
            let required = [
                ("address", &t.address),
                ("display_name", &t.display_name),
                ("group", &t.group),
            ];
            for (field, value) in required {
                if value.trim().is_empty() {
                    return Err(ConfigError::MissingField { index, field });
                }
            }
            if !seen.insert((t.address.as_str(), t.display_name.as_str())) {
                return Err(ConfigError::DuplicateTarget {
                    address: t.address.clone(),
                    display_name: t.display_name.clone(),
                });
            }
        }
        Ok(Self { targets })
    }

    /// Enabled targets in registry order.
    pub fn list_enabled(&self) -> Vec<Target> {
        self.targets.iter().filter(|t| t.enabled).cloned().collect()
    }

    /// Every target, disabled ones included.
    pub fn all(&self) -> &[Target] {
        &self.targets
    }

    pub fn total(&self) -> usize {
        self.targets.len()
    }

    pub fn enabled_count(&self) -> usize {
        self.targets.iter().filter(|t| t.enabled).count()
    }

    /// Find a target by address.
    pub fn find(&self, address: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.address == address)
    }
}

/// Something that can produce a fresh [`TargetRegistry`].
pub trait TargetSource: Send + Sync {
    fn reload(&self) -> ConfigResult<TargetRegistry>;
}

/// Fixed target list.
#[derive(Debug, Clone, Default)]
pub struct StaticTargetSource {
    targets: Vec<Target>,
}

impl StaticTargetSource {
    pub fn new(targets: Vec<Target>) -> Self {
        Self { targets }
    }
}

impl TargetSource for StaticTargetSource {
    fn reload(&self) -> ConfigResult<TargetRegistry> {
        TargetRegistry::new(self.targets.clone())
    }
}

/// TOML file of `[[target]]` tables, re-read on every reload.
///
/// ```toml
/// [[target]]
/// address = "10.20.0.14"
/// display_name = "Store 114"
/// group = "north"
/// brand = "Shell"
/// enabled = true
/// ```
#[derive(Debug, Clone)]
pub struct FileTargetSource {
    path: PathBuf,
}

#[derive(Deserialize)]
struct TargetsFile {
    #[serde(default, rename = "target")]
    targets: Vec<RawTarget>,
}

/// A row before required-field validation, so a missing field reports
/// its row instead of a bare serde message.
#[derive(Deserialize)]
struct RawTarget {
    address: Option<String>,
    display_name: Option<String>,
    group: Option<String>,
    brand: Option<String>,
    enabled: Option<bool>,
}

impl RawTarget {
    fn into_target(self, index: usize) -> ConfigResult<Target> {
        let address = self.address.ok_or(ConfigError::MissingField { index, field: "address" })?;
        let display_name = self.display_name.ok_or(ConfigError::MissingField {
            index,
            field: "display_name",
        })?;
        let group = self.group.ok_or(ConfigError::MissingField { index, field: "group" })?;

        let mut target = Target::new(&address, &display_name, &group);
        if let Some(brand) = self.brand.filter(|b| !b.trim().is_empty()) {
            target.brand = brand;
        }
        target.enabled = self.enabled.unwrap_or(true);
        Ok(target)
    }
}

impl FileTargetSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse a targets document.
    pub fn parse(content: &str, path: &Path) -> ConfigResult<TargetRegistry> {
        let file: TargetsFile = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let targets = file
            .targets
            .into_iter()
            .enumerate()
            .map(|(i, raw)| raw.into_target(i))
            .collect::<ConfigResult<Vec<_>>>()?;
        TargetRegistry::new(targets)
    }
}

impl TargetSource for FileTargetSource {
    fn reload(&self) -> ConfigResult<TargetRegistry> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;
        let registry = Self::parse(&content, &self.path)?;
        debug!(
            path = ?self.path,
            total = registry.total(),
            enabled = registry.enabled_count(),
            "target list loaded"
        );
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGETS: &str = r#"
[[target]]
address = "10.0.0.1"
display_name = "Store 1"
group = "north"
brand = "Shell"

[[target]]
address = "10.0.0.2"
display_name = "Store 2"
group = "north"
enabled = false

[[target]]
address = "10.0.0.3:8443"
display_name = "Store 3"
group = "south"
brand = "Exxon"
enabled = true
"#;

    #[test]
    fn list_enabled_preserves_order_and_skips_disabled() {
        let reg = FileTargetSource::parse(TARGETS, Path::new("t.toml")).unwrap();
        let enabled: Vec<_> = reg.list_enabled().into_iter().map(|t| t.address).collect();
        assert_eq!(enabled, vec!["10.0.0.1", "10.0.0.3:8443"]);
        assert_eq!(reg.total(), 3);
        assert_eq!(reg.enabled_count(), 2);
    }

    #[test]
    fn defaults_brand_and_enabled() {
        let reg = FileTargetSource::parse(TARGETS, Path::new("t.toml")).unwrap();
        let t = reg.find("10.0.0.2").unwrap();
        assert_eq!(t.brand, "Unknown");
        assert!(!t.enabled);
        assert!(reg.find("10.0.0.1").unwrap().enabled);
    }

    #[test]
    fn missing_field_reports_row() {
        let err = FileTargetSource::parse(
            r#"
[[target]]
address = "10.0.0.1"
display_name = "Store 1"
group = "north"

[[target]]
address = "10.0.0.2"
group = "north"
"#,
            Path::new("t.toml"),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingField {
                index: 1,
                field: "display_name"
            }
        ));
    }

    #[test]
    fn empty_required_field_rejected() {
        let err = TargetRegistry::new(vec![Target::new(" ", "Store", "g")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { index: 0, field: "address" }));
    }

    #[test]
    fn duplicate_target_rejected() {
        let err = TargetRegistry::new(vec![
            Target::new("10.0.0.1", "Store 1", "a"),
            Target::new("10.0.0.1", "Store 1", "b"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateTarget { .. }));
    }

    #[test]
    fn empty_file_is_empty_registry() {
        let reg = FileTargetSource::parse("", Path::new("t.toml")).unwrap();
        assert_eq!(reg.total(), 0);
        assert!(reg.list_enabled().is_empty());
    }

    #[test]
    fn file_source_reloads_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.toml");
        std::fs::write(&path, TARGETS).unwrap();

        let source = FileTargetSource::new(&path);
        assert_eq!(source.reload().unwrap().enabled_count(), 2);

        std::fs::write(&path, TARGETS.replace("enabled = true", "enabled = false")).unwrap();
        assert_eq!(source.reload().unwrap().enabled_count(), 1);
    }

    #[test]
    fn file_source_missing_file_is_read_error() {
        let source = FileTargetSource::new("/nonexistent/targets.toml");
        assert!(matches!(source.reload(), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn static_source_validates() {
        let source = StaticTargetSource::new(vec![Target::new("", "x", "y")]);
        assert!(source.reload().is_err());
    }
}
