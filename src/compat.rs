//! Client compatibility gate.
//!
//! Maps a client's `(platform, app version)` to the capability flags the core
//! honors, and to the key the layout registry resolves against. The feature
//! table is built once at start-up and read-only afterwards.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::models::enums::{LayoutRole, Platform, Role};

static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)(?:\.(\d+))?(?:\.(\d+))?$").unwrap());

// ═══════════════════════════════════════════════════════════
// Versions
// ═══════════════════════════════════════════════════════════

/// `major.minor.patch`, used both for client app versions and layout semver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AppVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl AppVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Parse `1`, `1.2` or `1.2.3`. Missing components are zero.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let caps = VERSION_PATTERN
            .captures(s.trim())
            .ok_or_else(|| CoreError::invalid(format!("malformed version '{s}'")))?;
        let part = |i: usize| -> Result<u32, CoreError> {
            match caps.get(i) {
                Some(m) => m
                    .as_str()
                    .parse()
                    .map_err(|_| CoreError::out_of_range(format!("version component in '{s}'"))),
                None => Ok(0),
            }
        };
        Ok(Self::new(part(1)?, part(2)?, part(3)?))
    }
}

impl std::fmt::Display for AppVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl std::str::FromStr for AppVersion {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AppVersion {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<AppVersion> for String {
    fn from(v: AppVersion) -> Self {
        v.to_string()
    }
}

/// Half-open range `[min, max)`; `max = None` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRange {
    pub min: AppVersion,
    pub max: Option<AppVersion>,
}

impl VersionRange {
    pub fn new(min: AppVersion, max: Option<AppVersion>) -> Result<Self, CoreError> {
        if let Some(max) = max {
            if max <= min {
                return Err(CoreError::out_of_range(format!(
                    "version range [{min}, {max}) is empty"
                )));
            }
        }
        Ok(Self { min, max })
    }

    pub fn from_min(min: AppVersion) -> Self {
        Self { min, max: None }
    }

    pub fn contains(&self, v: AppVersion) -> bool {
        self.min <= v && self.max.map_or(true, |max| v < max)
    }

    pub fn overlaps(&self, other: &VersionRange) -> bool {
        let below_other_max = other.max.map_or(true, |max| self.min < max);
        let other_below_max = self.max.map_or(true, |max| other.min < max);
        below_other_max && other_below_max
    }
}

// ═══════════════════════════════════════════════════════════
// Client info and layout selection
// ═══════════════════════════════════════════════════════════

/// What the client reported about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub platform: Platform,
    pub app_version: AppVersion,
}

impl ClientInfo {
    pub fn new(platform: Platform, app_version: AppVersion) -> Self {
        Self { platform, app_version }
    }
}

/// What the layout registry resolves against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutSelectionKey {
    pub platform: Platform,
    pub app_version: AppVersion,
    pub role: LayoutRole,
}

/// Layout role for an actor role. Care coordinators and admins see the doctor side.
pub fn layout_role_for(role: Role) -> LayoutRole {
    match role {
        Role::Patient => LayoutRole::Patient,
        Role::Doctor | Role::CareCoordinator | Role::Admin => LayoutRole::Doctor,
    }
}

// ═══════════════════════════════════════════════════════════
// Feature registry
// ═══════════════════════════════════════════════════════════

/// One platform/role slice of a feature's availability.
#[derive(Debug, Clone)]
pub struct FeatureRange {
    pub platform: Platform,
    pub role: LayoutRole,
    pub versions: VersionRange,
}

#[derive(Debug, Clone)]
pub struct Feature {
    pub name: String,
    pub ranges: Vec<FeatureRange>,
}

/// Read-only table of capability flags.
#[derive(Debug, Clone, Default)]
pub struct FeatureRegistry {
    features: Vec<Feature>,
}

impl FeatureRegistry {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { features }
    }

    /// Flags available to the client for `role`.
    pub fn capabilities(&self, client: &ClientInfo, role: Role) -> BTreeSet<String> {
        let layout_role = layout_role_for(role);
        self.features
            .iter()
            .filter(|f| {
                f.ranges.iter().any(|r| {
                    r.platform == client.platform
                        && r.role == layout_role
                        && r.versions.contains(client.app_version)
                })
            })
            .map(|f| f.name.clone())
            .collect()
    }

    pub fn is_enabled(&self, name: &str, client: &ClientInfo, role: Role) -> bool {
        self.capabilities(client, role).contains(name)
    }

    pub fn layout_selection_key(&self, client: &ClientInfo, role: Role) -> LayoutSelectionKey {
        LayoutSelectionKey {
            platform: client.platform,
            app_version: client.app_version,
            role: layout_role_for(role),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> AppVersion {
        AppVersion::parse(s).unwrap()
    }

    #[test]
    fn parses_partial_versions() {
        assert_eq!(v("2"), AppVersion::new(2, 0, 0));
        assert_eq!(v("2.1"), AppVersion::new(2, 1, 0));
        assert_eq!(v(" 2.1.7 "), AppVersion::new(2, 1, 7));
    }

    #[test]
    fn rejects_malformed_versions() {
        assert_eq!(AppVersion::parse("2.x").unwrap_err().code(), "invalid_request");
        assert_eq!(AppVersion::parse("").unwrap_err().code(), "invalid_request");
        assert_eq!(
            AppVersion::parse("99999999999.0").unwrap_err().code(),
            "out_of_range"
        );
    }

    #[test]
    fn versions_order_numerically() {
        assert!(v("1.10.0") > v("1.9.9"));
        assert!(v("2.0.0") > v("1.99.99"));
    }

    #[test]
    fn range_is_half_open() {
        let r = VersionRange::new(v("1.0"), Some(v("2.0"))).unwrap();
        assert!(r.contains(v("1.0.0")));
        assert!(r.contains(v("1.9.9")));
        assert!(!r.contains(v("2.0.0")));
        assert!(!r.contains(v("0.9")));
    }

    #[test]
    fn empty_range_rejected() {
        assert!(VersionRange::new(v("2.0"), Some(v("2.0"))).is_err());
    }

    #[test]
    fn overlap_detection() {
        let a = VersionRange::new(v("1.0"), Some(v("2.0"))).unwrap();
        let b = VersionRange::new(v("2.0"), None).unwrap();
        let c = VersionRange::new(v("1.5"), Some(v("3.0"))).unwrap();
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
        assert!(VersionRange::from_min(v("0.1")).overlaps(&b));
    }

    #[test]
    fn version_serde_as_string() {
        let json = serde_json::to_string(&v("1.2.3")).unwrap();
        assert_eq!(json, "\"1.2.3\"");
        let back: AppVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v("1.2.3"));
    }

    #[test]
    fn capabilities_filter_by_platform_role_and_version() {
        let registry = FeatureRegistry::new(vec![
            Feature {
                name: "photo_tips".into(),
                ranges: vec![FeatureRange {
                    platform: Platform::Ios,
                    role: LayoutRole::Patient,
                    versions: VersionRange::from_min(v("2.1")),
                }],
            },
            Feature {
                name: "rx_editor".into(),
                ranges: vec![FeatureRange {
                    platform: Platform::Web,
                    role: LayoutRole::Doctor,
                    versions: VersionRange::from_min(v("1.0")),
                }],
            },
        ]);

        let ios_new = ClientInfo::new(Platform::Ios, v("2.3"));
        let ios_old = ClientInfo::new(Platform::Ios, v("2.0"));
        assert!(registry.is_enabled("photo_tips", &ios_new, Role::Patient));
        assert!(!registry.is_enabled("photo_tips", &ios_old, Role::Patient));
        assert!(!registry.is_enabled("photo_tips", &ios_new, Role::Doctor));

        let web = ClientInfo::new(Platform::Web, v("1.4"));
        assert_eq!(
            registry.capabilities(&web, Role::CareCoordinator),
            BTreeSet::from(["rx_editor".to_string()])
        );
    }

    #[test]
    fn selection_key_maps_role() {
        let registry = FeatureRegistry::default();
        let client = ClientInfo::new(Platform::Android, v("3.0"));
        let key = registry.layout_selection_key(&client, Role::Doctor);
        assert_eq!(key.role, LayoutRole::Doctor);
        assert_eq!(key.platform, Platform::Android);
        assert_eq!(key.app_version, v("3.0"));
    }
}
