//! Release plan model.
//!
//! The release plan is the ordered catalogue of application versions and the
//! database version each one requires. Its order is the only valid upgrade
//! path: a database moves forward through the plan one release at a time.
//!
//! ```json
//! {
//!   "releases": [
//!     { "appVersion": "1.0", "dbVersion": "1", "path": "r1" },
//!     { "appVersion": "2.0", "dbVersion": "2", "path": "r2" }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{DbmanError, Result};

/// One release in the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseEntry {
    pub app_version: String,
    pub db_version: String,
    /// Folder of the release content, relative to the content root
    pub path: String,
}

impl ReleaseEntry {
    pub fn new(
        app_version: impl Into<String>,
        db_version: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            app_version: app_version.into(),
            db_version: db_version.into(),
            path: path.into(),
        }
    }
}

/// 1-based positions of the installed and target releases in the plan.
///
/// `0` means "not in the plan". Positions start at 1, so `0` never names a
/// real release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeWindow {
    pub current: usize,
    pub target: usize,
}

impl UpgradeWindow {
    /// Both releases were found and the target is ahead of the current one
    pub fn is_forward(&self) -> bool {
        self.current > 0 && self.target > self.current
    }
}

/// The ordered release plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub releases: Vec<ReleaseEntry>,
}

impl Plan {
    pub fn new(releases: Vec<ReleaseEntry>) -> Self {
        Self { releases }
    }

    /// Parse a plan from its JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            DbmanError::config(format!("the release plan is not in the right format: {}", e))
        })
    }

    /// Find the release for an application version. First match wins.
    pub fn release_for(&self, app_version: &str) -> Result<&ReleaseEntry> {
        self.releases
            .iter()
            .find(|r| r.app_version == app_version)
            .ok_or_else(|| {
                DbmanError::not_found(format!(
                    "information for application version '{}' does not exist in the release plan",
                    app_version
                ))
            })
    }

    /// The release at a 1-based plan position
    pub fn release_at(&self, position: usize) -> Option<&ReleaseEntry> {
        position.checked_sub(1).and_then(|ix| self.releases.get(ix))
    }

    /// Locate the installed and target releases in a single pass.
    ///
    /// The current position keeps updating on every match, while the scan
    /// stops as soon as the target is found. Callers must reject windows
    /// where `target <= current` or either side is `0`.
    pub fn upgrade_window(&self, current_app_version: &str, target_app_version: &str) -> UpgradeWindow {
        let mut window = UpgradeWindow {
            current: 0,
            target: 0,
        };
        for (ix, release) in self.releases.iter().enumerate() {
            if release.app_version == current_app_version {
                window.current = ix + 1;
            }
            if release.app_version == target_app_version {
                window.target = ix + 1;
                break;
            }
        }
        window
    }
}
