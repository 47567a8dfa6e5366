//! Module sync options and reporting

use serde::Serialize;

use super::module::SyncScope;

/// Options of one sync run
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Explicit scope; auto-detected when absent
    pub scope: Option<SyncScope>,
    /// Delete all non-core modules in scope before syncing
    pub fresh: bool,
    /// Skip the hierarchy schema pre-check
    pub force: bool,
    /// Remove children a still-declared module no longer declares
    pub prune: bool,
}

/// Created / updated / removed tally of one hierarchy level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LevelCounts {
    pub created: u64,
    pub updated: u64,
    pub removed: u64,
}

impl LevelCounts {
    pub fn is_unchanged(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.removed == 0
    }
}

/// Rows removed by a cascading module delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CascadeCounts {
    pub modules: u64,
    pub sub_modules: u64,
    pub components: u64,
    pub actions: u64,
}

/// Result of a sync run
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub scope: SyncScope,
    pub modules: LevelCounts,
    pub sub_modules: LevelCounts,
    pub components: LevelCounts,
    pub actions: LevelCounts,
    /// Grants removed because their node was deleted
    pub grants_removed: u64,
}

impl SyncReport {
    pub fn new(scope: SyncScope) -> Self {
        Self {
            scope,
            modules: LevelCounts::default(),
            sub_modules: LevelCounts::default(),
            components: LevelCounts::default(),
            actions: LevelCounts::default(),
            grants_removed: 0,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        self.modules.is_unchanged()
            && self.sub_modules.is_unchanged()
            && self.components.is_unchanged()
            && self.actions.is_unchanged()
            && self.grants_removed == 0
    }

    pub(crate) fn add_removed(&mut self, counts: CascadeCounts) {
        self.modules.removed += counts.modules;
        self.sub_modules.removed += counts.sub_modules;
        self.components.removed += counts.components;
        self.actions.removed += counts.actions;
    }

    /// `(level, counts)` rows in hierarchy order
    pub fn rows(&self) -> [(&'static str, LevelCounts); 4] {
        [
            ("modules", self.modules),
            ("sub_modules", self.sub_modules),
            ("components", self.components),
            ("actions", self.actions),
        ]
    }
}
