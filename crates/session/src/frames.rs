use std::collections::HashMap;

use dashmap::DashMap;
use tracing::debug;

use replaykit_core_types::{FramePath, NativeFrameId, ReplayError, TabId};

/// Per-tab frame tables mapping logical frame paths to native frame ids,
/// plus per-tab navigation readiness flags.
///
/// Tables are seeded with `root → 0` on adoption and only ever grow; a
/// populated table is never cleared implicitly, so frame registrations
/// survive navigation-status churn while a dispatch retry is in flight.
pub struct FrameMap {
    tables: DashMap<TabId, HashMap<FramePath, NativeFrameId>>,
    ready: DashMap<TabId, bool>,
}

impl FrameMap {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            ready: DashMap::new(),
        }
    }

    /// Seed the table for a newly adopted tab. Idempotent: existing child
    /// frame registrations are kept.
    pub fn init_tab(&self, tab: TabId) {
        self.tables.entry(tab).or_insert_with(|| {
            let mut table = HashMap::new();
            table.insert(FramePath::root(), NativeFrameId::TOP);
            table
        });
    }

    pub fn tracks(&self, tab: TabId) -> bool {
        self.tables.contains_key(&tab)
    }

    /// Record a frame's self-announced path. Only the frame-registration
    /// lifecycle event calls this.
    pub fn set_frame(&self, tab: TabId, path: FramePath, frame: NativeFrameId) {
        debug!(target: "frame-map", %tab, %path, %frame, "frame registered");
        self.init_tab(tab);
        if let Some(mut table) = self.tables.get_mut(&tab) {
            table.insert(path, frame);
        }
    }

    /// Native id for a frame path, if registered.
    pub fn lookup(&self, tab: TabId, path: &FramePath) -> Option<NativeFrameId> {
        self.tables
            .get(&tab)
            .and_then(|table| table.get(path).copied())
    }

    /// Native id for a frame path, with a clear failure for untracked tabs
    /// and unannounced frames.
    pub fn frame_id(&self, tab: TabId, path: &FramePath) -> Result<NativeFrameId, ReplayError> {
        let table = self
            .tables
            .get(&tab)
            .ok_or(ReplayError::TabNotTracked(tab))?;
        table
            .get(path)
            .copied()
            .ok_or_else(|| ReplayError::frame_not_found(format!("{path} in tab {tab}")))
    }

    /// Navigation started: tab is not ready until completion is observed.
    pub fn mark_loading(&self, tab: TabId) {
        self.init_tab(tab);
        self.ready.insert(tab, false);
    }

    /// Navigation settled.
    pub fn mark_complete(&self, tab: TabId) {
        self.init_tab(tab);
        self.ready.insert(tab, true);
    }

    pub fn is_ready(&self, tab: TabId) -> bool {
        self.ready.get(&tab).map(|flag| *flag).unwrap_or(false)
    }

    /// Drop all state for a closed tab, registry and readiness together.
    pub fn remove_tab(&self, tab: TabId) {
        self.tables.remove(&tab);
        self.ready.remove(&tab);
    }
}

impl Default for FrameMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_seeds_root_and_is_idempotent() {
        let frames = FrameMap::new();
        frames.init_tab(TabId(1));
        assert_eq!(
            frames.lookup(TabId(1), &FramePath::root()),
            Some(NativeFrameId::TOP)
        );

        let child = FramePath::root().child(0);
        frames.set_frame(TabId(1), child.clone(), NativeFrameId(42));

        // repeated init must not erase registered child frames
        frames.init_tab(TabId(1));
        frames.mark_loading(TabId(1));
        assert_eq!(frames.lookup(TabId(1), &child), Some(NativeFrameId(42)));
    }

    #[test]
    fn frame_id_reports_untracked_tab() {
        let frames = FrameMap::new();
        let err = frames.frame_id(TabId(9), &FramePath::root()).unwrap_err();
        assert!(matches!(err, ReplayError::TabNotTracked(TabId(9))));

        frames.init_tab(TabId(9));
        let err = frames
            .frame_id(TabId(9), &FramePath::root().child(1))
            .unwrap_err();
        assert!(err.is_frame_not_found());
    }

    #[test]
    fn readiness_follows_navigation_status() {
        let frames = FrameMap::new();
        assert!(!frames.is_ready(TabId(2)));
        frames.mark_complete(TabId(2));
        assert!(frames.is_ready(TabId(2)));
        frames.mark_loading(TabId(2));
        assert!(!frames.is_ready(TabId(2)));
    }

    #[test]
    fn remove_tab_drops_table_and_readiness() {
        let frames = FrameMap::new();
        frames.mark_complete(TabId(3));
        frames.set_frame(TabId(3), FramePath::root().child(0), NativeFrameId(7));
        frames.remove_tab(TabId(3));
        assert!(!frames.tracks(TabId(3)));
        assert!(!frames.is_ready(TabId(3)));
    }
}
