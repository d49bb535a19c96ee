//! Assertion helpers shared by integration tests

use card_dl::{ItemStatus, Summary, WorkItem};
use std::path::Path;

/// Status the summary reports for `item`
pub fn status_of(summary: &Summary, item: &WorkItem) -> ItemStatus {
    summary
        .outcome(&item.id)
        .unwrap_or_else(|| panic!("no outcome for {}", item.id))
        .status
}

/// Every item's destination exists iff the item succeeded, and no staged file is left
pub fn assert_files_match_summary(summary: &Summary, items: &[WorkItem]) {
    for item in items {
        let succeeded = status_of(summary, item) == ItemStatus::Succeeded;
        assert_eq!(
            item.destination.exists(),
            succeeded,
            "destination presence does not match status for {}",
            item.id
        );
        assert!(
            !card_dl::storage::staging_path(&item.destination).exists(),
            "staged file left behind for {}",
            item.id
        );
    }
}

/// Count files in a directory whose name ends with `.part`
pub fn count_partials(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
                .count()
        })
        .unwrap_or(0)
}
