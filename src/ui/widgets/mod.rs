// src/ui/widgets/mod.rs

pub mod analysis_view; // Recommendations list and the details pane.
pub mod footer; // Key bindings and export status.
pub mod input; // Target entry.
pub mod summary; // Scores, probe outcomes and technologies.
