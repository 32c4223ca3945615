// src/app.rs

use ratatui::widgets::ListState;
use std::path::PathBuf;
use vanguard_intel::{ScanReport, Severity};

pub const SPINNER_CHARS: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

pub enum ExportStatus {
    Idle,
    Success(String),
    Error(String),
}

pub enum AppState {
    Idle,
    Scanning,
    Finished,
}

#[derive(Debug, Default)]
pub struct ScanSummary {
    pub score: u8,
    pub grade: String,
    pub critical_issues: usize,
    pub important_issues: usize,
    pub suggested_issues: usize,
}

pub struct App {
    pub should_quit: bool,
    pub state: AppState,
    pub input: String,
    pub scan_report: Option<ScanReport>,
    /// Set when the pipeline refused the scan (bad target, rate limited).
    pub scan_error: Option<String>,
    pub summary: ScanSummary,
    /// Animated towards `summary.score` on every tick.
    pub displayed_score: u8,
    pub spinner_frame: usize,
    pub analysis_list_state: ListState,
    pub export_status: ExportStatus,
}

impl App {
    pub fn new() -> Self {
        Self {
            should_quit: false,
            state: AppState::Idle,
            input: String::new(),
            scan_report: None,
            scan_error: None,
            summary: ScanSummary::default(),
            displayed_score: 0,
            spinner_frame: 0,
            analysis_list_state: ListState::default(),
            export_status: ExportStatus::Idle,
        }
    }

    pub fn scroll_up(&mut self) {
        let Some(total) = self.recommendation_count() else { return };
        let next = match self.analysis_list_state.selected() {
            Some(0) | None => total - 1,
            Some(i) => i - 1,
        };
        self.analysis_list_state.select(Some(next));
    }

    pub fn scroll_down(&mut self) {
        let Some(total) = self.recommendation_count() else { return };
        let next = match self.analysis_list_state.selected() {
            Some(i) if i + 1 < total => i + 1,
            _ => 0,
        };
        self.analysis_list_state.select(Some(next));
    }

    fn recommendation_count(&self) -> Option<usize> {
        self.scan_report
            .as_ref()
            .map(|r| r.recommendations().len())
            .filter(|n| *n > 0)
    }

    pub fn finish_scan(&mut self, outcome: Result<ScanReport, String>) {
        self.state = AppState::Finished;
        match outcome {
            Ok(report) => {
                self.scan_report = Some(report);
                self.scan_error = None;
            }
            Err(message) => {
                self.scan_report = None;
                self.scan_error = Some(message);
            }
        }
        self.update_summary();
    }

    pub fn update_summary(&mut self) {
        if let Some(report) = &self.scan_report {
            self.summary = ScanSummary {
                score: report.overall_score(),
                grade: report.grade().to_string(),
                critical_issues: report.count_by_severity(Severity::Critical),
                important_issues: report.count_by_severity(Severity::Important),
                suggested_issues: report.count_by_severity(Severity::Suggested),
            };
        }
    }

    /// Writes the current report as pretty JSON into `directory`.
    pub fn export_report(&mut self, directory: PathBuf) {
        let Some(report) = &self.scan_report else { return };
        let file_name = format!(
            "{}-{}.json",
            report.target().replace([':', '/'], "_"),
            report.timestamp().format("%Y%m%dT%H%M%S")
        );
        let path = directory.join(file_name);
        let written = std::fs::create_dir_all(&directory)
            .map_err(|e| e.to_string())
            .and_then(|_| serde_json::to_string_pretty(report).map_err(|e| e.to_string()))
            .and_then(|json| std::fs::write(&path, json).map_err(|e| e.to_string()));
        self.export_status = match written {
            Ok(()) => {
                tracing::info!(path = %path.display(), "Report exported.");
                ExportStatus::Success(path.display().to_string())
            }
            Err(e) => {
                tracing::error!(error = %e, "Report export failed.");
                ExportStatus::Error(e)
            }
        };
    }

    pub fn on_tick(&mut self) {
        match self.state {
            AppState::Scanning => {
                self.spinner_frame = (self.spinner_frame + 1) % SPINNER_CHARS.len();
            }
            AppState::Finished if self.displayed_score < self.summary.score => {
                self.displayed_score = (self.displayed_score + 2).min(self.summary.score);
            }
            _ => {}
        }
    }

    pub fn quit(&mut self) {
        self.should_quit = true;
    }

    pub fn reset(&mut self) {
        self.state = AppState::Idle;
        self.input = String::new();
        self.scan_report = None;
        self.scan_error = None;
        self.summary = ScanSummary::default();
        self.displayed_score = 0;
        self.spinner_frame = 0;
        self.analysis_list_state = ListState::default();
        self.export_status = ExportStatus::Idle;
    }
}
