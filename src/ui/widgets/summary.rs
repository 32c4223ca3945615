// src/ui/widgets/summary.rs

use crate::app::{App, AppState};
use ratatui::{
    prelude::*,
    text::Line,
    widgets::{Block, Borders, Gauge, Paragraph},
};
use vanguard_intel::ProbeStatus;

fn score_color(score: u8) -> Color {
    if score >= 80 {
        Color::Green
    } else if score >= 50 {
        Color::Yellow
    } else {
        Color::Red
    }
}

/// Renders the summary panel: overall score and grade, per-category scores,
/// what each probe managed to do, issue counts and detected technologies.
/// Nothing is drawn inside the frame until a report is available.
pub fn render_summary(frame: &mut Frame, app: &App, area: Rect) {
    let summary_container = Block::default().borders(Borders::ALL).title("Summary");
    frame.render_widget(summary_container, area);

    let summary_chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3), // Score & grade
            Constraint::Length(1), // Gauge
            Constraint::Length(1),
            Constraint::Length(7), // Categories
            Constraint::Length(1),
            Constraint::Length(8), // Probes
            Constraint::Length(1),
            Constraint::Length(4), // Issues
            Constraint::Min(0),    // Technologies
        ])
        .split(area);

    if !matches!(app.state, AppState::Finished) {
        return;
    }
    let Some(report) = &app.scan_report else { return };

    // --- Score & Grade ---
    let score_line = Line::from(format!("{}/100 (grade {})", app.summary.score, app.summary.grade))
        .style(Style::default().fg(score_color(app.summary.score)));
    let score_text = Text::from(vec![Line::from("Overall Score".bold()), score_line]);
    frame.render_widget(Paragraph::new(score_text).alignment(Alignment::Center), summary_chunks[0]);

    let score_gauge = Gauge::default()
        .percent(u16::from(app.displayed_score))
        .label("")
        .style(Style::default().fg(score_color(app.displayed_score)));
    frame.render_widget(score_gauge, summary_chunks[1]);

    // --- Categories ---
    let category_lines: Vec<Line> = report
        .category_scores()
        .iter()
        .map(|(category, score)| {
            Line::from(vec![
                Span::raw(format!("{category:<12}")),
                Span::styled(format!("{score:>3}"), Style::default().fg(score_color(*score))),
            ])
        })
        .collect();
    frame.render_widget(
        Paragraph::new(category_lines).block(Block::default().title("CATEGORIES".bold())),
        summary_chunks[3],
    );

    // --- Probes ---
    let probe_lines: Vec<Line> = report
        .probe_results()
        .iter()
        .map(|(kind, result)| {
            let (icon, style) = match result.status() {
                ProbeStatus::Success => ("✓", Style::default().fg(Color::Green)),
                ProbeStatus::PartialData => ("~", Style::default().fg(Color::Yellow)),
                ProbeStatus::TimedOut => ("⏱", Style::default().fg(Color::Red)),
                ProbeStatus::Failed => ("✗", Style::default().fg(Color::Red)),
            };
            Line::from(vec![
                Span::styled(format!("{icon} "), style),
                Span::raw(format!("{kind:<17}")),
                Span::styled(format!("{}ms", result.latency_ms()), Style::default().fg(Color::DarkGray)),
            ])
        })
        .collect();
    frame.render_widget(
        Paragraph::new(probe_lines).block(Block::default().title("PROBES".bold())),
        summary_chunks[5],
    );

    // --- Issues ---
    let issues_text = Text::from(vec![
        Line::from(vec![
            Span::raw("Critical:  "),
            Span::styled(app.summary.critical_issues.to_string(), Style::default().fg(Color::Red)),
        ]),
        Line::from(vec![
            Span::raw("Important: "),
            Span::styled(app.summary.important_issues.to_string(), Style::default().fg(Color::Yellow)),
        ]),
        Line::from(vec![
            Span::raw("Suggested: "),
            Span::styled(app.summary.suggested_issues.to_string(), Style::default().fg(Color::Cyan)),
        ]),
    ]);
    frame.render_widget(
        Paragraph::new(issues_text).block(Block::default().title("ISSUES FOUND".bold())),
        summary_chunks[7],
    );

    // --- Technologies ---
    let technologies = report.technologies();
    let tech_lines: Vec<Line> = if technologies.is_empty() {
        vec![Line::from("Not identified.")]
    } else {
        technologies
            .iter()
            .map(|tech| {
                let mut spans = vec![
                    Span::raw("- "),
                    Span::styled(tech.name.clone(), Style::default().fg(Color::Cyan)),
                ];
                if let Some(version) = &tech.version {
                    spans.push(Span::raw(format!(" {version}")));
                }
                spans.push(Span::styled(
                    format!(" ({})", tech.category),
                    Style::default().fg(Color::DarkGray),
                ));
                Line::from(spans)
            })
            .collect()
    };
    frame.render_widget(
        Paragraph::new(tech_lines).block(Block::default().title("TECHNOLOGIES".bold())),
        summary_chunks[8],
    );
}
