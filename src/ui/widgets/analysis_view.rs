// src/ui/widgets/analysis_view.rs

use crate::app::{App, AppState, SPINNER_CHARS};
use ratatui::{
    prelude::*,
    text::Line,
    widgets::{Block, Borders, List, ListItem, Paragraph, Wrap},
};
use vanguard_intel::{Recommendation, Severity};

fn severity_style(severity: Severity) -> Style {
    match severity {
        Severity::Critical => Style::default().fg(Color::Red),
        Severity::Important => Style::default().fg(Color::Yellow),
        Severity::Suggested => Style::default().fg(Color::Cyan),
    }
}

pub fn render_analysis_view(frame: &mut Frame, app: &mut App, area: Rect) {
    let main_block = Block::default()
        .borders(Borders::ALL)
        .title("Recommendations (Navigate with ↑ ↓)");

    if !matches!(app.state, AppState::Finished) {
        let content = match app.state {
            AppState::Idle => Paragraph::new("Scan results will appear here...")
                .alignment(Alignment::Center),
            AppState::Scanning => {
                let spinner_char = SPINNER_CHARS[app.spinner_frame];
                Paragraph::new(Line::from(vec![
                    Span::styled(format!("{spinner_char} "), Style::default().fg(Color::Cyan)),
                    Span::raw("Scanning... Please wait."),
                ]))
                .alignment(Alignment::Center)
            }
            AppState::Finished => Paragraph::new(""),
        };
        frame.render_widget(content.block(main_block), area);
        return;
    }

    if let Some(message) = &app.scan_error {
        let text = Text::from(vec![
            Line::from(""),
            Line::from("SCAN NOT STARTED".bold().fg(Color::Red)),
            Line::from(""),
            Line::from(message.as_str()),
        ]);
        let p = Paragraph::new(text)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .block(main_block);
        frame.render_widget(p, area);
        return;
    }

    let inner_area = main_block.inner(area);
    frame.render_widget(main_block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(45), Constraint::Min(0)])
        .split(inner_area);

    let recommendations: &[Recommendation] = app
        .scan_report
        .as_ref()
        .map(|r| r.recommendations())
        .unwrap_or_default();

    let items: Vec<ListItem> = recommendations
        .iter()
        .map(|rec| {
            ListItem::new(Line::from(vec![
                Span::styled(format!("[{}] ", rec.category), Style::default().fg(Color::DarkGray)),
                Span::styled(rec.title.clone(), severity_style(rec.severity)),
            ]))
        })
        .collect();

    let list = List::new(items)
        .block(Block::default())
        .highlight_style(Style::new().bg(Color::DarkGray).add_modifier(Modifier::BOLD));
    frame.render_stateful_widget(list, chunks[0], &mut app.analysis_list_state);

    let detail_block = Block::default().borders(Borders::TOP).title("Details");
    let selected = app
        .analysis_list_state
        .selected()
        .and_then(|i| recommendations.get(i));
    match selected {
        Some(rec) => {
            let text = vec![
                Line::from(vec![
                    Span::styled(rec.severity.to_string().to_uppercase(), severity_style(rec.severity).bold()),
                    Span::raw(format!(
                        "  impact: {}  effort: {}",
                        rec.impact_estimate, rec.effort_estimate
                    )),
                ]),
                Line::from(""),
                Line::from("WHAT IT IS:".yellow().bold()),
                Line::from(rec.message.as_str()),
                Line::from(""),
                Line::from("HOW TO FIX:".yellow().bold()),
                Line::from(rec.action.as_str()),
            ];
            let p = Paragraph::new(text).wrap(Wrap { trim: true }).block(detail_block);
            frame.render_widget(p, chunks[1]);
        }
        None => render_placeholder_details(frame, recommendations.is_empty(), detail_block, chunks[1]),
    }
}

fn render_placeholder_details(frame: &mut Frame, clean: bool, block: Block, area: Rect) {
    let placeholder_text = if clean {
        Text::from(vec![
            Line::from(""),
            Line::from("✓ NOTHING TO FIX".bold().fg(Color::Green)),
            Line::from(""),
            Line::from("Every rule that could be evaluated passed."),
        ])
    } else {
        Text::from("Select an item above to see details.")
    };

    let p = Paragraph::new(placeholder_text).alignment(Alignment::Center).block(block);
    frame.render_widget(p, area);
}
