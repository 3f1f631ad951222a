//! UI rendering for the TUI

use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph, Widget, Wrap},
    Frame,
};

use super::app::{App, InputMode};
use super::input::{self, INPUT_HEIGHT};

/// Height of the log pane when shown.
const LOG_PANE_HEIGHT: u16 = 8;

/// Connection indicator for the header.
fn state_indicator(app: &App) -> (&'static str, Color) {
    if app.can_control() {
        ("* device ready", Color::Green)
    } else if app.logged_in {
        ("o logged in", Color::Yellow)
    } else {
        ("o logged out", Color::Red)
    }
}

fn key_hint(key: &str, label: &str) -> Vec<Span<'static>> {
    vec![
        Span::styled(
            format!("[{}]", key),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(" {}   ", label)),
    ]
}

/// Main render function
pub fn render(frame: &mut Frame, app: &App) {
    let log_height = if app.show_log { LOG_PANE_HEIGHT } else { 0 };
    let [header_area, main_area, log_area, status_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Fill(1),
        Constraint::Length(log_height),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    render_header(header_area, frame.buffer_mut(), app);
    render_card(main_area, frame, app);
    if app.show_log {
        render_log(log_area, frame.buffer_mut(), app);
    }
    render_status(status_area, frame.buffer_mut(), app);
}

fn render_header(area: Rect, buf: &mut Buffer, app: &App) {
    let title = " Hidden Player";
    let (indicator, color) = state_indicator(app);
    let right = format!("{} ", indicator);
    let padding = (area.width as usize).saturating_sub(title.len() + right.len());

    let line = Line::from(vec![
        Span::styled(
            title,
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" ".repeat(padding)),
        Span::styled(right, Style::default().fg(color)),
    ]);
    Paragraph::new(line)
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}

/// Status and error lines on top, then the controls for the current state,
/// then the attribution.
fn render_card(area: Rect, frame: &mut Frame, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let [status_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(2),
        Constraint::Fill(1),
        Constraint::Length(1),
    ])
    .areas(inner);

    let mut lines = vec![Line::from(Span::styled(
        app.status.clone(),
        Style::default().fg(Color::Gray),
    ))];
    if let Some(ref error) = app.error {
        lines.push(Line::from(Span::styled(
            error.clone(),
            Style::default().fg(Color::Red),
        )));
    }
    frame.render_widget(Paragraph::new(lines), status_area);

    if !app.logged_in {
        render_login(body_area, frame, app);
    } else if !app.can_control() {
        render_connect(body_area, frame.buffer_mut(), app);
    } else {
        render_controls(body_area, frame, app);
    }

    frame.render_widget(
        Paragraph::new(Span::styled(
            "Powered by Spotify",
            Style::default().fg(Color::DarkGray),
        )),
        footer_area,
    );
}

fn render_login(area: Rect, frame: &mut Frame, app: &App) {
    let Some(ref url) = app.login_url else {
        let line = Line::from(key_hint("l", "Log in with Spotify"));
        frame.render_widget(Paragraph::new(line), area);
        return;
    };

    let [url_area, input_area] =
        Layout::vertical([Constraint::Fill(1), Constraint::Length(INPUT_HEIGHT)]).areas(area);

    let text = vec![
        Line::from("Open this address in your browser and approve access:"),
        Line::from(Span::styled(url.clone(), Style::default().fg(Color::Cyan))),
        Line::from(""),
        Line::from("Then paste the address the browser ended up on below."),
    ];
    frame.render_widget(Paragraph::new(text).wrap(Wrap { trim: false }), url_area);

    let focused = app.mode == InputMode::PasteRedirect;
    input::render(
        input_area,
        frame,
        &app.redirect,
        if focused { "Redirect URL" } else { "Redirect URL [v]" },
        "http://127.0.0.1:8888/callback?code=...",
        focused,
    );
}

fn render_connect(area: Rect, buf: &mut Buffer, app: &App) {
    let mut spans = if app.is_connecting {
        vec![Span::styled(
            "Connecting...   ",
            Style::default().fg(Color::Yellow),
        )]
    } else {
        key_hint("c", "Connect player")
    };
    spans.extend(key_hint("o", "Log out"));
    Paragraph::new(Line::from(spans)).render(area, buf);
}

fn render_controls(area: Rect, frame: &mut Frame, app: &App) {
    let [context_area, start_area, transport_area, volume_area, _] = Layout::vertical([
        Constraint::Length(INPUT_HEIGHT),
        Constraint::Length(1),
        Constraint::Length(2),
        Constraint::Length(1),
        Constraint::Fill(1),
    ])
    .areas(area);

    input::render(
        context_area,
        frame,
        &app.context,
        "Playlist / album / artist URI [e]",
        "spotify:playlist:...",
        app.mode == InputMode::EditContext,
    );

    let start = if app.is_starting {
        vec![Span::styled("Starting...", Style::default().fg(Color::Yellow))]
    } else {
        key_hint("Enter", "Start playback here")
    };
    frame.render_widget(Paragraph::new(Line::from(start)), start_area);

    let mut transport = Vec::new();
    transport.extend(key_hint("space", "Play/Pause"));
    transport.extend(key_hint("p", "Previous"));
    transport.extend(key_hint("n", "Next"));
    transport.extend(key_hint("o", "Log out"));
    frame.render_widget(
        Paragraph::new(vec![Line::from(""), Line::from(transport)]),
        transport_area,
    );

    let percent = (app.volume.clamp(0.0, 1.0) * 100.0).round() as u16;
    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(Color::Green).bg(Color::Black))
        .percent(percent)
        .label(format!("Volume {}%  [-/+]", percent));
    frame.render_widget(gauge, volume_area);
}

fn render_log(area: Rect, buf: &mut Buffer, app: &App) {
    let block = Block::default()
        .borders(Borders::TOP)
        .title(" Log ")
        .border_style(Style::default().fg(Color::DarkGray));
    let inner = block.inner(area);
    block.render(area, buf);

    let visible = inner.height as usize;
    let skip = app.log_lines.len().saturating_sub(visible);
    let lines: Vec<Line> = app
        .log_lines
        .iter()
        .skip(skip)
        .map(|l| Line::from(Span::styled(l.clone(), Style::default().fg(Color::Gray))))
        .collect();
    Paragraph::new(lines).render(inner, buf);
}

fn render_status(area: Rect, buf: &mut Buffer, app: &App) {
    let hint = match app.mode {
        InputMode::EditContext => " Enter: start | Esc: done | C-u: clear",
        InputMode::PasteRedirect => " Enter: submit | Esc: cancel | C-u: clear",
        InputMode::Normal => " q: quit | L: log",
    };
    let mut spans = vec![Span::styled(hint, Style::default().fg(Color::Gray))];
    if let Some(ref id) = app.device_id {
        spans.push(Span::styled(" | ", Style::default().fg(Color::DarkGray)));
        spans.push(Span::styled(
            format!("device {}", id),
            Style::default().fg(Color::Yellow),
        ));
    }
    Paragraph::new(Line::from(spans))
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}
