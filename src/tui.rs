use std::io;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::download::ArchiveClient;
use crate::extract::Extractor;
use crate::merge::Merger;
use crate::pipeline::{PipelineController, PipelineState, RunHandle, RunReport, RunState};
use crate::settings::SettingsStore;
use crate::vcs::VcsClient;

const LOG_VISIBLE: usize = 14;
const HINT: &str = "Enter start  u unzip  r replace  c commit  PgUp/PgDn scroll  q quit";

/// Interactive front end: shows the observable pipeline state and maps
/// keys onto the controller setters.
pub struct Tui {
    snapshot: PipelineState,
    updates: Receiver<PipelineState>,
    log_scroll: usize,
    last_report: Option<RunReport>,
}

enum KeyAction {
    Continue,
    Trigger,
    Quit,
}

impl Tui {
    pub fn new<A, X, M, V, S>(controller: &PipelineController<A, X, M, V, S>) -> Self
    where
        A: ArchiveClient + 'static,
        X: Extractor + 'static,
        M: Merger + 'static,
        V: VcsClient + 'static,
        S: SettingsStore + 'static,
    {
        let cell = controller.state();
        Self {
            updates: cell.subscribe(),
            snapshot: cell.get(),
            log_scroll: 0,
            last_report: None,
        }
    }

    /// Runs the event loop until the user quits. Returns the report of the
    /// last finished run, if any.
    pub fn run<A, X, M, V, S>(
        &mut self,
        controller: &PipelineController<A, X, M, V, S>,
        start_immediately: bool,
    ) -> miette::Result<Option<RunReport>>
    where
        A: ArchiveClient + 'static,
        X: Extractor + 'static,
        M: Merger + 'static,
        V: VcsClient + 'static,
        S: SettingsStore + 'static,
    {
        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let mut active: Option<RunHandle> = if start_immediately {
            controller.trigger()
        } else {
            None
        };
        let mut tick = 0usize;
        let outcome = loop {
            self.drain_updates();
            if let Err(err) = terminal.draw(|frame| draw_ui(frame, self, tick)) {
                break Err(err).into_diagnostic();
            }

            if active.as_ref().is_some_and(RunHandle::is_finished) {
                if let Some(handle) = active.take() {
                    match handle.join() {
                        Ok(report) => self.last_report = Some(report),
                        Err(err) => break Err(miette::Report::new(err)),
                    }
                }
            }

            match event::poll(Duration::from_millis(120)) {
                Ok(true) => match event::read() {
                    Ok(Event::Key(key)) => match self.handle_key(key, controller) {
                        KeyAction::Trigger => {
                            if active.is_none() {
                                active = controller.trigger();
                                self.log_scroll = 0;
                            }
                        }
                        KeyAction::Quit if active.is_none() => break Ok(()),
                        _ => {}
                    },
                    Ok(_) => {}
                    Err(err) => break Err(err).into_diagnostic(),
                },
                Ok(false) => {}
                Err(err) => break Err(err).into_diagnostic(),
            }

            tick = tick.wrapping_add(1);
        };

        disable_raw_mode().into_diagnostic()?;
        let mut stdout = io::stdout();
        stdout.execute(LeaveAlternateScreen).into_diagnostic()?;
        outcome.map(|()| self.last_report.take())
    }

    fn drain_updates(&mut self) {
        if let Some(latest) = self.updates.try_iter().last() {
            self.snapshot = latest;
        }
    }

    fn handle_key<A, X, M, V, S>(
        &mut self,
        key: KeyEvent,
        controller: &PipelineController<A, X, M, V, S>,
    ) -> KeyAction
    where
        A: ArchiveClient + 'static,
        X: Extractor + 'static,
        M: Merger + 'static,
        V: VcsClient + 'static,
        S: SettingsStore + 'static,
    {
        if key.kind != KeyEventKind::Press {
            return KeyAction::Continue;
        }
        let unzip = self.snapshot.config.auto_unzip;
        let replace = self.snapshot.config.auto_replace;
        let commit = self.snapshot.config.auto_commit;
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return KeyAction::Quit,
            KeyCode::Enter => return KeyAction::Trigger,
            KeyCode::Char('u') => controller.set_auto_unzip(!unzip),
            KeyCode::Char('r') => controller.set_auto_replace(!replace),
            KeyCode::Char('c') => controller.set_auto_commit(!commit),
            KeyCode::PageUp => self.scroll_logs(5),
            KeyCode::PageDown => self.scroll_logs(-5),
            _ => {}
        }
        KeyAction::Continue
    }

    fn scroll_logs(&mut self, delta: isize) {
        let max_scroll = self.snapshot.log.len().saturating_sub(1);
        self.log_scroll = self.log_scroll.saturating_add_signed(delta).min(max_scroll);
    }
}

fn draw_ui(frame: &mut ratatui::Frame, tui: &Tui, tick: usize) {
    let state = &tui.snapshot;
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(7),
            Constraint::Length(2),
            Constraint::Min(6),
            Constraint::Length(2),
        ])
        .split(frame.area());

    frame.render_widget(draw_header(state, tick), chunks[0]);
    frame.render_widget(draw_config_panel(state), chunks[1]);
    frame.render_widget(draw_progress(state), chunks[2]);
    frame.render_widget(draw_logs_view(state, tui.log_scroll), chunks[3]);

    let footer = Paragraph::new(Line::from(Span::styled(
        HINT,
        Style::default().fg(Color::DarkGray),
    )))
    .block(Block::default().borders(Borders::TOP));
    frame.render_widget(footer, chunks[4]);
}

fn draw_header(state: &PipelineState, tick: usize) -> Paragraph<'static> {
    let hb = if state.is_downloading && tick % 2 == 0 {
        "*"
    } else {
        " "
    };
    let line = Line::from(vec![
        Span::styled(
            "HB-UPGRADE",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   State: "),
        Span::styled(
            state.run_state.label(),
            Style::default().fg(run_state_color(state.run_state)),
        ),
        Span::raw("   "),
        Span::styled(
            chrono::Local::now().format("%H:%M:%S").to_string(),
            Style::default().fg(Color::Gray),
        ),
        Span::raw(" "),
        Span::styled(hb, Style::default().fg(Color::Green)),
    ]);
    Paragraph::new(line)
        .alignment(Alignment::Left)
        .block(Block::default().borders(Borders::BOTTOM))
}

fn draw_config_panel(state: &PipelineState) -> Paragraph<'static> {
    let config = &state.config;
    let label = |text: &'static str| Span::styled(text, Style::default().fg(Color::Gray));
    let start = if state.is_clickable {
        Span::styled("ready", Style::default().fg(Color::Green))
    } else {
        Span::styled("blocked", Style::default().fg(Color::Yellow))
    };
    let lines = vec![
        Line::from(vec![label("Project root: "), Span::raw(config.root_path.to_string())]),
        Line::from(vec![label("Cache path:   "), Span::raw(config.cache_path.to_string())]),
        Line::from(vec![label("Download url: "), Span::raw(state.download_url.clone())]),
        Line::from(vec![label("Asset path:   "), Span::raw(config.asset_subpath.clone())]),
        Line::from(vec![
            label("Stages: "),
            toggle_span("unzip", config.auto_unzip),
            Span::raw("  "),
            toggle_span("replace", config.auto_replace),
            Span::raw("  "),
            toggle_span("commit", config.auto_commit),
            label("   Start: "),
            start,
        ]),
    ];
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::BOTTOM))
        .wrap(Wrap { trim: true })
}

fn draw_progress(state: &PipelineState) -> Paragraph<'static> {
    let percent = (state.progress.clamp(0.0, 1.0) * 100.0).round() as u8;
    let color = if state.is_error {
        Color::Red
    } else if state.run_state == RunState::Completed {
        Color::Green
    } else {
        Color::Cyan
    };
    Paragraph::new(Line::from(vec![
        Span::styled("Download: ", Style::default().fg(Color::Gray)),
        Span::styled(progress_bar(percent), Style::default().fg(color)),
        Span::raw(format!(" {percent:>3}%")),
    ]))
}

fn draw_logs_view(state: &PipelineState, scroll: usize) -> Paragraph<'static> {
    let total = state.log.len();
    let start = total.saturating_sub(scroll + LOG_VISIBLE);
    let mut lines = Vec::with_capacity(LOG_VISIBLE + 1);
    lines.push(Line::from(Span::styled(
        "LOG",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    )));
    let style = if state.is_error {
        Style::default().fg(Color::Red)
    } else {
        Style::default()
    };
    for line in state.log.iter().skip(start).take(LOG_VISIBLE) {
        lines.push(Line::from(Span::styled(line.clone(), style)));
    }
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::TOP))
        .wrap(Wrap { trim: true })
}

fn toggle_span(name: &'static str, enabled: bool) -> Span<'static> {
    if enabled {
        Span::styled(format!("[x] {name}"), Style::default().fg(Color::Green))
    } else {
        Span::styled(format!("[ ] {name}"), Style::default().fg(Color::DarkGray))
    }
}

fn run_state_color(run_state: RunState) -> Color {
    match run_state {
        RunState::Idle => Color::Gray,
        RunState::Completed => Color::Green,
        RunState::Failed => Color::Red,
        _ => Color::Cyan,
    }
}

fn progress_bar(percent: u8) -> String {
    let total = 30;
    let filled = (percent as usize * total) / 100;
    let mut out = String::from("[");
    for i in 0..total {
        out.push(if i < filled { '#' } else { '.' });
    }
    out.push(']');
    out
}
