use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

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

use crate::error::SubmitError;
use crate::pipeline::{ProgressEvent, ProgressSink, Stage};

const EVENTS_MAX: usize = 8;
const LOGS_MAX: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Stages,
    Logs,
}

#[derive(Debug)]
struct AppState {
    status: String,
    stage: Option<Stage>,
    seen: Vec<Stage>,
    events: VecDeque<String>,
    logs: VecDeque<String>,
    view: View,
    started: Instant,
    active: bool,
    aborted: bool,
}

pub struct Tui {
    command: String,
    project: String,
    state: Arc<Mutex<AppState>>,
    log_scroll: u16,
}

struct TuiProgress {
    state: Arc<Mutex<AppState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut state) = self.state.lock() {
            let message = event.message.trim().to_string();
            if let Some((stage, payload)) = parse_phase(&message) {
                // Once the view is abandoned no registration may start: the
                // worker is held here until the process exits.
                if state.aborted && is_registration(stage) {
                    drop(state);
                    loop {
                        thread::park();
                    }
                }
                if !state.seen.contains(&stage) {
                    state.seen.push(stage);
                }
                state.stage = Some(stage);
                state.status = payload.to_string();
            } else {
                state.status = message.clone();
            }
            push_bounded(&mut state.events, message.clone(), EVENTS_MAX);
            let stamp = chrono::Local::now().format("%H:%M:%S");
            push_bounded(&mut state.logs, format!("[{stamp}] {message}"), LOGS_MAX);
        }
    }
}

impl Tui {
    pub fn new(command: &str, project: &str) -> Self {
        Self {
            command: command.to_string(),
            project: project.to_string(),
            state: Arc::new(Mutex::new(AppState {
                status: "ready".to_string(),
                stage: None,
                seen: Vec::new(),
                events: VecDeque::new(),
                logs: VecDeque::new(),
                view: View::Stages,
                started: Instant::now(),
                active: false,
                aborted: false,
            })),
            log_scroll: 0,
        }
    }

    /// Runs `f` on a worker thread while drawing its progress. `q` or `Esc`
    /// abandons the view, except while a registration awaits its receipt.
    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, SubmitError> + Send + 'static,
        R: Send + 'static,
    {
        self.set_active(true);

        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let (tx, rx) = std::sync::mpsc::channel();
        let sink = TuiProgress {
            state: self.state.clone(),
        };
        let handle = thread::spawn(move || tx.send(f(&sink)));

        let mut tick = 0usize;
        loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_ui(frame, self, &state, tick))
                    .into_diagnostic()?;
            }

            if let Ok(result) = rx.try_recv() {
                self.set_active(false);
                restore_terminal()?;
                handle.join().ok();
                return result.map_err(miette::Report::new);
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if self.handle_key(key) {
                        break;
                    }
                }
            }

            tick = tick.wrapping_add(1);
        }

        self.set_active(false);
        restore_terminal()?;
        Err(miette::Report::msg("aborted"))
    }

    pub fn confirm(&mut self, question: &str) -> miette::Result<bool> {
        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;

        let confirmed = loop {
            terminal
                .draw(|frame| {
                    let block = Block::default().borders(Borders::ALL).title("Confirm");
                    let text = Paragraph::new(vec![
                        Line::from(question.to_string()),
                        Line::from("Press y to confirm, n to cancel."),
                    ])
                    .alignment(Alignment::Center)
                    .wrap(Wrap { trim: true })
                    .block(block);
                    frame.render_widget(text, frame.area());
                })
                .into_diagnostic()?;

            if event::poll(Duration::from_millis(100)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    match key.code {
                        KeyCode::Char('y') | KeyCode::Char('Y') => break true,
                        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => break false,
                        _ => {}
                    }
                }
            }
        };

        restore_terminal()?;
        Ok(confirmed)
    }

    fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.kind != KeyEventKind::Press {
            return false;
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.request_abort(),
            KeyCode::Char('l') | KeyCode::F(4) => {
                if let Ok(mut state) = self.state.lock() {
                    state.view = match state.view {
                        View::Stages => View::Logs,
                        View::Logs => View::Stages,
                    };
                }
                false
            }
            KeyCode::Up => {
                self.log_scroll = self.log_scroll.saturating_add(1);
                false
            }
            KeyCode::Down => {
                self.log_scroll = self.log_scroll.saturating_sub(1);
                false
            }
            _ => false,
        }
    }

    fn request_abort(&self) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return true;
        };
        if state.active && state.stage.is_some_and(is_registration) {
            state.status = "registration in flight, waiting for the receipt".to_string();
            return false;
        }
        state.aborted = true;
        true
    }

    fn set_active(&self, active: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.active = active;
            if active {
                state.started = Instant::now();
            }
        }
    }
}

fn restore_terminal() -> miette::Result<()> {
    disable_raw_mode().into_diagnostic()?;
    let mut stdout = io::stdout();
    stdout.execute(LeaveAlternateScreen).into_diagnostic()?;
    Ok(())
}

fn draw_ui(frame: &mut ratatui::Frame, tui: &Tui, state: &AppState, tick: usize) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(2),
        ])
        .split(frame.area());

    frame.render_widget(draw_header(tui, state, tick), chunks[0]);
    match state.view {
        View::Stages => {
            let main = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
                .split(chunks[1]);
            frame.render_widget(draw_stages(state), main[0]);
            frame.render_widget(draw_events(state), main[1]);
        }
        View::Logs => frame.render_widget(draw_logs(state, tui.log_scroll), chunks[1]),
    }
    frame.render_widget(
        Paragraph::new(Line::from(Span::styled(
            "q quit   l logs   Up/Down scroll",
            Style::default().fg(Color::Gray),
        )))
        .block(Block::default().borders(Borders::TOP)),
        chunks[2],
    );
}

fn draw_header(tui: &Tui, state: &AppState, tick: usize) -> Paragraph<'static> {
    let hb = if state.active && tick % 2 == 0 { "*" } else { " " };
    let elapsed = state.started.elapsed().as_secs();
    Paragraph::new(vec![
        Line::from(vec![
            Span::styled(
                "ENA-SUBMIT",
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw(" "),
            Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
            Span::raw(format!("   Project: {}   Command: ", tui.project)),
            Span::styled(tui.command.clone(), Style::default().fg(Color::Cyan)),
            Span::raw(format!("   {elapsed}s ")),
            Span::styled(hb, Style::default().fg(Color::Green)),
        ]),
        Line::from(Span::styled(
            state.status.clone(),
            Style::default().fg(Color::Gray),
        )),
    ])
    .block(Block::default().borders(Borders::BOTTOM))
}

fn draw_stages(state: &AppState) -> Paragraph<'static> {
    let mut lines = vec![Line::from(Span::styled(
        "STAGES",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    ))];
    for (idx, stage) in state.seen.iter().enumerate() {
        let current = Some(*stage) == state.stage && state.active;
        let (mark, color) = if current {
            (">", Color::Cyan)
        } else if idx + 1 < state.seen.len() || !state.active {
            ("+", Color::Green)
        } else {
            (" ", Color::Gray)
        };
        lines.push(Line::from(vec![
            Span::styled(format!("{mark} "), Style::default().fg(color)),
            Span::styled(stage.label(), Style::default().fg(color)),
        ]));
    }
    let done = state.seen.len().saturating_sub(usize::from(state.active));
    lines.push(Line::from(""));
    lines.push(Line::from(vec![
        Span::styled("Progress: ", Style::default().fg(Color::Gray)),
        Span::raw(progress_bar(done, Stage::ALL.len())),
    ]));
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::RIGHT))
        .wrap(Wrap { trim: true })
}

fn draw_events(state: &AppState) -> Paragraph<'static> {
    let mut lines = vec![Line::from(Span::styled(
        "RECENT EVENTS",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    ))];
    for event in state.events.iter().rev() {
        lines.push(Line::from(format!("- {event}")));
    }
    Paragraph::new(lines).wrap(Wrap { trim: true })
}

fn draw_logs(state: &AppState, scroll: u16) -> Paragraph<'static> {
    let lines: Vec<Line<'static>> = state
        .logs
        .iter()
        .map(|line| Line::from(line.clone()))
        .collect();
    let offset = (lines.len() as u16).saturating_sub(scroll.saturating_add(1));
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Logs"))
        .scroll((offset, 0))
        .wrap(Wrap { trim: false })
}

fn progress_bar(done: usize, total: usize) -> String {
    let width = 16;
    let filled = if total == 0 { 0 } else { (done * width) / total };
    let mut out = String::from("[");
    for i in 0..width {
        out.push(if i < filled { '#' } else { '.' });
    }
    out.push(']');
    out
}

fn is_registration(stage: Stage) -> bool {
    matches!(stage, Stage::RegisterSamples | Stage::RegisterObjects)
}

fn parse_phase(message: &str) -> Option<(Stage, &str)> {
    let rest = message.strip_prefix("phase=")?;
    let (label, payload) = rest.split_once(';')?;
    Stage::from_label(label.trim()).map(|stage| (stage, payload.trim()))
}

fn push_bounded(buffer: &mut VecDeque<String>, item: String, max: usize) {
    buffer.push_back(item);
    while buffer.len() > max {
        buffer.pop_front();
    }
}
