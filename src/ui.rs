use crate::client::AskClient;
use crate::config::Backend;
use crate::turn::{Turn, TurnId};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use std::io;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

type TuiTerminal = Terminal<CrosstermBackend<io::Stdout>>;
type TuiResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const INPUT_HEIGHT: u16 = 6;
const SCROLL_STEP: usize = 5;

// Restores terminal settings even if the loop exits early.
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> Self {
        Self
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        let _ = io::stdout().flush();
    }
}

#[derive(Debug, Clone)]
struct LineSpec {
    text: String,
    style: Style,
}

impl LineSpec {
    fn new(text: impl Into<String>, style: Style) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

fn indented(lines: &mut Vec<LineSpec>, body: &str, style: Style) {
    for line in body.lines() {
        lines.push(LineSpec::new(format!("  {}", line), style));
    }
}

fn turn_lines(turn: &Turn) -> Vec<LineSpec> {
    let mut lines = Vec::new();

    let user = Style::default().fg(Color::Blue);
    lines.push(LineSpec::new("You:", user.add_modifier(Modifier::BOLD)));
    indented(&mut lines, &turn.question, user);

    if !turn.materials.is_empty() {
        let materials = Style::default().fg(Color::Cyan);
        lines.push(LineSpec::new(
            "Retrieved materials:",
            materials.add_modifier(Modifier::BOLD),
        ));
        indented(&mut lines, &turn.materials, materials);
    }

    let assistant = Style::default().fg(Color::Yellow);
    lines.push(LineSpec::new(
        "Assistant:",
        assistant.add_modifier(Modifier::BOLD),
    ));
    match &turn.error {
        Some(error) => indented(
            &mut lines,
            &format!("❌ {}", error),
            Style::default().fg(Color::Red),
        ),
        None if turn.answer.is_empty() => {
            let placeholder = if turn.done { "…" } else { "Thinking…" };
            lines.push(LineSpec::new(
                format!("  {}", placeholder),
                assistant.add_modifier(Modifier::ITALIC),
            ));
        }
        None => indented(&mut lines, &turn.answer, assistant),
    }

    let note = Style::default()
        .fg(Color::Gray)
        .add_modifier(Modifier::ITALIC);
    for meta in turn.meta.lines() {
        lines.push(LineSpec::new(format!("ⓘ {}", meta), note));
    }

    lines.push(LineSpec::new("", Style::default()));
    lines
}

fn rendered_height(lines: &[LineSpec], width: u16) -> usize {
    let width = width.max(1) as usize;
    lines
        .iter()
        .map(|line| line.text.chars().count().max(1).div_ceil(width))
        .sum()
}

#[derive(Debug)]
pub enum UiEvent {
    /// Snapshot of a turn while its stream is running.
    TurnUpdated(Turn),
    /// Final state of a turn; its stream has stopped.
    TurnFinished(Turn),
}

struct InputBuffer {
    lines: Vec<String>,
    cursor_x: usize,
    cursor_y: usize,
}

impl InputBuffer {
    fn new() -> Self {
        Self {
            lines: vec![String::new()],
            cursor_x: 0,
            cursor_y: 0,
        }
    }

    fn clear(&mut self) {
        self.lines = vec![String::new()];
        self.cursor_x = 0;
        self.cursor_y = 0;
    }

    fn line_len(&self, y: usize) -> usize {
        self.lines[y].chars().count()
    }

    // Cursor positions count chars; editing needs byte offsets.
    fn byte_offset(&self) -> usize {
        let line = &self.lines[self.cursor_y];
        line.char_indices()
            .nth(self.cursor_x)
            .map(|(i, _)| i)
            .unwrap_or(line.len())
    }

    fn insert_char(&mut self, c: char) {
        let at = self.byte_offset();
        self.lines[self.cursor_y].insert(at, c);
        self.cursor_x += 1;
    }

    fn delete_char(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
            let at = self.byte_offset();
            self.lines[self.cursor_y].remove(at);
        } else if self.cursor_y > 0 {
            let prev_line = self.lines.remove(self.cursor_y);
            self.cursor_y -= 1;
            self.cursor_x = self.line_len(self.cursor_y);
            self.lines[self.cursor_y].push_str(&prev_line);
        }
    }

    fn new_line(&mut self) {
        let at = self.byte_offset();
        let remaining = self.lines[self.cursor_y].split_off(at);
        self.lines.insert(self.cursor_y + 1, remaining);
        self.cursor_y += 1;
        self.cursor_x = 0;
    }

    fn move_left(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.line_len(self.cursor_y);
        }
    }

    fn move_right(&mut self) {
        if self.cursor_x < self.line_len(self.cursor_y) {
            self.cursor_x += 1;
        } else if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = 0;
        }
    }

    fn move_up(&mut self) {
        if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.cursor_x.min(self.line_len(self.cursor_y));
        }
    }

    fn move_down(&mut self) {
        if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = self.cursor_x.min(self.line_len(self.cursor_y));
        }
    }

    fn text(&self) -> String {
        self.lines.join("\n")
    }

    fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.is_empty())
    }

    fn render(&self) -> Text<'static> {
        if self.is_empty() {
            return Text::from(Span::styled(
                "Ask a PCI DSS question…",
                Style::default().fg(Color::DarkGray),
            ));
        }
        Text::from(
            self.lines
                .iter()
                .map(|l| Line::from(l.clone()))
                .collect::<Vec<_>>(),
        )
    }
}

impl Default for InputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

pub struct App {
    turns: Vec<Turn>,
    input: InputBuffer,
    /// Lines scrolled up from the bottom of the history.
    scroll_back: usize,
    should_quit: bool,
    sender: mpsc::Sender<UiEvent>,
    receiver: mpsc::Receiver<UiEvent>,
    client: Arc<AskClient>,
    backend: Backend,
    active: Option<(TurnId, CancellationToken)>,
}

impl App {
    pub fn new(client: AskClient, backend: Backend) -> Self {
        let (sender, receiver) = mpsc::channel(100);

        Self {
            turns: Vec::new(),
            input: InputBuffer::new(),
            scroll_back: 0,
            should_quit: false,
            sender,
            receiver,
            client: Arc::new(client),
            backend,
            active: None,
        }
    }

    fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    fn draw(&mut self, f: &mut Frame) {
        let [history_area, input_area] =
            Layout::vertical([Constraint::Min(1), Constraint::Length(INPUT_HEIGHT)])
                .areas(f.area());

        let specs: Vec<LineSpec> = self.turns.iter().flat_map(turn_lines).collect();
        let total = rendered_height(&specs, history_area.width);
        let visible = history_area.height as usize;
        let max_back = total.saturating_sub(visible);
        self.scroll_back = self.scroll_back.min(max_back);
        let offset = max_back - self.scroll_back;

        let history = Text::from(
            specs
                .into_iter()
                .map(|spec| Line::from(Span::styled(spec.text, spec.style)))
                .collect::<Vec<_>>(),
        );
        f.render_widget(
            Paragraph::new(history)
                .wrap(Wrap { trim: false })
                .scroll((offset.min(u16::MAX as usize) as u16, 0)),
            history_area,
        );

        let title = if self.is_streaming() {
            format!(
                " {} (Esc to cancel) [Streaming…] ",
                self.client.base().as_str()
            )
        } else {
            format!(
                " {} (Enter to send, Esc to quit) ",
                self.client.base().as_str()
            )
        };
        let input_paragraph = Paragraph::new(self.input.render())
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(title)
                    .border_style(Style::default().fg(Color::DarkGray)),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(input_paragraph, input_area);

        let cursor_x = (self.input.cursor_x + 1) as u16;
        let cursor_y = self.input.cursor_y as u16;
        let x = (input_area.x + cursor_x).min(input_area.x + input_area.width - 2);
        let y = (input_area.y + 1 + cursor_y).min(input_area.y + input_area.height - 2);
        f.set_cursor_position((x, y));
    }

    fn submit(&mut self, question: String) {
        let turn = Turn::new(question);
        let id = turn.id;
        let cancel = CancellationToken::new();
        self.turns.push(turn.clone());
        self.active = Some((id, cancel.clone()));
        self.scroll_back = 0;

        let client = Arc::clone(&self.client);
        let sender = self.sender.clone();
        let backend = self.backend;
        tokio::spawn(async move {
            let updates = sender.clone();
            let turn = client
                .ask(backend, turn, &cancel, |turn, _| {
                    // Every update carries the whole turn, so one dropped on
                    // a full channel is superseded by the next.
                    let _ = updates.try_send(UiEvent::TurnUpdated(turn.clone()));
                })
                .await;
            let _ = sender.send(UiEvent::TurnFinished(turn)).await;
        });
    }

    fn cancel_active(&mut self) {
        if let Some((id, cancel)) = self.active.take() {
            debug!(turn = %id, "cancelling stream");
            cancel.cancel();
            if let Some(slot) = self.turns.iter_mut().find(|t| t.id == id) {
                *slot = slot.clone().cancel();
            }
        }
    }

    fn apply(&mut self, event: UiEvent) {
        match event {
            UiEvent::TurnUpdated(turn) => {
                if let Some(slot) = self.turns.iter_mut().find(|t| t.id == turn.id) {
                    // A finished turn only changes through TurnFinished.
                    if !slot.done {
                        *slot = turn;
                    }
                }
            }
            UiEvent::TurnFinished(turn) => {
                if self.active.as_ref().is_some_and(|(id, _)| *id == turn.id) {
                    self.active = None;
                }
                if let Some(slot) = self.turns.iter_mut().find(|t| t.id == turn.id) {
                    *slot = turn;
                }
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.cancel_active();
            self.should_quit = true;
            return;
        }

        match key.code {
            KeyCode::Esc => {
                if self.is_streaming() {
                    self.cancel_active();
                } else {
                    self.should_quit = true;
                }
            }
            KeyCode::Enter => {
                if key.modifiers.contains(KeyModifiers::SHIFT) {
                    self.input.new_line();
                } else if !self.is_streaming() {
                    let question = self.input.text().trim().to_string();
                    if !question.is_empty() {
                        self.input.clear();
                        self.submit(question);
                    }
                }
            }
            KeyCode::PageUp => self.scroll_back += SCROLL_STEP,
            KeyCode::PageDown => self.scroll_back = self.scroll_back.saturating_sub(SCROLL_STEP),
            KeyCode::Char(c) => self.input.insert_char(c),
            KeyCode::Backspace => self.input.delete_char(),
            KeyCode::Left => self.input.move_left(),
            KeyCode::Right => self.input.move_right(),
            KeyCode::Up => self.input.move_up(),
            KeyCode::Down => self.input.move_down(),
            KeyCode::Home => self.input.cursor_x = 0,
            KeyCode::End => self.input.cursor_x = self.input.line_len(self.input.cursor_y),
            _ => {}
        }
    }

    fn handle_events(&mut self) -> TuiResult<()> {
        while let Ok(event) = self.receiver.try_recv() {
            self.apply(event);
        }

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                self.handle_key(key);
            }
        }

        Ok(())
    }
}

pub fn run_tui(client: AskClient, backend: Backend) -> TuiResult<()> {
    enable_raw_mode()?;
    let _guard = TerminalGuard::new();
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal: TuiTerminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let mut app = App::new(client, backend);
    terminal.draw(|f| app.draw(f))?;

    while !app.should_quit {
        app.handle_events()?;
        terminal.draw(|f| app.draw(f))?;
        std::thread::sleep(Duration::from_millis(10));
    }

    app.cancel_active();
    Ok(())
}
