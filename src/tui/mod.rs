use std::io;
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::bluetooth::transport::Transport;
use crate::device::Speaker;
use crate::error::Result as LwacpResult;
use crate::protocol::commands::{EQ_INTIMATE, EQ_OFF, EQ_OUT_LOUD, EQ_VOCALS};
use crate::protocol::registry::{DoubleUpMode, Role, VolumeStep};
use crate::protocol::{CommandRegistry, LwacpFrame};

const LOG_LINES: usize = 6;

type FrameBuilder = fn(&CommandRegistry) -> LwacpResult<LwacpFrame>;

#[derive(Clone, Copy)]
enum MenuCommand {
    Frame(FrameBuilder),
    Rename,
}

struct MenuItem {
    section: &'static str,
    label: &'static str,
    command: MenuCommand,
}

fn item(section: &'static str, label: &'static str, build: FrameBuilder) -> MenuItem {
    MenuItem {
        section,
        label,
        command: MenuCommand::Frame(build),
    }
}

fn menu() -> Vec<MenuItem> {
    vec![
        item("EQ", "Out Loud (bass boost)", |r| r.eq_preset(EQ_OUT_LOUD)),
        item("EQ", "Intimate (reduced bass)", |r| r.eq_preset(EQ_INTIMATE)),
        item("EQ", "Vocals (mid boost)", |r| r.eq_preset(EQ_VOCALS)),
        item("EQ", "Off (flat)", |r| r.eq_preset(EQ_OFF)),
        item("Double Up", "Mode: Stereo (L/R channels)", |r| {
            r.double_up_mode(DoubleUpMode::Stereo)
        }),
        item("Double Up", "Mode: Double (same audio)", |r| {
            r.double_up_mode(DoubleUpMode::Double)
        }),
        item("Double Up", "This speaker is LEFT", |r| r.double_up_role(Role::Left)),
        item("Double Up", "This speaker is RIGHT", |r| r.double_up_role(Role::Right)),
        item("Double Up", "Auto-reconnect ON", |r| r.double_up_lock(Some(true))),
        item("Double Up", "Auto-reconnect OFF", |r| r.double_up_lock(Some(false))),
        item("Other", "Announce battery level", |r| r.battery_announce()),
        item("Other", "Volume up", |r| r.volume(VolumeStep::Up)),
        item("Other", "Volume down", |r| r.volume(VolumeStep::Down)),
        item("Other", "Alerts ON", |r| r.sonification(true)),
        item("Other", "Alerts OFF", |r| r.sonification(false)),
        item("Other", "BLE ON", |r| r.ble_state(true)),
        item("Other", "BLE OFF", |r| r.ble_state(false)),
        MenuItem {
            section: "Other",
            label: "Set speaker name",
            command: MenuCommand::Rename,
        },
        item("Other", "Play power-on sound", |r| r.power_on_sound()),
    ]
}

/// A frame for the speaker task to send.
#[derive(Debug)]
pub struct Request {
    pub label: String,
    pub frame: LwacpFrame,
}

/// Result of one request, reported back to the menu.
#[derive(Debug)]
pub struct Reply {
    pub label: String,
    pub result: std::result::Result<(), String>,
}

/// Send menu requests to the speaker until the menu closes.
pub async fn serve<T: Transport>(
    speaker: &mut Speaker<T>,
    mut requests: mpsc::Receiver<Request>,
    replies: mpsc::Sender<Reply>,
) {
    while let Some(req) = requests.recv().await {
        let result = speaker.send(&req.frame).await.map_err(|e| e.to_string());
        if let Err(e) = &result {
            warn!("{} failed: {}", req.label, e);
        }
        let reply = Reply {
            label: req.label,
            result,
        };
        if replies.send(reply).await.is_err() {
            break;
        }
    }
    info!("Menu closed, stopping speaker task");
}

/// Selected item index within the menu.
struct PageState {
    selected: usize,
    item_count: usize,
}

impl PageState {
    fn new(item_count: usize) -> Self {
        Self {
            selected: 0,
            item_count,
        }
    }

    fn move_up(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
        }
    }

    fn move_down(&mut self) {
        if self.item_count > 0 && self.selected < self.item_count - 1 {
            self.selected += 1;
        }
    }
}

pub struct TuiApp {
    title: String,
    items: Vec<MenuItem>,
    page_state: PageState,
    registry: CommandRegistry,
    requests: mpsc::Sender<Request>,
    replies: mpsc::Receiver<Reply>,
    log: Vec<String>,
    /// Name being typed while in rename mode.
    name_input: Option<String>,
}

impl TuiApp {
    fn new(
        title: String,
        registry: CommandRegistry,
        requests: mpsc::Sender<Request>,
        replies: mpsc::Receiver<Reply>,
    ) -> Self {
        let items = menu();
        let page_state = PageState::new(items.len());
        Self {
            title,
            items,
            page_state,
            registry,
            requests,
            replies,
            log: Vec::new(),
            name_input: None,
        }
    }

    fn push_log(&mut self, line: String) {
        self.log.push(line);
        if self.log.len() > LOG_LINES {
            self.log.remove(0);
        }
    }

    fn drain_replies(&mut self) {
        while let Ok(reply) = self.replies.try_recv() {
            let line = match reply.result {
                Ok(()) => format!("{}: sent", reply.label),
                Err(e) => format!("{}: FAILED ({})", reply.label, e),
            };
            self.push_log(line);
        }
    }

    fn submit(&mut self, label: String, built: LwacpResult<LwacpFrame>) {
        match built {
            Ok(frame) => {
                let request = Request {
                    label: label.clone(),
                    frame,
                };
                if self.requests.try_send(request).is_err() {
                    self.push_log(format!("{}: speaker busy or disconnected", label));
                }
            }
            Err(e) => self.push_log(format!("{}: {}", label, e)),
        }
    }

    fn activate_selected(&mut self) {
        let Some(item) = self.items.get(self.page_state.selected) else {
            return;
        };
        let label = item.label.to_string();
        let command = item.command;
        match command {
            MenuCommand::Frame(build) => {
                let built = build(&self.registry);
                self.submit(label, built);
            }
            MenuCommand::Rename => self.name_input = Some(String::new()),
        }
    }

    /// Handle key events, return true if the app should quit.
    fn handle_key(&mut self, code: KeyCode, modifiers: KeyModifiers) -> bool {
        if modifiers.contains(KeyModifiers::CONTROL) && code == KeyCode::Char('c') {
            return true;
        }

        if let Some(input) = self.name_input.as_mut() {
            match code {
                KeyCode::Esc => self.name_input = None,
                KeyCode::Backspace => {
                    input.pop();
                }
                KeyCode::Char(c) => input.push(c),
                KeyCode::Enter => {
                    let name = self.name_input.take().unwrap_or_default();
                    let built = self.registry.set_name(&name);
                    self.submit(format!("Rename to '{}'", name), built);
                }
                _ => {}
            }
            return false;
        }

        match code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Up | KeyCode::Char('k') => self.page_state.move_up(),
            KeyCode::Down | KeyCode::Char('j') => self.page_state.move_down(),
            KeyCode::Enter | KeyCode::Char(' ') => self.activate_selected(),
            _ => {}
        }
        false
    }

    fn draw(&mut self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(0),                         // menu
                Constraint::Length(LOG_LINES as u16 + 2),   // results
                Constraint::Length(1),                      // status bar
            ])
            .split(frame.area());

        let items: Vec<ListItem> = self
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let text = format!("{:<10} {}", item.section, item.label);
                ListItem::new(text).style(if i == self.page_state.selected {
                    Style::default()
                        .fg(Color::Cyan)
                        .bg(Color::DarkGray)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                })
            })
            .collect();
        let list = List::new(items)
            .block(Block::default().borders(Borders::ALL).title(self.title.as_str()));
        frame.render_widget(list, chunks[0]);

        let log_lines: Vec<Line> = self.log.iter().map(|l| Line::from(l.as_str())).collect();
        let log = Paragraph::new(log_lines)
            .block(Block::default().borders(Borders::ALL).title("Results"));
        frame.render_widget(log, chunks[1]);

        let status = match &self.name_input {
            Some(input) => format!(" New name: {}_ | Enter:send Esc:cancel", input),
            None => " q:quit j/k:nav Enter:send".to_string(),
        };
        let status_bar =
            Line::from(status).style(Style::default().fg(Color::White).bg(Color::DarkGray));
        frame.render_widget(status_bar, chunks[2]);
    }
}

/// Run the menu on the calling thread until the operator quits.
pub fn run(
    title: String,
    registry: CommandRegistry,
    requests: mpsc::Sender<Request>,
    replies: mpsc::Receiver<Reply>,
) -> Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = TuiApp::new(title, registry, requests, replies);
    let result = (|| -> Result<()> {
        loop {
            app.drain_replies();
            terminal.draw(|f| app.draw(f))?;

            if event::poll(Duration::from_millis(100))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == event::KeyEventKind::Press
                        && app.handle_key(key.code, key.modifiers)
                    {
                        return Ok(());
                    }
                }
            }
        }
    })();

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> (TuiApp, mpsc::Receiver<Request>, mpsc::Sender<Reply>) {
        let (req_tx, req_rx) = mpsc::channel(8);
        let (rep_tx, rep_rx) = mpsc::channel(8);
        let app = TuiApp::new("test".into(), CommandRegistry::default(), req_tx, rep_rx);
        (app, req_rx, rep_tx)
    }

    #[test]
    fn test_menu_frames_are_valid() {
        let registry = CommandRegistry::default();
        for item in menu() {
            if let MenuCommand::Frame(build) = item.command {
                assert!(build(&registry).is_ok(), "{}", item.label);
            }
        }
    }

    #[test]
    fn test_enter_sends_selected_frame() {
        let (mut app, mut requests, _replies) = app();
        app.handle_key(KeyCode::Enter, KeyModifiers::NONE);
        let req = requests.try_recv().unwrap();
        assert_eq!(req.frame.to_bytes(), vec![0x03, 0x01, 0x64, EQ_OUT_LOUD]);
    }

    #[test]
    fn test_navigation_and_volume() {
        let (mut app, mut requests, _replies) = app();
        for _ in 0..11 {
            app.handle_key(KeyCode::Down, KeyModifiers::NONE);
        }
        app.handle_key(KeyCode::Enter, KeyModifiers::NONE);
        let req = requests.try_recv().unwrap();
        assert_eq!(req.label, "Volume up");
        assert_eq!(req.frame.to_bytes(), vec![0x04, 0x01, 0xBB, 0x01, 0x01]);
    }

    #[test]
    fn test_rename_flow() {
        let (mut app, mut requests, _replies) = app();
        app.page_state.selected = 17;
        app.handle_key(KeyCode::Enter, KeyModifiers::NONE);
        assert!(app.name_input.is_some());
        for c in "Boom".chars() {
            app.handle_key(KeyCode::Char(c), KeyModifiers::NONE);
        }
        // 'q' is text while typing, not quit
        assert!(!app.handle_key(KeyCode::Char('q'), KeyModifiers::NONE));
        app.handle_key(KeyCode::Backspace, KeyModifiers::NONE);
        app.handle_key(KeyCode::Enter, KeyModifiers::NONE);
        let req = requests.try_recv().unwrap();
        assert_eq!(req.frame.params(), b"Boom");
        assert!(app.name_input.is_none());
    }

    #[test]
    fn test_empty_rename_logged_not_sent() {
        let (mut app, mut requests, _replies) = app();
        app.page_state.selected = 17;
        app.handle_key(KeyCode::Enter, KeyModifiers::NONE);
        app.handle_key(KeyCode::Enter, KeyModifiers::NONE);
        assert!(requests.try_recv().is_err());
        assert_eq!(app.log.len(), 1);
    }

    #[test]
    fn test_replies_logged() {
        let (mut app, _requests, replies) = app();
        replies
            .try_send(Reply {
                label: "Volume up".into(),
                result: Err("connection closed".into()),
            })
            .unwrap();
        app.drain_replies();
        assert_eq!(app.log, vec!["Volume up: FAILED (connection closed)".to_string()]);
    }

    #[test]
    fn test_quit_keys() {
        let (mut app, _requests, _replies) = app();
        assert!(app.handle_key(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert!(app.handle_key(KeyCode::Char('q'), KeyModifiers::NONE));
    }
}
