use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::prelude::*;
use ratatui::widgets::*;
use tracing::{info, warn};

use crate::alias::{sanitize, smart_alias};
use crate::command::build_command;
use crate::fs::FileSystem;
use crate::host::Host;
use crate::input::InputBuffer;
use crate::invocation::{parse_invocation, preprocess};
use crate::probe::{ProbeStatus, Prober};
use crate::registry::{sort_hosts, HostRepository, SortMode};
use crate::select_box::SelectBox;
use crate::settings::PROBE_TIMEOUT;
use crate::terminal::Terminal;
use crate::validate::check_host_paths;

pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");

const TICK: Duration = Duration::from_millis(200);
const HELP_NORMAL: &str = "(q) quit | (↑/↓) move | (Enter) connect | (/) search | (p) pin | (d) delete | \
     (s) sort | (a) add | (c) command | (P) probe | (r) reload";
const HELP_SEARCH: &str = "(Esc) clear search | (↑/↓) move | (Enter) connect";
const HELP_IMPORT: &str = "paste an ssh command | (Enter) add | (Esc) cancel";
const HELP_POPUP: &str = "press any key";
const SEARCH_PROMPT: &str = "/ ";
const IMPORT_PROMPT: &str = "$ ";

enum Mode {
    Normal,
    Search,
    Import,
    Confirm(Host),
    Message(String),
}

/// What the event loop should do after a key press.
#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    Quit,
    Connect(Host),
}

/// The interactive picker. Every mutation goes through the registry and is
/// followed by a fresh query.
pub struct App<R: HostRepository> {
    repo: R,
    fs: Arc<dyn FileSystem>,
    home: Option<PathBuf>,
    hosts: Vec<Host>,
    select_box: SelectBox,
    search: InputBuffer,
    import: InputBuffer,
    mode: Mode,
    sort: SortMode,
    probes: HashMap<String, ProbeStatus>,
    prober: Option<Prober>,
}

impl<R: HostRepository> App<R> {
    pub fn new(repo: R, fs: Arc<dyn FileSystem>, home: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut app = App {
            repo,
            fs,
            home,
            hosts: Vec::new(),
            select_box: SelectBox::new(),
            search: InputBuffer::new(SEARCH_PROMPT),
            import: InputBuffer::new(IMPORT_PROMPT),
            mode: Mode::Normal,
            sort: SortMode::default(),
            probes: HashMap::new(),
            prober: None,
        };
        app.reload().context("failed to load hosts")?;
        Ok(app)
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    fn selected_host(&self) -> Option<&Host> {
        self.select_box.selected().and_then(|i| self.hosts.get(i))
    }

    /// Re-reads the registry with the current query and sort.
    fn reload(&mut self) -> crate::Result<()> {
        let selected = self.selected_host().map(|h| h.alias.clone());
        self.hosts = self.repo.list_hosts(self.search.value())?;
        sort_hosts(&mut self.hosts, self.sort);
        self.select_box.clamp(self.hosts.len());
        if let Some(alias) = selected {
            self.select_box.select_alias(&self.hosts, &alias);
        }
        Ok(())
    }

    fn after_mutation(&mut self, result: crate::Result<()>, focus: Option<&str>) {
        let result = result.and_then(|()| self.reload());
        match result {
            Ok(()) => {
                if let Some(alias) = focus {
                    self.select_box.select_alias(&self.hosts, alias);
                }
            }
            Err(err) => {
                warn!(%err, "picker action failed");
                self.mode = Mode::Message(format!("error: {err}"));
            }
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Option<Action> {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Some(Action::Quit);
        }

        match std::mem::replace(&mut self.mode, Mode::Normal) {
            Mode::Normal => self.normal_key(key),
            Mode::Search => {
                self.mode = Mode::Search;
                self.search_key(key)
            }
            Mode::Import => {
                self.mode = Mode::Import;
                self.import_key(key);
                None
            }
            Mode::Confirm(host) => {
                if matches!(key.code, KeyCode::Char('y') | KeyCode::Char('Y')) {
                    let result = self.repo.delete_host(&host);
                    if result.is_ok() {
                        self.probes.remove(&host.alias);
                    }
                    self.after_mutation(result, None);
                }
                None
            }
            Mode::Message(_) => None,
        }
    }

    fn connect_selected(&self) -> Option<Action> {
        self.selected_host().cloned().map(Action::Connect)
    }

    fn normal_key(&mut self, key: KeyEvent) -> Option<Action> {
        let len = self.hosts.len();
        match key.code {
            KeyCode::Esc | KeyCode::Char('q') => return Some(Action::Quit),
            KeyCode::Up | KeyCode::Char('k') => self.select_box.up(len),
            KeyCode::Down | KeyCode::Char('j') => self.select_box.down(len),
            KeyCode::Enter => return self.connect_selected(),
            KeyCode::Char('/') => self.mode = Mode::Search,
            KeyCode::Char('a') => self.mode = Mode::Import,
            KeyCode::Char('p') => {
                if let Some(host) = self.selected_host().cloned() {
                    let result = self.repo.set_pinned(&host.alias, !host.is_pinned());
                    self.after_mutation(result, Some(&host.alias));
                }
            }
            KeyCode::Char('d') => {
                if let Some(host) = self.selected_host().cloned() {
                    self.mode = Mode::Confirm(host);
                }
            }
            KeyCode::Char('s') => {
                self.sort = self.sort.next();
                self.after_mutation(Ok(()), None);
            }
            KeyCode::Char('c') => {
                if let Some(host) = self.selected_host() {
                    self.mode = Mode::Message(build_command(host));
                }
            }
            KeyCode::Char('P') => self.probe_all(),
            KeyCode::Char('r') => self.after_mutation(Ok(()), None),
            _ => {}
        }
        None
    }

    fn search_key(&mut self, key: KeyEvent) -> Option<Action> {
        let len = self.hosts.len();
        match key.code {
            KeyCode::Esc => {
                self.search.take();
                self.mode = Mode::Normal;
                self.after_mutation(Ok(()), None);
            }
            KeyCode::Enter => return self.connect_selected(),
            KeyCode::Up => self.select_box.up(len),
            KeyCode::Down => self.select_box.down(len),
            _ => {
                if self.search.handle_key(key) {
                    self.after_mutation(Ok(()), None);
                }
            }
        }
        None
    }

    fn import_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                self.import.take();
                self.mode = Mode::Normal;
            }
            KeyCode::Enter => {
                let text = self.import.take();
                self.mode = Mode::Normal;
                match self.import_command(&text) {
                    Ok(alias) => {
                        info!(%alias, "host imported");
                        self.after_mutation(Ok(()), Some(&alias));
                    }
                    Err(err) => self.after_mutation(Err(err), None),
                }
            }
            _ => {
                self.import.handle_key(key);
            }
        }
    }

    /// Parses, path-checks and adds a pasted ssh command.
    fn import_command(&mut self, text: &str) -> crate::Result<String> {
        let mut host = parse_invocation(text)?;
        let named = preprocess(text).0.alias.is_some();
        host.alias = sanitize(&host.alias);
        if !named {
            let existing = self.repo.list_hosts("")?;
            if existing.iter().any(|h| h.answers_to(&host.alias)) {
                host.alias = sanitize(&smart_alias(&host.user, &host.hostname, host.port));
            }
        }

        check_host_paths(self.fs.as_ref(), &host, self.home.as_deref()).into_result()?;
        let alias = host.alias.clone();
        self.repo.add_host(host)?;
        Ok(alias)
    }

    fn probe_all(&mut self) {
        if self.prober.is_none() {
            match Prober::new(PROBE_TIMEOUT) {
                Ok(prober) => self.prober = Some(prober),
                Err(err) => {
                    self.mode = Mode::Message(format!("error: cannot start probes: {err}"));
                    return;
                }
            }
        }
        let Some(prober) = &self.prober else {
            return;
        };
        for host in &self.hosts {
            prober.probe(&host.alias, host.effective_hostname(), host.effective_port());
            self.probes.insert(host.alias.clone(), ProbeStatus::Probing);
        }
    }

    /// Applies finished probe results; runs on the UI thread.
    fn drain_probes(&mut self) {
        if let Some(prober) = &mut self.prober {
            for result in prober.drain() {
                self.probes.insert(result.alias, result.status);
            }
        }
    }

    pub fn draw(&mut self, f: &mut Frame) {
        let input = match self.mode {
            Mode::Search => Some(&self.search),
            Mode::Import => Some(&self.import),
            _ => None,
        };
        let help = match self.mode {
            Mode::Normal => HELP_NORMAL,
            Mode::Search => HELP_SEARCH,
            Mode::Import => HELP_IMPORT,
            Mode::Confirm(_) | Mode::Message(_) => HELP_POPUP,
        };

        let recs = Layout::vertical([
            Constraint::Min(3),
            Constraint::Length(if input.is_some() { 3 } else { 0 }),
            Constraint::Length(1),
        ])
        .split(f.size());

        if let Some(input) = input {
            let line = Paragraph::new(input.line())
                .style(Style::default().fg(Color::Cyan))
                .block(Block::default().borders(Borders::ALL));
            f.render_widget(line, recs[1]);
            f.set_cursor(recs[1].x + 1 + input.visual_cursor() as u16, recs[1].y + 1);
        }

        self.select_box.render(
            f,
            recs[0],
            &self.hosts,
            &self.probes,
            self.search.value(),
            self.sort,
        );
        f.render_widget(
            Paragraph::new(Line::from(help)).alignment(Alignment::Center),
            recs[2],
        );

        let popup = match &self.mode {
            Mode::Confirm(host) => Some(("delete", format!("Delete host '{}'? (y/N)", host.alias))),
            Mode::Message(text) => Some(("lazyssh", text.clone())),
            _ => None,
        };
        if let Some((title, text)) = popup {
            let area = centered(f.size(), 80, text.lines().count() as u16 + 2);
            f.render_widget(Clear, area);
            f.render_widget(
                Paragraph::new(text)
                    .wrap(Wrap { trim: false })
                    .block(Block::default().borders(Borders::ALL).title(title)),
                area,
            );
        }
    }

    /// Runs the picker until the user quits or picks a host to connect to.
    pub fn run(&mut self) -> anyhow::Result<()> {
        let mut terminal = Terminal::new().context("failed to set up the terminal")?;
        let action = loop {
            self.drain_probes();
            terminal.draw(|f| self.draw(f))?;
            if !event::poll(TICK)? {
                continue;
            }
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                if let Some(action) = self.handle_key(key) {
                    break action;
                }
            }
        };
        // drop is needed to cleanup the terminal
        drop(terminal);

        match action {
            Action::Quit => Ok(()),
            Action::Connect(host) => self.connect(&host),
        }
    }

    fn connect(&self, host: &Host) -> anyhow::Result<()> {
        if let Err(err) = self.repo.record_ssh(&host.alias) {
            warn!(alias = %host.alias, %err, "could not record connection");
        }
        info!(alias = %host.alias, "connecting");
        let status = Command::new("ssh")
            .arg(&host.alias)
            .status()
            .context("failed to start ssh")?;
        if !status.success() {
            info!(alias = %host.alias, %status, "ssh exited");
        }
        Ok(())
    }
}

fn centered(area: Rect, width_percent: u16, height: u16) -> Rect {
    let width = (u32::from(area.width) * u32::from(width_percent) / 100) as u16;
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFs;
    use crate::registry::MemoryRepository;
    use ratatui::backend::TestBackend;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn host(alias: &str, hostname: &str) -> Host {
        let mut host = Host::new(alias);
        host.hostname = hostname.into();
        host
    }

    fn app() -> App<MemoryRepository> {
        let repo = MemoryRepository::with_hosts(vec![
            host("web", "10.0.0.1"),
            host("db", "10.0.0.2"),
            host("cache", "10.0.0.3"),
        ]);
        App::new(repo, Arc::new(MemoryFs::new()), None).unwrap()
    }

    fn aliases(app: &App<MemoryRepository>) -> Vec<&str> {
        app.hosts().iter().map(|h| h.alias.as_str()).collect()
    }

    fn type_text(app: &mut App<MemoryRepository>, text: &str) {
        for c in text.chars() {
            app.handle_key(key(KeyCode::Char(c)));
        }
    }

    #[test]
    fn starts_sorted_and_connects_selection() {
        let mut app = app();
        assert_eq!(aliases(&app), vec!["cache", "db", "web"]);
        app.handle_key(key(KeyCode::Down));
        assert_eq!(
            app.handle_key(key(KeyCode::Enter)),
            Some(Action::Connect(host("db", "10.0.0.2")))
        );
        assert_eq!(app.handle_key(key(KeyCode::Char('q'))), Some(Action::Quit));
    }

    #[test]
    fn pin_moves_host_to_top() {
        let mut app = app();
        app.handle_key(key(KeyCode::Up));
        app.handle_key(key(KeyCode::Char('p')));
        assert_eq!(aliases(&app), vec!["web", "cache", "db"]);
        assert!(app.repository().list_hosts("web").unwrap()[0].is_pinned());
    }

    #[test]
    fn delete_needs_confirmation() {
        let mut app = app();
        app.handle_key(key(KeyCode::Char('d')));
        app.handle_key(key(KeyCode::Char('n')));
        assert_eq!(app.hosts().len(), 3);

        app.handle_key(key(KeyCode::Char('d')));
        app.handle_key(key(KeyCode::Char('y')));
        assert_eq!(aliases(&app), vec!["db", "web"]);
    }

    #[test]
    fn search_requeries_registry() {
        let mut app = app();
        app.handle_key(key(KeyCode::Char('/')));
        type_text(&mut app, "0.0.2");
        assert_eq!(aliases(&app), vec!["db"]);

        app.handle_key(key(KeyCode::Esc));
        assert_eq!(app.hosts().len(), 3);
    }

    #[test]
    fn sort_cycles() {
        let mut app = app();
        app.handle_key(key(KeyCode::Char('s')));
        assert_eq!(aliases(&app), vec!["web", "db", "cache"]);
    }

    #[test]
    fn import_adds_parsed_host() {
        let mut app = app();
        app.handle_key(key(KeyCode::Char('a')));
        type_text(&mut app, "ssh -p 2222 admin@host.example");
        app.handle_key(key(KeyCode::Enter));

        let added = app.repository().list_hosts("host.example").unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].alias, "admin-host");
        assert_eq!(added[0].port, Some(2222));
        assert_eq!(app.selected_host().map(|h| h.alias.as_str()), Some("admin-host"));
    }

    #[test]
    fn import_rejects_missing_key_file() {
        let mut app = app();
        app.handle_key(key(KeyCode::Char('a')));
        type_text(&mut app, "ssh -i /nope/key ops@box.example");
        app.handle_key(key(KeyCode::Enter));

        assert!(matches!(app.mode, Mode::Message(ref m) if m.contains("not found")));
        assert_eq!(app.hosts().len(), 3);
    }

    #[test]
    fn command_popup_and_render() {
        let mut app = app();
        app.handle_key(key(KeyCode::Char('c')));
        assert!(matches!(app.mode, Mode::Message(ref m) if m.contains("ssh 10.0.0.3")));

        let mut terminal = ratatui::Terminal::new(TestBackend::new(120, 20)).unwrap();
        terminal.draw(|f| app.draw(f)).unwrap();
        let screen: String = terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|cell| cell.symbol())
            .collect();
        assert!(screen.contains("cache"));
        assert!(screen.contains("lazyssh-alias:cache"));

        app.handle_key(key(KeyCode::Char('x')));
        assert!(matches!(app.mode, Mode::Normal));
    }
}
