use std::{
    io::{self, stdout, Stdout, Write},
    ops::{Deref, DerefMut},
};

use crossterm::{
    cursor, execute,
    terminal::{disable_raw_mode, enable_raw_mode, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen},
};

use ratatui::{self, backend::CrosstermBackend};

type TerminalBackend<W> = ratatui::Terminal<CrosstermBackend<W>>;

/// Raw-mode alternate screen, restored when dropped.
pub struct Terminal<W: Write> {
    inner: TerminalBackend<W>,
}

impl Terminal<Stdout> {
    pub fn new() -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = stdout();
        if let Err(err) = execute!(stdout, EnterAlternateScreen, Clear(ClearType::All)) {
            let _ = disable_raw_mode();
            return Err(err);
        }

        let backend = CrosstermBackend::new(stdout);
        let terminal = ratatui::Terminal::new(backend)?;

        Ok(Self { inner: terminal })
    }
}

impl<W: Write> Deref for Terminal<W> {
    type Target = TerminalBackend<W>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<W: Write> DerefMut for Terminal<W> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl<W: Write> Drop for Terminal<W> {
    fn drop(&mut self) {
        let _ = restore_terminal();
    }
}

fn restore_terminal() -> io::Result<()> {
    let mut stdout = stdout();
    execute!(stdout, LeaveAlternateScreen, cursor::Show)?;
    disable_raw_mode()
}
