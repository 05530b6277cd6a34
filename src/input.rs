use crossterm::event::{Event, KeyEvent};
use std::ops::{Deref, DerefMut};
use unicode_width::UnicodeWidthStr;

use tui_input::{backend::crossterm::EventHandler, Input};

/// A one-line editor with a fixed prompt in front of it.
pub(crate) struct InputBuffer {
    input: Input,
    prompt: &'static str,
}

impl Deref for InputBuffer {
    type Target = Input;

    fn deref(&self) -> &Self::Target {
        &self.input
    }
}

impl DerefMut for InputBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.input
    }
}

impl InputBuffer {
    pub(crate) fn new(prompt: &'static str) -> Self {
        Self {
            input: Input::default(),
            prompt,
        }
    }

    /// Prompt and text as drawn.
    pub(crate) fn line(&self) -> String {
        format!("{}{}", self.prompt, self.input.value())
    }

    pub(crate) fn visual_cursor(&self) -> usize {
        UnicodeWidthStr::width(self.prompt) + self.input.visual_cursor()
    }

    /// Feeds a key to the editor; true when the text changed.
    pub(crate) fn handle_key(&mut self, key: KeyEvent) -> bool {
        self.input
            .handle_event(&Event::Key(key))
            .is_some_and(|change| change.value)
    }

    /// Empties the buffer, returning what it held.
    pub(crate) fn take(&mut self) -> String {
        let value = self.input.value().to_string();
        self.input.reset();
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyCode, KeyModifiers};

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn typing_and_taking() {
        let mut buffer = InputBuffer::new("/ ");
        assert!(buffer.handle_key(key(KeyCode::Char('w'))));
        assert!(buffer.handle_key(key(KeyCode::Char('e'))));
        assert!(!buffer.handle_key(key(KeyCode::Left)));
        assert_eq!(buffer.line(), "/ we");
        assert_eq!(buffer.visual_cursor(), 3);

        assert_eq!(buffer.take(), "we");
        assert_eq!(buffer.value(), "");
    }
}
