//! Single-line text input used for the context URI and the pasted redirect.

use ratatui::{
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph},
    Frame,
};

/// Editable text with a char-based cursor.
#[derive(Debug, Default, Clone)]
pub struct InputState {
    value: String,
    /// Cursor position (character offset into `value`).
    cursor: usize,
}

impl InputState {
    pub fn with_value(value: &str) -> Self {
        Self {
            value: value.to_string(),
            cursor: value.chars().count(),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn insert_char(&mut self, c: char) {
        let at = self.byte_offset(self.cursor);
        self.value.insert(at, c);
        self.cursor += 1;
    }

    /// Insert pasted text. Line breaks are dropped, the input is one line.
    pub fn insert_str(&mut self, s: &str) {
        for c in s.chars().filter(|c| *c != '\n' && *c != '\r') {
            self.insert_char(c);
        }
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            let end = self.byte_offset(self.cursor);
            let start = self.byte_offset(self.cursor - 1);
            self.value.drain(start..end);
            self.cursor -= 1;
        }
    }

    pub fn delete(&mut self) {
        if self.cursor < self.value.chars().count() {
            let start = self.byte_offset(self.cursor);
            let end = self.byte_offset(self.cursor + 1);
            self.value.drain(start..end);
        }
    }

    pub fn move_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        if self.cursor < self.value.chars().count() {
            self.cursor += 1;
        }
    }

    pub fn move_home(&mut self) {
        self.cursor = 0;
    }

    pub fn move_end(&mut self) {
        self.cursor = self.value.chars().count();
    }

    pub fn clear(&mut self) {
        self.value.clear();
        self.cursor = 0;
    }

    fn byte_offset(&self, char_pos: usize) -> usize {
        self.value
            .char_indices()
            .nth(char_pos)
            .map(|(i, _)| i)
            .unwrap_or(self.value.len())
    }
}

/// Height of a bordered input: border, text, border.
pub const INPUT_HEIGHT: u16 = 3;

/// Render a bordered input box. When focused the terminal cursor is placed
/// at the edit position.
pub fn render(
    area: Rect,
    frame: &mut Frame,
    state: &InputState,
    title: &str,
    placeholder: &str,
    focused: bool,
) {
    let (border_style, border_type) = if focused {
        (Style::default().fg(Color::Yellow), BorderType::Double)
    } else {
        (Style::default().fg(Color::DarkGray), BorderType::Plain)
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(border_type)
        .border_style(border_style)
        .title(format!(" {} ", title));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    if inner.width == 0 || inner.height == 0 {
        return;
    }

    let width = inner.width as usize;
    let line = if state.value.is_empty() {
        let text: String = placeholder.chars().take(width).collect();
        Line::from(Span::styled(text, Style::default().fg(Color::DarkGray)))
    } else {
        let (visible, _) = visible_window(&state.value, state.cursor, width);
        Line::from(Span::styled(visible, Style::default().fg(Color::White)))
    };
    frame.render_widget(Paragraph::new(line), inner);

    if focused {
        let (_, offset) = visible_window(&state.value, state.cursor, width);
        frame.set_cursor_position((inner.x + offset as u16, inner.y));
    }
}

/// Slice of `value` that fits `width` columns while keeping the cursor in
/// view, plus the cursor column inside that slice.
fn visible_window(value: &str, cursor: usize, width: usize) -> (String, usize) {
    if width == 0 {
        return (String::new(), 0);
    }
    let chars: Vec<char> = value.chars().collect();
    // One column is kept free for the cursor at the end of the text.
    let start = if cursor < width { 0 } else { cursor + 1 - width };
    let end = (start + width).min(chars.len());
    (chars[start..end].iter().collect(), cursor - start)
}
