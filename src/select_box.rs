use std::collections::HashMap;

use chrono::{DateTime, Utc};
use ratatui::prelude::*;
use ratatui::widgets::*;
use unicode_width::UnicodeWidthStr;

use fuzzy_matcher::{skim::SkimMatcherV2, FuzzyMatcher};

use crate::host::Host;
use crate::probe::ProbeStatus;
use crate::registry::SortMode;

const PIN_SYMBOL: &str = "★";
const HEADERS: [&str; 8] = ["", "Alias", "Host", "User", "Port", "Tags", "Last seen", "Status"];

/// The host table and its cursor.
pub(crate) struct SelectBox {
    state: TableState,
}

impl SelectBox {
    pub(crate) fn new() -> Self {
        Self {
            state: TableState::default().with_selected(Some(0)),
        }
    }

    pub(crate) fn selected(&self) -> Option<usize> {
        self.state.selected()
    }

    /// Keeps the cursor inside a list of `len` rows.
    pub(crate) fn clamp(&mut self, len: usize) {
        let selected = match (len, self.state.selected()) {
            (0, _) => None,
            (_, Some(i)) => Some(i.min(len - 1)),
            (_, None) => Some(0),
        };
        self.state.select(selected);
    }

    /// Moves the cursor to the row showing `alias`, if any.
    pub(crate) fn select_alias(&mut self, hosts: &[Host], alias: &str) {
        if let Some(i) = hosts.iter().position(|h| h.alias == alias) {
            self.state.select(Some(i));
        }
    }

    pub(crate) fn up(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i));
    }

    pub(crate) fn down(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.state.select(Some(i));
    }

    pub(crate) fn render(
        &mut self,
        f: &mut Frame,
        area: Rect,
        hosts: &[Host],
        probes: &HashMap<String, ProbeStatus>,
        query: &str,
        sort: SortMode,
    ) {
        let now = Utc::now();
        let matcher = SkimMatcherV2::default();
        let highlight = |text: &str| -> Line<'static> {
            if query.is_empty() {
                return Line::from(text.to_string());
            }
            let indices = matcher
                .fuzzy_indices(text, query)
                .map(|(_, indices)| indices)
                .unwrap_or_default();
            Line::from(highlight_spans(text, &indices))
        };

        let rows: Vec<Row> = hosts
            .iter()
            .map(|host| {
                let status = probes.get(&host.alias).cloned().unwrap_or_default();
                let status_style = match status {
                    ProbeStatus::Up(_) => Style::default().fg(Color::Green),
                    ProbeStatus::Down(_) => Style::default().fg(Color::Red),
                    _ => Style::default().fg(Color::DarkGray),
                };
                Row::new(vec![
                    Cell::from(if host.is_pinned() { PIN_SYMBOL } else { "" })
                        .style(Style::default().fg(Color::Yellow)),
                    Cell::from(highlight(&host.alias)),
                    Cell::from(highlight(host.effective_hostname())),
                    Cell::from(highlight(&host.user)),
                    Cell::from(host.effective_port().to_string()),
                    Cell::from(highlight(&host.tags.join(","))),
                    Cell::from(last_seen_label(host.last_seen, now)),
                    Cell::from(status.label()).style(status_style),
                ])
            })
            .collect();

        let width = |field: fn(&Host) -> String, header: &str| -> u16 {
            hosts
                .iter()
                .map(|h| UnicodeWidthStr::width(field(h).as_str()))
                .chain(std::iter::once(UnicodeWidthStr::width(header)))
                .max()
                .unwrap_or(0) as u16
        };
        let widths = [
            Constraint::Length(1),
            Constraint::Length(width(|h| h.alias.clone(), HEADERS[1]) + 1),
            Constraint::Min(width(|h| h.effective_hostname().to_string(), HEADERS[2])),
            Constraint::Length(width(|h| h.user.clone(), HEADERS[3]) + 1),
            Constraint::Length(5),
            Constraint::Min(width(|h| h.tags.join(","), HEADERS[5]).min(24)),
            Constraint::Length(9),
            Constraint::Length(10),
        ];

        let header = Row::new(
            HEADERS
                .iter()
                .map(|h| Cell::from(*h).style(Style::default().add_modifier(Modifier::UNDERLINED))),
        )
        .style(Style::default().add_modifier(Modifier::BOLD));

        let title = format!(" {} hosts · sort: {} ", hosts.len(), sort.label());
        let table = Table::new(rows, widths)
            .header(header)
            .block(Block::default().borders(Borders::ALL).title(title))
            .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
            .highlight_spacing(HighlightSpacing::Always);

        f.render_stateful_widget(table, area, &mut self.state);
    }
}

/// Coarse age of a last-seen time, e.g. `5m`, `3h`, `12d`.
pub(crate) fn last_seen_label(last_seen: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(seen) = last_seen else {
        return "-".to_string();
    };
    let age = now.signed_duration_since(seen);
    if age.num_minutes() < 1 {
        "just now".to_string()
    } else if age.num_hours() < 1 {
        format!("{}m", age.num_minutes())
    } else if age.num_days() < 1 {
        format!("{}h", age.num_hours())
    } else {
        format!("{}d", age.num_days())
    }
}

fn highlight_spans(input: &str, indices: &[usize]) -> Vec<Span<'static>> {
    let mut spans = Vec::new();
    let mut current_segment = String::new();

    let highlight_style = Style::default()
        .fg(Color::Rgb(250, 0, 0))
        .bg(Color::Rgb(0xFF, 0xFC, 0x67))
        .add_modifier(Modifier::BOLD);
    for (i, c) in input.chars().enumerate() {
        if indices.contains(&i) {
            if !current_segment.is_empty() {
                spans.push(Span::raw(std::mem::take(&mut current_segment)));
            }
            spans.push(Span::styled(c.to_string(), highlight_style));
        } else {
            current_segment.push(c);
        }
    }

    if !current_segment.is_empty() {
        spans.push(Span::raw(current_segment));
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn cursor_wraps_and_clamps() {
        let mut select = SelectBox::new();
        select.up(3);
        assert_eq!(select.selected(), Some(2));
        select.down(3);
        assert_eq!(select.selected(), Some(0));

        select.up(3);
        select.clamp(2);
        assert_eq!(select.selected(), Some(1));
        select.clamp(0);
        assert_eq!(select.selected(), None);
        select.clamp(4);
        assert_eq!(select.selected(), Some(0));
    }

    #[test]
    fn ages() {
        let now = Utc::now();
        assert_eq!(last_seen_label(None, now), "-");
        assert_eq!(last_seen_label(Some(now), now), "just now");
        assert_eq!(last_seen_label(Some(now - Duration::minutes(5)), now), "5m");
        assert_eq!(last_seen_label(Some(now - Duration::hours(3)), now), "3h");
        assert_eq!(last_seen_label(Some(now - Duration::days(12)), now), "12d");
    }

    #[test]
    fn spans_split_on_matches() {
        let spans = highlight_spans("web", &[1]);
        let texts: Vec<&str> = spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(texts, vec!["w", "e", "b"]);
        assert_eq!(spans[1].style.add_modifier, Modifier::BOLD);
    }
}
