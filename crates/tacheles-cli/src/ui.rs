//! UI rendering with ratatui.
//!
//! Two columns: the conversation list on the left, the chat and input line
//! on the right, with a header and a status bar.

use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style, Stylize};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{
    Block, Borders, List, ListItem, ListState, Paragraph, Scrollbar, ScrollbarOrientation,
    ScrollbarState, Wrap,
};
use ratatui::Frame;
use tacheles_client::InitState;
use tacheles_core::{Message, Role};

use crate::app::{App, Focus, NEW_CONVERSATION_LABEL};

/// Horizontal padding for chat content.
const CHAT_PADDING: u16 = 2;

/// Render the UI.
pub fn render(frame: &mut Frame, app: &App) {
    let area = frame.area();

    let main_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Header bar
            Constraint::Min(5),    // Main content (two columns)
            Constraint::Length(1), // Status bar
        ])
        .split(area);

    render_header_bar(frame, app, main_layout[0]);

    let content_layout = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(25), Constraint::Percentage(75)])
        .split(main_layout[1]);

    render_conversations_panel(frame, app, content_layout[0]);
    render_chat_column(frame, app, content_layout[1]);
    render_status_bar(frame, app, main_layout[2]);
}

/// Truncate a string in the middle with ellipsis if it exceeds `max_len` chars.
fn truncate_middle(s: &str, max_len: usize) -> String {
    let len = s.chars().count();
    if len <= max_len {
        return s.to_string();
    }
    if max_len < 5 {
        return s.chars().take(max_len).collect();
    }
    let keep = (max_len - 3) / 2;
    let start: String = s.chars().take(keep).collect();
    let end: String = s.chars().skip(len - keep).collect();
    format!("{start}...{end}")
}

fn border_style(focused: bool) -> Style {
    if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::Gray)
    }
}

/// Render the header bar with project name and backend status.
fn render_header_bar(frame: &mut Frame, app: &App, area: Rect) {
    let (status_text, status_style) = if app.backend_reachable {
        ("connected", Style::default().fg(Color::Green))
    } else {
        ("unreachable", Style::default().fg(Color::Red))
    };

    let title = "TACHELES";
    let max_url_width = (area.width as usize / 2).saturating_sub(15);
    let display_url = truncate_middle(app.backend_url(), max_url_width);
    let right_text = format!("{display_url} [{status_text}]");
    let padding = (area.width as usize).saturating_sub(title.len() + right_text.chars().count());

    let line = Line::from(vec![
        Span::styled(title, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw(" ".repeat(padding)),
        Span::raw(display_url),
        Span::raw(" ["),
        Span::styled(status_text, status_style),
        Span::raw("]"),
    ]);

    let header = Paragraph::new(line).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

/// Render the conversation list.
fn render_conversations_panel(frame: &mut Frame, app: &App, area: Rect) {
    let is_focused = app.focus == Focus::Conversations;
    let current = app.controller().current_conversation();

    let block = Block::default()
        .title(" Conversations ")
        .borders(Borders::ALL)
        .border_style(border_style(is_focused));

    let mut items: Vec<ListItem> = app
        .conversations
        .iter()
        .map(|conversation| {
            let style = if Some(conversation.id) == current {
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(Span::styled(conversation.label(), style))
        })
        .collect();
    items.push(ListItem::new(Span::styled(
        NEW_CONVERSATION_LABEL,
        Style::default().fg(Color::Yellow),
    )));

    let list = List::new(items)
        .block(block)
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    let mut state = ListState::default();
    state.select(Some(app.list_cursor));

    frame.render_stateful_widget(list, area, &mut state);
}

/// Render the right column containing chat and input as one unit.
fn render_chat_column(frame: &mut Frame, app: &App, area: Rect) {
    let is_focused = app.focus == Focus::Chat;

    let title = match app.controller().current_conversation() {
        Some(id) => format!(" Chat: Conversation {id} "),
        None => " Chat ".to_string(),
    };

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(border_style(is_focused));

    let inner_area = block.inner(area);
    frame.render_widget(block, area);

    let inner_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(1),    // Chat messages
            Constraint::Length(1), // Separator line
            Constraint::Length(1), // Input line
        ])
        .split(inner_area);

    let chat_area_full = inner_layout[0];
    let chat_area = Rect::new(
        chat_area_full.x + CHAT_PADDING,
        chat_area_full.y,
        chat_area_full.width.saturating_sub(CHAT_PADDING * 2 + 1), // +1 for scrollbar
        chat_area_full.height,
    );

    render_messages(frame, app, chat_area, chat_area_full);
    render_input_line(frame, app, inner_layout[1], inner_layout[2], is_focused);
}

fn render_messages(frame: &mut Frame, app: &App, chat_area: Rect, scrollbar_area: Rect) {
    let messages = app.messages();

    if messages.is_empty() && !app.is_sending() {
        let help = match app.controller().init_state() {
            InitState::Uninitialized | InitState::Initializing => "Connecting to backend...",
            InitState::Failed(_) => "Could not start a session",
            InitState::Ready if app.controller().is_loading() => "Loading conversation...",
            InitState::Ready => "Type a message and press Enter to send",
        };
        let text = Paragraph::new(help)
            .style(Style::default().fg(Color::DarkGray))
            .wrap(Wrap { trim: true });
        frame.render_widget(text, chat_area);
        return;
    }

    let mut lines: Vec<Line> = Vec::new();
    for message in &messages {
        let (label, color) = match message.role {
            Role::User => ("You", Color::Cyan),
            Role::Assistant => ("Assistant", Color::Green),
            Role::System => ("System", Color::Magenta),
        };
        lines.push(Line::from(Span::styled(
            label,
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        )));
        lines.extend(message.content.lines().map(|l| Line::from(l.to_string())));
        lines.push(Line::from(""));
    }

    if app.is_sending() && !messages.last().is_some_and(Message::is_assistant) {
        lines.push(Line::from(Span::styled(
            "Assistant",
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        )));
        lines.push(Line::from(vec![
            Span::styled(app.spinner_char(), Style::default().fg(Color::Yellow)),
            Span::styled(" thinking...", Style::default().fg(Color::DarkGray)),
        ]));
    }

    let text = Text::from(lines);
    let visible_lines = chat_area.height as usize;
    let total_wrapped_lines = calculate_wrapped_line_count(&text, chat_area.width as usize);

    // chat_scroll counts lines up from the bottom; Paragraph scrolls from the top.
    let max_scroll = total_wrapped_lines.saturating_sub(visible_lines);
    let effective_scroll = app.chat_scroll.min(max_scroll);
    let scroll_offset = max_scroll.saturating_sub(effective_scroll);

    let paragraph = Paragraph::new(text)
        .wrap(Wrap { trim: false })
        .scroll((u16::try_from(scroll_offset).unwrap_or(u16::MAX), 0));
    frame.render_widget(paragraph, chat_area);

    if total_wrapped_lines > visible_lines {
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
            .begin_symbol(Some("▲"))
            .end_symbol(Some("▼"));
        let mut scrollbar_state = ScrollbarState::new(total_wrapped_lines)
            .position(scroll_offset)
            .viewport_content_length(visible_lines);
        frame.render_stateful_widget(scrollbar, scrollbar_area, &mut scrollbar_state);
    }
}

/// Render the input line at the bottom of the chat column.
fn render_input_line(
    frame: &mut Frame,
    app: &App,
    separator_area: Rect,
    input_area: Rect,
    is_focused: bool,
) {
    let separator = Paragraph::new("─".repeat(separator_area.width as usize))
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(separator, separator_area);

    let prompt = if is_focused { "> " } else { "│ " };
    let prompt_color = if is_focused && !app.is_sending() {
        Color::Cyan
    } else {
        Color::DarkGray
    };

    let input_line = Line::from(vec![
        Span::styled(prompt, Style::default().fg(prompt_color)),
        Span::styled(app.input.as_str(), Style::default().fg(Color::White)),
    ]);
    frame.render_widget(Paragraph::new(input_line), input_area);

    if is_focused {
        let cursor = u16::try_from(app.cursor_position).unwrap_or(u16::MAX);
        let x = input_area.x.saturating_add(2).saturating_add(cursor);
        frame.set_cursor_position((x, input_area.y));
    }
}

/// Render the status bar.
fn render_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let mode_indicator = match app.focus {
        Focus::Chat if app.is_sending() => {
            Span::styled(" SENDING ", Style::default().fg(Color::Black).bg(Color::Yellow))
        }
        Focus::Chat => Span::styled(" CHAT ", Style::default().fg(Color::Black).bg(Color::Green)),
        Focus::Conversations => {
            Span::styled(" LIST ", Style::default().fg(Color::Black).bg(Color::Magenta))
        }
    };

    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow));

    let status = if let Some(error) = app.error() {
        Line::from(vec![
            mode_indicator,
            Span::styled(" ERROR: ", Style::default().fg(Color::Red).bold()),
            Span::styled(error, Style::default().fg(Color::Red)),
        ])
    } else if let Some(ref status) = app.status_message {
        Line::from(vec![
            mode_indicator,
            Span::styled(format!(" {status}"), Style::default().fg(Color::Green)),
        ])
    } else if app.focus == Focus::Chat {
        Line::from(vec![
            mode_indicator,
            Span::raw(" "),
            key("Enter"),
            Span::raw(":send "),
            key("Esc"),
            Span::raw(if app.is_sending() { ":cancel " } else { ":list " }),
            key("Ctrl+N"),
            Span::raw(":new "),
            key("Ctrl+C"),
            Span::raw(":quit"),
        ])
    } else {
        Line::from(vec![
            mode_indicator,
            Span::raw(" "),
            key("Enter"),
            Span::raw(":open "),
            key("Tab"),
            Span::raw(":chat "),
            key("Ctrl+N"),
            Span::raw(":new "),
            key("q"),
            Span::raw(":quit"),
        ])
    };

    let status_bar = Paragraph::new(status).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(status_bar, area);
}

/// Calculate the number of visual lines after text wrapping.
fn calculate_wrapped_line_count(text: &Text, available_width: usize) -> usize {
    if available_width == 0 {
        return text.lines.len();
    }

    text.lines
        .iter()
        .map(|line| line.width().div_ceil(available_width).max(1))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;
    use tacheles_client::{ClientConfig, ConversationController};
    use tacheles_core::{ConversationId, ConversationSummary};

    fn draw(app: &App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(80, 20)).unwrap();
        terminal.draw(|f| render(f, app)).unwrap();
        let buffer = terminal.backend().buffer();
        let width = buffer.area.width as usize;
        buffer
            .content()
            .chunks(width)
            .map(|row| row.iter().map(ratatui::buffer::Cell::symbol).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn app() -> App {
        let config = ClientConfig::default();
        let controller = ConversationController::connect(&config).unwrap();
        App::new(controller, config.backend_url)
    }

    #[test]
    fn very_long_input_does_not_overflow_cursor() {
        let mut app = app();
        app.input = "a".repeat(70_000);
        app.cursor_position = 70_000;

        let screen = draw(&app);
        assert!(screen.contains("> aaa"));
    }

    #[test]
    fn truncate_middle_keeps_short_strings() {
        assert_eq!(truncate_middle("abc", 10), "abc");
        assert_eq!(truncate_middle("abcdefghijkl", 9), "abc...jkl");
        assert_eq!(truncate_middle("äöüäöüäöü", 4), "äöüä");
    }

    #[test]
    fn wrapped_line_count_rounds_up() {
        let text = Text::from(vec![Line::from("12345"), Line::from(""), Line::from("1")]);
        assert_eq!(calculate_wrapped_line_count(&text, 2), 3 + 1 + 1);
    }

    #[test]
    fn renders_conversation_list_and_messages() {
        let mut app = app();
        app.conversations = vec![ConversationSummary {
            id: ConversationId::new(7),
            user_id: None,
        }];
        app.controller().store().bind(
            ConversationId::new(7),
            vec![Message::user("Hello, how are you?"), Message::assistant("Hello!")],
        );

        let screen = draw(&app);

        assert!(screen.contains("Conversation 7"));
        assert!(screen.contains(NEW_CONVERSATION_LABEL));
        assert!(screen.contains("You"));
        assert!(screen.contains("Hello, how are you?"));
        assert!(screen.contains("Assistant"));
        assert!(screen.contains("Hello!"));
    }

    #[test]
    fn renders_error_in_status_bar() {
        let app = app();
        app.controller().surface().set_error("backend down");

        let screen = draw(&app);

        assert!(screen.contains("ERROR: backend down"));
    }
}
