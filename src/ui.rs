use std::cell::Cell;
use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, Padding, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use unicode_width::UnicodeWidthStr;

use crate::controller::{
    AuthField, AuthForm, CardState, Controller, EditorField, EditorForm, FormMode,
    Layout as PostLayout, Modal, View,
};
use crate::render::{self, LineStyles};

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_PANEL_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const CURSOR: &str = "▏";

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let percent_x = percent_x.min(100);
    let percent_y = percent_y.min(100);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage(100 - percent_y - (100 - percent_y) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}

fn pad_lines_to_width(lines: &mut [Line<'static>], width: u16) {
    let width = width as usize;
    if width == 0 {
        return;
    }

    for line in lines {
        let mut current_width = 0usize;
        for span in &line.spans {
            current_width =
                current_width.saturating_add(UnicodeWidthStr::width(span.content.as_ref()));
        }
        if current_width >= width {
            continue;
        }
        let pad_style = line.spans.last().map(|span| span.style).unwrap_or_default();
        let padding = " ".repeat(width - current_width);
        line.spans.push(Span::styled(padding, pad_style));
    }
}

fn restyle_lines(lines: &mut [Line<'static>], bg: Color) {
    for line in lines {
        for span in line.spans.iter_mut() {
            span.style = span.style.bg(bg);
        }
    }
}

fn card_styles() -> LineStyles {
    LineStyles {
        meta: Style::default().fg(COLOR_TEXT_SECONDARY),
        title: Style::default().fg(COLOR_TEXT_PRIMARY),
        body: Style::default().fg(COLOR_TEXT_PRIMARY),
        badge: Style::default().fg(COLOR_ACCENT),
    }
}

/// Keeps `[start, end)` inside a window of `height` lines starting at `offset`.
fn scroll_to_fit(offset: usize, start: usize, end: usize, height: usize) -> usize {
    if height == 0 {
        return start;
    }
    if start < offset {
        return start;
    }
    if end > offset + height {
        return end.saturating_sub(height).min(start);
    }
    offset
}

pub struct Options {
    pub controller: Controller,
    pub config_path: String,
}

pub struct Model {
    controller: Controller,
    spinner: Spinner,
    needs_redraw: bool,
    config_path: String,
    list_offset: Cell<usize>,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        let mut model = Self {
            controller: opts.controller,
            spinner: Spinner::new(),
            needs_redraw: true,
            config_path: opts.config_path,
            list_offset: Cell::new(0),
        };
        model.controller.start();
        model
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            if self.controller.poll_async() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        if self.handle_key(key) {
                            break;
                        }
                        self.mark_dirty();
                    }
                    Event::Resize(_, _) => self.mark_dirty(),
                    _ => {}
                }
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.controller.is_loading() {
                    if self.spinner.advance() {
                        self.mark_dirty();
                    }
                } else {
                    self.spinner.reset();
                }
            }
        }

        Ok(())
    }

    /// Returns true when the app should exit.
    fn handle_key(&mut self, key: KeyEvent) -> bool {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        if ctrl && key.code == KeyCode::Char('c') {
            return true;
        }
        if self.controller.modal().is_some() {
            self.handle_modal_key(key.code, ctrl);
            return false;
        }
        match self.controller.view() {
            View::Login | View::Register => self.handle_auth_key(key.code, ctrl),
            View::Posts => self.handle_posts_key(key.code),
        }
    }

    fn handle_modal_key(&mut self, code: KeyCode, ctrl: bool) {
        let c = &mut self.controller;
        match c.modal() {
            Some(Modal::Alert(_)) => c.dismiss_modal(),
            Some(Modal::Confirm { .. }) => match code {
                KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => c.confirm(true),
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => c.confirm(false),
                _ => {}
            },
            Some(Modal::Editor(form)) => {
                let field = form.field;
                match code {
                    KeyCode::Esc => c.dismiss_modal(),
                    KeyCode::Char('s') if ctrl => c.submit_editor(),
                    KeyCode::Tab | KeyCode::Down => c.cycle_field(true),
                    KeyCode::BackTab | KeyCode::Up => c.cycle_field(false),
                    KeyCode::Enter if field == EditorField::Content => c.input_newline(),
                    KeyCode::Enter => c.submit_editor(),
                    KeyCode::Backspace => c.input_backspace(),
                    KeyCode::Char(ch) if !ctrl => c.input_char(ch),
                    _ => {}
                }
            }
            Some(Modal::Comment { .. }) => match code {
                KeyCode::Esc => c.dismiss_modal(),
                KeyCode::Enter => c.submit_comment(),
                KeyCode::Backspace => c.input_backspace(),
                KeyCode::Char(ch) if !ctrl => c.input_char(ch),
                _ => {}
            },
            None => {}
        }
    }

    fn handle_auth_key(&mut self, code: KeyCode, ctrl: bool) -> bool {
        let view = self.controller.view();
        match code {
            KeyCode::Esc if view == View::Register => self.controller.show_login(),
            KeyCode::Esc => return true,
            KeyCode::Char('r') if ctrl && view == View::Login => self.controller.show_register(),
            KeyCode::Tab | KeyCode::Down => self.controller.cycle_field(true),
            KeyCode::BackTab | KeyCode::Up => self.controller.cycle_field(false),
            KeyCode::Enter if view == View::Register => self.controller.submit_register(),
            KeyCode::Enter => self.controller.submit_login(),
            KeyCode::Backspace => self.controller.input_backspace(),
            KeyCode::Char(ch) if !ctrl => self.controller.input_char(ch),
            _ => {}
        }
        false
    }

    fn handle_posts_key(&mut self, code: KeyCode) -> bool {
        let c = &mut self.controller;
        match code {
            KeyCode::Char('q') => return true,
            KeyCode::Char('j') | KeyCode::Down => c.select_next(),
            KeyCode::Char('k') | KeyCode::Up => c.select_prev(),
            KeyCode::Char('J') => c.select_next_comment(),
            KeyCode::Char('K') => c.select_prev_comment(),
            KeyCode::Char('l') | KeyCode::Char(']') | KeyCode::Right => c.next_page(),
            KeyCode::Char('h') | KeyCode::Char('[') | KeyCode::Left => c.prev_page(),
            KeyCode::Enter | KeyCode::Char('c') => c.toggle_comments(),
            KeyCode::Char('L') => c.like_selected(),
            KeyCode::Char('n') => c.open_new_post(),
            KeyCode::Char('e') => c.open_edit_selected(),
            KeyCode::Char('d') => c.request_delete_post(),
            KeyCode::Char('x') => c.request_delete_comment(),
            KeyCode::Char('a') => c.open_comment_input(),
            KeyCode::Char('s') => c.share_selected(),
            KeyCode::Char('r') => c.refresh(),
            KeyCode::Char('o') => c.logout(),
            KeyCode::Char('v') => c.toggle_layout(),
            _ => {}
        }
        false
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        let status_text = if self.controller.is_loading() {
            format!("{} {}", self.spinner.frame(), self.controller.status())
                .trim()
                .to_string()
        } else {
            self.controller.status().to_string()
        };
        let status_line = Paragraph::new(status_text).style(
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status_line, layout[0]);

        match self.controller.view() {
            View::Login | View::Register => self.draw_auth(frame, layout[1]),
            View::Posts => match self.controller.layout() {
                PostLayout::Archive => self.draw_archive(frame, layout[1]),
                PostLayout::Carousel => self.draw_carousel(frame, layout[1]),
            },
        }

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .bg(COLOR_PANEL_BG)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(footer, layout[2]);

        if let Some(modal) = self.controller.modal() {
            draw_modal(frame, layout[1], modal);
        }
    }

    fn pane_block(&self, title: String, focused: bool) -> Block<'static> {
        let border_style = if focused {
            Style::default().fg(COLOR_BORDER_FOCUSED)
        } else {
            Style::default().fg(COLOR_BORDER_IDLE)
        };
        let title_style = if focused {
            Style::default()
                .fg(COLOR_ACCENT)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(COLOR_TEXT_SECONDARY)
        };
        Block::default()
            .title(Span::styled(title, title_style))
            .borders(Borders::ALL)
            .border_style(border_style)
            .style(Style::default().bg(COLOR_PANEL_BG))
            .padding(Padding::uniform(1))
    }

    fn posts_title(&self) -> String {
        let mut title = format!("Posts · page {}", self.controller.page() + 1);
        if self.controller.is_last_page() {
            title.push_str(" (last)");
        }
        if let Some(me) = self.controller.me() {
            title.push_str(&format!(" · {me}"));
            if let Some(email) = self.controller.claims_email() {
                title.push_str(&format!(" <{email}>"));
            }
        }
        title
    }

    fn draw_auth(&self, frame: &mut Frame<'_>, area: Rect) {
        let view = self.controller.view();
        let form = self.controller.auth_form();
        let popup = centered_rect(60, 70, area);
        let title = match view {
            View::Register => "Create account",
            _ => "Log in",
        };
        let mut lines: Vec<Line<'static>> = Vec::new();
        for field in AuthForm::fields(view) {
            let (label, value) = match field {
                AuthField::Name => ("Name (optional)", form.name.clone()),
                AuthField::Username => ("Username", form.username.clone()),
                AuthField::Email => ("Email", form.email.clone()),
                AuthField::Password => ("Password", "•".repeat(form.password.chars().count())),
            };
            lines.push(field_line(label, &value, form.field == *field));
            lines.push(Line::default());
        }
        if !form.status.is_empty() {
            lines.push(form_status(&form.status));
        }
        let block = self.pane_block(title.to_string(), true);
        frame.render_widget(
            Paragraph::new(Text::from(lines))
                .block(block)
                .wrap(Wrap { trim: false }),
            popup,
        );
    }

    fn card_lines(&self, index: usize, width: usize) -> Vec<Line<'static>> {
        let posts = self.controller.posts();
        let post = &posts[index];
        let me = self.controller.me();
        let state = self.controller.card_state(post.id);
        let mut lines = render::post_lines(
            post,
            me.as_deref(),
            width,
            state == CardState::Expanded,
            card_styles(),
        );
        if state == CardState::Expanded {
            lines.extend(self.comment_block(post.id, index, width));
        }
        lines
    }

    fn comment_block(&self, post_id: i64, index: usize, width: usize) -> Vec<Line<'static>> {
        let styles = LineStyles {
            meta: Style::default().fg(COLOR_TEXT_SECONDARY),
            body: Style::default().fg(COLOR_TEXT_PRIMARY),
            ..card_styles()
        };
        let mut lines = Vec::new();
        if let Some(err) = self.controller.comments_error(post_id) {
            lines.push(Line::from(Span::styled(
                format!("  {err}"),
                Style::default().fg(COLOR_ERROR),
            )));
            return lines;
        }
        match self.controller.comments_for(post_id) {
            None => lines.push(Line::from(Span::styled(
                "  Loading comments...".to_string(),
                styles.meta,
            ))),
            Some([]) => lines.push(Line::from(Span::styled(
                "  No comments yet.".to_string(),
                styles.meta,
            ))),
            Some(comments) => {
                let me = self.controller.me();
                let focused = index == self.controller.selected_index();
                for (idx, comment) in comments.iter().enumerate() {
                    let selected = focused && idx == self.controller.selected_comment();
                    lines.extend(render::comment_lines(
                        comment,
                        me.as_deref(),
                        width,
                        selected,
                        styles,
                    ));
                }
            }
        }
        if self.controller.comments_loading(post_id) && self.controller.comments_for(post_id).is_some() {
            lines.push(Line::from(Span::styled(
                "  Refreshing...".to_string(),
                styles.meta,
            )));
        }
        lines
    }

    fn draw_archive(&self, frame: &mut Frame<'_>, area: Rect) {
        let block = self.pane_block(self.posts_title(), true);
        let inner = block.inner(area);
        let width = inner.width as usize;
        let height = inner.height as usize;

        if self.controller.posts().is_empty() {
            let message = if self.controller.posts_loaded() {
                "No posts yet"
            } else {
                "Loading posts..."
            };
            frame.render_widget(
                Paragraph::new(message)
                    .style(Style::default().fg(COLOR_TEXT_SECONDARY))
                    .block(block),
                area,
            );
            return;
        }

        let selected = self.controller.selected_index();
        let mut lines: Vec<Line<'static>> = Vec::new();
        let mut selected_range = (0, 0);
        for index in 0..self.controller.posts().len() {
            let start = lines.len();
            let mut card = self.card_lines(index, width);
            if index == selected {
                pad_lines_to_width(&mut card, inner.width);
                restyle_lines(&mut card, COLOR_PANEL_SELECTED_BG);
            }
            lines.extend(card);
            if index == selected {
                selected_range = (start, lines.len());
            }
            lines.push(Line::default());
        }

        let offset = scroll_to_fit(
            self.list_offset.get(),
            selected_range.0,
            selected_range.1,
            height,
        );
        self.list_offset.set(offset);
        frame.render_widget(
            Paragraph::new(Text::from(lines))
                .block(block)
                .scroll((offset.min(u16::MAX as usize) as u16, 0)),
            area,
        );
    }

    fn draw_carousel(&self, frame: &mut Frame<'_>, area: Rect) {
        let total = self.controller.posts().len();
        if total == 0 {
            self.draw_archive(frame, area);
            return;
        }
        let selected = self.controller.selected_index();
        let card_area = centered_rect(80, 100, area);
        let title = format!("{} · {}/{}", self.posts_title(), selected + 1, total);
        let block = self.pane_block(title, true);
        let inner = block.inner(card_area);
        let mut lines = self.card_lines(selected, inner.width as usize);
        lines.push(Line::default());
        lines.push(Line::from(Span::styled(
            "‹ k   j ›".to_string(),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        )));
        frame.render_widget(
            Paragraph::new(Text::from(lines))
                .block(block)
                .alignment(Alignment::Left),
            card_area,
        );
    }

    fn footer_text(&self) -> String {
        if let Some(modal) = self.controller.modal() {
            return match modal {
                Modal::Alert(_) => "Press any key to dismiss".to_string(),
                Modal::Confirm { .. } => "y confirm · n cancel".to_string(),
                Modal::Editor(_) => {
                    "Tab next field · Enter newline in content · Ctrl+S save · Esc cancel"
                        .to_string()
                }
                Modal::Comment { .. } => "Enter send · Esc cancel".to_string(),
            };
        }

        match self.controller.view() {
            View::Login => format!(
                "Tab switch field · Enter log in · Ctrl+R register · Esc quit · config {}",
                self.config_path
            ),
            View::Register => "Tab switch field · Enter create account · Esc back".to_string(),
            View::Posts => {
                let mut parts: Vec<&str> = vec!["j/k move", "Enter comments", "L like"];
                if self.controller.selected_post().map_or(false, |post| {
                    self.controller.card_state(post.id) == CardState::Expanded
                }) {
                    parts.push("J/K comment");
                    parts.push("a reply");
                    parts.push("x delete comment");
                }
                parts.extend(["n new", "e edit", "d delete", "s share", "h/l page"]);
                parts.extend(["v layout", "r refresh", "o logout", "q quit"]);
                parts.join(" · ")
            }
        }
    }
}

fn field_line(label: &str, value: &str, active: bool) -> Line<'static> {
    let label_style = if active {
        Style::default()
            .fg(COLOR_ACCENT)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(COLOR_TEXT_SECONDARY)
    };
    let mut spans = vec![
        Span::styled(format!("{label}: "), label_style),
        Span::styled(value.to_string(), Style::default().fg(COLOR_TEXT_PRIMARY)),
    ];
    if active {
        spans.push(Span::styled(CURSOR, Style::default().fg(COLOR_ACCENT)));
    }
    Line::from(spans)
}

fn form_status(message: &str) -> Line<'static> {
    let lowered = message.to_ascii_lowercase();
    let color = if lowered.contains("fail") || lowered.contains("required") || lowered.contains("enter ") {
        COLOR_ERROR
    } else if lowered.contains("success") {
        COLOR_SUCCESS
    } else {
        COLOR_TEXT_SECONDARY
    };
    Line::from(Span::styled(message.to_string(), Style::default().fg(color)))
}

fn editor_lines(form: &EditorForm) -> Vec<Line<'static>> {
    let mut lines = vec![
        field_line("Title", &form.title, form.field == EditorField::Title),
        Line::default(),
    ];
    let content_active = form.field == EditorField::Content;
    let label_style = if content_active {
        Style::default()
            .fg(COLOR_ACCENT)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(COLOR_TEXT_SECONDARY)
    };
    lines.push(Line::from(Span::styled("Content:", label_style)));
    let mut content: Vec<&str> = form.content.split('\n').collect();
    if content.is_empty() {
        content.push("");
    }
    let last = content.len() - 1;
    for (idx, raw) in content.into_iter().enumerate() {
        let mut spans = vec![Span::styled(
            format!("  {raw}"),
            Style::default().fg(COLOR_TEXT_PRIMARY),
        )];
        if content_active && idx == last {
            spans.push(Span::styled(CURSOR, Style::default().fg(COLOR_ACCENT)));
        }
        lines.push(Line::from(spans));
    }
    if form.mode == FormMode::Create {
        lines.push(Line::default());
        lines.push(field_line(
            "Image path (optional)",
            &form.image_path,
            form.field == EditorField::Image,
        ));
    }
    if !form.status.is_empty() {
        lines.push(Line::default());
        lines.push(form_status(&form.status));
    }
    lines
}

fn draw_modal(frame: &mut Frame<'_>, area: Rect, modal: &Modal) {
    let (title, body, popup) = match modal {
        Modal::Alert(message) => (
            "Notice".to_string(),
            vec![Line::from(message.clone())],
            centered_rect(50, 25, area),
        ),
        Modal::Confirm { prompt, .. } => (
            "Confirm".to_string(),
            vec![
                Line::from(prompt.clone()),
                Line::default(),
                Line::from(Span::styled(
                    "[y] yes   [n] no",
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                )),
            ],
            centered_rect(50, 25, area),
        ),
        Modal::Editor(form) => {
            let title = match form.mode {
                FormMode::Create => "Create Post".to_string(),
                FormMode::Edit(_) => "Edit Post".to_string(),
            };
            (title, editor_lines(form), centered_rect(80, 80, area))
        }
        Modal::Comment { input, .. } => (
            "Write a comment".to_string(),
            vec![field_line(">", input, true)],
            centered_rect(70, 25, area),
        ),
    };
    frame.render_widget(Clear, popup);
    let widget = Paragraph::new(Text::from(body))
        .block(
            Block::default()
                .title(Span::styled(
                    title,
                    Style::default()
                        .fg(COLOR_ACCENT)
                        .add_modifier(Modifier::BOLD),
                ))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(COLOR_ACCENT))
                .style(Style::default().bg(COLOR_PANEL_BG))
                .padding(Padding::uniform(1)),
        )
        .wrap(Wrap { trim: false });
    frame.render_widget(widget, popup);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total_width(line: &Line<'_>) -> usize {
        line.spans
            .iter()
            .map(|span| UnicodeWidthStr::width(span.content.as_ref()))
            .sum()
    }

    #[test]
    fn pad_lines_extends_to_width() {
        let mut lines = vec![Line::from(vec![Span::raw("abc")])];
        pad_lines_to_width(&mut lines, 6);
        assert_eq!(lines[0].spans.len(), 2);
        assert_eq!(lines[0].spans[1].content.as_ref(), "   ");
        assert_eq!(total_width(&lines[0]), 6);
    }

    #[test]
    fn pad_lines_does_not_shorten() {
        let mut lines = vec![Line::from(vec![Span::raw("abcdef")])];
        pad_lines_to_width(&mut lines, 4);
        assert_eq!(lines[0].spans.len(), 1);
        assert_eq!(total_width(&lines[0]), 6);
    }

    #[test]
    fn pad_lines_supports_wide_glyphs() {
        let mut lines = vec![Line::from(vec![Span::raw("🦀")])];
        pad_lines_to_width(&mut lines, 3);
        assert_eq!(total_width(&lines[0]), 3);
        assert_eq!(lines[0].spans.len(), 2);
    }

    #[test]
    fn scroll_keeps_selection_visible() {
        assert_eq!(scroll_to_fit(0, 2, 5, 10), 0);
        assert_eq!(scroll_to_fit(0, 12, 15, 10), 5);
        assert_eq!(scroll_to_fit(8, 3, 6, 10), 3);
        // Cards taller than the window pin to their first line.
        assert_eq!(scroll_to_fit(0, 4, 30, 10), 4);
    }

    #[test]
    fn editor_shows_image_field_only_when_creating() {
        let mut form = EditorForm {
            mode: FormMode::Create,
            title: "t".into(),
            content: "a\nb".into(),
            image_path: String::new(),
            field: EditorField::Content,
            status: String::new(),
            busy: false,
        };
        let text = |lines: &[Line<'_>]| {
            lines
                .iter()
                .map(|l| l.spans.iter().map(|s| s.content.as_ref()).collect::<String>())
                .collect::<Vec<_>>()
                .join("\n")
        };
        assert!(text(&editor_lines(&form)).contains("Image path"));
        form.mode = FormMode::Edit(1);
        let rendered = text(&editor_lines(&form));
        assert!(!rendered.contains("Image path"));
        assert!(rendered.contains("  b▏"));
    }
}
