use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use textwrap::{wrap, Options as WrapOptions};

use crate::api::{Comment, Post};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Neutralises the characters that could open markup or break out of an
/// attribute value.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Local time when the timestamp parses, the raw string otherwise.
pub fn format_time(raw: Option<&str>) -> String {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return String::new();
    };
    parse_time(raw)
        .map(|ts| ts.format(TIME_FORMAT).to_string())
        .unwrap_or_else(|| raw.to_string())
}

fn parse_time(raw: &str) -> Option<DateTime<Local>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Local));
    }
    // Zone-less timestamps are wall-clock local time.
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
}

/// True when `me` wrote a record authored by `author`.
pub fn is_owner(me: Option<&str>, author: Option<&str>) -> bool {
    match (me, author) {
        (Some(me), Some(author)) => !me.is_empty() && me == author,
        _ => false,
    }
}

/// Turns the `imageData` field into something an `<img src>` accepts.
pub fn image_data_uri(data: &str) -> Option<String> {
    let data = data.trim();
    if data.is_empty() {
        return None;
    }
    if data.starts_with("data:") {
        return Some(data.to_string());
    }
    let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD.decode(&compact).ok()?;
    let mime = tree_magic_mini::from_u8(&bytes);
    if !mime.starts_with("image/") {
        return None;
    }
    Some(format!("data:{mime};base64,{compact}"))
}

pub fn post_card_html(post: &Post, me: Option<&str>) -> String {
    let mut html = String::new();
    html.push_str(&format!(
        "<article class=\"post-card\" id=\"post-{}\">\n",
        post.id
    ));
    html.push_str(&format!(
        "  <header class=\"post-meta\"><span class=\"post-author\">{}</span> <time>{}</time></header>\n",
        escape_html(post.author()),
        escape_html(&format_time(post.created_at.as_deref()))
    ));
    html.push_str(&format!(
        "  <h4>{}</h4>\n  <p>{}</p>\n",
        escape_html(&post.title),
        escape_html(&post.content)
    ));
    if let Some(src) = post.image_data.as_deref().and_then(image_data_uri) {
        html.push_str(&format!(
            "  <img class=\"post-image\" src=\"{}\" alt=\"\">\n",
            escape_html(&src)
        ));
    }
    html.push_str("  <div class=\"post-actions\">");
    html.push_str(&format!(
        "<span class=\"badge-like\">Like ({})</span> <span class=\"badge-comments\">Comments ({})</span>",
        post.likes, post.comments
    ));
    if is_owner(me, post.author_username.as_deref()) {
        html.push_str(&format!(
            " <button class=\"btn-edit\" data-id=\"{0}\">Edit</button><button class=\"btn-delete\" data-id=\"{0}\">Delete</button>",
            post.id
        ));
    }
    html.push_str("</div>\n</article>\n");
    html
}

pub fn comment_html(comment: &Comment, me: Option<&str>) -> String {
    let delete = if is_owner(me, comment.author_username.as_deref()) {
        format!(
            " <button class=\"comment-del\" data-id=\"{}\">Delete</button>",
            comment.id
        )
    } else {
        String::new()
    };
    format!(
        "<div class=\"comment\"><strong>{}</strong> <time>{}</time>{}<div>{}</div></div>\n",
        escape_html(comment.author()),
        escape_html(&format_time(comment.created_at.as_deref())),
        delete,
        escape_html(&comment.content)
    )
}

/// A standalone HTML document listing one page of posts.
pub fn archive_page(posts: &[Post], me: Option<&str>, page: u32) -> String {
    let mut html = String::from(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n",
    );
    html.push_str(&format!("<title>Posts - page {}</title>\n", page + 1));
    html.push_str("</head>\n<body>\n<main id=\"postsList\">\n");
    if posts.is_empty() {
        html.push_str("<p>No posts yet</p>\n");
    } else {
        for post in posts {
            html.push_str(&post_card_html(post, me));
        }
    }
    html.push_str("</main>\n</body>\n</html>\n");
    html
}

/// Styles for the terminal rendering of cards.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineStyles {
    pub meta: Style,
    pub title: Style,
    pub body: Style,
    pub badge: Style,
}

pub fn post_lines(
    post: &Post,
    me: Option<&str>,
    width: usize,
    expanded: bool,
    styles: LineStyles,
) -> Vec<Line<'static>> {
    let mut meta = post.author().to_string();
    let when = format_time(post.created_at.as_deref());
    if !when.is_empty() {
        meta.push_str(" · ");
        meta.push_str(&when);
    }
    let mut lines = wrap_plain(&meta, width, styles.meta);
    lines.extend(wrap_plain(
        &post.title,
        width,
        styles.title.add_modifier(Modifier::BOLD),
    ));
    for raw in post.content.lines() {
        lines.extend(wrap_plain(raw.trim_end(), width, styles.body));
    }
    if post.image_data.as_deref().map_or(false, |d| !d.trim().is_empty()) {
        lines.push(Line::from(Span::styled("[image]".to_string(), styles.meta)));
    }

    let mut badges = vec![
        Span::styled(format!("Like ({})", post.likes), styles.badge),
        Span::raw("  "),
        Span::styled(
            format!(
                "{} Comments ({})",
                if expanded { "▾" } else { "▸" },
                post.comments
            ),
            styles.badge,
        ),
    ];
    if is_owner(me, post.author_username.as_deref()) {
        badges.push(Span::raw("  "));
        badges.push(Span::styled("[e]dit [d]elete".to_string(), styles.meta));
    }
    lines.push(Line::from(badges));
    lines
}

pub fn comment_lines(
    comment: &Comment,
    me: Option<&str>,
    width: usize,
    selected: bool,
    styles: LineStyles,
) -> Vec<Line<'static>> {
    let indicator = if selected { "›" } else { " " };
    let mut header = format!("{indicator} {}", comment.author());
    let when = format_time(comment.created_at.as_deref());
    if !when.is_empty() {
        header.push_str(" · ");
        header.push_str(&when);
    }
    if is_owner(me, comment.author_username.as_deref()) {
        header.push_str(" · [x] delete");
    }
    let mut lines = wrap_with_prefixes(&header, width, "  ", "    ", styles.meta);
    if comment.content.trim().is_empty() {
        lines.extend(wrap_with_prefixes("(empty)", width, "    ", "    ", styles.body));
        return lines;
    }
    for raw in comment.content.lines() {
        lines.extend(wrap_with_prefixes(raw.trim(), width, "    ", "    ", styles.body));
    }
    lines
}

pub fn wrap_with_prefixes(
    text: &str,
    width: usize,
    first_prefix: &str,
    rest_prefix: &str,
    style: Style,
) -> Vec<Line<'static>> {
    if text.trim().is_empty() {
        return vec![Line::from(Span::styled(String::new(), style))];
    }

    if width == 0 {
        return vec![Line::from(Span::styled(format!("{first_prefix}{text}"), style))];
    }

    let min_width = first_prefix
        .chars()
        .count()
        .max(rest_prefix.chars().count())
        .saturating_add(1);
    let options = WrapOptions::new(width.max(min_width))
        .break_words(true)
        .initial_indent(first_prefix)
        .subsequent_indent(rest_prefix);

    wrap(text, options)
        .into_iter()
        .map(|cow| Line::from(Span::styled(cow.into_owned(), style)))
        .collect()
}

pub fn wrap_plain(text: &str, width: usize, style: Style) -> Vec<Line<'static>> {
    wrap_with_prefixes(text, width, "", "", style)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_text(line: &Line<'_>) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    fn post(author: Option<&str>) -> Post {
        Post {
            id: 9,
            title: "<script>alert(1)</script>".into(),
            content: "fish & chips > salad".into(),
            author_username: author.map(str::to_string),
            likes: 4,
            comments: 2,
            ..Default::default()
        }
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn card_escapes_title_and_content() {
        let html = post_card_html(&post(Some("alice")), None);
        assert!(html.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
        assert!(html.contains("fish &amp; chips &gt; salad"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("Like (4)"));
        assert!(html.contains("Comments (2)"));
    }

    #[test]
    fn owner_controls_only_for_author() {
        let mine = post_card_html(&post(Some("alice")), Some("alice"));
        assert!(mine.contains("btn-edit"));
        assert!(mine.contains("btn-delete"));

        let theirs = post_card_html(&post(Some("alice")), Some("bob"));
        assert!(!theirs.contains("btn-edit"));

        let anonymous = post_card_html(&post(None), None);
        assert!(anonymous.contains("Unknown"));
        assert!(!anonymous.contains("btn-delete"));
    }

    #[test]
    fn comment_delete_only_for_author() {
        let comment = Comment {
            id: 3,
            author_username: Some("bob".into()),
            content: "<b>hi</b>".into(),
            ..Default::default()
        };
        assert!(comment_html(&comment, Some("bob")).contains("comment-del"));
        let other = comment_html(&comment, Some("alice"));
        assert!(!other.contains("comment-del"));
        assert!(other.contains("&lt;b&gt;hi&lt;/b&gt;"));
    }

    #[test]
    fn empty_archive_says_so() {
        let html = archive_page(&[], None, 0);
        assert!(html.contains("<p>No posts yet</p>"));
        assert!(html.starts_with("<!DOCTYPE html>"));
    }

    #[test]
    fn unparsable_time_is_kept() {
        assert_eq!(format_time(Some("yesterday")), "yesterday");
        assert_eq!(format_time(None), "");
        assert_eq!(format_time(Some("2024-03-01T10:15:00")), "2024-03-01 10:15");
    }

    #[test]
    fn image_data_becomes_data_uri() {
        let png = [
            0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 0x0d, b'I', b'H', b'D',
            b'R',
        ];
        let encoded = STANDARD.encode(png);
        let uri = image_data_uri(&encoded).unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));
        assert_eq!(image_data_uri("not base64!"), None);
        assert_eq!(
            image_data_uri("data:image/gif;base64,R0lG").as_deref(),
            Some("data:image/gif;base64,R0lG")
        );
    }

    #[test]
    fn terminal_card_shows_badges() {
        let lines = post_lines(&post(Some("alice")), Some("alice"), 60, false, LineStyles::default());
        let last = line_text(lines.last().unwrap());
        assert!(last.contains("Like (4)"));
        assert!(last.contains("Comments (2)"));
        assert!(last.contains("[e]dit"));

        let other = post_lines(&post(Some("alice")), Some("bob"), 60, true, LineStyles::default());
        assert!(!line_text(other.last().unwrap()).contains("[e]dit"));
    }

    #[test]
    fn wrapped_lines_keep_prefix() {
        let lines = wrap_with_prefixes("one two three four", 8, "> ", "  ", Style::default());
        assert!(lines.len() > 1);
        assert!(line_text(&lines[0]).starts_with("> "));
        assert!(line_text(&lines[1]).starts_with("  "));
    }
}
