//! Server-rendered pages: the create form at `/` and the paste view at
//! `/p/:code`. Content is escaped by maud.

use chrono::{DateTime, Utc};
use maud::{html, Markup, DOCTYPE};
use serde::Deserialize;
use ttlpaste_common::{format_time_remaining, CreatePaste, CreatedPaste, InvalidInput, PasteView};

/// Fields of the create form. Browsers submit empty strings for blank
/// inputs, so the numbers arrive as text.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct PasteForm {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub ttl_seconds: String,
    #[serde(default)]
    pub max_views: String,
}

impl PasteForm {
    pub fn to_request(&self) -> Result<CreatePaste, InvalidInput> {
        Ok(CreatePaste {
            content: self.content.clone(),
            ttl_seconds: optional_number("TTL", &self.ttl_seconds)?,
            max_views: optional_number("Max views", &self.max_views)?,
        })
    }
}

fn optional_number(field: &str, value: &str) -> Result<Option<i64>, InvalidInput> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| InvalidInput::Malformed(format!("{} must be a whole number", field)))
}

fn page(title: &str, body: Markup) -> String {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                meta name="robots" content="noindex";
                title { (title) }
            }
            body {
                main { (body) }
            }
        }
    }
    .into_string()
}

fn new_paste_link() -> Markup {
    html! {
        p { a href="/" { "Create new paste" } }
    }
}

pub fn home(previous: &PasteForm, error: Option<&str>) -> String {
    page(
        "New paste",
        html! {
            h1 { "New paste" }
            @if let Some(error) = error {
                p id="error" role="alert" { (error) }
            }
            form method="post" action="/" {
                p {
                    label for="content" { "Content" }
                    br;
                    textarea id="content" name="content" rows="16" cols="80" required
                        placeholder="Paste your code or text here..." { (previous.content) }
                }
                p {
                    label for="ttl_seconds" { "Expire after (seconds, optional)" }
                    br;
                    input id="ttl_seconds" name="ttl_seconds" type="number" min="1"
                        placeholder="e.g. 3600" value=(previous.ttl_seconds);
                }
                p {
                    label for="max_views" { "Maximum views (optional)" }
                    br;
                    input id="max_views" name="max_views" type="number" min="1"
                        placeholder="e.g. 5" value=(previous.max_views);
                }
                button type="submit" { "Create paste" }
            }
        },
    )
}

pub fn created(paste: &CreatedPaste) -> String {
    page(
        "Paste created",
        html! {
            h1 { "Paste created" }
            p { "Share this link: " a id="url" href=(paste.url) { (paste.url) } }
            (new_paste_link())
        },
    )
}

pub fn paste(view: &PasteView, now: DateTime<Utc>) -> String {
    page(
        "Paste",
        html! {
            pre id="content" { (view.content) }
            ul id="meta" {
                @if let Some(remaining) = view.remaining_views {
                    li { "Views remaining: " (remaining) }
                }
                @if let Some(expires_at) = view.expires_at {
                    li {
                        "Expires in " (format_time_remaining(expires_at, now))
                        " (" time datetime=(expires_at.to_rfc3339()) { (expires_at.to_rfc3339()) } ")"
                    }
                }
            }
            (new_paste_link())
        },
    )
}

pub fn not_found() -> String {
    page(
        "Paste not found",
        html! {
            h1 { "Paste not found" }
            p { "This paste does not exist, has expired, or has run out of views." }
            (new_paste_link())
        },
    )
}

pub fn error() -> String {
    page(
        "Something went wrong",
        html! {
            h1 { "Something went wrong" }
            p { "The paste could not be loaded. Please try again later." }
        },
    )
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn content_is_escaped() {
        let view = PasteView {
            content: "<script>alert('x')</script>".to_string(),
            remaining_views: None,
            expires_at: None,
        };
        let rendered = paste(&view, Utc::now());
        assert!(!rendered.contains("<script>"));
        assert!(rendered.contains("&lt;script&gt;"));
        assert!(!rendered.contains("Views remaining"));
        assert!(!rendered.contains("Expires in"));
    }

    #[test]
    fn limits_are_shown_when_present() {
        let now = Utc::now();
        let view = PasteView {
            content: "hi".to_string(),
            remaining_views: Some(3),
            expires_at: Some(now + Duration::minutes(5)),
        };
        let rendered = paste(&view, now);
        assert!(rendered.contains("Views remaining: 3"));
        assert!(rendered.contains("Expires in 5m 0s"));
        assert!(rendered.contains(r#"href="/""#));
    }

    #[test]
    fn home_keeps_previous_input_escaped() {
        let previous = PasteForm {
            content: "</textarea><b>".to_string(),
            ttl_seconds: "60".to_string(),
            max_views: String::new(),
        };
        let rendered = home(&previous, Some("Max views must be at least 1"));
        assert!(rendered.contains(r#"<form method="post" action="/">"#));
        assert!(rendered.contains("&lt;/textarea&gt;&lt;b&gt;"));
        assert!(rendered.contains(r#"value="60""#));
        assert!(rendered.contains("Max views must be at least 1"));
    }

    #[test]
    fn form_numbers_are_optional_but_must_be_whole() {
        let blank = PasteForm {
            content: "x".to_string(),
            ttl_seconds: " ".to_string(),
            max_views: String::new(),
        };
        let request = blank.to_request().unwrap();
        assert_eq!(request.ttl_seconds, None);
        assert_eq!(request.max_views, None);

        let filled = PasteForm {
            content: "x".to_string(),
            ttl_seconds: "90".to_string(),
            max_views: "3".to_string(),
        };
        let request = filled.to_request().unwrap();
        assert_eq!(request.ttl_seconds, Some(90));
        assert_eq!(request.max_views, Some(3));

        let fractional = PasteForm {
            max_views: "1.5".to_string(),
            ..filled
        };
        assert!(matches!(fractional.to_request(), Err(InvalidInput::Malformed(_))));
    }
}
