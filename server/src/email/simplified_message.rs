use std::fmt;

use mail_parser::{MessageParser, MessagePart};
use regex::Regex;
use serde::{Deserialize, Serialize};

const RE_WHITESPACE_STR: &str = r"[\r\t\n]+";
const RE_LONG_SPACE_STR: &str = r" {2,}";
const RE_DIVIDERS_STR: &str = r"[-=_]{3,}";
const RE_HTTP_LINK_STR: &str = r"https?:\/\/(www\.)?[-a-zA-Z0-9@:%._\+~#=]{1,256}\.[a-zA-Z0-9()]{1,63}\b([-a-zA-Z0-9()@:%_\+.~#?&//=]*)";

lazy_static::lazy_static!(
    static ref RE_WHITESPACE: Regex = Regex::new(RE_WHITESPACE_STR).unwrap();
    static ref RE_LONG_SPACE: Regex = Regex::new(RE_LONG_SPACE_STR).unwrap();
    static ref RE_DIVIDERS: Regex = Regex::new(RE_DIVIDERS_STR).unwrap();
    static ref RE_HTTP_LINK: Regex = Regex::new(RE_HTTP_LINK_STR).unwrap();
);

/// Upper bound on body characters kept for the prompt.
const MAX_BODY_CHARS: usize = 4_000;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimplifiedMessage {
    pub from: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
}

impl SimplifiedMessage {
    /// Parses a raw RFC 5322 message. Returns `None` when the bytes are not a message.
    pub fn from_raw(raw: &[u8]) -> Option<Self> {
        let msg = MessageParser::default().parse(raw)?;

        let from = msg
            .from()
            .and_then(|f| f.first().and_then(|x| x.address().map(|a| a.to_string())));
        let subject = msg.subject().map(clean_text);
        let body = msg.text_part(0).and_then(part_text).map(|text| {
            let text = RE_HTTP_LINK.replace_all(&text, "[LINK]");
            let text = RE_DIVIDERS.replace_all(&text, " ");
            let text = clean_text(&text);
            text.chars().take(MAX_BODY_CHARS).collect::<String>()
        });

        Some(Self {
            from,
            subject,
            body,
        })
    }
}

/// Plain text of a body part. Only HTML parts go through html2text.
fn part_text(part: &MessagePart) -> Option<String> {
    let contents = part.text_contents()?;
    if part.is_text_html() {
        Some(html2text::from_read(contents.as_bytes(), 400))
    } else {
        Some(contents.to_string())
    }
}

fn clean_text(s: &str) -> String {
    let s = RE_WHITESPACE.replace_all(s, " ");
    let s = RE_LONG_SPACE.replace_all(&s, " ");
    s.trim().to_string()
}

impl fmt::Display for SimplifiedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<from>{}</from> <subject>{}</subject> <body>{}</body>",
            self.from.as_deref().unwrap_or_default(),
            self.subject.as_deref().unwrap_or_default(),
            self.body.as_deref().unwrap_or_default()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "From: Courier <alerts@courier.example>\r\n\
To: me@example.com\r\n\
Subject: Your   package\r\n  has shipped\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Your package shipped.\r\n\
-----\r\n\
Track it at https://courier.example/track?id=42 today.\r\n";

    #[test]
    fn test_from_raw_extracts_fields() {
        let msg = SimplifiedMessage::from_raw(RAW.as_bytes()).unwrap();

        assert_eq!(msg.from.as_deref(), Some("alerts@courier.example"));
        assert_eq!(msg.subject.as_deref(), Some("Your package has shipped"));

        let body = msg.body.unwrap();
        assert!(body.contains("Your package shipped."));
        assert!(body.contains("[LINK]"));
        assert!(!body.contains("https://"));
        assert!(!body.contains("-----"));
        assert!(!body.contains('\n'));
    }

    #[test]
    fn test_plain_text_keeps_angle_brackets() {
        let raw = "From: dev@example.com\r\n\
Subject: Build\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Use Vec<String> for the <ids> field.\r\n";

        let msg = SimplifiedMessage::from_raw(raw.as_bytes()).unwrap();

        assert_eq!(
            msg.body.as_deref(),
            Some("Use Vec<String> for the <ids> field.")
        );
    }

    #[test]
    fn test_html_body_is_converted_to_text() {
        let raw = "From: news@example.com\r\n\
Subject: Weekly\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<html><body><p>Hello <b>there</b></p><p>See https://www.example.com/a</p></body></html>\r\n";

        let msg = SimplifiedMessage::from_raw(raw.as_bytes()).unwrap();
        let body = msg.body.unwrap();

        assert!(body.contains("Hello"));
        assert!(body.contains("there"));
        assert!(!body.contains("<p>"));
        assert!(body.contains("[LINK]"));
    }

    #[test]
    fn test_display_wraps_fields_in_tags() {
        let msg = SimplifiedMessage {
            from: Some("a@b.c".to_string()),
            subject: Some("Hi".to_string()),
            body: None,
        };

        assert_eq!(
            msg.to_string(),
            "<from>a@b.c</from> <subject>Hi</subject> <body></body>"
        );
    }
}
