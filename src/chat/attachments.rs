// Attachment detection in assistant output, and merging with platform-reported files.

use std::collections::HashSet;
use std::sync::OnceLock;

use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use regex::Regex;

use crate::bots::types::Attachment;
use crate::bots::util::ext_to_mime;

/// Extensions recognised in markdown link text (`[report.pdf](https://...)`).
const LINK_EXTENSIONS: &[&str] = &[
    "doc", "docx", "xls", "xlsx", "ppt", "pptx", "pdf", "txt", "rtf", "zip", "rar", "7z", "tar",
    "gz", "jpg", "jpeg", "png", "gif", "bmp", "svg", "webp",
];

/// Characters trimmed from the end of a bare URL.
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', '\'', '"', '。', '，', '；', '！', '？'];

fn bare_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)https?://[^\s<>"'()\[\]]+\.(?:docx|doc|pdf|xlsx|xls|pptx|ppt|mp4|mp3|wav|avi|mov|zip|rar|7z|txt|csv|json|xml|png|jpeg|jpg|gif|webp|svg)\b(?:\?[^\s<>"'()\[\]]*)?"#,
        )
        .expect("bare URL pattern compiles")
    })
}

fn extension(name: &str) -> Option<String> {
    let path = name.split(['?', '#']).next().unwrap_or(name);
    let (_, ext) = path.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase()).filter(|e| !e.is_empty() && !e.contains('/'))
}

/// Markdown links whose text is a file name with a known extension.
fn markdown_links(text: &str) -> Vec<Attachment> {
    let mut found = Vec::new();
    let mut current: Option<(String, String)> = None;
    for event in Parser::new(text) {
        match event {
            Event::Start(Tag::Link { dest_url, .. }) => {
                current = Some((dest_url.to_string(), String::new()));
            }
            Event::Text(t) | Event::Code(t) => {
                if let Some((_, label)) = current.as_mut() {
                    label.push_str(&t);
                }
            }
            Event::End(TagEnd::Link) => {
                let Some((url, label)) = current.take() else {
                    continue;
                };
                let label = label.trim();
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    continue;
                }
                let Some(ext) = extension(label) else {
                    continue;
                };
                if LINK_EXTENSIONS.contains(&ext.as_str()) {
                    let mut attachment = Attachment::from_agent_url(&url, ext_to_mime(&ext));
                    attachment.name = label.to_string();
                    found.push(attachment);
                }
            }
            _ => {}
        }
    }
    found
}

/// Bare URLs ending in a known document, image, media, or archive extension.
fn bare_urls(text: &str) -> Vec<Attachment> {
    bare_url_regex()
        .find_iter(text)
        .filter_map(|m| {
            let url = m.as_str().trim_end_matches(TRAILING_PUNCTUATION);
            let ext = extension(url)?;
            Some(Attachment::from_agent_url(url, ext_to_mime(&ext)))
        })
        .collect()
}

/// Heuristic attachments found in assistant text: markdown links first, then bare URLs.
pub fn detect_attachments(text: &str) -> Vec<Attachment> {
    if !text.contains("http") {
        return Vec::new();
    }
    merge_attachments(&markdown_links(text), bare_urls(text))
}

/// Platform-reported entries first, then detected ones; one entry per URL.
pub fn merge_attachments(reported: &[Attachment], detected: Vec<Attachment>) -> Vec<Attachment> {
    let mut seen = HashSet::new();
    reported
        .iter()
        .cloned()
        .chain(detected)
        .filter(|a| match &a.url {
            Some(url) => seen.insert(url.clone()),
            None => true,
        })
        .collect()
}
