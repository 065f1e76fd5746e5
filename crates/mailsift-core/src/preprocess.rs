//! HTML cleanup and link collection for content features

use mail_parser::decoders::html::html_to_text;
use mailsift_common::{Error, Result};
use regex::Regex;

/// Visible text and links of an HTML body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlContent {
    pub text: String,
    pub urls: Vec<String>,
}

/// Extracts what a reader would see from HTML mail
pub struct HtmlScanner {
    invisible: Regex,
    hidden: Regex,
    link: Regex,
    alt: Regex,
    bare_url: Regex,
}

impl HtmlScanner {
    pub fn new() -> Result<Self> {
        let build = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::Config(format!("html pattern: {}", e)))
        };

        Ok(Self {
            invisible: build(
                r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<noscript\b.*?</noscript\s*>",
            )?,
            hidden: build(
                r#"(?is)<(?:span|div)\b[^>]*style\s*=\s*["'][^"']*display\s*:\s*none[^"']*["'][^>]*>.*?</(?:span|div)\s*>"#,
            )?,
            link: build(r#"(?is)\b(?:href|src)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>"']+))"#)?,
            alt: build(r#"(?is)\balt\s*=\s*(?:"([^"]*)"|'([^']*)')"#)?,
            bare_url: build(r#"(?i)\bhttps?://[^\s<>"'()]+"#)?,
        })
    }

    /// Visible text plus every `href`/`src` target, in document order
    pub fn scan(&self, html: &str) -> HtmlContent {
        let cleaned = self.invisible.replace_all(html, " ");
        let cleaned = self.hidden.replace_all(&cleaned, " ");

        let mut urls = Vec::new();
        for caps in self.link.captures_iter(&cleaned) {
            if let Some(m) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) {
                push_unique(&mut urls, m.as_str().trim());
            }
        }

        let mut text = html_to_text(&cleaned).trim().to_string();
        for caps in self.alt.captures_iter(&cleaned) {
            if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
                let alt = m.as_str().trim();
                if !alt.is_empty() {
                    text.push('\n');
                    text.push_str(alt);
                }
            }
        }

        HtmlContent { text, urls }
    }

    /// Links written out in plain text
    pub fn text_urls(&self, text: &str) -> Vec<String> {
        let mut urls = Vec::new();
        for m in self.bare_url.find_iter(text) {
            push_unique(&mut urls, m.as_str().trim_end_matches(&['.', ',', ';'][..]));
        }
        urls
    }
}

fn push_unique(urls: &mut Vec<String>, url: &str) {
    if !url.is_empty() && !urls.iter().any(|u| u == url) {
        urls.push(url.to_string());
    }
}
