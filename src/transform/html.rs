//! Regex-based HTML text extraction for organization pages and search results.

use std::sync::OnceLock;

use regex::Regex;

const REMOVED_ELEMENTS: [&str; 7] = ["script", "style", "iframe", "nav", "footer", "noscript", "svg"];

/// Title, meta description and body text of a fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub title: String,
    pub description: String,
    pub text: String,
}

impl PageText {
    /// The layout the LLM prompts expect.
    pub fn to_prompt_text(&self) -> String {
        format!(
            "タイトル: {}\n説明: {}\n\n本文:\n{}",
            self.title, self.description, self.text
        )
    }
}

pub(crate) fn decode_html_entities(value: &str) -> String {
    static NUMERIC_RE: OnceLock<Regex> = OnceLock::new();
    let re = NUMERIC_RE
        .get_or_init(|| Regex::new(r"&#(?:[xX]([0-9a-fA-F]+)|([0-9]+));").expect("valid regex"));
    let decoded = re.replace_all(value, |caps: &regex::Captures<'_>| {
        let code = match (caps.get(1), caps.get(2)) {
            (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
            (None, Some(dec)) => dec.as_str().parse::<u32>().ok(),
            _ => None,
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    decoded
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

pub(crate) fn strip_tags(value: &str) -> String {
    static HTML_TAG_RE: OnceLock<Regex> = OnceLock::new();
    let re = HTML_TAG_RE.get_or_init(|| Regex::new(r"(?is)<[^>]+>").expect("valid regex"));
    re.replace_all(value, "").to_string()
}

/// Inline fragment to plain text on one line.
pub(crate) fn clean_inline(value: &str) -> String {
    decode_html_entities(&strip_tags(value))
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn removed_element_res() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        REMOVED_ELEMENTS
            .iter()
            .map(|tag| Regex::new(&format!(r"(?is)<{tag}\b.*?</{tag}\s*>")).expect("valid regex"))
            .collect()
    })
}

fn first_capture(re: &Regex, html: &str) -> Option<String> {
    re.captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn extract_title(html: &str) -> String {
    static TITLE_RE: OnceLock<Regex> = OnceLock::new();
    let re = TITLE_RE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"));
    first_capture(re, html)
        .map(|t| clean_inline(&t))
        .unwrap_or_default()
}

fn extract_meta_description(html: &str) -> String {
    static META_RE: OnceLock<Regex> = OnceLock::new();
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    static CONTENT_RE: OnceLock<Regex> = OnceLock::new();
    let meta = META_RE.get_or_init(|| Regex::new(r"(?is)<meta\b[^>]*>").expect("valid regex"));
    let name = NAME_RE.get_or_init(|| {
        Regex::new(r#"(?i)\bname\s*=\s*["']description["']"#).expect("valid regex")
    });
    let content = CONTENT_RE.get_or_init(|| {
        Regex::new(r#"(?is)\bcontent\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
    });

    meta.find_iter(html)
        .map(|m| m.as_str())
        .find(|tag| name.is_match(tag))
        .and_then(|tag| content.captures(tag))
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| clean_inline(m.as_str()))
        .unwrap_or_default()
}

fn main_region(html: &str) -> Option<String> {
    static MAIN_RE: OnceLock<Regex> = OnceLock::new();
    static ARTICLE_RE: OnceLock<Regex> = OnceLock::new();
    let main = MAIN_RE.get_or_init(|| Regex::new(r"(?is)<main\b[^>]*>(.*)</main\s*>").expect("valid regex"));
    let article = ARTICLE_RE
        .get_or_init(|| Regex::new(r"(?is)<article\b[^>]*>(.*)</article\s*>").expect("valid regex"));
    first_capture(main, html)
        .or_else(|| first_capture(article, html))
        .filter(|region| !strip_tags(region).trim().is_empty())
}

fn body_text(html: &str) -> String {
    static BLOCK_RE: OnceLock<Regex> = OnceLock::new();
    let block = BLOCK_RE.get_or_init(|| {
        Regex::new(r"(?i)<br\s*/?>|</(?:p|div|li|dt|dd|h[1-6]|tr|section|header|table|ul|ol)\s*>")
            .expect("valid regex")
    });
    let with_breaks = block.replace_all(html, "\n");
    decode_html_entities(&strip_tags(&with_breaks))
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extracts readable text from a page, preferring its `<main>` or `<article>` region.
pub fn extract_page_text(html: &str) -> PageText {
    let title = extract_title(html);
    let description = extract_meta_description(html);

    let mut cleaned = html.to_string();
    for re in removed_element_res() {
        cleaned = re.replace_all(&cleaned, "\n").into_owned();
    }
    let region = main_region(&cleaned).unwrap_or(cleaned);

    PageText {
        title,
        description,
        text: body_text(&region),
    }
}

/// Truncates to at most `max_chars` characters, marking the cut with `...`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!doctype html>
<html><head>
<title>ファブリー病 患者会 &amp; 家族会</title>
<meta content="ファブリー病の患者と家族の会です" name="description">
<style>body { color: red }</style>
</head>
<body>
<nav><a href="/">ホーム</a></nav>
<main>
  <h1>私たちについて</h1>
  <p>年に二回、交流会を開催しています。<br>お問い合わせ: info&#64;example.jp</p>
  <script>var x = "<p>hidden</p>";</script>
</main>
<footer>© 2024</footer>
</body></html>"#;

    #[test]
    fn extracts_title_description_and_main_text() {
        let page = extract_page_text(PAGE);
        assert_eq!(page.title, "ファブリー病 患者会 & 家族会");
        assert_eq!(page.description, "ファブリー病の患者と家族の会です");
        assert!(page.text.contains("私たちについて"));
        assert!(page.text.contains("お問い合わせ: info@example.jp"));
        assert!(!page.text.contains("hidden"));
        assert!(!page.text.contains("ホーム"));
        assert!(!page.text.contains("2024"));
    }

    #[test]
    fn prompt_text_layout() {
        let page = PageText {
            title: "T".into(),
            description: "D".into(),
            text: "B".into(),
        };
        assert_eq!(page.to_prompt_text(), "タイトル: T\n説明: D\n\n本文:\nB");
    }

    #[test]
    fn falls_back_to_whole_body_without_main() {
        let page = extract_page_text("<html><body><div>一行目</div><div>二行目</div></body></html>");
        assert_eq!(page.text, "一行目\n二行目");
        assert!(page.title.is_empty());
    }

    #[test]
    fn truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("患者会です", 3), "患者会...");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }

    #[test]
    fn decodes_numeric_entities() {
        assert_eq!(decode_html_entities("&#x3042;&#12356;&amp;lt;"), "あい&lt;");
    }
}
