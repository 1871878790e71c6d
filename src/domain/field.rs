use std::{collections::HashSet, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::FieldId;

static LINK_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)<(?:a|img)\b[^>]*?\b(?:href|src)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'<>]+))"#,
    )
    .expect("link attribute pattern is valid")
});

/// Field types whose values hold checkable URLs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// The whole value is a single URL
    Url,
    /// HTML with links in `<a href>` and `<img src>`
    RichText,
}

impl FieldKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "url" => Some(Self::Url),
            "rich_text" => Some(Self::RichText),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::RichText => "rich_text",
        }
    }

    /// URLs held by a value of this kind, deduplicated in order of appearance
    pub fn extract_urls(&self, value: &str) -> Vec<String> {
        match self {
            Self::Url => {
                let url = value.trim();
                if url.is_empty() {
                    Vec::new()
                } else {
                    vec![url.to_string()]
                }
            }
            Self::RichText => {
                let mut seen = HashSet::new();
                LINK_ATTRIBUTE
                    .captures_iter(value)
                    .filter_map(|caps| {
                        caps.get(1)
                            .or_else(|| caps.get(2))
                            .or_else(|| caps.get(3))
                    })
                    .map(|m| m.as_str().trim().replace("&amp;", "&"))
                    .filter(|url| !url.is_empty())
                    .filter(|url| seen.insert(url.clone()))
                    .collect()
            }
        }
    }
}

/// Current value of one checkable field of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValue {
    pub field_id: FieldId,
    pub kind: FieldKind,
    pub value: String,
}

impl FieldValue {
    pub fn new(field_id: FieldId, kind: FieldKind, value: impl Into<String>) -> Self {
        Self {
            field_id,
            kind,
            value: value.into(),
        }
    }

    pub fn urls(&self) -> Vec<String> {
        self.kind.extract_urls(&self.value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn url_field_is_its_trimmed_value() {
        assert_eq!(
            FieldKind::Url.extract_urls("  https://example.com/x \n"),
            vec!["https://example.com/x"]
        );
        assert!(FieldKind::Url.extract_urls("   ").is_empty());
    }

    #[test]
    fn rich_text_links_and_images() {
        let html = r#"
            <p>See <a class="ext" href="https://example.com/a?x=1&amp;y=2">this</a>
            and <A HREF='http://other.org/'>that</A>.</p>
            <img alt="logo" src="https://cdn.example.com/logo.png">
            <a name="anchor">no link</a>
            <a href="https://example.com/a?x=1&amp;y=2">duplicate</a>
        "#;

        assert_eq!(
            FieldKind::RichText.extract_urls(html),
            vec![
                "https://example.com/a?x=1&y=2",
                "http://other.org/",
                "https://cdn.example.com/logo.png",
            ]
        );
    }

    #[test]
    fn unquoted_attributes() {
        let html = "<a href=https://example.com/a?x=1>a</a> <img src=http://cdn.example.com/i.png alt=x>";

        assert_eq!(
            FieldKind::RichText.extract_urls(html),
            vec!["https://example.com/a?x=1", "http://cdn.example.com/i.png"]
        );
    }

    #[test]
    fn rich_text_without_links() {
        assert!(FieldKind::RichText.extract_urls("plain text https://example.com").is_empty());
        assert!(FieldKind::RichText.extract_urls(r#"<a href="">empty</a>"#).is_empty());
    }

    #[test]
    fn kind_names() {
        for kind in [FieldKind::Url, FieldKind::RichText] {
            assert_eq!(FieldKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(FieldKind::parse("other"), None);
    }
}
