//! Conversion between a host's display form and the stored plain text.
//!
//! Converters are pure and total. For any `x` produced by `from_plain`,
//! `from_plain(&to_plain(&x)) == x`.

use serde_yaml::Mapping;

pub trait DocumentConverter: Send + Sync {
    /// What the host edits and renders.
    type Display: Send;

    fn to_plain(&self, display: &Self::Display) -> String;

    fn from_plain(&self, plain: &str) -> Self::Display;
}

/// Identity conversion for hosts that edit the stored text directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainConverter;

impl DocumentConverter for PlainConverter {
    type Display = String;

    fn to_plain(&self, display: &String) -> String {
        display.clone()
    }

    fn from_plain(&self, plain: &str) -> String {
        plain.to_string()
    }
}

/// Markdown note split into frontmatter and body.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteContent {
    /// Frontmatter mapping (None if absent, empty or not valid YAML)
    pub frontmatter: Option<Mapping>,
    /// Markdown body (everything after frontmatter)
    pub body: String,
}

/// Markdown with optional `---`-delimited YAML frontmatter:
/// ```markdown
/// ---
/// title: My Note
/// tags: [a, b, c]
/// ---
///
/// # Content here
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownConverter;

impl DocumentConverter for MarkdownConverter {
    type Display = NoteContent;

    fn to_plain(&self, note: &NoteContent) -> String {
        match &note.frontmatter {
            Some(fm) if !fm.is_empty() => {
                let yaml = serde_yaml::to_string(fm).unwrap_or_default();
                format!("---\n{}---\n\n{}", yaml, note.body)
            }
            _ => note.body.clone(),
        }
    }

    fn from_plain(&self, plain: &str) -> NoteContent {
        let whole_body = || NoteContent {
            frontmatter: None,
            body: plain.to_string(),
        };

        let Some(rest) = plain.strip_prefix("---") else {
            return whole_body();
        };
        let Some(pos) = rest.find("\n---") else {
            return whole_body();
        };

        // Unusable frontmatter stays part of the text so it survives a save.
        match serde_yaml::from_str::<Mapping>(rest[..pos].trim()) {
            Ok(fm) if !fm.is_empty() => NoteContent {
                frontmatter: Some(fm),
                body: rest[pos + 4..].trim_start_matches('\n').to_string(),
            },
            _ => whole_body(),
        }
    }
}
