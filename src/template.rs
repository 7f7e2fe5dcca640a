use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::SubmitError;

pub type Row = BTreeMap<String, String>;

static TRIPLE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\$\$([A-Za-z0-9_]+)\$\$\$").expect("valid token regex"));
static SINGLE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z0-9_]+)\$").expect("valid token regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderSyntax {
    #[default]
    Triple,
    Single,
}

impl PlaceholderSyntax {
    fn pattern(self) -> &'static Regex {
        match self {
            PlaceholderSyntax::Triple => &TRIPLE_TOKEN,
            PlaceholderSyntax::Single => &SINGLE_TOKEN,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Renderer {
    syntax: PlaceholderSyntax,
}

impl Renderer {
    pub fn new(syntax: PlaceholderSyntax) -> Self {
        Self { syntax }
    }

    pub fn syntax(&self) -> PlaceholderSyntax {
        self.syntax
    }

    pub fn render(&self, template: &str, row: &Row) -> Result<String, SubmitError> {
        let pattern = self.syntax.pattern();
        if let Some(missing) = pattern
            .captures_iter(template)
            .map(|caps| caps[1].to_string())
            .find(|name| !row.contains_key(name))
        {
            return Err(SubmitError::MissingField { field: missing });
        }
        let rendered = pattern.replace_all(template, |caps: &Captures<'_>| {
            row.get(&caps[1])
                .map(|value| escape_xml(value))
                .unwrap_or_default()
        });
        Ok(rendered.into_owned())
    }

    pub fn render_all<'a, I>(&self, template: &str, rows: I) -> Result<Vec<String>, SubmitError>
    where
        I: IntoIterator<Item = &'a Row>,
    {
        rows.into_iter()
            .map(|row| self.render(template, row))
            .collect()
    }

    pub fn unresolved_tokens(&self, text: &str) -> Vec<String> {
        self.syntax
            .pattern()
            .captures_iter(text)
            .map(|caps| caps[0].to_string())
            .collect()
    }
}

pub fn wrap_document(root: &str, fragments: &[String]) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push('<');
    out.push_str(root);
    out.push_str(">\n");
    out.push_str(&fragments.join("\n"));
    out.push('\n');
    out.push_str("</");
    out.push_str(root);
    out.push_str(">\n");
    out
}

pub fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}
