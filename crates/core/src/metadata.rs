use crate::error::IndexError;
use chrono::NaiveDate;
use regex::Regex;
use serde_yaml::Value;
use std::path::{Component, Path};
use std::sync::LazyLock;
use tracing::warn;

static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4}-\d{2}-\d{2})").expect("iso date pattern is valid"));

static COMPACT_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{2})(\d{2})(\d{2})").expect("compact date pattern is valid"));

static TIMESTAMP_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d{6}-\d{6}$").expect("timestamp pattern is valid"));

static DATE_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}\s*").expect("date prefix pattern is valid"));

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub title: String,
    pub category: String,
    pub date: Option<NaiveDate>,
    pub people: Vec<String>,
    pub projects: Vec<String>,
}

/// Metadata for a markdown note plus its body with frontmatter removed.
pub fn markdown_metadata(path: &Path, root: &Path, raw: &str) -> (DocumentMetadata, String) {
    let (frontmatter, body) = match parse_frontmatter(path, raw) {
        Ok(Some((frontmatter, body))) => (frontmatter, body.to_string()),
        Ok(None) => (Value::Null, raw.to_string()),
        Err(error) => {
            warn!(path = %path.display(), error = %error, "ignoring malformed frontmatter");
            (Value::Null, raw.to_string())
        }
    };

    let title = frontmatter
        .get("title")
        .and_then(scalar_string)
        .filter(|title| !title.trim().is_empty())
        .unwrap_or_else(|| file_stem(path));

    let date = frontmatter
        .get("date")
        .and_then(scalar_string)
        .and_then(|value| parse_leading_date(&value))
        .or_else(|| iso_date_in(&file_name(path)));

    let metadata = DocumentMetadata {
        title,
        category: top_folder(path, root).unwrap_or_else(|| "other".to_string()),
        date,
        people: frontmatter.get("people").map(name_list).unwrap_or_default(),
        projects: frontmatter.get("projects").map(name_list).unwrap_or_default(),
    };
    (metadata, body)
}

/// PDF metadata is derived from the path alone.
pub fn pdf_metadata(path: &Path, root: &Path) -> DocumentMetadata {
    let stem = file_stem(path);
    let without_suffix = TIMESTAMP_SUFFIX_RE.replace(&stem, "");
    let title = DATE_PREFIX_RE.replace(&without_suffix, "").trim().to_string();

    let name = file_name(path);
    let date = iso_date_in(&name).or_else(|| compact_date_in(&name));

    DocumentMetadata {
        title: if title.is_empty() { stem } else { title },
        category: top_folder(path, root).unwrap_or_else(|| "documents".to_string()),
        date,
        people: Vec::new(),
        projects: Vec::new(),
    }
}

/// Splits a leading `---` YAML block from the note body.
pub fn parse_frontmatter<'a>(
    path: &Path,
    raw: &'a str,
) -> Result<Option<(Value, &'a str)>, IndexError> {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let Some(rest) = raw
        .strip_prefix("---\n")
        .or_else(|| raw.strip_prefix("---\r\n"))
    else {
        return Ok(None);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            let value = if yaml.trim().is_empty() {
                Value::Null
            } else {
                serde_yaml::from_str(yaml).map_err(|error| IndexError::Frontmatter {
                    path: path.to_path_buf(),
                    details: error.to_string(),
                })?
            };
            return Ok(Some((value, body)));
        }
        offset += line.len();
    }

    Ok(None)
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn name_list(value: &Value) -> Vec<String> {
    let names = match value {
        Value::Sequence(items) => items.iter().filter_map(scalar_string).collect(),
        Value::String(joined) => joined.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };
    names
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

fn parse_leading_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let head = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

fn iso_date_in(name: &str) -> Option<NaiveDate> {
    ISO_DATE_RE
        .captures(name)
        .and_then(|captures| parse_leading_date(&captures[1]))
}

/// `MMDDYY` as written by scanner apps, assumed to be in the 2000s.
fn compact_date_in(name: &str) -> Option<NaiveDate> {
    let captures = COMPACT_DATE_RE.captures(name)?;
    let month = captures[1].parse().ok()?;
    let day = captures[2].parse().ok()?;
    let year: i32 = captures[3].parse().ok()?;
    NaiveDate::from_ymd_opt(2000 + year, month, day)
}

/// First directory below `root`, if the file is not directly in it.
fn top_folder(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut components = relative.components().filter_map(|component| match component {
        Component::Normal(part) => part.to_str(),
        _ => None,
    });
    let first = components.next()?;
    components.next().map(|_| first.to_string())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
