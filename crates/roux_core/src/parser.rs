//! Markdown source parser.
//!
//! One file becomes one parsed record: frontmatter fields, resolved title,
//! normalized tags, raw wiki-link targets, and the body with frontmatter
//! stripped. Malformed YAML never pollutes the property map; the whole
//! frontmatter is dropped with a warning instead.

use once_cell::sync::Lazy;
use regex::Regex;
use roux_common::{id_stem, Result, RouxError, RESERVED_KEYS};
use sha2::{Digest, Sha256};

/// A raw `[[target]]` occurrence before resolution.
///
/// Display text (after `|`) and fragments (after `#`) are recorded but
/// ignored by the resolver in this version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLink {
    pub target: String,
    pub fragment: Option<String>,
    pub display: Option<String>,
}

/// Output of parsing a single source file.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    /// Resolved per the title rule: frontmatter `title`, else first ATX
    /// heading, else the filename stem of `source_path`.
    pub title: String,
    /// Trimmed, lowercased, deduped; insertion order kept.
    pub tags: Vec<String>,
    /// Frontmatter minus reserved keys.
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// Wiki-link targets in document order.
    pub raw_links: Vec<RawLink>,
    /// Body with the frontmatter block stripped, otherwise verbatim.
    pub content: String,
    /// SHA256 of `content`.
    pub content_hash: String,
    /// Non-fatal anomalies found while parsing.
    pub warnings: Vec<String>,
}

// [[target#fragment|display]]: target is the longest run free of brackets,
// pipes, and hashes.
static WIKI_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[\[([^\[\]|#]+)(?:#([^\[\]|]*))?(?:\|([^\[\]]*))?\]\]").unwrap()
});

static FRONTMATTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?ms)\A---\r?\n(.*?)^---\r?\n?").unwrap());

/// Parse file bytes into a document record.
///
/// `source_path` is the vault-relative path with its on-disk casing; only its
/// filename stem is consulted, as the title fallback of last resort.
///
/// Errors are recoverable parse failures the reconcile loop should skip:
/// non-UTF-8 bytes and a frontmatter fence that never closes (truncated
/// reads must not commit as empty-frontmatter documents).
#[tracing::instrument(skip(bytes), fields(path = %source_path))]
pub fn parse_source(bytes: &[u8], source_path: &str) -> Result<ParsedDocument> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| RouxError::Parse(format!("{}: not valid UTF-8: {}", source_path, e)))?;

    let mut warnings = Vec::new();

    let (frontmatter, content) = split_frontmatter(text, source_path)?;

    let (fm_title, tags, properties) = match frontmatter {
        Some(yaml) => match serde_yaml::from_str::<serde_yaml::Value>(yaml) {
            Ok(value) => extract_frontmatter(value, source_path, &mut warnings),
            Err(e) => {
                warnings.push(format!("{}: malformed frontmatter ignored: {}", source_path, e));
                (None, Vec::new(), serde_json::Map::new())
            }
        },
        None => (None, Vec::new(), serde_json::Map::new()),
    };

    let title = fm_title
        .or_else(|| first_heading(content))
        .unwrap_or_else(|| id_stem(source_path).to_string());

    let raw_links = extract_links(content);

    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let content_hash = format!("{:x}", hasher.finalize());

    Ok(ParsedDocument {
        title,
        tags,
        properties,
        raw_links,
        content: content.to_string(),
        content_hash,
        warnings,
    })
}

/// Split off the YAML frontmatter block, if any.
///
/// A block opens only when the very first line is exactly `---` and closes at
/// the next `---` on its own line. An opening fence without a closing one is
/// a parse error, not an empty frontmatter.
fn split_frontmatter<'a>(text: &'a str, source_path: &str) -> Result<(Option<&'a str>, &'a str)> {
    let opens = text == "---"
        || text.starts_with("---\n")
        || text.starts_with("---\r\n");
    if !opens {
        return Ok((None, text));
    }

    match FRONTMATTER.captures(text) {
        Some(captures) => {
            let yaml = captures.get(1).unwrap().as_str();
            let body = &text[captures.get(0).unwrap().end()..];
            Ok((Some(yaml), body))
        }
        None => Err(RouxError::Parse(format!(
            "{}: unterminated frontmatter block",
            source_path
        ))),
    }
}

/// Pull title/tags out of the frontmatter mapping; everything else lands in
/// `properties` keyed by its string name.
fn extract_frontmatter(
    value: serde_yaml::Value,
    source_path: &str,
    warnings: &mut Vec<String>,
) -> (
    Option<String>,
    Vec<String>,
    serde_json::Map<String, serde_json::Value>,
) {
    let mapping = match value {
        serde_yaml::Value::Mapping(m) => m,
        serde_yaml::Value::Null => return (None, Vec::new(), serde_json::Map::new()),
        other => {
            warnings.push(format!(
                "{}: frontmatter is not a mapping ({}), ignored",
                source_path,
                yaml_kind(&other)
            ));
            return (None, Vec::new(), serde_json::Map::new());
        }
    };

    let mut title = None;
    let mut tags = Vec::new();
    let mut properties = serde_json::Map::new();

    for (key, val) in mapping {
        let key = match key {
            serde_yaml::Value::String(s) => s,
            other => {
                warnings.push(format!(
                    "{}: non-string frontmatter key ({}) skipped",
                    source_path,
                    yaml_kind(&other)
                ));
                continue;
            }
        };

        match key.as_str() {
            "title" => {
                title = match val {
                    serde_yaml::Value::String(s) => Some(s),
                    serde_yaml::Value::Number(n) => Some(n.to_string()),
                    _ => None,
                };
            }
            "tags" => tags = normalize_tags(val),
            "id" => {} // reserved; the id is always path-derived
            _ => match serde_json::to_value(&val) {
                Ok(json) => {
                    properties.insert(key, json);
                }
                Err(e) => {
                    warnings.push(format!(
                        "{}: frontmatter key '{}' not representable as JSON, skipped: {}",
                        source_path, key, e
                    ));
                }
            },
        }
    }

    debug_assert!(RESERVED_KEYS.iter().all(|k| !properties.contains_key(*k)));
    (title, tags, properties)
}

/// `tags` accepts a YAML list or a single scalar string.
fn normalize_tags(value: serde_yaml::Value) -> Vec<String> {
    let raw: Vec<String> = match value {
        serde_yaml::Value::String(s) => vec![s],
        serde_yaml::Value::Sequence(seq) => seq
            .into_iter()
            .filter_map(|v| match v {
                serde_yaml::Value::String(s) => Some(s),
                serde_yaml::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    let mut seen = std::collections::HashSet::new();
    raw.into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

/// First ATX heading at any depth, or None.
fn first_heading(content: &str) -> Option<String> {
    for line in content.lines() {
        let hashes = line.chars().take_while(|&c| c == '#').count();
        if (1..=6).contains(&hashes) {
            let rest = line[hashes..].trim();
            if !rest.is_empty() && line.as_bytes().get(hashes) == Some(&b' ') {
                return Some(rest.to_string());
            }
        }
    }
    None
}

/// Scan the body for `[[target]]` occurrences. Code fences and inline code
/// spans are not excluded in this version.
fn extract_links(content: &str) -> Vec<RawLink> {
    WIKI_LINK
        .captures_iter(content)
        .filter_map(|cap| {
            let target = cap.get(1)?.as_str().trim().to_string();
            if target.is_empty() {
                return None;
            }
            Some(RawLink {
                target,
                fragment: cap.get(2).map(|m| m.as_str().trim().to_string()),
                display: cap.get(3).map(|m| m.as_str().trim().to_string()),
            })
        })
        .collect()
}

fn yaml_kind(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "bool",
        serde_yaml::Value::Number(_) => "number",
        serde_yaml::Value::String(_) => "string",
        serde_yaml::Value::Sequence(_) => "sequence",
        serde_yaml::Value::Mapping(_) => "mapping",
        serde_yaml::Value::Tagged(_) => "tagged",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_body() {
        let doc = parse_source(b"# Hello\n\nWorld", "notes/hello.md").unwrap();
        assert_eq!(doc.title, "Hello");
        assert_eq!(doc.content, "# Hello\n\nWorld");
        assert!(doc.tags.is_empty());
        assert!(doc.properties.is_empty());
        assert!(doc.warnings.is_empty());
    }

    #[test]
    fn test_frontmatter_title_wins_over_heading() {
        let src = "---\ntitle: From YAML\n---\n# From Heading\n";
        let doc = parse_source(src.as_bytes(), "a.md").unwrap();
        assert_eq!(doc.title, "From YAML");
        assert_eq!(doc.content, "# From Heading\n");
    }

    #[test]
    fn test_stem_fallback_title() {
        let doc = parse_source(b"no headings here", "Notes/Research.md").unwrap();
        assert_eq!(doc.title, "Research");
    }

    #[test]
    fn test_tags_list_and_scalar() {
        let list = parse_source(b"---\ntags:\n  - Alpha\n  - beta\n  - ALPHA\n---\nx", "a.md")
            .unwrap();
        assert_eq!(list.tags, vec!["alpha", "beta"]);

        let scalar = parse_source(b"---\ntags: Solo\n---\nx", "a.md").unwrap();
        assert_eq!(scalar.tags, vec!["solo"]);
    }

    #[test]
    fn test_malformed_yaml_drops_all_keys() {
        let src = "---\ntitle: ok\nbroken: [unclosed\n---\nbody";
        let doc = parse_source(src.as_bytes(), "a.md").unwrap();
        // No partial acceptance: title falls back, properties stay empty.
        assert_eq!(doc.title, "a");
        assert!(doc.properties.is_empty());
        assert_eq!(doc.warnings.len(), 1);
        assert!(doc.warnings[0].contains("malformed frontmatter"));
    }

    #[test]
    fn test_unterminated_frontmatter_is_parse_error() {
        let err = parse_source(b"---\ntitle: cut off", "a.md").unwrap_err();
        assert!(matches!(err, RouxError::Parse(_)));
    }

    #[test]
    fn test_reserved_keys_never_reach_properties() {
        let src = "---\ntitle: T\ntags: [x]\nid: forced\nauthor: me\n---\nbody";
        let doc = parse_source(src.as_bytes(), "a.md").unwrap();
        assert_eq!(doc.properties.len(), 1);
        assert_eq!(doc.properties["author"], serde_json::json!("me"));
    }

    #[test]
    fn test_link_extraction_with_display_and_fragment() {
        let src = "See [[Target]] and [[Other|shown]] plus [[Deep#section]].";
        let doc = parse_source(src.as_bytes(), "a.md").unwrap();
        assert_eq!(doc.raw_links.len(), 3);
        assert_eq!(doc.raw_links[0].target, "Target");
        assert_eq!(doc.raw_links[1].display.as_deref(), Some("shown"));
        assert_eq!(doc.raw_links[2].fragment.as_deref(), Some("section"));
    }

    #[test]
    fn test_links_inside_frontmatter_ignored() {
        let src = "---\nnote: \"[[not-a-link]]\"\n---\nbody [[real]]";
        let doc = parse_source(src.as_bytes(), "a.md").unwrap();
        assert_eq!(doc.raw_links.len(), 1);
        assert_eq!(doc.raw_links[0].target, "real");
    }

    #[test]
    fn test_content_preserved_verbatim() {
        let src = "---\ntitle: T\n---\nline one\nline two\n";
        let doc = parse_source(src.as_bytes(), "a.md").unwrap();
        assert_eq!(doc.content, "line one\nline two\n");
    }

    #[test]
    fn test_heading_requires_space() {
        let doc = parse_source(b"#not-a-heading\n\n## Real\n", "a.md").unwrap();
        assert_eq!(doc.title, "Real");
    }
}
