//! Rustdoc-style documentation parsing.
//!
//! ```text
//! Divide two numbers.
//!
//! # Arguments
//!
//! * `x` - The dividend
//! * `y` - The divisor, must be non-zero
//!
//! # Returns
//!
//! The quotient
//! ```

use indexmap::IndexMap;

/// Documentation split into its parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocText {
    /// Text before the first heading.
    pub summary: String,
    /// Parameter descriptions in documented order.
    pub params: IndexMap<String, String>,
    /// Text of the `# Returns` section.
    pub returns: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Summary,
    Arguments,
    Returns,
    Other,
}

fn section_for(heading: &str) -> Section {
    match heading.to_ascii_lowercase().as_str() {
        "arguments" | "args" | "parameters" | "params" => Section::Arguments,
        "returns" | "return" => Section::Returns,
        _ => Section::Other,
    }
}

/// Parse documentation text. Unknown sections are ignored.
pub fn parse(doc: &str) -> DocText {
    let mut summary: Vec<&str> = Vec::new();
    let mut returns: Vec<&str> = Vec::new();
    let mut params: IndexMap<String, String> = IndexMap::new();
    let mut current: Option<String> = None;
    let mut section = Section::Summary;
    let mut in_fence = false;

    for line in doc.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
        }
        if !in_fence && trimmed.starts_with('#') && !line.starts_with(char::is_whitespace) {
            section = section_for(trimmed.trim_start_matches('#').trim());
            current = None;
            continue;
        }

        match section {
            Section::Summary => summary.push(line.trim_end()),
            Section::Returns => returns.push(trimmed),
            Section::Other => {}
            Section::Arguments => {
                if trimmed.is_empty() {
                    current = None;
                } else if let Some((name, text)) = parse_entry(line) {
                    params.insert(name.clone(), text);
                    current = Some(name);
                } else if let Some(name) = &current
                    && let Some(text) = params.get_mut(name)
                {
                    if !text.is_empty() {
                        text.push(' ');
                    }
                    text.push_str(trimmed);
                }
            }
        }
    }

    let returns = join_paragraphs(&returns);
    DocText {
        summary: summary.join("\n").trim().to_string(),
        params,
        returns: (!returns.is_empty()).then_some(returns),
    }
}

/// Parse a list entry: ``* `name` - text`` or `- name: text`.
fn parse_entry(line: &str) -> Option<(String, String)> {
    if line.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = line
        .strip_prefix("* ")
        .or_else(|| line.strip_prefix("- "))?
        .trim();

    let (name, text) = if let Some(quoted) = rest.strip_prefix('`') {
        let end = quoted.find('`')?;
        (&quoted[..end], &quoted[end + 1..])
    } else {
        let end = rest
            .find(|c: char| c == ':' || c.is_whitespace())
            .unwrap_or(rest.len());
        (&rest[..end], &rest[end..])
    };

    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let text = strip_type_hint(text.trim_start())
        .trim_start_matches(['-', ':'])
        .trim();
    Some((name.to_string(), text.to_string()))
}

/// Drop a leading `(type)` hint such as `(int): the count`.
fn strip_type_hint(text: &str) -> &str {
    if let Some(inner) = text.strip_prefix('(')
        && let Some(end) = inner.find(')')
    {
        return inner[end + 1..].trim_start();
    }
    text
}

fn join_paragraphs(lines: &[&str]) -> String {
    let mut out = String::new();
    let mut blank = false;
    for line in lines {
        if line.is_empty() {
            blank = !out.is_empty();
            continue;
        }
        if blank {
            out.push_str("\n\n");
        } else if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(line);
        blank = false;
    }
    out
}
