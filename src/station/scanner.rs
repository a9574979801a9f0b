//! Line scanner for station files.
//!
//! Ordinary YAML loaders either reject a repeated mapping key or silently keep
//! the last value. Station files are hand edited and a repeated `module.Class`
//! is a real mistake, so this scanner walks the raw text first and records
//! every block-mapping key with its full path and line span. From that index
//! the loader learns:
//!
//! - which keys are written more than once in the same mapping,
//! - the line of every module and connect entry,
//! - which lines to comment out so that the YAML parser sees only the last
//!   occurrence of each duplicated key (see [`strip_shadowed`]).
//!
//! The scanner understands the subset of YAML that station files use: block
//! mappings, block sequences (also at the parent's indentation), flow
//! collections and quoted scalars spanning several lines, block scalars
//! (`|`, `>`), quoted keys and comments. Keys inside flow collections are not tracked.

use crate::error::{AppResult, StationError};
use serde::Serialize;
use std::collections::HashMap;

/// One block-mapping key as written in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOccurrence {
    /// Keys from the document root down to this one
    pub path: Vec<String>,
    /// 1-based line of the key
    pub line: usize,
    /// Last line (1-based, inclusive) belonging to the key's value
    pub end_line: usize,
    /// Indentation in spaces
    pub indent: usize,
    // Identity of the enclosing mapping; keys are duplicates only within one
    parent: Option<usize>,
}

/// A key written more than once in the same mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateKey {
    /// Keys from the document root down to the duplicated one
    pub path: Vec<String>,
    /// 1-based lines of every occurrence, in file order; the last one is effective
    pub lines: Vec<usize>,
}

impl DuplicateKey {
    /// Final path segment.
    pub fn key(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    /// Line of the occurrence a last-wins loader keeps.
    pub fn effective_line(&self) -> Option<usize> {
        self.lines.last().copied()
    }
}

/// Every block-mapping key of a document.
#[derive(Debug, Clone, Default)]
pub struct KeyIndex {
    occurrences: Vec<KeyOccurrence>,
}

impl KeyIndex {
    /// All occurrences in file order.
    pub fn occurrences(&self) -> &[KeyOccurrence] {
        &self.occurrences
    }

    /// Line of the effective (last) occurrence of a key path.
    pub fn line_of(&self, path: &[&str]) -> Option<usize> {
        self.occurrences
            .iter()
            .rev()
            .find(|occ| occ.path.len() == path.len() && occ.path.iter().zip(path).all(|(a, b)| a == b))
            .map(|occ| occ.line)
    }

    /// Keys written more than once under the same parent, ordered by first occurrence.
    pub fn duplicates(&self) -> Vec<DuplicateKey> {
        self.duplicate_groups()
            .into_iter()
            .map(|group| DuplicateKey {
                path: self.occurrences[group[0]].path.clone(),
                lines: group.iter().map(|&i| self.occurrences[i].line).collect(),
            })
            .collect()
    }

    /// Occurrence indices of every repeated key, grouped per parent mapping.
    fn duplicate_groups(&self) -> Vec<Vec<usize>> {
        let mut groups: HashMap<(Option<usize>, &str), Vec<usize>> = HashMap::new();
        let mut order = Vec::new();
        for (idx, occ) in self.occurrences.iter().enumerate() {
            let key = occ.path.last().map(String::as_str).unwrap_or_default();
            let entry = groups.entry((occ.parent, key)).or_default();
            if entry.is_empty() {
                order.push((occ.parent, key));
            }
            entry.push(idx);
        }
        order
            .into_iter()
            .filter_map(|id| groups.remove(&id))
            .filter(|group| group.len() > 1)
            .collect()
    }
}

#[derive(Debug)]
struct Frame {
    id: usize,
    indent: usize,
    key: String,
    occurrence: Option<usize>,
    // A key with an empty value may own a block sequence at its own indentation
    owns_same_indent_sequence: bool,
}

#[derive(Debug)]
enum Skip {
    None,
    // Block scalar: lines indented deeper than `indent` belong to it
    BlockScalar { indent: usize, owner: Option<usize> },
    // Flow collection still open after `depth` brackets
    Flow { depth: i32, owner: Option<usize> },
    // Quoted scalar whose closing quote is on a later line
    Quoted { quote: char, owner: Option<usize> },
}

/// Build the key index of a station document.
pub fn scan_keys(source: &str) -> AppResult<KeyIndex> {
    let mut occurrences: Vec<KeyOccurrence> = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut skip = Skip::None;
    let mut next_frame_id = 0usize;

    for (idx, raw_line) in source.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw_line.trim_start_matches(' ');
        let indent = raw_line.len() - trimmed.len();
        let content = trimmed.trim_end();
        let is_blank = content.is_empty() || content.starts_with('#');

        match &mut skip {
            Skip::BlockScalar { indent: owner_indent, owner } => {
                if is_blank || indent > *owner_indent {
                    if !content.is_empty() {
                        extend(&mut occurrences, &stack, *owner, line_no);
                    }
                    continue;
                }
                skip = Skip::None;
            }
            Skip::Flow { depth, owner } => {
                *depth += bracket_balance(content);
                extend(&mut occurrences, &stack, *owner, line_no);
                if *depth <= 0 {
                    skip = Skip::None;
                }
                continue;
            }
            Skip::Quoted { quote, owner } => {
                extend(&mut occurrences, &stack, *owner, line_no);
                if closes_quote(content, *quote) {
                    skip = Skip::None;
                }
                continue;
            }
            Skip::None => {}
        }

        if is_blank {
            continue;
        }
        if content.starts_with('\t') {
            return Err(StationError::Scan {
                line: line_no,
                message: "tab character in indentation".to_string(),
            });
        }
        if content == "---" || content == "..." {
            stack.clear();
            continue;
        }

        let is_list_item = content == "-" || content.starts_with("- ");
        while let Some(top) = stack.last() {
            let keeps = top.indent < indent
                || (top.indent == indent && is_list_item && top.owns_same_indent_sequence);
            if keeps {
                break;
            }
            stack.pop();
        }
        extend(&mut occurrences, &stack, None, line_no);

        let (key_indent, body) = if is_list_item {
            // Give every sequence item its own path segment so keys of
            // sibling items never look like duplicates of each other.
            next_frame_id += 1;
            stack.push(Frame {
                id: next_frame_id,
                indent,
                key: format!("[{}]", next_frame_id),
                occurrence: None,
                owns_same_indent_sequence: false,
            });
            let rest = content[1..].trim_start();
            (indent + (content.len() - rest.len()), rest)
        } else {
            (indent, content)
        };

        let Some((key, value)) = split_key(body) else {
            // Plain scalar continuation or bare sequence value
            if let Some(depth) = open_flow(body) {
                skip = Skip::Flow { depth, owner: None };
            } else if let Some(quote) = open_quote(body) {
                skip = Skip::Quoted { quote, owner: None };
            }
            continue;
        };

        let mut path: Vec<String> = stack.iter().map(|f| f.key.clone()).collect();
        path.push(key.clone());
        occurrences.push(KeyOccurrence {
            path,
            line: line_no,
            end_line: line_no,
            indent: key_indent,
            parent: stack.last().map(|f| f.id),
        });
        let occ_idx = occurrences.len() - 1;

        let value = strip_comment(value);
        if value.is_empty() || is_node_property(value) {
            next_frame_id += 1;
            stack.push(Frame {
                id: next_frame_id,
                indent: key_indent,
                key,
                occurrence: Some(occ_idx),
                owns_same_indent_sequence: true,
            });
        } else if value.starts_with('|') || value.starts_with('>') {
            skip = Skip::BlockScalar {
                indent: key_indent,
                owner: Some(occ_idx),
            };
        } else if let Some(depth) = open_flow(value) {
            skip = Skip::Flow {
                depth,
                owner: Some(occ_idx),
            };
        } else if let Some(quote) = open_quote(value) {
            skip = Skip::Quoted {
                quote,
                owner: Some(occ_idx),
            };
        }
    }

    Ok(KeyIndex { occurrences })
}

/// Comment out every occurrence but the last of each duplicated key.
///
/// Shadowed lines become `#` comments, so line numbers reported by the YAML
/// parser still match the original file. On a sequence item line (`- key: v`)
/// the comment starts at the key and the item marker stays.
pub fn strip_shadowed(source: &str, index: &KeyIndex) -> String {
    let groups = index.duplicate_groups();
    if groups.is_empty() {
        return source.to_string();
    }

    let lines: Vec<&str> = source.lines().collect();
    // Column at which each 1-based line is commented out
    let mut comment_at: Vec<Option<usize>> = vec![None; lines.len() + 1];
    for group in &groups {
        let Some((_, earlier)) = group.split_last() else {
            continue;
        };
        for occ in earlier.iter().map(|&i| &index.occurrences[i]) {
            for line in occ.line..=occ.end_line {
                let Some(text) = lines.get(line - 1) else {
                    continue;
                };
                let column = if line == occ.line {
                    occ.indent
                } else {
                    text.len() - text.trim_start_matches(' ').len()
                };
                let slot = &mut comment_at[line];
                *slot = Some(slot.map_or(column, |c| c.min(column)));
            }
        }
    }

    let mut out = String::with_capacity(source.len() + lines.len());
    for (idx, line) in lines.iter().enumerate() {
        match comment_at[idx + 1] {
            Some(column) if column <= line.len() && line.is_char_boundary(column) => {
                out.push_str(&line[..column]);
                out.push('#');
                out.push_str(&line[column..]);
            }
            Some(_) => {
                out.push('#');
                out.push_str(line);
            }
            None => out.push_str(line),
        }
        out.push('\n');
    }
    out
}

fn extend(occurrences: &mut [KeyOccurrence], stack: &[Frame], leaf: Option<usize>, line: usize) {
    for idx in stack.iter().filter_map(|f| f.occurrence).chain(leaf) {
        if let Some(occ) = occurrences.get_mut(idx) {
            occ.end_line = occ.end_line.max(line);
        }
    }
}

/// Split `key: value` honouring quoted keys. Returns `None` if the line holds no key.
fn split_key(body: &str) -> Option<(String, &str)> {
    let bytes = body.as_bytes();
    let first = *bytes.first()?;
    if first == b'\'' || first == b'"' {
        let close = body[1..].find(first as char)? + 1;
        let rest = &body[close + 1..];
        let rest = rest.trim_start();
        let value = rest.strip_prefix(':')?;
        if !(value.is_empty() || value.starts_with(' ')) {
            return None;
        }
        return Some((body[1..close].to_string(), value.trim()));
    }
    if matches!(first, b'[' | b'{' | b'#' | b'&' | b'*' | b'!' | b'|' | b'>') {
        return None;
    }

    let mut search_from = 0;
    while let Some(pos) = body[search_from..].find(':') {
        let colon = search_from + pos;
        let after = &body[colon + 1..];
        if after.is_empty() || after.starts_with(' ') {
            let key = body[..colon].trim_end();
            if key.is_empty() {
                return None;
            }
            return Some((key.to_string(), after.trim()));
        }
        search_from = colon + 1;
    }
    None
}

fn strip_comment(value: &str) -> &str {
    let mut in_single = false;
    let mut in_double = false;
    let mut prev = ' ';
    for (i, c) in value.char_indices() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '#' if !in_single && !in_double && prev == ' ' => return value[..i].trim_end(),
            _ => {}
        }
        prev = c;
    }
    value
}

/// Quote character of a quoted scalar that is not closed on this line.
fn open_quote(value: &str) -> Option<char> {
    let quote = value.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    (!closes_quote(&value[1..], quote)).then_some(quote)
}

/// Whether `text`, read from inside a quoted scalar, contains its closing quote.
///
/// `''` is an escaped quote in single-quoted scalars; a backslash escapes the
/// next character in double-quoted ones.
fn closes_quote(text: &str, quote: char) -> bool {
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if quote == '"' => {
                chars.next();
            }
            c if c == quote => {
                if quote == '\'' && chars.peek() == Some(&'\'') {
                    chars.next();
                } else {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

fn is_node_property(value: &str) -> bool {
    (value.starts_with('&') || value.starts_with('!')) && !value.contains(' ')
}

/// Depth of unclosed flow brackets if the value opens a flow collection that
/// continues on later lines.
fn open_flow(value: &str) -> Option<i32> {
    if !(value.starts_with('[') || value.starts_with('{')) {
        return None;
    }
    let depth = bracket_balance(value);
    (depth > 0).then_some(depth)
}

fn bracket_balance(text: &str) -> i32 {
    let mut depth = 0;
    let mut in_single = false;
    let mut in_double = false;
    for c in strip_comment(text).chars() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '[' | '{' if !in_single && !in_double => depth += 1,
            ']' | '}' if !in_single && !in_double => depth -= 1,
            _ => {}
        }
    }
    depth
}
