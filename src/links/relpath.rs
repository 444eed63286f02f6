//! Root-relative path arithmetic on `/`-separated strings.
//!
//! Links are written with forward slashes on every OS, so this module never
//! goes through `Path::join` semantics for link text. Root-relative paths are
//! carried as `PathBuf` built only from normal components.

use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};

/// `a/b/c.md` for any root-relative path, whatever the host separator.
pub fn to_slash(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    parts.join("/")
}

/// Resolve `target` (already percent-decoded, without suffix) from `base_dir`.
/// Returns `None` when `..` climbs above the managed root.
pub fn resolve(base_dir: &Path, target: &str) -> Option<PathBuf> {
    let mut parts: Vec<String> = base_dir
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    for seg in target.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other.to_string()),
        }
    }
    Some(parts.iter().collect())
}

/// Relative link text from directory `from_dir` to file `to`, both root-relative.
pub fn relative_path(from_dir: &Path, to: &Path) -> String {
    let from: Vec<String> = to_slash(from_dir)
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    let to_slashed = to_slash(to);
    let to: Vec<&str> = to_slashed.split('/').filter(|s| !s.is_empty()).collect();

    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a.as_str() == **b)
        .count();

    let mut out: Vec<&str> = Vec::with_capacity(from.len() - common + to.len() - common);
    out.extend(std::iter::repeat_n("..", from.len() - common));
    out.extend(to[common..].iter().copied());
    if out.is_empty() {
        return ".".to_string();
    }
    out.join("/")
}

/// Decode `%XX` escapes. Invalid escapes or non-UTF-8 results leave the input as is.
pub fn percent_decode(s: &str) -> Cow<'_, str> {
    if !s.contains('%') {
        return Cow::Borrowed(s);
    }
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let (Some(h), Some(l)) = (hex_val(bytes[i + 1]), hex_val(bytes[i + 2]))
        {
            out.push(h << 4 | l);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    match String::from_utf8(out) {
        Ok(decoded) => Cow::Owned(decoded),
        Err(_) => Cow::Borrowed(s),
    }
}

/// Escape characters that would end or break an unbracketed link destination.
pub fn percent_encode_destination(s: &str) -> Cow<'_, str> {
    if !s.contains([' ', '(', ')', '<', '>']) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for ch in s.chars() {
        match ch {
            ' ' => out.push_str("%20"),
            '(' => out.push_str("%28"),
            ')' => out.push_str("%29"),
            '<' => out.push_str("%3C"),
            '>' => out.push_str("%3E"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
