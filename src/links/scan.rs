//! Byte scanner for link destinations in markdown.
//!
//! Not a full CommonMark parser: it finds inline links and images,
//! reference definitions and scheme autolinks, and reports the byte span of
//! each destination so the text can be replaced in place. Fenced code blocks
//! and inline code spans are masked out first.

use std::ops::Range;

/// Which markdown construct carried the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSyntax {
    /// `[text](target)`
    Inline,
    /// `![alt](target)`
    Image,
    /// `[label]: target "title"`
    Reference,
    /// `<scheme:...>`
    Autolink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawLink {
    pub syntax: LinkSyntax,
    /// Destination text, angle brackets excluded.
    pub span: Range<usize>,
    /// The whole construct, for line bookkeeping.
    pub whole: Range<usize>,
    /// Destination was written as `<...>`.
    pub bracketed: bool,
}

/// All link destinations in `content`, in document order.
pub(crate) fn scan(content: &str) -> Vec<RawLink> {
    let bytes = content.as_bytes();
    let mask = code_mask(bytes);
    let mut links = Vec::new();
    let mut taken: Vec<Range<usize>> = Vec::new();

    scan_reference_definitions(bytes, &mask, &mut links, &mut taken);
    scan_inline(bytes, &mask, &mut links, &mut taken);
    scan_autolinks(bytes, &mask, &mut links, &taken);

    links.sort_by_key(|l| l.span.start);
    links
}

fn line_ranges(bytes: &[u8]) -> impl Iterator<Item = Range<usize>> + '_ {
    let mut start = 0;
    std::iter::from_fn(move || {
        if start >= bytes.len() {
            return None;
        }
        let end = bytes[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(bytes.len(), |p| start + p);
        let line = start..end;
        start = end + 1;
        Some(line)
    })
}

fn is_escaped(bytes: &[u8], at: usize) -> bool {
    let slashes = bytes[..at].iter().rev().take_while(|&&b| b == b'\\').count();
    slashes % 2 == 1
}

fn run_len(bytes: &[u8], at: usize, ch: u8) -> usize {
    bytes[at..].iter().take_while(|&&b| b == ch).count()
}

fn starts_blank_line(bytes: &[u8], at: usize) -> bool {
    bytes
        .get(at..)
        .unwrap_or_default()
        .iter()
        .take_while(|&&b| b != b'\n')
        .all(|b| b.is_ascii_whitespace())
}

// ---- code masking ----

fn code_mask(bytes: &[u8]) -> Vec<bool> {
    let mut mask = vec![false; bytes.len()];
    let mut fence: Option<(u8, usize)> = None;
    for line in line_ranges(bytes) {
        let text = &bytes[line.clone()];
        match fence {
            Some((ch, len)) => {
                mask[line].fill(true);
                if closes_fence(text, ch, len) {
                    fence = None;
                }
            }
            None => {
                if let Some(open) = opens_fence(text) {
                    mask[line].fill(true);
                    fence = Some(open);
                }
            }
        }
    }
    mask_code_spans(bytes, &mut mask);
    mask
}

/// (fence char, run length, offset after the run)
fn fence_run(text: &[u8]) -> Option<(u8, usize, usize)> {
    let indent = text.iter().take_while(|&&b| b == b' ').count();
    if indent > 3 {
        return None;
    }
    let ch = *text.get(indent)?;
    if ch != b'`' && ch != b'~' {
        return None;
    }
    let run = run_len(text, indent, ch);
    (run >= 3).then_some((ch, run, indent + run))
}

fn opens_fence(text: &[u8]) -> Option<(u8, usize)> {
    let (ch, run, end) = fence_run(text)?;
    if ch == b'`' && text[end..].contains(&b'`') {
        return None;
    }
    Some((ch, run))
}

fn closes_fence(text: &[u8], ch: u8, len: usize) -> bool {
    matches!(
        fence_run(text),
        Some((c, run, end)) if c == ch && run >= len && text[end..].iter().all(|b| b.is_ascii_whitespace())
    )
}

fn mask_code_spans(bytes: &[u8], mask: &mut [bool]) {
    let mut i = 0;
    while i < bytes.len() {
        if mask[i] || bytes[i] != b'`' || is_escaped(bytes, i) {
            i += 1;
            continue;
        }
        let open = run_len(bytes, i, b'`');
        match closing_backticks(bytes, mask, i + open, open) {
            Some(end) => {
                mask[i..end].fill(true);
                i = end;
            }
            None => i += open,
        }
    }
}

/// End offset of a backtick run of exactly `len`, within the same paragraph.
fn closing_backticks(bytes: &[u8], mask: &[bool], from: usize, len: usize) -> Option<usize> {
    let mut j = from;
    while j < bytes.len() {
        if mask[j] {
            return None;
        }
        match bytes[j] {
            b'`' => {
                let run = run_len(bytes, j, b'`');
                if run == len {
                    return Some(j + run);
                }
                j += run;
            }
            b'\n' if starts_blank_line(bytes, j + 1) => return None,
            _ => j += 1,
        }
    }
    None
}

// ---- reference definitions ----

fn scan_reference_definitions(
    bytes: &[u8],
    mask: &[bool],
    links: &mut Vec<RawLink>,
    taken: &mut Vec<Range<usize>>,
) {
    for line in line_ranges(bytes) {
        if line.is_empty() || mask[line.start] {
            continue;
        }
        let text = &bytes[line.clone()];
        let indent = text.iter().take_while(|&&b| b == b' ').count();
        if indent > 3 || text.get(indent) != Some(&b'[') {
            continue;
        }

        let mut j = indent + 1;
        while j < text.len() && text[j] != b']' {
            if text[j] == b'[' {
                break;
            }
            j += if text[j] == b'\\' { 2 } else { 1 };
        }
        if j >= text.len() || text[j] != b']' {
            continue;
        }
        let label = &text[indent + 1..j];
        // `[^1]: ...` is a footnote, not a link definition.
        if label.iter().all(|b| b.is_ascii_whitespace()) || label.first() == Some(&b'^') {
            continue;
        }
        if text.get(j + 1) != Some(&b':') {
            continue;
        }

        let mut k = j + 2;
        while k < text.len() && (text[k] == b' ' || text[k] == b'\t') {
            k += 1;
        }
        if k >= text.len() {
            continue;
        }

        let (span, bracketed, after) = if text[k] == b'<' {
            let Some(gt) = text[k + 1..].iter().position(|&b| b == b'>' || b == b'<') else {
                continue;
            };
            let gt = k + 1 + gt;
            if text[gt] != b'>' {
                continue;
            }
            (k + 1..gt, true, gt + 1)
        } else {
            let end = k + text[k..].iter().take_while(|b| !b.is_ascii_whitespace()).count();
            (k..end, false, end)
        };
        if span.is_empty() || (after < text.len() && !text[after].is_ascii_whitespace()) {
            continue;
        }

        let abs = line.start + span.start..line.start + span.end;
        taken.push(abs.clone());
        links.push(RawLink {
            syntax: LinkSyntax::Reference,
            span: abs,
            whole: line.clone(),
            bracketed,
        });
    }
}

// ---- inline links and images ----

fn scan_inline(bytes: &[u8], mask: &[bool], links: &mut Vec<RawLink>, taken: &mut Vec<Range<usize>>) {
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'[' || mask[i] || is_escaped(bytes, i) || taken.iter().any(|r| r.contains(&i)) {
            i += 1;
            continue;
        }
        if let Some(close) = matching_bracket(bytes, mask, i)
            && bytes.get(close + 1) == Some(&b'(')
            && let Some((span, bracketed, end)) = parse_destination(bytes, close + 2)
        {
            let image = i > 0 && bytes[i - 1] == b'!' && !is_escaped(bytes, i - 1);
            let start = if image { i - 1 } else { i };
            taken.push(close + 1..end);
            links.push(RawLink {
                syntax: if image { LinkSyntax::Image } else { LinkSyntax::Inline },
                span,
                whole: start..end,
                bracketed,
            });
        }
        // Nested constructs such as `[![img](a.png)](b.md)` are found by
        // continuing right after the opening bracket.
        i += 1;
    }
}

fn matching_bracket(bytes: &[u8], mask: &[bool], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut j = open;
    while j < bytes.len() {
        if mask[j] {
            j += 1;
            continue;
        }
        match bytes[j] {
            b'\\' => {
                j += 2;
                continue;
            }
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(j);
                }
            }
            b'\n' if starts_blank_line(bytes, j + 1) => return None,
            _ => {}
        }
        j += 1;
    }
    None
}

/// Parse `target "title")` starting just after `(`.
/// Returns the destination span, whether it was bracketed, and the offset after `)`.
fn parse_destination(bytes: &[u8], start: usize) -> Option<(Range<usize>, bool, usize)> {
    let len = bytes.len();
    let mut k = skip_inline_whitespace(bytes, start);
    if k >= len || bytes[k] == b')' {
        return None;
    }

    let (span, bracketed) = if bytes[k] == b'<' {
        let s = k + 1;
        let mut e = s;
        while e < len && bytes[e] != b'>' {
            if bytes[e] == b'\n' || bytes[e] == b'<' {
                return None;
            }
            e += if bytes[e] == b'\\' { 2 } else { 1 };
        }
        if e >= len {
            return None;
        }
        k = e + 1;
        (s..e, true)
    } else {
        let s = k;
        let mut depth = 0usize;
        while k < len {
            match bytes[k] {
                b'\\' => {
                    k += 2;
                    continue;
                }
                b'(' => depth += 1,
                b')' if depth == 0 => break,
                b')' => depth -= 1,
                b if b.is_ascii_whitespace() || b.is_ascii_control() => break,
                _ => {}
            }
            k += 1;
        }
        k = k.min(len);
        if k == s {
            return None;
        }
        (s..k, false)
    };

    k = skip_inline_whitespace(bytes, k);
    if k < len && matches!(bytes[k], b'"' | b'\'' | b'(') {
        let closer = if bytes[k] == b'(' { b')' } else { bytes[k] };
        k += 1;
        while k < len && bytes[k] != closer {
            k += if bytes[k] == b'\\' { 2 } else { 1 };
        }
        if k >= len {
            return None;
        }
        k = skip_inline_whitespace(bytes, k + 1);
    }

    (k < len && bytes[k] == b')').then_some((span, bracketed, k + 1))
}

/// Spaces, tabs and at most one line break.
fn skip_inline_whitespace(bytes: &[u8], mut k: usize) -> usize {
    let mut newlines = 0;
    while k < bytes.len() {
        match bytes[k] {
            b' ' | b'\t' | b'\r' => {}
            b'\n' if newlines == 0 => newlines += 1,
            _ => break,
        }
        k += 1;
    }
    k
}

// ---- autolinks ----

fn scan_autolinks(bytes: &[u8], mask: &[bool], links: &mut Vec<RawLink>, taken: &[Range<usize>]) {
    for i in 0..bytes.len() {
        if bytes[i] != b'<' || mask[i] || is_escaped(bytes, i) || taken.iter().any(|r| r.contains(&i)) {
            continue;
        }
        let s = i + 1;
        let scheme_len = bytes[s..]
            .iter()
            .enumerate()
            .take_while(|(n, b)| {
                if *n == 0 {
                    b.is_ascii_alphabetic()
                } else {
                    b.is_ascii_alphanumeric() || matches!(b, b'+' | b'.' | b'-')
                }
            })
            .count();
        if !(2..=32).contains(&scheme_len) || bytes.get(s + scheme_len) != Some(&b':') {
            continue;
        }
        let mut e = s + scheme_len + 1;
        while e < bytes.len()
            && bytes[e] != b'>'
            && bytes[e] != b'<'
            && !bytes[e].is_ascii_whitespace()
            && !bytes[e].is_ascii_control()
        {
            e += 1;
        }
        if bytes.get(e) != Some(&b'>') {
            continue;
        }
        links.push(RawLink {
            syntax: LinkSyntax::Autolink,
            span: s..e,
            whole: i..e + 1,
            bracketed: true,
        });
    }
}
