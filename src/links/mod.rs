//! Markdown link discovery, classification and rewriting.
//!
//! A [`MarkdownLinkProcessor`] is built over a [`ManagedTree`], the set of
//! files under the managed root, so it can tell a live internal link from a
//! dangling one. All paths it deals in are root-relative.
//!
//! Rewriting is textual: callers collect `(span, replacement)` edits and
//! apply them with [`apply_edits`], which works back to front so earlier
//! offsets stay valid.

mod relpath;
mod scan;

use std::collections::BTreeSet;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::errors::Result;
use crate::fs_ops::{FileSystem, io_error_with_help, is_internal_artifact};

pub use relpath::{percent_decode, relative_path, resolve, to_slash};
pub use scan::LinkSyntax;

use relpath::percent_encode_destination;

/// How a link target relates to the managed tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    /// Relative path to a file or directory that exists in the tree.
    RelativeInternal { resolved: PathBuf },
    /// `/`-prefixed path, resolved against the document root.
    AbsoluteInternal { resolved: PathBuf },
    /// Has a URI scheme, or is protocol-relative (`//host/...`, no scheme).
    External { scheme: Option<String> },
    /// `#fragment` within the same document.
    AnchorOnly,
    /// Looks internal but points at nothing under the managed root.
    Unresolvable { reason: String },
}

impl LinkKind {
    /// Root-relative target for internal links.
    pub fn resolved(&self) -> Option<&Path> {
        match self {
            LinkKind::RelativeInternal { resolved } | LinkKind::AbsoluteInternal { resolved } => {
                Some(resolved)
            }
            _ => None,
        }
    }

    pub fn is_internal(&self) -> bool {
        self.resolved().is_some()
    }
}

/// One link occurrence inside a markdown document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkReference {
    /// Root-relative path of the document the link was found in.
    pub containing_file: PathBuf,
    /// Destination exactly as written, without angle brackets.
    pub raw_target: String,
    pub kind: LinkKind,
    /// Text after `#`, verbatim.
    pub anchor_fragment: Option<String>,
    pub syntax: LinkSyntax,
    /// 1-based lines covered by the whole link construct.
    pub line_start: usize,
    pub line_end: usize,
    /// Byte span of `raw_target` in the document.
    pub span: Range<usize>,
    pub bracketed: bool,
}

impl LinkReference {
    /// Destination without `?query` or `#fragment`.
    pub fn path_part(&self) -> &str {
        &self.raw_target[..suffix_start(&self.raw_target)]
    }

    /// `?query` and/or `#fragment`, verbatim; empty when absent.
    pub fn suffix(&self) -> &str {
        &self.raw_target[suffix_start(&self.raw_target)..]
    }
}

fn suffix_start(raw: &str) -> usize {
    raw.find(['?', '#']).unwrap_or(raw.len())
}

/// Files (and their ancestor directories) under a managed root.
#[derive(Debug, Clone, Default)]
pub struct ManagedTree {
    files: BTreeSet<PathBuf>,
    dirs: BTreeSet<PathBuf>,
}

impl ManagedTree {
    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut tree = ManagedTree::default();
        tree.dirs.insert(PathBuf::new());
        for p in paths {
            let p = p.into();
            for anc in p.ancestors().skip(1) {
                if !tree.dirs.insert(anc.to_path_buf()) {
                    break;
                }
            }
            tree.files.insert(p);
        }
        tree
    }

    /// List `root` through `fs`, skipping the engine's own temp and lock files.
    pub fn scan(fs: &dyn FileSystem, root: &Path) -> Result<Self> {
        let listed = fs
            .list_files_recursive(root)
            .map_err(io_error_with_help("list managed tree", root))?;
        Ok(Self::from_paths(listed.into_iter().filter_map(|p| {
            if is_internal_artifact(&p) {
                return None;
            }
            p.strip_prefix(root).ok().map(Path::to_path_buf)
        })))
    }

    pub fn contains_file(&self, path: &Path) -> bool {
        self.files.contains(path)
    }

    pub fn contains_dir(&self, path: &Path) -> bool {
        self.dirs.contains(path)
    }

    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

pub struct MarkdownLinkProcessor<'t> {
    tree: &'t ManagedTree,
    doc_root: PathBuf,
}

impl<'t> MarkdownLinkProcessor<'t> {
    pub fn new(tree: &'t ManagedTree) -> Self {
        Self {
            tree,
            doc_root: PathBuf::new(),
        }
    }

    /// Root-relative directory that `/`-prefixed links resolve against.
    pub fn with_doc_root(mut self, doc_root: impl Into<PathBuf>) -> Self {
        self.doc_root = doc_root.into();
        self
    }

    /// Every link in `content`, in document order. `document` is root-relative.
    pub fn extract_links(&self, document: &Path, content: &str) -> Vec<LinkReference> {
        let lines = LineIndex::new(content);
        scan::scan(content)
            .into_iter()
            .map(|raw| {
                let raw_target = content[raw.span.clone()].to_string();
                let kind = self.classify(document, &raw_target);
                let anchor_fragment = raw_target.split_once('#').map(|(_, f)| f.to_string());
                let last = raw.whole.end.saturating_sub(1).max(raw.whole.start);
                LinkReference {
                    containing_file: document.to_path_buf(),
                    raw_target,
                    kind,
                    anchor_fragment,
                    syntax: raw.syntax,
                    line_start: lines.line_of(raw.whole.start),
                    line_end: lines.line_of(last),
                    span: raw.span,
                    bracketed: raw.bracketed,
                }
            })
            .collect()
    }

    pub fn classify(&self, document: &Path, raw: &str) -> LinkKind {
        if let Some(scheme) = uri_scheme(raw) {
            return LinkKind::External {
                scheme: Some(scheme.to_ascii_lowercase()),
            };
        }
        if raw.starts_with("//") {
            return LinkKind::External { scheme: None };
        }
        if raw.starts_with('#') {
            return LinkKind::AnchorOnly;
        }

        let path = percent_decode(&raw[..suffix_start(raw)]);
        if path.is_empty() {
            return LinkKind::Unresolvable {
                reason: "link has no path component".into(),
            };
        }
        let (resolved, absolute) = match path.strip_prefix('/') {
            Some(rest) => (resolve(&self.doc_root, rest), true),
            None => (resolve(document.parent().unwrap_or(Path::new("")), &path), false),
        };
        let Some(resolved) = resolved else {
            return LinkKind::Unresolvable {
                reason: "target climbs above the managed root".into(),
            };
        };
        if !self.tree.contains_file(&resolved) && !self.tree.contains_dir(&resolved) {
            return LinkKind::Unresolvable {
                reason: format!("nothing exists at '{}'", to_slash(&resolved)),
            };
        }
        if absolute {
            LinkKind::AbsoluteInternal { resolved }
        } else {
            LinkKind::RelativeInternal { resolved }
        }
    }

    /// New destination text for `reference` once its target moved from
    /// `old_target` to `new_target` and the referencing document lives at
    /// `referencing_new`. `None` when the link does not point at `old_target`
    /// or the new location cannot be expressed.
    pub fn rewrite_link(
        &self,
        reference: &LinkReference,
        old_target: &Path,
        new_target: &Path,
        referencing_new: &Path,
    ) -> Option<String> {
        if reference.kind.resolved()? != old_target {
            return None;
        }
        let original = reference.path_part();

        let mut path = match reference.kind {
            LinkKind::AbsoluteInternal { .. } => {
                let rel = new_target.strip_prefix(&self.doc_root).ok()?;
                format!("/{}", to_slash(rel))
            }
            _ => {
                let dir = referencing_new.parent().unwrap_or(Path::new(""));
                let rel = relative_path(dir, new_target);
                // Keep a leading `./` even before `..` so moving back restores the text.
                if original.starts_with("./") && rel != "." {
                    format!("./{rel}")
                } else {
                    rel
                }
            }
        };
        if original.ends_with('/') && !path.ends_with('/') {
            path.push('/');
        }
        if !reference.bracketed {
            path = percent_encode_destination(&path).into_owned();
        }
        Some(format!("{path}{}", reference.suffix()))
    }
}

/// `http`, `mailto`, ... Requires two or more characters so `C:` is not a scheme.
fn uri_scheme(raw: &str) -> Option<&str> {
    let colon = raw.find(':')?;
    let scheme = &raw[..colon];
    let mut chars = scheme.chars();
    let first = chars.next()?;
    let ok = first.is_ascii_alphabetic()
        && (2..=32).contains(&scheme.len())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '-'));
    ok.then_some(scheme)
}

/// Replace byte spans in `content`. Spans must not overlap.
pub fn apply_edits(content: &str, mut edits: Vec<(Range<usize>, String)>) -> String {
    edits.sort_by(|a, b| b.0.start.cmp(&a.0.start));
    let mut out = content.to_string();
    for (span, text) in edits {
        out.replace_range(span, &text);
    }
    out
}

struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(content: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(content.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    fn line_of(&self, offset: usize) -> usize {
        self.starts.partition_point(|&s| s <= offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> ManagedTree {
        ManagedTree::from_paths([
            "docs/a.md",
            "docs/b.md",
            "docs/guide.md",
            "docs/img/logo.png",
            "README.md",
        ])
    }

    fn only_link(p: &MarkdownLinkProcessor, doc: &str, content: &str) -> LinkReference {
        let mut links = p.extract_links(Path::new(doc), content);
        assert_eq!(links.len(), 1, "expected one link in {content:?}: {links:?}");
        links.remove(0)
    }

    #[test]
    fn classifies_each_kind() {
        let t = tree();
        let p = MarkdownLinkProcessor::new(&t).with_doc_root("docs");
        let d = Path::new("docs/b.md");
        assert_eq!(
            p.classify(d, "./a.md"),
            LinkKind::RelativeInternal { resolved: "docs/a.md".into() }
        );
        assert_eq!(
            p.classify(d, "/guide.md#setup"),
            LinkKind::AbsoluteInternal { resolved: "docs/guide.md".into() }
        );
        assert_eq!(
            p.classify(d, "HTTPS://example.com"),
            LinkKind::External { scheme: Some("https".into()) }
        );
        assert_eq!(p.classify(d, "//cdn.example.com/x.js"), LinkKind::External { scheme: None });
        assert_eq!(p.classify(d, "#intro"), LinkKind::AnchorOnly);
        assert_eq!(
            p.classify(d, "img"),
            LinkKind::RelativeInternal { resolved: "docs/img".into() }
        );
        assert!(matches!(p.classify(d, "../../x.md"), LinkKind::Unresolvable { .. }));
        assert!(matches!(p.classify(d, "./does-not-exist.md"), LinkKind::Unresolvable { .. }));
    }

    #[test]
    fn moved_target_gets_new_relative_path() {
        let t = tree();
        let p = MarkdownLinkProcessor::new(&t);
        let link = only_link(&p, "docs/b.md", "[see a](./a.md)");
        let new = p
            .rewrite_link(&link, Path::new("docs/a.md"), Path::new("docs/sub/a.md"), Path::new("docs/b.md"))
            .unwrap();
        assert_eq!(new, "./sub/a.md");
    }

    #[test]
    fn anchor_survives_rewrite() {
        let t = tree();
        let p = MarkdownLinkProcessor::new(&t);
        let link = only_link(&p, "README.md", "[text](docs/guide.md#setup)");
        assert_eq!(link.anchor_fragment.as_deref(), Some("setup"));
        let new = p
            .rewrite_link(&link, Path::new("docs/guide.md"), Path::new("manual/guide.md"), Path::new("README.md"))
            .unwrap();
        assert_eq!(new, "manual/guide.md#setup");
    }

    #[test]
    fn dot_slash_kept_when_climbing() {
        let t = tree();
        let p = MarkdownLinkProcessor::new(&t);
        let link = only_link(&p, "docs/b.md", "[a](./a.md?raw=1)");
        let new = p
            .rewrite_link(&link, Path::new("docs/a.md"), Path::new("archive/a.md"), Path::new("docs/b.md"))
            .unwrap();
        assert_eq!(new, "./../archive/a.md?raw=1");
    }

    #[test]
    fn referencing_document_moves() {
        let t = tree();
        let p = MarkdownLinkProcessor::new(&t);
        let link = only_link(&p, "docs/b.md", "![logo](img/logo.png)");
        let new = p
            .rewrite_link(
                &link,
                Path::new("docs/img/logo.png"),
                Path::new("docs/img/logo.png"),
                Path::new("docs/deep/er/b.md"),
            )
            .unwrap();
        assert_eq!(new, "../../img/logo.png");
    }

    #[test]
    fn absolute_links_stay_absolute() {
        let t = tree();
        let p = MarkdownLinkProcessor::new(&t).with_doc_root("docs");
        let link = only_link(&p, "docs/b.md", "[g](/guide.md)");
        let new = p
            .rewrite_link(&link, Path::new("docs/guide.md"), Path::new("docs/manual/guide.md"), Path::new("docs/b.md"))
            .unwrap();
        assert_eq!(new, "/manual/guide.md");
        assert!(
            p.rewrite_link(&link, Path::new("docs/guide.md"), Path::new("elsewhere/guide.md"), Path::new("docs/b.md"))
                .is_none(),
            "a target outside the document root has no absolute form"
        );
    }

    #[test]
    fn rewrite_ignores_links_to_other_files_and_dangling_links() {
        let t = tree();
        let p = MarkdownLinkProcessor::new(&t);
        let links = p.extract_links(Path::new("docs/b.md"), "[a](a.md) [gone](./does-not-exist.md)");
        assert!(p
            .rewrite_link(&links[0], Path::new("docs/guide.md"), Path::new("x.md"), Path::new("docs/b.md"))
            .is_none());
        assert!(matches!(links[1].kind, LinkKind::Unresolvable { .. }));
        assert!(p
            .rewrite_link(&links[1], Path::new("docs/does-not-exist.md"), Path::new("x.md"), Path::new("docs/b.md"))
            .is_none());
    }

    #[test]
    fn spaces_are_encoded_unless_bracketed() {
        let t = ManagedTree::from_paths(["docs/my doc.md", "docs/b.md"]);
        let p = MarkdownLinkProcessor::new(&t);
        let links = p.extract_links(Path::new("docs/b.md"), "[x](my%20doc.md) [y](<my doc.md>)");
        assert!(links.iter().all(|l| l.kind.is_internal()), "{links:?}");
        let moved = Path::new("docs/new dir/my doc.md");
        let old = Path::new("docs/my doc.md");
        let b = Path::new("docs/b.md");
        assert_eq!(p.rewrite_link(&links[0], old, moved, b).unwrap(), "new%20dir/my%20doc.md");
        assert_eq!(p.rewrite_link(&links[1], old, moved, b).unwrap(), "new dir/my doc.md");
    }

    #[test]
    fn edits_apply_back_to_front_and_record_lines() {
        let t = tree();
        let p = MarkdownLinkProcessor::new(&t);
        let content = "# B\n\n[one](a.md) and\n[two](guide.md)\n";
        let links = p.extract_links(Path::new("docs/b.md"), content);
        assert_eq!((links[0].line_start, links[1].line_start), (3, 4));
        let edits = vec![
            (links[0].span.clone(), "sub/a.md".to_string()),
            (links[1].span.clone(), "../guide.md".to_string()),
        ];
        assert_eq!(
            apply_edits(content, edits),
            "# B\n\n[one](sub/a.md) and\n[two](../guide.md)\n"
        );
    }

    #[test]
    fn tree_scan_skips_engine_artifacts() {
        let fs = crate::fs_ops::MemoryFileSystem::new();
        fs.insert_file("/kb/docs/a.md", "a");
        fs.insert_file("/kb/.kb_migrate.lock", "");
        let t = ManagedTree::scan(&fs, Path::new("/kb")).unwrap();
        assert_eq!(t.len(), 1);
        assert!(t.contains_file(Path::new("docs/a.md")));
        assert!(t.contains_dir(Path::new("docs")));
    }
}
