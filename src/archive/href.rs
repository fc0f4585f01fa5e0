//! Resolution of relative references between files inside the container.
//!
//! All container paths are `/`-separated, relative to the zip root, and
//! percent-decoded.

use percent_encoding::percent_decode_str;

/// A local reference split into container path and fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub path: String,
    pub fragment: Option<String>,
}

/// Directory part of a container path, with trailing slash (or empty).
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..=i],
        None => "",
    }
}

/// True for references that leave the container (`http:`, `mailto:`, `data:` ...).
pub fn is_external(reference: &str) -> bool {
    let reference = reference.trim();
    if reference.starts_with("//") {
        return true;
    }
    match reference.find(':') {
        // A scheme is letters/digits/+-. before the first ':' and before any '/', '?' or '#'.
        Some(colon) => {
            let scheme = &reference[..colon];
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Resolve `reference`, found in the file at `base_file`, to a container path.
///
/// Returns `None` for external and empty references. Fragment-only references
/// resolve to `base_file` itself.
pub fn resolve(base_file: &str, reference: &str) -> Option<Resolved> {
    let reference = reference.trim();
    if reference.is_empty() || is_external(reference) {
        return None;
    }

    let (path_part, fragment) = match reference.split_once('#') {
        Some((p, f)) => (p, Some(f)),
        None => (reference, None),
    };
    let path_part = path_part.split('?').next().unwrap_or_default();
    let fragment = fragment
        .filter(|f| !f.is_empty())
        .map(|f| percent_decode_str(f).decode_utf8_lossy().into_owned());

    if path_part.is_empty() {
        return Some(Resolved {
            path: base_file.to_string(),
            fragment,
        });
    }

    let decoded = percent_decode_str(path_part).decode_utf8_lossy();
    let joined = match decoded.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("{}{}", parent_dir(base_file), decoded),
    };

    Some(Resolved {
        path: normalize(&joined),
        fragment,
    })
}

/// Join a manifest href onto the package directory.
pub fn package_path(package_dir: &str, href: &str) -> String {
    let decoded = percent_decode_str(href).decode_utf8_lossy();
    normalize(&format!("{}{}", package_dir, decoded))
}

/// Collapse `.` and `..` segments and duplicate slashes.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

/// Relative reference from the file at `from` to the container path `to`.
pub fn relative(from: &str, to: &str) -> String {
    let from_dir: Vec<&str> = parent_dir(from).split('/').filter(|s| !s.is_empty()).collect();
    let to_parts: Vec<&str> = to.split('/').collect();

    let common = from_dir
        .iter()
        .zip(to_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = String::new();
    for _ in common..from_dir.len() {
        out.push_str("../");
    }
    out.push_str(&to_parts[common..].join("/"));
    out
}
