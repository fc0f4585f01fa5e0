//! Scoping a navigation tree to the documents of one partition.

use std::collections::HashSet;

use crate::archive::{NavPoint, NavTarget};

/// Keep the nodes whose target survives.
///
/// A node whose own target is gone but which still has surviving children is
/// retargeted to its first surviving descendant; childless orphans are pruned.
/// Placeholder nodes (no target) are kept only while they have children.
pub(crate) fn scope_points(points: &[NavPoint], keep: &HashSet<&str>) -> Vec<NavPoint> {
    points
        .iter()
        .filter_map(|point| scope_point(point, keep))
        .collect()
}

fn scope_point(point: &NavPoint, keep: &HashSet<&str>) -> Option<NavPoint> {
    let children = scope_points(&point.children, keep);
    let own = point
        .target
        .as_ref()
        .filter(|t| keep.contains(t.id.as_str()))
        .cloned();

    let target = match own {
        Some(target) => Some(target),
        None if children.is_empty() => return None,
        None if point.target.is_none() => None,
        None => children.iter().find_map(NavPoint::first_target).cloned(),
    };

    Some(NavPoint {
        label: point.label.clone(),
        target,
        children,
    })
}

/// Label of the first navigation node pointing into `id`, in document order.
pub(crate) fn label_for(points: &[NavPoint], id: &str) -> Option<String> {
    points.iter().find_map(|point| {
        let own = point
            .target
            .as_ref()
            .filter(|t| t.id == id)
            .map(|_| point.label.trim())
            .filter(|label| !label.is_empty())
            .map(str::to_string);
        own.or_else(|| label_for(&point.children, id))
    })
}

/// One flat entry per document, for partitions with no surviving navigation.
pub(crate) fn synthesize(chapters: &[(String, String)]) -> Vec<NavPoint> {
    chapters
        .iter()
        .map(|(id, label)| NavPoint {
            label: label.clone(),
            target: Some(NavTarget {
                id: id.clone(),
                anchor: None,
            }),
            children: Vec::new(),
        })
        .collect()
}

/// Label derived from a document's file name: `text/03-the-long-road.xhtml`
/// becomes "the long road".
pub(crate) fn filename_label(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let stem = [".xhtml", ".html", ".htm"]
        .iter()
        .find_map(|ext| name.strip_suffix(ext))
        .unwrap_or(name);
    let digits = stem.bytes().take_while(u8::is_ascii_digit).count();
    let stem = match stem[digits..].strip_prefix('-') {
        Some(rest) if digits > 0 => rest,
        _ => stem,
    };
    let label = stem.replace('-', " ").trim().to_string();
    (!label.is_empty()).then_some(label)
}
