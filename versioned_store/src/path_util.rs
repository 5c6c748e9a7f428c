// versioned_store/src/path_util.rs

/// Root branch of every code system tree.
pub const MAIN: &str = "MAIN";

pub const SEPARATOR: char = '/';

/// Everything before the last "/", or `None` for a root path.
pub fn parent_path(path: &str) -> Option<&str> {
    path.rfind(SEPARATOR).map(|index| &path[..index])
}

/// A path is a descendant of an ancestor when it equals the ancestor or
/// extends it by at least one "/" separated segment.
pub fn is_descendant_of(path: &str, ancestor: &str) -> bool {
    path == ancestor || path.starts_with(&format!("{}{}", ancestor, SEPARATOR))
}

/// The chain of paths from `path` up to and including the root,
/// nearest first.
pub fn ancestor_paths(path: &str) -> Vec<String> {
    let mut ancestors = Vec::new();
    let mut current = path;
    while let Some(parent) = parent_path(current) {
        ancestors.push(parent.to_string());
        current = parent;
    }
    ancestors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_of_root_is_none() {
        assert_eq!(parent_path(MAIN), None);
        assert_eq!(parent_path("MAIN/project"), Some(MAIN));
        assert_eq!(parent_path("MAIN/project/task"), Some("MAIN/project"));
    }

    #[test]
    fn descendant_check_requires_segment_boundary() {
        assert!(is_descendant_of("MAIN/project", "MAIN"));
        assert!(is_descendant_of("MAIN", "MAIN"));
        assert!(!is_descendant_of("MAINLINE", "MAIN"));
    }

    #[test]
    fn ancestors_are_nearest_first() {
        assert_eq!(
            ancestor_paths("MAIN/project/task"),
            vec!["MAIN/project".to_string(), "MAIN".to_string()]
        );
    }
}
