//! Session/project id helpers shared by the backend, voice store, and
//! discovery modules.

/// A `session_id` is treated as an opaque token of safe characters only:
/// letters, digits, `_`, `-`.
pub fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Derive a `project_id` from an absolute working-directory path: path
/// separators become `-`, preserving a leading separator as a prefix dash.
///
/// `/home/user/proj` -> `-home-user-proj`
pub fn project_id_from_path(working_dir: &str) -> String {
    working_dir.replace('/', "-")
}

/// Invert `project_id_from_path`: decode a project directory name back into
/// a path-shaped string (`-` -> `/`, preserving a leading `-` as the root
/// separator).
pub fn path_from_project_id(project_id: &str) -> String {
    project_id.replace('-', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_id_accepts_letters_digits_dash_underscore() {
        assert!(is_safe_id("abc-123_DEF"));
    }

    #[test]
    fn safe_id_rejects_empty() {
        assert!(!is_safe_id(""));
    }

    #[test]
    fn safe_id_rejects_path_separators() {
        assert!(!is_safe_id("../etc/passwd"));
        assert!(!is_safe_id("a/b"));
    }

    #[test]
    fn project_id_round_trips_leading_separator() {
        let pid = project_id_from_path("/home/user/proj");
        assert_eq!(pid, "-home-user-proj");
        assert_eq!(path_from_project_id(&pid), "/home/user/proj");
    }

    #[test]
    fn project_id_handles_relative_path() {
        assert_eq!(project_id_from_path("tmp/x"), "tmp-x");
    }
}
