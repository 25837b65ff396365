//! Key path normalization.
//!
//! Every path is normalized before it is hashed, compared or stored, so that two spellings of
//! the same file map to the same cache node.

/// Normalize `path`: backslashes become slashes, empty and `.` components are dropped, `..`
/// pops the previous component, and the result is lowercased when paths are not case sensitive.
///
/// `..` components that would climb above the start of a relative path are kept.
pub fn normalize(path: &str, case_sensitive: bool) -> String {
    let unified = path.replace('\\', "/");
    let absolute = unified.starts_with('/');

    let mut parts: Vec<&str> = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            _ => parts.push(part),
        }
    }

    let mut out = String::with_capacity(unified.len());
    if absolute {
        out.push('/');
    }
    out.push_str(&parts.join("/"));
    if !case_sensitive {
        out = out.to_lowercase();
    }
    out
}

/// Whether paths on the host compare case-sensitively.
pub fn host_is_case_sensitive() -> bool {
    !cfg!(any(target_os = "windows", target_os = "macos"))
}
