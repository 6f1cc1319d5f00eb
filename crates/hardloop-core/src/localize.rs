//! Attribution of multi-file build errors to a single artifact.
//!
//! A build that compiles the contract together with a freshly generated
//! attack script can fail because of the script alone. Only errors whose
//! location resolves to the artifact count against the artifact.

use crate::domain::{Diagnostic, Severity};

/// Keep error-severity diagnostics located in `artifact_name`, in input order.
///
/// Paths are compared by suffix on a path-component boundary after
/// normalizing separators, so `/app/src/Target.sol`, `src/Target.sol` and
/// `Target.sol` all identify `Target.sol`, while `MyTarget.sol` does not.
pub fn filter_by_artifact(errors: &[Diagnostic], artifact_name: &str) -> Vec<Diagnostic> {
    errors
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .filter(|d| {
            d.file
                .as_deref()
                .is_some_and(|file| path_identifies(file, artifact_name))
        })
        .cloned()
        .collect()
}

/// Error-severity diagnostics attributed anywhere other than `artifact_name`
/// (including unlocated ones).
pub fn errors_elsewhere(errors: &[Diagnostic], artifact_name: &str) -> Vec<Diagnostic> {
    errors
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .filter(|d| {
            !d.file
                .as_deref()
                .is_some_and(|file| path_identifies(file, artifact_name))
        })
        .cloned()
        .collect()
}

/// Whether `reported` names the same file as `artifact_name`.
pub fn path_identifies(reported: &str, artifact_name: &str) -> bool {
    let reported = normalize(reported);
    let wanted = normalize(artifact_name);
    if wanted.is_empty() {
        return false;
    }
    if reported == wanted {
        return true;
    }
    reported
        .strip_suffix(wanted.as_str())
        .is_some_and(|prefix| prefix.ends_with('/'))
}

fn normalize(path: &str) -> String {
    let unified = path.trim().replace('\\', "/");
    unified.trim_start_matches("./").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diag(severity: Severity, file: &str) -> Diagnostic {
        Diagnostic::new(severity, "msg").with_file(file)
    }

    #[test]
    fn test_keeps_only_errors_for_artifact() {
        let errors = vec![
            diag(Severity::Error, "A.x"),
            diag(Severity::Warning, "B.x"),
            diag(Severity::Error, "B.x"),
        ];
        let kept = filter_by_artifact(&errors, "A.x");
        assert_eq!(kept, vec![errors[0].clone()]);
    }

    #[test]
    fn test_warnings_on_artifact_are_dropped() {
        let errors = vec![
            diag(Severity::Warning, "Target.sol"),
            diag(Severity::Info, "Target.sol"),
        ];
        assert!(filter_by_artifact(&errors, "Target.sol").is_empty());
    }

    #[test]
    fn test_suffix_match_on_component_boundary() {
        assert!(path_identifies("/app/src/Target.sol", "Target.sol"));
        assert!(path_identifies("src/Target.sol", "Target.sol"));
        assert!(path_identifies("./Target.sol", "Target.sol"));
        assert!(path_identifies("C:\\work\\space\\Target.sol", "Target.sol"));
        assert!(path_identifies("/app/src/Target.sol", "src/Target.sol"));
        assert!(!path_identifies("/app/src/MyTarget.sol", "Target.sol"));
        assert!(!path_identifies("test/Exploit.t.sol", "Target.sol"));
        assert!(!path_identifies("Target.sol", ""));
    }

    #[test]
    fn test_order_preserved() {
        let errors = vec![
            Diagnostic::new(Severity::Error, "first").with_file("/app/Target.sol"),
            diag(Severity::Error, "Exploit.t.sol"),
            Diagnostic::new(Severity::Error, "second").with_file("Target.sol"),
        ];
        let kept = filter_by_artifact(&errors, "Target.sol");
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].message, "first");
        assert_eq!(kept[1].message, "second");
    }

    #[test]
    fn test_unlocated_errors_are_elsewhere() {
        let errors = vec![
            Diagnostic::new(Severity::Error, "linker"),
            diag(Severity::Error, "Target.sol"),
            diag(Severity::Error, "test/Exploit.t.sol"),
        ];
        assert_eq!(filter_by_artifact(&errors, "Target.sol").len(), 1);
        assert_eq!(errors_elsewhere(&errors, "Target.sol").len(), 2);
    }
}
