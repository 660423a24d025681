//! Apply unified-diff-shaped lines onto a target without hunk headers.
//!
//! Model output rarely carries usable `@@` positions, so the diff is
//! synchronized against the target line by line: context lines pin the
//! position, `+` lines are inserted once a context line has matched, and
//! `-` lines drop the target line they name.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiffLine<'a> {
    Context(&'a str),
    Add(&'a str),
    Remove(&'a str),
}

impl<'a> DiffLine<'a> {
    /// Classify on the first non-blank character; models often indent the prefix.
    fn parse(raw: &'a str) -> Self {
        let trimmed = raw.trim_start();
        if let Some(rest) = raw.strip_prefix('+') {
            DiffLine::Add(rest)
        } else if let Some(rest) = trimmed.strip_prefix('+') {
            DiffLine::Add(rest)
        } else if let Some(rest) = trimmed.strip_prefix('-') {
            DiffLine::Remove(rest)
        } else {
            DiffLine::Context(raw)
        }
    }

    fn payload(self) -> &'a str {
        match self {
            DiffLine::Context(p) | DiffLine::Add(p) | DiffLine::Remove(p) => p,
        }
    }
}

/// Leading whitespace of `line`.
fn indent_of(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

/// Re-indent `line` to `prev`'s indentation when they differ by at most one
/// column; larger differences are kept as deliberate.
pub fn indent_adjusted(line: &str, prev: Option<&str>) -> String {
    let content = line.trim();
    if content.is_empty() {
        return String::new();
    }
    let Some(prev) = prev else {
        return line.trim_end().to_string();
    };

    let prev_indent = indent_of(prev);
    let own = indent_of(line).chars().count();
    if own.abs_diff(prev_indent.chars().count()) <= 1 {
        format!("{prev_indent}{content}")
    } else {
        line.trim_end().to_string()
    }
}

/// Push `line`, remembering it as the indentation reference when non-blank.
fn emit(out: &mut Vec<String>, prev: &mut Option<String>, line: String) {
    if !line.trim().is_empty() {
        *prev = Some(line.clone());
    }
    out.push(line);
}

/// True when any line starts with `+` or `-`.
pub fn is_diff(lines: &[String]) -> bool {
    lines
        .iter()
        .any(|l| l.starts_with('+') || l.starts_with('-'))
}

/// Merge `diff` into `target`.
///
/// `prioritize_diff` lets a non-matching diff line replace the current
/// target line when the following lines agree. `loose_apply` trusts `+`/`-`
/// lines before any context line has matched.
pub fn apply_true_diff(
    target: &[String],
    diff: &[String],
    prioritize_diff: bool,
    loose_apply: bool,
) -> Vec<String> {
    let mut out = Vec::with_capacity(target.len() + diff.len());
    let mut ti = 0usize;
    let mut di = 0usize;
    let mut is_found = false;
    let mut prev: Option<String> = None;

    while ti < target.len() && di < diff.len() {
        let t = &target[ti];
        let d = DiffLine::parse(&diff[di]);
        let trusted = is_found || loose_apply;

        match d {
            DiffLine::Context(p) if p.trim() == t.trim() => {
                emit(&mut out, &mut prev, t.clone());
                is_found = true;
                ti += 1;
                di += 1;
                continue;
            }
            DiffLine::Add(p) if trusted => {
                let line = indent_adjusted(p, prev.as_deref());
                emit(&mut out, &mut prev, line);
                di += 1;
                continue;
            }
            DiffLine::Remove(p) if trusted && p.trim() == t.trim() => {
                ti += 1;
                di += 1;
                continue;
            }
            _ => {}
        }

        let next_agrees = ti + 1 < target.len()
            && di + 1 < diff.len()
            && target[ti + 1].trim() == DiffLine::parse(&diff[di + 1]).payload().trim();

        if prioritize_diff && next_agrees {
            if !matches!(d, DiffLine::Remove(_)) {
                let line = indent_adjusted(d.payload(), prev.as_deref());
                emit(&mut out, &mut prev, line);
            }
            is_found = false;
            ti += 1;
            di += 1;
        } else {
            if !t.trim().is_empty() {
                is_found = false;
            }
            emit(&mut out, &mut prev, t.clone());
            ti += 1;
        }
    }

    if is_found || loose_apply {
        for raw in &diff[di..] {
            if let DiffLine::Add(p) = DiffLine::parse(raw) {
                let line = indent_adjusted(p, prev.as_deref());
                emit(&mut out, &mut prev, line);
            }
        }
    }

    out.extend_from_slice(&target[ti..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn test_end_to_end_diff_scenario() {
        let out = apply_true_diff(
            &s(&["foo", "bar", "baz"]),
            &s(&[" foo", "-bar", "+qux", " baz"]),
            false,
            false,
        );
        assert_eq!(out, s(&["foo", "qux", "baz"]));
    }

    #[test]
    fn test_additions_need_an_anchor() {
        let target = s(&["a", "b"]);
        // no context matched yet: the addition is not trusted
        let diff = s(&["+x", " a", " b"]);
        assert_eq!(apply_true_diff(&target, &diff, false, false), s(&["a", "b"]));
        // loose mode trusts it
        assert_eq!(apply_true_diff(&target, &diff, false, true), s(&["x", "a", "b"]));
    }

    #[test]
    fn test_trailing_additions_after_target_ends() {
        let out = apply_true_diff(
            &s(&["fn a() {", "}"]),
            &s(&[" fn a() {", " }", "+", "+fn b() {}"]),
            false,
            false,
        );
        assert_eq!(out, s(&["fn a() {", "}", "", "fn b() {}"]));
    }

    #[test]
    fn test_indent_follows_previous_line() {
        let target = s(&["    let a = 1;", "    let c = 3;"]);
        let diff = s(&["     let a = 1;", "+   let b = 2;", "     let c = 3;"]);
        let out = apply_true_diff(&target, &diff, false, false);
        // one column off is snapped to the previous line's indent
        assert_eq!(out[1], "    let b = 2;");
    }

    #[test]
    fn test_deliberate_indent_is_kept() {
        assert_eq!(indent_adjusted("        deep()", Some("    shallow()")), "        deep()");
        assert_eq!(indent_adjusted("   near()", Some("    ref()")), "    near()");
        assert_eq!(indent_adjusted("  \t ", Some("x")), "");
    }

    #[test]
    fn test_marker_removal_resolves_conflict() {
        let target = s(&["a", "<<<<<<< HEAD", "one", "=======", "two", ">>>>>>> br", "z"]);
        let diff = s(&[" a", "-<<<<<<< HEAD", "-one", "-=======", " two", "->>>>>>> br", " z"]);
        assert_eq!(apply_true_diff(&target, &diff, false, false), s(&["a", "two", "z"]));
    }

    #[test]
    fn test_unmatched_diff_keeps_target() {
        let target = s(&["a", "b", "c"]);
        let diff = s(&[" x", "-y", "+z"]);
        assert_eq!(apply_true_diff(&target, &diff, false, false), target);
    }

    #[test]
    fn test_prioritized_replacement() {
        let target = s(&["a", "old", "c"]);
        // "new" is neither context nor a marked change, but the next lines agree
        let diff = s(&[" a", "new", " c"]);
        assert_eq!(apply_true_diff(&target, &diff, true, false), s(&["a", "new", "c"]));
        assert_eq!(apply_true_diff(&target, &diff, false, false), target);
    }

    #[test]
    fn test_is_diff_detection() {
        assert!(is_diff(&s(&["a", "+b"])));
        assert!(is_diff(&s(&["-a"])));
        assert!(!is_diff(&s(&["a", " +b"])));
    }

    proptest! {
        #[test]
        fn prop_context_only_diff_is_identity(
            target in proptest::collection::vec("[a-z ]{0,12}", 0..30),
        ) {
            let out = apply_true_diff(&target, &target, false, false);
            prop_assert_eq!(out, target);
        }
    }
}
