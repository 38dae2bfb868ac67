//! Command template resolution.
//!
//! Turns a tool's argument-vector template plus a request's argument map into
//! a concrete argv, and merges the tool's default environment with the
//! request's overrides. Two template shapes exist:
//!
//! - **shell pipeline**: `[<...sh>, "-c", <script>]`. Placeholders are
//!   substituted inside the script wherever `$key` appears as a whole token.
//! - **positional**: any other shape. A token equal to `$key` is replaced by
//!   the value; tokens that merely contain `$key` stay as written.
//!
//! Unknown placeholders are left as literal text.

use std::collections::HashMap;

/// Flag that makes a POSIX shell run its next argument as a script.
pub const SHELL_SCRIPT_FLAG: &str = "-c";

/// A template resolved against one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub argv: Vec<String>,
    pub env: HashMap<String, String>,
}

/// Resolve argv and environment for one invocation.
pub fn resolve(
    template: &[String],
    default_env: &HashMap<String, String>,
    args: &HashMap<String, String>,
    env_overrides: Option<&HashMap<String, String>>,
) -> ResolvedCommand {
    ResolvedCommand {
        argv: resolve_argv(template, args),
        env: merge_env(default_env, env_overrides),
    }
}

/// Tool defaults first, then request entries on top.
pub fn merge_env(
    defaults: &HashMap<String, String>,
    overrides: Option<&HashMap<String, String>>,
) -> HashMap<String, String> {
    let mut env = defaults.clone();
    if let Some(overrides) = overrides {
        env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    env
}

/// True for the 3-token `sh -c <script>` form (`bash`, `zsh`, `/bin/sh`, ...).
pub fn is_shell_pipeline(template: &[String]) -> bool {
    match template {
        [shell, flag, _script] => shell.ends_with("sh") && flag == SHELL_SCRIPT_FLAG,
        _ => false,
    }
}

pub fn resolve_argv(template: &[String], args: &HashMap<String, String>) -> Vec<String> {
    if is_shell_pipeline(template) {
        let mut argv = template.to_vec();
        argv[2] = substitute_script(&template[2], args);
        argv
    } else {
        substitute_positional(template, args)
    }
}

/// Replace tokens that are exactly `$key`.
pub fn substitute_positional(template: &[String], args: &HashMap<String, String>) -> Vec<String> {
    template
        .iter()
        .map(|token| {
            token
                .strip_prefix('$')
                .and_then(|key| args.get(key))
                .cloned()
                .unwrap_or_else(|| token.clone())
        })
        .collect()
}

/// Replace every whole-token `$key` in a shell script.
///
/// Single left-to-right pass: substituted values are copied verbatim and never
/// rescanned, so a value spelling another placeholder stays literal.
pub fn substitute_script(script: &str, args: &HashMap<String, String>) -> String {
    if args.is_empty() {
        return script.to_string();
    }

    let mut out = String::with_capacity(script.len());
    let mut rest = script;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        match match_placeholder(after, args) {
            Some((key_len, value)) => {
                out.push_str(value);
                rest = &after[key_len..];
            }
            None => {
                out.push('$');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Longest key that `after` starts with and that ends on an identifier boundary.
fn match_placeholder<'a>(
    after: &str,
    args: &'a HashMap<String, String>,
) -> Option<(usize, &'a str)> {
    args.iter()
        .filter(|(key, _)| {
            !key.is_empty() && after.starts_with(key.as_str()) && ends_token(after, key.len())
        })
        .max_by_key(|(key, _)| key.len())
        .map(|(key, value)| (key.len(), value.as_str()))
}

fn ends_token(s: &str, idx: usize) -> bool {
    s.as_bytes()
        .get(idx)
        .map_or(true, |&b| !is_identifier_byte(b))
}

fn is_identifier_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_shell_detection() {
        assert!(is_shell_pipeline(&strings(&["/bin/bash", "-c", "echo"])));
        assert!(is_shell_pipeline(&strings(&["sh", "-c", "echo"])));
        assert!(is_shell_pipeline(&strings(&["/usr/bin/zsh", "-c", "echo"])));
        assert!(!is_shell_pipeline(&strings(&["/bin/bash", "-x", "echo"])));
        assert!(!is_shell_pipeline(&strings(&["/bin/bash", "-c"])));
        assert!(!is_shell_pipeline(&strings(&["python", "-c", "print(1)"])));
        assert!(!is_shell_pipeline(&strings(&["bash", "-c", "echo", "extra"])));
    }

    #[test]
    fn test_shell_whole_token_substitution() {
        let argv = resolve_argv(
            &strings(&["/bin/bash", "-c", "cat | grep $pattern"]),
            &map(&[("pattern", "test")]),
        );
        assert_eq!(argv, strings(&["/bin/bash", "-c", "cat | grep test"]));
    }

    #[test]
    fn test_shell_partial_identifier_untouched() {
        let script = substitute_script(
            "echo $pattern $patternx ${pattern} $pattern_2 $pattern-x",
            &map(&[("pattern", "P")]),
        );
        assert_eq!(script, "echo P $patternx ${pattern} $pattern_2 P-x");
    }

    #[test]
    fn test_shell_every_occurrence_replaced() {
        let script = substitute_script("$a$a $a", &map(&[("a", "x")]));
        // `$a$a`: the first `$a` is followed by `$`, a non-identifier byte.
        assert_eq!(script, "xx x");
    }

    #[test]
    fn test_shell_longest_key_wins() {
        let script = substitute_script("$in $input", &map(&[("in", "1"), ("input", "2")]));
        assert_eq!(script, "1 2");
    }

    #[test]
    fn test_shell_no_second_pass() {
        let script = substitute_script("echo $a $b", &map(&[("a", "$b"), ("b", "B")]));
        assert_eq!(script, "echo $b B");
    }

    #[test]
    fn test_shell_value_is_literal() {
        let script = substitute_script("echo $v", &map(&[("v", "$1 \\1 ${0}")]));
        assert_eq!(script, "echo $1 \\1 ${0}");
    }

    #[test]
    fn test_shell_unknown_placeholder_kept() {
        let script = substitute_script("echo $missing $HOME", &map(&[("other", "x")]));
        assert_eq!(script, "echo $missing $HOME");
    }

    #[test]
    fn test_shell_composite_pipeline() {
        let argv = resolve_argv(
            &strings(&[
                "/bin/bash",
                "-c",
                "echo $input | tr '[:lower:]' '[:upper:]' | rev | cut -c1-$length",
            ]),
            &map(&[("input", "hello"), ("length", "3")]),
        );
        assert_eq!(
            argv[2],
            "echo hello | tr '[:lower:]' '[:upper:]' | rev | cut -c1-3"
        );
    }

    #[test]
    fn test_positional_exact_match_only() {
        let argv = resolve_argv(
            &strings(&["echo", "$message", "prefix-$message", "$messages"]),
            &map(&[("message", "Hello World")]),
        );
        assert_eq!(
            argv,
            strings(&["echo", "Hello World", "prefix-$message", "$messages"])
        );
    }

    #[test]
    fn test_positional_missing_arg_left_literal() {
        let argv = resolve_argv(&strings(&["uname", "$flag"]), &HashMap::new());
        assert_eq!(argv, strings(&["uname", "$flag"]));
    }

    #[test]
    fn test_env_merge_request_wins() {
        let merged = merge_env(
            &map(&[("MY_VAR", "default_value"), ("KEEP", "1")]),
            Some(&map(&[("MY_VAR", "custom_value"), ("EXTRA", "2")])),
        );
        assert_eq!(
            merged,
            map(&[("MY_VAR", "custom_value"), ("KEEP", "1"), ("EXTRA", "2")])
        );
    }

    #[test]
    fn test_env_merge_without_overrides() {
        let defaults = map(&[("MY_VAR", "default_value")]);
        assert_eq!(merge_env(&defaults, None), defaults);
    }

    #[test]
    fn test_resolve_combines_both() {
        let resolved = resolve(
            &strings(&["echo", "$message"]),
            &map(&[("A", "1")]),
            &map(&[("message", "hi")]),
            None,
        );
        assert_eq!(resolved.argv, strings(&["echo", "hi"]));
        assert_eq!(resolved.env, map(&[("A", "1")]));
    }

    proptest! {
        #[test]
        fn prop_positional_tokens_without_dollar_unchanged(
            tokens in proptest::collection::vec("[a-z -]{0,8}", 0..6),
            value in "[a-zA-Z ]{0,8}",
        ) {
            let template: Vec<String> = tokens;
            let args = map(&[("key", value.as_str())]);
            prop_assert_eq!(substitute_positional(&template, &args), template);
        }

        #[test]
        fn prop_longer_identifier_never_matches(
            key in "[a-z]{1,6}",
            suffix in "[A-Za-z0-9_]{1,6}",
        ) {
            let script = format!("echo ${key}{suffix}");
            let args = map(&[(key.as_str(), "VALUE")]);
            prop_assert_eq!(substitute_script(&script, &args), script);
        }

        #[test]
        fn prop_whole_token_always_matches(
            key in "[a-z]{1,6}",
            value in "[a-zA-Z0-9 ]{0,10}",
            sep in "[ |;)'\"/.-]",
        ) {
            let script = format!("echo ${key}{sep}tail");
            let args = map(&[(key.as_str(), value.as_str())]);
            prop_assert_eq!(substitute_script(&script, &args), format!("echo {value}{sep}tail"));
        }

        #[test]
        fn prop_env_overrides_always_present(
            defaults in proptest::collection::hash_map("[A-Z]{1,4}", "[a-z]{0,4}", 0..5),
            overrides in proptest::collection::hash_map("[A-Z]{1,4}", "[a-z]{0,4}", 0..5),
        ) {
            let merged = merge_env(&defaults, Some(&overrides));
            for (k, v) in &overrides {
                prop_assert_eq!(merged.get(k), Some(v));
            }
            for k in defaults.keys() {
                prop_assert!(merged.contains_key(k));
            }
        }
    }
}
