//! Cache key namespacing.

/// Separator between namespace and key.
pub const SEPARATOR: char = ':';

/// Optional key prefix partitioning the generic cache interface.
///
/// With a namespace, `reset()` only removes keys under it, which is what makes
/// resetting a shared cache safe. Without one, keys are passed through and
/// `reset()` clears the whole logical database.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyNamespace {
    prefix: Option<String>,
}

impl KeyNamespace {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let prefix = prefix.trim_end_matches(SEPARATOR).to_string();
        if prefix.is_empty() {
            return Self::none();
        }
        KeyNamespace {
            prefix: Some(prefix),
        }
    }

    /// Namespace that leaves keys untouched.
    pub fn none() -> Self {
        KeyNamespace { prefix: None }
    }

    pub fn from_option(prefix: Option<&str>) -> Self {
        prefix.map(Self::new).unwrap_or_default()
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn is_scoped(&self) -> bool {
        self.prefix.is_some()
    }

    /// Full store key for a caller key.
    pub fn key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}{}{}", prefix, SEPARATOR, key),
            None => key.to_string(),
        }
    }

    /// Glob matching every key in the namespace, or `None` when unscoped.
    pub fn match_all(&self) -> Option<String> {
        self.prefix
            .as_ref()
            .map(|prefix| format!("{}{}*", escape_glob(prefix), SEPARATOR))
    }

    /// Strip the namespace from a store key. Keys outside it return `None`.
    pub fn strip<'a>(&self, key: &'a str) -> Option<&'a str> {
        match &self.prefix {
            Some(prefix) => key
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix(SEPARATOR)),
            None => Some(key),
        }
    }
}

/// Escape glob metacharacters so a literal prefix matches only itself.
pub fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Redis-style glob match (`*`, `?`, `[...]`, `[^...]`, `\` escapes).
///
/// Used by backends that evaluate `KEYS` patterns locally.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob_match_from(&p, &t)
}

fn glob_match_from(p: &[char], t: &[char]) -> bool {
    let (mut pi, mut ti) = (0, 0);
    // Most recent `*` position in the pattern and the text index it is
    // currently absorbing up to.
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() {
            match p[pi] {
                '*' => {
                    star = Some((pi, ti));
                    pi += 1;
                    continue;
                }
                '?' => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                '[' => {
                    if let Some((matched, next)) = match_class(p, pi, t[ti]) {
                        if matched {
                            pi = next;
                            ti += 1;
                            continue;
                        }
                    }
                }
                '\\' if pi + 1 < p.len() => {
                    if p[pi + 1] == t[ti] {
                        pi += 2;
                        ti += 1;
                        continue;
                    }
                }
                c => {
                    if c == t[ti] {
                        pi += 1;
                        ti += 1;
                        continue;
                    }
                }
            }
        }

        match star {
            Some((star_pi, star_ti)) => {
                pi = star_pi + 1;
                ti = star_ti + 1;
                star = Some((star_pi, star_ti + 1));
            }
            None => return false,
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}

/// Evaluate a `[...]` class starting at `p[start]`. Returns whether `c`
/// matched and the index just past the closing bracket.
fn match_class(p: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = i < p.len() && p[i] == '^';
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < p.len() && p[i] != ']' {
        if p[i] == '\\' && i + 1 < p.len() {
            matched |= p[i + 1] == c;
            i += 2;
        } else if i + 2 < p.len() && p[i + 1] == '-' && p[i + 2] != ']' {
            let (lo, hi) = if p[i] <= p[i + 2] {
                (p[i], p[i + 2])
            } else {
                (p[i + 2], p[i])
            };
            matched |= lo <= c && c <= hi;
            i += 3;
        } else {
            matched |= p[i] == c;
            i += 1;
        }
    }

    if i >= p.len() {
        // Unterminated class
        return None;
    }

    Some((matched != negate, i + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_key() {
        let ns = KeyNamespace::new("app");
        assert_eq!(ns.key("user:1"), "app:user:1");
        assert_eq!(ns.match_all().as_deref(), Some("app:*"));
    }

    #[test]
    fn test_namespace_trailing_separator() {
        assert_eq!(KeyNamespace::new("app:"), KeyNamespace::new("app"));
        assert!(!KeyNamespace::new(":").is_scoped());
    }

    #[test]
    fn test_unscoped_namespace() {
        let ns = KeyNamespace::none();
        assert_eq!(ns.key("user:1"), "user:1");
        assert!(ns.match_all().is_none());
        assert_eq!(ns.strip("anything"), Some("anything"));
    }

    #[test]
    fn test_namespace_strip() {
        let ns = KeyNamespace::new("app");
        assert_eq!(ns.strip("app:user:1"), Some("user:1"));
        assert_eq!(ns.strip("application:x"), None);
        assert_eq!(ns.strip("other:x"), None);
    }

    #[test]
    fn test_glob_escaping() {
        let ns = KeyNamespace::new("a*b");
        assert_eq!(ns.match_all().as_deref(), Some("a\\*b:*"));
        assert!(glob_match("a\\*b:*", "a*b:key"));
        assert!(!glob_match("a\\*b:*", "axxb:key"));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", ""));
        assert!(glob_match("user:*", "user:42"));
        assert!(!glob_match("user:*", "session:42"));
        assert!(glob_match("h?llo", "hello"));
        assert!(!glob_match("h?llo", "hllo"));
        assert!(glob_match("h[ae]llo", "hallo"));
        assert!(!glob_match("h[ae]llo", "hillo"));
        assert!(glob_match("h[^e]llo", "hallo"));
        assert!(!glob_match("h[^e]llo", "hello"));
        assert!(glob_match("h[a-c]llo", "hbllo"));
        assert!(glob_match("*:*:profile", "user:1:profile"));
        assert!(!glob_match("*:profile", "user:1:settings"));
    }
}
