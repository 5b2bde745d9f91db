//! Glob-Style Pattern Matching
//!
//! Used by `KEYS` and by `COMMAND LIST FILTERBY PATTERN`.
//!
//! Supported syntax:
//! - `*` matches any run of bytes, including none
//! - `?` matches exactly one byte
//! - `[abc]`, `[a-z]`, `[^a]` match one byte against a class
//! - `\x` matches `x` literally, also inside a class

/// A compiled glob pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    pattern: Vec<u8>,
    nocase: bool,
}

impl GlobPattern {
    pub fn new(pattern: impl AsRef<[u8]>) -> Self {
        Self {
            pattern: pattern.as_ref().to_vec(),
            nocase: false,
        }
    }

    /// Makes matching ASCII case-insensitive.
    pub fn nocase(mut self) -> Self {
        self.nocase = true;
        self
    }

    /// Returns true if the pattern is a lone `*`.
    pub fn matches_all(&self) -> bool {
        self.pattern == b"*"
    }

    pub fn matches(&self, text: impl AsRef<[u8]>) -> bool {
        self.match_from(&self.pattern, text.as_ref())
    }

    fn eq(&self, a: u8, b: u8) -> bool {
        if self.nocase {
            a.eq_ignore_ascii_case(&b)
        } else {
            a == b
        }
    }

    fn match_from(&self, pattern: &[u8], text: &[u8]) -> bool {
        let Some((&head, rest)) = pattern.split_first() else {
            return text.is_empty();
        };

        match head {
            b'*' => {
                let rest = trim_stars(rest);
                if rest.is_empty() {
                    return true;
                }
                (0..=text.len()).any(|i| self.match_from(rest, &text[i..]))
            }
            b'?' => !text.is_empty() && self.match_from(rest, &text[1..]),
            b'[' => {
                let Some((&c, tail)) = text.split_first() else {
                    return false;
                };
                match self.match_class(rest, c) {
                    Some((matched, used)) => matched && self.match_from(&rest[used..], tail),
                    None => false,
                }
            }
            b'\\' if !rest.is_empty() => {
                !text.is_empty() && self.eq(rest[0], text[0]) && self.match_from(&rest[1..], &text[1..])
            }
            c => !text.is_empty() && self.eq(c, text[0]) && self.match_from(rest, &text[1..]),
        }
    }

    /// Evaluates a class body (the bytes after `[`) against `c`.
    ///
    /// Returns whether `c` is in the class and how many pattern bytes the
    /// class used, including the closing `]`. `None` if unterminated.
    fn match_class(&self, class: &[u8], c: u8) -> Option<(bool, usize)> {
        let negate = class.first() == Some(&b'^');
        let mut i = usize::from(negate);
        let mut matched = false;

        loop {
            let b = *class.get(i)?;
            match b {
                b']' => break,
                b'\\' => {
                    let lit = *class.get(i + 1)?;
                    matched |= self.eq(lit, c);
                    i += 2;
                }
                _ if class.get(i + 1) == Some(&b'-') && class.get(i + 2).is_some_and(|&e| e != b']') => {
                    let (mut lo, mut hi) = (b, class[i + 2]);
                    if lo > hi {
                        std::mem::swap(&mut lo, &mut hi);
                    }
                    let probe = if self.nocase { c.to_ascii_lowercase() } else { c };
                    let (lo, hi) = if self.nocase {
                        (lo.to_ascii_lowercase(), hi.to_ascii_lowercase())
                    } else {
                        (lo, hi)
                    };
                    matched |= (lo..=hi).contains(&probe);
                    i += 3;
                }
                _ => {
                    matched |= self.eq(b, c);
                    i += 1;
                }
            }
        }

        Some((matched != negate, i + 1))
    }
}

fn trim_stars(mut pattern: &[u8]) -> &[u8] {
    while let Some((&b'*', rest)) = pattern.split_first() {
        pattern = rest;
    }
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star() {
        let pattern = GlobPattern::new("h*llo");
        assert!(pattern.matches("hello"));
        assert!(pattern.matches("hllo"));
        assert!(pattern.matches("heeeello"));
        assert!(!pattern.matches("help"));
        assert!(GlobPattern::new("*").matches(""));
        assert!(GlobPattern::new("a**b").matches("axxb"));
    }

    #[test]
    fn test_question_mark() {
        let pattern = GlobPattern::new("h?llo");
        assert!(pattern.matches("hallo"));
        assert!(!pattern.matches("hllo"));
    }

    #[test]
    fn test_classes() {
        let pattern = GlobPattern::new("h[ae]llo");
        assert!(pattern.matches("hello"));
        assert!(pattern.matches("hallo"));
        assert!(!pattern.matches("hillo"));

        let negated = GlobPattern::new("h[^e]llo");
        assert!(negated.matches("hallo"));
        assert!(!negated.matches("hello"));

        let range = GlobPattern::new("key[0-9]");
        assert!(range.matches("key5"));
        assert!(!range.matches("keyx"));

        let reversed = GlobPattern::new("[z-a]");
        assert!(reversed.matches("m"));

        assert!(!GlobPattern::new("[abc").matches("a"));
    }

    #[test]
    fn test_escapes() {
        assert!(GlobPattern::new("a\\*b").matches("a*b"));
        assert!(!GlobPattern::new("a\\*b").matches("axb"));
        assert!(GlobPattern::new("[\\]]").matches("]"));
    }

    #[test]
    fn test_nocase() {
        let pattern = GlobPattern::new("GET*").nocase();
        assert!(pattern.matches("getdel"));
        assert!(GlobPattern::new("[A-C]x").nocase().matches("bX"));
        assert!(!GlobPattern::new("GET*").matches("getdel"));
    }
}
