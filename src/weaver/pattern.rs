//! Type and member target patterns.
//!
//! A pattern is one of:
//! - empty or absent: matches everything
//! - `/regex/` or `/regex/i`: an unanchored regular expression search, `i` for
//!   case-insensitive matching
//! - anything else: a glob where `*` matches any substring and the whole candidate must
//!   match
//!
//! A pattern containing a qualifier separator (`.` or `/`) is evaluated against the
//! qualified candidate name (`Namespace.Outer/Inner`, or `Type.Member` for members);
//! otherwise against the bare name.

use std::fmt;

use regex::{Regex, RegexBuilder};

use crate::{Error, Result};

/// Characters separating namespace, type nesting and member qualifiers
const QUALIFIER_SEPARATORS: &[char] = &['.', '/'];

/// A compiled target pattern
#[derive(Clone)]
pub struct TargetPattern {
    source: String,
    regex: Option<Regex>,
    qualified: bool,
}

impl TargetPattern {
    /// A pattern matching every candidate
    #[must_use]
    pub fn any() -> Self {
        TargetPattern {
            source: String::new(),
            regex: None,
            qualified: false,
        }
    }

    /// Compiles `pattern`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidPattern`] for a regular expression without a closing `/`, an
    /// unknown flag, or a regular expression that does not compile.
    pub fn parse(pattern: Option<&str>) -> Result<Self> {
        let source = match pattern {
            Some(p) if !p.is_empty() => p,
            _ => return Ok(Self::any()),
        };

        let invalid = |reason: &str| Error::InvalidPattern {
            pattern: source.to_string(),
            reason: reason.to_string(),
        };

        let (expression, case_insensitive, body) = if let Some(rest) = source.strip_prefix('/') {
            let (body, flags) = rest
                .rsplit_once('/')
                .ok_or_else(|| invalid("regular expression is missing its closing '/'"))?;
            let case_insensitive = match flags {
                "" => false,
                "i" => true,
                _ => return Err(invalid("only the 'i' flag is supported")),
            };
            (body.to_string(), case_insensitive, body)
        } else {
            let escaped: Vec<String> = source.split('*').map(regex::escape).collect();
            (format!("^{}$", escaped.join(".*")), false, source)
        };

        let regex = RegexBuilder::new(&expression)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| invalid(&e.to_string()))?;

        Ok(TargetPattern {
            source: source.to_string(),
            regex: Some(regex),
            qualified: body.contains(QUALIFIER_SEPARATORS),
        })
    }

    /// True if this pattern matches everything
    #[must_use]
    pub fn is_any(&self) -> bool {
        self.regex.is_none()
    }

    /// True if this pattern is evaluated against qualified names
    #[must_use]
    pub fn is_qualified(&self) -> bool {
        self.qualified
    }

    /// Evaluates the pattern against a candidate
    #[must_use]
    pub fn matches(&self, name: &str, qualified_name: &str) -> bool {
        match &self.regex {
            None => true,
            Some(regex) if self.qualified => regex.is_match(qualified_name),
            Some(regex) => regex.is_match(name),
        }
    }
}

impl fmt::Debug for TargetPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TargetPattern({:?})", self.source)
    }
}

impl fmt::Display for TargetPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            f.write_str("*")
        } else {
            f.write_str(&self.source)
        }
    }
}

/// One-shot form of [`TargetPattern::matches`].
///
/// # Errors
/// Returns [`Error::InvalidPattern`] if `pattern` does not parse.
pub fn matches(name: &str, qualified_name: &str, pattern: Option<&str>) -> Result<bool> {
    Ok(TargetPattern::parse(pattern)?.matches(name, qualified_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TYPE: &str = "TestClass";
    const QUALIFIED: &str = "Sample.Tests.TypeTargetTests/TestClass";

    #[test]
    fn test_empty_matches_all() -> Result<()> {
        assert!(matches(TYPE, QUALIFIED, None)?);
        assert!(matches(TYPE, QUALIFIED, Some(""))?);
        assert!(TargetPattern::parse(None)?.is_any());
        Ok(())
    }

    #[test]
    fn test_exact_and_glob() -> Result<()> {
        assert!(matches(TYPE, QUALIFIED, Some("TestClass"))?);
        assert!(!matches(TYPE, QUALIFIED, Some("TestClas"))?);
        assert!(matches(TYPE, QUALIFIED, Some("TestCla*"))?);
        assert!(matches(TYPE, QUALIFIED, Some("*Class"))?);
        assert!(matches(TYPE, QUALIFIED, Some("*stCl*"))?);
        assert!(!matches(TYPE, QUALIFIED, Some("Other*"))?);
        assert!(!matches(TYPE, QUALIFIED, Some("testclass"))?);
        Ok(())
    }

    #[test]
    fn test_glob_escapes_metacharacters() -> Result<()> {
        assert!(matches("a+b", "N.a+b", Some("a+b"))?);
        assert!(!matches("aab", "N.aab", Some("a+b"))?);
        assert!(matches("get_Value", "N.T.get_Value", Some("get_*"))?);
        Ok(())
    }

    #[test]
    fn test_qualified_glob() -> Result<()> {
        assert!(matches(TYPE, QUALIFIED, Some("Sample.Tests.TypeTargetTests/TestCla*"))?);
        assert!(matches(TYPE, QUALIFIED, Some("*/TestClass"))?);
        assert!(!matches(TYPE, QUALIFIED, Some("Sample.Other/*"))?);
        Ok(())
    }

    #[test]
    fn test_regex() -> Result<()> {
        assert!(matches(TYPE, QUALIFIED, Some("/testcl[as]+/i"))?);
        assert!(!matches(TYPE, QUALIFIED, Some("/testcl[as]+/"))?);
        assert!(matches(TYPE, QUALIFIED, Some(r"/Sample\.Tests.*TestCl[as]+/"))?);
        assert!(!matches(TYPE, QUALIFIED, Some("/TestCl[bc]+/"))?);
        // unanchored search
        assert!(matches(TYPE, QUALIFIED, Some("/stCl/"))?);
        Ok(())
    }

    #[test]
    fn test_qualified_detection() -> Result<()> {
        assert!(TargetPattern::parse(Some(r"/Sample\.Tests/"))?.is_qualified());
        assert!(TargetPattern::parse(Some("A.B*"))?.is_qualified());
        assert!(!TargetPattern::parse(Some("/abc/i"))?.is_qualified());
        assert!(!TargetPattern::parse(Some("Abc*"))?.is_qualified());
        Ok(())
    }

    #[test]
    fn test_invalid_regex() {
        assert!(matches!(
            TargetPattern::parse(Some("/unterminated")),
            Err(Error::InvalidPattern { .. })
        ));
        assert!(matches!(
            TargetPattern::parse(Some("/abc/x")),
            Err(Error::InvalidPattern { .. })
        ));
        assert!(matches!(
            TargetPattern::parse(Some("/[/")),
            Err(Error::InvalidPattern { .. })
        ));
    }
}
