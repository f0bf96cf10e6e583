//! Classification rules — ordered `(pattern, domain)` pairs.
//!
//! Patterns are whole-path globs with `*` as the only metacharacter,
//! compiled to anchored regexes when the set is built. Matching on the
//! exec path is first-match-wins over the operator's ordering, with an
//! optional explicit default domain for everything else. Classification
//! never inspects partial names; a pattern either covers the full
//! resolved path or it does not apply.

use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::kernel::registry::DomainRegistry;
use crate::types::DomainId;

/// Rule set construction errors. Fatal to boot and to admin replacement.
#[derive(Debug, Error)]
pub enum RulesError {
    /// A pattern did not compile.
    #[error("invalid pattern '{pattern}': {source}")]
    Pattern {
        /// Offending pattern.
        pattern: String,
        /// Underlying error.
        source: regex::Error,
    },
    /// A rule targets a domain missing from the registry.
    #[error("pattern '{pattern}' targets unregistered domain {domain}")]
    UnknownDomain {
        /// Offending pattern.
        pattern: String,
        /// Missing domain.
        domain: DomainId,
    },
    /// The default domain is missing from the registry.
    #[error("default domain {0} is not registered")]
    UnknownDefault(DomainId),
    /// The rules file could not be read.
    #[error("failed to read rules at {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The rules file could not be parsed.
    #[error("failed to parse rules at {path}: {source}")]
    Parse {
        /// File path.
        path: String,
        /// Underlying error.
        source: toml::de::Error,
    },
}

/// One classification rule as written by the operator.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleDef {
    /// Whole-path glob pattern (`*` matches any run of characters).
    pub pattern: String,
    /// Target domain.
    pub domain: DomainId,
}

/// Operator rules file: ordered rules plus an optional default domain.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RulesFile {
    /// Domain for paths no rule matches. When absent, such execs fail.
    pub default_domain: Option<DomainId>,
    /// Ordered rules, first match wins.
    #[serde(default)]
    pub rule: Vec<RuleDef>,
}

#[derive(Debug)]
struct CompiledRule {
    pattern: String,
    matcher: Regex,
    domain: DomainId,
}

/// Compiled, validated rule set. Built once, replaced whole through the
/// admin path; never mutated in place.
#[derive(Debug)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
    default_domain: Option<DomainId>,
}

/// Anchor a glob pattern as a regex: escape everything, then let each
/// `*` match any run of characters.
fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    let body = escaped.join(".*");
    Regex::new(&format!("^{body}$"))
}

impl RuleSet {
    /// An empty set with no default: every classification fails.
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            default_domain: None,
        }
    }

    /// Compile a rules file, validating every target domain (and the
    /// default, if any) against the registry.
    pub fn compile(file: RulesFile, registry: &DomainRegistry) -> Result<Self, RulesError> {
        if let Some(default) = file.default_domain {
            if !registry.contains(default) {
                return Err(RulesError::UnknownDefault(default));
            }
        }
        let mut rules = Vec::with_capacity(file.rule.len());
        for def in file.rule {
            if !registry.contains(def.domain) {
                return Err(RulesError::UnknownDomain {
                    pattern: def.pattern,
                    domain: def.domain,
                });
            }
            let matcher = compile_pattern(&def.pattern).map_err(|source| RulesError::Pattern {
                pattern: def.pattern.clone(),
                source,
            })?;
            rules.push(CompiledRule {
                pattern: def.pattern,
                matcher,
                domain: def.domain,
            });
        }
        Ok(Self {
            rules,
            default_domain: file.default_domain,
        })
    }

    /// Load and compile a TOML rules file.
    pub fn load(path: impl AsRef<Path>, registry: &DomainRegistry) -> Result<Self, RulesError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| RulesError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: RulesFile = toml::from_str(&contents).map_err(|source| RulesError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Self::compile(file, registry)
    }

    /// Classify a resolved executable path. Deterministic and total
    /// over the configured default: the first matching rule wins, then
    /// the default domain, then `None`.
    pub fn classify(&self, path: &str) -> Option<DomainId> {
        for rule in &self.rules {
            if rule.matcher.is_match(path) {
                return Some(rule.domain);
            }
        }
        self.default_domain
    }

    /// The configured default domain, if any.
    pub fn default_domain(&self) -> Option<DomainId> {
        self.default_domain
    }

    /// Number of compiled rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the set has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The source pattern of each rule, in match order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.pattern.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DomainPolicy, ExceptionLevel, SyscallFilter};

    fn registry() -> DomainRegistry {
        let mut registry = DomainRegistry::new();
        for (id, name) in [(0, "untrusted"), (2, "trusted-daemons"), (5, "diagnostics")] {
            registry
                .register(
                    DomainId(id),
                    DomainPolicy {
                        name: name.to_owned(),
                        ceiling: ExceptionLevel::El0,
                        regions: vec![],
                        instructions: vec![],
                        syscalls: SyscallFilter::default(),
                    },
                )
                .expect("register");
        }
        registry
    }

    fn rules(toml_str: &str) -> RuleSet {
        let file: RulesFile = toml::from_str(toml_str).expect("parse");
        RuleSet::compile(file, &registry()).expect("compile")
    }

    const BASIC: &str = r#"
default_domain = 0

[[rule]]
pattern = "/usr/bin/trusted-*"
domain = 2

[[rule]]
pattern = "/usr/sbin/diag"
domain = 5
"#;

    #[test]
    fn test_first_match_wins_over_default() {
        let set = rules(BASIC);
        assert_eq!(set.classify("/usr/bin/trusted-daemon"), Some(DomainId(2)));
        assert_eq!(set.classify("/usr/sbin/diag"), Some(DomainId(5)));
    }

    #[test]
    fn test_unmatched_path_falls_back_to_default() {
        let set = rules(BASIC);
        assert_eq!(set.classify("/tmp/payload"), Some(DomainId(0)));
    }

    #[test]
    fn test_no_default_yields_none() {
        let set = rules(
            r#"
[[rule]]
pattern = "/usr/bin/trusted-*"
domain = 2
"#,
        );
        assert_eq!(set.classify("/tmp/payload"), None);
    }

    #[test]
    fn test_pattern_covers_whole_path_only() {
        let set = rules(BASIC);
        // A spoofed name containing the pattern as a substring must not match.
        assert_eq!(
            set.classify("/tmp/usr/bin/trusted-daemon"),
            Some(DomainId(0))
        );
        assert_eq!(set.classify("/usr/sbin/diagx"), Some(DomainId(0)));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let set = rules(
            r#"
default_domain = 0

[[rule]]
pattern = "/opt/app.d/runner"
domain = 2
"#,
        );
        assert_eq!(set.classify("/opt/app.d/runner"), Some(DomainId(2)));
        // '.' must not act as a wildcard.
        assert_eq!(set.classify("/opt/appxd/runner"), Some(DomainId(0)));
    }

    #[test]
    fn test_ordering_is_respected() {
        let set = rules(
            r#"
[[rule]]
pattern = "/usr/bin/*"
domain = 0

[[rule]]
pattern = "/usr/bin/trusted-*"
domain = 2
"#,
        );
        // The broader rule is listed first, so it shadows the narrower one.
        assert_eq!(set.classify("/usr/bin/trusted-daemon"), Some(DomainId(0)));
    }

    #[test]
    fn test_unknown_target_domain_rejected() {
        let file: RulesFile = toml::from_str(
            r#"
[[rule]]
pattern = "/usr/bin/x"
domain = 42
"#,
        )
        .expect("parse");
        let result = RuleSet::compile(file, &registry());
        assert!(matches!(
            result,
            Err(RulesError::UnknownDomain {
                domain: DomainId(42),
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_default_rejected() {
        let file: RulesFile = toml::from_str("default_domain = 42").expect("parse");
        let result = RuleSet::compile(file, &registry());
        assert!(matches!(result, Err(RulesError::UnknownDefault(DomainId(42)))));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let set = rules(BASIC);
        let first = set.classify("/usr/bin/trusted-shell");
        for _ in 0..16 {
            assert_eq!(set.classify("/usr/bin/trusted-shell"), first);
        }
    }
}
