use std::{error::Error, fmt};

use indexmap::IndexMap;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::Span;

/// The body of a rule: a tree of matchers.
///
/// `Capt`, `Named`, `Fail` and `Action` are carried through parsing and
/// printing but lowered to plain matching by both engine loaders (captures
/// and semantic actions are recognized-but-unrealized; see the crate docs).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Matcher {
    /// Matches the empty string.
    Empty,
    /// Matches any single byte.
    Any,
    /// Matches one specific byte.
    Char(u8),
    /// Matches a literal byte string of length >= 2.
    Str(Vec<u8>),
    /// Matches one byte falling in any of the (inclusive) ranges.
    Range(Vec<(u8, u8)>),
    /// Matches the named rule.
    Rule(String),
    /// Matches each matcher in turn.
    Seq(Vec<Matcher>),
    /// Ordered choice: matches the first matcher that succeeds.
    Alt(Vec<Matcher>),
    /// Greedily matches the inner matcher zero or one times.
    Opt(Box<Matcher>),
    /// Greedily matches the inner matcher zero or more times.
    Many(Box<Matcher>),
    /// Greedily matches the inner matcher one or more times.
    Some(Box<Matcher>),
    /// Positive lookahead: succeeds iff the inner matcher does, consuming
    /// nothing.
    Look(Box<Matcher>),
    /// Negative lookahead: succeeds iff the inner matcher fails, consuming
    /// nothing.
    Not(Box<Matcher>),
    /// Captures the inner match.
    Capt(Box<Matcher>),
    /// Attaches an error message to the inner matcher.
    Named(Box<Matcher>, String),
    /// Always fails, with a message.
    Fail(String),
    /// A host-language action.
    Action(String),
}

/// A single named rule.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Rule {
    pub name: String,
    pub name_span: Span,
    pub matcher: Matcher,
}

/// An AST representing a PEG. This is built up gradually by the parser: when
/// it is finished, `complete_and_validate` must be called exactly once in
/// order to finish the set-up. At that point, any further mutations made to
/// the struct lead to undefined behaviour.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GrammarAST {
    pub rules: IndexMap<String, Rule>,
    pub start: Option<(String, Span)>,
}

/// The various different possible grammar validation errors.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum GrammarValidationErrorKind {
    NoRules,
    InvalidStartRule(String),
    UnknownRuleRef(String),
}

/// Any error from grammar validation returns an instance of this struct.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct GrammarValidationError {
    pub kind: GrammarValidationErrorKind,
    pub spans: Vec<Span>,
}

impl Error for GrammarValidationError {}

impl fmt::Display for GrammarValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            GrammarValidationErrorKind::NoRules => write!(f, "Grammar does not define any rules"),
            GrammarValidationErrorKind::InvalidStartRule(ref name) => {
                write!(f, "Start rule '{}' does not appear in grammar", name)
            }
            GrammarValidationErrorKind::UnknownRuleRef(ref name) => {
                write!(f, "Unknown reference to rule '{}'", name)
            }
        }
    }
}

impl GrammarAST {
    pub fn new() -> Self {
        GrammarAST {
            rules: IndexMap::new(),
            start: None,
        }
    }

    pub fn add_rule(&mut self, name: String, name_span: Span, matcher: Matcher) {
        if self.start.is_none() {
            self.start = Some((name.clone(), name_span));
        }
        self.rules.insert(
            name.clone(),
            Rule {
                name,
                name_span,
                matcher,
            },
        );
    }

    pub fn get_rule(&self, name: &str) -> Option<&Rule> {
        self.rules.get(name)
    }

    /// Perform basic validation on the AST:
    ///
    ///   1) The grammar has at least one rule.
    ///   2) The start rule, if explicitly set, references a defined rule.
    ///   3) Every rule reference is to a defined rule.
    pub fn complete_and_validate(&self) -> Result<(), GrammarValidationError> {
        if self.rules.is_empty() {
            return Err(GrammarValidationError {
                kind: GrammarValidationErrorKind::NoRules,
                spans: vec![Span::new(0, 0)],
            });
        }
        if let Some((ref name, span)) = self.start {
            if self.rules.get(name).is_none() {
                return Err(GrammarValidationError {
                    kind: GrammarValidationErrorKind::InvalidStartRule(name.clone()),
                    spans: vec![span],
                });
            }
        }
        for rule in self.rules.values() {
            self.validate_matcher(&rule.matcher, rule.name_span)?;
        }
        Ok(())
    }

    fn validate_matcher(&self, m: &Matcher, span: Span) -> Result<(), GrammarValidationError> {
        match m {
            Matcher::Rule(name) => {
                if self.rules.get(name).is_none() {
                    return Err(GrammarValidationError {
                        kind: GrammarValidationErrorKind::UnknownRuleRef(name.clone()),
                        spans: vec![span],
                    });
                }
            }
            Matcher::Seq(ms) | Matcher::Alt(ms) => {
                for sub in ms {
                    self.validate_matcher(sub, span)?;
                }
            }
            Matcher::Opt(sub)
            | Matcher::Many(sub)
            | Matcher::Some(sub)
            | Matcher::Look(sub)
            | Matcher::Not(sub)
            | Matcher::Capt(sub)
            | Matcher::Named(sub, _) => self.validate_matcher(sub, span)?,
            Matcher::Empty
            | Matcher::Any
            | Matcher::Char(_)
            | Matcher::Str(_)
            | Matcher::Range(_)
            | Matcher::Fail(_)
            | Matcher::Action(_) => (),
        }
        Ok(())
    }
}

fn escape_byte(b: u8, quote: u8, out: &mut String) {
    match b {
        b'\n' => out.push_str("\\n"),
        b'\r' => out.push_str("\\r"),
        b'\t' => out.push_str("\\t"),
        b'\\' => out.push_str("\\\\"),
        _ if b == quote => {
            out.push('\\');
            out.push(quote as char);
        }
        0x20..=0x7e => out.push(b as char),
        _ => out.push_str(&format!("\\x{:02x}", b)),
    }
}

// Binding strengths, loosest first, used to decide where the printer needs
// parentheses.
fn precedence(m: &Matcher) -> u8 {
    match m {
        Matcher::Alt(_) => 0,
        Matcher::Seq(_) => 1,
        Matcher::Look(_) | Matcher::Not(_) => 2,
        Matcher::Opt(_) | Matcher::Many(_) | Matcher::Some(_) => 3,
        _ => 4,
    }
}

fn fmt_child(m: &Matcher, min_prec: u8, f: &mut fmt::Formatter) -> fmt::Result {
    if precedence(m) < min_prec {
        write!(f, "({})", m)
    } else {
        write!(f, "{}", m)
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Matcher::Empty => write!(f, "()"),
            Matcher::Any => write!(f, "."),
            Matcher::Char(c) => {
                let mut s = String::new();
                escape_byte(*c, b'\'', &mut s);
                write!(f, "'{}'", s)
            }
            Matcher::Str(bs) => {
                let mut s = String::new();
                for &b in bs {
                    escape_byte(b, b'"', &mut s);
                }
                write!(f, "\"{}\"", s)
            }
            Matcher::Range(ranges) => {
                let mut s = String::new();
                for &(b, e) in ranges {
                    escape_byte(b, b']', &mut s);
                    if b != e {
                        s.push('-');
                        escape_byte(e, b']', &mut s);
                    }
                }
                write!(f, "[{}]", s)
            }
            Matcher::Rule(name) => write!(f, "{}", name),
            Matcher::Seq(ms) => {
                for (i, m) in ms.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    fmt_child(m, 2, f)?;
                }
                Ok(())
            }
            Matcher::Alt(ms) => {
                for (i, m) in ms.iter().enumerate() {
                    if i > 0 {
                        write!(f, " / ")?;
                    }
                    fmt_child(m, 1, f)?;
                }
                Ok(())
            }
            Matcher::Opt(m) => {
                fmt_child(m, 4, f)?;
                write!(f, "?")
            }
            Matcher::Many(m) => {
                fmt_child(m, 4, f)?;
                write!(f, "*")
            }
            Matcher::Some(m) => {
                fmt_child(m, 4, f)?;
                write!(f, "+")
            }
            Matcher::Look(m) => {
                write!(f, "&")?;
                fmt_child(m, 3, f)
            }
            Matcher::Not(m) => {
                write!(f, "!")?;
                fmt_child(m, 3, f)
            }
            Matcher::Capt(m) => {
                write!(f, "<")?;
                fmt_child(m, 1, f)?;
                write!(f, ">")
            }
            Matcher::Named(m, msg) => {
                fmt_child(m, 2, f)?;
                write!(f, " @\"{}\"", msg)
            }
            Matcher::Fail(msg) => write!(f, "@fail\"{}\"", msg),
            Matcher::Action(code) => write!(f, "{{{}}}", code),
        }
    }
}

impl fmt::Display for GrammarAST {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for rule in self.rules.values() {
            writeln!(f, "{} <- {} ;", rule.name, rule.matcher)?;
        }
        Ok(())
    }
}
