use std::{error::Error, fmt, str::FromStr};

use lazy_static::lazy_static;
use regex::Regex;

use crate::{
    ast::{GrammarAST, Matcher},
    Span,
};

/// The various different possible PEG parser errors.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum PegGrammarErrorKind {
    IllegalName,
    MissingLeftArrow,
    MissingSemicolon,
    DuplicateRule,
    IllegalString,
    IllegalEscape,
    IncompleteClass,
    IncompleteAction,
    IllegalMatcher,
    PrematureEnd,
}

/// Any error from the PEG parser returns an instance of this struct.
///
/// The first span is the site of the error; `DuplicateRule` additionally
/// carries the span of the original definition first.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PegGrammarError {
    pub kind: PegGrammarErrorKind,
    pub spans: Vec<Span>,
}

impl Error for PegGrammarError {}

impl fmt::Display for PegGrammarError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self.kind {
            PegGrammarErrorKind::IllegalName => "Illegal name",
            PegGrammarErrorKind::MissingLeftArrow => "Missing '<-'",
            PegGrammarErrorKind::MissingSemicolon => "Missing ';'",
            PegGrammarErrorKind::DuplicateRule => "Duplicated rule",
            PegGrammarErrorKind::IllegalString => "Illegal string",
            PegGrammarErrorKind::IllegalEscape => "Illegal escape sequence",
            PegGrammarErrorKind::IncompleteClass => "Incomplete character class",
            PegGrammarErrorKind::IncompleteAction => "Incomplete action",
            PegGrammarErrorKind::IllegalMatcher => "Illegal matcher",
            PegGrammarErrorKind::PrematureEnd => "File ends prematurely",
        };
        write!(f, "{}", s)
    }
}

lazy_static! {
    static ref RE_NAME: Regex = Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*").unwrap();
}

pub(crate) struct PegParser {
    src: String,
    ast: GrammarAST,
}

/// The actual parser is intended to be entirely opaque from outside users.
impl PegParser {
    pub(crate) fn new(src: String) -> PegParser {
        PegParser {
            src,
            ast: GrammarAST::new(),
        }
    }

    pub(crate) fn parse(&mut self) -> Result<(), PegGrammarError> {
        // We pass around an index into the *bytes* of self.src, which at all
        // times points at the beginning of a UTF-8 character (all of the
        // syntactically significant characters of the grammar syntax are
        // ASCII; multibyte characters can only occur inside literals,
        // classes, actions and comments, which are consumed whole).
        let mut i = self.parse_ws(0);
        while i < self.src.len() {
            i = self.parse_rule(i)?;
            i = self.parse_ws(i);
        }
        if self.ast.rules.is_empty() {
            return Err(self.mk_error(PegGrammarErrorKind::PrematureEnd, self.src.len()));
        }
        Ok(())
    }

    pub(crate) fn ast(self) -> GrammarAST {
        self.ast
    }

    fn parse_rule(&mut self, i: usize) -> Result<usize, PegGrammarError> {
        let (j, name) = self.parse_name(i)?;
        let name_span = Span::new(i, j);
        if let Some(old) = self.ast.rules.get(&name) {
            return Err(PegGrammarError {
                kind: PegGrammarErrorKind::DuplicateRule,
                spans: vec![old.name_span, name_span],
            });
        }
        let j = self.parse_ws(j);
        let j = match self.lookahead_is("<-", j) {
            Some(j) => self.parse_ws(j),
            None => return Err(self.mk_error(PegGrammarErrorKind::MissingLeftArrow, j)),
        };
        let (j, m) = self.parse_alt(j)?;
        match self.lookahead_is(";", j) {
            Some(j) => {
                self.ast.add_rule(name, name_span, m);
                Ok(j)
            }
            None => Err(self.mk_error(PegGrammarErrorKind::MissingSemicolon, j)),
        }
    }

    fn parse_alt(&mut self, mut i: usize) -> Result<(usize, Matcher), PegGrammarError> {
        let mut alts = Vec::new();
        loop {
            let (j, m) = self.parse_seq(i)?;
            alts.push(m);
            match self.lookahead_is("/", j) {
                Some(j) => i = self.parse_ws(j),
                None => {
                    i = j;
                    break;
                }
            }
        }
        if alts.len() == 1 {
            Ok((i, alts.pop().unwrap()))
        } else {
            Ok((i, Matcher::Alt(alts)))
        }
    }

    fn parse_seq(&mut self, mut i: usize) -> Result<(usize, Matcher), PegGrammarError> {
        let mut ms = Vec::new();
        while i < self.src.len() && self.at_matcher_start(i) {
            let (j, m) = self.parse_prefixed(i)?;
            ms.push(m);
            i = j;
        }
        match ms.len() {
            0 => Ok((i, Matcher::Empty)),
            1 => Ok((i, ms.pop().unwrap())),
            _ => Ok((i, Matcher::Seq(ms))),
        }
    }

    fn at_matcher_start(&self, i: usize) -> bool {
        match self.src.as_bytes()[i] {
            b'!' | b'&' | b'(' | b'.' | b'\'' | b'"' | b'[' | b'{' => true,
            c => c == b'_' || c.is_ascii_alphabetic(),
        }
    }

    fn parse_prefixed(&mut self, i: usize) -> Result<(usize, Matcher), PegGrammarError> {
        if let Some(j) = self.lookahead_is("!", i) {
            let (j, m) = self.parse_prefixed(self.parse_ws(j))?;
            return Ok((j, Matcher::Not(Box::new(m))));
        }
        if let Some(j) = self.lookahead_is("&", i) {
            let (j, m) = self.parse_prefixed(self.parse_ws(j))?;
            return Ok((j, Matcher::Look(Box::new(m))));
        }
        self.parse_suffixed(i)
    }

    fn parse_suffixed(&mut self, i: usize) -> Result<(usize, Matcher), PegGrammarError> {
        let (mut i, mut m) = self.parse_primary(i)?;
        loop {
            if let Some(j) = self.lookahead_is("?", i) {
                m = Matcher::Opt(Box::new(m));
                i = self.parse_ws(j);
            } else if let Some(j) = self.lookahead_is("*", i) {
                m = Matcher::Many(Box::new(m));
                i = self.parse_ws(j);
            } else if let Some(j) = self.lookahead_is("+", i) {
                m = Matcher::Some(Box::new(m));
                i = self.parse_ws(j);
            } else {
                return Ok((i, m));
            }
        }
    }

    fn parse_primary(&mut self, i: usize) -> Result<(usize, Matcher), PegGrammarError> {
        if i >= self.src.len() {
            return Err(self.mk_error(PegGrammarErrorKind::PrematureEnd, i));
        }
        if let Some(j) = self.lookahead_is("(", i) {
            let (j, m) = self.parse_alt(self.parse_ws(j))?;
            return match self.lookahead_is(")", j) {
                Some(j) => Ok((self.parse_ws(j), m)),
                None => Err(self.mk_error(PegGrammarErrorKind::IllegalMatcher, j)),
            };
        }
        if let Some(j) = self.lookahead_is(".", i) {
            return Ok((self.parse_ws(j), Matcher::Any));
        }
        match self.src.as_bytes()[i] {
            q @ (b'\'' | b'"') => {
                let (j, bytes) = self.parse_literal(i, q)?;
                let m = match bytes.len() {
                    0 => Matcher::Empty,
                    1 => Matcher::Char(bytes[0]),
                    _ => Matcher::Str(bytes),
                };
                Ok((self.parse_ws(j), m))
            }
            b'[' => {
                let (j, ranges) = self.parse_class(i)?;
                Ok((self.parse_ws(j), Matcher::Range(ranges)))
            }
            b'{' => {
                let (j, code) = self.parse_action(i)?;
                Ok((self.parse_ws(j), Matcher::Action(code)))
            }
            _ => {
                let (j, name) = self
                    .parse_name(i)
                    .map_err(|_| self.mk_error(PegGrammarErrorKind::IllegalMatcher, i))?;
                Ok((self.parse_ws(j), Matcher::Rule(name)))
            }
        }
    }

    /// Parses the escape sequence starting directly after a backslash,
    /// returning the byte it denotes.
    fn parse_escape(&self, i: usize) -> Result<(usize, u8), PegGrammarError> {
        let b = match self.src.as_bytes().get(i) {
            Some(b) => *b,
            None => return Err(self.mk_error(PegGrammarErrorKind::PrematureEnd, i)),
        };
        let c = match b {
            b'n' => b'\n',
            b'r' => b'\r',
            b't' => b'\t',
            b'\\' | b'\'' | b'"' | b']' | b'[' | b'-' => b,
            b'x' => {
                match self
                    .src
                    .get(i + 1..i + 3)
                    .and_then(|s| u8::from_str_radix(s, 16).ok())
                {
                    Some(c) => return Ok((i + 3, c)),
                    None => return Err(self.mk_error(PegGrammarErrorKind::IllegalEscape, i)),
                }
            }
            _ => return Err(self.mk_error(PegGrammarErrorKind::IllegalEscape, i)),
        };
        Ok((i + 1, c))
    }

    fn parse_literal(&self, i: usize, quote: u8) -> Result<(usize, Vec<u8>), PegGrammarError> {
        let mut j = i + 1;
        let mut bytes = Vec::new();
        while j < self.src.len() {
            match self.src.as_bytes()[j] {
                b if b == quote => return Ok((j + 1, bytes)),
                b'\\' => {
                    let (k, c) = self.parse_escape(j + 1)?;
                    bytes.push(c);
                    j = k;
                }
                b'\n' => break,
                b => {
                    bytes.push(b);
                    j += 1;
                }
            }
        }
        Err(self.mk_error(PegGrammarErrorKind::IllegalString, i))
    }

    fn parse_class(&self, i: usize) -> Result<(usize, Vec<(u8, u8)>), PegGrammarError> {
        let mut j = i + 1;
        let mut ranges = Vec::new();
        let class_byte = |j: usize| -> Result<(usize, u8), PegGrammarError> {
            match self.src.as_bytes()[j] {
                b'\\' => self.parse_escape(j + 1),
                b => Ok((j + 1, b)),
            }
        };
        while j < self.src.len() {
            if self.src.as_bytes()[j] == b']' {
                return Ok((j + 1, ranges));
            }
            let (k, b) = class_byte(j)?;
            if k < self.src.len() && self.src.as_bytes()[k] == b'-' && {
                let k1 = k + 1;
                k1 < self.src.len() && self.src.as_bytes()[k1] != b']'
            } {
                let (k2, e) = class_byte(k + 1)?;
                ranges.push((b, e));
                j = k2;
            } else {
                ranges.push((b, b));
                j = k;
            }
        }
        Err(self.mk_error(PegGrammarErrorKind::IncompleteClass, i))
    }

    fn parse_action(&self, i: usize) -> Result<(usize, String), PegGrammarError> {
        debug_assert_eq!(self.src.as_bytes()[i], b'{');
        let mut depth = 0usize;
        let mut j = i;
        while j < self.src.len() {
            match self.src.as_bytes()[j] {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok((j + 1, self.src[i + 1..j].to_string()));
                    }
                }
                _ => (),
            }
            j += 1;
        }
        Err(self.mk_error(PegGrammarErrorKind::IncompleteAction, i))
    }

    fn parse_name(&self, i: usize) -> Result<(usize, String), PegGrammarError> {
        if let Some(m) = RE_NAME.find(&self.src[i..]) {
            debug_assert_eq!(m.start(), 0);
            Ok((i + m.end(), self.src[i..i + m.end()].to_string()))
        } else {
            Err(self.mk_error(PegGrammarErrorKind::IllegalName, i))
        }
    }

    /// Skips whitespace and `#` line comments.
    fn parse_ws(&self, mut i: usize) -> usize {
        while i < self.src.len() {
            match self.src.as_bytes()[i] {
                b' ' | b'\t' | b'\r' | b'\n' => i += 1,
                b'#' => {
                    while i < self.src.len() && self.src.as_bytes()[i] != b'\n' {
                        i += 1;
                    }
                }
                _ => break,
            }
        }
        i
    }

    fn lookahead_is(&self, s: &str, i: usize) -> Option<usize> {
        if self.src[i..].starts_with(s) {
            Some(i + s.len())
        } else {
            None
        }
    }

    fn mk_error(&self, kind: PegGrammarErrorKind, off: usize) -> PegGrammarError {
        PegGrammarError {
            kind,
            spans: vec![Span::new(off, off)],
        }
    }
}

impl FromStr for GrammarAST {
    type Err = PegGrammarError;

    fn from_str(src: &str) -> Result<GrammarAST, PegGrammarError> {
        let mut pp = PegParser::new(src.to_string());
        pp.parse()?;
        Ok(pp.ast())
    }
}
