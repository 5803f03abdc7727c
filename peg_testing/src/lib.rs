//! Test support for the derivative PEG engines: serializable recognizer
//! test cases, and a naive backtracking PEG interpreter used as the oracle
//! for derivative-soundness checks.

use std::cell::Cell;

use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};

use peggram::ast::{GrammarAST, Matcher};
use peggram::normalize::normalize;

/// One recognizer test: a grammar in surface syntax, an input, and the
/// expected outcome.
#[derive(Deserialize, Serialize, PartialEq, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct RecognizerTest {
    pub grammar: String,
    pub input: String,
    /// Start rule; the grammar's first rule when absent.
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub matched: Option<bool>,
}

impl RecognizerTest {
    pub fn to_ron_string(&self) -> Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, PrettyConfig::new())
    }

    pub fn from_ron_str<S: AsRef<str>>(s: S) -> Result<Self, ron::Error> {
        Ok(ron::from_str(s.as_ref())?)
    }

    /// The expected outcome; `matched` defaults to true when absent.
    pub fn should_match(&self) -> bool {
        self.matched.unwrap_or(true)
    }
}

#[derive(Serialize, Deserialize, PartialEq, Debug)]
#[serde(transparent)]
pub struct RecognizerTests(Vec<RecognizerTest>);

impl RecognizerTests {
    pub fn to_ron_string(&self) -> Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, PrettyConfig::new())
    }

    pub fn from_ron_str<S: AsRef<str>>(s: S) -> Result<Self, ron::Error> {
        Ok(ron::from_str(s.as_ref())?)
    }
}

impl std::ops::Deref for RecognizerTests {
    type Target = Vec<RecognizerTest>;

    fn deref(&self) -> &Vec<RecognizerTest> {
        &self.0
    }
}

impl IntoIterator for RecognizerTests {
    type Item = RecognizerTest;
    type IntoIter = std::vec::IntoIter<RecognizerTest>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

// A generous bound on recursive matcher invocations; blowing through it
// reports non-match, the same outcome the engines give diverging grammars.
const FUEL: usize = 1 << 20;

/// Decides `input` against `start` by direct recursive interpretation of
/// the (normalized) grammar, with standard PEG semantics: ordered choice
/// and repetition commit locally and are never re-tried. The whole input
/// must be consumed.
pub fn reference_match(ast: &GrammarAST, start: &str, input: &[u8]) -> bool {
    let ast = normalize(ast);
    let rule = match ast.rules.get(start) {
        Some(rule) => rule,
        None => return false,
    };
    if input.contains(&0) {
        return false;
    }
    let fuel = Cell::new(FUEL);
    match_at(&ast, &rule.matcher, input, 0, &fuel) == Some(input.len())
}

/// Matches `m` at byte offset `pos`, returning the offset after the match.
fn match_at(
    ast: &GrammarAST,
    m: &Matcher,
    input: &[u8],
    pos: usize,
    fuel: &Cell<usize>,
) -> Option<usize> {
    if fuel.get() == 0 {
        return None;
    }
    fuel.set(fuel.get() - 1);
    match m {
        Matcher::Empty | Matcher::Action(_) => Some(pos),
        Matcher::Any => {
            if pos < input.len() {
                Some(pos + 1)
            } else {
                None
            }
        }
        Matcher::Char(c) => {
            if input.get(pos) == Some(c) {
                Some(pos + 1)
            } else {
                None
            }
        }
        Matcher::Str(s) => {
            if input[pos..].starts_with(s) {
                Some(pos + s.len())
            } else {
                None
            }
        }
        Matcher::Range(ranges) => match input.get(pos) {
            Some(&c) if ranges.iter().any(|&(b, e)| b <= c && c <= e) => Some(pos + 1),
            _ => None,
        },
        Matcher::Rule(name) => {
            let rule = ast.rules.get(name)?;
            match_at(ast, &rule.matcher, input, pos, fuel)
        }
        Matcher::Seq(ms) => {
            let mut pos = pos;
            for m in ms {
                pos = match_at(ast, m, input, pos, fuel)?;
            }
            Some(pos)
        }
        Matcher::Alt(ms) => ms.iter().find_map(|m| match_at(ast, m, input, pos, fuel)),
        Matcher::Opt(m) => match_at(ast, m, input, pos, fuel).or(Some(pos)),
        Matcher::Many(m) => {
            let mut pos = pos;
            while let Some(next) = match_at(ast, m, input, pos, fuel) {
                if next == pos {
                    break;
                }
                pos = next;
            }
            Some(pos)
        }
        Matcher::Some(m) => {
            let pos = match_at(ast, m, input, pos, fuel)?;
            match_at(ast, &Matcher::Many(m.clone()), input, pos, fuel)
        }
        Matcher::Look(m) => match_at(ast, m, input, pos, fuel).map(|_| pos),
        Matcher::Not(m) => match match_at(ast, m, input, pos, fuel) {
            Some(_) => None,
            None => Some(pos),
        },
        Matcher::Capt(m) | Matcher::Named(m, _) => match_at(ast, m, input, pos, fuel),
        Matcher::Fail(_) => None,
    }
}

/// Convenience wrapper: parse `grammar`, then decide `input`.
pub fn reference_match_str(grammar: &str, start: Option<&str>, input: &str) -> bool {
    let ast: GrammarAST = grammar.parse().expect("test grammar parses");
    let start = start
        .map(str::to_string)
        .or_else(|| ast.start.as_ref().map(|(name, _)| name.clone()))
        .expect("test grammar has a start rule");
    reference_match(&ast, &start, input.as_bytes())
}

/// A corpus of small grammars over the bytes `a`, `b` and `!`, exercising
/// ordered choice, predicates, repetition and recursion. Engine test suites
/// run these exhaustively against [`reference_match`] on every short input.
///
/// Indirectly left-recursive grammars are deliberately absent: they are
/// ill-formed (a recursive-descent parser would diverge on them) and the
/// engines are free to reject them differently.
pub fn grammar_corpus() -> Vec<&'static str> {
    vec![
        "s <- 'a' ;",
        "s <- \"ab\" ;",
        "s <- \"aba\" ;",
        "s <- . ;",
        "s <- . . ;",
        "s <- '' ;",
        "s <- 'a' 'b' / 'a' 'a' ;",
        "s <- 'a' / \"ab\" ;",
        "s <- \"ab\" / 'a' ;",
        "s <- 'a'* ;",
        "s <- 'a'+ 'b' ;",
        "s <- [a-b]+ ;",
        "s <- [a-b]+ '!' ;",
        "s <- 'a'? 'b'? ;",
        "s <- 'a'? 'b' ;",
        "s <- 'a'* 'a' ;",
        "s <- !'a' . ;",
        "s <- !\"ab\" . ;",
        "s <- !\"ab\" . . ;",
        "s <- &'a' [a-b]+ ;",
        "s <- &\"ab\" [a-b]+ ;",
        "s <- ('a' / 'b')* ;",
        "s <- 'a' ('b' 'a')* ;",
        "s <- ('a' !'b')* ;",
        "s <- . !'a' . ;",
        "s <- \"ab\" !. ;",
        "s <- ('a' / 'b') !. ;",
        "s <- 'a' r / 'b' ; r <- s ;",
        "s <- s 'a' / 'b' ;",
        "s <- r ; r <- r 'a' / 'a' ;",
        "s <- !'a' ;",
        "s <- &'a' 'a' ;",
        "s <- 'a' s 'b' / '' ;",
        "s <- ('a' 'b'?)* ;",
    ]
}

/// All strings over `alphabet` of length at most `max_len`, shortest first.
pub fn enumerate_inputs(alphabet: &[u8], max_len: usize) -> Vec<Vec<u8>> {
    let mut out = vec![Vec::new()];
    let mut last = vec![Vec::new()];
    for _ in 0..max_len {
        let mut next = Vec::with_capacity(last.len() * alphabet.len());
        for s in &last {
            for &c in alphabet {
                let mut t = s.clone();
                t.push(c);
                next.push(t);
            }
        }
        out.extend(next.iter().cloned());
        last = next;
    }
    out
}

#[cfg(test)]
mod test {
    use super::{enumerate_inputs, reference_match_str, RecognizerTest, RecognizerTests};

    #[test]
    fn test_reference_basics() {
        assert!(reference_match_str("s <- \"ab\" ;", None, "ab"));
        assert!(!reference_match_str("s <- \"ab\" ;", None, "a"));
        assert!(!reference_match_str("s <- \"ab\" ;", None, "abc"));
        assert!(reference_match_str("s <- [a-z]+ '!' ;", None, "hi!"));
        assert!(!reference_match_str("s <- [a-z]+ '!' ;", None, "!"));
        assert!(reference_match_str("s <- !'a' . ;", None, "b"));
        assert!(!reference_match_str("s <- !'a' . ;", None, "a"));
        assert!(reference_match_str("s <- &\"ab\" [a-z]+ ;", None, "abc"));
        assert!(!reference_match_str("s <- &\"ab\" [a-z]+ ;", None, "bc"));
    }

    #[test]
    fn test_reference_commitment() {
        // Ordered choice and repetition are never re-tried.
        assert!(!reference_match_str("s <- 'a' / \"ab\" ;", None, "ab"));
        assert!(!reference_match_str("s <- 'a'* 'a' ;", None, "aa"));
    }

    #[test]
    fn test_reference_left_recursion() {
        assert!(reference_match_str("s <- s 'a' / 'a' ;", None, "aaa"));
        assert!(!reference_match_str("s <- s 'a' / 'a' ;", None, ""));
    }

    #[test]
    fn test_reference_start_rule() {
        assert!(reference_match_str("a <- 'x' ; b <- 'y' ;", Some("b"), "y"));
        assert!(!reference_match_str("a <- 'x' ; b <- 'y' ;", Some("c"), "y"));
    }

    #[test]
    fn test_enumerate_inputs() {
        let ins = enumerate_inputs(b"ab", 2);
        assert_eq!(ins.len(), 1 + 2 + 4);
        assert_eq!(ins[0], b"");
        assert!(ins.contains(&b"ba".to_vec()));
    }

    #[test]
    fn test_ron_roundtrip() {
        let t = RecognizerTest {
            grammar: "s <- 'a' ;".to_string(),
            input: "a".to_string(),
            start: None,
            matched: Some(true),
        };
        let s = t.to_ron_string().unwrap();
        assert_eq!(RecognizerTest::from_ron_str(&s).unwrap(), t);
        let ts = RecognizerTests(vec![t]);
        let s = ts.to_ron_string().unwrap();
        assert_eq!(RecognizerTests::from_ron_str(&s).unwrap(), ts);
    }
}
