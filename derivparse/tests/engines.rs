//! Cross-engine checks: the generation-map engine and the DAG engine must
//! produce identical verdicts, and both must pass the canonical end-to-end
//! scenarios.

use peg_testing::{enumerate_inputs, grammar_corpus, RecognizerTests};
use pegdag::DagGrammar;
use pegderiv::DerivGrammar;

#[test]
fn engines_agree() {
    for src in grammar_corpus() {
        let ast = src.parse().unwrap();
        let gen = DerivGrammar::new(&ast).unwrap();
        let dag = DagGrammar::new(&ast).unwrap();
        for input in enumerate_inputs(b"ab!", 4) {
            let g = pegderiv::recognize(&gen, "s", &input);
            let d = pegdag::recognize(&dag, "s", &input);
            assert_eq!(
                g,
                d,
                "engines disagree on grammar {:?}, input {:?}",
                src,
                String::from_utf8_lossy(&input)
            );
        }
    }
}

static SCENARIOS: &str = r#"[
    (grammar: "s <- \"ab\" ;", input: "ab", matched: Some(true)),
    (grammar: "s <- \"ab\" ;", input: "a", matched: Some(false)),
    (grammar: "s <- \"ab\" ;", input: "abc", matched: Some(false)),
    (grammar: "s <- [a-z]+ '!' ;", input: "hi!", matched: Some(true)),
    (grammar: "s <- [a-z]+ '!' ;", input: "!", matched: Some(false)),
    (grammar: "s <- 'a' 'b' / 'a' 'c' ;", input: "ac", matched: Some(true)),
    (grammar: "s <- 'a' 'b' / 'a' 'c' ;", input: "ad", matched: Some(false)),
    (grammar: "s <- !'a' . ;", input: "b", matched: Some(true)),
    (grammar: "s <- !'a' . ;", input: "a", matched: Some(false)),
    (grammar: "s <- r ; r <- r 'a' / 'a' ;", input: "aaa", matched: Some(true)),
    (grammar: "s <- r ; r <- r 'a' / 'a' ;", input: "", matched: Some(false)),
    (grammar: "s <- &\"ab\" [a-z]+ ;", input: "abc", matched: Some(true)),
    (grammar: "s <- &\"ab\" [a-z]+ ;", input: "bc", matched: Some(false)),
]"#;

#[test]
fn canonical_scenarios() {
    let tests = RecognizerTests::from_ron_str(SCENARIOS).unwrap();
    for t in tests {
        let ast = t.grammar.parse().unwrap();
        let start = t.start.clone().unwrap_or_else(|| "s".to_string());
        let gen = DerivGrammar::new(&ast).unwrap();
        let dag = DagGrammar::new(&ast).unwrap();
        assert_eq!(
            pegderiv::recognize(&gen, &start, t.input.as_bytes()),
            t.should_match(),
            "gen engine: grammar {:?}, input {:?}",
            t.grammar,
            t.input
        );
        assert_eq!(
            pegdag::recognize(&dag, &start, t.input.as_bytes()),
            t.should_match(),
            "dag engine: grammar {:?}, input {:?}",
            t.grammar,
            t.input
        );
    }
}
