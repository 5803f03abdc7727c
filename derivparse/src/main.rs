use std::{env, fs, io, io::Read, path::Path, process, str::FromStr};

use getopts::Options;

use peggram::ast::GrammarAST;
use pegdag::DagGrammar;
use pegderiv::DerivGrammar;

fn usage(prog: &str, msg: &str) -> ! {
    let path = Path::new(prog);
    let leaf = match path.file_name() {
        Some(m) => m.to_str().unwrap(),
        None => "derivparse",
    };
    if !msg.is_empty() {
        eprintln!("{}", msg);
    }
    eprintln!(
        "Usage: {} [-e gen|dag] [-s start-rule] [-q] <grammar.peg|-> <input file|->",
        leaf
    );
    process::exit(1);
}

/// Reads `path` to a string, with `-` meaning stdin. Exits on I/O errors.
fn read_source(path: &str) -> String {
    let res = if path == "-" {
        let mut s = String::new();
        io::stdin().read_to_string(&mut s).map(|_| s)
    } else {
        fs::read_to_string(path)
    };
    match res {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Can't read {}: {}", path, e);
            process::exit(1);
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Engine {
    Gen,
    Dag,
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let prog = &args[0];
    let matches = match Options::new()
        .optflag("h", "help", "")
        .optflag("q", "quiet", "Only set the exit status")
        .optopt(
            "e",
            "engine",
            "Derivative engine to be used (default: gen)",
            "gen|dag",
        )
        .optopt(
            "s",
            "start",
            "Start rule (default: the grammar's first rule)",
            "RULE",
        )
        .parse(&args[1..])
    {
        Ok(m) => m,
        Err(f) => usage(prog, f.to_string().as_str()),
    };

    if matches.opt_present("h") {
        usage(prog, "");
    }

    let quiet = matches.opt_present("q");

    let engine = match matches.opt_str("e") {
        None => Engine::Gen,
        Some(s) => match &*s.to_lowercase() {
            "gen" => Engine::Gen,
            "dag" => Engine::Dag,
            _ => usage(prog, &format!("Unknown engine '{}'.", s)),
        },
    };

    if matches.free.len() != 2 {
        usage(prog, "Too few arguments given.");
    }

    let grm_path = &matches.free[0];
    let grm_src = read_source(grm_path);
    let ast = match GrammarAST::from_str(&grm_src) {
        Ok(ast) => ast,
        Err(e) => {
            let (line, col) = e.spans[0].line_col(&grm_src);
            eprintln!("{}: {} at line {} column {}", grm_path, e, line, col);
            process::exit(1);
        }
    };

    let start = match matches.opt_str("s") {
        Some(s) => s,
        None => match &ast.start {
            Some((name, _)) => name.clone(),
            None => usage(prog, "Grammar does not define any rules."),
        },
    };

    let input = read_source(&matches.free[1]);

    let matched = match engine {
        Engine::Gen => match DerivGrammar::new(&ast) {
            Ok(grm) => pegderiv::recognize(&grm, &start, input.as_bytes()),
            Err(e) => {
                eprintln!("{}: {}", grm_path, e);
                process::exit(1);
            }
        },
        Engine::Dag => match DagGrammar::new(&ast) {
            Ok(grm) => pegdag::recognize(&grm, &start, input.as_bytes()),
            Err(e) => {
                eprintln!("{}: {}", grm_path, e);
                process::exit(1);
            }
        },
    };

    if !quiet {
        println!("{}", if matched { "match" } else { "no match" });
    }
    if !matched {
        process::exit(1);
    }
}
