//! The `larch` driver.
//!
//! Runs the full pipeline per input file — tokenize, preprocess, parse,
//! evaluate, linearize, optimize — and prints the resulting IR. Diagnostics
//! go to stderr. Exit codes: 0 = clean, 1 = errors reported, 127 = internal
//! inconsistency.
//!
//! The recognized gcc-style switches map onto short options with attached
//! values (`-DNAME=1`, `-Idir`, `-O2`, `-Wall`, `-m64`, `-fpic=2`);
//! `-std=c99` is accepted by normalizing it to `--std=c99` before parsing.

use std::path::PathBuf;
use std::process;

use clap::Parser;

use larch_core::WordSize;
use larch_front::predefine::Standard;
use larch_front::{Options, Session};

/// C semantic front end and SSA mid-end.
#[derive(Parser)]
#[command(name = "larch", about = "C front end and SSA mid-end")]
struct Cli {
    /// Input source files.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Predefine a macro: -D NAME[=VALUE].
    #[arg(short = 'D', value_name = "NAME[=VALUE]")]
    defines: Vec<String>,

    /// Undefine a macro.
    #[arg(short = 'U', value_name = "NAME")]
    undefines: Vec<String>,

    /// Append an include search directory.
    #[arg(short = 'I', value_name = "DIR")]
    include_dirs: Vec<PathBuf>,

    /// Data model: 32, 64, x32, or llp64.
    #[arg(short = 'm', value_name = "MODEL")]
    machine: Option<String>,

    /// Target switches: short-wchar, unsigned-char, msize-long, pic=N,
    /// pie=N.
    #[arg(short = 'f', value_name = "FLAG")]
    target_flags: Vec<String>,

    /// Language standard (also accepted as -std=...).
    #[arg(long = "std", value_name = "STD")]
    std: Option<String>,

    /// Warning toggles: -Wname, -Wno-name, -Werror.
    #[arg(short = 'W', value_name = "WARNING")]
    warnings: Vec<String>,

    /// Optimization level: 0, 1, 2, or s.
    #[arg(short = 'O', value_name = "LEVEL", default_value = "1")]
    opt_level: String,

    /// Stop after linearization; print unoptimized IR.
    #[arg(long)]
    linearize_only: bool,

    /// Lower out of SSA before printing.
    #[arg(long)]
    unssa: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // gcc spells it -std=c99; clap wants --std=c99.
    let args = std::env::args().map(|a| {
        if let Some(rest) = a.strip_prefix("-std=") {
            format!("--std={rest}")
        } else {
            a
        }
    });
    let cli = Cli::parse_from(args);
    process::exit(run(cli));
}

fn run(cli: Cli) -> i32 {
    let options = match build_options(&cli) {
        Ok(o) => o,
        Err(msg) => {
            eprintln!("larch: {msg}");
            return 1;
        }
    };

    let mut exit = 0;
    for file in &cli.files {
        let mut sess = Session::new(options.clone());
        let code = compile_file(&mut sess, file, &cli);
        eprint!("{}", sess.diags.render_all());
        if sess.diags.has_errors() && exit == 0 {
            exit = 1;
        }
        if code != 0 {
            exit = code;
        }
    }
    exit
}

fn compile_file(sess: &mut Session, file: &PathBuf, cli: &Cli) -> i32 {
    let tokens = match larch_front::tokenize_file(sess, file) {
        Ok(t) => t,
        Err(_) => return 1,
    };
    let tokens = larch_front::preprocess(sess, tokens);
    let symbols = larch_front::parse_translation_unit(sess, tokens);
    larch_front::evaluate_symbol_list(sess, &symbols);
    if sess.diags.has_errors() {
        return 1;
    }

    for &sym in &symbols {
        let Some(mut ep) = larch_ir::linearize_symbol(sess, sym) else {
            continue;
        };
        if !cli.linearize_only {
            larch_ir::optimize(sess, &mut ep);
        }
        let problems = ep.check_invariants();
        if !problems.is_empty() {
            for p in &problems {
                eprintln!("larch: internal: {p}");
            }
            return 127;
        }
        if cli.unssa {
            larch_ir::lower_out_of_ssa(&mut ep);
        }
        print!("{}", larch_ir::show_entry(sess, &ep));
        println!();
    }
    0
}

fn build_options(cli: &Cli) -> Result<Options, String> {
    let mut options = Options::default();

    for d in &cli.defines {
        match d.split_once('=') {
            Some((name, value)) => options
                .defines
                .push((name.to_string(), Some(value.to_string()))),
            None => options.defines.push((d.clone(), None)),
        }
    }
    options.undefines = cli.undefines.clone();
    options.include_dirs = cli.include_dirs.clone();

    if let Some(machine) = &cli.machine {
        options.word_size = match machine.as_str() {
            "32" => WordSize::M32,
            "64" => WordSize::M64,
            "x32" => WordSize::X32,
            "llp64" => WordSize::Llp64,
            other => return Err(format!("unknown machine model -m{other}")),
        };
    }
    options.target_flags = cli.target_flags.clone();

    if let Some(std_name) = &cli.std {
        options.standard = Standard::parse(std_name)
            .ok_or_else(|| format!("unknown standard '{std_name}'"))?;
    }

    for w in &cli.warnings {
        if w == "error" {
            options.werror = true;
        } else if let Some(name) = w.strip_prefix("no-") {
            options.warnings.push((name.to_string(), false));
        } else {
            options.warnings.push((w.clone(), true));
        }
    }

    options.opt_level = match cli.opt_level.as_str() {
        "0" => 0,
        "1" => 1,
        "2" => 2,
        "s" => 255,
        other => return Err(format!("unknown optimization level -O{other}")),
    };
    Ok(options)
}
