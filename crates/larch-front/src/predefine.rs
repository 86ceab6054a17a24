//! Predefined macros.
//!
//! Installed into the macro table before the first file is tokenized: the
//! standard-mandated set (`__STDC__`, `__STDC_VERSION__`), the builtin
//! position macros, target width macros, and the command-line `-D`/`-U`
//! definitions, in that order, so the command line wins.

use larch_core::Position;
use serde::{Deserialize, Serialize};

use crate::pp::{BuiltinMacro, Macro};
use crate::tokenizer::tokenize_fragment;
use crate::Session;

/// `-std=` dialect selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Standard {
    C89,
    C94,
    C99,
    C11,
    C17,
    Gnu89,
    Gnu99,
    Gnu11,
    Gnu17,
}

impl Standard {
    /// Parses the `-std=` argument value.
    pub fn parse(name: &str) -> Option<Standard> {
        Some(match name {
            "c89" | "c90" | "iso9899:1990" => Standard::C89,
            "c94" | "iso9899:199409" => Standard::C94,
            "c99" | "c9x" | "iso9899:1999" => Standard::C99,
            "c11" | "c1x" | "iso9899:2011" => Standard::C11,
            "c17" | "c18" | "iso9899:2017" => Standard::C17,
            "gnu89" | "gnu90" => Standard::Gnu89,
            "gnu99" | "gnu9x" => Standard::Gnu99,
            "gnu11" | "gnu1x" => Standard::Gnu11,
            "gnu17" | "gnu18" => Standard::Gnu17,
            _ => return None,
        })
    }

    /// The `__STDC_VERSION__` value, when the dialect defines one.
    pub fn stdc_version(self) -> Option<&'static str> {
        match self {
            Standard::C89 | Standard::Gnu89 => None,
            Standard::C94 => Some("199409L"),
            Standard::C99 | Standard::Gnu99 => Some("199901L"),
            Standard::C11 | Standard::Gnu11 => Some("201112L"),
            Standard::C17 | Standard::Gnu17 => Some("201710L"),
        }
    }

    pub fn is_gnu(self) -> bool {
        matches!(
            self,
            Standard::Gnu89 | Standard::Gnu99 | Standard::Gnu11 | Standard::Gnu17
        )
    }
}

impl Default for Standard {
    fn default() -> Self {
        Standard::Gnu11
    }
}

/// Defines `name` to expand to `value` (tokenized).
pub fn define_macro(sess: &mut Session, name: &str, value: &str) {
    let ident = sess.interner.intern(name);
    let body = tokenize_fragment(sess, Position::none(), value);
    sess.macros.insert(
        ident,
        Macro {
            params: None,
            variadic: false,
            body,
            builtin: None,
            pos: Position::none(),
        },
    );
}

fn define_builtin(sess: &mut Session, name: &str, builtin: BuiltinMacro) {
    let ident = sess.interner.intern(name);
    sess.macros.insert(
        ident,
        Macro {
            params: None,
            variadic: false,
            body: Vec::new(),
            builtin: Some(builtin),
            pos: Position::none(),
        },
    );
}

/// Installs the predefined set plus the command-line definitions.
pub fn predefine_macros(sess: &mut Session) {
    define_builtin(sess, "__LINE__", BuiltinMacro::Line);
    define_builtin(sess, "__FILE__", BuiltinMacro::File);

    define_macro(sess, "__STDC__", "1");
    define_macro(sess, "__STDC_HOSTED__", "1");
    let standard = sess.options.standard;
    if let Some(version) = standard.stdc_version() {
        define_macro(sess, "__STDC_VERSION__", version);
    }
    define_macro(sess, "__CHECKER__", "1");

    let target = sess.target.clone();
    define_macro(sess, "__CHAR_BIT__", &target.bits_in_char.to_string());
    define_macro(
        sess,
        "__SIZEOF_SHORT__",
        &(target.bits_in_short / 8).to_string(),
    );
    define_macro(sess, "__SIZEOF_INT__", &(target.bits_in_int / 8).to_string());
    define_macro(
        sess,
        "__SIZEOF_LONG__",
        &(target.bits_in_long / 8).to_string(),
    );
    define_macro(
        sess,
        "__SIZEOF_LONG_LONG__",
        &(target.bits_in_longlong / 8).to_string(),
    );
    define_macro(
        sess,
        "__SIZEOF_POINTER__",
        &(target.bits_in_pointer / 8).to_string(),
    );
    if target.bits_in_pointer == 64 && target.bits_in_long == 64 {
        define_macro(sess, "__LP64__", "1");
        define_macro(sess, "_LP64", "1");
    }
    if !target.char_is_signed {
        define_macro(sess, "__CHAR_UNSIGNED__", "1");
    }

    let defines = sess.options.defines.clone();
    for (name, value) in defines {
        let value = value.as_deref().unwrap_or("1").to_string();
        define_macro(sess, &name, &value);
    }
    let undefines = sess.options.undefines.clone();
    for name in undefines {
        if let Some(ident) = sess.interner.lookup(&name) {
            sess.macros.shift_remove(&ident);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Options, Session};

    #[test]
    fn standard_parsing() {
        assert_eq!(Standard::parse("c99"), Some(Standard::C99));
        assert_eq!(Standard::parse("gnu11"), Some(Standard::Gnu11));
        assert_eq!(Standard::parse("c23"), None);
    }

    #[test]
    fn stdc_version_values() {
        assert_eq!(Standard::C89.stdc_version(), None);
        assert_eq!(Standard::C99.stdc_version(), Some("199901L"));
        assert_eq!(Standard::C17.stdc_version(), Some("201710L"));
    }

    #[test]
    fn session_carries_predefines() {
        let sess = Session::new(Options::default());
        let stdc = sess.interner.lookup("__STDC__").unwrap();
        assert!(sess.macros.contains_key(&stdc));
        let ptr = sess.interner.lookup("__SIZEOF_POINTER__").unwrap();
        assert!(sess.macros.contains_key(&ptr));
    }

    #[test]
    fn command_line_defines_and_undefines() {
        let mut options = Options::default();
        options.defines.push(("DEBUG".into(), None));
        options.defines.push(("N".into(), Some("4".into())));
        options.undefines.push("__CHECKER__".into());
        let sess = Session::new(options);
        let debug = sess.interner.lookup("DEBUG").unwrap();
        assert!(sess.macros.contains_key(&debug));
        let n = sess.interner.lookup("N").unwrap();
        assert!(sess.macros.contains_key(&n));
        let checker = sess.interner.lookup("__CHECKER__").unwrap();
        assert!(!sess.macros.contains_key(&checker));
    }
}
