//! Target machine model.
//!
//! Type widths and alignments for the supported data models. Everything the
//! layout engine and the constant folder need to know about the target is a
//! plain number here; the `-m` and `-f` driver switches mutate an instance
//! of [`Target`] before any file is tokenized.

use serde::{Deserialize, Serialize};

/// Pointer/long data model selected with `-m32`/`-m64`/`-mx32`/`-mllp64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WordSize {
    /// ILP32: 32-bit int, long, pointer.
    M32,
    /// LP64: 64-bit long and pointer.
    M64,
    /// x32: 64-bit ABI with 32-bit long and pointer.
    X32,
    /// LLP64: 64-bit pointer, 32-bit long.
    Llp64,
}

/// Bit widths and alignments of the basic types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub word_size: WordSize,

    pub bits_in_bool: u32,
    pub bits_in_char: u32,
    pub bits_in_short: u32,
    pub bits_in_int: u32,
    pub bits_in_long: u32,
    pub bits_in_longlong: u32,
    pub bits_in_float: u32,
    pub bits_in_double: u32,
    pub bits_in_longdouble: u32,
    pub bits_in_pointer: u32,
    pub bits_in_wchar: u32,
    pub bits_in_enum: u32,

    /// Alignments in bytes.
    pub max_alignment: u32,
    pub char_alignment: u32,
    pub short_alignment: u32,
    pub int_alignment: u32,
    pub long_alignment: u32,
    pub longlong_alignment: u32,
    pub float_alignment: u32,
    pub double_alignment: u32,
    pub pointer_alignment: u32,

    pub char_is_signed: bool,
    /// `-fmsize-long`: `size_t` is `unsigned long` instead of target default.
    pub size_t_is_long: bool,
    pub pic_level: u32,
    pub pie_level: u32,
}

impl Target {
    pub fn new(word_size: WordSize) -> Self {
        let (long_bits, ptr_bits) = match word_size {
            WordSize::M32 | WordSize::X32 => (32, 32),
            WordSize::M64 => (64, 64),
            WordSize::Llp64 => (32, 64),
        };
        let long_align = (long_bits / 8).min(8);
        let ptr_align = ptr_bits / 8;
        Target {
            word_size,
            bits_in_bool: 8,
            bits_in_char: 8,
            bits_in_short: 16,
            bits_in_int: 32,
            bits_in_long: long_bits,
            bits_in_longlong: 64,
            bits_in_float: 32,
            bits_in_double: 64,
            bits_in_longdouble: 128,
            bits_in_pointer: ptr_bits,
            bits_in_wchar: 32,
            bits_in_enum: 32,
            max_alignment: 16,
            char_alignment: 1,
            short_alignment: 2,
            int_alignment: 4,
            long_alignment: long_align,
            longlong_alignment: 8,
            float_alignment: 4,
            double_alignment: 8,
            pointer_alignment: ptr_align,
            char_is_signed: true,
            size_t_is_long: false,
            pic_level: 0,
            pie_level: 0,
        }
    }

    /// Applies one `-f<flag>[=<n>]` target switch. Returns `false` for an
    /// unrecognized flag.
    pub fn apply_flag(&mut self, flag: &str) -> bool {
        let (name, value) = match flag.split_once('=') {
            Some((n, v)) => (n, Some(v)),
            None => (flag, None),
        };
        match name {
            "short-wchar" => self.bits_in_wchar = 16,
            "unsigned-char" => self.char_is_signed = false,
            "signed-char" => self.char_is_signed = true,
            "msize-long" => self.size_t_is_long = true,
            "pic" => self.pic_level = value.and_then(|v| v.parse().ok()).unwrap_or(1),
            "pie" => self.pie_level = value.and_then(|v| v.parse().ok()).unwrap_or(1),
            _ => return false,
        }
        true
    }

    /// Width of `size_t`/`uintptr_t` in bits.
    pub fn bits_in_size_t(&self) -> u32 {
        if self.size_t_is_long {
            self.bits_in_long
        } else {
            self.bits_in_pointer
        }
    }
}

impl Default for Target {
    fn default() -> Self {
        Target::new(WordSize::M64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lp64_widths() {
        let t = Target::new(WordSize::M64);
        assert_eq!(t.bits_in_long, 64);
        assert_eq!(t.bits_in_pointer, 64);
        assert_eq!(t.pointer_alignment, 8);
    }

    #[test]
    fn ilp32_widths() {
        let t = Target::new(WordSize::M32);
        assert_eq!(t.bits_in_long, 32);
        assert_eq!(t.bits_in_pointer, 32);
        assert_eq!(t.pointer_alignment, 4);
    }

    #[test]
    fn x32_has_32bit_pointers() {
        let t = Target::new(WordSize::X32);
        assert_eq!(t.bits_in_long, 32);
        assert_eq!(t.bits_in_pointer, 32);
    }

    #[test]
    fn llp64_has_32bit_long_64bit_pointer() {
        let t = Target::new(WordSize::Llp64);
        assert_eq!(t.bits_in_long, 32);
        assert_eq!(t.bits_in_pointer, 64);
    }

    #[test]
    fn flags_mutate_model() {
        let mut t = Target::default();
        assert!(t.apply_flag("short-wchar"));
        assert_eq!(t.bits_in_wchar, 16);
        assert!(t.apply_flag("unsigned-char"));
        assert!(!t.char_is_signed);
        assert!(t.apply_flag("pic=2"));
        assert_eq!(t.pic_level, 2);
        assert!(!t.apply_flag("no-such-flag"));
    }
}
