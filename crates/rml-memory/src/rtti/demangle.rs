//! Bounded demangling of MSVC type-descriptor names.
//!
//! The scanner feeds this byte runs that merely *look* like type descriptors.
//! A general-purpose demangler can be driven into pathological time or space
//! by such input, so every candidate is screened against hard caps before any
//! parsing happens, and anything outside the simple class/struct/enum shapes
//! this framework needs is rejected outright.

/// Longest mangled symbol accepted.
const MAX_SYMBOL_LEN: usize = 512;

/// Most `@` separators accepted.
const MAX_AT_COUNT: usize = 32;

/// Deepest template nesting (`?$` introducers) accepted.
const MAX_TEMPLATE_DEPTH: usize = 8;

/// Substrings that mark manglings we never want to touch. Lambda and
/// anonymous-namespace manglings embed compiler-generated identifiers that
/// blow past every structural assumption below.
const REJECTED_SUBSTRINGS: &[&str] = &["<lambda", "@?A0x", "`anonymous"];

/// Returns `true` if the candidate symbol passes the pre-demangle screens.
pub fn acceptable(mangled: &str) -> bool {
    if mangled.len() > MAX_SYMBOL_LEN {
        return false;
    }

    if mangled.bytes().filter(|&b| b == b'@').count() > MAX_AT_COUNT {
        return false;
    }

    if mangled.matches("?$").count() > MAX_TEMPLATE_DEPTH {
        return false;
    }

    if REJECTED_SUBSTRINGS.iter().any(|s| mangled.contains(s)) {
        return false;
    }

    true
}

/// Demangles a type-descriptor name (`.?AVFoo@Bar@@`) into `Bar::Foo`.
///
/// Only the class (`V`), struct (`U`) and enum (`W4`) shapes are handled;
/// templates and everything else return `None`. The scanner stores the
/// mangled form alongside, so nothing is lost by being strict here.
pub fn demangle(mangled: &str) -> Option<String> {
    if !acceptable(mangled) {
        return None;
    }

    let rest = mangled.strip_prefix(".?A")?;

    let rest = rest
        .strip_prefix('V')
        .or_else(|| rest.strip_prefix('U'))
        .or_else(|| rest.strip_prefix("W4"))?;

    let rest = rest.strip_suffix("@@")?;

    if rest.is_empty() || rest.contains("?$") {
        return None;
    }

    let mut segments = Vec::new();

    for segment in rest.split('@') {
        if segment.is_empty()
            || !segment
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            return None;
        }

        segments.push(segment);
    }

    // Mangled order is innermost-first; display order is outermost-first.
    segments.reverse();

    Some(segments.join("::"))
}
