use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

static STEM_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*?)(\d+)?$").expect("valid stem suffix regex"));

/// Returns `path` itself when nothing exists there, otherwise the first
/// sibling whose stem carries a higher numeric suffix (`summary.txt` ->
/// `summary1.txt` -> `summary2.txt`) and does not exist yet.
pub fn resolve_available_path(path: impl AsRef<Path>) -> PathBuf {
    let mut candidate = path.as_ref().to_path_buf();
    while candidate.exists() {
        candidate = next_candidate(&candidate);
    }
    candidate
}

/// The path following `path` in the suffix sequence, regardless of whether
/// either exists.
pub fn next_candidate(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let new_stem = increment_stem(&stem);
    let file_name = match path.extension() {
        Some(ext) => format!("{new_stem}.{}", ext.to_string_lossy()),
        None => new_stem,
    };
    path.with_file_name(file_name)
}

fn increment_stem(stem: &str) -> String {
    let (base, digits) = split_stem(stem);
    match digits {
        Some(digits) => format!("{base}{}", increment_digits(digits)),
        None => format!("{stem}1"),
    }
}

fn split_stem(stem: &str) -> (&str, Option<&str>) {
    match STEM_SUFFIX_RE.captures(stem) {
        Some(caps) => {
            let base = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let digits = caps.get(2).map(|m| m.as_str());
            (base, digits)
        }
        None => (stem, None),
    }
}

/// Decimal increment on an arbitrarily long digit string. Leading zeros are
/// dropped, as an integer parse would (`007` -> `8`).
fn increment_digits(digits: &str) -> String {
    let mut bytes: Vec<u8> = digits.trim_start_matches('0').bytes().collect();
    let mut carry = true;
    for byte in bytes.iter_mut().rev() {
        if !carry {
            break;
        }
        if *byte == b'9' {
            *byte = b'0';
        } else {
            *byte += 1;
            carry = false;
        }
    }
    if carry {
        bytes.insert(0, b'1');
    }
    String::from_utf8(bytes).unwrap_or_default()
}
