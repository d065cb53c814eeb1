//! Strings matching a `pattern` keyword, produced by walking the regex HIR.

use rand::rngs::StdRng;
use rand::Rng;
use regex_syntax::hir::{Class, Hir, HirKind};

/// Extra repetitions allowed past the minimum for unbounded quantifiers.
const OPEN_REPEAT: u32 = 4;
const ATTEMPTS: usize = 16;
const PRINTABLE: (u32, u32) = (0x20, 0x7e);

/// Generate a string matching `pattern`, preferring one whose length is within
/// `min..=max`. Fails only when the pattern does not parse.
pub(crate) fn generate(pattern: &str, rng: &mut StdRng, min: usize, max: Option<usize>) -> Result<String, String> {
    let hir = regex_syntax::parse(pattern).map_err(|e| e.to_string())?;
    let mut last = String::new();
    for _ in 0..ATTEMPTS {
        let mut out = String::new();
        emit(&hir, rng, &mut out);
        let len = out.chars().count();
        if len >= min && max.map_or(true, |m| len <= m) {
            return Ok(out);
        }
        last = out;
    }
    Ok(last)
}

fn emit(hir: &Hir, rng: &mut StdRng, out: &mut String) {
    match hir.kind() {
        HirKind::Empty | HirKind::Look(_) => {}
        HirKind::Literal(literal) => out.push_str(&String::from_utf8_lossy(&literal.0)),
        HirKind::Class(Class::Unicode(class)) => {
            let ranges: Vec<(u32, u32)> = class.ranges().iter().map(|r| (r.start() as u32, r.end() as u32)).collect();
            if let Some(c) = pick(&ranges, rng).and_then(char::from_u32) {
                out.push(c);
            }
        }
        HirKind::Class(Class::Bytes(class)) => {
            let ranges: Vec<(u32, u32)> = class.ranges().iter().map(|r| (r.start() as u32, r.end() as u32)).collect();
            if let Some(c) = pick(&ranges, rng).and_then(char::from_u32) {
                out.push(c);
            }
        }
        HirKind::Repetition(rep) => {
            let max = rep.max.unwrap_or(rep.min + OPEN_REPEAT).max(rep.min);
            let count = rng.gen_range(rep.min..=max);
            for _ in 0..count {
                emit(&rep.sub, rng, out);
            }
        }
        HirKind::Capture(capture) => emit(&capture.sub, rng, out),
        HirKind::Concat(parts) => {
            for part in parts {
                emit(part, rng, out);
            }
        }
        HirKind::Alternation(branches) => {
            if !branches.is_empty() {
                let branch = &branches[rng.gen_range(0..branches.len())];
                emit(branch, rng, out);
            }
        }
    }
}

/// Code point from one of `ranges`, printable ASCII first.
fn pick(ranges: &[(u32, u32)], rng: &mut StdRng) -> Option<u32> {
    let printable: Vec<(u32, u32)> = ranges
        .iter()
        .filter_map(|&(lo, hi)| {
            let lo = lo.max(PRINTABLE.0);
            let hi = hi.min(PRINTABLE.1);
            (lo <= hi).then_some((lo, hi))
        })
        .collect();
    let pool = if printable.is_empty() { ranges } else { &printable[..] };
    if pool.is_empty() {
        return None;
    }
    let (lo, hi) = pool[rng.gen_range(0..pool.len())];
    Some(rng.gen_range(lo..=hi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use regex::Regex;

    #[test]
    fn test_generated_strings_match() {
        let mut rng = StdRng::seed_from_u64(11);
        for pattern in [
            r"^[A-Z]{3}-\d{4}$",
            r"^(foo|bar)+baz?$",
            r"^\w+@example\.com$",
            r"^[^a-z]{2,5}$",
            r"^\s?x$",
            r"^.{3}$",
        ] {
            let regex = Regex::new(pattern).unwrap();
            for _ in 0..25 {
                let value = generate(pattern, &mut rng, 0, None).unwrap();
                assert!(regex.is_match(&value), "{pattern}: {value:?}");
            }
        }
    }

    #[test]
    fn test_prefers_length_bounds() {
        let mut rng = StdRng::seed_from_u64(5);
        let value = generate("^a{1,10}$", &mut rng, 4, Some(6)).unwrap();
        assert!((4..=6).contains(&value.len()), "{value}");
    }

    #[test]
    fn test_invalid_pattern() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(generate("(", &mut rng, 0, None).is_err());
    }
}
