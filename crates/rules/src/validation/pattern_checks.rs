//! Save-time complexity checks for `matches` patterns.

use regex::{Regex, RegexBuilder};

/// Longest pattern accepted.
pub const MAX_PATTERN_LEN: usize = 512;
/// Largest explicit repetition bound accepted in `{n}`, `{n,}` or `{n,m}`.
pub const MAX_REPEAT: u32 = 1000;
/// Compiled program size cap handed to the regex engine.
const SIZE_LIMIT: usize = 1 << 20;

/// Check a pattern against the complexity heuristic and compile it.
pub(crate) fn compile_pattern(pattern: &str) -> Result<Regex, String> {
    check_complexity(pattern)?;
    RegexBuilder::new(pattern)
        .size_limit(SIZE_LIMIT)
        .build()
        .map_err(|e| format!("invalid pattern: {e}"))
}

/// Reject patterns that are too long, carry huge counted repetitions, or nest
/// an unbounded quantifier inside a group that is itself quantified
/// (`(a+)+`, `(x*y)*`, `(?:a|b+){2,}`).
pub(crate) fn check_complexity(pattern: &str) -> Result<(), String> {
    if pattern.len() > MAX_PATTERN_LEN {
        return Err(format!(
            "pattern is {} characters long (max {MAX_PATTERN_LEN})",
            pattern.len()
        ));
    }

    let chars: Vec<char> = pattern.chars().collect();
    // One frame per open group: whether it contains an unbounded quantifier.
    let mut groups: Vec<bool> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let atom_len = match chars[i] {
            '(' => {
                groups.push(false);
                i += 1;
                continue;
            }
            ')' => {
                let inner_unbounded = groups.pop().unwrap_or(false);
                let (quantifier, len) = quantifier_at(&chars, i + 1)?;
                if inner_unbounded && quantifier != Quantifier::None {
                    return Err(
                        "nested quantifier: a repeated group contains an unbounded repetition"
                            .to_string(),
                    );
                }
                if quantifier == Quantifier::Unbounded || inner_unbounded {
                    mark_unbounded(&mut groups);
                }
                i += 1 + len;
                continue;
            }
            '\\' => 2,
            '[' => class_len(&chars, i),
            _ => 1,
        };
        let (quantifier, len) = quantifier_at(&chars, i + atom_len)?;
        if quantifier == Quantifier::Unbounded {
            mark_unbounded(&mut groups);
        }
        i += atom_len + len;
    }

    Ok(())
}

/// Length of the bracket class opening at `start`, nested classes included.
fn class_len(chars: &[char], start: usize) -> usize {
    let mut i = start + 1;
    if chars.get(i) == Some(&'^') {
        i += 1;
    }
    if chars.get(i) == Some(&']') {
        i += 1;
    }
    let mut depth = 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                i += 2;
                continue;
            }
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return i - start + 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    chars.len() - start
}

fn mark_unbounded(groups: &mut [bool]) {
    if let Some(top) = groups.last_mut() {
        *top = true;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quantifier {
    None,
    Bounded,
    Unbounded,
}

/// Quantifier starting at `at`, and how many characters it spans
/// (including a trailing lazy/possessive marker).
fn quantifier_at(chars: &[char], at: usize) -> Result<(Quantifier, usize), String> {
    let Some(&c) = chars.get(at) else {
        return Ok((Quantifier::None, 0));
    };
    let (q, mut len) = match c {
        '*' | '+' => (Quantifier::Unbounded, 1),
        '?' => (Quantifier::Bounded, 1),
        '{' => match counted_repetition(chars, at)? {
            Some((q, len)) => (q, len),
            None => return Ok((Quantifier::None, 0)),
        },
        _ => return Ok((Quantifier::None, 0)),
    };
    if matches!(chars.get(at + len), Some('?') | Some('+')) {
        len += 1;
    }
    Ok((q, len))
}

/// Parse `{n}`, `{n,}` or `{n,m}` at `at`. Returns `None` for a literal `{`.
fn counted_repetition(chars: &[char], at: usize) -> Result<Option<(Quantifier, usize)>, String> {
    let Some(close) = chars[at..].iter().position(|&c| c == '}') else {
        return Ok(None);
    };
    let body: String = chars[at + 1..at + close].iter().collect();
    let (min, max) = match body.split_once(',') {
        Some((min, max)) => (min.trim(), Some(max.trim())),
        None => (body.trim(), None),
    };
    let Ok(min) = min.parse::<u32>() else {
        return Ok(None);
    };
    let quantifier = match max {
        None => Quantifier::Bounded,
        Some("") => Quantifier::Unbounded,
        Some(max) => {
            let Ok(max) = max.parse::<u32>() else {
                return Ok(None);
            };
            if max > MAX_REPEAT {
                return Err(format!("repetition bound {max} exceeds {MAX_REPEAT}"));
            }
            Quantifier::Bounded
        }
    };
    if min > MAX_REPEAT {
        return Err(format!("repetition bound {min} exceeds {MAX_REPEAT}"));
    }
    Ok(Some((quantifier, close + 1)))
}
