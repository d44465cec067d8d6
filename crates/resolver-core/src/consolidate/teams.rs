//! Fuzzy team-name equivalence used when merging fixtures across feeds.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

const STRIPPED_TOKENS: &[&str] = &["fc", "cf", "sc", "afc"];

/// Words longer than this many characters count as significant.
const SIGNIFICANT_WORD_LEN: usize = 3;

/// Shortest normalized name allowed to match by containment.
const MIN_CONTAINMENT_LEN: usize = 3;

/// Letters NFD leaves whole because they have no combining decomposition.
fn fold_atomic(c: char) -> Option<&'static str> {
    Some(match c {
        'ß' => "ss",
        'æ' => "ae",
        'œ' => "oe",
        'ø' => "o",
        'ł' => "l",
        'đ' | 'ð' => "d",
        'ħ' => "h",
        'ı' => "i",
        'þ' => "th",
        _ => return None,
    })
}

fn fold_char(c: char, out: &mut String) {
    if is_combining_mark(c) {
        return;
    }
    if let Some(folded) = fold_atomic(c) {
        out.push_str(folded);
    } else if c.is_alphanumeric() {
        out.push(c);
    } else {
        out.push(' ');
    }
}

/// Lower-case, strip diacritics and punctuation, and drop club suffixes.
pub fn normalize_team_name(name: &str) -> String {
    let mut folded = String::with_capacity(name.len());
    for c in name.chars().flat_map(char::to_lowercase).nfd() {
        fold_char(c, &mut folded);
    }
    folded
        .split_whitespace()
        .filter(|token| !STRIPPED_TOKENS.contains(token))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether two provider spellings plausibly name the same team.
pub fn team_names_equivalent(a: &str, b: &str) -> bool {
    let na = normalize_team_name(a);
    let nb = normalize_team_name(b);
    normalized_equivalent(&na, &nb)
}

pub(crate) fn normalized_equivalent(na: &str, nb: &str) -> bool {
    if na.is_empty() || nb.is_empty() {
        return false;
    }
    if na == nb {
        return true;
    }

    let (shorter, longer) = if na.len() <= nb.len() { (na, nb) } else { (nb, na) };
    if shorter.chars().count() >= MIN_CONTAINMENT_LEN && longer.contains(shorter) {
        return true;
    }

    na.split(' ')
        .filter(|w| w.chars().count() > SIGNIFICANT_WORD_LEN)
        .any(|w| nb.split(' ').any(|other| other == w))
}
