//! Display normalization for provider-supplied brand and product names.

use cce_core::SearchCandidate;

/// Brands whose canonical spelling is upper case.
const KNOWN_BRANDS: &[&str] = &[
    "DEWALT",
    "MILWAUKEE",
    "RIDGID",
    "RYOBI",
    "MAKITA",
    "BOSCH",
    "KOHLER",
    "MOEN",
    "DELTA",
    "PFISTER",
    "HUSKY",
    "EVERBILT",
    "HDX",
    "GLACIER BAY",
    "HAMPTON BAY",
    "DEFIANT",
    "COMMERCIAL ELECTRIC",
    "VIGORO",
    "BEHR",
    "GLIDDEN",
    "PPG",
    "RUST-OLEUM",
    "DAP",
    "GE",
    "LG",
    "SAMSUNG",
    "WHIRLPOOL",
    "MAYTAG",
    "FRIGIDAIRE",
    "TORO",
    "ECHO",
    "EGO",
    "STIHL",
    "DIABLO",
    "IRWIN",
    "STANLEY",
    "CRAFTSMAN",
    "WERNER",
    "GORILLA",
    "3M",
    "WD-40",
    "CLR",
    "ZINSSER",
    "LIFEPROOF",
    "TRAFFICMASTER",
    "METALUX",
    "HALO",
    "LEVITON",
];

const ABBREVIATIONS: &[&str] = &[
    "HD", "LED", "USB", "AC", "DC", "UV", "PVC", "ABS", "HVAC", "CFM", "PSI", "RPM", "GPM", "BTU",
];

const UNITS: &[&str] = &["in", "ft", "mm", "cm", "oz", "lb", "gal", "qt", "pk", "ct", "sq"];

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Lower-case, then capitalize every character that starts a word.
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_word = false;
    for c in text.chars() {
        if is_word_char(c) && !prev_word {
            out.push(c.to_ascii_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        prev_word = is_word_char(c);
    }
    out
}

/// Known brands take their canonical spelling; anything else is title-cased.
pub fn normalize_brand(raw: &str) -> Option<String> {
    let trimmed = collapse_whitespace(raw);
    if trimmed.is_empty() {
        return None;
    }
    let upper = trimmed.to_uppercase();
    let known = KNOWN_BRANDS
        .iter()
        .find(|known| upper == **known || upper == known.replace(' ', ""));
    Some(match known {
        Some(known) => known.to_string(),
        None => title_case(&trimmed),
    })
}

fn unit_of(token: &str) -> Option<&'static str> {
    let bare = token.strip_suffix('.').unwrap_or(token);
    UNITS.iter().copied().find(|unit| bare.eq_ignore_ascii_case(unit))
}

/// `12In` becomes `12 in.`; `3-1/2in.` becomes `3-1/2 in.`.
fn split_fused_unit(token: &str) -> Option<String> {
    let bare = token.strip_suffix('.').unwrap_or(token);
    let split = bare.rfind(|c: char| !c.is_ascii_alphabetic())? + 1;
    let (number, unit) = bare.split_at(split);
    if !number.ends_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    unit_of(unit).map(|unit| format!("{number} {unit}."))
}

/// Abbreviations back to upper case inside one whitespace-delimited token.
fn restore_abbreviations(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    let mut word = String::new();
    let flush = |word: &mut String, out: &mut String| {
        match ABBREVIATIONS.iter().find(|a| a.eq_ignore_ascii_case(word.as_str())) {
            Some(abbr) => out.push_str(abbr),
            None => out.push_str(word),
        }
        word.clear();
    };
    for c in token.chars() {
        if is_word_char(c) {
            word.push(c);
        } else {
            flush(&mut word, &mut out);
            out.push(c);
        }
    }
    flush(&mut word, &mut out);
    out
}

/// Collapse whitespace, drop a leading duplicate of `brand`, title-case, then
/// restore abbreviations and write units as `<n> unit.`.
pub fn normalize_product_name(raw: &str, brand: Option<&str>) -> Option<String> {
    let mut name = collapse_whitespace(raw);
    if let Some(brand) = brand.filter(|b| !b.is_empty()) {
        let prefixed = name
            .get(..brand.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(brand))
            && !name[brand.len()..].starts_with(is_word_char);
        if prefixed {
            name = name[brand.len()..]
                .trim_start_matches(|c: char| c.is_whitespace() || c == '-' || c == ':')
                .trim()
                .to_string();
        }
    }
    if name.is_empty() {
        return None;
    }

    let titled = title_case(&name);
    let mut tokens: Vec<String> = Vec::new();
    for token in titled.split(' ') {
        let previous_is_number = tokens
            .last()
            .is_some_and(|prev| prev.ends_with(|c: char| c.is_ascii_digit()));
        if previous_is_number {
            if let Some(unit) = unit_of(token) {
                tokens.push(format!("{unit}."));
                continue;
            }
        }
        match split_fused_unit(token) {
            Some(split) => tokens.push(split),
            None => tokens.push(restore_abbreviations(token)),
        }
    }
    Some(tokens.join(" "))
}

/// Candidate with brand and title normalized for storage. Matching uses the raw title.
pub fn normalized_candidate(candidate: &SearchCandidate) -> SearchCandidate {
    let brand = candidate.brand.as_deref().and_then(normalize_brand);
    let title = candidate
        .title
        .as_deref()
        .and_then(|title| normalize_product_name(title, brand.as_deref()));
    SearchCandidate {
        title,
        brand,
        ..candidate.clone()
    }
}
