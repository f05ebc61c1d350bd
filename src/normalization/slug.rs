//! Slug helpers shared by the matcher and the deduplicator.
//!
//! Local slugs follow the web application's convention where apostrophes are simply
//! dropped ("Amy's Diner" -> "amys-diner"). IGDB turns them into dashes instead
//! ("amy-s-diner"), which is the only divergence the deduplicator cares about.

use unicode_normalization::UnicodeNormalization;

/// Local slug: ASCII fold, drop anything that is not a word char, whitespace or dash,
/// lowercase, collapse separator runs into a single dash.
pub fn slugify(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_dash = false;
    for c in value.nfkd().filter(|c| c.is_ascii()) {
        if c.is_ascii_alphanumeric() || c == '_' {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else if c == '-' || c.is_ascii_whitespace() {
            pending_dash = true;
        }
    }
    out.trim_matches(|c| c == '-' || c == '_').to_string()
}

/// Slug as IGDB would compute it for the same title.
pub fn igdb_slugify(value: &str) -> String {
    slugify(&value.replace('\'', "-"))
}
