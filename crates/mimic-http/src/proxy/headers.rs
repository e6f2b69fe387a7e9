//! Headers this server adds to responses it did not author itself.

/// Set on responses relayed from an upstream.
pub const X_MIMIC_PROXIED: &str = "x-mimic-proxied";
/// Set on responses that were captured while recording.
pub const X_MIMIC_RECORDED: &str = "x-mimic-recorded";

pub const VALUE_TRUE: &str = "true";

/// Whether `name` is one of the headers above.
pub fn is_mimic_header(name: &str) -> bool {
    name.len() > 8
        && name
            .get(..8)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("x-mimic-"))
}
