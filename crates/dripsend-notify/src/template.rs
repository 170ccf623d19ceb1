//! `{field}` placeholder rendering for subject and body templates.

use dripsend_core::types::Row;

/// Substitute row fields into a template. Supported placeholders:
/// `{contact}`, `{phone}`, `{email}`, `{make}`, `{model}`, `{reg}`.
/// Unknown placeholders pass through untouched.
pub fn render(template: &str, row: &Row) -> String {
    template
        .replace("{contact}", &row.contact)
        .replace("{phone}", &row.phone)
        .replace("{email}", &row.email)
        .replace("{make}", &row.make)
        .replace("{model}", &row.model)
        .replace("{reg}", &row.reg)
}
