/// Marker substituted for every `,` in free-text record fields.
pub const COMMA_MARKER: &str = "(comma)";

/// Replaces every comma so the value can live inside a comma-separated row.
pub fn sanitize_commas(value: &str) -> String {
    value.replace(',', COMMA_MARKER)
}
