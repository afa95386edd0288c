//! Attachment filename templates

const ORIGINAL: &str = "{original}";
const DATE: &str = "{date}";

/// Expand `{original}` and `{date}` in `pattern`
///
/// Substitution is a single left-to-right pass, so placeholder text that
/// appears inside a substituted value is kept as is. Unknown placeholders
/// are copied verbatim.
pub fn format_filename(pattern: &str, original: &str, date: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + original.len() + date.len());
    let mut rest = pattern;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix(ORIGINAL) {
            out.push_str(original);
            rest = after;
        } else if let Some(after) = tail.strip_prefix(DATE) {
            out.push_str(date);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }

    out.push_str(rest);
    out
}
