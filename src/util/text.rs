use std::borrow::Cow;

/// Maximum length of a derived article summary, in characters.
pub const SUMMARY_MAX_CHARS: usize = 300;

/// Suffix appended when a summary is cut short.
const ELLIPSIS: &str = "...";

/// Removes markup tags from `html`.
///
/// A tag is a `<` followed by any run of characters up to and including the
/// next `>`. An unterminated `<` is kept as literal text, as is everything
/// after it. Entities (`&amp;`) are left untouched.
///
/// Returns `Cow::Borrowed` when the input contains no `<`.
///
/// # Examples
///
/// ```
/// use feedkeeper::util::strip_markup;
///
/// assert_eq!(strip_markup("<p>Hello <b>world</b></p>"), "Hello world");
/// assert_eq!(strip_markup("a < b"), "a < b");
/// ```
pub fn strip_markup(html: &str) -> Cow<'_, str> {
    if !html.contains('<') {
        return Cow::Borrowed(html);
    }

    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        match tail.find('>') {
            Some(close) => rest = &tail[close + 1..],
            None => {
                // No closing bracket anywhere after this point: nothing more matches.
                out.push_str(tail);
                return Cow::Owned(out);
            }
        }
    }

    out.push_str(rest);
    Cow::Owned(out)
}

/// Keeps the first `max_chars` characters of `s`, appending "..." if anything was cut.
///
/// Counting is by Unicode scalar value, so multi-byte characters are never split.
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_chars) {
        None => Cow::Borrowed(s),
        Some((cut, _)) => Cow::Owned(format!("{}{}", &s[..cut], ELLIPSIS)),
    }
}

/// Derives the plain-text excerpt shown for an article.
///
/// Markup is stripped first, then the result is cut to [`SUMMARY_MAX_CHARS`].
pub fn summarize(content: &str) -> String {
    let text = strip_markup(content);
    truncate_chars(&text, SUMMARY_MAX_CHARS).into_owned()
}

/// Cleans a user- or feed-supplied label (source name, category).
///
/// Drops control characters (keeping none, since labels are single-line)
/// and trims surrounding whitespace. Returns `None` when nothing is left.
pub fn clean_label(s: &str) -> Option<String> {
    let cleaned: String = s.chars().filter(|c| !c.is_control()).collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}
