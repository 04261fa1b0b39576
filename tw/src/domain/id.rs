//! ID generation
//!
//! Window and execution IDs use the format: `{type}-{slug}-{8-char-hex}`
//! Example: `win-book-flight-3f9a0c21`
//!
//! Slugs are lowercase ASCII words joined by `-`, at most [`MAX_SLUG_LEN`]
//! bytes, so IDs stay readable in logs and never need escaping on disk.

/// Longest slug embedded in an ID
pub const MAX_SLUG_LEN: usize = 32;

/// Generate an ID from a type prefix and a human label
pub fn generate_id(id_type: &str, label: &str) -> String {
    let uuid = uuid::Uuid::now_v7().simple().to_string();
    // The tail of a v7 uuid is random; the head is a timestamp
    let suffix = &uuid[uuid.len() - 8..];
    let slug = slugify(label);
    if slug.is_empty() {
        format!("{}-{}", id_type, suffix)
    } else {
        format!("{}-{}-{}", id_type, slug, suffix)
    }
}

/// Reduce a task label to an ID-safe slug
///
/// ASCII letters and digits are kept (lowercased); any other run of
/// characters becomes a single `-`. Long labels are cut at the last word
/// boundary that fits.
pub fn slugify(label: &str) -> String {
    let mut slug = String::with_capacity(label.len().min(MAX_SLUG_LEN));
    let mut pending_sep = false;

    for c in label.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('-');
            }
            pending_sep = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }

    if slug.len() <= MAX_SLUG_LEN {
        return slug;
    }
    let cut = &slug[..MAX_SLUG_LEN];
    match cut.rfind('-') {
        Some(boundary) if slug.as_bytes()[MAX_SLUG_LEN] != b'-' => cut[..boundary].to_string(),
        _ => cut.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id() {
        let id = generate_id("win", "Book a flight");
        assert!(id.starts_with("win-book-a-flight-"));
        assert_eq!(id.len(), "win-book-a-flight-".len() + 8);
    }

    #[test]
    fn test_generate_id_unique() {
        let a = generate_id("exec", "task");
        let b = generate_id("exec", "task");
        assert_ne!(a, b);
    }

    #[test]
    fn test_generate_id_empty_label() {
        let id = generate_id("exec", "!!!");
        assert!(id.starts_with("exec-"));
        assert_eq!(id.len(), "exec-".len() + 8);
    }

    #[test]
    fn test_slugify_words() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("  Fill   the form  "), "fill-the-form");
        assert_eq!(slugify("task_42/step"), "task-42-step");
        assert_eq!(slugify("Don't stop"), "don-t-stop");
    }

    #[test]
    fn test_slugify_is_ascii_only() {
        assert_eq!(slugify("Réserver un vol"), "r-server-un-vol");
        assert_eq!(slugify("日本語"), "");
        assert!(slugify("Ünïcödé → täsk").is_ascii());
    }

    #[test]
    fn test_slugify_truncates_on_word_boundary() {
        let slug = slugify("Compare flight prices across every airline in Europe");
        assert_eq!(slug, "compare-flight-prices-across");
        assert!(slug.len() <= MAX_SLUG_LEN);

        let long_word = "x".repeat(40);
        assert_eq!(slugify(&long_word).len(), MAX_SLUG_LEN);

        // An exact fit at a word end keeps the whole word
        assert_eq!(slugify("aaaaaaaaaaaaaaa bbbbbbbbbbbbbbbb cc"), "aaaaaaaaaaaaaaa-bbbbbbbbbbbbbbbb");
    }
}
