/// Collapse a body into a single-line snippet of at most `max_chars`.
pub fn normalize_snippet(s: &str, max_chars: usize) -> String {
    let mut out = String::new();
    for line in s.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(line);
        if out.chars().count() >= max_chars {
            break;
        }
    }
    out.chars().take(max_chars).collect()
}

/// Strip angle brackets and surrounding space from a Message-ID-ish value.
pub fn normalize_msgid(raw: &str) -> String {
    raw.trim().trim_start_matches('<').trim_end_matches('>').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_collapses_lines_and_truncates() {
        let s = "first line\n\n  second line  \nthird";
        assert_eq!(normalize_snippet(s, 22), "first line second line");
        assert_eq!(normalize_snippet(s, 10), "first line");
    }

    #[test]
    fn msgid_loses_brackets() {
        assert_eq!(normalize_msgid(" <abc@host> "), "abc@host");
        assert_eq!(normalize_msgid("abc@host"), "abc@host");
    }
}
