use crate::pattern::{escape, fnmatch, has_meta, unescape, Pattern};

#[test]
fn test_wildcards() {
    assert!(fnmatch("*", ""));
    assert!(fnmatch("a*c", "abbbc"));
    assert!(fnmatch("a?c", "abc"));
    assert!(!fnmatch("a?c", "ac"));
    assert!(fnmatch("*.rs", "main.rs"));
    assert!(!fnmatch("*.rs", "main.rsx"));
}

#[test]
fn test_bracket_expressions() {
    assert!(fnmatch("[abc]x", "bx"));
    assert!(!fnmatch("[!abc]x", "bx"));
    assert!(fnmatch("[^abc]x", "dx"));
    assert!(fnmatch("[a-f]", "c"));
    assert!(!fnmatch("[a-f]", "g"));
    assert!(fnmatch("[]]", "]"));
    assert!(fnmatch("[a-]", "-"));
    assert!(fnmatch("[[:digit:]][[:upper:]]", "7Q"));
    assert!(!fnmatch("[[:digit:]]", "x"));
    // An unterminated bracket is an ordinary character.
    assert!(fnmatch("[ab", "[ab"));
}

#[test]
fn test_escaped_characters() {
    assert!(fnmatch(r"\*", "*"));
    assert!(!fnmatch(r"\*", "x"));
    assert!(fnmatch(&escape("a*b?[c]"), "a*b?[c]"));
    assert!(has_meta("a*"));
    assert!(!has_meta(r"a\*"));
    assert_eq!(unescape(r"a\*b\\"), r"a*b\");
}

#[test]
fn test_prefix_and_suffix() {
    let star_slash = Pattern::new("*/");
    assert_eq!(star_slash.match_prefix("/usr/lib/x", false), Some(1));
    assert_eq!(star_slash.match_prefix("/usr/lib/x", true), Some(9));
    let dot_star = Pattern::new(".*");
    assert_eq!(dot_star.match_suffix("a.tar.gz", false), Some(3));
    assert_eq!(dot_star.match_suffix("a.tar.gz", true), Some(7));
    assert_eq!(Pattern::new("z*").match_prefix("abc", true), None);
}

#[test]
fn test_find_leftmost_longest() {
    let chars: Vec<char> = "xaabaab".chars().collect();
    assert_eq!(Pattern::new("a*b").find(&chars, 0), Some((1, 7)));
    assert_eq!(Pattern::new("b").find(&chars, 4), Some((6, 7)));
}

#[test]
fn test_long_subjects_match_exactly() {
    let mut text = "a".repeat(20_000);
    assert!(!fnmatch("*a*a*a*a*a*a*a*b", &text));
    text.push('b');
    assert!(fnmatch("*a*a*a*a*a*a*a*b", &text));

    let pat = Pattern::new("a*b");
    assert_eq!(pat.match_suffix(&text, true), Some(20_001));
    assert_eq!(pat.match_suffix(&text, false), Some(2));
    assert_eq!(Pattern::new("*a").match_prefix(&text, true), Some(20_000));

    let chars: Vec<char> = text.chars().collect();
    assert_eq!(pat.find(&chars, 0), Some((0, 20_001)));
    assert_eq!(pat.find(&chars[..20_000], 0), None);
    assert_eq!(Pattern::new("a").find(&chars, 19_999), Some((19_999, 20_000)));
}

#[test]
fn test_find_edges() {
    let chars: Vec<char> = "abxab".chars().collect();
    assert_eq!(Pattern::new("a*b").find(&chars, 0), Some((0, 5)));
    assert_eq!(Pattern::new("?b").find(&chars, 1), Some((3, 5)));
    assert_eq!(Pattern::new("*").find(&chars, 5), None);
}
