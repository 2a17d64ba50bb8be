//! Clean model text before it is spoken or displayed.
//!
//! Models like to narrate: `*shuffles the deck*`, `[pause]`, `(smiles)`.
//! None of that should reach the speech endpoint, so every line headed for
//! speech or display goes through [`sanitize`].

/// Delimiter pairs stripped from text, applied in this order.
const MARKUP: [(char, char); 3] = [('*', '*'), ('[', ']'), ('(', ')')];

/// Strip action markup and normalize whitespace.
///
/// Removes `*...*`, `[...]` and `(...)` spans (shortest match, no nesting),
/// collapses whitespace runs to a single space and trims. An opener with no
/// closer is left in place. Total and idempotent.
pub fn sanitize(raw: &str) -> String {
    let mut text = raw.to_owned();
    for (open, close) in MARKUP {
        text = strip_delimited(&text, open, close);
    }
    collapse_whitespace(&text)
}

/// Remove every `open ... close` span, matching each opener with the first
/// closer after it.
fn strip_delimited(text: &str, open: char, close: char) -> String {
    let mut result = String::with_capacity(text.len());
    let mut remaining = text;
    while let Some(start) = remaining.find(open) {
        let after_open = &remaining[start + open.len_utf8()..];
        match after_open.find(close) {
            Some(end) => {
                result.push_str(&remaining[..start]);
                // Keep words on either side of the span apart.
                result.push(' ');
                remaining = &after_open[end + close.len_utf8()..];
            }
            None => break,
        }
    }
    result.push_str(remaining);
    result
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_asterisk_actions() {
        assert_eq!(
            sanitize("*shuffles the deck* The cards are ready."),
            "The cards are ready."
        );
    }

    #[test]
    fn removes_bracket_and_paren_directions() {
        assert_eq!(
            sanitize("[pause] I see a journey (smiles warmly) ahead."),
            "I see a journey ahead."
        );
    }

    #[test]
    fn removes_adjacent_and_multiple_spans() {
        assert_eq!(sanitize("*a**b*[c][d](e)(f)Hello"), "Hello");
        assert_eq!(
            sanitize("One *x* two *y* three [z] four (w) five"),
            "One two three four five"
        );
    }

    #[test]
    fn matches_are_non_greedy() {
        assert_eq!(sanitize("*a* keep *b*"), "keep");
        assert_eq!(sanitize("(a) keep (b)"), "keep");
    }

    #[test]
    fn unclosed_openers_are_kept() {
        assert_eq!(sanitize("A star * in the sky"), "A star * in the sky");
        assert_eq!(sanitize("An open (paren"), "An open (paren");
    }

    #[test]
    fn interior_punctuation_survives() {
        assert_eq!(
            sanitize("Well... the Tower, reversed; change - it's coming!"),
            "Well... the Tower, reversed; change - it's coming!"
        );
        assert_eq!(sanitize("It costs $5, or 10%?"), "It costs $5, or 10%?");
    }

    #[test]
    fn collapses_whitespace_and_trims() {
        assert_eq!(sanitize("  The   moon\n\trises  "), "The moon rises");
    }

    #[test]
    fn empty_and_blank_input() {
        assert_eq!(sanitize(""), "");
        assert_eq!(sanitize("   \n\t "), "");
        assert_eq!(sanitize("*only an action*"), "");
    }

    #[test]
    fn removing_a_span_does_not_glue_words() {
        assert_eq!(sanitize("fate*sigh*awaits"), "fate awaits");
    }

    #[test]
    fn idempotent_over_tricky_inputs() {
        let inputs = [
            "",
            "plain text",
            "*a* [b] (c) d",
            "(*a)b*)",
            "*[*]a*",
            "[(]x)",
            "*a (x*) b*",
            "fate*sigh*awaits  (",
            "((nested)) [[x]] **bold**",
            "  tabs\tand\nnewlines  ",
            "unicode ✨ *✨* [✨] (✨) done",
        ];
        for input in inputs {
            let once = sanitize(input);
            assert_eq!(sanitize(&once), once, "not idempotent for {input:?}");
        }
    }
}
