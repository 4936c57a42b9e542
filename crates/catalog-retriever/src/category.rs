//! Category extraction and loose category matching.
//!
//! Category terms are recovered from a result's text payload, whose last
//! `|`-separated segment holds `category,subcategory`. Matching is a
//! case-insensitive substring test in both directions so that `bag` matches
//! `bags` and `dresses` matches `dress`.

/// Extract lowercased category terms from a payload of the form
/// `name | description | category,subcategory[\nPRICE: ...]`.
///
/// Blank tokens and tokens starting with `/` (image paths that leaked into
/// the category slot) are dropped.
pub fn parse_categories(text: &str) -> Vec<String> {
    let Some(last) = text.rsplit('|').next() else {
        return Vec::new();
    };
    let segment = match last.find("PRICE:") {
        Some(pos) => &last[..pos],
        None => last,
    };

    segment
        .split(',')
        .map(|part| part.trim().to_lowercase())
        .filter(|part| !part.is_empty() && !part.starts_with('/'))
        .collect()
}

/// True if any non-blank user term is a substring of a product term or the
/// other way round.
pub fn matches<S: AsRef<str>>(user_terms: &[S], product_terms: &[String]) -> bool {
    user_terms
        .iter()
        .map(|term| term.as_ref().trim().to_lowercase())
        .filter(|term| !term.is_empty())
        .any(|user| {
            product_terms
                .iter()
                .any(|product| product.contains(&user) || user.contains(product.as_str()))
        })
}

/// True when at least one user term survives trimming.
pub fn has_terms<S: AsRef<str>>(user_terms: &[S]) -> bool {
    user_terms.iter().any(|t| !t.as_ref().trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_standard_payload() {
        let text = "Trail Runner | Lightweight shoe | Footwear, Shoes\nPRICE: 89.99";
        assert_eq!(parse_categories(text), terms(&["footwear", "shoes"]));
    }

    #[test]
    fn test_parse_price_mixed_into_segment() {
        assert_eq!(
            parse_categories("Tote | Bag | bags,totes PRICE: 25"),
            terms(&["bags", "totes"])
        );
    }

    #[test]
    fn test_parse_drops_paths_and_blanks() {
        assert_eq!(
            parse_categories("x | y | ,/images/a.jpg\nPRICE: N/A"),
            Vec::<String>::new()
        );
        assert_eq!(parse_categories("x | y | Bags,\nPRICE: 1"), terms(&["bags"]));
    }

    #[test]
    fn test_parse_without_pipes() {
        assert_eq!(parse_categories("just,words"), terms(&["just", "words"]));
        assert!(parse_categories("").is_empty());
    }

    #[test]
    fn test_matches_bidirectional_substring() {
        let product = terms(&["bags", "totes"]);
        assert!(matches(&["bag"], &product));
        assert!(matches(&["Shopping Bags"], &terms(&["bags"])));
        assert!(matches(&["TOTES"], &product));
        assert!(!matches(&["shoes"], &product));
    }

    #[test]
    fn test_blank_user_terms_ignored() {
        let product = terms(&["bags"]);
        assert!(!matches(&["", "  "], &product));
        assert!(!has_terms(&["", " "]));
        assert!(has_terms(&["", "bags"]));
    }

    #[test]
    fn test_no_product_terms_never_match() {
        assert!(!matches(&["bags"], &[]));
    }
}
