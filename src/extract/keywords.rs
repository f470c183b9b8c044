use crate::model::KeywordTag;

use super::vocab::KEYWORD_GROUPS;

/// Every `(keyword, category)` pair whose keyword appears in `text`, in table order.
/// Categories overlap: one keyword may tag a text under several of them.
pub fn tag_keywords(text: &str) -> Vec<KeywordTag> {
    let lower = text.to_lowercase();
    KEYWORD_GROUPS
        .iter()
        .flat_map(|(category, keywords)| {
            keywords
                .iter()
                .filter(|kw| lower.contains(&kw.to_lowercase()))
                .map(move |kw| KeywordTag {
                    keyword: kw.to_string(),
                    category: category.to_string(),
                })
        })
        .collect()
}

/// Case-insensitive "mentions at least one of" check used by the collector's category filter.
pub fn mentions_any<S: AsRef<str>>(text: &str, keywords: &[S]) -> bool {
    let lower = text.to_lowercase();
    keywords
        .iter()
        .any(|kw| lower.contains(&kw.as_ref().to_lowercase()))
}
