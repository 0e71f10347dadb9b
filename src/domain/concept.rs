//! Vendor concept names arrive as `category__subcategory__concept`.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedConcept {
    pub concept: String,
    pub category: Option<String>,
    pub subcategory: Option<String>,
}

impl ParsedConcept {
    /// Three parts: category, subcategory, concept. Two parts: category and
    /// concept. Anything else is kept whole as the concept.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let parts: Vec<&str> = raw.split("__").collect();
        match parts.as_slice() {
            [category, subcategory, concept] => Self {
                concept: (*concept).to_string(),
                category: Some((*category).to_string()),
                subcategory: Some((*subcategory).to_string()),
            },
            [category, concept] => Self {
                concept: (*concept).to_string(),
                category: Some((*category).to_string()),
                subcategory: None,
            },
            _ => Self {
                concept: raw.to_string(),
                category: None,
                subcategory: None,
            },
        }
    }
}
