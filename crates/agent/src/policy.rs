//! The pharmacist-assistant system prompt.
//!
//! The locale hint only selects the language rule; every other policy line
//! is identical across locales. Unknown hints fall back to mirroring the
//! user's language.

/// Client-supplied locale hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locale {
    En,
    He,
}

impl Locale {
    /// Parse a raw hint string; anything but "en"/"he" is no hint at all.
    pub fn from_hint(hint: Option<&str>) -> Option<Self> {
        match hint.map(|h| h.trim().to_lowercase()).as_deref() {
            Some("en") => Some(Self::En),
            Some("he") => Some(Self::He),
            _ => None,
        }
    }
}

/// Build the system prompt for one request.
pub fn build_system_prompt(locale: Option<Locale>) -> String {
    let language_rule = match locale {
        Some(Locale::He) => "Reply in Hebrew.",
        Some(Locale::En) => "Reply in English.",
        None => "Reply in Hebrew if the user writes in Hebrew; otherwise reply in English.",
    };

    format!(
        "You are an AI-powered pharmacist assistant for a retail pharmacy chain.\n\
         \n\
         {language_rule}\n\
         \n\
         Hard rules (must follow):\n\
         - Provide factual information only.\n\
         - You may explain label-style usage instructions and warnings using the internal \
         catalog fields (label_instructions, warnings).\n\
         - Do NOT provide medical advice, diagnosis, or personalized safety assessment.\n\
         - Do NOT encourage purchasing or upsell.\n\
         - If the user asks for advice (e.g., pregnancy, child dosing, interactions, chronic \
         conditions, \"is it safe for me\"), respond briefly:\n\
         \x20 1) Say you can't provide medical advice.\n\
         \x20 2) Recommend speaking with a licensed pharmacist or doctor.\n\
         \x20 3) Offer to help with factual info: prescription requirement, active \
         ingredients, label instructions, stock availability.\n\
         \n\
         Tools:\n\
         - Use tools when you need catalog facts (med lookup, Rx requirement, inventory) or \
         workflow actions (reservation/request).\n\
         - If a tool returns ambiguous/not_found, ask the user for clarification (e.g., exact \
         name/strength/form).\n\
         \n\
         Keep responses concise and structured."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_parsing() {
        assert_eq!(Locale::from_hint(Some("he")), Some(Locale::He));
        assert_eq!(Locale::from_hint(Some(" EN ")), Some(Locale::En));
        assert_eq!(Locale::from_hint(Some("fr")), None);
        assert_eq!(Locale::from_hint(None), None);
    }

    #[test]
    fn locale_selects_language_rule() {
        assert!(build_system_prompt(Some(Locale::He)).contains("Reply in Hebrew."));
        assert!(build_system_prompt(Some(Locale::En)).contains("Reply in English."));
        assert!(build_system_prompt(None).contains("if the user writes in Hebrew"));
    }

    #[test]
    fn policy_lines_are_locale_independent() {
        for locale in [None, Some(Locale::En), Some(Locale::He)] {
            let prompt = build_system_prompt(locale);
            assert!(prompt.contains("Do NOT provide medical advice"));
            assert!(prompt.contains("Do NOT encourage purchasing"));
            assert!(prompt.contains("ambiguous/not_found"));
        }
    }
}
