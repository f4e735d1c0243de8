//! Word filter for user-chosen room names.

use regex::{RegexSet, RegexSetBuilder};

const BANNED_WORDS: &[&str] = &[
    // profanity
    "fuck", "shit", "damn", "bitch", "asshole", "basterd", "crap", "piss", "dickhead",
    "jackass", "dumbass", "bullshit", "motherfucker", "cocksucker", "son of a bitch",
    "piece of shit",
    // sexual content
    "porn", "sex", "naked", "nude", "xxx", "adult", "escort",
    // slurs
    "nigger", "nigga", "negro", "spic", "wetback", "chink", "gook", "kike", "hymie",
    "raghead", "towelhead", "sand nigger", "cracker", "honky", "whity", "gringo", "beaner",
    "border hopper", "faggot", "fag", "dyke", "homo", "queer", "tranny", "christ killer",
    "retard", "retarded", "spastic", "cripple", "invalid",
    // violence and hate
    "jihad", "terrorist", "nazi", "hitler", "genocide", "kill yourself", "kys", "suicide",
    "die", "death", "murder", "rape", "hate", "supremacy", "master race", "inferior race",
    "pure blood", "ethnic cleansing", "violence", "beating", "assault", "abuse", "torture",
    "bomb", "explosion", "attack",
    // drugs
    "cocaine", "heroin", "meth", "crack", "weed", "marijuana", "drugs", "dealer", "pusher",
    // impersonation and spam
    "admin", "moderator", "official", "staff", "bot", "advertisement", "promotion", "scam",
    "phishing",
    // misspellings
    "fuk", "shyt", "btch", "azz", "phuck", "biatch", "n1gger", "n1gga", "f4ggot", "f4g",
    "sh1t", "fck",
];

/// Case-insensitive whole-word matcher over a banned word list, including the
/// common leet-speak spelling of each word.
#[derive(Debug, Clone)]
pub struct ProfanityFilter {
    patterns: RegexSet,
}

impl ProfanityFilter {
    pub fn new<'a, I>(words: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut patterns = Vec::new();
        for word in words {
            patterns.push(whole_word(word));
            let substituted = leet(word);
            if substituted != word {
                patterns.push(whole_word(&substituted));
            }
        }
        let patterns = RegexSetBuilder::new(patterns)
            .case_insensitive(true)
            .build()?;
        Ok(ProfanityFilter { patterns })
    }

    /// Filter over the built-in word list.
    pub fn standard() -> Result<Self, regex::Error> {
        Self::new(BANNED_WORDS.iter().copied())
    }

    pub fn is_inappropriate(&self, text: &str) -> bool {
        self.patterns.is_match(&text.trim().to_lowercase())
    }
}

fn whole_word(word: &str) -> String {
    format!(r"\b{}\b", regex::escape(word))
}

fn leet(word: &str) -> String {
    word.chars()
        .map(|c| match c {
            'a' => '@',
            'e' => '3',
            'i' => '1',
            'o' => '0',
            's' => '$',
            't' => '7',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_whole_words_in_any_case() {
        let filter = ProfanityFilter::standard().unwrap();
        assert!(filter.is_inappropriate("Total CRAP room"));
        assert!(filter.is_inappropriate("  piece of shit  "));
        assert!(!filter.is_inappropriate("Scrappy coders"));
        assert!(!filter.is_inappropriate("Rust meetup"));
    }

    #[test]
    fn catches_leet_substitutions() {
        let filter = ProfanityFilter::new(["nude", "toast"]).unwrap();
        assert!(filter.is_inappropriate("nud3 pics"));
        assert!(filter.is_inappropriate("french 70@$7"));
        assert!(!filter.is_inappropriate("nudge"));
    }

    #[test]
    fn empty_list_allows_everything() {
        let filter = ProfanityFilter::new([]).unwrap();
        assert!(!filter.is_inappropriate("anything at all"));
    }
}
