use std::borrow::Borrow;
use std::fmt;

/// Tokens with at least this many ASCII digits are treated as reference
/// numbers (order ids, card suffixes, store numbers) and dropped.
const ID_DIGITS: usize = 4;

/// Canonical form of a counterparty/description, used to match learned rules.
///
/// The only way to build one is through [`MerchantKey::normalize`], so every key
/// in the store went through the same normalization whether it came from a
/// transaction or from the rules file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MerchantKey(String);

impl MerchantKey {
    /// Returns `None` when nothing usable is left after normalization.
    pub fn normalize(description: &str) -> Option<MerchantKey> {
        let lowered = description.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .filter(|token| token.chars().filter(char::is_ascii_digit).count() < ID_DIGITS)
            .collect();

        if tokens.is_empty() {
            None
        } else {
            Some(MerchantKey(tokens.join(" ")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading characters used to narrow down similar keys.
    pub(crate) fn prefix(&self, chars: usize) -> &str {
        match self.0.char_indices().nth(chars) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl fmt::Display for MerchantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Lets the rule map be searched by plain string ranges.
impl Borrow<str> for MerchantKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}
