/// A recognized buy instruction extracted from free text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuyIntent {
    pub quantity: u32,
    pub symbol: String,
}

/// Recognizes `buy <quantity> <symbol>` in free text.
///
/// This is a deliberately narrow heuristic: the leftmost match wins, and
/// anything it cannot read falls through to the general model path. It never
/// fails.
#[derive(Clone, Debug, Default)]
pub struct IntentExtractor;

impl IntentExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, text: &str) -> Option<BuyIntent> {
        let tokens = text.split_whitespace().collect::<Vec<_>>();
        for window in tokens.windows(3) {
            let [keyword, quantity, symbol] = window else { continue };
            if !is_buy_keyword(keyword) {
                continue;
            }
            let Some(quantity) = parse_quantity(quantity) else { continue };
            let Some(symbol) = parse_symbol(symbol) else { continue };
            return Some(BuyIntent { quantity, symbol });
        }
        None
    }
}

// The token must end in `buy` sitting on a word boundary: any non-word
// character may precede it (`re-buy` counts), a word character may not
// (`rebuy`, `_buy` do not).
fn is_buy_keyword(token: &str) -> bool {
    let mut chars = token.chars().rev();
    let (Some(last), Some(mid), Some(first)) = (chars.next(), chars.next(), chars.next()) else {
        return false;
    };
    if !(first.eq_ignore_ascii_case(&'b')
        && mid.eq_ignore_ascii_case(&'u')
        && last.eq_ignore_ascii_case(&'y'))
    {
        return false;
    }
    !chars.next().is_some_and(is_word_char)
}

// Quantities wider than u32 are not representable as an order here; such
// text falls through to the model path instead of matching.
fn parse_quantity(token: &str) -> Option<u32> {
    if token.is_empty() || !token.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

// Symbol is a leading run of 1-10 ASCII letters; the run must end on a word
// boundary, so `MSFT.` matches as MSFT while `MSFT123` does not match at all.
fn parse_symbol(token: &str) -> Option<String> {
    let letters = token.chars().take_while(|c| c.is_ascii_alphabetic()).count();
    if letters == 0 || letters > 10 {
        return None;
    }
    let rest = &token[letters..];
    if rest.chars().next().is_some_and(is_word_char) {
        return None;
    }
    Some(token[..letters].to_ascii_uppercase())
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
