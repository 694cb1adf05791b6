//! Order-aware version comparison.
//!
//! Versions that parse as semantic versions are ordered by the `semver`
//! crate. Anything else (`1.0.0.Final`, `2.3-beta-1`, `7`) falls back to a
//! tokenised comparison: numeric tokens compare numerically, qualifiers
//! compare by their well-known rank, and a release sorts after its
//! pre-release qualifiers.

use std::cmp::Ordering;

/// Compare two version strings.
pub fn compare(a: &str, b: &str) -> Ordering {
    if let (Ok(va), Ok(vb)) = (semver::Version::parse(a), semver::Version::parse(b)) {
        return va.cmp(&vb);
    }
    compare_tokens(&tokenize(a), &tokenize(b))
}

/// True when `candidate` is ordered strictly before `current`.
pub fn is_older(candidate: &str, current: &str) -> bool {
    compare(candidate, current) == Ordering::Less
}

/// Pick the highest version from a list.
pub fn latest<'a, I>(versions: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    versions.into_iter().max_by(|a, b| compare(a, b))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Number(u64),
    Qualifier(String),
}

fn tokenize(version: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut digits = false;

    let flush = |current: &mut String, digits: bool, tokens: &mut Vec<Token>| {
        if current.is_empty() {
            return;
        }
        let token = if digits {
            current
                .parse()
                .map(Token::Number)
                .unwrap_or_else(|_| Token::Qualifier(current.clone()))
        } else {
            Token::Qualifier(current.to_ascii_lowercase())
        };
        tokens.push(token);
        current.clear();
    };

    for c in version.chars() {
        if matches!(c, '.' | '-' | '_' | '+') {
            flush(&mut current, digits, &mut tokens);
            continue;
        }
        let is_digit = c.is_ascii_digit();
        if !current.is_empty() && is_digit != digits {
            flush(&mut current, digits, &mut tokens);
        }
        digits = is_digit;
        current.push(c);
    }
    flush(&mut current, digits, &mut tokens);

    // Trailing zeros and release markers carry no ordering information.
    while let Some(last) = tokens.last() {
        match last {
            Token::Number(0) => {
                tokens.pop();
            }
            Token::Qualifier(q) if qualifier_rank(q) == RELEASE_RANK => {
                tokens.pop();
            }
            _ => break,
        }
    }
    tokens
}

const RELEASE_RANK: u8 = 6;

fn qualifier_rank(qualifier: &str) -> u8 {
    match qualifier {
        "alpha" | "a" => 1,
        "beta" | "b" => 2,
        "milestone" | "m" => 3,
        "rc" | "cr" => 4,
        "snapshot" => 5,
        "" | "ga" | "final" | "release" => RELEASE_RANK,
        "sp" => 7,
        _ => 8,
    }
}

fn compare_tokens(a: &[Token], b: &[Token]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let ord = match (a.get(i), b.get(i)) {
            (Some(x), Some(y)) => compare_token(x, y),
            (Some(x), None) => compare_token(x, &padding_for(x)),
            (None, Some(y)) => compare_token(&padding_for(y), y),
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn padding_for(other: &Token) -> Token {
    match other {
        Token::Number(_) => Token::Number(0),
        Token::Qualifier(_) => Token::Qualifier(String::new()),
    }
}

fn compare_token(a: &Token, b: &Token) -> Ordering {
    match (a, b) {
        (Token::Number(x), Token::Number(y)) => x.cmp(y),
        (Token::Number(_), Token::Qualifier(_)) => Ordering::Greater,
        (Token::Qualifier(_), Token::Number(_)) => Ordering::Less,
        (Token::Qualifier(x), Token::Qualifier(y)) => qualifier_rank(x)
            .cmp(&qualifier_rank(y))
            .then_with(|| x.cmp(y)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semver_order() {
        assert_eq!(compare("1.0.0", "1.0.1"), Ordering::Less);
        assert_eq!(compare("1.0.1", "1.0.0"), Ordering::Greater);
        assert_eq!(compare("1.0.0-rc.1", "1.0.0"), Ordering::Less);
        assert_eq!(compare("2.0.0", "2.0.0"), Ordering::Equal);
    }

    #[test]
    fn tokenised_numeric_order() {
        assert_eq!(compare("1.10", "1.9"), Ordering::Greater);
        assert_eq!(compare("1.0", "1"), Ordering::Equal);
        assert_eq!(compare("7", "7.0.0.1"), Ordering::Less);
    }

    #[test]
    fn release_qualifiers() {
        assert_eq!(compare("1.0.0.Final", "1.0.0"), Ordering::Equal);
        assert_eq!(compare("1.0.0.Beta1", "1.0.0.Final"), Ordering::Less);
        assert_eq!(compare("2.3-alpha-2", "2.3-beta-1"), Ordering::Less);
        assert_eq!(compare("2.3.CR1", "2.3.GA"), Ordering::Less);
        assert_eq!(compare("2.3.SP1", "2.3"), Ordering::Greater);
    }

    #[test]
    fn older_and_latest() {
        assert!(is_older("1.0.0", "1.0.1"));
        assert!(!is_older("1.0.1", "1.0.1"));
        assert_eq!(latest(["1.0.0", "1.10.0", "1.9.3"]), Some("1.10.0"));
        assert_eq!(latest(Vec::<&str>::new()), None);
    }
}
