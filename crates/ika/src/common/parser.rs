use anyhow::anyhow;
use chumsky::error::Simple;
use chumsky::primitive::end;
use chumsky::Parser;

// Parsing infrastructure
pub trait CharParser<T>: Parser<char, T, Error = Simple<char>> + Sized {
    fn parse_text(&self, input: &str) -> anyhow::Result<T> {
        self.parse(input)
            .map_err(|errors| anyhow!("{}", format_errors(input, errors)))
    }
}

impl<T, P> CharParser<T> for P where P: Parser<char, T, Error = Simple<char>> {}

/// Formats `chumsky` errors into a single-line message.
/// Currently it handles just the first error.
pub fn format_errors(input: &str, mut errors: Vec<Simple<char>>) -> String {
    assert!(!errors.is_empty());
    errors.truncate(1);
    let error = errors.pop().unwrap();
    let span = error.span();

    let found = match error.found() {
        Some(token) => format!("unexpected token `{token}`"),
        None => "unexpected end of input".to_string(),
    };
    let label = error
        .label()
        .map(|label| format!(" while parsing {label}"))
        .unwrap_or_default();
    let note = match error.reason() {
        chumsky::error::SimpleReason::Custom(message) => format!(": {message}"),
        _ => String::new(),
    };
    format!(
        "{found}{label} at {}..{} in {input:?}{note}",
        span.start, span.end
    )
}

/// Return a parser that will fail if there is any input following the text
/// parsed by the provided parser.
pub fn all_consuming<T>(parser: impl CharParser<T>) -> impl CharParser<T> {
    parser.then_ignore(end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chumsky::primitive::just;

    #[test]
    fn test_all_consuming_trailing_input() {
        assert!(all_consuming(just('a')).parse_text("ab").is_err());
        assert_eq!(all_consuming(just('a')).parse_text("a").unwrap(), 'a');
    }

    #[test]
    fn test_format_errors_empty_input() {
        let error = all_consuming(just('a')).parse_text("").unwrap_err();
        assert!(error.to_string().starts_with("unexpected end of input"));
    }
}
