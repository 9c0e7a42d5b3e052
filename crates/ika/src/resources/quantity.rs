use chumsky::primitive::{choice, filter, just};
use chumsky::Parser;

use crate::common::error::CacheError;
use crate::common::parser::{all_consuming, CharParser};
use crate::resources::CPU_RESOURCE_NAME;

/// Canonical units per declared unit of the given resource: CPUs are
/// accounted in milli-units, everything else in whole units (bytes for
/// byte-valued resources, plain counts for extended resources).
fn canonical_scale(resource: &str) -> i128 {
    if resource == CPU_RESOURCE_NAME {
        1000
    } else {
        1
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Suffix {
    Milli,
    Kilo,
    Mega,
    Giga,
    Tera,
    Peta,
    Exa,
    Kibi,
    Mebi,
    Gibi,
    Tebi,
    Pebi,
    Exbi,
}

impl Suffix {
    /// Multiplier expressed as a (numerator, denominator) pair.
    fn ratio(self) -> (i128, i128) {
        match self {
            Suffix::Milli => (1, 1000),
            Suffix::Kilo => (1_000, 1),
            Suffix::Mega => (1_000_000, 1),
            Suffix::Giga => (1_000_000_000, 1),
            Suffix::Tera => (1_000_000_000_000, 1),
            Suffix::Peta => (1_000_000_000_000_000, 1),
            Suffix::Exa => (1_000_000_000_000_000_000, 1),
            Suffix::Kibi => (1 << 10, 1),
            Suffix::Mebi => (1 << 20, 1),
            Suffix::Gibi => (1 << 30, 1),
            Suffix::Tebi => (1 << 40, 1),
            Suffix::Pebi => (1 << 50, 1),
            Suffix::Exbi => (1 << 60, 1),
        }
    }
}

struct RawQuantity {
    integral: String,
    fractional: String,
    suffix: Option<Suffix>,
}

fn parse_digits() -> impl CharParser<String> {
    filter(|c: &char| c.is_ascii_digit())
        .repeated()
        .at_least(1)
        .map(|digits| digits.into_iter().collect::<String>())
        .labelled("digits")
}

fn parse_suffix() -> impl CharParser<Suffix> {
    choice((
        just("Ki").to(Suffix::Kibi),
        just("Mi").to(Suffix::Mebi),
        just("Gi").to(Suffix::Gibi),
        just("Ti").to(Suffix::Tebi),
        just("Pi").to(Suffix::Pebi),
        just("Ei").to(Suffix::Exbi),
        just('m').to(Suffix::Milli),
        just('k').to(Suffix::Kilo),
        just('M').to(Suffix::Mega),
        just('G').to(Suffix::Giga),
        just('T').to(Suffix::Tera),
        just('P').to(Suffix::Peta),
        just('E').to(Suffix::Exa),
    ))
    .labelled("quantity suffix")
}

fn parse_raw_quantity() -> impl CharParser<RawQuantity> {
    let fraction = just('.').ignore_then(parse_digits());
    parse_digits()
        .then(fraction.or_not())
        .then(parse_suffix().or_not())
        .map(|((integral, fractional), suffix)| RawQuantity {
            integral,
            fractional: fractional.unwrap_or_default(),
            suffix,
        })
        .labelled("quantity")
}

// Enough for any value an i64 canonical amount can represent.
const MAX_QUANTITY_DIGITS: usize = 24;

fn invalid(resource: &str, reason: impl ToString) -> CacheError {
    CacheError::InvalidQuantity {
        resource: resource.to_string(),
        reason: reason.to_string(),
    }
}

/// Converts a declared decimal quantity (`"10"`, `"500m"`, `"8Gi"`) into the
/// canonical integer amount for the given resource. Amounts finer than one
/// canonical unit are rounded up.
pub fn parse_quantity(resource: &str, input: &str) -> crate::Result<i64> {
    let raw = all_consuming(parse_raw_quantity())
        .parse_text(input)
        .map_err(|error| invalid(resource, error))?;

    if raw.integral.len() + raw.fractional.len() > MAX_QUANTITY_DIGITS {
        return Err(invalid(resource, "too many digits"));
    }
    let mantissa = raw
        .integral
        .bytes()
        .chain(raw.fractional.bytes())
        .fold(0i128, |acc, digit| acc * 10 + i128::from(digit - b'0'));

    let (numerator, denominator) = raw.suffix.map_or((1, 1), Suffix::ratio);
    let denominator = denominator * 10i128.pow(raw.fractional.len() as u32);

    mantissa
        .checked_mul(numerator)
        .and_then(|value| value.checked_mul(canonical_scale(resource)))
        .and_then(|value| value.checked_add(denominator - 1))
        .map(|value| value / denominator)
        .and_then(|value| i64::try_from(value).ok())
        .ok_or_else(|| invalid(resource, "out of range"))
}

const BINARY_SUFFIXES: [(&str, i64); 6] = [
    ("Ei", 1 << 60),
    ("Pi", 1 << 50),
    ("Ti", 1 << 40),
    ("Gi", 1 << 30),
    ("Mi", 1 << 20),
    ("Ki", 1 << 10),
];

/// Renders a canonical amount back into a declared quantity. Used only when
/// surfacing usage outward.
pub fn format_quantity(resource: &str, amount: i64) -> String {
    if resource == CPU_RESOURCE_NAME {
        if amount % 1000 == 0 {
            return (amount / 1000).to_string();
        }
        return format!("{amount}m");
    }
    if amount != 0 {
        for (suffix, factor) in BINARY_SUFFIXES {
            if amount % factor == 0 {
                return format!("{}{suffix}", amount / factor);
            }
        }
    }
    amount.to_string()
}
