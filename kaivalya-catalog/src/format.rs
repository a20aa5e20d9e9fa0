use crate::currency::Currency;

/// Number formatting conventions for a display locale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    EnUs,
    EnGb,
    EnAu,
    EnIn,
    DeDe,
    FrFr,
    JaJp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SymbolPosition {
    Prefix,
    /// After the number, separated by a no-break space
    Suffix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grouping {
    Thousands,
    /// 12,34,567 (lakh/crore)
    Indian,
}

impl Locale {
    /// Parse a BCP 47 style tag. Unknown tags fall back to en-US, the way `Intl` picks a
    /// best-fit locale instead of failing.
    pub fn parse(tag: &str) -> Self {
        match tag.replace('_', "-").to_ascii_lowercase().as_str() {
            "en-gb" => Locale::EnGb,
            "en-au" => Locale::EnAu,
            "en-in" | "hi-in" => Locale::EnIn,
            "de" | "de-de" | "de-at" => Locale::DeDe,
            "fr" | "fr-fr" => Locale::FrFr,
            "ja" | "ja-jp" => Locale::JaJp,
            _ => Locale::EnUs,
        }
    }

    fn group_separator(&self) -> &'static str {
        match self {
            Locale::DeDe => ".",
            Locale::FrFr => "\u{202f}",
            _ => ",",
        }
    }

    fn decimal_separator(&self) -> &'static str {
        match self {
            Locale::DeDe | Locale::FrFr => ",",
            _ => ".",
        }
    }

    fn symbol_position(&self) -> SymbolPosition {
        match self {
            Locale::DeDe | Locale::FrFr => SymbolPosition::Suffix,
            _ => SymbolPosition::Prefix,
        }
    }

    fn grouping(&self) -> Grouping {
        match self {
            Locale::EnIn => Grouping::Indian,
            _ => Grouping::Thousands,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormatError {
    #[error("Unknown currency code: {0}")]
    UnknownCurrency(String),

    #[error("Amount is not a finite number")]
    NonFinite,

    #[error("Amount too large to format")]
    Overflow,
}

/// Format `amount` with `fraction_digits` decimals in the conventions of `locale`.
pub fn format_currency(
    amount: f64,
    currency: &Currency,
    locale: Locale,
    fraction_digits: u32,
) -> Result<String, FormatError> {
    if !amount.is_finite() {
        return Err(FormatError::NonFinite);
    }

    let scale = 10u128.pow(fraction_digits);
    let scaled = (amount.abs() * scale as f64).round();
    if scaled >= u64::MAX as f64 {
        return Err(FormatError::Overflow);
    }
    let scaled = scaled as u128;
    let whole = scaled / scale;
    let fraction = scaled % scale;

    let mut number = group_digits(&whole.to_string(), locale);
    if fraction_digits > 0 {
        number.push_str(locale.decimal_separator());
        number.push_str(&format!("{:0width$}", fraction, width = fraction_digits as usize));
    }

    let sign = if amount < 0.0 && scaled != 0 { "-" } else { "" };
    Ok(match locale.symbol_position() {
        SymbolPosition::Prefix => format!("{}{}{}", sign, currency.symbol, number),
        SymbolPosition::Suffix => format!("{}{}\u{a0}{}", sign, number, currency.symbol),
    })
}

/// The plain `symbol + rounded integer` rendering used when formatting fails.
/// Non-finite amounts render as zero.
pub fn fallback(symbol: &str, amount: f64) -> String {
    if !amount.is_finite() {
        return format!("{}0", symbol);
    }
    format!("{}{}", symbol, amount.round() as i64)
}

fn group_digits(digits: &str, locale: Locale) -> String {
    let sep = locale.group_separator();
    let len = digits.len();
    if len <= 3 {
        return digits.to_string();
    }

    let (head, tail) = digits.split_at(len - 3);
    let group = match locale.grouping() {
        Grouping::Thousands => 3,
        Grouping::Indian => 2,
    };

    let mut groups: Vec<&str> = Vec::new();
    let mut end = head.len();
    while end > 0 {
        let start = end.saturating_sub(group);
        groups.push(&head[start..end]);
        end = start;
    }
    groups.reverse();

    let mut out = groups.join(sep);
    out.push_str(sep);
    out.push_str(tail);
    out
}
