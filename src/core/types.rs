use serde::{Deserialize, Deserializer, Serialize};

/// Whole pounds sterling.
pub type Pounds = u64;

/// Taper parameters in force for one tax year.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowanceRules {
    pub standard_allowance: Pounds,
    pub minimum_allowance: Pounds,
    #[serde(alias = "thresholdLimit")]
    pub threshold_income_limit: Pounds,
    #[serde(alias = "adjustedLimit")]
    pub adjusted_income_limit: Pounds,
}

/// One draw this year made against a predecessor's unused allowance.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarryForwardDraw {
    pub from_year: i32,
    pub from_tax_year: String,
    pub amount: Pounds,
    /// Predecessor balance left once this draw was taken.
    pub remaining_after: Pounds,
}

/// Same draw as [`CarryForwardDraw`], tagged with how far back the source sits.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarryForwardUse {
    pub from_year: i32,
    pub from_tax_year: String,
    pub amount: Pounds,
    pub years_ago: u8,
}

/// Mirror of a draw, recorded on the year that was drawn from.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FutureUse {
    pub used_by_year: i32,
    pub used_by_tax_year: String,
    pub amount: Pounds,
}

/// A single tax year: caller inputs plus everything the engine derives from them.
///
/// `id` is the calendar year the tax year starts in. Inputs are kept as the
/// decimal text the caller typed; blank or malformed text counts as zero.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearRecord {
    pub id: i32,
    #[serde(default)]
    pub tax_year: String,

    #[serde(default, deserialize_with = "amount_text")]
    pub threshold_income: String,
    #[serde(default, deserialize_with = "amount_text")]
    pub adjusted_income: String,
    #[serde(default, deserialize_with = "amount_text")]
    pub contribution: String,

    #[serde(default)]
    pub tapered_allowance: Pounds,
    #[serde(default)]
    pub shortfall: Pounds,
    #[serde(default)]
    pub carry_forward_available: Pounds,

    #[serde(default)]
    pub carry_forward_used: Pounds,
    #[serde(default)]
    pub carry_forward_remaining: Pounds,
    #[serde(default)]
    pub carry_forward_breakdown: Vec<CarryForwardDraw>,
    #[serde(default)]
    pub carry_forward_used_breakdown: Vec<CarryForwardUse>,
    #[serde(default)]
    pub carry_forward_used_by_future: Vec<FutureUse>,
    #[serde(default)]
    pub carry_forward_available_from_previous: Pounds,
    #[serde(default)]
    pub can_use_this_year: Pounds,
    #[serde(default)]
    pub missing_year_warning: bool,
    #[serde(default)]
    pub missing_years: Vec<i32>,
}

impl YearRecord {
    /// Blank record for `id` with every allowance figure set to the year's
    /// standard allowance.
    pub fn new(rules: &AllowanceRules, id: i32) -> Self {
        Self {
            id,
            tax_year: tax_year_label(id),
            threshold_income: String::new(),
            adjusted_income: String::new(),
            contribution: String::new(),
            tapered_allowance: rules.standard_allowance,
            shortfall: 0,
            carry_forward_available: 0,
            carry_forward_used: 0,
            carry_forward_remaining: 0,
            carry_forward_breakdown: Vec::new(),
            carry_forward_used_breakdown: Vec::new(),
            carry_forward_used_by_future: Vec::new(),
            carry_forward_available_from_previous: 0,
            can_use_this_year: rules.standard_allowance,
            missing_year_warning: false,
            missing_years: Vec::new(),
        }
    }

    pub fn contribution_amount(&self) -> Pounds {
        parse_amount(&self.contribution)
    }

    /// Allowance left after this year's contribution. Negative when the
    /// contribution exceeds everything usable this year.
    pub fn unused_allowance(&self) -> i64 {
        to_signed(self.can_use_this_year) - to_signed(self.contribution_amount())
    }

    pub fn is_over_contribution(&self) -> bool {
        self.contribution_amount() > self.can_use_this_year
    }

    pub fn excess_contribution(&self) -> Pounds {
        self.contribution_amount()
            .saturating_sub(self.can_use_this_year)
    }

    pub fn carry_forward_used_by_future_total(&self) -> Pounds {
        self.carry_forward_used_by_future
            .iter()
            .map(|entry| entry.amount)
            .sum()
    }
}

/// `2020` -> `"2020/21"`.
pub fn tax_year_label(id: i32) -> String {
    format!("{}/{:02}", id, (i64::from(id) + 1).rem_euclid(100))
}

/// Lenient decimal parse to whole pounds.
///
/// Reads the longest numeric prefix after leading whitespace (`"42abc"` is 42)
/// and rounds half up. Blank, non-numeric, non-finite and negative input is 0.
pub fn parse_amount(text: &str) -> Pounds {
    let value = numeric_prefix(text.trim_start())
        .and_then(|prefix| prefix.parse::<f64>().ok())
        .unwrap_or(0.0);
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    let rounded = (value + 0.5).floor();
    if rounded >= Pounds::MAX as f64 {
        Pounds::MAX
    } else {
        rounded as Pounds
    }
}

fn numeric_prefix(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let int_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    let mut digits = end - int_start;
    if bytes.get(end) == Some(&b'.') {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while bytes.get(frac_end).is_some_and(u8::is_ascii_digit) {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        if digits > 0 {
            end = frac_end;
        }
    }
    if digits == 0 {
        return None;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }
    Some(&text[..end])
}

fn to_signed(amount: Pounds) -> i64 {
    i64::try_from(amount).unwrap_or(i64::MAX)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAmount {
    Text(String),
    Number(serde_json::Number),
    Missing(()),
}

/// Accepts `"1200"`, `1200`, `1200.5` or `null` and keeps the textual form.
pub(crate) fn amount_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match RawAmount::deserialize(deserializer)? {
        RawAmount::Text(text) => text,
        RawAmount::Number(number) => number.to_string(),
        RawAmount::Missing(()) => String::new(),
    })
}
