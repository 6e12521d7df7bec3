use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde::Serialize;
use tracing::debug;

use super::types::{AllowanceRules, Pounds, parse_amount};

/// Taper parameters keyed by the calendar year a tax year starts in.
///
/// Years missing from the table resolve to the `latest` entry, which is
/// guaranteed to be present.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesTable {
    years: BTreeMap<i32, AllowanceRules>,
    latest: i32,
}

impl RulesTable {
    /// Builds a table. Returns `None` when `latest` has no entry.
    pub fn new(years: BTreeMap<i32, AllowanceRules>, latest: i32) -> Option<Self> {
        years.contains_key(&latest).then_some(Self { years, latest })
    }

    /// UK annual allowance rules, 2016/17 through 2025/26.
    pub fn uk() -> Self {
        const PRE_2020: AllowanceRules = AllowanceRules {
            standard_allowance: 40_000,
            minimum_allowance: 10_000,
            threshold_income_limit: 110_000,
            adjusted_income_limit: 150_000,
        };
        const FROM_2020: AllowanceRules = AllowanceRules {
            standard_allowance: 40_000,
            minimum_allowance: 4_000,
            threshold_income_limit: 200_000,
            adjusted_income_limit: 240_000,
        };
        const FROM_2023: AllowanceRules = AllowanceRules {
            standard_allowance: 60_000,
            minimum_allowance: 10_000,
            threshold_income_limit: 200_000,
            adjusted_income_limit: 260_000,
        };

        let mut years = BTreeMap::new();
        for year in 2016..=2019 {
            years.insert(year, PRE_2020);
        }
        for year in 2020..=2022 {
            years.insert(year, FROM_2020);
        }
        for year in 2023..=2025 {
            years.insert(year, FROM_2023);
        }
        Self {
            years,
            latest: 2025,
        }
    }

    pub fn latest_year(&self) -> i32 {
        self.latest
    }

    pub fn latest(&self) -> &AllowanceRules {
        &self.years[&self.latest]
    }

    /// Rules for `tax_year`, falling back to the latest year's rules.
    pub fn rules_for(&self, tax_year: i32) -> &AllowanceRules {
        match self.years.get(&tax_year) {
            Some(rules) => rules,
            None => {
                debug!(tax_year, latest = self.latest, "no rules for tax year, using latest");
                self.latest()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.years.len()
    }

    pub fn is_empty(&self) -> bool {
        self.years.is_empty()
    }
}

/// Process-wide built-in UK table.
pub fn uk_rules() -> &'static RulesTable {
    static RULES: OnceLock<RulesTable> = OnceLock::new();
    RULES.get_or_init(RulesTable::uk)
}

/// Tapered annual allowance for one tax year.
///
/// No taper applies when threshold income is at or under its limit, or when
/// adjusted income is at or under its limit. Otherwise the standard allowance
/// drops by half the adjusted income above the limit (rounded down), never
/// below the minimum allowance.
pub fn resolve_tapered_allowance(
    rules: &RulesTable,
    threshold_income: &str,
    adjusted_income: &str,
    tax_year: i32,
) -> Pounds {
    taper(
        rules.rules_for(tax_year),
        parse_amount(threshold_income),
        parse_amount(adjusted_income),
    )
}

pub fn taper(
    rules: &AllowanceRules,
    threshold_income: Pounds,
    adjusted_income: Pounds,
) -> Pounds {
    if threshold_income <= rules.threshold_income_limit
        || adjusted_income <= rules.adjusted_income_limit
    {
        return rules.standard_allowance;
    }

    let reduction = (adjusted_income - rules.adjusted_income_limit) / 2;
    rules
        .standard_allowance
        .saturating_sub(reduction)
        .max(rules.minimum_allowance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    #[test]
    fn uk_table_covers_2016_to_2025_with_latest_2025() {
        let rules = RulesTable::uk();
        assert_eq!(rules.len(), 10);
        assert_eq!(rules.latest_year(), 2025);
        assert_eq!(rules.rules_for(2019).threshold_income_limit, 110_000);
        assert_eq!(rules.rules_for(2022).minimum_allowance, 4_000);
        assert_eq!(rules.rules_for(2023).standard_allowance, 60_000);
    }

    #[test]
    fn unknown_years_fall_back_to_latest_rules() {
        let rules = RulesTable::uk();
        assert_eq!(rules.rules_for(2031), rules.latest());
        assert_eq!(rules.rules_for(1999), rules.latest());
    }

    #[test]
    fn new_rejects_latest_without_entry() {
        let mut years = BTreeMap::new();
        years.insert(2024, *RulesTable::uk().latest());
        assert!(RulesTable::new(years.clone(), 2025).is_none());
        assert!(RulesTable::new(years, 2024).is_some());
    }

    #[test]
    fn income_at_threshold_limit_is_not_tapered() {
        let rules = RulesTable::uk();
        assert_eq!(
            resolve_tapered_allowance(&rules, "200000", "240000", 2020),
            40_000
        );
        assert_eq!(
            resolve_tapered_allowance(&rules, "200000", "900000", 2020),
            40_000
        );
    }

    #[test]
    fn clearing_either_income_test_exempts_from_taper() {
        let rules = RulesTable::uk();
        assert_eq!(
            resolve_tapered_allowance(&rules, "500000", "260000", 2024),
            60_000
        );
        assert_eq!(
            resolve_tapered_allowance(&rules, "150000", "500000", 2024),
            60_000
        );
    }

    #[test]
    fn taper_halves_excess_adjusted_income_rounding_down() {
        let rules = RulesTable::uk();
        assert_eq!(
            resolve_tapered_allowance(&rules, "290000", "330000", 2023),
            25_000
        );
        assert_eq!(
            resolve_tapered_allowance(&rules, "290000", "260003", 2023),
            59_999
        );
    }

    #[test]
    fn taper_is_floored_at_minimum_allowance() {
        let rules = RulesTable::uk();
        assert_eq!(
            resolve_tapered_allowance(&rules, "480000", "520000", 2024),
            10_000
        );
        assert_eq!(
            resolve_tapered_allowance(&rules, "400000", "400000", 2021),
            4_000
        );
    }

    #[test]
    fn malformed_income_counts_as_zero() {
        let rules = RulesTable::uk();
        assert_eq!(
            resolve_tapered_allowance(&rules, "", "not a number", 2023),
            60_000
        );
    }

    #[test]
    fn shared_table_is_the_uk_table() {
        assert_eq!(uk_rules(), &RulesTable::uk());
    }

    proptest! {
        #[test]
        fn prop_threshold_at_or_under_limit_keeps_standard_allowance(
            year in 2010i32..2035,
            threshold_fraction in 0.0f64..=1.0,
            adjusted in 0u64..2_000_000,
        ) {
            let rules = uk_rules();
            let limit = rules.rules_for(year).threshold_income_limit;
            let threshold = (limit as f64 * threshold_fraction).floor() as u64;
            let allowance = resolve_tapered_allowance(
                rules,
                &threshold.to_string(),
                &adjusted.to_string(),
                year,
            );
            prop_assert_eq!(allowance, rules.rules_for(year).standard_allowance);
        }

        #[test]
        fn prop_tapered_allowance_stays_between_minimum_and_standard(
            year in 2010i32..2035,
            threshold in 0u64..2_000_000,
            adjusted in 0u64..2_000_000,
        ) {
            let rules = uk_rules();
            let year_rules = rules.rules_for(year);
            let allowance = taper(year_rules, threshold, adjusted);
            prop_assert!(allowance >= year_rules.minimum_allowance);
            prop_assert!(allowance <= year_rules.standard_allowance);
        }
    }
}
