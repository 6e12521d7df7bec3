use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::allocator::allocate_carry_forward;
use super::rules::{RulesTable, resolve_tapered_allowance};
use super::types::{Pounds, YearRecord, tax_year_label};

/// Number of years before the current one a fresh plan starts with.
pub const SEEDED_PRIOR_YEARS: i32 = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("tax year {0} is not in the plan")]
    UnknownYear(i32),
    #[error("cannot remove {0}: a plan keeps at least one tax year")]
    LastYear(i32),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum YearField {
    ThresholdIncome,
    AdjustedIncome,
    Contribution,
}

impl fmt::Display for YearField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            YearField::ThresholdIncome => "thresholdIncome",
            YearField::AdjustedIncome => "adjustedIncome",
            YearField::Contribution => "contribution",
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub latest_year: i32,
    pub latest_tax_year: String,
    /// Carry-forward usable in the latest year on top of its own allowance.
    pub carry_forward_into_latest: Pounds,
    pub total_allowance_latest: Pounds,
    pub years_with_missing_predecessors: Vec<i32>,
    pub over_contributed_years: Vec<i32>,
}

/// Recomputes every tapered allowance from its incomes, then re-runs the
/// allocator over the whole list.
pub fn recalculate(rules: &RulesTable, mut years: Vec<YearRecord>) -> Vec<YearRecord> {
    for year in &mut years {
        year.tapered_allowance = resolve_tapered_allowance(
            rules,
            &year.threshold_income,
            &year.adjusted_income,
            year.id,
        );
    }
    allocate_carry_forward(years)
}

/// An ordered run of tax years with all derived figures kept current.
///
/// Every mutation re-runs the taper and the allocator from scratch.
#[derive(Clone, Debug)]
pub struct TaxYearPlan<'a> {
    rules: &'a RulesTable,
    years: Vec<YearRecord>,
}

impl<'a> TaxYearPlan<'a> {
    /// `current_year` and the three tax years before it, all blank.
    pub fn seeded(rules: &'a RulesTable, current_year: i32) -> Self {
        let years = (current_year.saturating_sub(SEEDED_PRIOR_YEARS)..=current_year)
            .map(|id| YearRecord::new(rules.rules_for(id), id))
            .collect();
        Self::with_years(rules, years)
    }

    /// Restores saved records. Sorts by id and keeps the first record for any
    /// repeated id. Derived fields are rebuilt from the inputs; an empty list
    /// falls back to a plan seeded at `current_year`.
    pub fn from_records(
        rules: &'a RulesTable,
        mut records: Vec<YearRecord>,
        current_year: i32,
    ) -> Self {
        if records.is_empty() {
            return Self::seeded(rules, current_year);
        }
        records.sort_by_key(|record| record.id);
        records.dedup_by_key(|record| record.id);
        Self::with_years(rules, records)
    }

    fn with_years(rules: &'a RulesTable, mut years: Vec<YearRecord>) -> Self {
        for year in &mut years {
            if year.tax_year.is_empty() {
                year.tax_year = tax_year_label(year.id);
            }
        }
        Self {
            rules,
            years: recalculate(rules, years),
        }
    }

    pub fn years(&self) -> &[YearRecord] {
        &self.years
    }

    pub fn year(&self, id: i32) -> Option<&YearRecord> {
        self.years.iter().find(|year| year.id == id)
    }

    pub fn into_years(self) -> Vec<YearRecord> {
        self.years
    }

    /// Appends the year after the latest one and returns its id, or `None`
    /// when the latest id is `i32::MAX`.
    pub fn add_later_year(&mut self) -> Option<i32> {
        let id = match self.years.last() {
            Some(year) => year.id.checked_add(1)?,
            None => self.rules.latest_year(),
        };
        self.insert_blank(id);
        Some(id)
    }

    /// Prepends the year before the earliest one and returns its id, or `None`
    /// when the earliest id is `i32::MIN`.
    pub fn add_earlier_year(&mut self) -> Option<i32> {
        let id = match self.years.first() {
            Some(year) => year.id.checked_sub(1)?,
            None => self.rules.latest_year().saturating_sub(SEEDED_PRIOR_YEARS + 1),
        };
        self.insert_blank(id);
        Some(id)
    }

    fn insert_blank(&mut self, id: i32) {
        let position = self.years.partition_point(|year| year.id < id);
        self.years
            .insert(position, YearRecord::new(self.rules.rules_for(id), id));
        debug!(tax_year = id, "added tax year");
        self.recompute();
    }

    pub fn remove_year(&mut self, id: i32) -> Result<YearRecord, PlanError> {
        let position = self.position(id)?;
        if self.years.len() <= 1 {
            return Err(PlanError::LastYear(id));
        }
        let removed = self.years.remove(position);
        debug!(tax_year = id, "removed tax year");
        self.recompute();
        Ok(removed)
    }

    /// Replaces one input. Income edits re-derive that year's tapered allowance.
    pub fn set_input(
        &mut self,
        id: i32,
        field: YearField,
        value: impl Into<String>,
    ) -> Result<&YearRecord, PlanError> {
        let position = self.position(id)?;
        let value = value.into();
        debug!(tax_year = id, %field, value = %value, "updating input");

        let year = &mut self.years[position];
        match field {
            YearField::ThresholdIncome => year.threshold_income = value,
            YearField::AdjustedIncome => year.adjusted_income = value,
            YearField::Contribution => year.contribution = value,
        }
        if field != YearField::Contribution {
            year.tapered_allowance = resolve_tapered_allowance(
                self.rules,
                &year.threshold_income,
                &year.adjusted_income,
                year.id,
            );
        }

        self.recompute();
        Ok(&self.years[position])
    }

    /// Latest-year totals plus the years a caller should warn about.
    pub fn summary(&self) -> Option<PlanSummary> {
        let latest = self.years.last()?;
        Some(PlanSummary {
            latest_year: latest.id,
            latest_tax_year: latest.tax_year.clone(),
            carry_forward_into_latest: latest
                .can_use_this_year
                .saturating_sub(latest.tapered_allowance),
            total_allowance_latest: latest.can_use_this_year,
            years_with_missing_predecessors: self
                .years
                .iter()
                .filter(|year| year.missing_year_warning)
                .map(|year| year.id)
                .collect(),
            over_contributed_years: self
                .years
                .iter()
                .filter(|year| year.is_over_contribution())
                .map(|year| year.id)
                .collect(),
        })
    }

    fn position(&self, id: i32) -> Result<usize, PlanError> {
        self.years
            .iter()
            .position(|year| year.id == id)
            .ok_or(PlanError::UnknownYear(id))
    }

    fn recompute(&mut self) {
        let years = std::mem::take(&mut self.years);
        self.years = allocate_carry_forward(years);
        debug!(years = self.years.len(), "recomputed carry forward");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rules::uk_rules;

    fn ids(plan: &TaxYearPlan<'_>) -> Vec<i32> {
        plan.years().iter().map(|year| year.id).collect()
    }

    fn fill(
        plan: &mut TaxYearPlan<'_>,
        id: i32,
        threshold: &str,
        adjusted: &str,
        contribution: &str,
    ) {
        plan.set_input(id, YearField::ThresholdIncome, threshold).expect("year in plan");
        plan.set_input(id, YearField::AdjustedIncome, adjusted).expect("year in plan");
        plan.set_input(id, YearField::Contribution, contribution).expect("year in plan");
    }

    #[test]
    fn seeded_plan_holds_current_and_three_prior_years() {
        let plan = TaxYearPlan::seeded(uk_rules(), 2023);
        assert_eq!(ids(&plan), [2020, 2021, 2022, 2023]);
        assert_eq!(plan.years()[0].tax_year, "2020/21");
        assert_eq!(plan.years()[3].tapered_allowance, 60_000);
        // Blank contributions leave every allowance unused.
        assert_eq!(plan.years()[3].carry_forward_available_from_previous, 120_000);
        assert_eq!(plan.years()[3].can_use_this_year, 180_000);
        assert!(!plan.years()[3].missing_year_warning);
    }

    #[test]
    fn adding_years_extends_both_ends() {
        let mut plan = TaxYearPlan::seeded(uk_rules(), 2023);
        assert_eq!(plan.add_later_year(), Some(2024));
        assert_eq!(plan.add_earlier_year(), Some(2019));
        assert_eq!(ids(&plan), [2019, 2020, 2021, 2022, 2023, 2024]);
        assert_eq!(plan.year(2019).map(|y| y.tapered_allowance), Some(40_000));
        assert!(!plan.year(2022).expect("present").missing_year_warning);
    }

    #[test]
    fn adding_years_stops_at_id_limits() {
        let mut plan = TaxYearPlan::seeded(uk_rules(), i32::MAX);
        assert_eq!(ids(&plan), [i32::MAX - 3, i32::MAX - 2, i32::MAX - 1, i32::MAX]);
        assert_eq!(plan.add_later_year(), None);
        assert_eq!(plan.years().len(), 4);
        assert_eq!(plan.years()[3].tax_year, "2147483647/48");

        let mut plan = TaxYearPlan::seeded(uk_rules(), i32::MIN);
        assert_eq!(ids(&plan), [i32::MIN]);
        assert_eq!(plan.add_earlier_year(), None);
        assert_eq!(plan.add_later_year(), Some(i32::MIN + 1));
    }

    #[test]
    fn remove_year_keeps_at_least_one() {
        let mut plan = TaxYearPlan::seeded(uk_rules(), 2023);
        for id in [2020, 2021, 2022] {
            plan.remove_year(id).expect("removable");
        }
        assert_eq!(plan.remove_year(2023), Err(PlanError::LastYear(2023)));
        assert_eq!(plan.remove_year(1990), Err(PlanError::UnknownYear(1990)));
        assert_eq!(ids(&plan), [2023]);
    }

    #[test]
    fn removing_a_middle_year_flags_the_gap() {
        let mut plan = TaxYearPlan::seeded(uk_rules(), 2023);
        plan.remove_year(2022).expect("removable");
        let latest = plan.year(2023).expect("present");
        assert!(latest.missing_years.contains(&2022));
    }

    #[test]
    fn income_edits_re_derive_tapered_allowance() {
        let mut plan = TaxYearPlan::seeded(uk_rules(), 2023);
        plan.set_input(2023, YearField::ThresholdIncome, "290000").expect("present");
        assert_eq!(plan.year(2023).map(|y| y.tapered_allowance), Some(60_000));
        let year = plan
            .set_input(2023, YearField::AdjustedIncome, "330000")
            .expect("present");
        assert_eq!(year.tapered_allowance, 25_000);
        assert_eq!(
            plan.set_input(2031, YearField::Contribution, "1"),
            Err(PlanError::UnknownYear(2031))
        );
    }

    #[test]
    fn filled_plan_reproduces_reference_scenario() {
        let mut plan = TaxYearPlan::seeded(uk_rules(), 2023);
        plan.add_later_year().expect("room after 2023");
        plan.add_later_year().expect("room after 2024");
        fill(&mut plan, 2020, "200000", "240000", "25000");
        fill(&mut plan, 2021, "140000", "160000", "25000");
        fill(&mut plan, 2022, "160000", "180000", "20000");
        fill(&mut plan, 2023, "290000", "330000", "44000");
        fill(&mut plan, 2024, "480000", "520000", "38500");
        fill(&mut plan, 2025, "400000", "500000", "0");

        let y2023 = plan.year(2023).expect("present");
        assert_eq!(y2023.carry_forward_used, 19_000);
        assert_eq!(y2023.can_use_this_year, 75_000);
        let y2024 = plan.year(2024).expect("present");
        assert_eq!(y2024.tapered_allowance, 10_000);
        assert_eq!(y2024.unused_allowance(), 2_500);

        let summary = plan.summary().expect("non-empty plan");
        assert_eq!(summary.latest_year, 2025);
        assert_eq!(summary.latest_tax_year, "2025/26");
        assert_eq!(summary.carry_forward_into_latest, 2_500);
        assert_eq!(summary.total_allowance_latest, 12_500);
        assert_eq!(summary.years_with_missing_predecessors, [2020, 2021, 2022]);
        assert!(summary.over_contributed_years.is_empty());
    }

    #[test]
    fn from_records_sorts_dedups_and_recomputes() {
        let rules = uk_rules();
        let mut late = YearRecord::new(rules.rules_for(2024), 2024);
        late.contribution = "70000".to_string();
        late.tax_year.clear();
        let mut early = YearRecord::new(rules.rules_for(2023), 2023);
        early.contribution = "50000".to_string();
        let duplicate = YearRecord::new(rules.rules_for(2023), 2023);

        let plan = TaxYearPlan::from_records(rules, vec![late, early, duplicate], 2030);
        assert_eq!(ids(&plan), [2023, 2024]);
        assert_eq!(plan.years()[0].contribution, "50000");
        assert_eq!(plan.years()[1].tax_year, "2024/25");
        assert_eq!(plan.years()[1].carry_forward_used, 10_000);
    }

    #[test]
    fn from_empty_records_seeds() {
        let plan = TaxYearPlan::from_records(uk_rules(), Vec::new(), 2025);
        assert_eq!(ids(&plan), [2022, 2023, 2024, 2025]);
    }

    #[test]
    fn over_contribution_is_summarised() {
        let mut plan = TaxYearPlan::seeded(uk_rules(), 2025);
        plan.set_input(2022, YearField::Contribution, "40000").expect("present");
        plan.set_input(2023, YearField::Contribution, "60000").expect("present");
        plan.set_input(2024, YearField::Contribution, "60000").expect("present");
        plan.set_input(2025, YearField::Contribution, "65000").expect("present");
        let summary = plan.summary().expect("non-empty plan");
        assert_eq!(summary.over_contributed_years, [2025]);
        assert_eq!(plan.year(2025).map(|y| y.excess_contribution()), Some(5_000));
    }
}
