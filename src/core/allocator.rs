use super::types::{
    CarryForwardDraw, CarryForwardUse, FutureUse, Pounds, YearRecord, tax_year_label,
};

/// How many preceding positions a year may draw unused allowance from.
pub const CARRY_FORWARD_YEARS: usize = 3;

/// Recomputes every derived field and allocates each year's shortfall against
/// the unused allowance of up to three preceding entries.
///
/// `years` must be sorted ascending by `id`. Lookback is by list position, not
/// by date: a gap in the ids is reported through `missing_years` but the
/// entry sitting three positions back is still drawn from.
pub fn allocate_carry_forward(mut years: Vec<YearRecord>) -> Vec<YearRecord> {
    for year in &mut years {
        reset_year(year);
    }

    for index in 0..years.len() {
        let (earlier, rest) = years.split_at_mut(index);
        let current = &mut rest[0];
        allocate_year(earlier, current);
    }

    for index in 0..years.len() {
        let missing_years = missing_predecessors(&years, index);
        let year = &mut years[index];
        year.can_use_this_year = year
            .tapered_allowance
            .saturating_add(year.carry_forward_available_from_previous);
        year.missing_year_warning = !missing_years.is_empty();
        year.missing_years = missing_years;
    }

    years
}

fn reset_year(year: &mut YearRecord) {
    let contribution = year.contribution_amount();
    year.shortfall = contribution.saturating_sub(year.tapered_allowance);
    year.carry_forward_available = year.tapered_allowance.saturating_sub(contribution);
    year.carry_forward_used = 0;
    year.carry_forward_remaining = year.carry_forward_available;
    year.carry_forward_breakdown.clear();
    year.carry_forward_used_breakdown.clear();
    year.carry_forward_used_by_future.clear();
    year.carry_forward_available_from_previous = 0;
    year.can_use_this_year = year.tapered_allowance;
    year.missing_year_warning = false;
    year.missing_years.clear();
}

fn allocate_year(earlier: &mut [YearRecord], current: &mut YearRecord) {
    current.carry_forward_available_from_previous = (1..=CARRY_FORWARD_YEARS)
        .filter_map(|back| predecessor(earlier, back))
        .map(|prev| earlier[prev].carry_forward_remaining)
        .fold(0, Pounds::saturating_add);

    let mut remaining_shortfall = current.shortfall;
    for back in (1..=CARRY_FORWARD_YEARS).rev() {
        if remaining_shortfall == 0 {
            break;
        }
        let Some(prev) = predecessor(earlier, back) else {
            continue;
        };
        let source = &mut earlier[prev];
        let to_use = remaining_shortfall.min(source.carry_forward_remaining);
        if to_use == 0 {
            continue;
        }

        source.carry_forward_remaining -= to_use;
        current.carry_forward_used += to_use;
        remaining_shortfall -= to_use;

        let from_tax_year = tax_year_label(source.id);
        current.carry_forward_breakdown.push(CarryForwardDraw {
            from_year: source.id,
            from_tax_year: from_tax_year.clone(),
            amount: to_use,
            remaining_after: source.carry_forward_remaining,
        });
        current.carry_forward_used_breakdown.push(CarryForwardUse {
            from_year: source.id,
            from_tax_year,
            amount: to_use,
            years_ago: back as u8,
        });
        source.carry_forward_used_by_future.push(FutureUse {
            used_by_year: current.id,
            used_by_tax_year: tax_year_label(current.id),
            amount: to_use,
        });
    }
}

fn predecessor(earlier: &[YearRecord], back: usize) -> Option<usize> {
    earlier.len().checked_sub(back)
}

/// Ids among the three preceding tax years that are not at their expected
/// list position. Years below `i32::MIN` are not reported.
fn missing_predecessors(years: &[YearRecord], index: usize) -> Vec<i32> {
    let id = years[index].id;
    (1..=CARRY_FORWARD_YEARS as i32)
        .filter_map(|back| {
            let expected = id.checked_sub(back)?;
            let present = index
                .checked_sub(back as usize)
                .is_some_and(|prev| years[prev].id == expected);
            (!present).then_some(expected)
        })
        .collect()
}
