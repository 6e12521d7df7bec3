mod allocator;
mod plan;
mod rules;
mod types;

pub use allocator::{CARRY_FORWARD_YEARS, allocate_carry_forward};
pub use plan::{PlanError, PlanSummary, TaxYearPlan, YearField, recalculate};
pub use rules::{RulesTable, resolve_tapered_allowance, taper, uk_rules};
pub(crate) use types::amount_text;
pub use types::{
    AllowanceRules, CarryForwardDraw, CarryForwardUse, FutureUse, Pounds, YearRecord,
    parse_amount, tax_year_label,
};
