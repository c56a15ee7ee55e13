use serde::{Deserialize, Serialize};

use super::domain::{DiscountPolicy, PolicyId, ValueType};

/// One policy's contribution to a quoted fee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedDiscount {
    pub policy_id: PolicyId,
    pub name: String,
    pub amount: f64,
    pub value_type: ValueType,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscountQuote {
    pub amount: f64,
    pub applied_policies: Vec<AppliedDiscount>,
}

/// Raw policy amount for a fee, floored at zero and capped by `max_amount`.
pub fn policy_amount(policy: &DiscountPolicy, fee_total: f64) -> f64 {
    let raw = match policy.value_type {
        ValueType::Percent => fee_total * policy.value / 100.0,
        ValueType::Fixed => policy.value,
    };
    let non_negative = raw.max(0.0);
    match policy.max_amount {
        Some(cap) => non_negative.min(cap.max(0.0)),
        None => non_negative,
    }
}

/// Apply allowed policies in the given order until the fee is exhausted.
///
/// A non-stackable policy only applies when nothing has been applied yet, and ends the
/// pass once it does.
pub fn stack_discounts<'a, I>(fee_total: f64, allowed: I) -> DiscountQuote
where
    I: IntoIterator<Item = &'a DiscountPolicy>,
{
    let mut quote = DiscountQuote::default();
    if fee_total <= 0.0 {
        return quote;
    }

    for policy in allowed {
        if !policy.stackable && quote.amount > 0.0 {
            continue;
        }

        let amount = policy_amount(policy, fee_total);
        if amount <= 0.0 {
            continue;
        }

        let remaining = (fee_total - quote.amount).max(0.0);
        if remaining <= 0.0 {
            break;
        }

        let applied = amount.min(remaining);
        quote.amount += applied;
        quote.applied_policies.push(AppliedDiscount {
            policy_id: policy.id.clone(),
            name: policy.name.clone(),
            amount: applied,
            value_type: policy.value_type,
            value: policy.value,
        });

        if !policy.stackable {
            break;
        }
    }

    quote
}
