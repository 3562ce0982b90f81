//! Refund policy engine
//!
//! A pure, deterministic decision: given the original payment and a refund
//! amount, how many tokens does the ledger claw back? The processor never
//! decides this itself; it computes the policy inputs and passes the result
//! to the ledger.

use tally_core::config::RefundPolicyMode;
use tally_core::models::Payment;

/// Result of a refund policy evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundCalculation {
    /// Tokens the ledger should deduct
    pub tokens_to_deduct: i64,
    /// False when the policy refuses the clawback (the money may still move)
    pub refund_allowed: bool,
    /// Mode that produced this calculation
    pub policy: RefundPolicyMode,
}

/// Tokens proportional to the refunded share of the payment, floored.
///
/// `floor(credited_tokens * refund_cents / amount_cents)`; a payment with a
/// non-positive amount yields zero.
pub fn proportional_tokens(payment: &Payment, refund_amount_cents: i64) -> i64 {
    if payment.amount_cents <= 0 || refund_amount_cents <= 0 {
        return 0;
    }
    let raw = (payment.credited_tokens as i128 * refund_amount_cents as i128)
        / payment.amount_cents as i128;
    (raw as i64).min(payment.credited_tokens)
}

/// Evaluate the process-wide refund policy.
///
/// `committed_since_purchase` is the sum of COMMIT journal rows for the user
/// since the payment was created, the "tokens spent" input for the capping
/// and blocking modes.
pub fn calculate(
    mode: RefundPolicyMode,
    payment: &Payment,
    refund_amount_cents: i64,
    committed_since_purchase: i64,
) -> RefundCalculation {
    let proportional = proportional_tokens(payment, refund_amount_cents);

    match mode {
        RefundPolicyMode::AllowNegativeBalance => RefundCalculation {
            tokens_to_deduct: proportional,
            refund_allowed: true,
            policy: mode,
        },
        RefundPolicyMode::CapByUnspentTokens => {
            let unspent = (payment.credited_tokens - committed_since_purchase).max(0);
            let capped = proportional.min(unspent);
            RefundCalculation {
                tokens_to_deduct: capped,
                // The money moves regardless; a zero cap means nothing is
                // clawed back and the caller should surface that.
                refund_allowed: !(proportional > 0 && capped == 0),
                policy: mode,
            }
        }
        RefundPolicyMode::BlockIfTokensSpent => {
            if committed_since_purchase > 0 {
                RefundCalculation {
                    tokens_to_deduct: 0,
                    refund_allowed: false,
                    policy: mode,
                }
            } else {
                RefundCalculation {
                    tokens_to_deduct: proportional,
                    refund_allowed: true,
                    policy: mode,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use tally_core::models::PaymentStatus;
    use uuid::Uuid;

    fn payment(amount_cents: i64, credited_tokens: i64) -> Payment {
        let now = Utc::now();
        Payment {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            provider_session_id: "cs_1".to_string(),
            provider_payment_intent_id: Some("pi_1".to_string()),
            amount_cents,
            currency: "usd".to_string(),
            credited_tokens,
            refunded_amount_cents: 0,
            status: PaymentStatus::Succeeded,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_proportional_floor() {
        // 1000 tokens for 1000 cents: a 333-cent refund claws back 333 tokens
        let p = payment(1000, 1000);
        assert_eq!(proportional_tokens(&p, 333), 333);

        // floor: 100 tokens for 999 cents, 500-cent refund -> 50.05 -> 50
        let p = payment(999, 100);
        assert_eq!(proportional_tokens(&p, 500), 50);
    }

    #[test]
    fn test_proportional_guards() {
        let p = payment(0, 1000);
        assert_eq!(proportional_tokens(&p, 500), 0);

        let p = payment(1000, 1000);
        assert_eq!(proportional_tokens(&p, 0), 0);
        assert_eq!(proportional_tokens(&p, -5), 0);
    }

    #[test]
    fn test_full_refund_equals_credited() {
        let p = payment(1000, 750);
        assert_eq!(proportional_tokens(&p, 1000), 750);
    }

    #[test]
    fn test_allow_negative_balance_mode() {
        let p = payment(1000, 1000);
        let calc = calculate(RefundPolicyMode::AllowNegativeBalance, &p, 333, 900);
        assert_eq!(calc.tokens_to_deduct, 333);
        assert!(calc.refund_allowed);
    }

    #[test]
    fn test_cap_by_unspent_under_cap() {
        // 300 committed since purchase -> 700 unspent, 333 fits
        let p = payment(1000, 1000);
        let calc = calculate(RefundPolicyMode::CapByUnspentTokens, &p, 333, 300);
        assert_eq!(calc.tokens_to_deduct, 333);
        assert!(calc.refund_allowed);
    }

    #[test]
    fn test_cap_by_unspent_binds() {
        let p = payment(1000, 1000);
        let calc = calculate(RefundPolicyMode::CapByUnspentTokens, &p, 800, 600);
        assert_eq!(calc.tokens_to_deduct, 400);
        assert!(calc.refund_allowed);
    }

    #[test]
    fn test_cap_exhausted_disallows() {
        // Everything already spent: money may move, zero tokens claw back
        let p = payment(1000, 1000);
        let calc = calculate(RefundPolicyMode::CapByUnspentTokens, &p, 500, 1000);
        assert_eq!(calc.tokens_to_deduct, 0);
        assert!(!calc.refund_allowed);
    }

    #[test]
    fn test_block_if_tokens_spent() {
        let p = payment(1000, 1000);

        let calc = calculate(RefundPolicyMode::BlockIfTokensSpent, &p, 500, 1);
        assert_eq!(calc.tokens_to_deduct, 0);
        assert!(!calc.refund_allowed);

        let calc = calculate(RefundPolicyMode::BlockIfTokensSpent, &p, 500, 0);
        assert_eq!(calc.tokens_to_deduct, 500);
        assert!(calc.refund_allowed);
    }

    proptest! {
        #[test]
        fn prop_monotonic_in_refund_amount(
            amount_cents in 1i64..1_000_000,
            credited in 0i64..10_000_000,
            a in 0i64..1_000_000,
            b in 0i64..1_000_000,
        ) {
            let p = payment(amount_cents, credited);
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(proportional_tokens(&p, lo) <= proportional_tokens(&p, hi));
        }

        #[test]
        fn prop_full_refund_recovers_all_tokens(
            amount_cents in 1i64..1_000_000,
            credited in 0i64..10_000_000,
        ) {
            let p = payment(amount_cents, credited);
            prop_assert_eq!(proportional_tokens(&p, amount_cents), credited);
        }

        #[test]
        fn prop_bounded_by_credited_tokens(
            amount_cents in 1i64..1_000_000,
            credited in 0i64..10_000_000,
            refund in 0i64..2_000_000,
        ) {
            let p = payment(amount_cents, credited);
            let tokens = proportional_tokens(&p, refund);
            prop_assert!(tokens >= 0);
            prop_assert!(tokens <= credited);
        }

        #[test]
        fn prop_cap_mode_never_exceeds_unspent(
            amount_cents in 1i64..1_000_000,
            credited in 0i64..1_000_000,
            refund in 0i64..1_000_000,
            committed in 0i64..1_000_000,
        ) {
            let p = payment(amount_cents, credited);
            let calc = calculate(RefundPolicyMode::CapByUnspentTokens, &p, refund, committed);
            prop_assert!(calc.tokens_to_deduct <= (credited - committed).max(0));
        }
    }
}
