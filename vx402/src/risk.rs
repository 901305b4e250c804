//! Transfer risk heuristic.
//!
//! Produces a score in `[0.0, 1.0]` estimating the likelihood that a paying
//! address is problematic. The verifier rejects payments whose score exceeds
//! the configured threshold. The heuristic is deliberately conservative:
//! deep confirmation counts lower the score, unusually large transfers and
//! chains with cheaper spam raise it slightly.

use rust_decimal::Decimal;

use crate::chain::Chain;

const BASE_SCORE: f64 = 0.10;

/// Scores a transfer. Higher is riskier.
#[must_use]
pub fn score_transfer(
    amount: Decimal,
    confirmations: u64,
    required_confirmations: u64,
    chain: Chain,
) -> f64 {
    let mut score = BASE_SCORE;

    // Deep finality lowers the score.
    if confirmations >= required_confirmations.saturating_mul(3) {
        score -= 0.05;
    } else if confirmations >= required_confirmations.saturating_mul(2) {
        score -= 0.02;
    }

    // Outsized payments are unusual for a pay-per-call API.
    if amount > Decimal::ONE_HUNDRED {
        score += 0.10;
    } else if amount > Decimal::TEN {
        score += 0.05;
    }

    match chain {
        Chain::Ethereum => score -= 0.02,
        Chain::Solana => score += 0.02,
        _ => {}
    }

    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typical_payment_scores_low() {
        let score = score_transfer(Decimal::ONE, 6, 6, Chain::Base);
        assert!(score < 0.5, "score was {score}");
    }

    #[test]
    fn deep_confirmations_lower_score() {
        let shallow = score_transfer(Decimal::ONE, 6, 6, Chain::Base);
        let deep = score_transfer(Decimal::ONE, 18, 6, Chain::Base);
        assert!(deep < shallow);
    }

    #[test]
    fn large_amounts_raise_score() {
        let small = score_transfer(Decimal::ONE, 6, 6, Chain::Base);
        let large = score_transfer(Decimal::new(500, 0), 6, 6, Chain::Base);
        assert!(large > small);
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let score = score_transfer(Decimal::new(1_000_000, 0), 0, 128, Chain::Solana);
        assert!((0.0..=1.0).contains(&score));
    }
}
