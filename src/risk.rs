use rust_decimal::Decimal;

use crate::types::{AcceptedSignal, RejectReason, Rejection, Setup, Verdict};

/// Final probability/RR acceptance policy. High-probability setups may run
/// at 1:1; anything below the probability bar must clear 1:2.
#[derive(Debug, Clone)]
pub struct RiskGate {
    probability_threshold: u8,
    rr_high_prob: Decimal,
    rr_low_prob: Decimal,
}

impl Default for RiskGate {
    fn default() -> Self {
        Self {
            probability_threshold: 65,
            rr_high_prob: Decimal::ONE,
            rr_low_prob: Decimal::from(2),
        }
    }
}

impl RiskGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probability is checked before RR, so the low-probability branch
    /// rejects under the probability reason when the relaxed RR bar also
    /// fails.
    pub fn validate(&self, probability: u8, risk_reward: Decimal) -> Result<(), Rejection> {
        if probability >= self.probability_threshold {
            if risk_reward < self.rr_high_prob {
                return Err(Rejection::new(
                    RejectReason::RrInsufficient,
                    format!(
                        "risk:reward {} below 1:1 minimum",
                        risk_reward.round_dp(2)
                    ),
                ));
            }
            return Ok(());
        }

        if risk_reward < self.rr_low_prob {
            return Err(Rejection::new(
                RejectReason::ProbabilityInsufficient,
                format!(
                    "probability {}% below 65% requires risk:reward of at least 1:2 (got {})",
                    probability,
                    risk_reward.round_dp(2)
                ),
            ));
        }
        Ok(())
    }

    /// Resolve a candidate setup into the final verdict. A non-positive risk
    /// or reward distance is a construction bug upstream and rejects here
    /// rather than dividing by zero.
    pub fn apply(&self, setup: Setup) -> Verdict {
        let risk = setup.risk();
        let reward = setup.reward();
        if risk <= Decimal::ZERO || reward <= Decimal::ZERO {
            return Verdict::reject(
                RejectReason::InvalidSetup,
                "setup has zero risk or reward distance",
            );
        }
        let rr = reward / risk;
        match self.validate(setup.probability, rr) {
            Ok(()) => Verdict::Signal(AcceptedSignal::from_setup(setup, rr)),
            Err(rejection) => Verdict::Rejected(rejection),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SetupKind, StrategyKind};

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_high_probability_rejects_below_one_to_one() {
        let gate = RiskGate::new();
        let err = gate.validate(70, dec("0.9")).unwrap_err();
        assert_eq!(err.reason_code, RejectReason::RrInsufficient);
        assert!(err.human_message.contains("1:1"));
    }

    #[test]
    fn test_high_probability_accepts_above_one_to_one() {
        let gate = RiskGate::new();
        assert!(gate.validate(70, dec("1.5")).is_ok());
        assert!(gate.validate(65, dec("1.0")).is_ok());
    }

    #[test]
    fn test_low_probability_accepts_at_two_to_one() {
        let gate = RiskGate::new();
        assert!(gate.validate(50, dec("2.5")).is_ok());
        assert!(gate.validate(64, dec("2.0")).is_ok());
    }

    #[test]
    fn test_low_probability_rejects_below_two_to_one() {
        let gate = RiskGate::new();
        let err = gate.validate(50, dec("1.5")).unwrap_err();
        assert_eq!(err.reason_code, RejectReason::ProbabilityInsufficient);
    }

    #[test]
    fn test_apply_computes_realized_rr() {
        let gate = RiskGate::new();
        let setup = Setup::new(
            SetupKind::Buy,
            dec("1.1000"),
            dec("1.0950"),
            dec("1.1100"),
            80,
            StrategyKind::StructureRetest,
            "retest",
        );
        match gate.apply(setup) {
            Verdict::Signal(sig) => assert_eq!(sig.risk_reward, dec("2")),
            Verdict::Rejected(r) => panic!("unexpected rejection: {}", r.human_message),
        }
    }

    #[test]
    fn test_apply_rejects_degenerate_setup() {
        let gate = RiskGate::new();
        // Bypass the constructor to model an upstream bug.
        let setup = Setup {
            kind: SetupKind::Buy,
            entry: dec("1.1000"),
            stop_loss: dec("1.1000"),
            take_profit: dec("1.1100"),
            probability: 90,
            strategy: StrategyKind::AiAdapter,
            reason: "broken".to_string(),
            estimated_duration: 1,
            fundamental: None,
        };
        match gate.apply(setup) {
            Verdict::Rejected(r) => assert_eq!(r.reason_code, RejectReason::InvalidSetup),
            Verdict::Signal(_) => panic!("degenerate setup must not pass"),
        }
    }
}
