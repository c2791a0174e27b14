use common::Tier;

/// Upper bound of the additive score.
pub const MAX_SCORE: u32 = 150;

/// Stop distance (percent) below which a setup is considered noise.
const MIN_STOP_PCT: f64 = 0.10;

/// Boolean/numeric gates collected by the analyzer for one candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityGates {
    pub has_leg: bool,
    pub spike_ok: bool,
    pub sweep_ok: bool,
    pub htf_ok: bool,
    pub good_rr: bool,
    pub stop_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality {
    pub score: u32,
    pub tier: Tier,
    pub should_send: bool,
}

fn stop_in_range(stop_pct: f64, max_stop_pct: f64) -> bool {
    (MIN_STOP_PCT..=max_stop_pct).contains(&stop_pct)
}

/// Additive score, capped at [`MAX_SCORE`].
pub fn score(gates: &QualityGates, max_stop_pct: f64) -> u32 {
    let points = [
        (gates.has_leg, 20),
        (gates.spike_ok, 30),
        (gates.sweep_ok, 15),
        (gates.htf_ok, 15),
        (gates.good_rr, 10),
        (stop_in_range(gates.stop_pct, max_stop_pct), 10),
    ];
    let total: u32 = points.iter().filter(|(ok, _)| *ok).map(|(_, p)| p).sum();
    total.min(MAX_SCORE)
}

pub fn tier_from_score(score: u32) -> Tier {
    match score {
        s if s >= 120 => Tier::APlus,
        s if s >= 100 => Tier::A,
        s if s >= 80 => Tier::B,
        _ => Tier::None,
    }
}

/// Score, tier, and the send decision.
///
/// The hard gates (spike, HTF, reward:risk, stop range) veto emission no
/// matter how high the score is; otherwise the tier must reach `min_tier`.
pub fn evaluate(gates: &QualityGates, max_stop_pct: f64, min_tier: Tier) -> Quality {
    let score = score(gates, max_stop_pct);
    let tier = tier_from_score(score);

    let hard_ok = gates.spike_ok
        && gates.htf_ok
        && gates.good_rr
        && stop_in_range(gates.stop_pct, max_stop_pct);

    Quality {
        score,
        tier,
        should_send: hard_ok && tier >= min_tier,
    }
}
