//! Phase generation: shards a campaign's target assets into an
//! ordered sequence of [`Phase`] rows according to its rollout strategy.
//! Pure and deterministic — no I/O, so every boundary case is a
//! plain unit test.

use fleet_proto::{AssetId, CampaignId, CampaignCounts, CampaignStrategy, Phase, PhaseStatus, PhaseType};
use uuid::Uuid;

/// Cap on the number of waves a `rolling` strategy will ever produce —
/// an uncapped wave count is rejected; later waves are enlarged instead.
pub const MAX_ROLLING_WAVES: usize = 10;

fn new_phase(campaign_id: CampaignId, order: u32, name: impl Into<String>, phase_type: PhaseType, asset_ids: Vec<AssetId>, target_pct: u8) -> Phase {
    Phase {
        id: Uuid::new_v4(),
        campaign_id,
        order,
        name: name.into(),
        phase_type,
        status: PhaseStatus::Pending,
        asset_ids,
        target_pct,
        counts: CampaignCounts::default(),
        health_check_passed: None,
    }
}

fn ceil_div(n: usize, pct: u8) -> usize {
    ((n as u64 * pct as u64) as f64 / 100.0).ceil() as usize
}

/// Generates the phase plan for `asset_ids` under `strategy`. Returns zero
/// phases for an empty asset set. Every asset appears in exactly one phase;
/// `order` is contiguous starting at 1.
pub fn generate_phases(
    campaign_id: CampaignId,
    asset_ids: &[AssetId],
    strategy: CampaignStrategy,
    canary_pct: u8,
    wave_pct: u8,
) -> Vec<Phase> {
    if asset_ids.is_empty() {
        return Vec::new();
    }

    match strategy {
        CampaignStrategy::Immediate => vec![new_phase(campaign_id, 1, "Final", PhaseType::Final, asset_ids.to_vec(), 100)],
        CampaignStrategy::Canary => generate_canary(campaign_id, asset_ids, canary_pct),
        CampaignStrategy::Rolling => generate_rolling(campaign_id, asset_ids, wave_pct),
        CampaignStrategy::BlueGreen => generate_blue_green(campaign_id, asset_ids),
    }
}

fn generate_canary(campaign_id: CampaignId, asset_ids: &[AssetId], canary_pct: u8) -> Vec<Phase> {
    let n = asset_ids.len();
    let canary_size = ceil_div(n, canary_pct).max(1).min(n);
    let (canary, rest) = asset_ids.split_at(canary_size);

    let canary_target_pct = ((canary_size as f64 / n as f64) * 100.0).round() as u8;
    let mut phases = vec![new_phase(campaign_id, 1, "Canary", PhaseType::Canary, canary.to_vec(), canary_target_pct)];
    if !rest.is_empty() {
        phases.push(new_phase(campaign_id, 2, "Final", PhaseType::Final, rest.to_vec(), 100));
    }
    phases
}

fn generate_rolling(campaign_id: CampaignId, asset_ids: &[AssetId], wave_pct: u8) -> Vec<Phase> {
    let n = asset_ids.len();
    let mut wave_size = ceil_div(n, wave_pct).max(1);
    let mut num_waves = n.div_ceil(wave_size);
    if num_waves > MAX_ROLLING_WAVES {
        wave_size = n.div_ceil(MAX_ROLLING_WAVES);
        num_waves = n.div_ceil(wave_size);
    }
    debug_assert!(num_waves <= MAX_ROLLING_WAVES);

    let mut phases = Vec::with_capacity(num_waves);
    let mut idx = 0;
    let mut order = 1u32;
    while idx < n {
        let end = (idx + wave_size).min(n);
        let chunk = asset_ids[idx..end].to_vec();
        let is_last = end == n;
        let target_pct = ((chunk.len() as f64 / n as f64) * 100.0).round() as u8;
        let phase = if is_last {
            new_phase(campaign_id, order, "Final", PhaseType::Final, chunk, target_pct)
        } else {
            new_phase(campaign_id, order, format!("Wave {order}"), PhaseType::Wave, chunk, target_pct)
        };
        phases.push(phase);
        idx = end;
        order += 1;
    }
    phases
}

fn generate_blue_green(campaign_id: CampaignId, asset_ids: &[AssetId]) -> Vec<Phase> {
    let n = asset_ids.len();
    let blue_size = n / 2;
    if blue_size == 0 {
        // A single asset can't be split into two non-empty halves; treat it
        // as one final phase rather than emitting an empty Blue phase.
        return vec![new_phase(campaign_id, 1, "Green", PhaseType::Final, asset_ids.to_vec(), 100)];
    }
    let (blue, green) = asset_ids.split_at(blue_size);
    vec![
        new_phase(campaign_id, 1, "Blue", PhaseType::Wave, blue.to_vec(), 50),
        new_phase(campaign_id, 2, "Green", PhaseType::Final, green.to_vec(), 100),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<AssetId> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn empty_asset_set_yields_zero_phases() {
        let campaign_id = Uuid::new_v4();
        assert!(generate_phases(campaign_id, &[], CampaignStrategy::Canary, 5, 10).is_empty());
    }

    #[test]
    fn canary_single_asset_yields_one_canary_phase() {
        let campaign_id = Uuid::new_v4();
        let assets = ids(1);
        let phases = generate_phases(campaign_id, &assets, CampaignStrategy::Canary, 5, 10);
        assert_eq!(phases.len(), 1);
        assert_eq!(phases[0].phase_type, PhaseType::Canary);
        assert_eq!(phases[0].asset_ids, assets);
    }

    #[test]
    fn canary_100_assets_5_pct_splits_5_and_95() {
        let campaign_id = Uuid::new_v4();
        let assets = ids(100);
        let phases = generate_phases(campaign_id, &assets, CampaignStrategy::Canary, 5, 10);
        assert_eq!(phases.len(), 2);
        assert_eq!(phases[0].asset_ids.len(), 5);
        assert_eq!(phases[0].phase_type, PhaseType::Canary);
        assert_eq!(phases[1].asset_ids.len(), 95);
        assert_eq!(phases[1].phase_type, PhaseType::Final);
    }

    #[test]
    fn rolling_never_exceeds_ten_waves() {
        let campaign_id = Uuid::new_v4();
        let assets = ids(1000);
        // wave_pct=1 would naively produce 100 waves of 10 — must be capped.
        let phases = generate_phases(campaign_id, &assets, CampaignStrategy::Rolling, 5, 1);
        assert!(phases.len() <= MAX_ROLLING_WAVES);
        let total: usize = phases.iter().map(|p| p.asset_ids.len()).sum();
        assert_eq!(total, 1000);
    }

    #[test]
    fn rolling_last_wave_is_final() {
        let campaign_id = Uuid::new_v4();
        let assets = ids(25);
        let phases = generate_phases(campaign_id, &assets, CampaignStrategy::Rolling, 5, 10);
        assert_eq!(phases.last().unwrap().phase_type, PhaseType::Final);
        for p in &phases[..phases.len() - 1] {
            assert_eq!(p.phase_type, PhaseType::Wave);
        }
    }

    #[test]
    fn blue_green_splits_roughly_in_half() {
        let campaign_id = Uuid::new_v4();
        let assets = ids(11);
        let phases = generate_phases(campaign_id, &assets, CampaignStrategy::BlueGreen, 5, 10);
        assert_eq!(phases.len(), 2);
        assert_eq!(phases[0].asset_ids.len(), 5);
        assert_eq!(phases[1].asset_ids.len(), 6);
        assert_eq!(phases[1].phase_type, PhaseType::Final);
    }

    #[test]
    fn immediate_is_one_final_phase() {
        let campaign_id = Uuid::new_v4();
        let assets = ids(42);
        let phases = generate_phases(campaign_id, &assets, CampaignStrategy::Immediate, 5, 10);
        assert_eq!(phases.len(), 1);
        assert_eq!(phases[0].phase_type, PhaseType::Final);
        assert_eq!(phases[0].asset_ids.len(), 42);
    }

    #[test]
    fn every_asset_appears_in_exactly_one_phase_and_order_is_contiguous() {
        let campaign_id = Uuid::new_v4();
        let assets = ids(37);
        for strategy in [CampaignStrategy::Immediate, CampaignStrategy::Canary, CampaignStrategy::Rolling, CampaignStrategy::BlueGreen] {
            let phases = generate_phases(campaign_id, &assets, strategy, 10, 15);
            let mut seen = std::collections::HashSet::new();
            for p in &phases {
                for a in &p.asset_ids {
                    assert!(seen.insert(*a), "asset {a} appeared in more than one phase under {strategy:?}");
                }
            }
            assert_eq!(seen.len(), assets.len());
            let orders: Vec<u32> = phases.iter().map(|p| p.order).collect();
            let expected: Vec<u32> = (1..=phases.len() as u32).collect();
            assert_eq!(orders, expected);
        }
    }
}
