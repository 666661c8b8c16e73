use crate::models::price_tier::PriceTier;

/// Price of the first tier, by ascending lower bound, whose inclusive range holds `weight`.
pub fn price_for_weight(
    tiers: &[PriceTier],
    weight: f64,
) -> Option<f64> {
    let mut ordered: Vec<&PriceTier> = tiers.iter().collect();
    ordered.sort_by(|a, b| {
        a.min_weight
            .unwrap_or(0.0)
            .total_cmp(&b.min_weight.unwrap_or(0.0))
            .then(a.id.cmp(&b.id))
    });

    ordered
        .into_iter()
        .filter(|tier| matches!(tier.price, Some(price) if price > 0.0))
        .find(|tier| tier.contains(weight))
        .and_then(|tier| tier.price)
}

/// Price to charge for a request: the stored total, falling back to the tiers.
pub fn resolve_total_price(
    stored_total: Option<f64>,
    weight: Option<f64>,
    tiers: &[PriceTier],
) -> Option<f64> {
    stored_total.or_else(|| weight.and_then(|w| price_for_weight(tiers, w)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(id: i64, min: Option<f64>, max: Option<f64>, price: Option<f64>) -> PriceTier {
        PriceTier {
            id,
            min_weight: min,
            max_weight: max,
            price,
        }
    }

    fn tiers() -> Vec<PriceTier> {
        vec![
            tier(3, Some(10.0), None, Some(90.0)),
            tier(1, Some(0.0), Some(5.0), Some(20.0)),
            tier(2, Some(5.0), Some(10.0), Some(45.0)),
        ]
    }

    #[test]
    fn picks_tier_containing_weight() {
        assert_eq!(price_for_weight(&tiers(), 2.5), Some(20.0));
        assert_eq!(price_for_weight(&tiers(), 7.0), Some(45.0));
        assert_eq!(price_for_weight(&tiers(), 40.0), Some(90.0));
    }

    #[test]
    fn shared_boundary_goes_to_lower_tier() {
        assert_eq!(price_for_weight(&tiers(), 5.0), Some(20.0));
    }

    #[test]
    fn no_matching_tier_yields_none() {
        let tiers = vec![tier(1, Some(1.0), Some(2.0), Some(10.0))];
        assert_eq!(price_for_weight(&tiers, 0.5), None);
        assert_eq!(price_for_weight(&[], 1.0), None);
    }

    #[test]
    fn tiers_without_price_are_ignored() {
        let tiers = vec![
            tier(1, Some(0.0), Some(10.0), None),
            tier(2, Some(0.0), Some(20.0), Some(30.0)),
        ];
        assert_eq!(price_for_weight(&tiers, 3.0), Some(30.0));
    }

    #[test]
    fn zero_priced_tiers_are_ignored() {
        let tiers = vec![
            tier(1, Some(0.0), Some(10.0), Some(0.0)),
            tier(2, Some(0.0), Some(20.0), Some(30.0)),
        ];
        assert_eq!(price_for_weight(&tiers, 3.0), Some(30.0));
        assert_eq!(price_for_weight(&tiers[..1], 3.0), None);
    }

    #[test]
    fn stored_total_wins_over_tiers() {
        assert_eq!(resolve_total_price(Some(12.0), Some(2.0), &tiers()), Some(12.0));
        assert_eq!(resolve_total_price(None, Some(2.0), &tiers()), Some(20.0));
        assert_eq!(resolve_total_price(None, None, &tiers()), None);
    }
}
