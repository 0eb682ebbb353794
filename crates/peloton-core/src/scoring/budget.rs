// Prize-money distribution.
//
// Only the top half of the field earns. Position i of M eligible teams takes
// (M - i + 1) shares out of M(M+1)/2 of the pool, so the shares always sum to
// the pool.

use std::collections::HashMap;

/// Number of paid positions for `participants` teams: ceil(N/2), min 1.
pub fn eligible_positions(participants: usize) -> usize {
    participants.div_ceil(2).max(1)
}

/// Earning for 1-based `position` among `participants`, from `pool`.
pub fn proportional_earning(position: usize, participants: usize, pool: f64) -> f64 {
    let eligible = eligible_positions(participants);
    if position == 0 || position > eligible || participants == 0 {
        return 0.0;
    }
    let total_shares = (eligible * (eligible + 1) / 2) as f64;
    let shares = (eligible - position + 1) as f64;
    pool * shares / total_shares
}

/// Every paid position with its earning, best first.
pub fn preview_distribution(participants: usize, pool: f64) -> Vec<(usize, f64)> {
    if participants == 0 {
        return Vec::new();
    }
    (1..=eligible_positions(participants))
        .map(|pos| (pos, proportional_earning(pos, participants, pool)))
        .collect()
}

/// Budget after an earning and an expense, never negative.
pub fn apply_budget_change(current: f64, earning: f64, expense: f64) -> f64 {
    (current + earning - expense).max(0.0)
}

/// Rank `scores` (team id, points) and pay out `pool`.
///
/// Ties are broken by team id so repeated runs pay the same teams. Teams that
/// scored nothing never earn. Every participant counts toward the field size.
pub fn distribute_pool(scores: &[(String, u32)], pool: f64) -> HashMap<String, f64> {
    let mut ranked: Vec<&(String, u32)> = scores.iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let participants = ranked.len();
    ranked
        .into_iter()
        .enumerate()
        .filter(|(_, (_, points))| *points > 0)
        .filter_map(|(idx, (team_id, _))| {
            let earning = proportional_earning(idx + 1, participants, pool);
            (earning > 0.0).then(|| (team_id.clone(), earning))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn eligible_is_top_half_rounded_up() {
        assert_eq!(eligible_positions(0), 1);
        assert_eq!(eligible_positions(1), 1);
        assert_eq!(eligible_positions(4), 2);
        assert_eq!(eligible_positions(5), 3);
    }

    #[test]
    fn shares_sum_to_pool() {
        for n in 1..40 {
            let total: f64 = preview_distribution(n, 50.0).iter().map(|(_, e)| e).sum();
            assert!(approx(total, 50.0), "n={n} total={total}");
        }
    }

    #[test]
    fn six_teams_pay_three_positions() {
        // M = 3, shares 3/6, 2/6, 1/6
        assert!(approx(proportional_earning(1, 6, 30.0), 15.0));
        assert!(approx(proportional_earning(2, 6, 30.0), 10.0));
        assert!(approx(proportional_earning(3, 6, 30.0), 5.0));
        assert_eq!(proportional_earning(4, 6, 30.0), 0.0);
        assert_eq!(proportional_earning(0, 6, 30.0), 0.0);
    }

    #[test]
    fn budget_never_negative() {
        assert_eq!(apply_budget_change(3.0, 0.0, 5.5), 0.0);
        assert!(approx(apply_budget_change(3.0, 2.5, 1.0), 4.5));
    }

    #[test]
    fn distribute_skips_zero_scores_and_breaks_ties_by_id() {
        let scores = vec![
            ("b".to_string(), 40),
            ("a".to_string(), 40),
            ("c".to_string(), 0),
            ("d".to_string(), 0),
        ];
        let paid = distribute_pool(&scores, 20.0);
        // four participants, two paid positions: 2/3 and 1/3
        assert!(approx(paid["a"], 20.0 * 2.0 / 3.0));
        assert!(approx(paid["b"], 20.0 / 3.0));
        assert!(!paid.contains_key("c"));
    }
}
