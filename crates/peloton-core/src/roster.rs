// Roster construction and lineup rules.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use thiserror::Error;

use crate::config::TeamRules;
use crate::model::{Cyclist, CyclistCategory, TeamCyclist};

/// Result of checking whether a cyclist can join a roster.
#[derive(Debug, Clone, PartialEq)]
pub enum Eligibility {
    Eligible,
    TeamFull { max: usize },
    AlreadyInTeam,
    InsufficientBudget { available: f64, required: f64 },
    TooManyFromSameTeam { pro_team: String, max: usize },
    CategoryFull { category: CyclistCategory, max: usize },
    Unavailable,
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

impl fmt::Display for Eligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eligibility::Eligible => write!(f, "eligible"),
            Eligibility::TeamFull { max } => write!(f, "team already has {max} cyclists"),
            Eligibility::AlreadyInTeam => write!(f, "cyclist is already in the team"),
            Eligibility::InsufficientBudget {
                available,
                required,
            } => write!(f, "insufficient budget: {available:.1}M available, {required:.1}M required"),
            Eligibility::TooManyFromSameTeam { pro_team, max } => {
                write!(f, "already {max} cyclists from {pro_team}")
            }
            Eligibility::CategoryFull { category, max } => {
                write!(f, "category {category} is full ({max})")
            }
            Eligibility::Unavailable => write!(f, "cyclist is unavailable"),
        }
    }
}

/// Category short of its quota on a roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryDeficit {
    pub category: CyclistCategory,
    pub required: usize,
    pub actual: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositionCheck {
    Valid,
    Invalid(Vec<CategoryDeficit>),
}

#[derive(Debug, Error, PartialEq)]
pub enum RosterError {
    #[error("cannot add cyclist {cyclist_id}: {reason}")]
    Ineligible {
        cyclist_id: String,
        reason: Eligibility,
    },

    #[error("cyclist {0} is not in the roster")]
    NotInRoster(String),

    #[error("unknown cyclist {0}")]
    UnknownCyclist(String),

    #[error("at most {max} cyclists can be active, got {requested}")]
    TooManyActive { max: usize, requested: usize },

    #[error("captain {0} must be in the active lineup")]
    CaptainNotActive(String),

    #[error("an active lineup needs exactly one captain, found {0}")]
    CaptainCount(usize),

    #[error("roster is frozen while {race_name} is running")]
    Frozen { race_name: String },

    #[error("the squad is already built; change it with a transfer session")]
    SquadLocked,

    #[error("transfers must leave a full squad: {size} of {required} cyclists")]
    SquadIncomplete { size: usize, required: usize },
}

/// Check whether `candidate` can be bought into the roster.
///
/// Checks run in a fixed order and the first failure wins.
pub fn can_add_cyclist(
    rules: &TeamRules,
    budget: f64,
    members: &[TeamCyclist],
    cyclists: &HashMap<String, Cyclist>,
    candidate: &Cyclist,
) -> Eligibility {
    if candidate.disabled {
        return Eligibility::Unavailable;
    }
    if members.iter().any(|m| m.cyclist_id == candidate.id) {
        return Eligibility::AlreadyInTeam;
    }
    if members.len() >= rules.team_size {
        return Eligibility::TeamFull {
            max: rules.team_size,
        };
    }
    if candidate.price > budget {
        return Eligibility::InsufficientBudget {
            available: budget,
            required: candidate.price,
        };
    }

    let same_team = members
        .iter()
        .filter_map(|m| cyclists.get(&m.cyclist_id))
        .filter(|c| c.pro_team_id == candidate.pro_team_id)
        .count();
    if same_team >= rules.max_from_same_pro_team {
        return Eligibility::TooManyFromSameTeam {
            pro_team: candidate.pro_team_name.clone(),
            max: rules.max_from_same_pro_team,
        };
    }

    let quota = rules.categories.quota(candidate.category);
    let in_category = category_counts(members, cyclists)
        .get(&candidate.category)
        .copied()
        .unwrap_or(0);
    if in_category >= quota {
        return Eligibility::CategoryFull {
            category: candidate.category,
            max: quota,
        };
    }

    Eligibility::Eligible
}

pub fn category_counts(
    members: &[TeamCyclist],
    cyclists: &HashMap<String, Cyclist>,
) -> BTreeMap<CyclistCategory, usize> {
    let mut counts = BTreeMap::new();
    for c in members.iter().filter_map(|m| cyclists.get(&m.cyclist_id)) {
        *counts.entry(c.category).or_insert(0) += 1;
    }
    counts
}

/// Compare a roster's category counts against the quotas.
pub fn validate_composition(
    rules: &TeamRules,
    members: &[TeamCyclist],
    cyclists: &HashMap<String, Cyclist>,
) -> CompositionCheck {
    let counts = category_counts(members, cyclists);
    let deficits: Vec<CategoryDeficit> = CyclistCategory::ALL
        .iter()
        .filter_map(|cat| {
            let required = rules.categories.quota(*cat);
            let actual = counts.get(cat).copied().unwrap_or(0);
            (actual < required).then_some(CategoryDeficit {
                category: *cat,
                required,
                actual,
            })
        })
        .collect();

    if deficits.is_empty() {
        CompositionCheck::Valid
    } else {
        CompositionCheck::Invalid(deficits)
    }
}

/// Size and category balance of a roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SquadStatus {
    pub size: usize,
    pub required: usize,
    pub composition: CompositionCheck,
}

impl SquadStatus {
    /// Every quota met. Quotas sum to the team size, so this is also a full
    /// roster.
    pub fn is_complete(&self) -> bool {
        self.composition == CompositionCheck::Valid
    }
}

pub fn squad_status(
    rules: &TeamRules,
    members: &[TeamCyclist],
    cyclists: &HashMap<String, Cyclist>,
) -> SquadStatus {
    SquadStatus {
        size: members.len(),
        required: rules.team_size,
        composition: validate_composition(rules, members, cyclists),
    }
}

/// Enforce the lineup invariants on a stored roster.
pub fn validate_lineup(rules: &TeamRules, members: &[TeamCyclist]) -> Result<(), RosterError> {
    let active = members.iter().filter(|m| m.is_active).count();
    if active > rules.active_size {
        return Err(RosterError::TooManyActive {
            max: rules.active_size,
            requested: active,
        });
    }
    if let Some(benched) = members.iter().find(|m| m.is_captain && !m.is_active) {
        return Err(RosterError::CaptainNotActive(benched.cyclist_id.clone()));
    }
    let captains = members.iter().filter(|m| m.is_captain).count();
    if active > 0 && captains != 1 {
        return Err(RosterError::CaptainCount(captains));
    }
    Ok(())
}

/// Replace the active lineup and captain in one step.
///
/// On error `members` is left untouched.
pub fn apply_lineup(
    rules: &TeamRules,
    members: &mut [TeamCyclist],
    active_ids: &[String],
    captain_id: &str,
) -> Result<(), RosterError> {
    for id in active_ids.iter().map(String::as_str).chain([captain_id]) {
        if !members.iter().any(|m| m.cyclist_id == id) {
            return Err(RosterError::NotInRoster(id.to_string()));
        }
    }
    let mut unique: Vec<&String> = active_ids.iter().collect();
    unique.sort();
    unique.dedup();
    if unique.len() > rules.active_size {
        return Err(RosterError::TooManyActive {
            max: rules.active_size,
            requested: unique.len(),
        });
    }
    if !active_ids.iter().any(|id| id == captain_id) {
        return Err(RosterError::CaptainNotActive(captain_id.to_string()));
    }

    for m in members.iter_mut() {
        m.is_active = active_ids.contains(&m.cyclist_id);
        m.is_captain = m.cyclist_id == captain_id;
    }
    Ok(())
}

/// Move the captaincy to `cyclist_id`, clearing the previous captain.
pub fn set_captain(members: &mut [TeamCyclist], cyclist_id: &str) -> Result<(), RosterError> {
    let target = members
        .iter()
        .find(|m| m.cyclist_id == cyclist_id)
        .ok_or_else(|| RosterError::NotInRoster(cyclist_id.to_string()))?;
    if !target.is_active {
        return Err(RosterError::CaptainNotActive(cyclist_id.to_string()));
    }
    for m in members.iter_mut() {
        m.is_captain = m.cyclist_id == cyclist_id;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cyclist(id: &str, pro_team: &str, category: CyclistCategory, price: f64) -> Cyclist {
        Cyclist {
            id: id.into(),
            first_name: String::new(),
            last_name: id.into(),
            full_name: id.into(),
            pro_team_id: pro_team.into(),
            pro_team_name: pro_team.into(),
            nationality: "NL".into(),
            category,
            price,
            disabled: false,
        }
    }

    fn member(id: &str, active: bool, captain: bool) -> TeamCyclist {
        TeamCyclist {
            team_id: "t1".into(),
            cyclist_id: id.into(),
            is_active: active,
            is_captain: captain,
            purchase_price: 5.0,
        }
    }

    fn index(cyclists: &[Cyclist]) -> HashMap<String, Cyclist> {
        cyclists.iter().map(|c| (c.id.clone(), c.clone())).collect()
    }

    #[test]
    fn rejects_fourth_rider_from_same_pro_team() {
        let rules = TeamRules::default();
        let pool = [
            cyclist("a", "uae", CyclistCategory::Gc, 5.0),
            cyclist("b", "uae", CyclistCategory::Climber, 5.0),
            cyclist("c", "uae", CyclistCategory::Sprinter, 5.0),
        ];
        let members: Vec<_> = pool.iter().map(|c| member(&c.id, false, false)).collect();
        let candidate = cyclist("d", "uae", CyclistCategory::OneDay, 5.0);

        let result = can_add_cyclist(&rules, 50.0, &members, &index(&pool), &candidate);
        assert_eq!(
            result,
            Eligibility::TooManyFromSameTeam {
                pro_team: "uae".into(),
                max: 3
            }
        );
    }

    #[test]
    fn rejects_when_category_quota_reached() {
        let rules = TeamRules::default();
        let pool = [
            cyclist("a", "t1", CyclistCategory::TimeTrial, 5.0),
            cyclist("b", "t2", CyclistCategory::TimeTrial, 5.0),
        ];
        let members: Vec<_> = pool.iter().map(|c| member(&c.id, false, false)).collect();
        let candidate = cyclist("c", "t3", CyclistCategory::TimeTrial, 5.0);

        assert_eq!(
            can_add_cyclist(&rules, 50.0, &members, &index(&pool), &candidate),
            Eligibility::CategoryFull {
                category: CyclistCategory::TimeTrial,
                max: 2
            }
        );
    }

    #[test]
    fn budget_and_availability_checks() {
        let rules = TeamRules::default();
        let pricey = cyclist("p", "t1", CyclistCategory::Gc, 12.0);
        assert!(matches!(
            can_add_cyclist(&rules, 10.0, &[], &HashMap::new(), &pricey),
            Eligibility::InsufficientBudget { .. }
        ));
        assert!(can_add_cyclist(&rules, 12.0, &[], &HashMap::new(), &pricey).is_eligible());

        let mut injured = pricey.clone();
        injured.disabled = true;
        assert_eq!(
            can_add_cyclist(&rules, 50.0, &[], &HashMap::new(), &injured),
            Eligibility::Unavailable
        );
        assert_eq!(
            can_add_cyclist(&rules, 50.0, &[member("p", false, false)], &index(&[pricey.clone()]), &pricey),
            Eligibility::AlreadyInTeam
        );
    }

    #[test]
    fn composition_reports_deficits() {
        let rules = TeamRules::default();
        let pool = [cyclist("a", "t1", CyclistCategory::Gc, 5.0)];
        let members = vec![member("a", false, false)];
        match validate_composition(&rules, &members, &index(&pool)) {
            CompositionCheck::Invalid(deficits) => {
                assert_eq!(deficits.len(), 6);
                assert_eq!(
                    deficits[0],
                    CategoryDeficit {
                        category: CyclistCategory::Gc,
                        required: 3,
                        actual: 1
                    }
                );
            }
            CompositionCheck::Valid => panic!("expected deficits"),
        }
    }

    #[test]
    fn squad_is_complete_once_every_quota_is_met() {
        let rules = TeamRules {
            team_size: 2,
            active_size: 1,
            categories: crate::config::CategoryQuotas {
                gc: 1,
                climber: 1,
                sprinter: 0,
                time_trial: 0,
                puncher: 0,
                one_day: 0,
            },
            ..TeamRules::default()
        };
        let pool = index(&[
            cyclist("a", "t1", CyclistCategory::Gc, 5.0),
            cyclist("b", "t2", CyclistCategory::Climber, 5.0),
        ]);

        let partial = squad_status(&rules, &[member("a", false, false)], &pool);
        assert_eq!((partial.size, partial.required), (1, 2));
        assert!(!partial.is_complete());

        let full = squad_status(&rules, &[member("a", false, false), member("b", false, false)], &pool);
        assert!(full.is_complete());
    }

    #[test]
    fn apply_lineup_sets_flags_and_single_captain() {
        let rules = TeamRules::default();
        let mut members = vec![
            member("a", true, true),
            member("b", false, false),
            member("c", false, false),
        ];
        apply_lineup(&rules, &mut members, &["b".into(), "c".into()], "c").unwrap();

        assert!(!members[0].is_active && !members[0].is_captain);
        assert!(members[1].is_active && !members[1].is_captain);
        assert!(members[2].is_active && members[2].is_captain);
        validate_lineup(&rules, &members).unwrap();
    }

    #[test]
    fn apply_lineup_rejects_too_many_active() {
        let rules = TeamRules::default();
        let mut members: Vec<_> = (0..9).map(|i| member(&format!("c{i}"), false, false)).collect();
        let ids: Vec<String> = members.iter().map(|m| m.cyclist_id.clone()).collect();

        let err = apply_lineup(&rules, &mut members, &ids, "c0").unwrap_err();
        assert_eq!(err, RosterError::TooManyActive { max: 8, requested: 9 });
        assert!(members.iter().all(|m| !m.is_active));
    }

    #[test]
    fn captain_must_be_active() {
        let rules = TeamRules::default();
        let mut members = vec![member("a", false, false), member("b", false, false)];
        let err = apply_lineup(&rules, &mut members, &["a".into()], "b").unwrap_err();
        assert_eq!(err, RosterError::CaptainNotActive("b".into()));

        let err = apply_lineup(&rules, &mut members, &["a".into()], "zz").unwrap_err();
        assert_eq!(err, RosterError::NotInRoster("zz".into()));
    }

    #[test]
    fn set_captain_clears_previous() {
        let mut members = vec![member("a", true, true), member("b", true, false)];
        set_captain(&mut members, "b").unwrap();
        assert!(!members[0].is_captain);
        assert!(members[1].is_captain);
        validate_lineup(&TeamRules::default(), &members).unwrap();
    }

    #[test]
    fn validate_lineup_requires_a_captain_when_active() {
        let rules = TeamRules::default();
        let members = vec![member("a", true, false)];
        assert_eq!(validate_lineup(&rules, &members), Err(RosterError::CaptainCount(0)));
        assert!(validate_lineup(&rules, &[member("a", false, false)]).is_ok());
    }
}
