//! Cross-provider deduplication of fixtures.
//!
//! Two records are the same fixture when their team pairs are equivalent
//! (order-insensitive, fuzzy per [`teams::team_names_equivalent`]) and their
//! kickoffs are within the tolerance window. Ids are provider-local and never
//! decide identity on their own. Merging is repeated until no two output
//! records qualify, so the output never contains a duplicate even though the
//! fuzzy relation is not transitive. Surviving records get unique ids.

pub mod teams;

use std::collections::HashSet;
use std::time::Duration;

use tracing::debug;

use crate::model::{Match, Team};
use crate::normalize::DEFAULT_CATEGORY;

use self::teams::{normalize_team_name, normalized_equivalent};

/// Drop unstreamable records and merge duplicates. Input order decides which
/// record's id and title survive a merge.
pub fn consolidate(matches: Vec<Match>, tolerance: Duration) -> Vec<Match> {
    let input = matches.len();
    let mut groups: Vec<Match> = Vec::with_capacity(input);

    for m in matches.into_iter().filter(Match::is_streamable) {
        match groups.iter_mut().find(|g| same_fixture(g, &m, tolerance)) {
            Some(group) => merge_into(group, m),
            None => groups.push(m),
        }
    }

    while let Some((i, j)) = find_duplicate_pair(&groups, tolerance) {
        let other = groups.remove(j);
        merge_into(&mut groups[i], other);
    }

    assign_unique_ids(&mut groups);
    debug!(input, output = groups.len(), "Consolidated matches");
    groups
}

/// Whether two records describe the same real-world fixture.
pub fn same_fixture(a: &Match, b: &Match, tolerance: Duration) -> bool {
    kickoffs_within(a, b, tolerance) && teams_equivalent(a, b)
}

/// Later records whose id is already taken get a `-N` suffix.
fn assign_unique_ids(groups: &mut [Match]) {
    let mut seen: HashSet<String> = HashSet::with_capacity(groups.len());
    for m in groups.iter_mut() {
        if seen.contains(&m.id) {
            let base = m.id.clone();
            let mut n = 2;
            while seen.contains(&format!("{}-{}", base, n)) {
                n += 1;
            }
            debug!(id = %base, renamed = n, "Renaming colliding match id");
            m.id = format!("{}-{}", base, n);
        }
        seen.insert(m.id.clone());
    }
}

fn find_duplicate_pair(groups: &[Match], tolerance: Duration) -> Option<(usize, usize)> {
    for i in 0..groups.len() {
        for j in (i + 1)..groups.len() {
            if same_fixture(&groups[i], &groups[j], tolerance) {
                return Some((i, j));
            }
        }
    }
    None
}

/// A defaulted kickoff carries no information and is compatible with any time.
fn kickoffs_within(a: &Match, b: &Match, tolerance: Duration) -> bool {
    if a.date_defaulted || b.date_defaulted {
        return true;
    }
    let tolerance_ms = i64::try_from(tolerance.as_millis()).unwrap_or(i64::MAX);
    (a.date - b.date).abs() <= tolerance_ms
}

fn norm(team: Option<&Team>) -> Option<String> {
    team.map(|t| normalize_team_name(&t.name))
        .filter(|n| !n.is_empty())
}

fn teams_equivalent(a: &Match, b: &Match) -> bool {
    let (ah, aa) = (norm(a.teams.home.as_ref()), norm(a.teams.away.as_ref()));
    let (bh, ba) = (norm(b.teams.home.as_ref()), norm(b.teams.away.as_ref()));

    match (ah, aa, bh, ba) {
        (Some(ah), Some(aa), Some(bh), Some(ba)) => {
            (normalized_equivalent(&ah, &bh) && normalized_equivalent(&aa, &ba))
                || (normalized_equivalent(&ah, &ba) && normalized_equivalent(&aa, &bh))
        }
        (_, None, _, None) => {
            let ta = normalize_team_name(&a.title);
            !ta.is_empty() && ta == normalize_team_name(&b.title)
        }
        _ => false,
    }
}

fn merge_into(target: &mut Match, other: Match) {
    debug!(target = %target.id, merged = %other.id, "Merging duplicate fixture");

    for source in other.sources {
        if !target.sources.contains(&source) {
            target.sources.push(source);
        }
    }

    match (target.date_defaulted, other.date_defaulted) {
        (true, false) => {
            target.date = other.date;
            target.date_defaulted = false;
        }
        (false, false) => target.date = target.date.min(other.date),
        _ => {}
    }

    let donors: Vec<Team> = other
        .teams
        .home
        .into_iter()
        .chain(other.teams.away)
        .filter(|t| t.badge.is_some())
        .collect();
    for team in [target.teams.home.as_mut(), target.teams.away.as_mut()]
        .into_iter()
        .flatten()
    {
        if team.badge.is_none() {
            team.badge = donors
                .iter()
                .find(|d| teams::team_names_equivalent(&d.name, &team.name))
                .and_then(|d| d.badge.clone());
        }
    }

    if target.category == DEFAULT_CATEGORY {
        target.category = other.category;
    }
    if target.poster.is_none() {
        target.poster = other.poster;
    }
    target.popular |= other.popular;
    target.viewer_count = match (target.viewer_count, other.viewer_count) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SourceRef, Teams};

    const KICKOFF: i64 = 1_740_850_200_000;
    const MINUTE: i64 = 60_000;
    const TOLERANCE: Duration = Duration::from_secs(30 * 60);

    fn fixture(id: &str, home: &str, away: &str, date: i64, sources: &[(&str, &str)]) -> Match {
        Match {
            id: id.into(),
            title: format!("{} vs {}", home, away),
            category: "football".into(),
            date,
            date_defaulted: false,
            teams: Teams::pair(home, away),
            sources: sources.iter().map(|(s, i)| SourceRef::new(*s, *i)).collect(),
            poster: None,
            popular: false,
            viewer_count: None,
        }
    }

    fn single_event(id: &str, title: &str, date: i64) -> Match {
        Match {
            id: id.into(),
            title: title.into(),
            category: "fight".into(),
            date,
            date_defaulted: false,
            teams: Teams::default(),
            sources: vec![SourceRef::new("a", id)],
            poster: None,
            popular: false,
            viewer_count: None,
        }
    }

    #[test]
    fn merges_skewed_kickoffs_and_unions_sources() {
        let a = fixture("p1:1", "Arsenal", "Chelsea", KICKOFF, &[("A", "1")]);
        let b = fixture("p2:9", "Arsenal", "Chelsea", KICKOFF + 2 * MINUTE, &[("B", "2")]);
        let out = consolidate(vec![a, b], TOLERANCE);
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].sources,
            vec![SourceRef::new("A", "1"), SourceRef::new("B", "2")]
        );
        assert_eq!(out[0].date, KICKOFF);
        assert_eq!(out[0].id, "p1:1");
    }

    #[test]
    fn earliest_kickoff_wins() {
        let a = fixture("1", "Arsenal", "Chelsea", KICKOFF + 5 * MINUTE, &[("A", "1")]);
        let b = fixture("2", "Arsenal", "Chelsea", KICKOFF, &[("B", "2")]);
        let out = consolidate(vec![a, b], TOLERANCE);
        assert_eq!(out[0].date, KICKOFF);
    }

    #[test]
    fn defaulted_kickoff_yields_to_real_one() {
        let mut a = fixture("1", "Arsenal", "Chelsea", KICKOFF + 600 * MINUTE, &[("A", "1")]);
        a.date_defaulted = true;
        let b = fixture("2", "Arsenal", "Chelsea", KICKOFF, &[("B", "2")]);
        let out = consolidate(vec![a, b], TOLERANCE);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].date, KICKOFF);
        assert!(!out[0].date_defaulted);
    }

    #[test]
    fn order_insensitive_and_fuzzy() {
        let a = fixture("1", "Manchester United FC", "Liverpool", KICKOFF, &[("A", "1")]);
        let b = fixture("2", "Liverpool FC", "Man United", KICKOFF, &[("B", "2")]);
        assert_eq!(consolidate(vec![a, b], TOLERANCE).len(), 1);
    }

    #[test]
    fn shared_sources_are_not_duplicated() {
        let a = fixture("1", "Arsenal", "Chelsea", KICKOFF, &[("A", "1"), ("B", "2")]);
        let b = fixture("2", "Arsenal", "Chelsea", KICKOFF, &[("B", "2"), ("C", "3")]);
        let out = consolidate(vec![a, b], TOLERANCE);
        assert_eq!(out[0].sources.len(), 3);
    }

    #[test]
    fn keeps_fixtures_outside_tolerance_apart() {
        let a = fixture("1", "Arsenal", "Chelsea", KICKOFF, &[("A", "1")]);
        let b = fixture("2", "Arsenal", "Chelsea", KICKOFF + 31 * MINUTE, &[("B", "2")]);
        assert_eq!(consolidate(vec![a, b], TOLERANCE).len(), 2);
    }

    #[test]
    fn keeps_different_fixtures_apart() {
        let a = fixture("1", "Arsenal", "Chelsea", KICKOFF, &[("A", "1")]);
        let b = fixture("2", "Everton", "Fulham", KICKOFF, &[("B", "2")]);
        assert_eq!(consolidate(vec![a, b], TOLERANCE).len(), 2);
    }

    #[test]
    fn drops_unstreamable_matches() {
        let a = fixture("1", "Arsenal", "Chelsea", KICKOFF, &[]);
        let b = fixture("2", "Everton", "Fulham", KICKOFF, &[("B", "2")]);
        let out = consolidate(vec![a, b], TOLERANCE);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "2");
    }

    #[test]
    fn single_events_merge_on_title() {
        let a = single_event("1", "UFC 300", KICKOFF);
        let b = single_event("2", "ufc 300", KICKOFF + MINUTE);
        let c = single_event("3", "UFC 301", KICKOFF);
        let out = consolidate(vec![a, b, c], TOLERANCE);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn merge_fills_badges_and_viewers() {
        let a = fixture("1", "Arsenal", "Chelsea", KICKOFF, &[("A", "1")]);
        let mut b = fixture("2", "Chelsea", "Arsenal", KICKOFF, &[("B", "2")]);
        b.teams.home.as_mut().unwrap().badge = Some("chelsea.png".into());
        b.viewer_count = Some(40);
        b.popular = true;
        let out = consolidate(vec![a, b], TOLERANCE);
        assert_eq!(out[0].teams.away.as_ref().unwrap().badge.as_deref(), Some("chelsea.png"));
        assert!(out[0].teams.home.as_ref().unwrap().badge.is_none());
        assert_eq!(out[0].viewer_count, Some(40));
        assert!(out[0].popular);
    }

    #[test]
    fn repeated_pass_merges_groups_that_drift_into_range() {
        let a = fixture("1", "Internazionale", "Juventus", KICKOFF, &[("A", "1")]);
        let b = fixture("2", "Inter", "Juventus", KICKOFF + 45 * MINUTE, &[("B", "2")]);
        // Matches "Inter" but not "Internazionale", and pulls b's kickoff to +20.
        let c = fixture("3", "Inter Milan", "Juventus", KICKOFF + 20 * MINUTE, &[("C", "3")]);
        let out = consolidate(vec![a, b, c], TOLERANCE);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sources.len(), 3);
        assert_eq!(out[0].date, KICKOFF);
    }

    #[test]
    fn shared_ids_do_not_merge_unrelated_fixtures() {
        let day = 24 * 60 * MINUTE;
        let football = fixture("1", "Arsenal", "Chelsea", KICKOFF, &[("alpha", "1")]);
        let basketball = fixture("1", "Lakers", "Celtics", KICKOFF + 8 * day, &[("bravo", "1")]);
        let out = consolidate(vec![football, basketball], TOLERANCE);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "1");
        assert_eq!(out[1].id, "1-2");
        assert_eq!(out[0].sources, vec![SourceRef::new("alpha", "1")]);
        assert_eq!(out[1].sources, vec![SourceRef::new("bravo", "1")]);
        assert_eq!(out[1].title, "Lakers vs Celtics");
    }

    #[test]
    fn renamed_ids_skip_taken_suffixes() {
        let a = fixture("7", "Arsenal", "Chelsea", KICKOFF, &[("A", "1")]);
        let b = fixture("7-2", "Everton", "Fulham", KICKOFF, &[("B", "2")]);
        let c = fixture("7", "Lakers", "Celtics", KICKOFF, &[("C", "3")]);
        let out = consolidate(vec![a, b, c], TOLERANCE);
        let ids: Vec<&str> = out.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["7", "7-2", "7-3"]);
    }

    fn assert_no_duplicates(out: &[Match]) {
        for i in 0..out.len() {
            for j in (i + 1)..out.len() {
                assert!(
                    !same_fixture(&out[i], &out[j], TOLERANCE),
                    "duplicate fixtures {} and {}",
                    out[i].id,
                    out[j].id
                );
            }
        }
    }

    #[test]
    fn never_returns_duplicates_over_generated_inputs() {
        let names = ["Arsenal", "Arsenal FC", "Chelsea", "Chelsea FC", "Inter", "Internazionale"];
        let offsets = [0, 10, 25, 31, 45, 70];
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for round in 0..200 {
            let len = (next() % 8) as usize + 1;
            let batch: Vec<Match> = (0..len)
                .map(|k| {
                    let home = names[(next() % names.len() as u64) as usize];
                    let away = names[(next() % names.len() as u64) as usize];
                    let offset = offsets[(next() % offsets.len() as u64) as usize];
                    let id = format!("r{}-{}", round, k);
                    fixture(&id, home, away, KICKOFF + offset * MINUTE, &[("s", "x")])
                })
                .collect();
            let out = consolidate(batch, TOLERANCE);
            assert_no_duplicates(&out);
            let ids: HashSet<&str> = out.iter().map(|m| m.id.as_str()).collect();
            assert_eq!(ids.len(), out.len());
        }
    }
}
