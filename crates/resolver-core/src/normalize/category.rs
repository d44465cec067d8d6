/// Provider spellings mapped onto the canonical sport taxonomy.
const ALIASES: &[(&str, &str)] = &[
    ("soccer", "football"),
    ("futbol", "football"),
    ("association-football", "football"),
    ("ice-hockey", "hockey"),
    ("icehockey", "hockey"),
    ("nhl", "hockey"),
    ("ufc", "fight"),
    ("boxing", "fight"),
    ("mma", "fight"),
    ("wrestling", "fight"),
    ("wwe", "fight"),
    ("combat-sports", "fight"),
    ("nba", "basketball"),
    ("ncaab", "basketball"),
    ("nfl", "american-football"),
    ("ncaaf", "american-football"),
    ("american football", "american-football"),
    ("mlb", "baseball"),
    ("f1", "motor-sports"),
    ("formula-1", "motor-sports"),
    ("formula 1", "motor-sports"),
    ("motorsport", "motor-sports"),
    ("motorsports", "motor-sports"),
    ("nascar", "motor-sports"),
    ("motogp", "motor-sports"),
    ("cricket-t20", "cricket"),
    ("rugby-union", "rugby"),
    ("rugby-league", "rugby"),
    ("afl", "afl"),
    ("darts", "darts"),
];

pub const DEFAULT_CATEGORY: &str = "other";

/// Map a provider category onto the canonical taxonomy.
///
/// Unknown values are returned lower-cased rather than dropped.
pub fn map_category(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    if lowered.is_empty() {
        return DEFAULT_CATEGORY.to_string();
    }
    let dashed = lowered.replace(['_', ' '], "-");
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered || *alias == dashed)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(lowered)
}
