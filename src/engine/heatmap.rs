use std::collections::{BTreeMap, HashMap};

use crate::session::result::SprintSetResult;

/// Per-key heat in 0..=1 for the keyboard overlay: finished sets contribute
/// `miss_count / 10`, misses of the running set `misses / 5`.
pub fn heatmap(
    results: &[SprintSetResult],
    live_misses: &HashMap<String, u32>,
) -> BTreeMap<String, f64> {
    let mut map: BTreeMap<String, f64> = BTreeMap::new();

    for result in results {
        for stat in &result.weak_keys {
            bump(&mut map, &stat.key, stat.miss_count as f64 / 10.0);
        }
    }
    for (key, misses) in live_misses {
        bump(&mut map, key, *misses as f64 / 5.0);
    }
    map
}

fn bump(map: &mut BTreeMap<String, f64>, key: &str, amount: f64) {
    let heat = map.entry(key.to_lowercase()).or_insert(0.0);
    *heat = (*heat + amount).min(1.0);
}
