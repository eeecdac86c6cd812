use std::cmp::Ordering;

pub type GroupId = String;

/// Numeric-aware ordering for record and group ids.
///
/// Ids made only of ASCII digits compare by value, so `"2"` sorts before
/// `"10"`. Numeric ids sort before any other id, and the rest compare
/// lexicographically. Two numeric ids of equal value (`"7"`, `"007"`) fall back
/// to their raw text so the order stays total.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    match (is_numeric(a), is_numeric(b)) {
        (true, true) => {
            let trimmed_a = a.trim_start_matches('0');
            let trimmed_b = b.trim_start_matches('0');
            trimmed_a
                .len()
                .cmp(&trimmed_b.len())
                .then_with(|| trimmed_a.cmp(trimmed_b))
                .then_with(|| a.cmp(b))
        }
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.cmp(b),
    }
}

/// Sort with [`compare_ids`] and drop duplicates.
pub fn sort_ids<I>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut ids: Vec<String> = ids.into_iter().collect();
    ids.sort_by(|a, b| compare_ids(a, b));
    ids.dedup();
    ids
}

/// Split comma-joined seed tokens, trim them and drop empties and duplicates.
///
/// First-seen order is kept; callers that need a canonical order sort later.
pub fn normalize_seeds<I, S>(raw: I) -> Vec<GroupId>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seeds: Vec<GroupId> = Vec::new();
    for token in raw {
        for part in token.as_ref().split(',') {
            let part = part.trim();
            if part.is_empty() || seeds.iter().any(|seen| seen == part) {
                continue;
            }
            seeds.push(part.to_string());
        }
    }
    seeds
}

fn is_numeric(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())
}
