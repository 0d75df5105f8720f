
use std::cmp::Ordering;

use itertools::Itertools;

use crate::remote::RemoteEntry;

/// Picks the entries to delete once `just_created` has been uploaded: every
/// entry of the same directory that sorts before it by `(created, id)`.
/// `just_created` itself and anything sorting after it are kept.
pub fn select(entries: Vec<RemoteEntry>, just_created: &RemoteEntry) -> Vec<RemoteEntry> {
    entries
        .into_iter()
        .filter(|entry| entry.directory == just_created.directory)
        .filter(|entry| entry.id != just_created.id)
        .filter(|entry| compare(entry, just_created) == Ordering::Less)
        .sorted_by(compare)
        .collect()
}

fn compare(a: &RemoteEntry, b: &RemoteEntry) -> Ordering {
    a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id))
}
