//! Intent partitioner: groups flat repo entries by their `group` key.

use modelrepo_core::RepoSpec;
use rustc_hash::FxHashMap;

/// Entries sharing one grouping key, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceGroup<'a> {
    pub key: &'a str,
    pub entries: Vec<&'a RepoSpec>,
}

/// Groups come out in order of first appearance of their key.
pub fn partition(repos: &[RepoSpec]) -> Vec<ResourceGroup<'_>> {
    let mut index: FxHashMap<&str, usize> = FxHashMap::default();
    let mut groups: Vec<ResourceGroup<'_>> = Vec::new();
    for repo in repos {
        let slot = *index.entry(repo.group.as_str()).or_insert_with(|| {
            groups.push(ResourceGroup { key: repo.group.as_str(), entries: Vec::new() });
            groups.len() - 1
        });
        groups[slot].entries.push(repo);
    }
    groups
}
