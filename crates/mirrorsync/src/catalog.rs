//! Projection of the stored catalog into per-source scheduler lists.

use std::collections::BTreeMap;

use mirrorsync_repos::Repo;
use mirrorsync_scheduler::{ConfiguredRepo, SourceRepoList};

/// Group `repos` by the sources that list them.
///
/// A repository listed by several sources appears in each of their lists,
/// cloned from that source's URL. Sources come out ordered by URN. Deleted repositories are carried as
/// disabled so the scheduler drops them.
pub fn configured_repos_by_source(repos: &[Repo]) -> BTreeMap<String, SourceRepoList> {
    let mut by_source: BTreeMap<String, SourceRepoList> = BTreeMap::new();
    for repo in repos {
        let enabled = repo.enabled && !repo.is_deleted();
        for (urn, info) in &repo.sources {
            by_source.entry(urn.clone()).or_default().insert(
                repo.name.clone(),
                ConfiguredRepo {
                    name: repo.name.clone(),
                    url: info.clone_url.clone(),
                    enabled,
                },
            );
        }
    }
    by_source
}
