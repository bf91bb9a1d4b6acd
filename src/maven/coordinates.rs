//! Parsing Maven coordinates from repository paths.
//!
//! All parsing here is purely syntactic; POM files are never opened. The
//! version ordering is the one the fleet already depends on for `latest`
//! and `release` selection, and is preserved exactly even where it departs
//! from Maven's own convention for pre-release tags.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::warn;

/// Aggregated coordinates: `groupId -> artifactId -> versions`.
pub type GavMap = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// Strip the root prefix from a repository path.
pub fn trim_root(full_path: &str, root: &str) -> String {
    let mut fixed_root = fix_root(root);
    if !fixed_root.ends_with('/') {
        fixed_root.push('/');
    }
    full_path
        .strip_prefix(&fixed_root)
        .unwrap_or(full_path)
        .trim_end_matches('/')
        .to_string()
}

/// Parse the groupId and artifactId from a GA-level path in a local maven
/// repository, e.g. `org/apache/maven/plugin/maven-plugin-plugin` ->
/// `(org.apache.maven.plugin, maven-plugin-plugin)`.
///
/// `root` is a prefix of the path which is not part of the maven GA.
pub fn parse_ga(full_ga_path: &str, root: &str) -> Option<(String, String)> {
    let ga_path = trim_root(full_ga_path, root);
    let items: Vec<&str> = ga_path.split('/').collect();
    if items.len() < 2 {
        return None;
    }
    let artifact = items[items.len() - 1].to_string();
    let group = items[..items.len() - 1].join(".");
    Some((group, artifact))
}

/// Parse the groupId, artifactId and version from an artifact path in a
/// local maven repository, e.g.
/// `org/apache/maven/plugin/maven-plugin-plugin/1.0.0/maven-plugin-plugin-1.0.0.pom`
/// -> `(org.apache.maven.plugin, maven-plugin-plugin, 1.0.0)`.
///
/// `root` is a prefix of the path which is not part of the maven GAV.
pub fn parse_gav(full_artifact_path: &str, root: &str) -> Option<(String, String, String)> {
    let ver_path = trim_root(full_artifact_path, root);
    let items: Vec<&str> = ver_path.split('/').collect();
    if items.len() < 4 {
        return None;
    }
    let version = items[items.len() - 2].to_string();
    let artifact = items[items.len() - 3].to_string();
    let group = items[..items.len() - 3].join(".");
    Some((group, artifact, version))
}

/// Aggregate a list of POM paths into `{groupId: {artifactId: [versions]}}`.
/// Paths that do not follow the repository layout are skipped with a
/// warning.
pub fn parse_gavs(pom_paths: &[String], root: &str) -> GavMap {
    let mut gavs = GavMap::new();
    for pom in pom_paths {
        match parse_gav(pom, root) {
            Some((group, artifact, version)) => {
                gavs.entry(group)
                    .or_default()
                    .entry(artifact)
                    .or_default()
                    .push(version);
            }
            None => warn!("Ignoring malformed repository path: {}", pom),
        }
    }
    gavs
}

/// Encode a GAV back into its repository-relative artifact path, with the
/// given file extension.
pub fn encode_gav(group: &str, artifact: &str, version: &str, extension: &str) -> String {
    format!(
        "{}/{}/{}/{}-{}.{}",
        group.replace('.', "/"),
        artifact,
        version,
        artifact,
        version,
        extension
    )
}

pub(crate) fn fix_root(root: &str) -> String {
    let trimmed = root.trim();
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn version_items(version: &str) -> Vec<&str> {
    let mut items: Vec<&str> = version.split('.').collect();
    if let Some(&last) = items.last() {
        if last.contains('-') {
            items.pop();
            items.extend(last.split('-'));
        }
    }
    items
}

/// Total order over version strings, used for sorting `<versions>` and for
/// `latest`/`release` selection.
///
/// Versions are split on `.`, with the last dotted component further split
/// on `-`. Numeric components compare as integers and beat non-numeric
/// ones; non-numeric components compare lexicographically; when one list
/// is a strict prefix of the other, the shorter list is less. The net
/// effect is that `1.0.1-alpha` sorts above `1.0.1`.
pub fn version_compare(ver1: &str, ver2: &str) -> Ordering {
    let xitems = version_items(ver1);
    let yitems = version_items(ver2);
    let len = xitems.len().max(yitems.len());
    for i in 0..len {
        let xitem = match xitems.get(i) {
            Some(x) => x,
            None => return Ordering::Less,
        };
        let yitem = match yitems.get(i) {
            Some(y) => y,
            None => return Ordering::Greater,
        };
        match (xitem.parse::<i64>(), yitem.parse::<i64>()) {
            (Ok(_), Err(_)) => return Ordering::Greater,
            (Err(_), Ok(_)) => return Ordering::Less,
            (Ok(x), Ok(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
            }
            (Err(_), Err(_)) => match xitem.cmp(yitem) {
                Ordering::Equal => {}
                other => return other,
            },
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ga() {
        let (group, artifact) = parse_ga(
            "org/apache/maven/plugin/maven-plugin-plugin",
            "/",
        )
        .unwrap();
        assert_eq!(group, "org.apache.maven.plugin");
        assert_eq!(artifact, "maven-plugin-plugin");
    }

    #[test]
    fn test_parse_gav() {
        let (group, artifact, version) = parse_gav(
            "/tmp/repo/org/apache/maven/plugin/maven-plugin-plugin/1.0.0/maven-plugin-plugin-1.0.0.pom",
            "/tmp/repo",
        )
        .unwrap();
        assert_eq!(group, "org.apache.maven.plugin");
        assert_eq!(artifact, "maven-plugin-plugin");
        assert_eq!(version, "1.0.0");
    }

    #[test]
    fn test_parse_gav_round_trip() {
        let path = encode_gav("org.apache.commons", "commons-lang3", "3.10", "pom");
        assert_eq!(
            path,
            "org/apache/commons/commons-lang3/3.10/commons-lang3-3.10.pom"
        );
        let (group, artifact, version) = parse_gav(&path, "/").unwrap();
        assert_eq!(group, "org.apache.commons");
        assert_eq!(artifact, "commons-lang3");
        assert_eq!(version, "3.10");
    }

    #[test]
    fn test_parse_gav_malformed() {
        assert!(parse_gav("too/short", "/").is_none());
    }

    #[test]
    fn test_parse_gavs() {
        let poms = vec![
            "org/foo/bar/1.0/bar-1.0.pom".to_string(),
            "org/foo/bar/2.0/bar-2.0.pom".to_string(),
            "org/foo/baz/1.1/baz-1.1.pom".to_string(),
        ];
        let gavs = parse_gavs(&poms, "/");
        let avs = gavs.get("org.foo").unwrap();
        assert_eq!(avs.get("bar").unwrap(), &vec!["1.0", "2.0"]);
        assert_eq!(avs.get("baz").unwrap(), &vec!["1.1"]);
    }

    #[test]
    fn test_version_compare_numeric() {
        assert_eq!(version_compare("1.0.0", "1.0.1"), Ordering::Less);
        assert_eq!(version_compare("1.10.0", "1.9.1"), Ordering::Greater);
        assert_eq!(version_compare("1.0.1", "1.0.1"), Ordering::Equal);
    }

    #[test]
    fn test_version_compare_prerelease_tags() {
        // The shorter list is less, so a tagged version sorts above its
        // untagged base version.
        assert_eq!(version_compare("1.0.1-alpha", "1.0.1"), Ordering::Greater);
        assert_eq!(version_compare("1.0.1-beta", "1.0.1-alpha"), Ordering::Greater);
        assert_eq!(version_compare("1.0.2", "1.0.1-alpha"), Ordering::Greater);
    }

    #[test]
    fn test_version_compare_numeric_beats_alpha() {
        assert_eq!(version_compare("1.0.1", "1.0.alpha"), Ordering::Greater);
        assert_eq!(version_compare("1.0.alpha", "1.0.1"), Ordering::Less);
    }

    #[test]
    fn test_version_compare_antisymmetric() {
        let versions = [
            "1.0.0", "1.0.1", "1.0.1-alpha", "1.0.1-beta", "1.10.0", "2.0", "2.0.0.Final",
        ];
        for a in &versions {
            for b in &versions {
                assert_eq!(version_compare(a, b), version_compare(b, a).reverse());
            }
        }
    }

    #[test]
    fn test_version_compare_transitive_sort() {
        let mut versions = vec![
            "1.0.1", "1.0.0", "1.10.0", "1.0.1-alpha", "1.9.1", "1.0.1-beta",
        ];
        versions.sort_by(|a, b| version_compare(a, b));
        assert_eq!(
            versions,
            vec!["1.0.0", "1.0.1", "1.0.1-alpha", "1.0.1-beta", "1.9.1", "1.10.0"]
        );
    }
}
