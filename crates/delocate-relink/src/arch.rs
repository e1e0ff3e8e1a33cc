use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use delocate_analyze::DependencyGraph;

use crate::Error;

/// One architecture incompatibility found by [`check_archs`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArchMismatch {
    /// An explicitly required architecture is missing from a depended
    /// library.
    Requirement {
        depending: PathBuf,
        missing: BTreeSet<String>,
    },
    /// A depended library lacks architectures of a binary that depends
    /// on it.
    Dependency {
        depended: PathBuf,
        depending: PathBuf,
        missing: BTreeSet<String>,
    },
}

/// Check that every depended library covers the architectures of its
/// dependers, plus any explicitly required set.
///
/// With an empty `require_archs`, only the depender/dependee
/// relationship is checked. An empty result means all architectures
/// were present as required; `stop_fast` gives up after the first
/// mismatch.
pub fn check_archs(
    copied: &DependencyGraph,
    require_archs: &BTreeSet<String>,
    stop_fast: bool,
) -> Result<BTreeSet<ArchMismatch>, Error> {
    let mut bads = BTreeSet::new();
    for depended in copied.depended_paths() {
        let depended_archs = delocate_macho::archs(depended)?;
        for (depending, _install_name) in copied.dependers_of(depended) {
            let mut all_required = delocate_macho::archs(depending)?;
            all_required.extend(require_archs.iter().cloned());
            let all_missing: BTreeSet<String> =
                all_required.difference(&depended_archs).cloned().collect();
            if all_missing.is_empty() {
                continue;
            }
            let required_missing: BTreeSet<String> =
                require_archs.difference(&depended_archs).cloned().collect();
            if required_missing.is_empty() {
                bads.insert(ArchMismatch::Dependency {
                    depended: depended.to_path_buf(),
                    depending: depending.to_path_buf(),
                    missing: all_missing,
                });
            } else {
                bads.insert(ArchMismatch::Requirement {
                    depending: depending.to_path_buf(),
                    missing: required_missing,
                });
            }
            if stop_fast {
                return Ok(bads);
            }
        }
    }
    Ok(bads)
}

/// Render `bads` as a sorted human-readable report, optionally with a
/// path prefix stripped so entries read relative to the wheel root.
pub fn bads_report(bads: &BTreeSet<ArchMismatch>, strip_prefix: Option<&Path>) -> String {
    let display = |path: &Path| {
        let stripped = match strip_prefix {
            Some(prefix) => path.strip_prefix(prefix).unwrap_or(path),
            None => path,
        };
        stripped.display().to_string()
    };
    let arch_list = |missing: &BTreeSet<String>| {
        (
            if missing.len() > 1 { "archs" } else { "arch" },
            missing.iter().cloned().collect::<Vec<_>>().join(", "),
        )
    };

    let mut reports: Vec<String> = bads
        .iter()
        .map(|bad| match bad {
            ArchMismatch::Dependency {
                depended,
                depending,
                missing,
            } => {
                let (word, list) = arch_list(missing);
                format!(
                    "{} needs {word} {list} missing from {}",
                    display(depending),
                    display(depended)
                )
            }
            ArchMismatch::Requirement { depending, missing } => {
                let (word, list) = arch_list(missing);
                format!("Required {word} {list} missing from {}", display(depending))
            }
        })
        .collect();
    reports.sort();
    reports.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use delocate_test::{DylibBuilder, FixtureArch, write_fat};

    fn fixture_pair(dir: &Path) -> (PathBuf, PathBuf) {
        // A universal depender over a thin dependency.
        let depending = dir.join("module.so");
        let x86_64 = DylibBuilder::new(FixtureArch::X86_64).bundle().build();
        let arm64 = DylibBuilder::new(FixtureArch::Arm64).bundle().build();
        write_fat(&depending, &[x86_64, arm64]).unwrap();

        let depended = dir.join("libdep.dylib");
        DylibBuilder::new(FixtureArch::X86_64)
            .install_id("/b/libdep.dylib")
            .write(&depended)
            .unwrap();
        (depending, depended)
    }

    #[test]
    fn missing_dependency_arch() {
        let dir = tempfile::tempdir().unwrap();
        let (depending, depended) = fixture_pair(dir.path());

        let mut graph = DependencyGraph::default();
        graph.insert(&depended, &depending, "/b/libdep.dylib");

        let bads = check_archs(&graph, &BTreeSet::new(), false).unwrap();
        assert_eq!(
            bads,
            BTreeSet::from([ArchMismatch::Dependency {
                depended: depended.clone(),
                depending: depending.clone(),
                missing: BTreeSet::from(["arm64".to_string()]),
            }])
        );
        let report = bads_report(&bads, Some(dir.path()));
        assert_eq!(report, "module.so needs arch arm64 missing from libdep.dylib");
    }

    #[test]
    fn missing_required_arch() {
        let dir = tempfile::tempdir().unwrap();
        let depending = dir.path().join("module.so");
        DylibBuilder::new(FixtureArch::X86_64)
            .bundle()
            .write(&depending)
            .unwrap();
        let depended = dir.path().join("libdep.dylib");
        DylibBuilder::new(FixtureArch::X86_64)
            .install_id("/b/libdep.dylib")
            .write(&depended)
            .unwrap();

        let mut graph = DependencyGraph::default();
        graph.insert(&depended, &depending, "/b/libdep.dylib");

        let require = BTreeSet::from(["i386".to_string(), "x86_64".to_string()]);
        let bads = check_archs(&graph, &require, false).unwrap();
        assert_eq!(
            bads,
            BTreeSet::from([ArchMismatch::Requirement {
                depending: depending.clone(),
                missing: BTreeSet::from(["i386".to_string()]),
            }])
        );
        let report = bads_report(&bads, Some(dir.path()));
        assert_eq!(report, "Required arch i386 missing from module.so");
    }

    #[test]
    fn matching_archs_are_ok() {
        let dir = tempfile::tempdir().unwrap();
        let depending = dir.path().join("module.so");
        DylibBuilder::new(FixtureArch::X86_64)
            .bundle()
            .write(&depending)
            .unwrap();
        let depended = dir.path().join("libdep.dylib");
        DylibBuilder::new(FixtureArch::X86_64)
            .install_id("/b/libdep.dylib")
            .write(&depended)
            .unwrap();

        let mut graph = DependencyGraph::default();
        graph.insert(&depended, &depending, "/b/libdep.dylib");
        assert!(
            check_archs(&graph, &BTreeSet::new(), false)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn stop_fast_returns_first_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let (depending, depended) = fixture_pair(dir.path());
        let other = dir.path().join("libother.dylib");
        DylibBuilder::new(FixtureArch::X86_64)
            .install_id("/b/libother.dylib")
            .write(&other)
            .unwrap();

        let mut graph = DependencyGraph::default();
        graph.insert(&depended, &depending, "/b/libdep.dylib");
        graph.insert(&other, &depending, "/b/libother.dylib");

        let bads = check_archs(&graph, &BTreeSet::new(), true).unwrap();
        assert_eq!(bads.len(), 1);
    }
}
