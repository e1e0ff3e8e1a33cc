//! Reconcile a wheel's platform tags with the binaries it bundles.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, warn};
use walkdir::WalkDir;

use delocate_tags::{
    MacosVersion, PlatformArch, PlatformTag, pack_architectures, unpack_architectures,
};
use delocate_wheel::{WheelFilename, WheelMetadata, find_dist_info};

use crate::Error;

/// The architectures (and minimum versions) a wheel claims through its
/// filename, with the thin `arm64` + `x86_64` pair folded back into
/// `universal2`.
fn archs_and_version_from_wheel_name(
    filename: &WheelFilename,
) -> Result<BTreeMap<PlatformArch, MacosVersion>, Error> {
    let mut requirements = BTreeMap::new();
    for platform_tag in &filename.platform_tag {
        let tag = PlatformTag::from_str(platform_tag)?;
        requirements.insert(tag.arch, tag.version);
    }
    let thin_pair = BTreeSet::from([PlatformArch::X86_64, PlatformArch::Arm64]);
    if requirements.keys().copied().collect::<BTreeSet<_>>() == thin_pair {
        let mut version = requirements[&PlatformArch::Arm64];
        if version == MacosVersion::BIG_SUR {
            version = requirements[&PlatformArch::X86_64];
        }
        requirements = BTreeMap::from([(PlatformArch::Universal2, version)]);
    }
    Ok(requirements)
}

/// Minimum macOS versions of every binary under `wheel_dir`, grouped as
/// architecture -> version -> paths.
fn bundled_library_versions(
    wheel_dir: &Path,
) -> Result<BTreeMap<PlatformArch, BTreeMap<MacosVersion, Vec<PathBuf>>>, Error> {
    let mut all: BTreeMap<PlatformArch, BTreeMap<MacosVersion, Vec<PathBuf>>> = BTreeMap::new();
    for entry in WalkDir::new(wheel_dir).sort_by_file_name() {
        let entry = entry.map_err(delocate_wheel::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        for (arch, version) in delocate_macho::min_os_versions(entry.path())? {
            let Ok(arch) = PlatformArch::from_str(&arch.to_lowercase()) else {
                debug!("Ignoring unknown architecture {arch} of {}", entry.path().display());
                continue;
            };
            debug!(
                "Bundled library info: {} arch={arch} target={version}",
                entry.path().display()
            );
            all.entry(arch)
                .or_default()
                .entry(version)
                .or_default()
                .push(entry.path().to_path_buf());
        }
    }
    Ok(all)
}

/// Libraries that demand a more modern macOS than `required_version`.
///
/// arm64 binaries cannot run below 11.0 no matter what the stated
/// target says, so the comparison floor is raised for them.
fn incompatible_libraries(
    required_version: Option<MacosVersion>,
    version_libraries: &BTreeMap<MacosVersion, Vec<PathBuf>>,
    arch: PlatformArch,
) -> BTreeSet<(PathBuf, MacosVersion)> {
    let Some(mut required_version) = required_version else {
        return BTreeSet::new();
    };
    if arch == PlatformArch::Arm64 && required_version < MacosVersion::BIG_SUR {
        required_version = MacosVersion::BIG_SUR;
    }
    let mut bad = BTreeSet::new();
    for (&library_version, libraries) in version_libraries {
        if library_version > required_version {
            bad.extend(
                libraries
                    .iter()
                    .map(|library| (library.clone(), library_version)),
            );
        }
    }
    bad
}

/// Compute the wheel name matching the architectures and minimum macOS
/// versions of the bundled binaries, plus any libraries incompatible
/// with `require_target_macos_version`.
pub(crate) fn calculate_minimum_wheel_name(
    filename: &WheelFilename,
    wheel_dir: &Path,
    require_target_macos_version: Option<MacosVersion>,
) -> Result<(WheelFilename, BTreeSet<(PathBuf, MacosVersion)>), Error> {
    if filename.is_any() {
        // Universal wheel, nothing to retag.
        return Ok((filename.clone(), BTreeSet::new()));
    }
    let claimed = unpack_architectures(&archs_and_version_from_wheel_name(filename)?);
    let all_library_versions = bundled_library_versions(wheel_dir)?;

    // The per-architecture demand of the bundled binaries.
    let mut arch_version: BTreeMap<PlatformArch, MacosVersion> = all_library_versions
        .iter()
        .map(|(&arch, versions)| {
            let max = *versions.keys().next_back().expect("versions is non-empty");
            (arch, max)
        })
        .collect();

    let mut incompatible = BTreeSet::new();
    for (&arch, version_libraries) in &all_library_versions {
        incompatible.extend(incompatible_libraries(
            require_target_macos_version,
            version_libraries,
            arch,
        ));
    }

    // A wheel tagged with an architecture must bundle at least one
    // binary of that architecture.
    let missing: Vec<&PlatformArch> = claimed
        .keys()
        .filter(|arch| !arch_version.contains_key(arch))
        .collect();
    if !missing.is_empty() {
        return Err(Error::MissingArch {
            archs: missing
                .iter()
                .map(|arch| arch.to_string())
                .collect::<Vec<_>>()
                .join(","),
        });
    }

    // Limit tags to what the wheel already claimed, with versions
    // derived from the binaries instead of the previous tag.
    arch_version.retain(|arch, _| claimed.contains_key(arch));

    let platform_tags = pack_architectures(&arch_version)
        .into_iter()
        .map(|(arch, version)| macos_platform_tag(version, arch, require_target_macos_version))
        .collect();
    Ok((filename.with_platform_tags(platform_tags), incompatible))
}

/// Format one platform tag, converting the binary's version into the
/// release version pip expects: from macOS 11 on, the minor component
/// of a release version is always zero.
fn macos_platform_tag(
    version: MacosVersion,
    arch: PlatformArch,
    require_target_macos_version: Option<MacosVersion>,
) -> String {
    let version = match require_target_macos_version {
        Some(target) => version.max(target),
        None => {
            if version.major >= 11 && version.minor > 0 {
                // In this range an automatic version is deceptive.
                warn!(
                    "Wheel will be tagged as supporting macOS {major} ({arch}), but will not \
                     support macOS versions older than {major}.{minor}\n\t\
                     Configure MACOSX_DEPLOYMENT_TARGET to suppress this warning.",
                    major = version.major,
                    minor = version.minor,
                );
            }
            version
        }
    };
    let minor = if version.major >= 11 { 0 } else { version.minor };
    PlatformTag::new(MacosVersion::new(version.major, minor), arch).to_string()
}

/// Rename `out_wheel` to the platform tags its unpacked tree demands,
/// failing when a bundled library needs a newer macOS than the
/// requested target.
pub(crate) fn check_and_update_wheel_name(
    out_wheel: &Path,
    wheel_dir: &Path,
    require_target_macos_version: Option<MacosVersion>,
) -> Result<PathBuf, Error> {
    let wheel_name = out_wheel
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let filename = WheelFilename::from_str(&wheel_name)?;

    let (new_filename, problematic) =
        calculate_minimum_wheel_name(&filename, wheel_dir, require_target_macos_version)?;
    if !problematic.is_empty() {
        let report = problematic
            .iter()
            .map(|(library, version)| {
                format!("{} has a minimum target of {version}", library.display())
            })
            .collect::<Vec<_>>()
            .join("\n");
        let minimum_valid = problematic
            .iter()
            .map(|(_, version)| *version)
            .max()
            .expect("problematic is non-empty");
        return Err(Error::OsTooOld {
            required: require_target_macos_version.expect("a target was required"),
            report,
            minimum_valid,
        });
    }
    let new_name = new_filename.to_string();
    if new_name == wheel_name {
        Ok(out_wheel.to_path_buf())
    } else {
        Ok(out_wheel
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(new_name))
    }
}

/// Rewrite the `WHEEL` file's `Tag:` entries to match `filename` and
/// record this tool in `Generator:`.
pub(crate) fn update_wheelfile(wheel_dir: &Path, filename: &WheelFilename) -> Result<(), Error> {
    let wheel_file = find_dist_info(wheel_dir)?.join("WHEEL");
    let mut metadata = WheelMetadata::read_from(&wheel_file)?;

    let new_tags = filename.expanded_tags();
    let current_tags: BTreeSet<String> = metadata.get_all("Tag").map(String::from).collect();
    if current_tags != new_tags.iter().cloned().collect::<BTreeSet<_>>() {
        if metadata.get("Root-Is-Purelib") == Some("true") {
            return Err(Error::CannotTagPure);
        }
        metadata.remove_all("Tag");
        for tag in new_tags {
            metadata.add("Tag", tag);
        }
    }

    let generator = format!("delocate {}", crate::VERSION);
    if !metadata.contains("Generator", &generator) {
        metadata.add("Generator", generator);
    }
    metadata.write_to(&wheel_file)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use delocate_test::{DylibBuilder, FixtureArch};

    fn filename(name: &str) -> WheelFilename {
        WheelFilename::from_str(name).unwrap()
    }

    #[test]
    fn wheel_name_archs_fold_thin_pair_into_universal2() {
        let requirements = archs_and_version_from_wheel_name(&filename(
            "plat-1.0-cp311-cp311-macosx_10_9_x86_64.macosx_11_0_arm64.whl",
        ))
        .unwrap();
        assert_eq!(
            requirements,
            BTreeMap::from([(PlatformArch::Universal2, MacosVersion::new(10, 9))])
        );

        let requirements = archs_and_version_from_wheel_name(&filename(
            "plat-1.0-cp311-cp311-macosx_12_0_x86_64.macosx_12_0_arm64.whl",
        ))
        .unwrap();
        assert_eq!(
            requirements,
            BTreeMap::from([(PlatformArch::Universal2, MacosVersion::new(12, 0))])
        );
    }

    #[test]
    fn retags_to_the_bundled_demand() {
        let dir = tempfile::tempdir().unwrap();
        DylibBuilder::new(FixtureArch::X86_64)
            .bundle()
            .build_version(12, 0)
            .write(dir.path().join("module.so"))
            .unwrap();

        let (new_name, incompatible) = calculate_minimum_wheel_name(
            &filename("plat-1.0-cp311-cp311-macosx_10_9_x86_64.whl"),
            dir.path(),
            None,
        )
        .unwrap();
        assert_eq!(
            new_name.to_string(),
            "plat-1.0-cp311-cp311-macosx_12_0_x86_64.whl"
        );
        assert!(incompatible.is_empty());
    }

    #[test]
    fn any_wheels_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let (new_name, incompatible) = calculate_minimum_wheel_name(
            &filename("fakepkg2-1.0-py3-none-any.whl"),
            dir.path(),
            Some(MacosVersion::new(10, 6)),
        )
        .unwrap();
        assert_eq!(new_name.to_string(), "fakepkg2-1.0-py3-none-any.whl");
        assert!(incompatible.is_empty());
    }

    #[test]
    fn unclaimed_architectures_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        DylibBuilder::new(FixtureArch::X86_64)
            .bundle()
            .build_version(10, 9)
            .write(dir.path().join("module.so"))
            .unwrap();
        DylibBuilder::new(FixtureArch::Arm64)
            .install_id("/b/libextra.dylib")
            .build_version(11, 0)
            .write(dir.path().join("libextra.dylib"))
            .unwrap();

        let (new_name, _) = calculate_minimum_wheel_name(
            &filename("plat-1.0-cp311-cp311-macosx_10_9_x86_64.whl"),
            dir.path(),
            None,
        )
        .unwrap();
        assert_eq!(
            new_name.to_string(),
            "plat-1.0-cp311-cp311-macosx_10_9_x86_64.whl"
        );
    }

    #[test]
    fn claimed_architecture_must_be_present() {
        let dir = tempfile::tempdir().unwrap();
        DylibBuilder::new(FixtureArch::X86_64)
            .bundle()
            .build_version(11, 0)
            .write(dir.path().join("module.so"))
            .unwrap();

        let err = calculate_minimum_wheel_name(
            &filename("plat-1.0-cp311-cp311-macosx_11_0_arm64.whl"),
            dir.path(),
            None,
        )
        .unwrap_err();
        insta::assert_snapshot!(err, @"Failed to find any binary with the required architecture: 'arm64'");
    }

    #[test]
    fn target_clamps_the_tag_upwards() {
        let dir = tempfile::tempdir().unwrap();
        DylibBuilder::new(FixtureArch::X86_64)
            .bundle()
            .build_version(10, 9)
            .write(dir.path().join("module.so"))
            .unwrap();

        let (new_name, incompatible) = calculate_minimum_wheel_name(
            &filename("plat-1.0-cp311-cp311-macosx_10_9_x86_64.whl"),
            dir.path(),
            Some(MacosVersion::new(10, 15)),
        )
        .unwrap();
        assert_eq!(
            new_name.to_string(),
            "plat-1.0-cp311-cp311-macosx_10_15_x86_64.whl"
        );
        assert!(incompatible.is_empty());
    }

    #[test]
    fn major_version_tags_have_zero_minor() {
        assert_eq!(
            macos_platform_tag(MacosVersion::new(12, 3), PlatformArch::X86_64, None),
            "macosx_12_0_x86_64"
        );
        assert_eq!(
            macos_platform_tag(MacosVersion::new(10, 9), PlatformArch::X86_64, None),
            "macosx_10_9_x86_64"
        );
    }

    #[test]
    fn os_too_old_reports_every_library_and_a_fix() {
        let dir = tempfile::tempdir().unwrap();
        DylibBuilder::new(FixtureArch::X86_64)
            .bundle()
            .build_version(12, 0)
            .write(dir.path().join("module.so"))
            .unwrap();

        let err = check_and_update_wheel_name(
            Path::new("/dist/plat-1.0-cp311-cp311-macosx_10_9_x86_64.whl"),
            dir.path(),
            Some(MacosVersion::new(10, 6)),
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("has a minimum target of 12.0"), "{message}");
        assert!(message.contains("MACOSX_DEPLOYMENT_TARGET=12.0"), "{message}");
    }

    #[test]
    fn arm64_floor_is_big_sur() {
        // An arm64 library at 11.0 is fine even for a 10.15 target.
        let versions = BTreeMap::from([(
            MacosVersion::new(11, 0),
            vec![PathBuf::from("libdep.dylib")],
        )]);
        assert!(
            incompatible_libraries(
                Some(MacosVersion::new(10, 15)),
                &versions,
                PlatformArch::Arm64,
            )
            .is_empty()
        );
        // The same version is incompatible for x86_64 at that target.
        assert_eq!(
            incompatible_libraries(
                Some(MacosVersion::new(10, 15)),
                &versions,
                PlatformArch::X86_64,
            )
            .len(),
            1
        );
    }

    #[test]
    fn wheelfile_tags_and_generator_are_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let dist_info = dir.path().join("plat-1.0.dist-info");
        fs_err::create_dir_all(&dist_info).unwrap();
        fs_err::write(
            dist_info.join("WHEEL"),
            "Wheel-Version: 1.0\nGenerator: bdist_wheel (0.41.2)\nRoot-Is-Purelib: false\n\
             Tag: cp311-cp311-macosx_10_9_x86_64\n",
        )
        .unwrap();

        update_wheelfile(
            dir.path(),
            &filename("plat-1.0-cp311-cp311-macosx_12_0_x86_64.whl"),
        )
        .unwrap();

        let contents = fs_err::read_to_string(dist_info.join("WHEEL")).unwrap();
        assert!(contents.contains("Tag: cp311-cp311-macosx_12_0_x86_64\n"));
        assert!(!contents.contains("macosx_10_9"));
        assert!(contents.contains(&format!("Generator: delocate {}\n", crate::VERSION)));
        // The original generator line is preserved.
        assert!(contents.contains("Generator: bdist_wheel (0.41.2)\n"));
    }

    #[test]
    fn pure_wheels_cannot_be_retagged() {
        let dir = tempfile::tempdir().unwrap();
        let dist_info = dir.path().join("plat-1.0.dist-info");
        fs_err::create_dir_all(&dist_info).unwrap();
        fs_err::write(
            dist_info.join("WHEEL"),
            "Wheel-Version: 1.0\nRoot-Is-Purelib: true\nTag: py3-none-any\n",
        )
        .unwrap();

        let err = update_wheelfile(
            dir.path(),
            &filename("plat-1.0-cp311-cp311-macosx_12_0_x86_64.whl"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::CannotTagPure));
    }
}
