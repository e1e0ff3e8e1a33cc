//! End-to-end wheel delocation scenarios.

use std::path::{Path, PathBuf};

use delocate::{Error, MacosVersion, WheelDelocationOptions, delocate_wheel, wheel_libs};
use delocate_macho::{install_id, install_names, rpaths};
use delocate_test::{DylibBuilder, FixtureArch, WheelBuilder};
use delocate_wheel::{WheelMetadata, zip2dir};

fn tempdir() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().canonicalize().unwrap();
    (dir, path)
}

/// Unpack `wheel` into a fresh subdirectory of `base` for inspection.
fn unpack(wheel: &Path, base: &Path, name: &str) -> PathBuf {
    let out = base.join(name);
    zip2dir(wheel, &out).unwrap();
    out
}

fn wheel_metadata(unpacked: &Path, dist_info: &str) -> WheelMetadata {
    WheelMetadata::read_from(&unpacked.join(dist_info).join("WHEEL")).unwrap()
}

/// A platform wheel whose extension module (in a subpackage, like the
/// reference fixtures) depends on a library outside the wheel.
fn external_dep_wheel(base: &Path) -> (PathBuf, PathBuf) {
    let build = base.join("build");
    fs_err::create_dir_all(&build).unwrap();
    let external = build.join("libextfunc.dylib");
    DylibBuilder::new(FixtureArch::X86_64)
        .install_id(external.to_string_lossy().into_owned())
        .build_version(10, 9)
        .write(&external)
        .unwrap();

    let module = DylibBuilder::new(FixtureArch::X86_64)
        .bundle()
        .dylib(external.to_string_lossy().into_owned())
        .dylib("/usr/lib/libSystem.B.dylib")
        .build_version(10, 9)
        .build();

    let wheel = WheelBuilder::new("plat", "1.0", "cp311-cp311-macosx_10_9_x86_64")
        .file("plat/__init__.py", "")
        .file("plat/sub/__init__.py", "")
        .file_with_mode("plat/sub/module.so", module, 0o755)
        .write_to(base)
        .unwrap();
    (wheel, external)
}

#[test]
fn pure_wheel_passes_through_untouched() {
    let (_guard, base) = tempdir();
    let wheel = WheelBuilder::new("fakepkg2", "1.0", "py3-none-any")
        .file("fakepkg2/__init__.py", "")
        .write_to(&base)
        .unwrap();
    let before = fs_err::read(&wheel).unwrap();

    let copied = delocate_wheel(&wheel, &WheelDelocationOptions::default()).unwrap();

    assert!(copied.is_empty());
    assert_eq!(fs_err::read(&wheel).unwrap(), before);
}

#[test]
fn single_external_dependency_is_bundled() {
    let (_guard, base) = tempdir();
    let (wheel, external) = external_dep_wheel(&base);

    let copied = delocate_wheel(&wheel, &WheelDelocationOptions::default()).unwrap();

    // The report keys the copy by its original path, with in-wheel
    // paths relative to the wheel root.
    assert_eq!(copied.depended_paths(), [external.as_path()]);
    assert_eq!(
        copied
            .dependers_of(&external)
            .map(|(depending, install_name)| (depending.to_path_buf(), install_name.to_string()))
            .collect::<Vec<_>>(),
        [(
            PathBuf::from("plat/sub/module.so"),
            external.to_string_lossy().into_owned()
        )]
    );

    let unpacked = unpack(&wheel, &base, "unpacked");
    let bundled = unpacked.join("plat/.dylibs/libextfunc.dylib");
    assert!(bundled.is_file());
    assert_eq!(
        install_names(&unpacked.join("plat/sub/module.so")).unwrap()[0].1,
        [
            "@loader_path/../.dylibs/libextfunc.dylib".to_string(),
            "/usr/lib/libSystem.B.dylib".to_string(),
        ]
    );
    assert_eq!(
        install_id(&bundled).unwrap().as_deref(),
        Some("/DLC/plat/.dylibs/libextfunc.dylib")
    );
}

#[test]
fn rpath_dependencies_are_bundled_transitively() {
    let (_guard, base) = tempdir();
    let libs = base.join("libs");
    fs_err::create_dir_all(&libs).unwrap();

    let external2 = libs.join("libextfunc2_rpath.dylib");
    DylibBuilder::new(FixtureArch::X86_64)
        .install_id(external2.to_string_lossy().into_owned())
        .build_version(10, 9)
        .write(&external2)
        .unwrap();

    let external = libs.join("libextfunc_rpath.dylib");
    DylibBuilder::new(FixtureArch::X86_64)
        .install_id(external.to_string_lossy().into_owned())
        .dylib("@rpath/libextfunc2_rpath.dylib")
        .rpath("@loader_path/")
        .build_version(10, 9)
        .write(&external)
        .unwrap();

    let module = DylibBuilder::new(FixtureArch::X86_64)
        .bundle()
        .dylib("@rpath/libextfunc_rpath.dylib")
        .rpath(libs.to_string_lossy().into_owned())
        .build_version(10, 9)
        .build();
    let wheel = WheelBuilder::new("plat", "1.0", "cp311-cp311-macosx_10_9_x86_64")
        .file("plat/__init__.py", "")
        .file("plat/sub/__init__.py", "")
        .file_with_mode("plat/sub/module2.so", module, 0o755)
        .write_to(&base)
        .unwrap();

    let options = WheelDelocationOptions {
        sanitize_rpaths: true,
        ..WheelDelocationOptions::default()
    };
    let copied = delocate_wheel(&wheel, &options).unwrap();
    assert_eq!(copied.len(), 2);

    let unpacked = unpack(&wheel, &base, "unpacked");
    let module_path = unpacked.join("plat/sub/module2.so");
    assert!(unpacked.join("plat/.dylibs/libextfunc_rpath.dylib").is_file());
    assert!(unpacked.join("plat/.dylibs/libextfunc2_rpath.dylib").is_file());
    assert_eq!(
        install_names(&module_path).unwrap()[0].1,
        ["@loader_path/../.dylibs/libextfunc_rpath.dylib".to_string()]
    );
    assert_eq!(
        install_names(&unpacked.join("plat/.dylibs/libextfunc_rpath.dylib")).unwrap()[0].1,
        ["@loader_path/libextfunc2_rpath.dylib".to_string()]
    );
    // The stale absolute rpath pointing at the build tree is gone.
    assert_eq!(rpaths(&module_path).unwrap()[0].1, Vec::<String>::new());
}

#[test]
fn basename_collision_leaves_the_wheel_alone() {
    let (_guard, base) = tempdir();
    let (first_dir, second_dir) = (base.join("first"), base.join("second"));
    fs_err::create_dir_all(&first_dir).unwrap();
    fs_err::create_dir_all(&second_dir).unwrap();
    for dir in [&first_dir, &second_dir] {
        let library = dir.join("libfoo.dylib");
        DylibBuilder::new(FixtureArch::X86_64)
            .install_id(library.to_string_lossy().into_owned())
            .write(&library)
            .unwrap();
    }

    let module = DylibBuilder::new(FixtureArch::X86_64)
        .bundle()
        .dylib(first_dir.join("libfoo.dylib").to_string_lossy().into_owned())
        .dylib(second_dir.join("libfoo.dylib").to_string_lossy().into_owned())
        .build();
    let wheel = WheelBuilder::new("plat", "1.0", "cp311-cp311-macosx_10_9_x86_64")
        .file("plat/__init__.py", "")
        .file_with_mode("plat/module.so", module, 0o755)
        .write_to(&base)
        .unwrap();
    let before = fs_err::read(&wheel).unwrap();

    let err = delocate_wheel(&wheel, &WheelDelocationOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        Error::Relink(delocate_relink::Error::Collision { ref basename }) if basename == "libfoo.dylib"
    ));
    assert_eq!(fs_err::read(&wheel).unwrap(), before);
}

#[test]
fn wheel_is_retagged_to_the_bundled_requirement() {
    let (_guard, base) = tempdir();
    let module = DylibBuilder::new(FixtureArch::X86_64)
        .bundle()
        .build_version(12, 0)
        .build();
    let wheel = WheelBuilder::new("plat", "1.0", "cp311-cp311-macosx_10_9_x86_64")
        .file("plat/__init__.py", "")
        .file_with_mode("plat/module.so", module, 0o755)
        .write_to(&base)
        .unwrap();

    let copied = delocate_wheel(&wheel, &WheelDelocationOptions::default()).unwrap();
    assert!(copied.is_empty());

    // Renamed output, original deleted.
    let retagged = base.join("plat-1.0-cp311-cp311-macosx_12_0_x86_64.whl");
    assert!(retagged.is_file());
    assert!(!wheel.exists());

    let unpacked = unpack(&retagged, &base, "unpacked");
    let metadata = wheel_metadata(&unpacked, "plat-1.0.dist-info");
    assert_eq!(
        metadata.get_all("Tag").collect::<Vec<_>>(),
        ["cp311-cp311-macosx_12_0_x86_64"]
    );
    assert!(metadata.contains("Generator", &format!("delocate {}", delocate::VERSION)));
}

#[test]
fn os_too_old_fails_without_writing() {
    let (_guard, base) = tempdir();
    let module = DylibBuilder::new(FixtureArch::X86_64)
        .bundle()
        .build_version(12, 0)
        .build();
    let wheel = WheelBuilder::new("plat", "1.0", "cp311-cp311-macosx_10_9_x86_64")
        .file("plat/__init__.py", "")
        .file_with_mode("plat/module.so", module, 0o755)
        .write_to(&base)
        .unwrap();
    let before = fs_err::read(&wheel).unwrap();

    let options = WheelDelocationOptions {
        require_target_macos_version: Some(MacosVersion::new(10, 6)),
        ..WheelDelocationOptions::default()
    };
    let err = delocate_wheel(&wheel, &options).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("has a minimum target of 12.0"), "{message}");
    assert!(message.contains("MACOSX_DEPLOYMENT_TARGET=12.0"), "{message}");

    assert!(!base.join("plat-1.0-cp311-cp311-macosx_12_0_x86_64.whl").exists());
    assert_eq!(fs_err::read(&wheel).unwrap(), before);
}

#[test]
fn delocation_is_idempotent() {
    let (_guard, base) = tempdir();
    let (wheel, _external) = external_dep_wheel(&base);

    let options = WheelDelocationOptions {
        source_date_epoch: Some(1_700_000_000),
        ..WheelDelocationOptions::default()
    };
    delocate_wheel(&wheel, &options).unwrap();
    let after_first = fs_err::read(&wheel).unwrap();

    // Delocating the already-delocated wheel copies nothing, rewrites
    // nothing, and leaves the file alone.
    let copied = delocate_wheel(&wheel, &options).unwrap();
    assert!(copied.is_empty());
    assert_eq!(fs_err::read(&wheel).unwrap(), after_first);
}

#[test]
fn output_is_reproducible_for_a_fixed_epoch() {
    let (_guard, base) = tempdir();
    let (wheel, _) = external_dep_wheel(&base);
    let (out1, out2) = (base.join("out1"), base.join("out2"));

    for out in [&out1, &out2] {
        fs_err::create_dir_all(out).unwrap();
        let options = WheelDelocationOptions {
            out_wheel: Some(out.join("plat-1.0-cp311-cp311-macosx_10_9_x86_64.whl")),
            source_date_epoch: Some(1_700_000_000),
            ..WheelDelocationOptions::default()
        };
        delocate_wheel(&wheel, &options).unwrap();
    }

    assert_eq!(
        fs_err::read(out1.join("plat-1.0-cp311-cp311-macosx_10_9_x86_64.whl")).unwrap(),
        fs_err::read(out2.join("plat-1.0-cp311-cp311-macosx_10_9_x86_64.whl")).unwrap(),
    );
}

#[test]
fn occupied_bundle_directory_is_fatal() {
    let (_guard, base) = tempdir();
    let build = base.join("build");
    fs_err::create_dir_all(&build).unwrap();
    let external = build.join("libextfunc.dylib");
    DylibBuilder::new(FixtureArch::X86_64)
        .install_id(external.to_string_lossy().into_owned())
        .write(&external)
        .unwrap();
    let module = DylibBuilder::new(FixtureArch::X86_64)
        .bundle()
        .dylib(external.to_string_lossy().into_owned())
        .build();
    let wheel = WheelBuilder::new("plat", "1.0", "cp311-cp311-macosx_10_9_x86_64")
        .file("plat/__init__.py", "")
        .file_with_mode("plat/module.so", module, 0o755)
        .file("plat/.dylibs/leftover.dylib", "stale")
        .write_to(&base)
        .unwrap();

    let err = delocate_wheel(&wheel, &WheelDelocationOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Occupied { .. }));
}

#[test]
fn missing_dependencies_fail_in_one_batch() {
    let (_guard, base) = tempdir();
    let module = DylibBuilder::new(FixtureArch::X86_64)
        .bundle()
        .dylib("/gone/liba.dylib")
        .dylib("/gone/libb.dylib")
        .build_version(10, 9)
        .build();
    let wheel = WheelBuilder::new("plat", "1.0", "cp311-cp311-macosx_10_9_x86_64")
        .file("plat/__init__.py", "")
        .file_with_mode("plat/module.so", module, 0o755)
        .write_to(&base)
        .unwrap();

    let err = delocate_wheel(&wheel, &WheelDelocationOptions::default()).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("/gone/liba.dylib"), "{message}");
    assert!(message.contains("/gone/libb.dylib"), "{message}");

    // The same wheel passes with ignore_missing.
    let options = WheelDelocationOptions {
        ignore_missing: true,
        ..WheelDelocationOptions::default()
    };
    let copied = delocate_wheel(&wheel, &options).unwrap();
    assert!(copied.is_empty());
}

#[test]
fn wheel_libs_reports_without_modifying() {
    let (_guard, base) = tempdir();
    let (wheel, external) = external_dep_wheel(&base);
    let before = fs_err::read(&wheel).unwrap();

    let graph = wheel_libs(&wheel, &delocate::LibraryInspection::All, false, false).unwrap();
    let depended: Vec<String> = graph
        .depended_paths()
        .iter()
        .map(|path| path.display().to_string())
        .collect();
    assert!(depended.contains(&external.display().to_string()));
    // System references are listed but never followed.
    assert_eq!(fs_err::read(&wheel).unwrap(), before);
}
