#![warn(
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_qualifications
)]
#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

mod defs;

fn main() -> ExitCode {
    let root_path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .canonicalize()
        .unwrap();
    let tests_dir = root_path.join("scenario-tests").join("tests");

    let args = libtest_mimic::Arguments::from_args();

    let tests = gather_tests(&tests_dir)
        .into_iter()
        .map(|test_path| {
            let name = test_path
                .strip_prefix(&tests_dir)
                .unwrap()
                .with_extension("")
                .to_string_lossy()
                .into_owned();
            libtest_mimic::Trial::test(name, move || {
                test::run_test(&test_path).map_err(|e| e.into())
            })
        })
        .collect();

    let conclusion = libtest_mimic::run(&args, tests);
    if conclusion.has_failed() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// YAML files below `dir`, recursively.
fn gather_tests(dir: &Path) -> BTreeSet<PathBuf> {
    let mut tests = BTreeSet::new();
    let mut dir_queue = vec![dir.to_path_buf()];

    while let Some(current_dir) = dir_queue.pop() {
        for entry in current_dir.read_dir().unwrap() {
            let entry = entry.unwrap();
            let path = entry.path();
            if entry.file_type().unwrap().is_dir() {
                dir_queue.push(path);
            } else if matches!(
                path.extension().and_then(OsStr::to_str),
                Some("yaml" | "yml")
            ) {
                tests.insert(path);
            }
        }
    }

    tests
}
