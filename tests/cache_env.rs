//! The environment override disabling the metadata cache.
//!
//! Lives in its own test binary: environment variables are process
//! global, so this must not share a process with the other cache
//! tests.

mod common;

use common::write_tyx_file;
use stratus::io::cache::CACHE_ENV_VAR;
use stratus::prelude::*;

#[test]
fn test_env_var_disables_metadata_cache() {
    std::env::set_var(CACHE_ENV_VAR, "0");

    let data_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let file = write_tyx_file(
        data_dir.path(),
        "x.bin",
        &[0.0],
        "days since 2000-01-01",
        "standard",
        &[0.0],
        &[0.0],
        &[("T", vec![1.0])],
    );

    let mut reader = CfReader::new();
    reader
        .properties_mut()
        .set(
            "file_names",
            PropertyValue::StrList(vec![file.to_string_lossy().into_owned()]),
        )
        .unwrap();
    reader
        .properties_mut()
        .set(
            "metadata_cache_dir",
            PropertyValue::Str(cache_dir.path().to_string_lossy().into_owned()),
        )
        .unwrap();
    // the property says cache, the environment says don't
    reader
        .properties_mut()
        .set("cache_metadata", PropertyValue::Bool(true))
        .unwrap();

    reader.report_metadata(0, &[]).unwrap();

    let cached: Vec<_> = std::fs::read_dir(cache_dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert!(cached.is_empty(), "cache written despite the override");

    std::env::remove_var(CACHE_ENV_VAR);
}
