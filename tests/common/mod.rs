//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use stratus::io::NativeFileWriter;
use stratus::metadata::Metadata;
use stratus::prelude::*;

/// Install a subscriber once so `RUST_LOG=stratus=debug cargo test`
/// shows the engine's tracing output.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Write a `(time, lat, lon)` container file.
///
/// Every variable in `vars` is shaped `(time, lat, lon)` and stored
/// row-major, time slowest.
pub fn write_tyx_file(
    dir: &Path,
    name: &str,
    times: &[f64],
    units: &str,
    calendar: &str,
    lat: &[f64],
    lon: &[f64],
    vars: &[(&str, Vec<f64>)],
) -> PathBuf {
    let path = dir.join(name);
    let mut time_atts = Metadata::new();
    time_atts.set("units", units);
    time_atts.set("calendar", calendar);

    let mut writer = NativeFileWriter::new()
        .dimension("time", times.len() as u64)
        .dimension("lat", lat.len() as u64)
        .dimension("lon", lon.len() as u64)
        .variable(
            "time",
            ["time"],
            time_atts,
            VariantArray::from_vec(times.to_vec()),
        )
        .variable(
            "lat",
            ["lat"],
            Metadata::new(),
            VariantArray::from_vec(lat.to_vec()),
        )
        .variable(
            "lon",
            ["lon"],
            Metadata::new(),
            VariantArray::from_vec(lon.to_vec()),
        );
    for (var, data) in vars {
        assert_eq!(data.len(), times.len() * lat.len() * lon.len());
        writer = writer.variable(
            *var,
            ["time", "lat", "lon"],
            Metadata::new(),
            VariantArray::from_vec(data.clone()),
        );
    }
    writer.write(&path).unwrap();
    path
}

/// A reader over an explicit file list, metadata caching disabled.
pub fn reader_for(paths: &[PathBuf]) -> CfReader {
    let mut reader = CfReader::new();
    let names: Vec<String> = paths
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    reader
        .properties_mut()
        .set("file_names", PropertyValue::StrList(names))
        .unwrap();
    reader
        .properties_mut()
        .set("cache_metadata", PropertyValue::Bool(false))
        .unwrap();
    reader
}
