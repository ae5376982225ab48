//! Integration tests for the stratus pipeline engine: end-to-end
//! scenarios through real pipelines over container files on disk.

mod common;

use common::{init_logging, reader_for, write_tyx_file};
use std::sync::Arc;
use stratus::io::format::{CfFile, CfFormat};
use stratus::metadata::Metadata;
use stratus::prelude::*;
use stratus::stage::keys;
use stratus::stream::Streamable;

/// One file, `time = [0, 1, 2]`, `T[t, j, i] = 100t + 10j + i` on a
/// 2x2 grid. Requesting index 1 returns the t = 1 plane.
#[test]
fn test_reader_resolves_an_index_to_a_slice() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut data = Vec::new();
    for t in 0..3 {
        for j in 0..2 {
            for i in 0..2 {
                data.push((100 * t + 10 * j + i) as f64);
            }
        }
    }
    let path = write_tyx_file(
        dir.path(),
        "t.bin",
        &[0.0, 1.0, 2.0],
        "days since 2000-01-01",
        "standard",
        &[0.0, 10.0],
        &[0.0, 10.0],
        &[("T", data)],
    );

    let mut pipeline = Pipeline::new();
    let src = pipeline.add_stage("reader", Box::new(reader_for(&[path])));
    let driver = PipelineDriver::new(pipeline);

    let executive = Executive::new().with_arrays(["T"]);
    let results = driver.update(src, &executive).unwrap();
    assert_eq!(results.len(), 3);

    let mesh = results[1].require_mesh().unwrap();
    assert_eq!(mesh.time(), 1.0);
    assert_eq!(mesh.time_step(), 1);
    assert_eq!(
        mesh.point_arrays()
            .get("T")
            .unwrap()
            .as_slice::<f64>()
            .unwrap(),
        &[100.0, 101.0, 110.0, 111.0]
    );
}

/// Two files whose time units differ; the reported axis is converted
/// to the first file's units: hours 48 and 72 become days 2 and 3.
#[test]
fn test_time_axis_unit_conversion_across_files() {
    let dir = tempfile::tempdir().unwrap();
    let grid = vec![0.0; 2];
    let a = write_tyx_file(
        dir.path(),
        "a.bin",
        &[0.0, 1.0],
        "days since 2000-01-01",
        "standard",
        &[0.0],
        &[0.0],
        &[("T", grid.clone())],
    );
    let b = write_tyx_file(
        dir.path(),
        "b.bin",
        &[48.0, 72.0],
        "hours since 2000-01-01",
        "standard",
        &[0.0],
        &[0.0],
        &[("T", grid)],
    );

    let mut pipeline = Pipeline::new();
    let src = pipeline.add_stage("reader", Box::new(reader_for(&[a, b])));
    let driver = PipelineDriver::new(pipeline);

    let md = driver.report(src).unwrap();
    assert_eq!(md.get_u64("number_of_time_steps"), Some(4));
    assert_eq!(md.get_u64s("step_count").unwrap(), vec![2, 2]);
    let t = md
        .metadata("coordinates")
        .unwrap()
        .get_f64s("t")
        .unwrap();
    for (have, want) in t.iter().zip([0.0, 1.0, 2.0, 3.0]) {
        assert!((have - want).abs() < 1e-9, "axis {t:?}");
    }
}

/// Files with disagreeing calendars are a semantic error.
#[test]
fn test_calendar_disagreement_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let grid = vec![0.0];
    let a = write_tyx_file(
        dir.path(), "a.bin", &[0.0], "days since 2000-01-01", "standard",
        &[0.0], &[0.0], &[("T", grid.clone())],
    );
    let b = write_tyx_file(
        dir.path(), "b.bin", &[1.0], "days since 2000-01-01", "noleap",
        &[0.0], &[0.0], &[("T", grid)],
    );

    let mut pipeline = Pipeline::new();
    let src = pipeline.add_stage("reader", Box::new(reader_for(&[a, b])));
    let driver = PipelineDriver::new(pipeline);
    let err = driver.report(src).unwrap_err();
    assert!(err.to_string().contains("calendar"), "{err}");
}

/// Constant wind on a 3x3 lat/lon mesh has zero interior vorticity.
#[test]
fn test_vorticity_pipeline_on_constant_wind() {
    let dir = tempfile::tempdir().unwrap();
    let ones = vec![1.0; 9];
    let path = write_tyx_file(
        dir.path(),
        "wind.bin",
        &[0.0],
        "days since 2000-01-01",
        "standard",
        &[10.0, 0.0, -10.0],
        &[0.0, 10.0, 20.0],
        &[("u", ones.clone()), ("v", ones)],
    );

    let mut vorticity = Vorticity::new();
    vorticity
        .properties_mut()
        .set("component_0_variable", PropertyValue::Str("u".into()))
        .unwrap();
    vorticity
        .properties_mut()
        .set("component_1_variable", PropertyValue::Str("v".into()))
        .unwrap();

    let mut pipeline = Pipeline::new();
    let src = pipeline.add_stage("reader", Box::new(reader_for(&[path])));
    let vort = pipeline.add_stage("vorticity", Box::new(vorticity));
    pipeline.connect(src, vort).unwrap();
    let driver = PipelineDriver::new(pipeline);

    let results = driver
        .update(vort, &Executive::new().with_arrays(["vorticity"]))
        .unwrap();
    let mesh = results[0].require_mesh().unwrap();
    let w = mesh
        .point_arrays()
        .get("vorticity")
        .unwrap()
        .as_slice::<f64>()
        .unwrap();
    assert!(w[4].abs() < 1e-12);
    // the inputs pass through alongside the product
    assert!(mesh.point_arrays().has("u"));
}

/// Hybrid vertical integral of q = 1 with a spanning [0, 1] and b = 0
/// equals -(1/9.81) * p_top.
#[test]
fn test_vertical_integral_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("column.bin");
    let mut time_atts = Metadata::new();
    time_atts.set("units", "days since 2000-01-01");
    time_atts.set("calendar", "standard");
    NativeFileWriter::new()
        .dimension("time", 1)
        .dimension("plev", 4)
        .dimension("ilev", 5)
        .dimension("lat", 1)
        .dimension("lon", 1)
        .variable("time", ["time"], time_atts, VariantArray::from_vec(vec![0.0f64]))
        .variable("plev", ["plev"], Metadata::new(),
            VariantArray::from_vec(vec![0.0f64, 1.0, 2.0, 3.0]))
        .variable("lat", ["lat"], Metadata::new(), VariantArray::from_vec(vec![0.0f64]))
        .variable("lon", ["lon"], Metadata::new(), VariantArray::from_vec(vec![0.0f64]))
        .variable("a_bnds", ["ilev"], Metadata::new(),
            VariantArray::from_vec(vec![0.0f64, 0.25, 0.5, 0.75, 1.0]))
        .variable("b_bnds", ["ilev"], Metadata::new(),
            VariantArray::from_vec(vec![0.0f64; 5]))
        .variable("ps", ["time", "lat", "lon"], Metadata::new(),
            VariantArray::from_vec(vec![100000.0f64]))
        .variable("q", ["time", "plev", "lat", "lon"], Metadata::new(),
            VariantArray::from_vec(vec![1.0f64; 4]))
        .write(&path)
        .unwrap();

    let mut reader = reader_for(&[path]);
    reader
        .properties_mut()
        .set("z_axis_variable", PropertyValue::Str("plev".into()))
        .unwrap();

    let mut integral = VerticalIntegral::new();
    integral
        .properties_mut()
        .set("integration_variable", PropertyValue::Str("q".into()))
        .unwrap();
    integral
        .properties_mut()
        .set("p_top_override_value", PropertyValue::Float(100.0))
        .unwrap();

    let mut pipeline = Pipeline::new();
    let src = pipeline.add_stage("reader", Box::new(reader));
    let vint = pipeline.add_stage("integral", Box::new(integral));
    pipeline.connect(src, vint).unwrap();
    let driver = PipelineDriver::new(pipeline);

    let results = driver
        .update(vint, &Executive::new().with_arrays(["integrated_var"]))
        .unwrap();
    let mesh = results[0].require_mesh().unwrap();
    assert_eq!(mesh.extent()[4..6], [0, 0]);
    let out = mesh
        .point_arrays()
        .get("integrated_var")
        .unwrap()
        .get_f64(0)
        .unwrap();
    let expected = -(1.0 / 9.81) * 100.0;
    assert!((out - expected).abs() < 1e-6, "{out} vs {expected}");
}

/// Monthly mean over 60 daily steps of a field equal to the step
/// index, on a 30-day calendar: month 0 averages 14.5, month 1 44.5.
#[test]
fn test_monthly_mean_map_reduce() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let times: Vec<f64> = (0..60).map(|i| i as f64).collect();
    let values: Vec<f64> = (0..60).map(|i| i as f64).collect();
    let path = write_tyx_file(
        dir.path(),
        "daily.bin",
        &times,
        "days since 2000-01-01",
        "360_day",
        &[0.0],
        &[0.0],
        &[("T", values)],
    );

    let mut reduction = TemporalReduction::new();
    reduction
        .properties_mut()
        .set("arrays", PropertyValue::StrList(vec!["T".into()]))
        .unwrap();

    let mut pipeline = Pipeline::new();
    let src = pipeline.add_stage("reader", Box::new(reader_for(&[path])));
    let monthly = pipeline.add_stage("monthly_mean", Box::new(reduction));
    pipeline.connect(src, monthly).unwrap();
    let driver = PipelineDriver::new(pipeline);

    let md = driver.report(monthly).unwrap();
    assert_eq!(md.get_u64("number_of_intervals"), Some(2));

    let results = driver
        .update(monthly, &Executive::new().with_arrays(["T"]))
        .unwrap();
    assert_eq!(results.len(), 2);
    let month = |i: usize| {
        results[i]
            .require_mesh()
            .unwrap()
            .point_arrays()
            .get("T")
            .unwrap()
            .get_f64(0)
            .unwrap()
    };
    assert!((month(0) - 14.5).abs() < 1e-12);
    assert!((month(1) - 44.5).abs() < 1e-12);
}

/// AR detection reduces a month of daily steps into one detection
/// table, rows in step order.
#[test]
fn test_ar_detect_map_reduce() {
    let dir = tempfile::tempdir().unwrap();
    let times: Vec<f64> = (0..4).map(|i| i as f64).collect();
    // step t holds [300, 0] on even steps, [0, 0] on odd ones
    let mut values = Vec::new();
    for t in 0..4 {
        values.extend(if t % 2 == 0 { [300.0, 0.0] } else { [0.0, 0.0] });
    }
    let path = write_tyx_file(
        dir.path(),
        "ivt.bin",
        &times,
        "days since 2000-01-01",
        "standard",
        &[0.0],
        &[0.0, 10.0],
        &[("ivt", values)],
    );

    let mut detector = ArDetect::new();
    detector
        .properties_mut()
        .set("interval", PropertyValue::Str("monthly".into()))
        .unwrap();

    let mut pipeline = Pipeline::new();
    let src = pipeline.add_stage("reader", Box::new(reader_for(&[path])));
    let detect = pipeline.add_stage("ar_detect", Box::new(detector));
    pipeline.connect(src, detect).unwrap();
    let driver = PipelineDriver::new(pipeline);

    let md = driver.report(detect).unwrap();
    assert_eq!(md.get_u64("number_of_intervals"), Some(1));
    assert_eq!(md.get_str(keys::INDEX_REQUEST), Some("interval"));

    let results = driver.update(detect, &Executive::new()).unwrap();
    assert_eq!(results.len(), 1);
    let table = results[0].require_table().unwrap();
    assert_eq!(table.n_rows(), 4);
    let counts: Vec<f64> = (0..4)
        .map(|row| table.column("ar_count").unwrap().get_f64(row).unwrap())
        .collect();
    assert_eq!(counts, vec![1.0, 0.0, 1.0, 0.0]);
    let steps: Vec<f64> = (0..4)
        .map(|row| table.column("time_step").unwrap().get_f64(row).unwrap())
        .collect();
    assert_eq!(steps, vec![0.0, 1.0, 2.0, 3.0]);
}

/// A bounds request and the extent request it resolves to yield equal
/// datasets.
#[test]
fn test_extent_and_bounds_requests_are_equivalent() {
    let dir = tempfile::tempdir().unwrap();
    let data: Vec<f64> = (0..16).map(|i| i as f64).collect();
    let path = write_tyx_file(
        dir.path(),
        "grid.bin",
        &[0.0],
        "days since 2000-01-01",
        "standard",
        &[0.0, 10.0, 20.0, 30.0],
        &[0.0, 10.0, 20.0, 30.0],
        &[("T", data)],
    );

    let mut pipeline = Pipeline::new();
    let src = pipeline.add_stage("reader", Box::new(reader_for(&[path])));
    let driver = PipelineDriver::new(pipeline);
    driver.report(src).unwrap();

    let mut by_bounds = Metadata::new();
    by_bounds.set("time_step", 0u64);
    by_bounds.set(keys::ARRAYS, vec!["T".to_string()]);
    by_bounds.set(keys::BOUNDS, [10.0, 20.0, 10.0, 30.0, 0.0, 0.0]);

    let mut by_extent = Metadata::new();
    by_extent.set("time_step", 0u64);
    by_extent.set(keys::ARRAYS, vec!["T".to_string()]);
    by_extent.set(keys::EXTENT, [1u64, 2, 1, 3, 0, 0]);

    let a = driver.pull(src, 0, &by_bounds).unwrap();
    let b = driver.pull(src, 0, &by_extent).unwrap();
    stratus::dataset::diff(&a, &b, 0.0).unwrap();
    assert_eq!(
        a.require_mesh().unwrap().point_arrays().get("T").unwrap().len(),
        6
    );
}

/// Running the same pipeline on 1 rank and on 3 ranks produces
/// byte-identical per-index outputs under the block partition.
#[test]
fn test_distributed_equivalence() {
    let dir = tempfile::tempdir().unwrap();
    let times: Vec<f64> = (0..8).map(|i| i as f64).collect();
    let values: Vec<f64> = (0..8 * 4).map(|i| (i * 7 % 13) as f64).collect();
    let path = write_tyx_file(
        dir.path(),
        "field.bin",
        &times,
        "days since 2000-01-01",
        "standard",
        &[0.0, 10.0],
        &[0.0, 10.0],
        &[("T", values)],
    );

    let run_rank = |comm: Option<LocalComm>, path: std::path::PathBuf| {
        let reader = match &comm {
            Some(c) => reader_for(&[path]).with_communicator(Arc::new(c.clone())),
            None => reader_for(&[path]),
        };
        let mut pipeline = Pipeline::new();
        let src = pipeline.add_stage("reader", Box::new(reader));
        let driver = match comm {
            Some(c) => PipelineDriver::with_communicator(pipeline, Arc::new(c)),
            None => PipelineDriver::new(pipeline),
        };
        driver
            .update(src, &Executive::new().with_arrays(["T"]))
            .unwrap()
    };

    // serial baseline
    let baseline = run_rank(None, path.clone());
    assert_eq!(baseline.len(), 8);

    // three ranks in three threads
    let handles: Vec<_> = LocalComm::split(3)
        .into_iter()
        .map(|comm| {
            let path = path.clone();
            std::thread::spawn(move || run_rank(Some(comm), path))
        })
        .collect();
    let mut distributed = Vec::new();
    for handle in handles {
        distributed.extend(handle.join().unwrap());
    }

    assert_eq!(distributed.len(), baseline.len());
    for (a, b) in baseline.iter().zip(&distributed) {
        let mut sa = BinaryStream::new();
        a.to_stream(&mut sa);
        let mut sb = BinaryStream::new();
        b.to_stream(&mut sb);
        assert_eq!(sa.as_slice(), sb.as_slice());
    }
}

/// An open-counting format wrapper: a second report must hit the
/// caches and never touch the files again.
struct CountingFormat {
    inner: NativeFormat,
    opens: Arc<std::sync::atomic::AtomicUsize>,
}

impl CfFormat for CountingFormat {
    fn open(&self, path: &std::path::Path) -> stratus::Result<Box<dyn CfFile>> {
        self.opens.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.inner.open(path)
    }
}

#[test]
fn test_second_report_does_not_rescan_sources() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_tyx_file(
        dir.path(),
        "scan.bin",
        &[0.0, 1.0],
        "days since 2000-01-01",
        "standard",
        &[0.0],
        &[0.0],
        &[("T", vec![0.0, 1.0])],
    );

    let opens = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let reader = reader_for(&[path]).with_format(Arc::new(CountingFormat {
        inner: NativeFormat,
        opens: Arc::clone(&opens),
    }));

    let mut pipeline = Pipeline::new();
    let src = pipeline.add_stage("reader", Box::new(reader));
    let driver = PipelineDriver::new(pipeline);

    driver.report(src).unwrap();
    let after_first = opens.load(std::sync::atomic::Ordering::SeqCst);
    assert!(after_first > 0);

    driver.report(src).unwrap();
    assert_eq!(opens.load(std::sync::atomic::Ordering::SeqCst), after_first);
}

/// The writer emits one file per index, interpolating the pattern.
#[test]
fn test_writer_emits_per_index_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_tyx_file(
        dir.path(),
        "in.bin",
        &[0.0, 1.0],
        "days since 2000-01-01",
        "standard",
        &[0.0],
        &[0.0],
        &[("T", vec![5.0, 6.0])],
    );

    let mut writer = DatasetWriter::new();
    let pattern = dir.path().join("out_%t%.bin");
    writer
        .properties_mut()
        .set(
            "file_name",
            PropertyValue::Str(pattern.to_string_lossy().into_owned()),
        )
        .unwrap();

    let mut pipeline = Pipeline::new();
    let src = pipeline.add_stage("reader", Box::new(reader_for(&[path])));
    let sink = pipeline.add_stage("writer", Box::new(writer));
    pipeline.connect(src, sink).unwrap();
    let driver = PipelineDriver::new(pipeline);

    driver
        .update(sink, &Executive::new().with_arrays(["T"]))
        .unwrap();

    for step in 0..2 {
        let out = stratus::io::read_dataset(dir.path().join(format!("out_{step}.bin"))).unwrap();
        let mesh = out.as_mesh().unwrap();
        assert_eq!(mesh.time_step(), step as u64);
        assert_eq!(
            mesh.point_arrays().get("T").unwrap().get_f64(0).unwrap(),
            5.0 + step as f64
        );
    }
}
