//! CF reader source stage.
//!
//! Zero-input stage that turns a set of CF-convention files into a
//! stream of per-index [`CartesianMesh`] datasets. The set of inputs
//! comes from an explicit file list or a regex matched against a
//! directory listing; the time axis is assembled by one of four
//! strategies (scanned from files in parallel, supplied by the user,
//! inferred from filenames, or synthesized); reported metadata is
//! cached on disk and broadcast from the scanning rank.

use crate::array::VariantArray;
use crate::calendar::{self, Calendar, Units};
use crate::comm::{Communicator, SelfComm};
use crate::coordinates::{bounds_to_extent, extent_to_bounds, index_of};
use crate::dataset::{CartesianMesh, Dataset, DatasetRef};
use crate::error::{Error, Result};
use crate::io::cache;
use crate::io::format::{CfFormat, NativeFormat};
use crate::metadata::Metadata;
use crate::pool::{wait_all, ThreadPool};
use crate::stage::{
    keys, PropertyBag, PropertyDescriptor, PropertyValue, Requests, Stage,
};
use crate::stream::{BinaryStream, Streamable};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

fn descriptors() -> &'static [PropertyDescriptor] {
    static DESCRIPTORS: OnceLock<Vec<PropertyDescriptor>> = OnceLock::new();
    DESCRIPTORS.get_or_init(|| {
        vec![
            PropertyDescriptor::new(
                "file_names",
                PropertyValue::StrList(Vec::new()),
                "paths/file names to read",
            ),
            PropertyDescriptor::new(
                "files_regex",
                PropertyValue::Str(String::new()),
                "a regular expression that matches the set of files comprising the dataset",
            ),
            PropertyDescriptor::new(
                "metadata_cache_dir",
                PropertyValue::Str(String::new()),
                "a directory where metadata caches can be stored",
            ),
            PropertyDescriptor::new(
                "x_axis_variable",
                PropertyValue::Str("lon".into()),
                "name of the variable that has x axis coordinates (lon)",
            ),
            PropertyDescriptor::new(
                "y_axis_variable",
                PropertyValue::Str("lat".into()),
                "name of the variable that has y axis coordinates (lat)",
            ),
            PropertyDescriptor::new(
                "z_axis_variable",
                PropertyValue::Str(String::new()),
                "name of the variable that has z axis coordinates ()",
            ),
            PropertyDescriptor::new(
                "t_axis_variable",
                PropertyValue::Str("time".into()),
                "name of the variable that has t axis coordinates (time)",
            ),
            PropertyDescriptor::new(
                "calendar",
                PropertyValue::Str(String::new()),
                "runtime override for the time calendar",
            ),
            PropertyDescriptor::new(
                "units",
                PropertyValue::Str(String::new()),
                "runtime override for the time units",
            ),
            PropertyDescriptor::new(
                "filename_time_template",
                PropertyValue::Str(String::new()),
                "date template for decoding time from the input filenames",
            ),
            PropertyDescriptor::new(
                "t_values",
                PropertyValue::FloatList(Vec::new()),
                "time values set by the user when the files have no time variable",
            ),
            PropertyDescriptor::new(
                "thread_pool_size",
                PropertyValue::Int(-1),
                "number of I/O threads (-1)",
            ),
            PropertyDescriptor::new(
                "cache_metadata",
                PropertyValue::Bool(true),
                "a flag that enables the use of cached metadata",
            ),
        ]
    })
}

/// Reads CF-convention files as per-time-step cartesian meshes.
pub struct CfReader {
    properties: PropertyBag,
    comm: Arc<dyn Communicator>,
    format: Arc<dyn CfFormat>,
    cached: Option<(u64, Metadata)>,
}

impl Default for CfReader {
    fn default() -> Self {
        Self::new()
    }
}

impl CfReader {
    /// Create a reader over the native container format, single rank.
    pub fn new() -> Self {
        Self {
            properties: PropertyBag::from_descriptors(descriptors()),
            comm: Arc::new(SelfComm),
            format: Arc::new(NativeFormat),
            cached: None,
        }
    }

    /// Use a different file format binding.
    pub fn with_format(mut self, format: Arc<dyn CfFormat>) -> Self {
        self.format = format;
        self
    }

    /// Bind to a communicator; the highest rank scans, all ranks
    /// receive the metadata by broadcast.
    pub fn with_communicator(mut self, comm: Arc<dyn Communicator>) -> Self {
        self.comm = comm;
        self
    }

    /// Canonicalize the inputs to a root path plus an ordered file list.
    fn enumerate_files(&self) -> Result<(PathBuf, Vec<String>)> {
        let file_names = self.properties.str_list("file_names")?;
        if !file_names.is_empty() {
            let first = Path::new(&file_names[0]);
            let root = first.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
            let files = file_names
                .iter()
                .map(|f| {
                    Path::new(f)
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .ok_or_else(|| Error::config(format!("\"{f}\" has no file name")))
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok((root, files));
        }

        let regex_path = self.properties.str("files_regex")?;
        if regex_path.is_empty() {
            return Err(Error::config(
                "either file_names or files_regex must be set",
            ));
        }
        let full = Path::new(regex_path);
        let root = full.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        let pattern = full
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::config(format!("\"{regex_path}\" has no pattern part")))?;
        let regex = Regex::new(&pattern)?;

        let mut files: Vec<String> = std::fs::read_dir(&root)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| regex.is_match(name))
            .collect();
        files.sort();
        if files.is_empty() {
            return Err(Error::semantic(format!(
                "failed to locate any files matching \"{pattern}\" under \"{}\"",
                root.display()
            )));
        }
        Ok((root, files))
    }

    /// Assemble the time axis from the files themselves, reading each
    /// file's time variable on the I/O pool and converting per-file
    /// units to the base units where they differ.
    fn time_axis_from_files(
        &self,
        root: &Path,
        files: &[String],
        t_axis_variable: &str,
        attributes: &mut Metadata,
    ) -> Result<(Vec<f64>, Vec<u64>)> {
        let mut time_atts = attributes
            .metadata(t_axis_variable)
            .cloned()
            .unwrap_or_else(|| {
                tracing::warn!(
                    variable = t_axis_variable,
                    "attribute metadata for the time axis is missing, \
                     temporal analysis is likely to fail"
                );
                Metadata::new()
            });

        let calendar_override = self.properties.str("calendar")?;
        if !calendar_override.is_empty() {
            tracing::warn!(calendar = calendar_override,
                "overriding the calendar with the runtime provided value");
            time_atts.set("calendar", calendar_override);
        }
        let units_override = self.properties.str("units")?;
        if !units_override.is_empty() {
            tracing::warn!(units = units_override,
                "overriding the time units with the runtime provided value");
            time_atts.set("units", units_override);
        }

        let has_units = time_atts.has("units");
        if !has_units {
            tracing::warn!(variable = t_axis_variable,
                "the units attribute for the time axis is missing");
        }
        let has_calendar = time_atts.has("calendar");
        if !has_calendar {
            tracing::warn!(variable = t_axis_variable,
                "the calendar attribute for the time axis is missing, \
                 using \"standard\"");
            time_atts.set("calendar", "standard");
        }
        let base_calendar = time_atts.get_str("calendar").unwrap_or("standard").to_string();
        let base_units = time_atts.get_str("units").unwrap_or("").to_string();

        // reading the time axis is the slow part of the scan; one task
        // per file on the I/O pool
        let pool = ThreadPool::new(self.properties.int("thread_pool_size")?);
        let handles: Vec<_> = files
            .iter()
            .map(|file| {
                let format = Arc::clone(&self.format);
                let path = root.join(file);
                let t_var = t_axis_variable.to_string();
                pool.spawn(move || {
                    let fh = format.open(&path)?;
                    let values = fh.read_all(&t_var)?;
                    let atts = fh.variable(&t_var)?.attributes;
                    Ok((values, atts))
                })
            })
            .collect();

        let mut t_axis: Vec<f64> = Vec::new();
        let mut step_count: Vec<u64> = Vec::new();
        for (i, result) in wait_all(handles).into_iter().enumerate() {
            let (values, atts) = result
                .map_err(|e| Error::semantic(format!("file \"{}\": {e}", files[i])))?;
            if values.is_empty() {
                return Err(Error::semantic(format!(
                    "file \"{}\" had no time values",
                    files[i]
                )));
            }

            // every file must use the base calendar
            let calendar_i = atts.get_str("calendar").unwrap_or("").to_string();
            if (!has_calendar && !calendar_i.is_empty())
                || (has_calendar && calendar_i != base_calendar)
            {
                return Err(Error::semantic(format!(
                    "the base calendar is \"{base_calendar}\" but file \"{}\" \
                     has the \"{calendar_i}\" calendar",
                    files[i]
                )));
            }

            let values = values.to_f64_vec()?;
            step_count.push(values.len() as u64);

            let units_i = atts.get_str("units").unwrap_or("").to_string();
            if units_i == base_units {
                t_axis.extend(values);
            } else {
                if !has_units {
                    return Err(Error::semantic(
                        "calendaring conversion requires time units",
                    ));
                }
                tracing::warn!(file = %files[i], units = %units_i, base = %base_units,
                    "file units differ from base units, converting");
                let from = Units::parse(&units_i)?;
                let to = Units::parse(&base_units)?;
                let cal = Calendar::from_name(&base_calendar)?;
                for value in values {
                    t_axis.push(calendar::convert_offset(value, &from, &to, cal)?);
                }
            }
        }

        // a user supplied time axis overrides what was read
        let t_values = self.properties.float_list("t_values")?;
        if !t_values.is_empty() {
            tracing::warn!("overriding the time coordinates stored on disk \
                with runtime provided values");
            if t_values.len() != t_axis.len() {
                return Err(Error::config(format!(
                    "{} time values given, {} are necessary",
                    t_values.len(),
                    t_axis.len()
                )));
            }
            t_axis = t_values.to_vec();
        }

        attributes.set(t_axis_variable, time_atts);
        Ok((t_axis, step_count))
    }

    /// Decode a date from a filename using the template's `%Y`, `%m`,
    /// `%d`, `%H`, `%M`, `%S` fields.
    fn filename_date(template: &str, name: &str) -> Result<calendar::Date> {
        let mut date = calendar::Date::ymd(0, 1, 1);
        let bytes = name.as_bytes();
        let mut pos = 0usize;
        let mut chars = template.chars().peekable();
        let fail = || {
            Error::config(format!(
                "failed to infer time from filename \"{name}\" using format \"{template}\""
            ))
        };
        while let Some(c) = chars.next() {
            if c == '%' {
                let field = chars.next().ok_or_else(fail)?;
                let width = if field == 'Y' { 4 } else { 2 };
                if pos + width > bytes.len() {
                    return Err(fail());
                }
                let digits = &name[pos..pos + width];
                let value: i64 = digits.parse().map_err(|_| fail())?;
                pos += width;
                match field {
                    'Y' => date.year = value,
                    'm' => date.month = value as u32,
                    'd' => date.day = value as u32,
                    'H' => date.hour = value as u32,
                    'M' => date.minute = value as u32,
                    'S' => date.second = value as f64,
                    _ => return Err(fail()),
                }
            } else {
                if pos >= bytes.len() || bytes[pos] != c as u8 {
                    return Err(fail());
                }
                pos += 1;
            }
        }
        Ok(date)
    }

    /// Scan the dataset from scratch on the scanning rank.
    fn scan(&self, root: &Path, files: &[String]) -> Result<Metadata> {
        let first = self.format.open(&root.join(&files[0]))?;

        // enumerate variables and their attributes, recording layout
        // for execute-time hyperslab requests
        let mut variables: Vec<String> = Vec::new();
        let mut attributes = Metadata::new();
        for name in first.variables() {
            let var = first.variable(&name)?;
            let mut atts = var.attributes.clone();
            atts.set("cf_dim_names", var.dimensions.clone());
            atts.set("cf_dims", var.shape.clone());
            atts.set("cf_type_code", var.data_type as u8);
            attributes.set(&name, atts);
            variables.push(name);
        }

        // spatial coordinates
        let mut whole_extent = [0u64; 6];
        let mut bounds = [0.0f64; 6];

        let x_axis_variable = self.properties.required_str("x_axis_variable")?.to_string();
        let x_axis = first.read_all(&x_axis_variable).map_err(|e| {
            Error::semantic(format!(
                "failed to read the x axis \"{x_axis_variable}\": {e}"
            ))
        })?;
        whole_extent[1] = (x_axis.len() - 1) as u64;
        bounds[0] = x_axis.get_f64(0)?;
        bounds[1] = x_axis.get_f64(x_axis.len() - 1)?;

        let y_axis_variable = self.properties.str("y_axis_variable")?.to_string();
        let y_axis = if y_axis_variable.is_empty() {
            VariantArray::from_vec(vec![0.0f64])
        } else {
            let y = first.read_all(&y_axis_variable).map_err(|e| {
                Error::semantic(format!(
                    "failed to read the y axis \"{y_axis_variable}\": {e}"
                ))
            })?;
            whole_extent[3] = (y.len() - 1) as u64;
            bounds[2] = y.get_f64(0)?;
            bounds[3] = y.get_f64(y.len() - 1)?;
            y
        };

        let z_axis_variable = self.properties.str("z_axis_variable")?.to_string();
        let z_axis = if z_axis_variable.is_empty() {
            VariantArray::from_vec(vec![0.0f64])
        } else {
            let z = first.read_all(&z_axis_variable).map_err(|e| {
                Error::semantic(format!(
                    "failed to read the z axis \"{z_axis_variable}\": {e}"
                ))
            })?;
            whole_extent[5] = (z.len() - 1) as u64;
            bounds[4] = z.get_f64(0)?;
            bounds[5] = z.get_f64(z.len() - 1)?;
            z
        };
        drop(first);

        // the time axis, by one of four strategies
        let t_axis_variable = self.properties.str("t_axis_variable")?.to_string();
        let t_values = self.properties.float_list("t_values")?.to_vec();
        let template = self.properties.str("filename_time_template")?.to_string();

        let t_axis: Vec<f64>;
        let step_count: Vec<u64>;
        let t_variable: String;
        if !t_axis_variable.is_empty() {
            let (axis, counts) =
                self.time_axis_from_files(root, files, &t_axis_variable, &mut attributes)?;
            t_axis = axis;
            step_count = counts;
            t_variable = t_axis_variable.clone();
        } else if !t_values.is_empty() {
            tracing::info!("the t_axis_variable was unspecified, using the \
                provided time values");
            let calendar = self.properties.required_str("calendar")?;
            let units = self.properties.required_str("units")?;
            if t_values.len() != files.len() {
                return Err(Error::config(format!(
                    "{} time values given, {} files detected",
                    t_values.len(),
                    files.len()
                )));
            }
            let mut time_atts = Metadata::new();
            time_atts.set("calendar", calendar);
            time_atts.set("units", units);
            attributes.set("time", time_atts);
            t_axis = t_values;
            step_count = vec![1; files.len()];
            t_variable = "time".to_string();
        } else if !template.is_empty() {
            let calendar_name = {
                let c = self.properties.str("calendar")?;
                if c.is_empty() { "standard".to_string() } else { c.to_string() }
            };
            let cal = Calendar::from_name(&calendar_name)?;
            let mut units_text = self.properties.str("units")?.to_string();
            let mut axis = Vec::with_capacity(files.len());
            for file in files {
                let date = Self::filename_date(&template, file)?;
                if units_text.is_empty() {
                    units_text = format!(
                        "days since {:04}-{:02}-{:02} 00:00:00",
                        date.year, date.month, date.day
                    );
                }
                let units = Units::parse(&units_text)?;
                axis.push(calendar::date_to_offset(&date, &units, cal)?);
            }
            tracing::info!(template = %template, calendar = %calendar_name,
                units = %units_text,
                "the time axis will be inferred from file names");
            let mut time_atts = Metadata::new();
            time_atts.set("calendar", calendar_name);
            time_atts.set("units", units_text);
            attributes.set("time", time_atts);
            t_axis = axis;
            step_count = vec![1; files.len()];
            t_variable = "time".to_string();
        } else {
            // no time information at all: a synthetic monotone axis
            // with one step per file still enables parallelization,
            // though calendar-aware stages will not work
            tracing::info!("the time axis will be generated, with 1 step per file");
            t_axis = (0..files.len()).map(|i| i as f64).collect();
            step_count = vec![1; files.len()];
            t_variable = "time".to_string();
        }

        let mut coordinates = Metadata::new();
        coordinates.set("x_variable", x_axis_variable.as_str());
        coordinates.set(
            "y_variable",
            if y_axis_variable.is_empty() { "y" } else { &y_axis_variable },
        );
        coordinates.set(
            "z_variable",
            if z_axis_variable.is_empty() { "z" } else { &z_axis_variable },
        );
        coordinates.set("t_variable", t_variable.as_str());
        coordinates.set("x", x_axis);
        coordinates.set("y", y_axis);
        coordinates.set("z", z_axis);
        coordinates.set("t", t_axis.clone());

        let mut metadata = Metadata::new();
        metadata.set("variables", variables);
        metadata.set("attributes", attributes);
        metadata.set("coordinates", coordinates);
        metadata.set("whole_extent", whole_extent);
        metadata.set("bounds", bounds);
        metadata.set("files", files.to_vec());
        metadata.set("root", root.to_string_lossy().into_owned());
        metadata.set("step_count", step_count);
        metadata.set("number_of_time_steps", t_axis.len() as u64);

        // inform the executive how many steps there are and how to
        // request one
        metadata.set(keys::INDEX_INITIALIZER, "number_of_time_steps");
        metadata.set(keys::INDEX_REQUEST, "time_step");
        Ok(metadata)
    }
}

impl Stage for CfReader {
    fn name(&self) -> &str {
        "cf_reader"
    }

    fn n_inputs(&self) -> usize {
        0
    }

    fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    fn properties_mut(&mut self) -> &mut PropertyBag {
        &mut self.properties
    }

    fn descriptors(&self) -> &'static [PropertyDescriptor] {
        descriptors()
    }

    fn pool_size(&self) -> i64 {
        self.properties.int("thread_pool_size").unwrap_or(-1)
    }

    fn report_metadata(&mut self, _port: usize, _input_md: &[Metadata]) -> Result<Metadata> {
        if let Some((seen, metadata)) = &self.cached {
            if *seen == self.properties.modification_count() {
                return Ok(metadata.clone());
            }
        }

        // only the highest rank scans; the result is broadcast
        let root_rank = self.comm.size() - 1;
        let mut payload = Vec::new();
        let metadata = if self.comm.rank() == root_rank {
            let (root, files) = self.enumerate_files()?;
            let caching = cache::env_override()
                .unwrap_or(self.properties.bool("cache_metadata")?);
            let user_dir = self.properties.str("metadata_cache_dir")?.to_string();
            let paths = cache::search_paths(
                &root,
                (!user_dir.is_empty()).then(|| Path::new(user_dir.as_str())),
            );
            let key = cache::cache_key(crate::VERSION, &root, &files, &self.properties);

            let mut metadata = if caching {
                cache::try_read(&paths, &key)
            } else {
                None
            };
            if metadata.is_none() {
                let scanned = self.scan(&root, &files)?;
                if caching {
                    cache::write_back(&paths, &key, &scanned)?;
                }
                metadata = Some(scanned);
            }
            let metadata = metadata.expect("metadata scanned or cached");

            let mut stream = BinaryStream::new();
            metadata.to_stream(&mut stream);
            payload = stream.into_vec();
            self.comm.broadcast(&mut payload, root_rank)?;
            metadata
        } else {
            self.comm.broadcast(&mut payload, root_rank)?;
            Metadata::from_stream(&mut BinaryStream::from_bytes(&payload))?
        };

        self.cached = Some((self.properties.modification_count(), metadata.clone()));
        Ok(metadata)
    }

    fn translate_request(
        &self,
        _port: usize,
        _input_md: &[Metadata],
        _request: &Metadata,
    ) -> Result<Requests> {
        Ok(Requests::new())
    }

    fn execute(
        &mut self,
        _port: usize,
        _inputs: &[DatasetRef],
        request: &Metadata,
    ) -> Result<DatasetRef> {
        let metadata = self
            .cached
            .as_ref()
            .map(|(_, md)| md.clone())
            .ok_or_else(|| Error::semantic("execute called before report_metadata"))?;

        let coordinates = metadata.require_metadata("coordinates")?;
        let x = coordinates.require_array("x")?;
        let y = coordinates.require_array("y")?;
        let z = coordinates.require_array("z")?;
        let t = coordinates.require_array("t")?.to_f64_vec()?;
        let x_variable = coordinates.get_str("x_variable").unwrap_or("lon").to_string();
        let y_variable = coordinates.get_str("y_variable").unwrap_or("lat").to_string();
        let z_variable = coordinates.get_str("z_variable").unwrap_or("z").to_string();
        let t_variable = coordinates.get_str("t_variable").unwrap_or("time").to_string();

        // resolve the requested index; a request may also name a time
        // value directly
        let time_step = match request.get_u64("time_step") {
            Some(step) => step,
            None => {
                let time = request.get_f64("time").ok_or_else(|| {
                    Error::semantic("request has neither \"time_step\" nor \"time\"")
                })?;
                index_of(&t, time)
                    .ok_or_else(|| Error::semantic(format!("requested time {time} not found")))?
                    as u64
            }
        };
        if time_step as usize >= t.len() {
            return Err(Error::semantic(format!(
                "invalid time step {time_step} requested from a dataset with {} steps",
                t.len()
            )));
        }
        let time = t[time_step as usize];

        let whole_extent = metadata
            .get_extent("whole_extent")
            .ok_or_else(|| Error::semantic("metadata is missing \"whole_extent\""))?;

        // bounds narrow the extent; an extent request is honored as-is;
        // neither means the whole domain
        let (extent, bounds) = match request.get_bounds(keys::BOUNDS) {
            Some(b) => (bounds_to_extent(&b, x, y, z)?, b),
            None => {
                let extent = request.get_extent(keys::EXTENT).unwrap_or(whole_extent);
                (extent, extent_to_bounds(&extent, x, y, z)?)
            }
        };

        // locate the file contributing this step
        let step_count = metadata
            .get_u64s("step_count")
            .ok_or_else(|| Error::semantic("metadata is missing \"step_count\""))?;
        let mut file_index = 0usize;
        let mut consumed = 0u64;
        while file_index + 1 < step_count.len()
            && consumed + step_count[file_index] <= time_step
        {
            consumed += step_count[file_index];
            file_index += 1;
        }
        let local_step = time_step - consumed;

        let root = metadata
            .get_str("root")
            .ok_or_else(|| Error::semantic("metadata is missing \"root\""))?
            .to_string();
        let files = metadata
            .get_strs("files")
            .ok_or_else(|| Error::semantic("metadata is missing \"files\""))?;
        let path = Path::new(&root).join(&files[file_index]);
        let file = self.format.open(&path)?;

        let mut mesh = CartesianMesh::new();
        mesh.set_x_coordinates(
            x_variable.clone(),
            Arc::new(x.new_copy(extent[0] as usize, extent[1] as usize)?),
        );
        mesh.set_y_coordinates(
            y_variable.clone(),
            Arc::new(y.new_copy(extent[2] as usize, extent[3] as usize)?),
        );
        mesh.set_z_coordinates(
            z_variable.clone(),
            Arc::new(z.new_copy(extent[4] as usize, extent[5] as usize)?),
        );
        mesh.set_t_variable(t_variable.clone());
        mesh.set_time(time);
        mesh.set_time_step(time_step);
        mesh.set_whole_extent(whole_extent);
        mesh.set_extent(extent);
        mesh.set_bounds(bounds);

        let attributes = metadata.require_metadata("attributes")?;
        if let Some(time_atts) = attributes.metadata(&t_variable) {
            if let Some(calendar) = time_atts.get_str("calendar") {
                mesh.set_calendar(calendar);
            }
            if let Some(units) = time_atts.get_str("units") {
                mesh.set_time_units(units);
            }
        }

        // the layout of a mesh variable: time as the slowest dimension
        // (when the files have one), then the spatial dimensions
        let t_axis_variable = self.properties.str("t_axis_variable")?.to_string();
        let z_axis_variable = self.properties.str("z_axis_variable")?.to_string();
        let y_axis_variable = self.properties.str("y_axis_variable")?.to_string();
        let mut mesh_dims: Vec<String> = Vec::with_capacity(4);
        let mut mesh_starts: Vec<u64> = Vec::with_capacity(4);
        let mut mesh_counts: Vec<u64> = Vec::with_capacity(4);
        if !t_axis_variable.is_empty() {
            mesh_dims.push(t_axis_variable.clone());
            mesh_starts.push(local_step);
            mesh_counts.push(1);
        }
        if !z_axis_variable.is_empty() {
            mesh_dims.push(z_axis_variable.clone());
            mesh_starts.push(extent[4]);
            mesh_counts.push(extent[5] - extent[4] + 1);
        }
        if !y_axis_variable.is_empty() {
            mesh_dims.push(y_axis_variable.clone());
            mesh_starts.push(extent[2]);
            mesh_counts.push(extent[3] - extent[2] + 1);
        }
        mesh_dims.push(x_variable.clone());
        mesh_starts.push(extent[0]);
        mesh_counts.push(extent[1] - extent[0] + 1);

        let arrays = request.get_strs(keys::ARRAYS).unwrap_or_default();
        let mut out_attributes = Metadata::new();
        for name in &arrays {
            let atts = attributes.require_metadata(name).map_err(|_| {
                Error::semantic(format!("requested variable \"{name}\" is absent"))
            })?;
            out_attributes.set(name.as_str(), atts.clone());

            let dim_names = atts.get_strs("cf_dim_names").unwrap_or_default();
            let dims = atts.get_u64s("cf_dims").unwrap_or_default();

            if dim_names == mesh_dims {
                // a mesh variable: read the requested hyperslab into
                // the point arrays
                let data = file.read(name, &mesh_starts, &mesh_counts)?;
                mesh.point_arrays_mut().set(name.as_str(), Arc::new(data));
            } else {
                // an information variable: read it whole, slicing time
                // when it leads
                let n_dims = dim_names.len();
                let mut starts = vec![0u64; n_dims];
                let mut counts = dims.clone();
                if !t_axis_variable.is_empty()
                    && n_dims > 0
                    && dim_names[0] == t_axis_variable
                {
                    starts[0] = local_step;
                    counts[0] = 1;
                }
                let data = file.read(name, &starts, &counts)?;
                mesh.information_arrays_mut().set(name.as_str(), Arc::new(data));
            }
        }

        // pass coordinate and time attributes through
        for var in [&x_variable, &y_variable, &z_variable, &t_variable] {
            if let Some(atts) = attributes.metadata(var) {
                out_attributes.set(var.as_str(), atts.clone());
            }
        }

        let md = mesh.metadata_mut();
        md.set(keys::INDEX_REQUEST, "time_step");
        md.set("time_step", time_step);
        md.set("attributes", out_attributes);

        mesh.validate()?;
        Ok(Dataset::Mesh(mesh).into_ref())
    }
}
