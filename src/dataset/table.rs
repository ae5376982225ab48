//! Tabular datasets.

use crate::array::VariantArray;
use crate::dataset::ArrayCollection;
use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::stream::{BinaryStream, Streamable};
use std::io::Write;
use std::sync::Arc;

/// A table: one collection of equal-length columns plus metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    metadata: Metadata,
    columns: ArrayCollection,
}

impl Table {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The attached metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Mutable access to the attached metadata.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// The column collection.
    pub fn columns(&self) -> &ArrayCollection {
        &self.columns
    }

    /// Number of rows (length of the first column).
    pub fn n_rows(&self) -> usize {
        self.columns
            .iter()
            .next()
            .map(|(_, a)| a.len())
            .unwrap_or(0)
    }

    /// Number of columns.
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Add a column; its length must match existing columns.
    pub fn add_column(
        &mut self,
        name: impl Into<String>,
        column: impl Into<Arc<VariantArray>>,
    ) -> Result<()> {
        let column = column.into();
        if !self.columns.is_empty() && column.len() != self.n_rows() {
            return Err(Error::semantic(format!(
                "column length {} does not match table row count {}",
                column.len(),
                self.n_rows()
            )));
        }
        self.columns.set(name, column);
        Ok(())
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Arc<VariantArray>> {
        self.columns.get(name)
    }

    /// Append another table's rows; the column sets must match.
    pub fn concatenate(&mut self, other: &Table) -> Result<()> {
        if self.columns.is_empty() {
            *self = other.clone();
            return Ok(());
        }
        let names: Vec<String> = self.columns.names().map(str::to_string).collect();
        for name in &names {
            let theirs = other.columns.require(name)?;
            let mut mine = (**self.columns.require(name)?).clone();
            mine.append(theirs)?;
            self.columns.set(name.clone(), Arc::new(mine));
        }
        Ok(())
    }

    /// Write the table as CSV with a header row.
    pub fn to_csv<W: Write>(&self, mut writer: W) -> Result<()> {
        let names: Vec<&str> = self.columns.names().collect();
        writeln!(writer, "{}", names.join(","))?;
        let n_rows = self.n_rows();
        for row in 0..n_rows {
            let mut cells = Vec::with_capacity(names.len());
            for name in &names {
                let col = self.columns.require(name)?;
                let cell = match col.get_str(row) {
                    Ok(s) => s.to_string(),
                    Err(_) => format!("{}", col.get_f64(row)?),
                };
                cells.push(cell);
            }
            writeln!(writer, "{}", cells.join(","))?;
        }
        Ok(())
    }
}

impl Streamable for Table {
    fn to_stream(&self, stream: &mut BinaryStream) {
        self.metadata.to_stream(stream);
        self.columns.to_stream(stream);
    }

    fn from_stream(stream: &mut BinaryStream) -> Result<Self> {
        let metadata = Metadata::from_stream(stream)?;
        let columns = ArrayCollection::from_stream(stream)?;
        Ok(Self { metadata, columns })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        let mut t = Table::new();
        t.add_column("step", Arc::new(VariantArray::from_vec(vec![0u64, 1, 2])))
            .unwrap();
        t.add_column(
            "count",
            Arc::new(VariantArray::from_vec(vec![5.0f64, 0.0, 2.5])),
        )
        .unwrap();
        t
    }

    #[test]
    fn test_column_lengths_must_match() {
        let mut t = sample();
        let bad = Arc::new(VariantArray::from_vec(vec![1i32, 2]));
        assert!(t.add_column("bad", bad).is_err());
        assert_eq!(t.n_columns(), 2);
        assert_eq!(t.n_rows(), 3);
    }

    #[test]
    fn test_csv_output() {
        let mut out = Vec::new();
        sample().to_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "step,count\n0,5\n1,0\n2,2.5\n");
    }

    #[test]
    fn test_concatenate() {
        let mut a = sample();
        let b = sample();
        a.concatenate(&b).unwrap();
        assert_eq!(a.n_rows(), 6);
    }

    #[test]
    fn test_round_trip() {
        let t = sample();
        let mut s = BinaryStream::new();
        t.to_stream(&mut s);
        assert_eq!(Table::from_stream(&mut s).unwrap(), t);
    }
}
