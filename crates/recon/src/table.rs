//! CSV in and out of [`RecordSet`].

use std::fs::File;
use std::io;
use std::path::Path;

use crate::error::ReconError;
use crate::model::{Record, RecordSet, Value};

/// Load CSV text. Headers become columns (with `prefix` prepended); empty cells
/// load as null, everything else as text.
pub fn read_csv(data: &str, prefix: &str) -> Result<RecordSet, ReconError> {
    read_csv_from(data.as_bytes(), prefix)
}

pub fn read_csv_file(path: &Path, prefix: &str) -> Result<RecordSet, ReconError> {
    let file = File::open(path)?;
    read_csv_from(io::BufReader::new(file), prefix)
}

pub fn read_csv_from<R: io::Read>(reader: R, prefix: &str) -> Result<RecordSet, ReconError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);

    let mut columns: Vec<String> = Vec::new();
    // Header position -> column, `None` for repeated headers.
    let mut slots: Vec<Option<String>> = Vec::new();
    for header in reader.headers()?.iter() {
        let column = format!("{prefix}{}", header.trim());
        if columns.contains(&column) {
            log::warn!("duplicate header '{column}', keeping the first occurrence");
            slots.push(None);
        } else {
            columns.push(column.clone());
            slots.push(Some(column));
        }
    }

    let mut rows = Vec::new();
    for result in reader.records() {
        let raw = result?;
        let record: Record = slots
            .iter()
            .zip(raw.iter())
            .filter_map(|(slot, cell)| {
                let column = slot.as_ref()?;
                let value = if cell.trim().is_empty() {
                    Value::Null
                } else {
                    Value::text(cell)
                };
                Some((column.clone(), value))
            })
            .collect();
        rows.push(record);
    }

    Ok(RecordSet::with_rows(columns, rows))
}

/// Write columns in set order. Null becomes an empty cell.
pub fn write_csv<W: io::Write>(set: &RecordSet, writer: W) -> Result<(), ReconError> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(&set.columns)?;
    for row in &set.rows {
        writer.write_record(set.columns.iter().map(|c| row.get(c).to_text()))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_csv_file(set: &RecordSet, path: &Path) -> Result<(), ReconError> {
    let file = File::create(path)?;
    write_csv(set, io::BufWriter::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_prefixed_and_blank_cells_null() {
        let data = "SCHOOL_ID,SCHOOL_NAME,LAT\n1,Lincoln Elementary,43.07\n2,,  \n";
        let set = read_csv(data, "FOCUS_").unwrap();
        assert_eq!(set.columns, vec!["FOCUS_SCHOOL_ID", "FOCUS_SCHOOL_NAME", "FOCUS_LAT"]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.rows[0].get("FOCUS_SCHOOL_NAME"), &Value::text("Lincoln Elementary"));
        assert_eq!(set.rows[0].get("FOCUS_LAT").as_f64(), Some(43.07));
        assert!(set.rows[1].get("FOCUS_SCHOOL_NAME").is_null());
        assert!(set.rows[1].get("FOCUS_LAT").is_null());
    }

    #[test]
    fn duplicate_header_keeps_first() {
        let set = read_csv("A,B,A\n1,2,3\n", "").unwrap();
        assert_eq!(set.columns, vec!["A", "B"]);
        assert_eq!(set.rows[0].get("A"), &Value::text("1"));
    }

    #[test]
    fn ragged_row_is_an_error() {
        let err = read_csv("A,B\n1\n", "").unwrap_err();
        assert!(matches!(err, ReconError::Csv(_)));
    }

    #[test]
    fn write_nulls_as_empty_cells() {
        let rows = vec![
            [("id", Value::text("1")), ("score", Value::Number(87.5)), ("ok", Value::Bool(true))]
                .into_iter()
                .collect(),
            [("id", Value::text("2"))].into_iter().collect(),
        ];
        let set = RecordSet::with_rows(vec!["id".into(), "score".into(), "ok".into()], rows);
        let mut out = Vec::new();
        write_csv(&set, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "id,score,ok\n1,87.5,true\n2,,\n");
    }

    #[test]
    fn file_round_trip_keeps_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let set = read_csv("NAME\n\"St. Mary's, North\"\n", "").unwrap();
        write_csv_file(&set, &path).unwrap();
        let back = read_csv_file(&path, "").unwrap();
        assert_eq!(back, set);
    }
}
