//! Dataset and model registration on top of an [`ArtifactStore`].

use std::fs;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use serde_json::json;

use crate::common::error::{WorkflowError, WorkflowResult};
use crate::common::ids::Fingerprint;
use crate::common::log;

use super::domain::{
    ArtifactKind, ArtifactPayload, ArtifactRecord, ArtifactRef, ArtifactStore, Column, ColumnType,
    TabularSchema,
};

/// Register a dataset that already lives at `location`.
pub fn register_dataset(
    store: &dyn ArtifactStore,
    name: &str,
    location: &str,
    schema: TabularSchema,
    rows: u64,
) -> WorkflowResult<ArtifactRef> {
    let fingerprint = Fingerprint::of(location.as_bytes()).finish_hex();
    let reference = store.register(
        name,
        ArtifactPayload::Dataset {
            location: location.to_string(),
            schema,
            rows,
            fingerprint,
        },
    )?;
    log::event("data", "dataset_registered", &[("ref", json!(reference.to_string()))]);
    Ok(reference)
}

/// Register a model artifact produced by `source_run`.
pub fn register_model(
    store: &dyn ArtifactStore,
    name: &str,
    source_job: &str,
    source_run: &str,
    schema: TabularSchema,
    tags: Vec<(String, String)>,
) -> WorkflowResult<ArtifactRef> {
    let reference = store.register(
        name,
        ArtifactPayload::Model {
            source_job: source_job.to_string(),
            source_run: source_run.to_string(),
            schema,
            tags,
        },
    )?;
    log::event(
        "data",
        "model_registered",
        &[
            ("ref", json!(reference.to_string())),
            ("source_run", json!(source_run)),
        ],
    );
    Ok(reference)
}

/// Read a comma separated file with a header row, infer its schema and register it.
///
/// Quoting follows RFC 4180. Blank lines are skipped and fields are trimmed.
/// The fingerprint covers the raw file bytes.
pub fn ingest_csv(store: &dyn ArtifactStore, path: &Path, name: &str) -> WorkflowResult<ArtifactRef> {
    let location = path.display().to_string();
    let raw = fs::read(path)?;
    let parse_err = |e: csv::Error| WorkflowError::invalid_spec(location.as_str(), e.to_string());

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(raw.as_slice());
    let names: Vec<String> = reader
        .headers()
        .map_err(parse_err)?
        .iter()
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        return Err(WorkflowError::invalid_spec(location.as_str(), "file has no header row"));
    }

    let mut inference: Vec<TypeGuess> = vec![TypeGuess::default(); names.len()];
    let mut rows = 0u64;
    for record in reader.records() {
        let record: StringRecord = record.map_err(parse_err)?;
        rows += 1;
        if record.len() != names.len() {
            return Err(WorkflowError::invalid_spec(
                location.as_str(),
                format!(
                    "row {rows} has {} fields, header has {}",
                    record.len(),
                    names.len()
                ),
            ));
        }
        for (guess, field) in inference.iter_mut().zip(record.iter()) {
            guess.observe(field);
        }
    }

    let schema = TabularSchema::new(
        names
            .into_iter()
            .zip(inference)
            .map(|(name, guess)| Column::new(name, guess.resolve()))
            .collect(),
    )?;
    let reference = store.register(
        name,
        ArtifactPayload::Dataset {
            location,
            schema,
            rows,
            fingerprint: Fingerprint::of(&raw).finish_hex(),
        },
    )?;
    log::event(
        "data",
        "dataset_ingested",
        &[("ref", json!(reference.to_string())), ("rows", json!(rows))],
    );
    Ok(reference)
}

/// Fetch a record and check that it is of the expected kind.
pub fn expect_kind(
    store: &dyn ArtifactStore,
    reference: &ArtifactRef,
    kind: ArtifactKind,
) -> WorkflowResult<ArtifactRecord> {
    let record = store.record(reference)?;
    if record.kind() != kind {
        return Err(WorkflowError::invalid_spec(
            reference.to_string(),
            format!("expected a {kind:?} artifact, found {:?}", record.kind()),
        ));
    }
    Ok(record)
}

/// Render a short JSON datasheet for a registered dataset.
pub fn export_datasheet(store: &dyn ArtifactStore, reference: &ArtifactRef) -> WorkflowResult<String> {
    let record = expect_kind(store, reference, ArtifactKind::Dataset)?;
    let ArtifactPayload::Dataset {
        location,
        schema,
        rows,
        fingerprint,
    } = record.payload
    else {
        return Err(WorkflowError::not_found(format!("dataset {reference}")));
    };
    let sheet = json!({
        "dataset": reference.to_string(),
        "location": location,
        "rows": rows,
        "fingerprint": fingerprint,
        "columns": schema.columns,
        "created_ms": record.created_ms,
    });
    Ok(sheet.to_string())
}

#[derive(Clone, Copy)]
struct TypeGuess {
    numeric: bool,
    boolean: bool,
    seen: bool,
}

impl Default for TypeGuess {
    fn default() -> Self {
        Self {
            numeric: true,
            boolean: true,
            seen: false,
        }
    }
}

impl TypeGuess {
    fn observe(&mut self, field: &str) {
        // empty cells are missing values and do not constrain the type
        if field.is_empty() {
            return;
        }
        self.seen = true;
        self.numeric &= field.parse::<f64>().is_ok_and(f64::is_finite);
        self.boolean &= matches!(field.to_ascii_lowercase().as_str(), "true" | "false");
    }

    fn resolve(self) -> ColumnType {
        if !self.seen {
            ColumnType::Text
        } else if self.numeric {
            ColumnType::Numeric
        } else if self.boolean {
            ColumnType::Boolean
        } else {
            ColumnType::Text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::repo_mem::MemoryArtifactStore;
    use tempfile::tempdir;

    #[test]
    fn ingest_infers_types_and_counts_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("housing.csv");
        fs::write(
            &path,
            "rooms,city,waterfront,price\n3,Boston,false,410.5\n4,,true,520\n\n2,Cambridge,false,300\n",
        )
        .unwrap();

        let store = MemoryArtifactStore::new();
        let reference = ingest_csv(&store, &path, "housing").unwrap();
        assert_eq!(reference, ArtifactRef::new("housing", 1));

        let record = store.record(&reference).unwrap();
        let ArtifactPayload::Dataset { schema, rows, .. } = record.payload else {
            panic!("expected a dataset");
        };
        assert_eq!(rows, 3);
        let types: Vec<ColumnType> = schema.columns.iter().map(|c| c.ty).collect();
        assert_eq!(
            types,
            vec![
                ColumnType::Numeric,
                ColumnType::Text,
                ColumnType::Boolean,
                ColumnType::Numeric
            ]
        );
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "a,b\n1,2\n3\n").unwrap();
        let store = MemoryArtifactStore::new();
        let err = ingest_csv(&store, &path, "bad").unwrap_err();
        assert!(err.to_string().contains("row 2 has 1 fields"));
        assert!(store.versions("bad").unwrap().is_empty());
    }

    #[test]
    fn same_content_same_fingerprint() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        fs::write(&a, "x\n1\n").unwrap();
        fs::write(&b, "x\n1\n").unwrap();
        let store = MemoryArtifactStore::new();
        let fp = |r: ArtifactRef| match store.record(&r).unwrap().payload {
            ArtifactPayload::Dataset { fingerprint, .. } => fingerprint,
            _ => unreachable!(),
        };
        let ra = ingest_csv(&store, &a, "d").unwrap();
        let rb = ingest_csv(&store, &b, "d").unwrap();
        assert_ne!(ra, rb);
        assert_eq!(fp(ra), fp(rb));
    }

    #[test]
    fn quoted_fields_keep_their_commas() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("people.csv");
        fs::write(&path, "name,age\n\"Smith, John\",42\n\"Doe, Jane\",37\n").unwrap();
        let store = MemoryArtifactStore::new();
        let reference = ingest_csv(&store, &path, "people").unwrap();
        let ArtifactPayload::Dataset { schema, rows, .. } = store.record(&reference).unwrap().payload
        else {
            panic!("expected a dataset");
        };
        assert_eq!(rows, 2);
        assert_eq!(schema.column("name").unwrap().ty, ColumnType::Text);
        assert_eq!(schema.column("age").unwrap().ty, ColumnType::Numeric);
    }

    #[test]
    fn non_finite_spellings_are_text() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("codes.csv");
        fs::write(&path, "code,score\nNaN,1\ninf,2\ninfinity,3\n").unwrap();
        let store = MemoryArtifactStore::new();
        let reference = ingest_csv(&store, &path, "codes").unwrap();
        let schema = store.record(&reference).unwrap().payload.schema().clone();
        assert_eq!(schema.column("code").unwrap().ty, ColumnType::Text);
        assert_eq!(schema.column("score").unwrap().ty, ColumnType::Numeric);
    }

    #[test]
    fn empty_file_has_no_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        fs::write(&path, "").unwrap();
        let err = ingest_csv(&MemoryArtifactStore::new(), &path, "empty").unwrap_err();
        assert!(err.to_string().contains("no header row"));
    }

    #[test]
    fn expect_kind_rejects_models_where_data_is_needed() {
        let store = MemoryArtifactStore::new();
        let model = register_model(&store, "m", "job-1", "run-1", TabularSchema::default(), vec![]).unwrap();
        let err = expect_kind(&store, &model, ArtifactKind::Dataset).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidSpec { .. }));
    }

    #[test]
    fn datasheet_lists_columns() {
        let store = MemoryArtifactStore::new();
        let schema = TabularSchema::new(vec![Column::new("age", ColumnType::Numeric)]).unwrap();
        let reference = register_dataset(&store, "adult", "blob://adult.csv", schema, 10).unwrap();
        let sheet: serde_json::Value =
            serde_json::from_str(&export_datasheet(&store, &reference).unwrap()).unwrap();
        assert_eq!(sheet["dataset"], "adult:1");
        assert_eq!(sheet["rows"], 10);
        assert_eq!(sheet["columns"][0]["name"], "age");
    }
}
