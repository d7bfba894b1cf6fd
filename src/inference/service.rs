//! Prediction through the model proxy, guarded by a training-schema check.

use std::time::Instant;

use serde_json::json;

use crate::common::error::{WorkflowError, WorkflowResult};
use crate::common::log as audit;
use crate::common::time;
use crate::data::domain::{ArtifactKind, ArtifactPayload, ArtifactRef, ArtifactStore, TabularSchema};
use crate::data::service as data_service;
use crate::evaluation::domain::ChildRunRef;

use super::domain::{ModelProxy, PredictionValue, ProxyInput};

pub struct ProxyPredictor<'a> {
    proxy: &'a dyn ModelProxy,
    store: &'a dyn ArtifactStore,
}

impl<'a> ProxyPredictor<'a> {
    pub fn new(proxy: &'a dyn ModelProxy, store: &'a dyn ArtifactStore) -> Self {
        Self { proxy, store }
    }

    /// Score the registered dataset `data_ref` with the child run's model, remotely.
    ///
    /// The dataset must carry exactly the training feature columns with the same
    /// types; the label column may be present and is ignored. One prediction is
    /// returned per dataset row.
    pub fn predict(&self, child: &ChildRunRef, data_ref: &ArtifactRef) -> WorkflowResult<Vec<PredictionValue>> {
        let record = data_service::expect_kind(self.store, data_ref, ArtifactKind::Dataset)?;
        let ArtifactPayload::Dataset {
            location,
            schema,
            rows,
            ..
        } = record.payload
        else {
            return Err(WorkflowError::not_found(format!("dataset {data_ref}")));
        };
        check_schema(data_ref, &child.features, &schema, child.label_name.as_deref())?;

        let started = Instant::now();
        let env = self.proxy.reconstruct_environment(child)?;
        let input = ProxyInput {
            data_ref: data_ref.clone(),
            location,
            rows,
            schema,
        };
        let predictions = self.proxy.predict(child, &env, &input)?;
        if predictions.len() as u64 != rows {
            return Err(WorkflowError::backend(
                format!("run {}", child.run_id),
                format!("returned {} predictions for {rows} rows", predictions.len()),
            ));
        }
        audit::event(
            "inference",
            "proxy_predict",
            &[
                ("run_id", json!(child.run_id)),
                ("data_ref", json!(data_ref.to_string())),
                ("env", json!(format!("{}:{}", env.name, env.version))),
                ("rows", json!(rows)),
                ("dur_ms", json!(time::elapsed_ms(started))),
            ],
        );
        Ok(predictions)
    }

    /// Same as [`Self::predict`], addressing the model through its registered artifact.
    pub fn predict_registered(&self, model: &ArtifactRef, data_ref: &ArtifactRef) -> WorkflowResult<Vec<PredictionValue>> {
        let child = child_ref_for_model(self.store, model)?;
        self.predict(&child, data_ref)
    }
}

/// Rebuild the remote address of a registered model from its lineage.
pub fn child_ref_for_model(store: &dyn ArtifactStore, model: &ArtifactRef) -> WorkflowResult<ChildRunRef> {
    let record = data_service::expect_kind(store, model, ArtifactKind::Model)?;
    match record.payload {
        ArtifactPayload::Model {
            source_job,
            source_run,
            schema,
            tags,
        } => Ok(ChildRunRef {
            job_id: source_job,
            run_id: source_run,
            features: schema,
            label_name: tags
                .into_iter()
                .find(|(k, _)| k == "label")
                .map(|(_, v)| v),
        }),
        ArtifactPayload::Dataset { .. } => Err(WorkflowError::not_found(format!("model {model}"))),
    }
}

fn check_schema(
    data_ref: &ArtifactRef,
    features: &TabularSchema,
    data: &TabularSchema,
    label: Option<&str>,
) -> WorkflowResult<()> {
    let fail = |reason: String| WorkflowError::data_schema(data_ref.to_string(), reason);

    for column in &features.columns {
        match data.column(&column.name) {
            None => return Err(fail(format!("missing column {}", column.name))),
            Some(found) if found.ty != column.ty => {
                return Err(fail(format!(
                    "column {} is {:?}, trained as {:?}",
                    column.name, found.ty, column.ty
                )))
            }
            Some(_) => {}
        }
    }
    let extra: Vec<&str> = data
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .filter(|name| !features.contains(name) && Some(*name) != label)
        .collect();
    if !extra.is_empty() {
        return Err(fail(format!("unexpected columns {}", extra.join(", "))));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::domain::{Column, ColumnType};
    use crate::data::repo_mem::MemoryArtifactStore;
    use crate::training::backend_mem::MemoryBackend;
    use crate::training::domain::{
        ChildRun, ComputeRef, ExecutionBackend, JobSpec, JobStatus, RunEnvironment, TaskKind,
    };

    struct Fixture {
        backend: MemoryBackend,
        store: MemoryArtifactStore,
        child: ChildRunRef,
    }

    fn schema(cols: &[(&str, ColumnType)]) -> TabularSchema {
        TabularSchema::new(cols.iter().map(|(n, t)| Column::new(*n, *t)).collect()).unwrap()
    }

    fn fixture() -> Fixture {
        let store = MemoryArtifactStore::new();
        let backend = MemoryBackend::new();
        let env = RunEnvironment {
            name: "AzureML-AutoML".into(),
            version: "115".into(),
            ..RunEnvironment::default()
        };
        backend.script_next(
            vec![JobStatus::Completed],
            vec![ChildRun::completed("run-1", "LightGBM").with_environment(env)],
        );
        let spec = JobSpec::new(
            "automl",
            TaskKind::Regression,
            ComputeRef {
                name: "cpu".into(),
                vm_size: "small".into(),
                max_nodes: 1,
            },
            ArtifactRef::new("train", 1),
        );
        let job_id = backend.submit(&spec, "mem://train").unwrap();
        backend.set_predictor("run-1", |input: &ProxyInput| {
            (0..input.rows)
                .map(|i| PredictionValue::Numeric(100.0 + i as f64))
                .collect()
        });
        let child = ChildRunRef {
            job_id,
            run_id: "run-1".into(),
            features: schema(&[("rooms", ColumnType::Numeric), ("city", ColumnType::Text)]),
            label_name: Some("price".into()),
        };
        Fixture {
            backend,
            store,
            child,
        }
    }

    fn register(store: &MemoryArtifactStore, cols: &[(&str, ColumnType)], rows: u64) -> ArtifactRef {
        data_service::register_dataset(store, "test", "mem://test", schema(cols), rows).unwrap()
    }

    #[test]
    fn predictions_are_deterministic() {
        let fx = fixture();
        let data = register(
            &fx.store,
            &[("rooms", ColumnType::Numeric), ("city", ColumnType::Text)],
            3,
        );
        let predictor = ProxyPredictor::new(&fx.backend, &fx.store);
        let first = predictor.predict(&fx.child, &data).unwrap();
        let second = predictor.predict(&fx.child, &data).unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
    }

    #[test]
    fn label_column_is_tolerated() {
        let fx = fixture();
        let data = register(
            &fx.store,
            &[
                ("city", ColumnType::Text),
                ("price", ColumnType::Numeric),
                ("rooms", ColumnType::Numeric),
            ],
            2,
        );
        let predictor = ProxyPredictor::new(&fx.backend, &fx.store);
        assert_eq!(predictor.predict(&fx.child, &data).unwrap().len(), 2);
    }

    #[test]
    fn missing_feature_is_a_schema_error() {
        let fx = fixture();
        let data = register(&fx.store, &[("rooms", ColumnType::Numeric)], 2);
        let err = ProxyPredictor::new(&fx.backend, &fx.store)
            .predict(&fx.child, &data)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::DataSchema { .. }));
        assert!(err.to_string().contains("missing column city"));
    }

    #[test]
    fn type_change_is_not_coerced() {
        let fx = fixture();
        let data = register(
            &fx.store,
            &[("rooms", ColumnType::Text), ("city", ColumnType::Text)],
            2,
        );
        let err = ProxyPredictor::new(&fx.backend, &fx.store)
            .predict(&fx.child, &data)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::DataSchema { .. }));
    }

    #[test]
    fn extra_columns_are_rejected() {
        let fx = fixture();
        let data = register(
            &fx.store,
            &[
                ("rooms", ColumnType::Numeric),
                ("city", ColumnType::Text),
                ("owner", ColumnType::Text),
            ],
            2,
        );
        let err = ProxyPredictor::new(&fx.backend, &fx.store)
            .predict(&fx.child, &data)
            .unwrap_err();
        assert!(err.to_string().contains("unexpected columns owner"));
    }

    #[test]
    fn unreconstructable_environment_fails() {
        let fx = fixture();
        fx.backend.break_environment("run-1");
        let data = register(
            &fx.store,
            &[("rooms", ColumnType::Numeric), ("city", ColumnType::Text)],
            1,
        );
        let err = ProxyPredictor::new(&fx.backend, &fx.store)
            .predict(&fx.child, &data)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::EnvironmentMismatch { .. }));
        assert!(err.to_string().contains("run-1"));
    }

    #[test]
    fn child_without_recorded_environment_fails() {
        let fx = fixture();
        fx.backend.script_next(
            vec![JobStatus::Completed],
            vec![ChildRun::completed("run-2", "ElasticNet")],
        );
        let spec = JobSpec::new(
            "automl",
            TaskKind::Regression,
            ComputeRef {
                name: "cpu".into(),
                vm_size: "small".into(),
                max_nodes: 1,
            },
            ArtifactRef::new("train", 1),
        );
        let job_id = fx.backend.submit(&spec, "mem://train").unwrap();
        fx.backend.set_predictor("run-2", |input: &ProxyInput| {
            vec![PredictionValue::Numeric(0.0); input.rows as usize]
        });
        let bare = ChildRunRef {
            job_id,
            run_id: "run-2".into(),
            ..fx.child.clone()
        };
        let data = register(
            &fx.store,
            &[("rooms", ColumnType::Numeric), ("city", ColumnType::Text)],
            1,
        );
        let err = ProxyPredictor::new(&fx.backend, &fx.store)
            .predict(&bare, &data)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::EnvironmentMismatch { .. }));
        assert!(err.to_string().contains("no environment was recorded"));
    }

    #[test]
    fn registered_model_resolves_to_its_run() {
        let fx = fixture();
        let model = data_service::register_model(
            &fx.store,
            "best",
            &fx.child.job_id,
            "run-1",
            fx.child.features.clone(),
            vec![("label".into(), "price".into())],
        )
        .unwrap();
        let data = register(
            &fx.store,
            &[("rooms", ColumnType::Numeric), ("city", ColumnType::Text), ("price", ColumnType::Numeric)],
            4,
        );
        let predictor = ProxyPredictor::new(&fx.backend, &fx.store);
        let via_model = predictor.predict_registered(&model, &data).unwrap();
        assert_eq!(via_model, predictor.predict(&fx.child, &data).unwrap());
    }
}
