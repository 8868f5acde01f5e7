//! Training, incremental update and evaluation commands

use super::{FieldRow, Workspace};
use crate::output::{color_r2, print_info, print_json, print_success, print_table, print_warning, OutputFormat};
use anyhow::{Context, Result};
use engine_lib::preprocess::{clean_batch, load_dataset};
use engine_lib::{evaluate, incremental_update, EvaluationReport, RawRecord, TrainingPipeline};
use std::path::Path;

fn read_records(dataset: &Path) -> Result<Vec<RawRecord>> {
    load_dataset(dataset).with_context(|| format!("Failed to load dataset {}", dataset.display()))
}

fn evaluation_rows(rows: &mut Vec<FieldRow>, evaluation: &EvaluationReport) {
    rows.push(FieldRow::new("RMSE", format!("{:.3}", evaluation.rmse)));
    rows.push(FieldRow::new("R²", color_r2(evaluation.r2)));
    rows.push(FieldRow::new("Evaluated rows", evaluation.rows));
}

/// Full training run into a new generation
pub fn train(ws: &Workspace, dataset: &Path) -> Result<()> {
    let records = read_records(dataset)?;
    if matches!(ws.format, OutputFormat::Table) {
        print_info(&format!(
            "Training on {} rows from {}",
            records.len(),
            dataset.display()
        ));
    }

    let report = TrainingPipeline::new(&ws.store, &ws.config)
        .run(&records)
        .context("Training failed")?;

    match ws.format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            print_success(&format!("Committed generation {}", report.generation));
            let params = &report.hyperparameters.params;
            let mut rows = vec![
                FieldRow::new("Train rows", report.train_rows),
                FieldRow::new("Test rows", report.test_rows),
                FieldRow::new("Dropped rows", report.dropped_rows),
                FieldRow::new("eta", params.eta),
                FieldRow::new("max_depth", params.max_depth),
                FieldRow::new("subsample", params.subsample),
                FieldRow::new("colsample_bytree", params.colsample_bytree),
                FieldRow::new("Boost rounds", report.hyperparameters.num_boost_round),
            ];
            if let Some(cv_rmse) = report.hyperparameters.cv_rmse {
                rows.push(FieldRow::new("CV RMSE", format!("{:.3}", cv_rmse)));
            }
            match &report.evaluation {
                Some(evaluation) => evaluation_rows(&mut rows, evaluation),
                None => print_warning("No held-out rows; evaluation skipped"),
            }
            print_table(rows);
        }
    }
    Ok(())
}

/// Append boosting rounds to the current regressor
pub fn update(ws: &Workspace, dataset: &Path, rounds: Option<usize>) -> Result<()> {
    let records = read_records(dataset)?;
    let rounds = rounds.unwrap_or(ws.config.update.rounds);

    let report = incremental_update(&ws.store, &records, rounds).context("Incremental update failed")?;

    match ws.format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            print_success(&format!("Committed generation {}", report.generation));
            print_table(vec![
                FieldRow::new("Parent", report.parent.as_deref().unwrap_or("-")),
                FieldRow::new("Rows", report.rows),
                FieldRow::new("Dropped rows", report.dropped_rows),
                FieldRow::new("Rounds added", report.rounds_added),
                FieldRow::new("Total trees", report.total_trees),
            ]);
        }
    }
    Ok(())
}

/// Score the current generation's regressor on a labelled dataset
pub fn evaluate_current(ws: &Workspace, dataset: &Path) -> Result<()> {
    let set = ws.store.load_current().context("Failed to load current generation")?;
    let readings = clean_batch(&read_records(dataset)?);
    let report = evaluate(&set.regressor, &set.transform, &readings).context("Evaluation failed")?;

    match ws.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "generation": set.generation,
            "rmse": report.rmse,
            "r2": report.r2,
            "rows": report.rows,
        }))?,
        OutputFormat::Table => {
            let mut rows = vec![FieldRow::new("Generation", &set.generation)];
            evaluation_rows(&mut rows, &report);
            print_table(rows);
        }
    }
    Ok(())
}
