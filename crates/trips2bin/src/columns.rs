//! `columns`: the schema encoder over stdin.

use anyhow::{Context, Result};
use log::info;
use rand::Rng;
use std::{io, path::Path};

use tripbin::schema::{encode_stream, load_transforms, write_schema};

use crate::stdout_writer;

pub fn run(transform: &Path, out_schema: &Path, delimiter: u8, sample: Option<f64>) -> Result<()> {
    let columns = load_transforms(transform)
        .with_context(|| format!("loading transforms from {}", transform.display()))?;
    info!(
        "{} output columns: {}",
        columns.len(),
        columns
            .iter()
            .map(|c| format!("{}:{}", c.name, c.data_type))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut rng = rand::thread_rng();
    let keep = move || sample.map_or(true, |rate| rng.gen::<f64>() < rate);

    // The encoder flushes its sink before handing it back.
    let (schema, _) = encode_stream(io::stdin().lock(), delimiter, columns, stdout_writer(), keep)
        .context("encoding rows from stdin")?;

    write_schema(out_schema, &schema)
        .with_context(|| format!("writing schema to {}", out_schema.display()))?;
    info!("schema written to {}", out_schema.display());
    Ok(())
}
