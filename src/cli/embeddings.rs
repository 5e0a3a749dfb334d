use anyhow::{Context, Result};

use crate::engine::AssignmentEngine;
use crate::model::EventRef;

/// Print events needing a vector, one `event<TAB>text` per line, or as JSON
pub fn pending(engine: &AssignmentEngine, limit: usize, json: bool) -> Result<()> {
    let pending = engine.pending_embeddings(limit)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&pending)?);
        return Ok(());
    }
    if pending.is_empty() {
        println!("All embeddings are up to date.");
        return Ok(());
    }
    for item in pending {
        println!("{}\t{}", item.event, item.context_text);
    }
    Ok(())
}

/// Store a vector given as a JSON array of floats
pub fn store(engine: &AssignmentEngine, event: EventRef, vector: &str) -> Result<()> {
    let embedding: Vec<f32> =
        serde_json::from_str(vector).context("Vector must be a JSON array of numbers")?;
    engine.store_embedding(event, &embedding)?;
    println!("Stored {}-dimensional embedding for {}", embedding.len(), event);
    Ok(())
}
