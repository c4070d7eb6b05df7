use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use imgup_core::humanize_remaining;
use imgup_store::RecordStore;

use super::RecordView;
use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Record ID.
    pub id: String,
    /// Write the stored file contents to this path.
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

pub async fn run(store: &RecordStore, args: &ShowArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let Some(record) = store.get(&args.id).await? else {
        println!("Record not found: {}", args.id);
        return Ok(());
    };

    if let Some(path) = &args.output {
        tokio::fs::write(path, &record.data)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    let view = RecordView::new(&record, store.now());

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        OutputFormat::Text => {
            println!("ID:         {}", view.id);
            println!("Title:      {}", view.title);
            println!("Author:     {}", view.author);
            if !view.filename.is_empty() {
                println!("Filename:   {}", view.filename);
            }
            println!("Size:       {} bytes", view.size);
            println!("Visible:    {}", view.visible);
            println!("Created:    {}", view.created_at.to_rfc3339());
            println!("Expires:    {}", view.expires_at.to_rfc3339());
            println!("Expires in: {}", humanize_remaining(view.remaining));
            if let Some(path) = &args.output {
                println!("Saved to:   {}", path.display());
            }
        }
    }
    Ok(())
}
