use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use imgup_core::{Lifetime, NewRecord};
use imgup_store::RecordStore;

use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// File to store.
    pub file: PathBuf,
    /// Record title.
    #[arg(long)]
    pub title: Option<String>,
    /// Uploader name.
    #[arg(long)]
    pub author: Option<String>,
    /// How long the record is kept (hour, day, week or month).
    #[arg(long, default_value = "day")]
    pub lifetime: Lifetime,
    /// Keep the record out of listings and searches.
    #[arg(long)]
    pub private: bool,
}

impl UploadArgs {
    fn to_new_record(&self, data: Vec<u8>) -> NewRecord {
        let filename = self
            .file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut new = NewRecord::new(data)
            .with_filename(filename)
            .with_lifetime(self.lifetime)
            .with_visible(!self.private);
        if let Some(title) = &self.title {
            new = new.with_title(title.clone());
        }
        if let Some(author) = &self.author {
            new = new.with_author(author.clone());
        }
        new
    }
}

pub async fn run(
    store: &RecordStore,
    args: &UploadArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let data = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let new = args.to_new_record(data);
    let id = store.insert(&new).await?;

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "id": id,
                    "lifetime": args.lifetime,
                    "visible": !args.private,
                })
            );
        }
        OutputFormat::Text => {
            println!("Stored {} as {id} for one {}", args.file.display(), args.lifetime);
        }
    }
    Ok(())
}
