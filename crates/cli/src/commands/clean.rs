use imgup_store::RecordStore;

use crate::OutputFormat;

pub async fn run(store: &RecordStore, format: &OutputFormat) -> anyhow::Result<()> {
    let removed = store.try_sweep().await?;
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "removed": removed }));
        }
        OutputFormat::Text => {
            println!("Removed {removed} expired record(s)");
        }
    }
    Ok(())
}
