use clap::Args;

use imgup_core::Record;
use imgup_store::{RecordStore, SearchFilter};

use super::RecordView;
use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct RecentsArgs {
    /// Maximum number of records to list.
    #[arg(long, default_value_t = 10)]
    pub limit: u32,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Title pattern (`*` or `%` match any run of characters).
    #[arg(long)]
    pub title: Option<String>,
    /// Author pattern.
    #[arg(long)]
    pub author: Option<String>,
    /// Maximum number of records to list.
    #[arg(long, default_value_t = 10)]
    pub limit: u32,
}

impl SearchArgs {
    fn filter(&self) -> SearchFilter {
        let mut filter = SearchFilter::new();
        if let Some(title) = &self.title {
            filter = filter.with_title(title.as_str());
        }
        if let Some(author) = &self.author {
            filter = filter.with_author(author.as_str());
        }
        filter
    }
}

pub async fn recents(
    store: &RecordStore,
    args: &RecentsArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let records = store.recents(args.limit).await?;
    print_records(store, &records, format)
}

pub async fn search(
    store: &RecordStore,
    args: &SearchArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let records = store.search(args.limit, &args.filter()).await?;
    print_records(store, &records, format)
}

fn print_records(
    store: &RecordStore,
    records: &[Record],
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let now = store.now();
    let views: Vec<RecordView> = records.iter().map(|r| RecordView::new(r, now)).collect();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&views)?);
        }
        OutputFormat::Text => {
            println!("{} record(s):", views.len());
            for view in &views {
                println!("{}", view.line());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_args_build_filter() {
        let args = SearchArgs {
            title: Some("Super*".into()),
            author: None,
            limit: 5,
        };
        let filter = args.filter();
        assert_eq!(filter.title_like(), "Super%");
        assert!(filter.author.is_none());

        let empty = SearchArgs {
            title: None,
            author: None,
            limit: 5,
        };
        assert!(empty.filter().is_unfiltered());
    }
}
