pub mod clean;
pub mod list;
pub mod show;
pub mod upload;
mod view;

pub use view::RecordView;
