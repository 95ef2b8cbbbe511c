pub mod bash;
pub mod cron;
pub mod discord_send;
pub mod file;
pub mod file_download;
pub mod http;
pub mod memory;
pub mod pdf;
pub mod trello;
pub mod weather;
pub mod web_search;

pub use bash::BashTool;
pub use cron::CronTool;
pub use discord_send::{ChatEgress, DiscordSendTool};
pub use file::FileTool;
pub use file_download::FileDownloadTool;
pub use http::HttpTool;
pub use memory::MemoryTool;
pub use pdf::PdfTool;
pub use trello::TrelloTool;
pub use weather::WeatherTool;
pub use web_search::WebSearchTool;
