//! Command-line entry points. Each command resolves its [`Config`], wires
//! the store, catalog and installer together and prints a short summary.

use log::debug;
use tokio::task::JoinHandle;

use crate::cleanup::{self, SharedCleanupContext};
use crate::config::Config;
use crate::http::HttpClient;

mod install;
mod list;
mod update;
mod versions;

pub use install::install;
pub use list::list;
pub use update::update;
pub use versions::versions;

/// Removes whatever is staged when the user interrupts. Abort the returned
/// handle once the guarded work is finished.
pub(crate) fn spawn_interrupt_handler(ctx: SharedCleanupContext) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, cleaning up...");
            cleanup::lock(&ctx).cleanup();
            std::process::exit(130);
        }
    })
}

pub(crate) fn http_client(config: &Config) -> HttpClient {
    debug!("Catalog at {}", config.details_url);
    HttpClient::new(config.client.clone())
}
