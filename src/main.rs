use color_eyre::Result;

use crate::settings::read_settings;

mod app;
mod broker;
mod console;
mod dashboard;
mod mqtt;
mod notify;
mod protocols;
mod settings;
mod storage;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();

    let settings = read_settings()?;

    app::run(settings).await
}
