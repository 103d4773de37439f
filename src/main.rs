//! Hermes signaling server binary.

use std::sync::Arc;

use actix::Actor as _;
use hermes::{api, log, signalling::HubManager, Conf};

fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();

    let conf = Conf::parse().unwrap();
    let _log_guard = log::init();

    actix::System::new().block_on(async move {
        let (registry, presence_factory) =
            hermes::build_storage(&conf).unwrap();
        let hub_manager =
            HubManager::new(&conf, Arc::clone(&registry), presence_factory)
                .start();
        api::run(conf, registry, hub_manager).await
    })
}
