mod cli;
mod conf;
mod object_store;
mod orchestrator;
mod scheduler;
mod storage;
mod tracking;

use human_panic::setup_panic;

#[tokio::main]
async fn main() {
    setup_panic!();

    if let Err(e) = cli::init().await {
        eprintln!("x Command failed; {:#}", e);
        std::process::exit(1)
    }
}
