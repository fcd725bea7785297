//! DataSage CLI Entry Point
//!
//! This binary provides the command-line interface for DataSage.

use std::process;

#[tokio::main]
async fn main() {
    if let Err(e) = datasage_interface::run_cli().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
