#[tokio::main]
async fn main() {
    if let Err(e) = imagegen_lib::run().await {
        eprintln!("imagegen-dispatch: {}", e);
        std::process::exit(1);
    }
}
