fn main() {
    if let Err(err) = dataset_analytics::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
