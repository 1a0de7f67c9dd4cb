fn main() {
    if let Err(err) = tablecast::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
