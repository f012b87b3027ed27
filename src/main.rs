fn main() {
    if let Err(err) = polychat::cli::main() {
        eprintln!("❌ Error: {err}");
        std::process::exit(1);
    }
}
