fn main() {
    env_logger::init();

    if let Err(e) = tessera::host::run(std::env::args().nth(1)) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
