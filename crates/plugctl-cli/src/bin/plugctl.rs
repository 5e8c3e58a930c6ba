fn main() {
    plugctl_cli::set_version(
        option_env!("PLUGCTL_VERSION").unwrap_or(env!("CARGO_PKG_VERSION")),
        option_env!("PLUGCTL_COMMIT").unwrap_or("none"),
    );
    let code = plugctl_cli::run_from_env();
    std::process::exit(code);
}
