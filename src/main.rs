//! mcporter CLI - client runtime for MCP servers
//!
//! Run with: cargo run --bin mcporter -- <command>
//! Or after build: ./target/release/mcporter <command>

fn main() -> std::process::ExitCode {
    let code = mcporter::cli::run();

    // Force-exit so dangling stdio handles from child servers cannot keep
    // the process alive; opt out with MCPORTER_NO_FORCE_EXIT.
    let no_force_exit = std::env::var(mcporter::constants::ENV_NO_FORCE_EXIT)
        .is_ok_and(|v| !v.is_empty());
    if !no_force_exit {
        std::process::exit(code);
    }
    std::process::ExitCode::from(code.clamp(0, 255) as u8)
}
